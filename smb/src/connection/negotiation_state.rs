use std::fmt::Display;

use crate::packets::{
    binrw_util::prelude::*,
    guid::Guid,
    smb1::{Smb1BasicNegotiateResponse, Smb1ExtendedNegotiateResponse},
    smb2::*,
};

use super::preauth_hash::PreauthHashState;
use crate::{session::Smb1MessageSigner, Error};

/// The protocol family a negotiated dialect belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolFamily {
    Smb1,
    Smb2,
    Smb3,
}

impl Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProtocolFamily::Smb1 => "SMB1",
            ProtocolFamily::Smb2 => "SMB2",
            ProtocolFamily::Smb3 => "SMB3",
        };
        write!(f, "{name}")
    }
}

/// The final dialect of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiatedDialect {
    /// An SMB1 dialect, by its dialect string.
    Smb1(String),
    Smb2(Dialect),
}

impl NegotiatedDialect {
    pub fn family(&self) -> ProtocolFamily {
        match self {
            NegotiatedDialect::Smb1(_) => ProtocolFamily::Smb1,
            NegotiatedDialect::Smb2(d) if d.is_smb3() => ProtocolFamily::Smb3,
            NegotiatedDialect::Smb2(_) => ProtocolFamily::Smb2,
        }
    }
}

impl Display for NegotiatedDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiatedDialect::Smb1(name) => write!(f, "{name}"),
            NegotiatedDialect::Smb2(dialect) => write!(f, "{dialect}"),
        }
    }
}

/// Everything a connection learned from the negotiate exchange.
#[derive(Debug, Clone)]
pub struct NegotiationState {
    pub dialect: NegotiatedDialect,

    pub signing_enabled: bool,
    pub signing_required: bool,

    pub server_guid: Guid,
    pub system_time: FileTime,
    pub server_start_time: FileTime,

    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub supports_multi_credit: bool,

    /// Zero for SMB1.
    pub capabilities: GlobalCapabilities,

    /// The GSS token of the response, handed to the authenticator first.
    pub security_buffer: Vec<u8>,

    /// 3.1.1 only.
    pub preauth_integrity_algorithm: Option<HashAlgorithm>,
    /// 3.1.1 only. Covers the final negotiate round.
    pub preauth_hash: Option<PreauthHashState>,

    pub encryption_cipher: Option<EncryptionCipher>,
    pub compression_algorithms: Vec<CompressionAlgorithm>,

    /// SMB1 only. The sequence number the next signed message carries.
    pub smb1_sequence: u32,
}

impl NegotiationState {
    pub fn family(&self) -> ProtocolFamily {
        self.dialect.family()
    }

    /// Signs an outgoing SMB1 message with the connection's sequence number,
    /// advancing it when a signature was written.
    pub fn sign_smb1(
        &mut self,
        signer: &Smb1MessageSigner,
        message: Vec<u8>,
    ) -> crate::Result<Vec<u8>> {
        if self.family() != ProtocolFamily::Smb1 {
            return Err(Error::InvalidState(format!(
                "SMB1 signing on a {} connection",
                self.dialect
            )));
        }
        if !signer.is_active() {
            return Ok(message);
        }
        let message = signer.sign(message, self.smb1_sequence)?;
        self.smb1_sequence = self.smb1_sequence.wrapping_add(1);
        Ok(message)
    }

    /// The SMB2 dialect, if the connection negotiated one.
    pub fn smb2_dialect(&self) -> Option<Dialect> {
        match self.dialect {
            NegotiatedDialect::Smb2(d) => Some(d),
            NegotiatedDialect::Smb1(_) => None,
        }
    }

    pub fn from_smb2(dialect: Dialect, response: &NegotiateResponse) -> Self {
        Self {
            dialect: NegotiatedDialect::Smb2(dialect),
            signing_enabled: response.security_mode.signing_enabled(),
            signing_required: response.security_mode.signing_required(),
            server_guid: response.server_guid,
            system_time: response.system_time,
            server_start_time: response.server_start_time,
            max_transact_size: response.max_transact_size,
            max_read_size: response.max_read_size,
            max_write_size: response.max_write_size,
            supports_multi_credit: dialect >= Dialect::Smb021 && response.capabilities.large_mtu(),
            capabilities: response.capabilities,
            security_buffer: response.buffer.clone(),
            preauth_integrity_algorithm: None,
            preauth_hash: None,
            encryption_cipher: None,
            compression_algorithms: vec![],
            smb1_sequence: 0,
        }
    }

    pub fn from_smb1_extended(dialect: &str, response: &Smb1ExtendedNegotiateResponse) -> Self {
        Self {
            security_buffer: response.payload.security_blob.clone(),
            server_guid: response.payload.server_guid,
            ..Self::smb1_common(
                dialect,
                response.security_mode.security_signatures_enabled(),
                response.security_mode.security_signatures_required(),
                response.max_buffer_size,
                response.system_time,
            )
        }
    }

    pub fn from_smb1_basic(dialect: &str, response: &Smb1BasicNegotiateResponse) -> Self {
        Self::smb1_common(
            dialect,
            response.security_mode.security_signatures_enabled(),
            response.security_mode.security_signatures_required(),
            response.max_buffer_size,
            response.system_time,
        )
    }

    fn smb1_common(
        dialect: &str,
        signing_enabled: bool,
        signing_required: bool,
        max_buffer_size: u32,
        system_time: FileTime,
    ) -> Self {
        Self {
            dialect: NegotiatedDialect::Smb1(dialect.to_string()),
            signing_enabled,
            signing_required,
            server_guid: Guid::ZERO,
            system_time,
            server_start_time: FileTime::default(),
            max_transact_size: max_buffer_size,
            max_read_size: max_buffer_size,
            max_write_size: max_buffer_size,
            supports_multi_credit: false,
            capabilities: GlobalCapabilities::new(),
            security_buffer: vec![],
            preauth_integrity_algorithm: None,
            preauth_hash: None,
            encryption_cipher: None,
            compression_algorithms: vec![],
            smb1_sequence: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::smb1::Smb1Header;

    #[test]
    fn test_family_and_display() {
        assert_eq!(
            NegotiatedDialect::Smb2(Dialect::Smb0311).family(),
            ProtocolFamily::Smb3
        );
        assert_eq!(
            NegotiatedDialect::Smb2(Dialect::Smb021).family(),
            ProtocolFamily::Smb2
        );
        assert_eq!(
            NegotiatedDialect::Smb1("NT LM 0.12".into()).family(),
            ProtocolFamily::Smb1
        );
        assert_eq!(NegotiatedDialect::Smb2(Dialect::Smb0311).to_string(), "0x0311");
        assert_eq!(ProtocolFamily::Smb3.to_string(), "SMB3");
    }

    #[test]
    fn test_smb1_sequence_is_connection_owned() {
        let mut state =
            NegotiationState::smb1_common("NT LM 0.12", true, true, 4096, FileTime::default());
        let message = {
            let mut m = b"\xffSMBs".to_vec();
            m.resize(Smb1Header::SIZE + 2, 0);
            m
        };

        // Two signers over the same connection share one counter.
        let first_signer = Smb1MessageSigner::new(&[0x10; 16], true);
        let second_signer = Smb1MessageSigner::new(&[0x10; 16], true);
        let first = state.sign_smb1(&first_signer, message.clone()).unwrap();
        let second = state.sign_smb1(&second_signer, message.clone()).unwrap();
        assert_eq!(state.smb1_sequence, 2);
        first_signer.verify(&first, 0).unwrap();
        first_signer.verify(&second, 1).unwrap();

        // Unsigned messages leave the counter alone.
        let off = Smb1MessageSigner::new(&[0x10; 16], false);
        assert_eq!(state.sign_smb1(&off, message.clone()).unwrap(), message);
        assert_eq!(state.smb1_sequence, 2);
    }

    #[test]
    fn test_smb1_signing_needs_smb1_connection() {
        let mut state =
            NegotiationState::smb1_common("NT LM 0.12", true, true, 4096, FileTime::default());
        state.dialect = NegotiatedDialect::Smb2(Dialect::Smb0302);
        let signer = Smb1MessageSigner::new(&[0x10; 16], true);
        assert!(matches!(
            state.sign_smb1(&signer, vec![0; Smb1Header::SIZE]),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(state.smb1_sequence, 0);
    }
}
