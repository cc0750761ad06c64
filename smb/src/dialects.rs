//! Implements SMB-dialect-specific types and functions.

use crate::{
    connection::{
        config::ConnectionConfig, negotiation_state::NegotiationState, preauth_hash,
        preauth_hash::PreauthHashValue,
    },
    packets::smb2::*,
    Error,
};

/// This is a utility struct that returns constants and functions for the given dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectImpl {
    pub dialect: Dialect,
}

/// The label and context of one SP800-108 key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfInput {
    pub label: &'static [u8],
    pub context: Vec<u8>,
}

impl DialectImpl {
    /// Client preference when a 3.1.1 server lists several ciphers.
    pub const CIPHER_PREFERENCE: [EncryptionCipher; 2] =
        [EncryptionCipher::Aes128Gcm, EncryptionCipher::Aes128Ccm];

    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn preauth_hash_supported(&self) -> bool {
        self.dialect == Dialect::Smb0311
    }

    pub fn supports_encryption(&self) -> bool {
        self.dialect.is_smb3()
    }

    pub fn supports_compression(&self) -> bool {
        self.dialect == Dialect::Smb0311
    }

    pub fn default_signing_algo(&self) -> SigningAlgorithmId {
        match self.dialect {
            Dialect::Smb0311 | Dialect::Smb0302 | Dialect::Smb030 => SigningAlgorithmId::AesCmac,
            Dialect::Smb0202 | Dialect::Smb021 => SigningAlgorithmId::HmacSha256,
        }
    }

    /// Capabilities the client advertises when offering this dialect as its highest.
    pub fn negotiate_caps(&self) -> GlobalCapabilities {
        let mut caps = GlobalCapabilities::new().with_dfs(true).with_large_mtu(true);
        caps.set_encryption(self.dialect.is_smb3());
        caps
    }

    /// Derivation input of the signing key, or `None` when the session key signs directly.
    pub fn signing_key_kdf(
        &self,
        preauth_hash: Option<&PreauthHashValue>,
    ) -> crate::Result<Option<KdfInput>> {
        match self.dialect {
            Dialect::Smb0311 => Ok(Some(KdfInput {
                label: Smb311::SIGNING_KEY_LABEL,
                context: Smb311::context(preauth_hash)?,
            })),
            Dialect::Smb0302 | Dialect::Smb030 => Ok(Some(KdfInput {
                label: Smb300_302::SIGNING_KEY_LABEL,
                context: Smb300_302::SIGNING_CONTEXT.to_vec(),
            })),
            Dialect::Smb0202 | Dialect::Smb021 => Ok(None),
        }
    }

    /// Derivation input of the key protecting client-to-server traffic.
    pub fn c2s_encrypt_key_kdf(
        &self,
        preauth_hash: Option<&PreauthHashValue>,
    ) -> crate::Result<KdfInput> {
        match self.dialect {
            Dialect::Smb0311 => Ok(KdfInput {
                label: Smb311::ENCRYPTION_C2S_KEY_LABEL,
                context: Smb311::context(preauth_hash)?,
            }),
            Dialect::Smb0302 | Dialect::Smb030 => Ok(KdfInput {
                label: Smb300_302::ENCRYPTION_KEY_LABEL,
                context: Smb300_302::ENCRYPTION_C2S_CONTEXT.to_vec(),
            }),
            _ => Err(Self::incompatible()),
        }
    }

    /// Derivation input of the key protecting server-to-client traffic.
    pub fn s2c_encrypt_key_kdf(
        &self,
        preauth_hash: Option<&PreauthHashValue>,
    ) -> crate::Result<KdfInput> {
        match self.dialect {
            Dialect::Smb0311 => Ok(KdfInput {
                label: Smb311::ENCRYPTION_S2C_KEY_LABEL,
                context: Smb311::context(preauth_hash)?,
            }),
            Dialect::Smb0302 | Dialect::Smb030 => Ok(KdfInput {
                label: Smb300_302::ENCRYPTION_KEY_LABEL,
                context: Smb300_302::ENCRYPTION_S2C_CONTEXT.to_vec(),
            }),
            _ => Err(Self::incompatible()),
        }
    }

    fn incompatible() -> Error {
        Error::encryption("Dialect is incompatible with SMBv3 encryption/decryption")
    }

    /// Applies the dialect-specific part of a negotiate response to `state`.
    pub fn process_negotiate_response(
        &self,
        response: &NegotiateResponse,
        state: &mut NegotiationState,
        config: &ConnectionConfig,
    ) -> crate::Result<()> {
        match self.dialect {
            Dialect::Smb0311 => Smb311.process_negotiate_response(response, state, config),
            Dialect::Smb0302 | Dialect::Smb030 => {
                Smb300_302.process_negotiate_response(response, state, config)
            }
            Dialect::Smb0202 | Dialect::Smb021 => {
                Smb2.process_negotiate_response(response, state, config)
            }
        }
    }
}

trait DialectMethods {
    fn process_negotiate_response(
        &self,
        response: &NegotiateResponse,
        state: &mut NegotiationState,
        config: &ConnectionConfig,
    ) -> crate::Result<()>;
}

struct Smb311;
impl Smb311 {
    pub const SIGNING_KEY_LABEL: &[u8] = b"SMBSigningKey\x00";
    pub const ENCRYPTION_S2C_KEY_LABEL: &[u8] = b"SMBS2CCipherKey\x00";
    pub const ENCRYPTION_C2S_KEY_LABEL: &[u8] = b"SMBC2SCipherKey\x00";

    fn context(preauth_hash: Option<&PreauthHashValue>) -> crate::Result<Vec<u8>> {
        preauth_hash
            .map(|h| h.to_vec())
            .ok_or_else(|| Error::encryption("Preauth integrity hash is not available"))
    }
}

impl DialectMethods for Smb311 {
    fn process_negotiate_response(
        &self,
        response: &NegotiateResponse,
        state: &mut NegotiationState,
        _config: &ConnectionConfig,
    ) -> crate::Result<()> {
        let preauth = response
            .preauth_integrity_ctx()
            .ok_or_else(|| Error::encryption("Missing preauth integrity negotiate context"))?;
        let hash_algorithm = *preauth
            .hash_algorithms
            .first()
            .ok_or_else(|| Error::encryption("Empty preauth integrity hash algorithm list"))?;
        if !preauth_hash::SUPPORTED_ALGOS.contains(&hash_algorithm) {
            return Err(Error::encryption(
                "Unsupported preauth integrity algorithm received",
            ));
        }

        let encryption = response
            .encryption_ctx()
            .ok_or_else(|| Error::encryption("Missing encryption capabilities negotiate context"))?;
        if encryption.ciphers.is_empty() {
            return Err(Error::encryption(
                "Empty encryption capabilities cipher list",
            ));
        }
        let cipher = DialectImpl::CIPHER_PREFERENCE
            .iter()
            .copied()
            .find(|c| encryption.ciphers.contains(c))
            .ok_or_else(|| {
                Error::encryption(format!(
                    "No mutually supported cipher in {:?}",
                    encryption.ciphers
                ))
            })?;

        state.preauth_integrity_algorithm = Some(hash_algorithm);
        state.encryption_cipher = Some(cipher);
        state.compression_algorithms = response
            .compression_ctx()
            .map(|c| c.compression_algorithms.clone())
            .unwrap_or_default();

        log::debug!(
            "3.1.1 contexts: hash {:?}, cipher {}, compression {:?}",
            hash_algorithm,
            cipher,
            state.compression_algorithms
        );
        Ok(())
    }
}

struct Smb300_302;
impl Smb300_302 {
    pub const SIGNING_KEY_LABEL: &[u8] = b"SMB2AESCMAC\x00";
    pub const SIGNING_CONTEXT: &[u8] = b"SmbSign\x00";
    pub const ENCRYPTION_KEY_LABEL: &[u8] = b"SMB2AESCCM\x00";
    pub const ENCRYPTION_C2S_CONTEXT: &[u8] = b"ServerIn \x00";
    pub const ENCRYPTION_S2C_CONTEXT: &[u8] = b"ServerOut\x00";
}

impl DialectMethods for Smb300_302 {
    fn process_negotiate_response(
        &self,
        response: &NegotiateResponse,
        state: &mut NegotiationState,
        config: &ConnectionConfig,
    ) -> crate::Result<()> {
        if response.negotiate_context_list.is_some() {
            return Err(Error::InvalidMessage(
                "Negotiate context list not expected".to_string(),
            ));
        }

        if response.capabilities.encryption() {
            state.encryption_cipher = Some(EncryptionCipher::Aes128Ccm);
        } else if config.encryption_mode.is_required() {
            return Err(Error::encryption(
                "Encryption is required, but cap not supported by the server.",
            ));
        }

        Ok(())
    }
}

/// 2.0.2 and 2.1.
struct Smb2;

impl DialectMethods for Smb2 {
    fn process_negotiate_response(
        &self,
        _response: &NegotiateResponse,
        _state: &mut NegotiationState,
        config: &ConnectionConfig,
    ) -> crate::Result<()> {
        if config.encryption_mode.is_required() {
            return Err(Error::encryption(
                "Encryption is required, but the negotiated dialect does not support it.",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{binrw_util::prelude::FileTime, guid::Guid};

    fn response(
        dialect: NegotiateDialect,
        contexts: Option<Vec<NegotiateContext>>,
    ) -> NegotiateResponse {
        NegotiateResponse {
            security_mode: NegotiateSecurityMode::new().with_signing_enabled(true),
            dialect_revision: dialect,
            server_guid: Guid::ZERO,
            capabilities: GlobalCapabilities::new(),
            max_transact_size: 0x800000,
            max_read_size: 0x800000,
            max_write_size: 0x800000,
            system_time: FileTime::default(),
            server_start_time: FileTime::default(),
            buffer: vec![],
            negotiate_context_list: contexts,
        }
    }

    fn preauth_ctx(algos: Vec<HashAlgorithm>) -> NegotiateContext {
        NegotiateContextValue::PreauthIntegrityCapabilities(PreauthIntegrityCapabilities {
            hash_algorithms: algos,
            salt: vec![0; 32],
        })
        .into()
    }

    fn encryption_ctx(ciphers: Vec<EncryptionCipher>) -> NegotiateContext {
        NegotiateContextValue::EncryptionCapabilities(EncryptionCapabilities { ciphers }).into()
    }

    fn process(response: &NegotiateResponse) -> crate::Result<NegotiationState> {
        let dialect = Dialect::try_from(response.dialect_revision)?;
        let mut state = NegotiationState::from_smb2(dialect, response);
        DialectImpl::new(dialect).process_negotiate_response(
            response,
            &mut state,
            &ConnectionConfig::default(),
        )?;
        Ok(state)
    }

    #[test]
    fn test_311_prefers_gcm() {
        let state = process(&response(
            NegotiateDialect::Smb0311,
            Some(vec![
                preauth_ctx(vec![HashAlgorithm::Sha512]),
                encryption_ctx(vec![EncryptionCipher::Aes128Ccm, EncryptionCipher::Aes128Gcm]),
            ]),
        ))
        .unwrap();
        assert_eq!(state.encryption_cipher, Some(EncryptionCipher::Aes128Gcm));
        assert_eq!(state.preauth_integrity_algorithm, Some(HashAlgorithm::Sha512));
        assert!(state.compression_algorithms.is_empty());
    }

    #[test]
    fn test_311_missing_preauth_context() {
        let err = process(&response(
            NegotiateDialect::Smb0311,
            Some(vec![encryption_ctx(vec![EncryptionCipher::Aes128Ccm])]),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::EncryptionError { .. }));
    }

    #[test]
    fn test_311_empty_hash_list() {
        let err = process(&response(
            NegotiateDialect::Smb0311,
            Some(vec![
                preauth_ctx(vec![]),
                encryption_ctx(vec![EncryptionCipher::Aes128Ccm]),
            ]),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::EncryptionError { .. }));
    }

    #[test]
    fn test_311_missing_or_empty_encryption_context() {
        for contexts in [
            vec![preauth_ctx(vec![HashAlgorithm::Sha512])],
            vec![
                preauth_ctx(vec![HashAlgorithm::Sha512]),
                encryption_ctx(vec![]),
            ],
        ] {
            let err = process(&response(NegotiateDialect::Smb0311, Some(contexts))).unwrap_err();
            assert!(matches!(err, Error::EncryptionError { .. }));
        }
    }

    #[test]
    fn test_311_no_mutual_cipher() {
        let err = process(&response(
            NegotiateDialect::Smb0311,
            Some(vec![
                preauth_ctx(vec![HashAlgorithm::Sha512]),
                encryption_ctx(vec![EncryptionCipher::Aes256Gcm]),
            ]),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::EncryptionError { .. }));
    }

    #[test]
    fn test_30_encryption_follows_capability() {
        let mut resp = response(NegotiateDialect::Smb030, None);
        assert_eq!(process(&resp).unwrap().encryption_cipher, None);
        resp.capabilities.set_encryption(true);
        assert_eq!(
            process(&resp).unwrap().encryption_cipher,
            Some(EncryptionCipher::Aes128Ccm)
        );
    }

    #[test]
    fn test_kdf_labels() {
        let hash = [7u8; 64];
        let d311 = DialectImpl::new(Dialect::Smb0311);
        assert_eq!(
            d311.c2s_encrypt_key_kdf(Some(&hash)).unwrap(),
            KdfInput {
                label: b"SMBC2SCipherKey\x00",
                context: hash.to_vec()
            }
        );
        assert_eq!(
            d311.s2c_encrypt_key_kdf(Some(&hash)).unwrap().label,
            b"SMBS2CCipherKey\x00"
        );
        assert!(d311.signing_key_kdf(None).is_err());

        let d300 = DialectImpl::new(Dialect::Smb030);
        assert_eq!(
            d300.c2s_encrypt_key_kdf(None).unwrap().context,
            b"ServerIn \x00".to_vec()
        );
        assert_eq!(
            d300.s2c_encrypt_key_kdf(None).unwrap().context,
            b"ServerOut\x00".to_vec()
        );
        assert_eq!(DialectImpl::new(Dialect::Smb021).signing_key_kdf(None).unwrap(), None);
    }

    #[test]
    fn test_smb2_dialects_cannot_encrypt() {
        let err = DialectImpl::new(Dialect::Smb021)
            .c2s_encrypt_key_kdf(None)
            .unwrap_err();
        assert!(matches!(err, Error::EncryptionError { .. }));
    }
}
