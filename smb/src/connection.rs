pub mod config;
pub mod negotiation_state;
pub mod negotiator;
pub mod preauth_hash;
pub mod transport;

pub use config::*;
pub use negotiation_state::{NegotiatedDialect, NegotiationState, ProtocolFamily};
pub use negotiator::{NegotiateRequestPacket, NegotiateResponseKind};

use crate::{
    dialects::DialectImpl,
    packets::{guid::Guid, smb2::*},
    session::{Authenticator, Session, Smb1MessageSigner},
    Error,
};
use preauth_hash::PreauthHashState;
use transport::{make_transport, SmbTransport};

/// A client connection to an SMB server.
///
/// Owns the transport and the negotiated state. Sessions borrow the connection
/// mutably, so a connection carries at most one active session at a time.
pub struct Connection {
    server: String,
    config: ConnectionConfig,
    client_guid: Guid,
    transport: Box<dyn SmbTransport>,

    negotiation: Option<NegotiationState>,
    /// The next SMB2 message id.
    message_id: u64,
}

/// What a single negotiate round ended with.
enum RoundOutcome {
    Final(NegotiationState),
    /// The server answered with the SMB2 wildcard and expects a real SMB2 negotiate.
    Wildcard,
}

impl Connection {
    /// Creates a connection to `server`, without connecting yet.
    pub fn build(server: &str, config: ConnectionConfig) -> crate::Result<Connection> {
        config.validate()?;
        let transport = make_transport(&config.transport, config.timeout())?;
        Self::from_transport(server, config, transport)
    }

    /// Creates a connection over an already constructed transport.
    pub fn from_transport(
        server: &str,
        config: ConnectionConfig,
        transport: Box<dyn SmbTransport>,
    ) -> crate::Result<Connection> {
        config.validate()?;
        let server = transport::utils::TransportUtils::get_server_name(server)?;
        Ok(Connection {
            client_guid: config.client_guid.unwrap_or_else(Guid::gen),
            server,
            config,
            transport,
            negotiation: None,
            message_id: 0,
        })
    }

    /// Connects the transport to the server, on the configured port.
    pub fn connect(&mut self) -> crate::Result<()> {
        let endpoint = format!("{}:{}", self.server, self.config.port());
        log::debug!("Connecting to {}...", endpoint);
        self.transport.connect(&endpoint)?;
        log::info!("Connected to {}.", endpoint);
        Ok(())
    }

    /// Connects and negotiates, returning the negotiated protocol family.
    pub fn connect_and_negotiate(&mut self) -> crate::Result<ProtocolFamily> {
        self.connect()?;
        self.negotiate()
    }

    /// Negotiates a dialect with the server, starting from the configured protocol families.
    pub fn negotiate(&mut self) -> crate::Result<ProtocolFamily> {
        self.negotiate_with(None)
    }

    /// Negotiates a dialect, sending `request` instead of the configured one if given.
    ///
    /// An SMB2 wildcard answer triggers a second, SMB2-only round. Failed rounds surface
    /// as [`Error::NegotiationFailure`] naming the offered dialects.
    pub fn negotiate_with(
        &mut self,
        request: Option<NegotiateRequestPacket>,
    ) -> crate::Result<ProtocolFamily> {
        if self.negotiation.is_some() {
            return Err(Error::InvalidState("Already negotiated".into()));
        }

        let request = match request {
            Some(request) => request,
            None => self.default_negotiate_request()?,
        };
        let attempted = request.describe();
        log::debug!("Negotiating, offering {}", attempted);

        let outcome = self
            .negotiate_round(&request)
            .map_err(|e| Self::negotiation_failure(&attempted, e))?;

        match outcome {
            RoundOutcome::Wildcard => {
                log::debug!("Server answered with the SMB2 wildcard, negotiating SMB2");
                let request = self.smb2_negotiate_request()?;
                self.negotiate_with(Some(request))
            }
            RoundOutcome::Final(state) => {
                let family = state.family();
                log::info!(
                    "Negotiated {} ({}), signing required: {}",
                    state.dialect,
                    family,
                    state.signing_required
                );
                self.negotiation = Some(state);
                Ok(family)
            }
        }
    }

    fn default_negotiate_request(&self) -> crate::Result<NegotiateRequestPacket> {
        if self.config.protocols.smb1 {
            Ok(NegotiateRequestPacket::Smb1(negotiator::smb1_request(
                &self.config,
            )))
        } else {
            self.smb2_negotiate_request()
        }
    }

    fn smb2_negotiate_request(&self) -> crate::Result<NegotiateRequestPacket> {
        Ok(NegotiateRequestPacket::Smb2(negotiator::smb2_request(
            &self.config,
            self.client_guid,
            &self.server,
            self.message_id,
        )?))
    }

    fn negotiate_round(&mut self, request: &NegotiateRequestPacket) -> crate::Result<RoundOutcome> {
        let raw_request = request.encode()?;
        self.transport.send(&raw_request)?;
        self.message_id += 1;
        let raw_response = self.transport.receive()?;

        match negotiator::classify_response(&raw_response, request)? {
            NegotiateResponseKind::Smb1NoDialect => Err(Error::NegotiationFailure {
                attempted: request.describe(),
                source: Box::new(Error::InvalidMessage(
                    "Server accepted none of the offered dialects".to_string(),
                )),
            }),
            NegotiateResponseKind::Smb1Extended { dialect, response } => {
                self.check_smb1_allowed()?;
                Ok(RoundOutcome::Final(NegotiationState::from_smb1_extended(
                    &dialect, &response,
                )))
            }
            NegotiateResponseKind::Smb1Basic { dialect, response } => {
                self.check_smb1_allowed()?;
                Ok(RoundOutcome::Final(NegotiationState::from_smb1_basic(
                    &dialect, &response,
                )))
            }
            NegotiateResponseKind::Smb2Error { status } => Err(Error::UnexpectedStatusCode {
                expected: Status::Success,
                received: status,
            }),
            NegotiateResponseKind::Smb2 { header, response } => {
                log::trace!("Negotiate response header: {:?}", header);
                if response.dialect_revision == NegotiateDialect::Smb02Wildcard {
                    return match request {
                        NegotiateRequestPacket::Smb1(smb1)
                            if smb1.offers(crate::packets::smb1::Smb1Dialect::SMB_2_WILDCARD) =>
                        {
                            Ok(RoundOutcome::Wildcard)
                        }
                        _ => Err(Error::UnsupportedDialect(response.dialect_revision)),
                    };
                }

                let dialect = Dialect::try_from(response.dialect_revision)?;
                if !request.offers_smb2(dialect) {
                    return Err(Error::UnsupportedDialect(response.dialect_revision));
                }

                let mut state = NegotiationState::from_smb2(dialect, &response);
                state.signing_required |= self.config.signing_required;
                DialectImpl::new(dialect).process_negotiate_response(
                    &response,
                    &mut state,
                    &self.config,
                )?;
                if DialectImpl::new(dialect).preauth_hash_supported() {
                    state.preauth_hash = Some(
                        PreauthHashState::default()
                            .next(&raw_request)?
                            .next(&raw_response)?,
                    );
                }
                Ok(RoundOutcome::Final(state))
            }
        }
    }

    fn check_smb1_allowed(&self) -> crate::Result<()> {
        if self.config.encryption_mode.is_required() {
            return Err(Error::encryption(
                "Encryption is required, but the server negotiated SMB1",
            ));
        }
        Ok(())
    }

    /// Every failure of a negotiate round becomes a [`Error::NegotiationFailure`] naming
    /// the offered dialects, with the cause kept as its source. [`Error::EncryptionError`]
    /// passes through, so missing 3.1.1 contexts stay distinguishable.
    fn negotiation_failure(attempted: &str, error: Error) -> Error {
        match error {
            Error::EncryptionError { .. } | Error::NegotiationFailure { .. } => error,
            error => {
                log::warn!("Negotiation failed while offering {}: {}", attempted, error);
                Error::NegotiationFailure {
                    attempted: attempted.to_string(),
                    source: Box::new(error),
                }
            }
        }
    }

    /// Sets up a session, authenticating with `authenticator`.
    pub fn authenticate(
        &mut self,
        authenticator: &mut dyn Authenticator,
    ) -> crate::Result<Session<'_>> {
        Session::setup(self, authenticator)
    }

    /// The negotiated state, once negotiation completed.
    pub fn negotiation(&self) -> Option<&NegotiationState> {
        self.negotiation.as_ref()
    }

    /// Signs an outgoing SMB1 message, advancing the connection's SMB1 sequence number.
    pub fn sign_smb1(
        &mut self,
        signer: &Smb1MessageSigner,
        message: Vec<u8>,
    ) -> crate::Result<Vec<u8>> {
        self.negotiation
            .as_mut()
            .ok_or_else(|| Error::InvalidState("SMB1 signing before negotiation".into()))?
            .sign_smb1(signer, message)
    }

    /// The negotiated dialect tag, e.g. `0x0311` or `NT LM 0.12`.
    pub fn dialect(&self) -> Option<String> {
        self.negotiation.as_ref().map(|n| n.dialect.to_string())
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn server_name(&self) -> &str {
        &self.server
    }

    pub fn client_guid(&self) -> Guid {
        self.client_guid
    }

    /// Assigns the next message id and credits to an outgoing request header.
    pub(crate) fn process_sequence_outgoing(&mut self, header: &mut Header) {
        header.message_id = self.message_id;
        self.message_id += 1;
        header.credit_request = 1;
        let multi_credit = self
            .negotiation
            .as_ref()
            .and_then(|n| n.smb2_dialect())
            .is_some_and(|d| d > Dialect::Smb0202);
        header.credit_charge = if multi_credit { 1 } else { 0 };
        if self
            .negotiation
            .as_ref()
            .and_then(|n| n.smb2_dialect())
            .is_some_and(|d| d == Dialect::Smb0311)
        {
            header.flags.set_priority_mask(1);
        }
    }

    pub(crate) fn send_packet(&mut self, raw: &[u8]) -> crate::Result<()> {
        self.transport.send(raw)
    }

    pub(crate) fn receive_packet(&mut self) -> crate::Result<Vec<u8>> {
        self.transport.receive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use binrw::prelude::*;
    use sha2::{Digest, Sha512};

    use super::*;
    use crate::packets::{binrw_util::prelude::FileTime, smb1::*};
    use transport::traits::tests::ScriptedTransport;

    fn negotiate_response(
        dialect: NegotiateDialect,
        contexts: Option<Vec<NegotiateContext>>,
        message_id: u64,
    ) -> Vec<u8> {
        let mut request_header = Header::new(Command::Negotiate);
        request_header.message_id = message_id;
        let response = PlainResponse::reply_to(
            &request_header,
            Status::Success,
            ResponseContent::Negotiate(NegotiateResponse {
                security_mode: NegotiateSecurityMode::new().with_signing_enabled(true),
                dialect_revision: dialect,
                server_guid: Guid::from([0x5a; 16]),
                capabilities: GlobalCapabilities::new().with_large_mtu(true),
                max_transact_size: 0x800000,
                max_read_size: 0x800000,
                max_write_size: 0x800000,
                system_time: FileTime::from(133_000_000_000_000_000),
                server_start_time: FileTime::default(),
                buffer: vec![0x60, 0x00],
                negotiate_context_list: contexts,
            }),
        );
        let mut cursor = Cursor::new(Vec::new());
        response.write(&mut cursor).unwrap();
        cursor.into_inner()
    }

    fn smb311_contexts() -> Vec<NegotiateContext> {
        vec![
            NegotiateContextValue::PreauthIntegrityCapabilities(PreauthIntegrityCapabilities {
                hash_algorithms: vec![HashAlgorithm::Sha512],
                salt: vec![1; 32],
            })
            .into(),
            NegotiateContextValue::EncryptionCapabilities(EncryptionCapabilities {
                ciphers: vec![EncryptionCipher::Aes128Ccm],
            })
            .into(),
        ]
    }

    fn connection(
        config: ConnectionConfig,
        inbound: Vec<Vec<u8>>,
    ) -> (Connection, std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>) {
        let transport = ScriptedTransport::new(inbound);
        let sent = transport.sent_log();
        let connection = Connection::from_transport("server", config, Box::new(transport)).unwrap();
        (connection, sent)
    }

    fn smb2_only() -> ConnectionConfig {
        ConnectionConfig {
            protocols: ProtocolFlags {
                smb1: false,
                smb2: true,
                smb3: true,
            },
            ..Default::default()
        }
    }

    #[test_log::test]
    fn test_wildcard_round_trip() {
        let (mut connection, sent) = connection(
            ConnectionConfig::default(),
            vec![
                negotiate_response(NegotiateDialect::Smb02Wildcard, None, 0),
                negotiate_response(NegotiateDialect::Smb021, None, 1),
            ],
        );
        assert_eq!(connection.negotiate().unwrap(), ProtocolFamily::Smb2);
        let state = connection.negotiation().unwrap();
        assert_eq!(state.dialect, NegotiatedDialect::Smb2(Dialect::Smb021));
        assert_eq!(connection.dialect().unwrap(), "0x0210");
        assert!(state.supports_multi_credit);
        assert!(state.preauth_hash.is_none());

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(&sent[0][..4], b"\xffSMB");
        let second = crate::packets::smb2::decode_request(&sent[1]);
        assert_eq!(second.header.message_id, 1);
        match second.content {
            RequestContent::Negotiate(negotiate) => {
                assert_eq!(negotiate.dialects, Dialect::ALL.to_vec())
            }
            other => panic!("Unexpected content {:?}", other),
        }
    }

    #[test_log::test]
    fn test_311_folds_final_round_into_preauth_hash() {
        let response = negotiate_response(NegotiateDialect::Smb0311, Some(smb311_contexts()), 0);
        let (mut connection, sent) = connection(smb2_only(), vec![response.clone()]);
        assert_eq!(connection.negotiate().unwrap(), ProtocolFamily::Smb3);

        let request = sent.lock().unwrap()[0].clone();
        let expected: [u8; 64] = {
            let h1: [u8; 64] = Sha512::new()
                .chain_update([0u8; 64])
                .chain_update(&request)
                .finalize()
                .into();
            Sha512::new()
                .chain_update(h1)
                .chain_update(&response)
                .finalize()
                .into()
        };
        let state = connection.negotiation().unwrap();
        assert_eq!(
            state.preauth_hash.as_ref().unwrap().current_hash(),
            &expected
        );
        assert_eq!(state.encryption_cipher, Some(EncryptionCipher::Aes128Ccm));
    }

    #[test_log::test]
    fn test_311_without_contexts_is_encryption_error() {
        let (mut connection, _) = connection(
            smb2_only(),
            vec![negotiate_response(NegotiateDialect::Smb0311, Some(vec![]), 0)],
        );
        assert!(matches!(
            connection.negotiate(),
            Err(Error::EncryptionError { .. })
        ));
        assert!(connection.negotiation().is_none());
    }

    #[test_log::test]
    fn test_connection_drop_is_negotiation_failure() {
        let (mut connection, _) = connection(smb2_only(), vec![]);
        match connection.negotiate() {
            Err(Error::NegotiationFailure { attempted, source }) => {
                assert!(attempted.contains("0x0311"));
                assert!(matches!(*source, Error::NotConnected));
            }
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test_log::test]
    fn test_garbage_response_is_negotiation_failure() {
        let (mut connection, _) = connection(smb2_only(), vec![b"\x00\x01\x02\x03garbage".to_vec()]);
        match connection.negotiate() {
            Err(Error::NegotiationFailure { attempted, source }) => {
                assert!(attempted.contains("0x0202"));
                match *source {
                    Error::InvalidPacket { raw, .. } => assert_eq!(&raw[..4], b"\x00\x01\x02\x03"),
                    other => panic!("Unexpected cause {:?}", other),
                }
            }
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(connection.negotiation().is_none());
    }

    #[test_log::test]
    fn test_smb1_no_dialect_is_negotiation_failure() {
        let request = Smb1NegotiateRequest::new(&[Smb1Dialect::NT_LM_0_12]);
        let response = Smb1NegotiateResponse {
            header: Smb1Header::reply_to(&request.header),
            body: Smb1NegotiateResponseBody::NoDialect(Smb1NoDialectResponse::default()),
        };
        let mut cursor = Cursor::new(Vec::new());
        response.write(&mut cursor).unwrap();

        let (mut connection, _) = connection(ConnectionConfig::default(), vec![cursor.into_inner()]);
        assert!(matches!(
            connection.negotiate(),
            Err(Error::NegotiationFailure { .. })
        ));
    }

    #[test_log::test]
    fn test_unoffered_dialect_rejected() {
        let config = ConnectionConfig {
            max_dialect: Some(Dialect::Smb021),
            ..smb2_only()
        };
        let (mut connection, _) = connection(
            config,
            vec![negotiate_response(NegotiateDialect::Smb030, None, 0)],
        );
        match connection.negotiate() {
            Err(Error::NegotiationFailure { source, .. }) => assert!(matches!(
                *source,
                Error::UnsupportedDialect(NegotiateDialect::Smb030)
            )),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test_log::test]
    fn test_negotiate_twice_fails() {
        let (mut connection, _) = connection(
            smb2_only(),
            vec![negotiate_response(NegotiateDialect::Smb0202, None, 0)],
        );
        connection.negotiate().unwrap();
        assert!(matches!(
            connection.negotiate(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_smb1_signing_needs_smb1_dialect() {
        let signer = Smb1MessageSigner::new(&[0x10; 16], true);
        let (mut connection, _) = connection(
            smb2_only(),
            vec![negotiate_response(NegotiateDialect::Smb0202, None, 0)],
        );
        let message = vec![0u8; Smb1Header::SIZE];
        assert!(matches!(
            connection.sign_smb1(&signer, message.clone()),
            Err(Error::InvalidState(_))
        ));
        connection.negotiate().unwrap();
        assert!(matches!(
            connection.sign_smb1(&signer, message),
            Err(Error::InvalidState(_))
        ));
        assert_eq!(connection.negotiation().unwrap().smb1_sequence, 0);
    }

    #[test]
    fn test_sequence_after_negotiate() {
        let (mut connection, _) = connection(
            smb2_only(),
            vec![negotiate_response(NegotiateDialect::Smb0311, Some(smb311_contexts()), 0)],
        );
        connection.negotiate().unwrap();
        let mut header = Header::new(Command::Echo);
        connection.process_sequence_outgoing(&mut header);
        assert_eq!(header.message_id, 1);
        assert_eq!(header.credit_charge, 1);
        assert_eq!(header.credit_request, 1);
        assert_eq!(header.flags.priority_mask(), 1);
    }
}
