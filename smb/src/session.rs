//! SMB Session logic module.
//!
//! This module contains the session setup logic, as well as the session message handling,
//! including encryption and signing of messages.

use crate::{
    connection::Connection,
    msg_handler::{decode_response, encode_request, is_signed, IncomingMessage, ReceiveOptions},
    packets::smb2::*,
    Error,
};

mod authenticator;
mod encryptor_decryptor;
mod signer;
mod state;

pub use authenticator::{AuthResult, AuthStatus, Authenticator, NtlmAuthenticator, PeerInfo};
pub use encryptor_decryptor::{MessageDecryptor, MessageEncryptor};
pub use signer::{MessageSigner, Smb1MessageSigner};
pub use state::{SessionKeys, SessionRole, SessionState, SessionStatus};

/// An authenticated client session, borrowing its connection.
///
/// Dropping a valid session logs it off.
pub struct Session<'c> {
    conn: &'c mut Connection,
    state: SessionState,
}

impl<'c> Session<'c> {
    /// Runs the SESSION_SETUP exchange over a negotiated SMB2/3 connection.
    pub(crate) fn setup(
        conn: &'c mut Connection,
        authenticator: &mut dyn Authenticator,
    ) -> crate::Result<Session<'c>> {
        let negotiation = conn
            .negotiation()
            .ok_or_else(|| Error::InvalidState("The connection is not negotiated".into()))?;
        let dialect = negotiation.smb2_dialect().ok_or_else(|| {
            Error::InvalidState(format!(
                "Sessions need SMB2 or later, the connection negotiated {}",
                negotiation.dialect
            ))
        })?;
        let signing_required = negotiation.signing_required || conn.config().signing_required;
        let mut state = SessionState::new(
            SessionRole::Client,
            dialect,
            negotiation.encryption_cipher,
            signing_required,
            negotiation.preauth_hash.clone(),
        );
        let mut server_token = negotiation.security_buffer.clone();
        let peer = PeerInfo {
            name: conn.server_name().to_string(),
            dialect: dialect.to_string(),
        };
        let security_mode = SessionSecurityMode::new()
            .with_signing_enabled(true)
            .with_signing_required(signing_required);

        state.begin()?;
        log::debug!("Setting up a session over {}.", dialect);

        let (raw_response, setup, mut result) = loop {
            let result = authenticator.authenticate(&server_token, &peer)?;
            if matches!(
                result.status,
                AuthStatus::AccessDenied | AuthStatus::LogonFailure
            ) {
                state.fail();
                return Err(Error::AuthenticationFailed(format!(
                    "The authenticator rejected the logon ({:?})",
                    result.status
                )));
            }

            let mut request = PlainRequest::new(RequestContent::SessionSetup(
                SessionSetupRequest::new(result.token.clone(), security_mode),
            ));
            request.header.session_id = state.session_id();
            conn.process_sequence_outgoing(&mut request.header);
            let raw_request = encode_request(&request)?;
            state.fold_preauth(&raw_request)?;
            conn.send_packet(&raw_request)?;

            let raw_response = conn.receive_packet()?;
            let response = decode_response(&raw_response)?;
            let options = ReceiveOptions::new()
                .status(Status::Success)
                .or_status(Status::MoreProcessingRequired)
                .cmd(Some(Command::SessionSetup))
                .msg_id(request.header.message_id);
            if let Err(e) = options.check(&response.header) {
                state.fail();
                return Err(e);
            }
            state.set_session_id(response.header.session_id);
            let setup = response.content.to_session_setup()?;

            if response.header.status == Status::U32_MORE_PROCESSING_REQUIRED {
                state.fold_preauth(&raw_response)?;
                server_token = setup.buffer;
                continue;
            }
            break (raw_response, setup, result);
        };

        // The server may finish with a last token for the mechanism to consume.
        if result.status != AuthStatus::Success && !setup.buffer.is_empty() {
            result = authenticator.authenticate(&setup.buffer, &peer)?;
        }
        if result.status != AuthStatus::Success {
            state.fail();
            return Err(Error::AuthenticationFailed(format!(
                "The server accepted the logon, but the authenticator ended with {:?}",
                result.status
            )));
        }

        let flags = setup.session_flags;
        let session_key = if flags.is_guest() || flags.is_null_session() {
            Vec::new()
        } else {
            result.session_key
        };
        state.complete(&session_key, result.identity, flags)?;

        if state.should_sign() || (is_signed(&raw_response) && !session_key.is_empty()) {
            state.verify(&raw_response)?;
        }

        let encryption_mode = conn.config().encryption_mode;
        if flags.encrypt_data() || encryption_mode.is_required() {
            if encryption_mode.is_disabled() {
                return Err(Error::encryption(
                    "The server requires encryption, but it is disabled",
                ));
            }
            if session_key.is_empty() {
                return Err(Error::encryption(
                    "Encryption is required, but the session has no key",
                ));
            }
            state.set_encrypt_data()?;
        }

        log::info!(
            "Session {:#x} set up (signing: {}, encryption: {}).",
            state.session_id(),
            state.should_sign(),
            state.should_encrypt()
        );
        Ok(Session { conn, state })
    }

    pub fn session_id(&self) -> u64 {
        self.state.session_id()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_signed(&self) -> bool {
        self.state.should_sign()
    }

    pub fn is_encrypted(&self) -> bool {
        self.state.should_encrypt()
    }

    /// Connects to a share, by full `\\server\share` path or by share name. Returns the tree id.
    pub fn tree_connect(&mut self, share: &str) -> crate::Result<u32> {
        let path = if share.starts_with("\\\\") {
            share.to_string()
        } else {
            format!("\\\\{}\\{}", self.conn.server_name(), share)
        };
        let request = TreeConnectRequest::new(&path);
        let share_name = request.share_name();

        let response = self.send_recv(
            RequestContent::TreeConnect(request),
            0,
            ReceiveOptions::new(),
        )?;
        let tree_id = response.message.header.tree_id;
        let tree = response.message.content.to_tree_connect()?;
        log::info!(
            "Connected to {} as tree {:#x} ({:?}).",
            path,
            tree_id,
            tree.share_type
        );
        self.state.add_tree(tree_id, share_name);
        Ok(tree_id)
    }

    pub fn tree_disconnect(&mut self, tree_id: u32) -> crate::Result<()> {
        if self.state.tree(tree_id).is_none() {
            return Err(Error::InvalidState(format!(
                "Tree {:#x} is not connected",
                tree_id
            )));
        }
        self.send_recv(
            RequestContent::TreeDisconnect(TreeDisconnectRequest::default()),
            tree_id,
            ReceiveOptions::new(),
        )?;
        self.state.remove_tree(tree_id);
        log::debug!("Disconnected tree {:#x}.", tree_id);
        Ok(())
    }

    pub fn echo(&mut self) -> crate::Result<()> {
        self.send_recv(
            RequestContent::Echo(EchoRequest::default()),
            0,
            ReceiveOptions::new(),
        )?;
        Ok(())
    }

    /// Logs off, closing every tree connect. Safe to call more than once.
    pub fn logoff(&mut self) -> crate::Result<()> {
        if self.state.status() == SessionStatus::Expired {
            return Ok(());
        }
        let result = self.send_recv(
            RequestContent::Logoff(LogoffRequest::default()),
            0,
            ReceiveOptions::new(),
        );
        self.state.expire();
        result?;
        log::info!("Session {:#x} logged off.", self.state.session_id());
        Ok(())
    }

    fn send_recv(
        &mut self,
        content: RequestContent,
        tree_id: u32,
        options: ReceiveOptions,
    ) -> crate::Result<IncomingMessage<PlainResponse>> {
        if !self.state.is_valid() {
            return Err(Error::InvalidState(format!(
                "Session {:#x} is {:?}",
                self.state.session_id(),
                self.state.status()
            )));
        }

        let mut request = PlainRequest::new(content);
        request.header.session_id = self.state.session_id();
        request.header.tree_id = tree_id;
        self.conn.process_sequence_outgoing(&mut request.header);
        let wire = self.state.protect(encode_request(&request)?)?;
        self.conn.send_packet(&wire)?;

        let (raw, form) = self.state.unprotect(self.conn.receive_packet()?)?;
        let message = decode_response(&raw)?;
        options
            .cmd(Some(request.header.command))
            .msg_id(request.header.message_id)
            .check(&message.header)?;
        Ok(IncomingMessage { message, raw, form })
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.state.is_valid() {
            if let Err(e) = self.logoff() {
                log::warn!("Failed to log off session on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connection::{transport::traits::tests::ScriptedTransport, ConnectionConfig, ProtocolFlags},
        msg_handler::encode_response,
        packets::{binrw_util::prelude::FileTime, guid::Guid},
    };

    struct ScriptedAuthenticator {
        steps: Vec<AuthResult>,
        received: Vec<Vec<u8>>,
    }

    impl Authenticator for ScriptedAuthenticator {
        fn authenticate(
            &mut self,
            security_blob: &[u8],
            _peer: &PeerInfo,
        ) -> crate::Result<AuthResult> {
            self.received.push(security_blob.to_vec());
            if self.steps.is_empty() {
                return Err(Error::InvalidState("No more steps".into()));
            }
            Ok(self.steps.remove(0))
        }
    }

    fn reply(message_id: u64, status: Status, content: ResponseContent) -> Vec<u8> {
        let mut header = Header::new(match &content {
            ResponseContent::Negotiate(_) => Command::Negotiate,
            _ => Command::SessionSetup,
        });
        header.message_id = message_id;
        header.session_id = 0x11;
        encode_response(&PlainResponse::reply_to(&header, status, content)).unwrap()
    }

    fn negotiate_reply(dialect: NegotiateDialect) -> Vec<u8> {
        reply(
            0,
            Status::Success,
            ResponseContent::Negotiate(NegotiateResponse {
                security_mode: NegotiateSecurityMode::new().with_signing_enabled(true),
                dialect_revision: dialect,
                server_guid: Guid::from([0x5a; 16]),
                capabilities: GlobalCapabilities::new(),
                max_transact_size: 0x800000,
                max_read_size: 0x800000,
                max_write_size: 0x800000,
                system_time: FileTime::default(),
                server_start_time: FileTime::default(),
                buffer: b"server-init".to_vec(),
                negotiate_context_list: None,
            }),
        )
    }

    fn setup_reply(message_id: u64, status: Status, flags: SessionFlags, buffer: &[u8]) -> Vec<u8> {
        let content = if ResponseContent::carries_body(Command::SessionSetup, status as u32) {
            ResponseContent::SessionSetup(SessionSetupResponse {
                session_flags: flags,
                buffer: buffer.to_vec(),
            })
        } else {
            ResponseContent::Error(ErrorResponse::default())
        };
        reply(message_id, status, content)
    }

    fn negotiated(inbound: Vec<Vec<u8>>) -> Connection {
        let config = ConnectionConfig {
            protocols: ProtocolFlags {
                smb1: false,
                smb2: true,
                smb3: true,
            },
            ..Default::default()
        };
        let mut conn = Connection::from_transport(
            "server",
            config,
            Box::new(ScriptedTransport::new(inbound)),
        )
        .unwrap();
        conn.negotiate().unwrap();
        conn
    }

    #[test_log::test]
    fn test_more_processing_then_failure_status() {
        let mut conn = negotiated(vec![
            negotiate_reply(NegotiateDialect::Smb021),
            setup_reply(1, Status::MoreProcessingRequired, SessionFlags::new(), b"challenge"),
            setup_reply(2, Status::LogonFailure, SessionFlags::new(), b""),
        ]);
        let mut authenticator = ScriptedAuthenticator {
            steps: vec![
                AuthResult::more_processing(b"negotiate".to_vec()),
                AuthResult::more_processing(b"authenticate".to_vec()),
            ],
            received: vec![],
        };
        let result = conn.authenticate(&mut authenticator);
        assert!(matches!(
            result,
            Err(Error::UnexpectedStatusCode {
                expected: Status::Success,
                received: Status::U32_LOGON_FAILURE
            })
        ));
        assert_eq!(
            authenticator.received,
            vec![b"server-init".to_vec(), b"challenge".to_vec()]
        );
    }

    #[test_log::test]
    fn test_server_success_before_authenticator_finishes() {
        let mut conn = negotiated(vec![
            negotiate_reply(NegotiateDialect::Smb021),
            setup_reply(1, Status::Success, SessionFlags::new(), b""),
        ]);
        let mut authenticator = ScriptedAuthenticator {
            steps: vec![AuthResult::more_processing(b"negotiate".to_vec())],
            received: vec![],
        };
        assert!(matches!(
            conn.authenticate(&mut authenticator),
            Err(Error::AuthenticationFailed(_))
        ));
        assert_eq!(authenticator.received, vec![b"server-init".to_vec()]);
    }

    #[test_log::test]
    fn test_last_token_rejected_by_authenticator() {
        let mut conn = negotiated(vec![
            negotiate_reply(NegotiateDialect::Smb021),
            setup_reply(1, Status::Success, SessionFlags::new(), b"mech-list-mic"),
        ]);
        let mut authenticator = ScriptedAuthenticator {
            steps: vec![
                AuthResult::more_processing(b"authenticate".to_vec()),
                AuthResult::rejected(AuthStatus::LogonFailure),
            ],
            received: vec![],
        };
        assert!(matches!(
            conn.authenticate(&mut authenticator),
            Err(Error::AuthenticationFailed(_))
        ));
        assert_eq!(
            authenticator.received,
            vec![b"server-init".to_vec(), b"mech-list-mic".to_vec()]
        );
    }

    #[test_log::test]
    fn test_last_token_completes_logon() {
        let mut conn = negotiated(vec![
            negotiate_reply(NegotiateDialect::Smb021),
            setup_reply(1, Status::Success, SessionFlags::new(), b"mech-list-mic"),
        ]);
        let mut authenticator = ScriptedAuthenticator {
            steps: vec![
                AuthResult::more_processing(b"authenticate".to_vec()),
                AuthResult {
                    token: vec![],
                    status: AuthStatus::Success,
                    session_key: vec![],
                    identity: Some("user".into()),
                },
            ],
            received: vec![],
        };
        let mut session = conn.authenticate(&mut authenticator).unwrap();
        assert_eq!(session.status(), SessionStatus::Valid);
        assert_eq!(session.state().identity(), Some("user"));
        assert!(session.logoff().is_err());
    }

    #[test_log::test]
    fn test_authenticator_rejection() {
        let mut conn = negotiated(vec![negotiate_reply(NegotiateDialect::Smb0202)]);
        let mut authenticator = ScriptedAuthenticator {
            steps: vec![AuthResult::rejected(AuthStatus::AccessDenied)],
            received: vec![],
        };
        assert!(matches!(
            conn.authenticate(&mut authenticator),
            Err(Error::AuthenticationFailed(_))
        ));
    }

    #[test_log::test]
    fn test_success_without_signing() {
        let mut conn = negotiated(vec![
            negotiate_reply(NegotiateDialect::Smb021),
            setup_reply(1, Status::Success, SessionFlags::new(), b""),
        ]);
        let mut authenticator = ScriptedAuthenticator {
            steps: vec![AuthResult {
                token: b"token".to_vec(),
                status: AuthStatus::Success,
                session_key: vec![7; 16],
                identity: Some("user".into()),
            }],
            received: vec![],
        };
        let mut session = conn.authenticate(&mut authenticator).unwrap();
        assert_eq!(session.status(), SessionStatus::Valid);
        assert_eq!(session.session_id(), 0x11);
        assert_eq!(session.state().identity(), Some("user"));
        assert!(!session.is_signed());
        assert!(!session.is_encrypted());
        assert!(matches!(
            session.tree_disconnect(3),
            Err(Error::InvalidState(_))
        ));
        // Logoff fails on the exhausted script, and still expires the session.
        assert!(session.logoff().is_err());
        assert_eq!(session.status(), SessionStatus::Expired);
        assert!(matches!(session.echo(), Err(Error::InvalidState(_))));
    }

    #[test_log::test]
    fn test_server_encryption_flag_on_smb2_fails() {
        let mut conn = negotiated(vec![
            negotiate_reply(NegotiateDialect::Smb021),
            setup_reply(1, Status::Success, SessionFlags::new().with_encrypt_data(true), b""),
        ]);
        let mut authenticator = ScriptedAuthenticator {
            steps: vec![AuthResult {
                token: vec![],
                status: AuthStatus::Success,
                session_key: vec![7; 16],
                identity: None,
            }],
            received: vec![],
        };
        assert!(matches!(
            conn.authenticate(&mut authenticator),
            Err(Error::EncryptionError { .. })
        ));
    }

    #[test]
    fn test_unnegotiated_connection_rejected() {
        let mut conn = Connection::from_transport(
            "server",
            ConnectionConfig::default(),
            Box::new(ScriptedTransport::new(vec![])),
        )
        .unwrap();
        let mut authenticator = ScriptedAuthenticator {
            steps: vec![],
            received: vec![],
        };
        assert!(matches!(
            conn.authenticate(&mut authenticator),
            Err(Error::InvalidState(_))
        ));
    }
}
