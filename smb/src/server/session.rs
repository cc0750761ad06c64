//! Server-side sessions: the SESSION_SETUP state machine and per-session tree connects.

use crate::{
    msg_handler::{encode_response, MessageForm},
    packets::smb2::*,
    session::{AuthResult, AuthStatus, Authenticator, PeerInfo, SessionRole, SessionState,
        SessionStatus},
};

use super::{negotiate::ServerNegotiation, ServerConfig};

/// Where a session stands after one SESSION_SETUP round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The authenticator needs another token from the client.
    Continue,
    Established,
    /// The session failed and must be forgotten.
    Failed,
}

#[derive(Debug)]
pub struct SetupStep {
    /// The serialized response, signed when the session was established with a key.
    pub response: Vec<u8>,
    pub outcome: SetupOutcome,
}

pub struct ServerSession {
    state: SessionState,
    authenticator: Box<dyn Authenticator>,
    next_tree_id: u32,
}

impl ServerSession {
    pub fn new(
        session_id: u64,
        negotiation: &ServerNegotiation,
        authenticator: Box<dyn Authenticator>,
    ) -> ServerSession {
        let mut state = SessionState::new(
            SessionRole::Server,
            negotiation.dialect,
            negotiation.cipher,
            negotiation.signing_required,
            negotiation.preauth_hash.clone(),
        );
        state.set_session_id(session_id);
        ServerSession {
            state,
            authenticator,
            next_tree_id: 1,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    /// Feeds one SESSION_SETUP request to the authenticator and builds the response.
    pub fn setup_step(
        &mut self,
        header: &Header,
        raw_request: &[u8],
        request: &SessionSetupRequest,
        config: &ServerConfig,
        peer: &PeerInfo,
    ) -> crate::Result<SetupStep> {
        if !matches!(
            self.state.status(),
            SessionStatus::Negotiating | SessionStatus::InProgress
        ) {
            log::debug!(
                "Refusing SESSION_SETUP on session {:#x} in state {:?}.",
                self.state.session_id(),
                self.state.status()
            );
            return Ok(SetupStep {
                response: self.error_reply(header, Status::RequestNotAccepted)?,
                outcome: SetupOutcome::Continue,
            });
        }

        self.state.begin()?;
        self.state
            .set_signing_required(request.security_mode.signing_required());
        self.state.fold_preauth(raw_request)?;

        let result = match self.authenticator.authenticate(&request.buffer, peer) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Authentication of {} failed: {}", peer.name, e);
                AuthResult::rejected(AuthStatus::LogonFailure)
            }
        };

        match result.status {
            AuthStatus::MoreProcessingRequired => {
                let response = self.setup_reply(
                    header,
                    Status::MoreProcessingRequired,
                    SessionFlags::new(),
                    result.token,
                )?;
                self.state.fold_preauth(&response)?;
                Ok(SetupStep {
                    response,
                    outcome: SetupOutcome::Continue,
                })
            }
            AuthStatus::Success => self.establish(header, result, config),
            status @ (AuthStatus::AccessDenied | AuthStatus::LogonFailure) => {
                self.state.fail();
                Ok(SetupStep {
                    response: self.error_reply(header, status.into())?,
                    outcome: SetupOutcome::Failed,
                })
            }
        }
    }

    fn establish(
        &mut self,
        header: &Header,
        result: AuthResult,
        config: &ServerConfig,
    ) -> crate::Result<SetupStep> {
        let has_key = !result.session_key.is_empty();
        let encrypt = config.encrypt_data
            && has_key
            && self.state.dialect().is_smb3()
            && self.state.encryption_cipher().is_some();
        if config.encrypt_data && !encrypt {
            log::warn!(
                "Session {:#x} cannot be encrypted over {}, continuing unencrypted.",
                self.state.session_id(),
                self.state.dialect()
            );
        }
        let flags = SessionFlags::new()
            .with_is_null_session(!has_key)
            .with_encrypt_data(encrypt);

        self.state.complete(&result.session_key, result.identity, flags)?;
        if encrypt {
            self.state.set_encrypt_data()?;
        }

        let mut response = self.setup_reply(header, Status::Success, flags, result.token)?;
        if has_key {
            self.state.sign_now(&mut response)?;
        }
        Ok(SetupStep {
            response,
            outcome: SetupOutcome::Established,
        })
    }

    fn setup_reply(
        &self,
        header: &Header,
        status: Status,
        session_flags: SessionFlags,
        buffer: Vec<u8>,
    ) -> crate::Result<Vec<u8>> {
        let mut response = PlainResponse::reply_to(
            header,
            status,
            ResponseContent::SessionSetup(SessionSetupResponse {
                session_flags,
                buffer,
            }),
        );
        response.header.session_id = self.state.session_id();
        encode_response(&response)
    }

    fn error_reply(&self, header: &Header, status: Status) -> crate::Result<Vec<u8>> {
        let mut response =
            PlainResponse::reply_to(header, status, ResponseContent::Error(ErrorResponse::default()));
        response.header.session_id = self.state.session_id();
        encode_response(&response)
    }

    /// Records a tree connect to `share`, returning its new tree id.
    pub fn connect_tree(&mut self, share: String) -> u32 {
        let tree_id = self.next_tree_id;
        self.next_tree_id = self.next_tree_id.checked_add(1).unwrap_or(1);
        self.state.add_tree(tree_id, share);
        tree_id
    }

    /// Applies the session's protection to a response. Responses to encrypted
    /// requests are encrypted, and responses to signed requests signed.
    pub fn protect_response(
        &mut self,
        raw: Vec<u8>,
        request_form: MessageForm,
    ) -> crate::Result<Vec<u8>> {
        if !self.state.is_valid() {
            return Ok(raw);
        }
        if request_form.encrypted || self.state.should_encrypt() {
            return self.state.encrypt(raw);
        }
        let mut raw = raw;
        if self.state.should_sign()
            || (request_form.signed && !self.state.flags().is_null_session())
        {
            self.state.sign_now(&mut raw)?;
        }
        Ok(raw)
    }
}
