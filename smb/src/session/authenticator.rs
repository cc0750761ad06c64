//! The boundary between the session engine and an authentication mechanism.

use sspi::{
    ntlm::NtlmConfig, AcquireCredentialsHandleResult, AuthIdentity, AuthIdentityBuffers,
    BufferType, ClientRequestFlags, CredentialUse, DataRepresentation, Ntlm, Secret,
    SecurityBuffer, SecurityStatus, Sspi, SspiImpl, Username,
};

use crate::{packets::smb2::Status, Error};

/// The outcome of one authentication step, as carried in the SESSION_SETUP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    MoreProcessingRequired,
    AccessDenied,
    LogonFailure,
}

impl From<AuthStatus> for Status {
    fn from(value: AuthStatus) -> Self {
        match value {
            AuthStatus::Success => Status::Success,
            AuthStatus::MoreProcessingRequired => Status::MoreProcessingRequired,
            AuthStatus::AccessDenied => Status::AccessDenied,
            AuthStatus::LogonFailure => Status::LogonFailure,
        }
    }
}

impl TryFrom<u32> for AuthStatus {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            Status::U32_SUCCESS => Ok(AuthStatus::Success),
            Status::U32_MORE_PROCESSING_REQUIRED => Ok(AuthStatus::MoreProcessingRequired),
            Status::U32_ACCESS_DENIED => Ok(AuthStatus::AccessDenied),
            Status::U32_LOGON_FAILURE => Ok(AuthStatus::LogonFailure),
            _ => Err(Error::UnexpectedStatusCode {
                expected: Status::Success,
                received: value,
            }),
        }
    }
}

/// Result of feeding one security blob to an [`Authenticator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    /// The security blob to send to the peer. May be empty.
    pub token: Vec<u8>,
    pub status: AuthStatus,
    /// The shared secret. Empty until `status` is [`AuthStatus::Success`], and for anonymous logons.
    pub session_key: Vec<u8>,
    /// The authenticated account, when known.
    pub identity: Option<String>,
}

impl AuthResult {
    pub fn more_processing(token: Vec<u8>) -> AuthResult {
        AuthResult {
            token,
            status: AuthStatus::MoreProcessingRequired,
            session_key: Vec::new(),
            identity: None,
        }
    }

    pub fn rejected(status: AuthStatus) -> AuthResult {
        AuthResult {
            token: Vec::new(),
            status,
            session_key: Vec::new(),
            identity: None,
        }
    }
}

/// What an authenticator knows about the other end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Server name on the client side, the remote address on the server side.
    pub name: String,
    pub dialect: String,
}

/// One authentication context: a client logon, or one server-side session.
///
/// Called with every security blob received from the peer, in order. The first
/// client call receives the negotiate response's security buffer, which may be empty.
pub trait Authenticator: Send {
    fn authenticate(&mut self, security_blob: &[u8], peer: &PeerInfo) -> crate::Result<AuthResult>;
}

/// Client-side NTLM authentication, built on `sspi`.
///
/// Sends raw NTLMSSP tokens, which SMB servers accept in SESSION_SETUP.
#[derive(Debug)]
pub struct NtlmAuthenticator {
    ntlm: Ntlm,
    cred_handle: AcquireCredentialsHandleResult<Option<AuthIdentityBuffers>>,
    status: Option<SecurityStatus>,
    identity: String,
}

impl NtlmAuthenticator {
    pub fn new(
        user_name: &str,
        password: String,
        domain: Option<&str>,
        client_computer_name: String,
    ) -> crate::Result<NtlmAuthenticator> {
        let username = Username::new(user_name, domain).map_err(|e| {
            Error::InvalidConfiguration(format!("Invalid user name {}: {}", user_name, e))
        })?;
        let identity = AuthIdentity {
            username,
            password: Secret::new(password),
        };

        let mut ntlm = Ntlm::with_config(NtlmConfig::new(client_computer_name));
        let cred_handle = ntlm
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&identity)
            .execute(&mut ntlm)?;

        Ok(NtlmAuthenticator {
            ntlm,
            cred_handle,
            status: None,
            identity: match domain {
                Some(domain) => format!("{}\\{}", domain, user_name),
                None => user_name.to_string(),
            },
        })
    }

    fn make_sspi_target_name(server: &str) -> String {
        format!("cifs/{}", server)
    }

    // The flags the Windows SMB2/3 redirector passes to InitializeSecurityContextW.
    fn get_context_requirements() -> ClientRequestFlags {
        ClientRequestFlags::DELEGATE
            | ClientRequestFlags::MUTUAL_AUTH
            | ClientRequestFlags::INTEGRITY
            | ClientRequestFlags::FRAGMENT_TO_FIT
    }

    const SSPI_REQ_DATA_REPRESENTATION: DataRepresentation = DataRepresentation::Native;

    fn session_key(&self) -> crate::Result<Vec<u8>> {
        self.ntlm
            .session_key()
            .map(|key| key.to_vec())
            .ok_or_else(|| {
                Error::AuthenticationFailed("NTLM finished without a session key".into())
            })
    }
}

impl Authenticator for NtlmAuthenticator {
    fn authenticate(&mut self, security_blob: &[u8], peer: &PeerInfo) -> crate::Result<AuthResult> {
        if matches!(self.status, Some(status) if status != SecurityStatus::ContinueNeeded) {
            return Err(Error::InvalidState(
                "NTLM authentication already finished, no further tokens expected.".into(),
            ));
        }

        let mut output_buffer = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
        let target_name = Self::make_sspi_target_name(&peer.name);
        let mut builder = self
            .ntlm
            .initialize_security_context()
            .with_credentials_handle(&mut self.cred_handle.credentials_handle)
            .with_context_requirements(Self::get_context_requirements())
            .with_target_data_representation(Self::SSPI_REQ_DATA_REPRESENTATION)
            .with_target_name(&target_name)
            .with_output(&mut output_buffer);

        let mut input_buffers = vec![];
        if !security_blob.is_empty() {
            input_buffers.push(SecurityBuffer::new(
                security_blob.to_vec(),
                BufferType::Token,
            ));
            builder = builder.with_input(&mut input_buffers);
        }

        // NTLM never reaches out to the network, so the generator resolves in place.
        let result = SspiImpl::initialize_security_context_impl(&mut self.ntlm, &mut builder)?
            .resolve_to_result()?;
        self.status = Some(result.status);
        log::debug!("NTLM step for {} returned {:?}.", peer.name, result.status);

        let token = output_buffer
            .pop()
            .map(|buffer| buffer.buffer)
            .unwrap_or_default();

        match result.status {
            SecurityStatus::Ok => Ok(AuthResult {
                token,
                status: AuthStatus::Success,
                session_key: self.session_key()?,
                identity: Some(self.identity.clone()),
            }),
            SecurityStatus::ContinueNeeded => Ok(AuthResult::more_processing(token)),
            other => Err(Error::AuthenticationFailed(format!(
                "Unexpected security status {:?}",
                other
            ))),
        }
    }
}
