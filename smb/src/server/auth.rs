//! Server-side authentication providers.

use crate::session::{AuthResult, AuthStatus, Authenticator, PeerInfo};

/// A SPNEGO NegTokenInit advertising NTLMSSP as the only mechanism.
pub const SPNEGO_NTLMSSP_INIT: [u8; 30] = [
    0x60, 0x1c, 0x06, 0x06, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x02, 0xa0, 0x12, 0x30, 0x10, 0xa0, 0x0e,
    0x30, 0x0c, 0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a,
];

/// The server's account store and mechanism, shared by every connection thread.
pub trait AuthProvider: Send + Sync {
    /// A fresh authentication context for one session.
    fn new_context(&self) -> Box<dyn Authenticator>;

    /// The security blob of the negotiate response.
    fn initial_token(&self) -> Vec<u8> {
        SPNEGO_NTLMSSP_INIT.to_vec()
    }
}

/// Accepts every logon as an anonymous (null) session, without key material.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousAuthProvider;

impl AuthProvider for AnonymousAuthProvider {
    fn new_context(&self) -> Box<dyn Authenticator> {
        Box::new(AnonymousAuthenticator)
    }
}

#[derive(Debug)]
struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn authenticate(&mut self, _security_blob: &[u8], peer: &PeerInfo) -> crate::Result<AuthResult> {
        log::debug!("Accepting anonymous logon from {}.", peer.name);
        Ok(AuthResult {
            token: Vec::new(),
            status: AuthStatus::Success,
            session_key: Vec::new(),
            identity: None,
        })
    }
}
