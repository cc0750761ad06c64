use smb_handshake::{
    server::AuthProvider,
    session::{AuthResult, AuthStatus, Authenticator, PeerInfo},
    Connection, ConnectionConfig, Server, ServerConfig,
};
use std::{sync::Arc, thread::JoinHandle, time::Duration};

pub struct TestConstants;

impl TestConstants {
    pub const SESSION_KEY: [u8; 16] = *b"0123456789abcdef";
    pub const PASSWORD: &'static [u8] = b"123456";
    pub const USER: &'static str = "LocalAdmin";
    pub const TIMEOUT: Duration = Duration::from_secs(10);
}

/// Client half of a three-leg mechanism with a fixed session key:
/// NEGOTIATE, then CHALLENGE from the server, then AUTHENTICATE carrying the password.
pub struct TestAuthenticator {
    password: Vec<u8>,
    step: usize,
}

impl TestAuthenticator {
    pub fn new(password: &[u8]) -> Self {
        Self {
            password: password.to_vec(),
            step: 0,
        }
    }
}

impl Authenticator for TestAuthenticator {
    fn authenticate(
        &mut self,
        security_blob: &[u8],
        _peer: &PeerInfo,
    ) -> smb_handshake::Result<AuthResult> {
        self.step += 1;
        match self.step {
            1 => Ok(AuthResult::more_processing(b"NEGOTIATE".to_vec())),
            2 => {
                assert_eq!(security_blob, b"CHALLENGE");
                let mut token = b"AUTHENTICATE:".to_vec();
                token.extend_from_slice(&self.password);
                Ok(AuthResult {
                    token,
                    status: AuthStatus::Success,
                    session_key: TestConstants::SESSION_KEY.to_vec(),
                    identity: Some(TestConstants::USER.to_string()),
                })
            }
            _ => Err(smb_handshake::Error::InvalidState(
                "authentication already finished".into(),
            )),
        }
    }
}

/// Server half of [`TestAuthenticator`]'s mechanism.
pub struct TestAuthProvider;

impl AuthProvider for TestAuthProvider {
    fn new_context(&self) -> Box<dyn Authenticator> {
        Box::new(TestServerAuthenticator)
    }
}

struct TestServerAuthenticator;

impl Authenticator for TestServerAuthenticator {
    fn authenticate(
        &mut self,
        security_blob: &[u8],
        _peer: &PeerInfo,
    ) -> smb_handshake::Result<AuthResult> {
        if security_blob == b"NEGOTIATE" {
            return Ok(AuthResult::more_processing(b"CHALLENGE".to_vec()));
        }
        match security_blob.strip_prefix(b"AUTHENTICATE:") {
            Some(password) if password == TestConstants::PASSWORD => Ok(AuthResult {
                token: Vec::new(),
                status: AuthStatus::Success,
                session_key: TestConstants::SESSION_KEY.to_vec(),
                identity: Some(TestConstants::USER.to_string()),
            }),
            _ => Ok(AuthResult::rejected(AuthStatus::LogonFailure)),
        }
    }
}

/// Binds a loopback server and serves exactly one connection on a background thread.
/// Returns the port and a handle yielding the connection's result.
pub fn start_server(config: ServerConfig) -> (u16, JoinHandle<smb_handshake::Result<()>>) {
    let server = Server::bind("127.0.0.1:0", config, Arc::new(TestAuthProvider)).unwrap();
    let port = server.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let connection = server.accept()?;
        connection.join().unwrap()
    });
    (port, handle)
}

/// A client connection to a server started by [`start_server`], not yet negotiated.
pub fn make_client(port: u16, config: ConnectionConfig) -> Connection {
    let mut config = config;
    config.port = Some(port);
    config.timeout = Some(TestConstants::TIMEOUT);
    let mut connection = Connection::build("127.0.0.1", config).unwrap();
    connection.connect().unwrap();
    log::info!("Connected to 127.0.0.1:{}", port);
    connection
}
