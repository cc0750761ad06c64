//! Server configuration settings.

use std::time::Duration;

use crate::packets::{
    guid::Guid,
    smb2::{Dialect, EncryptionCipher},
};

/// Specifies the configuration of a [`Server`](super::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// The GUID advertised in every negotiate response.
    pub server_guid: Guid,

    /// Supported dialects. Selection always follows [`ServerConfig::DIALECT_PREFERENCE`].
    pub dialects: Vec<Dialect>,

    /// Whether every session must be signed.
    pub signing_required: bool,

    /// Whether sessions on SMB3 dialects must encrypt all traffic.
    pub encrypt_data: bool,

    /// Cipher preference for 3.1.1 negotiation. The first one the client also lists wins.
    pub encryption_ciphers: Vec<EncryptionCipher>,

    /// Share names accepted by TREE_CONNECT, compared case-insensitively.
    pub shares: Vec<String>,

    /// Read timeout of accepted connections. `None` means blocking forever.
    pub read_timeout: Option<Duration>,

    /// Send a `STATUS_NOT_SUPPORTED` negotiate response before disconnecting a client
    /// that shares no dialect with the server, instead of disconnecting silently.
    pub reject_unsupported_dialects: bool,

    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
}

impl ServerConfig {
    pub const DEFAULT_MAX_SIZE: u32 = 8 * 1024 * 1024;

    /// Dialect preference order of the server.
    pub const DIALECT_PREFERENCE: [Dialect; 5] = [
        Dialect::Smb0311,
        Dialect::Smb0302,
        Dialect::Smb030,
        Dialect::Smb021,
        Dialect::Smb0202,
    ];

    pub fn validate(&self) -> crate::Result<()> {
        if self.dialects.is_empty() {
            return Err(crate::Error::InvalidConfiguration(
                "The server must support at least one dialect".to_string(),
            ));
        }
        if self.dialects.contains(&Dialect::Smb0311) && self.encryption_ciphers.is_empty() {
            return Err(crate::Error::InvalidConfiguration(
                "3.1.1 requires at least one encryption cipher to advertise".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `share` is served, ignoring case.
    pub fn has_share(&self, share: &str) -> bool {
        self.shares.iter().any(|s| s.eq_ignore_ascii_case(share))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_guid: Guid::gen(),
            dialects: Self::DIALECT_PREFERENCE.to_vec(),
            signing_required: false,
            encrypt_data: false,
            encryption_ciphers: vec![EncryptionCipher::Aes128Ccm, EncryptionCipher::Aes128Gcm],
            shares: vec!["IPC$".to_string()],
            read_timeout: None,
            reject_unsupported_dialects: false,
            max_transact_size: Self::DEFAULT_MAX_SIZE,
            max_read_size: Self::DEFAULT_MAX_SIZE,
            max_write_size: Self::DEFAULT_MAX_SIZE,
        }
    }
}
