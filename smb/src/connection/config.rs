//! Connection configuration settings.

use std::time::Duration;

use crate::packets::{
    guid::Guid,
    smb2::{CompressionAlgorithm, Dialect},
};

/// Specifies the encryption mode for the connection.
/// Use this as part of the [ConnectionConfig] to specify the encryption mode for the connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncryptionMode {
    /// Encryption is allowed but not required, it's up to the server to decide.
    #[default]
    Allowed,
    /// Encryption is required, and connection will fail if the server does not support it.
    Required,
    /// Encryption is disabled, server might fail the connection if it requires encryption.
    Disabled,
}

impl EncryptionMode {
    /// Returns true if encryption is required.
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required)
    }

    /// Returns true if encryption is disabled.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

/// Specifies the transport protocol to be used for the connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransportConfig {
    /// Direct TCP, port 445.
    #[default]
    Tcp,
    /// NetBIOS session service over TCP, port 139.
    NetBios,
}

impl TransportConfig {
    pub fn default_port(&self) -> u16 {
        match self {
            TransportConfig::Tcp => 445,
            TransportConfig::NetBios => 139,
        }
    }
}

/// Which protocol families the client offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolFlags {
    /// Offer the SMB1 dialect strings, starting with a multi-protocol negotiation.
    pub smb1: bool,
    /// Offer 2.0.2 and 2.1.
    pub smb2: bool,
    /// Offer 3.0, 3.0.2 and 3.1.1.
    pub smb3: bool,
}

impl Default for ProtocolFlags {
    fn default() -> Self {
        Self {
            smb1: true,
            smb2: true,
            smb3: true,
        }
    }
}

/// Specifies the configuration for a connection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Specifies the server port to connect to.
    /// If unset, defaults to the default port for the selected transport protocol.
    /// For Direct TCP, this is 445.
    /// For NetBIOS, this is 139.
    pub port: Option<u16>,

    /// Specifies the timeout for the connection.
    /// If unset, defaults to [`ConnectionConfig::DEFAULT_TIMEOUT`].
    /// 0 means wait forever.
    /// Access the timeout using the [`ConnectionConfig::timeout()`] method.
    pub timeout: Option<Duration>,

    /// The protocol families to offer.
    pub protocols: ProtocolFlags,

    /// Specifies the minimum and maximum dialects to be used in the connection.
    ///
    /// Note, that if set, the minimum dialect must be less than or equal to the maximum dialect.
    pub min_dialect: Option<Dialect>,

    /// Specifies the minimum and maximum dialects to be used in the connection.
    ///
    /// Note, that if set, the minimum dialect must be less than or equal to the maximum dialect.
    pub max_dialect: Option<Dialect>,

    /// Sets the encryption mode for the connection.
    /// See [EncryptionMode] for more information.
    pub encryption_mode: EncryptionMode,

    /// Whether the client requires every session to be signed.
    pub signing_required: bool,

    /// Compression algorithms to advertise under 3.1.1. Empty means the context is not sent.
    pub compression_algorithms: Vec<CompressionAlgorithm>,

    /// Specifies the client host name to be used in the SMB2 negotiation & session setup.
    pub client_name: Option<String>,

    /// Specifies the GUID of the client to be used in the SMB2 negotiate request.
    /// If not set, a random GUID will be generated.
    pub client_guid: Option<Guid>,

    /// Specifies the transport protocol to be used for the connection.
    pub transport: TransportConfig,
}

impl ConnectionConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Validates common configuration settings.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.protocols.smb1 && !self.protocols.smb2 && !self.protocols.smb3 {
            return Err(crate::Error::InvalidConfiguration(
                "At least one protocol family must be enabled".to_string(),
            ));
        }
        // Make sure dialects min <= max.
        if let (Some(min), Some(max)) = (self.min_dialect, self.max_dialect) {
            if min > max {
                return Err(crate::Error::InvalidConfiguration(
                    "Minimum dialect is greater than maximum dialect".to_string(),
                ));
            }
        }
        if !self.protocols.smb1 && self.dialects().is_empty() {
            return Err(crate::Error::InvalidConfiguration(
                "No SMB2 dialect left to offer with the selected protocols and dialect range"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(Self::DEFAULT_TIMEOUT)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(self.transport.default_port())
    }

    /// The SMB2 dialects to offer, ascending, filtered by the enabled families
    /// and the configured dialect range.
    pub fn dialects(&self) -> Vec<Dialect> {
        Dialect::ALL
            .iter()
            .copied()
            .filter(|d| {
                if d.is_smb3() {
                    self.protocols.smb3
                } else {
                    self.protocols.smb2
                }
            })
            .filter(|d| self.min_dialect.map_or(true, |min| *d >= min))
            .filter(|d| self.max_dialect.map_or(true, |max| *d <= max))
            .collect()
    }
}
