use std::num::TryFromIntError;

use thiserror::Error;

use crate::{
    crypto::CryptoError,
    packets::smb2::{Command, NegotiateDialect, Status},
};

#[derive(Error, Debug)]
pub enum Error {
    /// Dialect negotiation could not complete. Wraps the transport-level failure.
    #[error("Negotiation failed while offering {attempted}: {source}")]
    NegotiationFailure {
        attempted: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Invalid packet: expected {expected}, received {received}")]
    InvalidPacket {
        expected: String,
        received: String,
        raw: Vec<u8>,
    },
    #[error("Encryption error: {message}")]
    EncryptionError {
        message: String,
        #[source]
        source: Option<CryptoError>,
    },
    #[error(
        "Unexpected status code: expected {expected}, received {}",
        Status::try_display_as_status(*received)
    )]
    UnexpectedStatusCode { expected: Status, received: u32 },
    #[error("Communication error: {0}")]
    CommunicationError(#[from] std::io::Error),
    #[error("Peer is not connected.")]
    NotConnected,
    #[error("Binrw Error: {0}")]
    BinRWError(#[from] binrw::Error),
    #[error("Int parsing Error: {0}")]
    ParsingError(#[from] TryFromIntError),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),
    #[error("Unexpected Message, {0}")]
    InvalidMessage(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Unsupported dialect revision {0}")]
    UnsupportedDialect(NegotiateDialect),
    #[error("Signature verification failed!")]
    SignatureVerificationFailed,
    #[error("Unexpected command: {0}")]
    UnexpectedCommand(Command),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("SSPI error: {0}")]
    SspiError(#[from] sspi::Error),
}

impl Error {
    pub(crate) fn encryption(message: impl Into<String>) -> Self {
        Error::EncryptionError {
            message: message.into(),
            source: None,
        }
    }
}
