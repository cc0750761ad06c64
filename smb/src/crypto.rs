mod encryption;
mod kbkdf;
mod signing;

pub use encryption::{make_encrypting_algo, EncryptingAlgo, EncryptionResult, ENCRYPTING_ALGOS};
pub use kbkdf::{kbkdf_hmacsha256, DerivedKey, KeyToDerive};
pub use signing::{make_signing_algo, smb1_md5_mac, SigningAlgo, SIGNING_ALGOS};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("Invalid key length")]
    InvalidLength,
    #[error("AEAD operation failed: authentication tag mismatch or bad input")]
    Aead,
    #[error("Key derivation failed")]
    KeyDerivationFailed,
}

impl From<crypto_common::InvalidLength> for CryptoError {
    fn from(_: crypto_common::InvalidLength) -> Self {
        CryptoError::InvalidLength
    }
}

impl From<aead::Error> for CryptoError {
    fn from(_: aead::Error) -> Self {
        CryptoError::Aead
    }
}
