use sha2::{Digest, Sha512};

use crate::{packets::smb2::HashAlgorithm, Error};

pub type PreauthHashValue = [u8; 64];

pub const SUPPORTED_ALGOS: &[HashAlgorithm] = &[HashAlgorithm::Sha512];

/// The SMB 3.1.1 preauthentication integrity hash.
///
/// Starts as 64 zero bytes; every folded message replaces the value with
/// `SHA-512(previous || message)`. Once finished, the value is frozen and used as KDF context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreauthHashState {
    InProgress(PreauthHashValue),
    Finished(PreauthHashValue),
}

impl PreauthHashState {
    pub fn next(self, data: &[u8]) -> crate::Result<PreauthHashState> {
        match self {
            PreauthHashState::InProgress(hash) => {
                let mut hasher = Sha512::new();
                hasher.update(hash);
                hasher.update(data);
                Ok(PreauthHashState::InProgress(hasher.finalize().into()))
            }
            PreauthHashState::Finished(_) => Err(Error::InvalidState(
                "Preauth hash already finished, cannot fold more messages".into(),
            )),
        }
    }

    /// Folds `data` in place.
    pub fn update(&mut self, data: &[u8]) -> crate::Result<()> {
        *self = self.clone().next(data)?;
        Ok(())
    }

    pub fn current_hash(&self) -> &PreauthHashValue {
        match self {
            PreauthHashState::InProgress(hash) | PreauthHashState::Finished(hash) => hash,
        }
    }

    pub fn finish(self) -> PreauthHashState {
        match self {
            PreauthHashState::InProgress(hash) => PreauthHashState::Finished(hash),
            finished => finished,
        }
    }

    pub fn final_hash(&self) -> crate::Result<&PreauthHashValue> {
        match self {
            PreauthHashState::Finished(hash) => Ok(hash),
            PreauthHashState::InProgress(_) => Err(Error::InvalidState(
                "Preauth hash is still in progress".into(),
            )),
        }
    }
}

impl Default for PreauthHashState {
    fn default() -> PreauthHashState {
        PreauthHashState::InProgress([0; 64])
    }
}
