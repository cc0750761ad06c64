//! SMB Message encryption/decryption implementation.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::{crypto, packets::smb2::encrypted::*, Error};

#[derive(Debug)]
pub struct MessageEncryptor {
    algo: Box<dyn crypto::EncryptingAlgo>,
}

impl MessageEncryptor {
    pub fn new(algo: Box<dyn crypto::EncryptingAlgo>) -> MessageEncryptor {
        MessageEncryptor { algo }
    }

    /// Encrypts a serialized message into a transform-wrapped one.
    pub fn encrypt_message(
        &mut self,
        mut message: Vec<u8>,
        session_id: u64,
    ) -> crate::Result<EncryptedMessage> {
        let mut header = EncryptedHeader {
            signature: 0,
            nonce: self.gen_nonce(),
            original_message_size: message.len().try_into()?,
            session_id,
        };

        let result = self
            .algo
            .encrypt(&mut message, &header.aead_bytes()?, &header.nonce)
            .map_err(|e| Error::EncryptionError {
                message: format!("Failed to encrypt with {}", self.algo.cipher()),
                source: Some(e),
            })?;
        header.signature = result.signature;

        log::debug!(
            "Encrypted message of {} bytes for session {:#x}.",
            header.original_message_size,
            session_id
        );
        Ok(EncryptedMessage {
            header,
            encrypted_message: message,
        })
    }

    fn gen_nonce(&self) -> EncryptionNonce {
        let mut nonce = [0; 16];
        OsRng.fill_bytes(&mut nonce[..self.algo.nonce_size()]);
        nonce
    }
}

#[derive(Debug)]
pub struct MessageDecryptor {
    algo: Box<dyn crypto::EncryptingAlgo>,
}

impl MessageDecryptor {
    pub fn new(algo: Box<dyn crypto::EncryptingAlgo>) -> MessageDecryptor {
        MessageDecryptor { algo }
    }

    /// Decrypts a transform-wrapped message into the serialized plain message.
    /// Fails without returning any plaintext if the tag does not verify.
    pub fn decrypt_message(&mut self, msg_in: &EncryptedMessage) -> crate::Result<Vec<u8>> {
        if msg_in.header.original_message_size as usize != msg_in.encrypted_message.len() {
            return Err(Error::encryption(format!(
                "Transform header announces {} bytes, but {} were received",
                msg_in.header.original_message_size,
                msg_in.encrypted_message.len()
            )));
        }

        let mut serialized_message = msg_in.encrypted_message.clone();
        self.algo
            .decrypt(
                &mut serialized_message,
                &msg_in.header.aead_bytes()?,
                &msg_in.header.nonce,
                msg_in.header.signature,
            )
            .map_err(|e| Error::EncryptionError {
                message: format!("Failed to decrypt with {}", self.algo.cipher()),
                source: Some(e),
            })?;

        log::debug!(
            "Decrypted message of {} bytes for session {:#x}.",
            serialized_message.len(),
            msg_in.header.session_id
        );
        Ok(serialized_message)
    }
}
