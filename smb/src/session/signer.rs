//! SMB Message signing implementation.

use crate::{
    crypto::{self, DerivedKey},
    msg_handler::is_signed,
    packets::{smb1::Smb1Header, smb2::*},
    Error,
};

/// Signs and verifies serialized SMB2 messages.
///
/// The signature covers the whole message with the signature field zeroed.
#[derive(Debug, Clone)]
pub struct MessageSigner {
    algorithm: SigningAlgorithmId,
    signing_key: DerivedKey,
}

impl MessageSigner {
    pub fn new(algorithm: SigningAlgorithmId, signing_key: DerivedKey) -> MessageSigner {
        MessageSigner {
            algorithm,
            signing_key,
        }
    }

    pub fn algorithm(&self) -> SigningAlgorithmId {
        self.algorithm
    }

    /// Sets the signed flag of `raw_data` and writes its signature.
    pub fn sign_message(&self, raw_data: &mut [u8]) -> crate::Result<u128> {
        Self::check_length(raw_data)?;
        raw_data[Header::FLAGS_OFFSET] |= Header::FLAGS_SIGNED_BIT;

        let signature = self.calculate_signature(raw_data)?;
        raw_data[Header::SIGNATURE_RANGE].copy_from_slice(&signature.to_le_bytes());

        log::debug!("Message signed (signature={:#x}).", signature);
        Ok(signature)
    }

    pub fn verify_signature(&self, raw_data: &[u8]) -> crate::Result<()> {
        Self::check_length(raw_data)?;
        if !is_signed(raw_data) {
            log::warn!("Expected a signed message, but the signed flag is clear.");
            return Err(Error::SignatureVerificationFailed);
        }

        let mut received = [0u8; 16];
        received.copy_from_slice(&raw_data[Header::SIGNATURE_RANGE]);
        let received = u128::from_le_bytes(received);

        let calculated = self.calculate_signature(raw_data)?;
        if calculated != received {
            log::warn!(
                "Signature mismatch: received {:#x}, calculated {:#x}",
                received,
                calculated
            );
            return Err(Error::SignatureVerificationFailed);
        }
        log::debug!("Signature verification passed (signature={:#x}).", received);
        Ok(())
    }

    fn calculate_signature(&self, raw_data: &[u8]) -> crate::Result<u128> {
        let mut algo = crypto::make_signing_algo(self.algorithm, &self.signing_key)?;
        algo.update(&raw_data[..Header::SIGNATURE_RANGE.start]);
        algo.update(&[0u8; 16]);
        algo.update(&raw_data[Header::SIGNATURE_RANGE.end..]);
        Ok(algo.finalize()?)
    }

    fn check_length(raw_data: &[u8]) -> crate::Result<()> {
        if raw_data.len() < Header::STRUCT_SIZE {
            return Err(Error::InvalidMessage(format!(
                "A message of {} bytes is too short to sign",
                raw_data.len()
            )));
        }
        Ok(())
    }
}

/// Legacy SMB1 message signing.
///
/// The signature field carries the sequence number while hashing, and the
/// first 8 bytes of `MD5(session_key || message)` afterwards. The sequence
/// counter belongs to the connection, see [`NegotiationState::sign_smb1`].
///
/// [`NegotiationState::sign_smb1`]: crate::connection::NegotiationState::sign_smb1
#[derive(Debug, Clone)]
pub struct Smb1MessageSigner {
    session_key: Vec<u8>,
    signing_required: bool,
}

impl Smb1MessageSigner {
    pub fn new(session_key: &[u8], signing_required: bool) -> Smb1MessageSigner {
        Smb1MessageSigner {
            session_key: session_key.to_vec(),
            signing_required,
        }
    }

    /// Whether [`Smb1MessageSigner::sign`] writes a signature at all.
    pub fn is_active(&self) -> bool {
        self.signing_required && !self.session_key.is_empty()
    }

    /// Signs `message` with sequence number `sequence`.
    /// Returns the message unchanged while signing is off or the key is empty.
    pub fn sign(&self, mut message: Vec<u8>, sequence: u32) -> crate::Result<Vec<u8>> {
        if !self.is_active() {
            return Ok(message);
        }
        let mac = self.calculate(&mut message, sequence)?;
        message[Smb1Header::SIGNATURE_RANGE].copy_from_slice(&mac);
        Ok(message)
    }

    /// Verifies a message signed with sequence number `sequence`.
    pub fn verify(&self, message: &[u8], sequence: u32) -> crate::Result<()> {
        if message.len() < Smb1Header::SIZE {
            return Err(Error::SignatureVerificationFailed);
        }
        let mut scratch = message.to_vec();
        let mac = self.calculate(&mut scratch, sequence)?;
        if message[Smb1Header::SIGNATURE_RANGE] != mac {
            return Err(Error::SignatureVerificationFailed);
        }
        Ok(())
    }

    fn calculate(&self, message: &mut [u8], sequence: u32) -> crate::Result<[u8; 8]> {
        if message.len() < Smb1Header::SIZE {
            return Err(Error::InvalidMessage(format!(
                "A message of {} bytes is too short to sign",
                message.len()
            )));
        }
        let mut sequence_field = [0u8; 8];
        sequence_field[..4].copy_from_slice(&sequence.to_le_bytes());
        message[Smb1Header::SIGNATURE_RANGE].copy_from_slice(&sequence_field);
        Ok(crypto::smb1_md5_mac(&self.session_key, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg_handler::encode_request;

    fn echo_bytes() -> Vec<u8> {
        let mut request = PlainRequest::new(RequestContent::Echo(EchoRequest::default()));
        request.header.message_id = 5;
        request.header.session_id = 0x4000_0000_0001;
        encode_request(&request).unwrap()
    }

    #[test]
    fn test_sign_then_verify() {
        for algorithm in [SigningAlgorithmId::HmacSha256, SigningAlgorithmId::AesCmac] {
            let signer = MessageSigner::new(algorithm, [0x11; 16]);
            let mut raw = echo_bytes();
            let signature = signer.sign_message(&mut raw).unwrap();
            assert_ne!(signature, 0);
            assert!(is_signed(&raw));
            signer.verify_signature(&raw).unwrap();
        }
    }

    #[test]
    fn test_signature_ignores_previous_signature_field() {
        let signer = MessageSigner::new(SigningAlgorithmId::AesCmac, [0x22; 16]);
        let mut first = echo_bytes();
        let mut second = echo_bytes();
        second[Header::SIGNATURE_RANGE].copy_from_slice(&[0xee; 16]);
        assert_eq!(
            signer.sign_message(&mut first).unwrap(),
            signer.sign_message(&mut second).unwrap()
        );
    }

    #[test]
    fn test_tampered_message_fails_verification() {
        let signer = MessageSigner::new(SigningAlgorithmId::HmacSha256, [0x33; 16]);
        let mut raw = echo_bytes();
        signer.sign_message(&mut raw).unwrap();
        raw[Header::STRUCT_SIZE] ^= 0x01;
        assert!(matches!(
            signer.verify_signature(&raw),
            Err(Error::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_unsigned_message_fails_verification() {
        let signer = MessageSigner::new(SigningAlgorithmId::HmacSha256, [0x33; 16]);
        assert!(matches!(
            signer.verify_signature(&echo_bytes()),
            Err(Error::SignatureVerificationFailed)
        ));
    }

    #[test]
    fn test_smb1_signing_uses_sequence() {
        let message = {
            let mut m = b"\xffSMBr".to_vec();
            m.resize(Smb1Header::SIZE + 3, 0);
            m
        };
        let signer = Smb1MessageSigner::new(&[0x44; 16], true);
        assert!(signer.is_active());
        let first = signer.sign(message.clone(), 0).unwrap();
        let second = signer.sign(message.clone(), 1).unwrap();
        assert_ne!(
            first[Smb1Header::SIGNATURE_RANGE],
            second[Smb1Header::SIGNATURE_RANGE]
        );
        signer.verify(&first, 0).unwrap();
        signer.verify(&second, 1).unwrap();
        assert!(signer.verify(&second, 0).is_err());

        // MAC of the message with sequence 0 in place of the signature.
        let mut expected_input = message.clone();
        expected_input[Smb1Header::SIGNATURE_RANGE].copy_from_slice(&[0; 8]);
        assert_eq!(
            first[Smb1Header::SIGNATURE_RANGE],
            crypto::smb1_md5_mac(&[0x44; 16], &expected_input)
        );
    }

    #[test]
    fn test_smb1_signing_identity_when_off() {
        let message = vec![0xffu8; Smb1Header::SIZE];
        let not_required = Smb1MessageSigner::new(&[0x44; 16], false);
        assert!(!not_required.is_active());
        assert_eq!(not_required.sign(message.clone(), 0).unwrap(), message);
        let no_key = Smb1MessageSigner::new(&[], true);
        assert!(!no_key.is_active());
        assert_eq!(no_key.sign(message.clone(), 3).unwrap(), message);
    }
}
