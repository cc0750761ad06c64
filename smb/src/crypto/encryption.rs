use std::fmt::Debug;

use crate::packets::smb2::*;

use super::CryptoError;

pub struct EncryptionResult {
    pub signature: u128,
}

pub trait EncryptingAlgo: Debug + Send {
    /// Algo-specific encryption function.
    fn encrypt(
        &mut self,
        payload: &mut [u8],
        header_data: &[u8],
        nonce: &EncryptionNonce,
    ) -> Result<EncryptionResult, CryptoError>;

    /// Algo-specific decryption function.
    /// On failure, the payload contents are unspecified and must be discarded.
    fn decrypt(
        &mut self,
        payload: &mut [u8],
        header_data: &[u8],
        nonce: &EncryptionNonce,
        signature: u128,
    ) -> Result<(), CryptoError>;

    /// Returns the size of the nonce required by the encryption algorithm.
    fn nonce_size(&self) -> usize;

    /// Returns the nonce to be used for encryption/decryption (trimmed to the required size).
    fn trim_nonce<'a>(&self, nonce: &'a EncryptionNonce) -> &'a [u8] {
        &nonce[..self.nonce_size()]
    }

    /// The cipher this algo implements.
    fn cipher(&self) -> EncryptionCipher;
}

pub const ENCRYPTING_ALGOS: &[EncryptionCipher] =
    &[EncryptionCipher::Aes128Gcm, EncryptionCipher::Aes128Ccm];

pub fn make_encrypting_algo(
    encrypting_algorithm: EncryptionCipher,
    encrypting_key: &[u8],
) -> Result<Box<dyn EncryptingAlgo>, CryptoError> {
    match encrypting_algorithm {
        EncryptionCipher::Aes128Ccm => Ok(encrypt_ccm::Aes128CcmEncryptor::build(encrypting_key)?),
        EncryptionCipher::Aes128Gcm => Ok(encrypt_gcm::Aes128GcmEncryptor::build(encrypting_key)?),
        EncryptionCipher::Aes256Ccm | EncryptionCipher::Aes256Gcm => {
            Err(CryptoError::UnsupportedAlgorithm)
        }
    }
}

mod encrypt_ccm {
    use aes::cipher::generic_array::GenericArray;
    use aes::Aes128;
    use ccm::{
        aead::{AeadMutInPlace, KeyInit},
        consts::{U11, U16},
        Ccm,
    };

    use super::*;

    #[derive(Clone)]
    pub struct Aes128CcmEncryptor {
        cipher: Ccm<Aes128, U16, U11>,
    }

    impl Aes128CcmEncryptor {
        pub fn build(encrypting_key: &[u8]) -> Result<Box<dyn EncryptingAlgo>, CryptoError> {
            Ok(Box::new(Self {
                cipher: Ccm::<Aes128, U16, U11>::new_from_slice(encrypting_key)?,
            }))
        }
    }

    impl EncryptingAlgo for Aes128CcmEncryptor {
        fn encrypt(
            &mut self,
            payload: &mut [u8],
            header_data: &[u8],
            nonce: &EncryptionNonce,
        ) -> Result<EncryptionResult, CryptoError> {
            let nonce = GenericArray::from_slice(self.trim_nonce(nonce));
            let signature = self
                .cipher
                .encrypt_in_place_detached(nonce, header_data, payload)?;

            Ok(EncryptionResult {
                signature: u128::from_le_bytes(signature.into()),
            })
        }

        fn decrypt(
            &mut self,
            payload: &mut [u8],
            header_data: &[u8],
            nonce: &EncryptionNonce,
            signature: u128,
        ) -> Result<(), CryptoError> {
            let nonce = GenericArray::from_slice(self.trim_nonce(nonce));
            self.cipher.decrypt_in_place_detached(
                nonce,
                header_data,
                payload,
                &signature.to_le_bytes().into(),
            )?;

            Ok(())
        }

        fn nonce_size(&self) -> usize {
            11
        }

        fn cipher(&self) -> EncryptionCipher {
            EncryptionCipher::Aes128Ccm
        }
    }

    impl std::fmt::Debug for Aes128CcmEncryptor {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Aes128CcmEncryptor")
        }
    }
}

mod encrypt_gcm {
    use aead::AeadMutInPlace;
    use aes::cipher::generic_array::GenericArray;
    use aes_gcm::{AesGcm, KeyInit};
    use crypto_common::typenum;

    use super::*;

    #[derive(Clone)]
    pub struct Aes128GcmEncryptor {
        cipher: AesGcm<aes::Aes128, typenum::U12>,
    }

    impl Aes128GcmEncryptor {
        pub fn build(encrypting_key: &[u8]) -> Result<Box<dyn EncryptingAlgo>, CryptoError> {
            Ok(Box::new(Self {
                cipher: AesGcm::<aes::Aes128, typenum::U12>::new_from_slice(encrypting_key)?,
            }))
        }
    }

    impl EncryptingAlgo for Aes128GcmEncryptor {
        fn encrypt(
            &mut self,
            payload: &mut [u8],
            header_data: &[u8],
            nonce: &EncryptionNonce,
        ) -> Result<EncryptionResult, CryptoError> {
            let tag = self.cipher.encrypt_in_place_detached(
                GenericArray::from_slice(self.trim_nonce(nonce)),
                header_data,
                payload,
            )?;
            Ok(EncryptionResult {
                signature: u128::from_le_bytes(tag.into()),
            })
        }

        fn decrypt(
            &mut self,
            payload: &mut [u8],
            header_data: &[u8],
            nonce: &EncryptionNonce,
            signature: u128,
        ) -> Result<(), CryptoError> {
            self.cipher.decrypt_in_place_detached(
                GenericArray::from_slice(self.trim_nonce(nonce)),
                header_data,
                payload,
                &signature.to_le_bytes().into(),
            )?;
            Ok(())
        }

        fn nonce_size(&self) -> usize {
            12
        }

        fn cipher(&self) -> EncryptionCipher {
            EncryptionCipher::Aes128Gcm
        }
    }

    impl std::fmt::Debug for Aes128GcmEncryptor {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "Aes128GcmEncryptor")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(cipher: EncryptionCipher) {
        let key = [0x5au8; 16];
        let mut nonce: EncryptionNonce = [0; 16];
        nonce[..4].copy_from_slice(&[1, 2, 3, 4]);
        let aad = [0xaau8; 32];
        let plain = b"plaintext smb2 message".to_vec();

        let mut algo = make_encrypting_algo(cipher, &key).unwrap();
        let mut payload = plain.clone();
        let result = algo.encrypt(&mut payload, &aad, &nonce).unwrap();
        assert_ne!(payload, plain);

        let mut decryptor = make_encrypting_algo(cipher, &key).unwrap();
        decryptor
            .decrypt(&mut payload, &aad, &nonce, result.signature)
            .unwrap();
        assert_eq!(payload, plain);
    }

    #[test]
    fn test_ccm() {
        roundtrip(EncryptionCipher::Aes128Ccm);
    }

    #[test]
    fn test_gcm() {
        roundtrip(EncryptionCipher::Aes128Gcm);
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = [3u8; 16];
        let nonce: EncryptionNonce = [9; 16];
        let mut algo = make_encrypting_algo(EncryptionCipher::Aes128Gcm, &key).unwrap();
        let mut payload = b"data".to_vec();
        let result = algo.encrypt(&mut payload, b"aad", &nonce).unwrap();
        assert_eq!(
            algo.decrypt(&mut payload, b"aad", &nonce, result.signature ^ 1),
            Err(CryptoError::Aead)
        );
    }

    #[test]
    fn test_tampered_aad_fails() {
        let key = [3u8; 16];
        let nonce: EncryptionNonce = [0; 16];
        let mut algo = make_encrypting_algo(EncryptionCipher::Aes128Ccm, &key).unwrap();
        let mut payload = b"data".to_vec();
        let result = algo.encrypt(&mut payload, b"aad", &nonce).unwrap();
        assert!(algo
            .decrypt(&mut payload, b"aaX", &nonce, result.signature)
            .is_err());
    }

    #[test]
    fn test_nonce_sizes() {
        let key = [0u8; 16];
        assert_eq!(
            make_encrypting_algo(EncryptionCipher::Aes128Ccm, &key)
                .unwrap()
                .nonce_size(),
            11
        );
        assert_eq!(
            make_encrypting_algo(EncryptionCipher::Aes128Gcm, &key)
                .unwrap()
                .nonce_size(),
            12
        );
    }

    #[test]
    fn test_aes256_unsupported() {
        assert!(make_encrypting_algo(EncryptionCipher::Aes256Gcm, &[0u8; 32]).is_err());
    }
}
