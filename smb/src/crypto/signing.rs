use md5::{Digest, Md5};

use crate::packets::smb2::*;

use super::CryptoError;

pub fn make_signing_algo(
    signing_algorithm: SigningAlgorithmId,
    signing_key: &[u8],
) -> Result<Box<dyn SigningAlgo>, CryptoError> {
    if !SIGNING_ALGOS.contains(&signing_algorithm) {
        return Err(CryptoError::UnsupportedAlgorithm);
    }
    match signing_algorithm {
        SigningAlgorithmId::HmacSha256 => Ok(hmac_signer::HmacSha256Signer::build(signing_key)?),
        SigningAlgorithmId::AesCmac => Ok(cmac_signer::Cmac128Signer::build(signing_key)?),
        SigningAlgorithmId::AesGmac => Err(CryptoError::UnsupportedAlgorithm),
    }
}

pub const SIGNING_ALGOS: &[SigningAlgorithmId] =
    &[SigningAlgorithmId::HmacSha256, SigningAlgorithmId::AesCmac];

/// A trait for SMB2 signing algorithms.
pub trait SigningAlgo: std::fmt::Debug + Send {
    /// Update the signing session with new data.
    fn update(&mut self, data: &[u8]);

    /// Finalize the signing session and return the signature.
    ///
    /// This function must be called once per signing session.
    fn finalize(&mut self) -> Result<u128, CryptoError>;
}

/// The SMB1 message authentication code: the first 8 bytes of MD5(session_key || message).
/// The message must already carry the sequence number in its signature field.
pub fn smb1_md5_mac(session_key: &[u8], message: &[u8]) -> [u8; 8] {
    let mut md5 = Md5::new();
    md5.update(session_key);
    md5.update(message);
    let digest = md5.finalize();
    let mut mac = [0u8; 8];
    mac.copy_from_slice(&digest[..8]);
    mac
}

mod hmac_signer {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    #[derive(Debug)]
    pub struct HmacSha256Signer {
        hmac: Option<Hmac<Sha256>>,
    }

    impl HmacSha256Signer {
        pub fn build(signing_key: &[u8]) -> Result<Box<dyn SigningAlgo>, CryptoError> {
            Ok(Box::new(HmacSha256Signer {
                hmac: Some(Hmac::new_from_slice(signing_key)?),
            }))
        }
    }

    impl SigningAlgo for HmacSha256Signer {
        fn update(&mut self, data: &[u8]) {
            if let Some(hmac) = self.hmac.as_mut() {
                hmac.update(data);
            }
        }

        fn finalize(&mut self) -> Result<u128, CryptoError> {
            let hmac = self.hmac.take().ok_or(CryptoError::UnsupportedAlgorithm)?;
            let digest = hmac.finalize().into_bytes();
            // Truncated to the 16-byte signature field.
            let mut signature = [0u8; 16];
            signature.copy_from_slice(&digest[..16]);
            Ok(u128::from_le_bytes(signature))
        }
    }
}

mod cmac_signer {
    use super::*;
    use aes::Aes128;
    use cmac::{Cmac, Mac};

    #[derive(Debug)]
    pub struct Cmac128Signer {
        cmac: Option<Cmac<Aes128>>,
    }

    impl Cmac128Signer {
        pub fn build(signing_key: &[u8]) -> Result<Box<dyn SigningAlgo>, CryptoError> {
            Ok(Box::new(Cmac128Signer {
                cmac: Some(<Cmac<Aes128> as Mac>::new_from_slice(signing_key)?),
            }))
        }
    }

    impl SigningAlgo for Cmac128Signer {
        fn update(&mut self, data: &[u8]) {
            if let Some(cmac) = self.cmac.as_mut() {
                cmac.update(data);
            }
        }

        fn finalize(&mut self) -> Result<u128, CryptoError> {
            let cmac = self.cmac.take().ok_or(CryptoError::UnsupportedAlgorithm)?;
            Ok(u128::from_le_bytes(cmac.finalize().into_bytes().into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_signer_is_deterministic() {
        let key = [0x42u8; 16];
        let sign = |data: &[u8]| {
            let mut algo = make_signing_algo(SigningAlgorithmId::HmacSha256, &key).unwrap();
            algo.update(data);
            algo.finalize().unwrap()
        };
        assert_eq!(sign(b"message"), sign(b"message"));
        assert_ne!(sign(b"message"), sign(b"messagf"));
    }

    #[test]
    fn test_split_updates_match_single_update() {
        let key = [7u8; 16];
        let mut whole = make_signing_algo(SigningAlgorithmId::AesCmac, &key).unwrap();
        whole.update(b"header-and-body");
        let mut split = make_signing_algo(SigningAlgorithmId::AesCmac, &key).unwrap();
        split.update(b"header-");
        split.update(b"and-body");
        assert_eq!(whole.finalize().unwrap(), split.finalize().unwrap());
    }

    #[test]
    fn test_cmac_rejects_bad_key_length() {
        assert_eq!(
            make_signing_algo(SigningAlgorithmId::AesCmac, &[0u8; 5]).unwrap_err(),
            CryptoError::InvalidLength
        );
    }

    #[test]
    fn test_gmac_unsupported() {
        assert_eq!(
            make_signing_algo(SigningAlgorithmId::AesGmac, &[0u8; 16]).unwrap_err(),
            CryptoError::UnsupportedAlgorithm
        );
    }

    #[test]
    fn test_finalize_twice_fails() {
        let mut algo = make_signing_algo(SigningAlgorithmId::HmacSha256, &[1u8; 16]).unwrap();
        algo.update(b"x");
        algo.finalize().unwrap();
        assert!(algo.finalize().is_err());
    }

    #[test]
    fn test_smb1_mac_is_md5_prefix() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(
            smb1_md5_mac(&[], &[]),
            [0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04]
        );
        // MD5("abc") = 900150983cd24fb0d6963f7d28e17f72
        assert_eq!(
            smb1_md5_mac(b"a", b"bc"),
            [0x90, 0x01, 0x50, 0x98, 0x3c, 0xd2, 0x4f, 0xb0]
        );
    }
}
