//! Encrypted messages

use std::io::Cursor;

use binrw::prelude::*;

/// The nonce field of the transform header.
/// Ciphers use its leading bytes (11 for CCM, 12 for GCM); the rest stays zero.
pub type EncryptionNonce = [u8; 16];

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little, magic(b"\xfdSMB"))]
pub struct EncryptedHeader {
    pub signature: u128,
    pub nonce: EncryptionNonce,
    pub original_message_size: u32,
    #[bw(calc = 0)]
    _reserved: u16,
    // Encrypted, for every 3.x dialect.
    #[bw(calc = 1)]
    #[br(assert(_flags == 1))]
    _flags: u16,
    pub session_id: u64,
}

impl EncryptedHeader {
    pub const STRUCTURE_SIZE: usize = 52;
    /// The header bytes authenticated as AEAD associated data: everything after the signature.
    pub const AEAD_RANGE: std::ops::Range<usize> = 20..Self::STRUCTURE_SIZE;

    /// The AEAD associated data for this header.
    /// All fields but the signature must be final.
    pub fn aead_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(Self::STRUCTURE_SIZE));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner()[Self::AEAD_RANGE].to_vec())
    }
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct EncryptedMessage {
    pub header: EncryptedHeader,
    #[br(parse_with = binrw::helpers::until_eof)]
    pub encrypted_message: Vec<u8>,
}
