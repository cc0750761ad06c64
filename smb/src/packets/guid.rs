use std::{fmt::Display, str::FromStr};

use binrw::prelude::*;
use rand::{rngs::OsRng, RngCore};

/// A 16-byte GUID, in its mixed-endian wire layout.
#[derive(BinRead, BinWrite, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[brw(little)]
pub struct Guid(u32, u16, u16, [u8; 8]);

impl Guid {
    pub const GUID_SIZE: usize = 16;

    pub const ZERO: Guid = Guid(0, 0, 0, [0; 8]);

    /// Generates a new random GUID.
    pub fn gen() -> Self {
        let mut bytes = [0u8; Self::GUID_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self::from(bytes)
    }
}

impl From<[u8; 16]> for Guid {
    fn from(b: [u8; 16]) -> Self {
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&b[8..]);
        Guid(
            u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            u16::from_le_bytes([b[4], b[5]]),
            u16::from_le_bytes([b[6], b[7]]),
            tail,
        )
    }
}

impl From<Guid> for [u8; 16] {
    fn from(g: Guid) -> Self {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&g.0.to_le_bytes());
        out[4..6].copy_from_slice(&g.1.to_le_bytes());
        out[6..8].copy_from_slice(&g.2.to_le_bytes());
        out[8..].copy_from_slice(&g.3);
        out
    }
}

impl FromStr for Guid {
    type Err = &'static str;

    /// Parses `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, optionally wrapped in braces.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .unwrap_or(s);
        let groups: Vec<&str> = s.split('-').collect();
        if groups.len() != 5
            || [8, 4, 4, 4, 12]
                .iter()
                .zip(&groups)
                .any(|(len, g)| g.len() != *len)
        {
            return Err("Invalid GUID format");
        }
        let hex: String = groups.concat();
        let mut be = [0u8; 16];
        for (i, byte) in be.iter_mut().enumerate() {
            *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2).ok_or("Invalid GUID format")?, 16)
                .map_err(|_| "Invalid hex character")?;
        }
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&be[8..]);
        Ok(Guid(
            u32::from_be_bytes([be[0], be[1], be[2], be[3]]),
            u16::from_be_bytes([be[4], be[5]]),
            u16::from_be_bytes([be[6], be[7]]),
            tail,
        ))
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.0, self.1, self.2, self.3[0], self.3[1]
        )?;
        for b in &self.3[2..] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guid({})", self)
    }
}
