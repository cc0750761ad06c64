//! NetBIOS session service (RFC 1002) packets, for SMB over port 139.

use std::str::FromStr;

use binrw::{
    meta::{ReadEndian, WriteEndian},
    prelude::*,
};

/// NetBIOS session service packet header.
#[binrw::binrw]
#[derive(Debug, PartialEq, Eq)]
#[brw(big)]
pub struct NBSSPacketHeader {
    pub ptype: NBSSPacketType,
    // Only short control packets are parsed through this header.
    #[br(assert(flags == 0x00))]
    pub flags: u8,
    pub length: u16,
}

impl NBSSPacketHeader {
    pub const SIZE: usize = 4;
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u8))]
pub enum NBSSPacketType {
    SessionMessage = 0x00,
    SessionRequest = 0x81,
    PositiveSessionResponse = 0x82,
    NegativeSessionResponse = 0x83,
    SessionRetargetResponse = 0x84,
    SessionKeepAlive = 0x85,
}

/// The body of a session service control packet.
#[binrw::binrw]
#[derive(Debug, PartialEq, Eq)]
#[br(import(ptype: NBSSPacketType))]
#[brw(big)]
pub enum NBSSTrailer {
    #[br(pre_assert(ptype == NBSSPacketType::SessionRequest))]
    SessionRequest(NBSessionRequest),
    #[br(pre_assert(ptype == NBSSPacketType::PositiveSessionResponse))]
    PositiveSessionResponse(()),
    #[br(pre_assert(ptype == NBSSPacketType::NegativeSessionResponse))]
    NegativeSessionResponse(NBNegativeSessionResponse),
    #[br(pre_assert(ptype == NBSSPacketType::SessionKeepAlive))]
    SessionKeepAlive(()),
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq)]
#[brw(big)]
pub struct NBSessionRequest {
    pub called_name: NetBiosName,
    pub calling_name: NetBiosName,
}

/// A NetBIOS name: 15 space-padded characters plus a one-byte suffix.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NetBiosName {
    name: String,
    suffix: u8,
}

impl NetBiosName {
    const NIBBLE_BASE: u8 = b'A';
    const NAME_CHARS: usize = 15;
    /// Length prefix of a first-level encoded name: two bytes per character and suffix.
    const ENCODED_LENGTH: u8 = ((Self::NAME_CHARS + 1) * 2) as u8;

    pub fn new(mut name: String, suffix: u8) -> Self {
        name.truncate(Self::NAME_CHARS);
        let pad = Self::NAME_CHARS - name.len();
        name.push_str(&" ".repeat(pad));
        NetBiosName { name, suffix }
    }

    /// The name, including its padding.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suffix(&self) -> u8 {
        self.suffix
    }
}

impl std::fmt::Display for NetBiosName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}<{:02X}>",
            self.name.trim_end_matches(' '),
            self.suffix
        )
    }
}

impl BinRead for NetBiosName {
    type Args<'a> = ();

    fn read_options<R: std::io::Read + std::io::Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let length = u8::read_options(reader, endian, ())?;
        if length != Self::ENCODED_LENGTH {
            return Err(binrw::Error::AssertFail {
                pos,
                message: format!("NetBIOS name length {length} is not {}", Self::ENCODED_LENGTH),
            });
        }

        let mut decoded = [0u8; Self::NAME_CHARS + 1];
        for byte in decoded.iter_mut() {
            let high = u8::read_options(reader, endian, ())?;
            let low = u8::read_options(reader, endian, ())?;
            let (Some(high), Some(low)) = (
                high.checked_sub(Self::NIBBLE_BASE),
                low.checked_sub(Self::NIBBLE_BASE),
            ) else {
                return Err(binrw::Error::AssertFail {
                    pos,
                    message: "NetBIOS name is not first-level encoded".to_string(),
                });
            };
            *byte = (high << 4) | (low & 0x0f);
        }
        if u8::read_options(reader, endian, ())? != 0 {
            return Err(binrw::Error::AssertFail {
                pos,
                message: "NetBIOS name is missing its terminating null".to_string(),
            });
        }
        let name = decoded[..Self::NAME_CHARS]
            .iter()
            .map(|&b| b as char)
            .collect();
        Ok(NetBiosName {
            name,
            suffix: decoded[Self::NAME_CHARS],
        })
    }
}

impl ReadEndian for NetBiosName {
    const ENDIAN: binrw::meta::EndianKind = binrw::meta::EndianKind::None;
}

impl BinWrite for NetBiosName {
    type Args<'a> = ();

    fn write_options<W: std::io::Write + std::io::Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        if !self.name.is_ascii() {
            return Err(binrw::Error::AssertFail {
                pos: writer.stream_position()?,
                message: "NetBIOS name contains non-ASCII characters".to_string(),
            });
        }
        Self::ENCODED_LENGTH.write_options(writer, endian, ())?;
        for b in self.name.bytes().chain(std::iter::once(self.suffix)) {
            (Self::NIBBLE_BASE + (b >> 4)).write_options(writer, endian, ())?;
            (Self::NIBBLE_BASE + (b & 0x0f)).write_options(writer, endian, ())?;
        }
        0u8.write_options(writer, endian, ())
    }
}

impl WriteEndian for NetBiosName {
    const ENDIAN: binrw::meta::EndianKind = binrw::meta::EndianKind::None;
}

impl FromStr for NetBiosName {
    type Err = crate::Error;

    /// Parses the `NAME<XX>` notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || crate::Error::InvalidAddress(format!("Invalid NetBIOS name: {s}"));
        let (name, suffix) = s.split_once('<').ok_or_else(invalid)?;
        let suffix = suffix.strip_suffix('>').ok_or_else(invalid)?;
        if name.is_empty() || name.len() > Self::NAME_CHARS || suffix.is_empty() {
            return Err(invalid());
        }
        let suffix = u8::from_str_radix(suffix, 16).map_err(|_| invalid())?;
        Ok(NetBiosName::new(name.to_string(), suffix))
    }
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq)]
#[brw(big)]
pub struct NBNegativeSessionResponse {
    pub error_code: NBSSNegativeSessionResponseErrorCode,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[brw(big, repr(u8))]
pub enum NBSSNegativeSessionResponseErrorCode {
    NotListeningOnCalledName = 0x80,
    NotListeningForCallingName = 0x81,
    CalledNameNotPresent = 0x82,
    InsufficientResources = 0x83,
    UnspecifiedError = 0x8F,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SMBSERVER_ENCODED: [u8; 34] = [
        0x20, 0x43, 0x4b, 0x46, 0x44, 0x45, 0x4e, 0x45, 0x43, 0x46, 0x44, 0x45, 0x46, 0x46, 0x43,
        0x46, 0x47, 0x45, 0x46, 0x46, 0x43, 0x43, 0x41, 0x43, 0x41, 0x43, 0x41, 0x43, 0x41, 0x43,
        0x41, 0x43, 0x41, 0x0,
    ];

    #[test]
    fn test_nb_name_read() {
        let name = NetBiosName::read(&mut Cursor::new(&SMBSERVER_ENCODED)).unwrap();
        assert_eq!(name.name(), "*SMBSERVER     ");
        assert_eq!(name.suffix(), 0x20);
        assert_eq!(name.to_string(), "*SMBSERVER<20>");
        assert_eq!("*SMBSERVER<20>".parse::<NetBiosName>().unwrap(), name);
    }

    #[test]
    fn test_nbss_session_request_write() {
        let request = NBSessionRequest {
            called_name: NetBiosName::new("*SMBSERVER".to_string(), 0x20),
            calling_name: NetBiosName::new("MACBOOKPRO-AF8A".to_string(), 0x0),
        };
        let mut buf = Vec::new();
        request.write(&mut Cursor::new(&mut buf)).unwrap();
        assert_eq!(&buf[..34], &SMBSERVER_ENCODED);
        assert_eq!(
            &buf[34..],
            &[
                0x20, 0x45, 0x4e, 0x45, 0x42, 0x45, 0x44, 0x45, 0x43, 0x45, 0x50, 0x45, 0x50, 0x45,
                0x4c, 0x46, 0x41, 0x46, 0x43, 0x45, 0x50, 0x43, 0x4e, 0x45, 0x42, 0x45, 0x47, 0x44,
                0x49, 0x45, 0x42, 0x41, 0x41, 0x0,
            ]
        );
    }

    #[test]
    fn test_nb_name_bad_notation() {
        assert!("*SMBSERVER".parse::<NetBiosName>().is_err());
        assert!("*SMBSERVER<zz>".parse::<NetBiosName>().is_err());
    }

    #[test]
    fn test_nbss_header_read() {
        let data = [0x82u8, 0x0, 0x0, 0x0];
        let header = NBSSPacketHeader::read(&mut Cursor::new(&data)).unwrap();
        assert_eq!(
            header,
            NBSSPacketHeader {
                ptype: NBSSPacketType::PositiveSessionResponse,
                flags: 0x00,
                length: 0x0000,
            }
        );
        let trailer = NBSSTrailer::read_args(&mut Cursor::new(Vec::<u8>::new()), (header.ptype,)).unwrap();
        assert_eq!(trailer, NBSSTrailer::PositiveSessionResponse(()));
    }
}
