//! SMB1 packets needed for multi-protocol negotiation and legacy signing.

use binrw::io::TakeSeekExt;
use binrw::prelude::*;
use modular_bitfield::prelude::*;

use super::{binrw_util::prelude::*, guid::Guid};

/// The 32-byte SMB1 header.
#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little, magic(b"\xffSMB"))]
pub struct Smb1Header {
    pub command: u8,
    pub status: u32,
    pub flags: u8,
    pub flags2: Smb1Flags2,
    pub pid_high: u16,
    /// The signature field once signing is active.
    pub security_features: [u8; 8],
    #[bw(calc = 0)]
    _reserved: u16,
    pub tid: u16,
    pub pid_low: u16,
    pub uid: u16,
    pub mid: u16,
}

impl Smb1Header {
    pub const SIZE: usize = 32;
    pub const COM_NEGOTIATE: u8 = 0x72;
    /// Byte range of `security_features` within a serialized message.
    pub const SIGNATURE_RANGE: std::ops::Range<usize> = 14..22;
    /// `flags`: reply bit.
    pub const FLAGS_REPLY: u8 = 0x80;

    fn negotiate_request() -> Self {
        Self {
            command: Self::COM_NEGOTIATE,
            status: 0,
            flags: 0x18,
            flags2: Smb1Flags2::new()
                .with_long_names(true)
                .with_eas(true)
                .with_security_signature_required(true)
                .with_is_long_name(true)
                .with_extended_security(true)
                .with_nt_status(true)
                .with_unicode(true),
            pid_high: 0,
            security_features: [0; 8],
            tid: 0xffff,
            pid_low: 1,
            uid: 0,
            mid: 0,
        }
    }

    /// A reply header for `request`, echoing its identifiers.
    pub fn reply_to(request: &Smb1Header) -> Self {
        Self {
            flags: request.flags | Self::FLAGS_REPLY,
            flags2: request.flags2.with_security_signature_required(false),
            security_features: [0; 8],
            ..request.clone()
        }
    }
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct Smb1Flags2 {
    pub long_names: bool,
    pub eas: bool,
    pub security_signature: bool,
    pub compressed: bool,
    pub security_signature_required: bool,
    #[skip]
    __: B1,
    pub is_long_name: bool,
    #[skip]
    __: B3,
    pub reparse_path: bool,
    pub extended_security: bool,
    pub dfs: bool,
    pub paging_io: bool,
    pub nt_status: bool,
    pub unicode: bool,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct Smb1NegotiateRequest {
    #[br(assert(header.command == Smb1Header::COM_NEGOTIATE))]
    pub header: Smb1Header,
    // Always zero according to MS-CIFS.
    #[bw(calc = 0)]
    #[br(assert(_word_count == 0))]
    _word_count: u8,
    #[bw(calc = PosMarker::default())]
    byte_count: PosMarker<u16>,
    #[br(map_stream = |s| s.take_seek(byte_count.value.into()), parse_with = binrw::helpers::until_eof)]
    #[bw(write_with = PosMarker::write_size, args(&byte_count))]
    pub dialects: Vec<Smb1Dialect>,
}

impl Smb1NegotiateRequest {
    pub fn new(dialects: &[&str]) -> Self {
        Self {
            header: Smb1Header::negotiate_request(),
            dialects: dialects.iter().map(|d| Smb1Dialect::from(*d)).collect(),
        }
    }

    pub fn offers(&self, dialect: &str) -> bool {
        self.dialects.iter().any(|d| d.name.to_string() == dialect)
    }
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone)]
#[brw(magic(b"\x02"))]
pub struct Smb1Dialect {
    pub name: binrw::NullString,
}

impl Smb1Dialect {
    pub const NT_LM_0_12: &'static str = "NT LM 0.12";
    pub const SMB_2_002: &'static str = "SMB 2.002";
    pub const SMB_2_WILDCARD: &'static str = "SMB 2.???";
}

impl From<&str> for Smb1Dialect {
    fn from(name: &str) -> Self {
        Self {
            name: binrw::NullString::from(name),
        }
    }
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub struct Smb1NegotiateResponse {
    #[br(assert(header.command == Smb1Header::COM_NEGOTIATE))]
    pub header: Smb1Header,
    pub body: Smb1NegotiateResponseBody,
}

/// The response body, told apart by its word count.
#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
#[brw(little)]
pub enum Smb1NegotiateResponseBody {
    #[brw(magic(1u8))]
    NoDialect(Smb1NoDialectResponse),
    #[brw(magic(17u8))]
    Extended(Smb1ExtendedNegotiateResponse),
    #[brw(magic(17u8))]
    Basic(Smb1BasicNegotiateResponse),
}

/// Sent when none of the offered dialects is acceptable.
#[binrw::binrw]
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Smb1NoDialectResponse {
    #[bw(calc = Self::DIALECT_INDEX_NONE)]
    #[br(assert(_dialect_index == Self::DIALECT_INDEX_NONE))]
    _dialect_index: u16,
    #[bw(calc = 0)]
    _byte_count: u16,
}

impl Smb1NoDialectResponse {
    pub const DIALECT_INDEX_NONE: u16 = 0xffff;
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Smb1ExtendedNegotiateResponse {
    pub dialect_index: u16,
    pub security_mode: Smb1SecurityMode,
    pub max_mpx_count: u16,
    pub max_number_vcs: u16,
    pub max_buffer_size: u32,
    pub max_raw_size: u32,
    pub session_key: u32,
    #[br(assert(capabilities.extended_security()))]
    pub capabilities: Smb1Capabilities,
    pub system_time: FileTime,
    pub server_time_zone: i16,
    #[bw(calc = 0)]
    #[br(assert(_challenge_length == 0))]
    _challenge_length: u8,
    #[bw(calc = PosMarker::default())]
    byte_count: PosMarker<u16>,
    #[br(map_stream = |s| s.take_seek(byte_count.value.into()))]
    #[bw(write_with = PosMarker::write_size, args(&byte_count))]
    pub payload: Smb1ExtendedSecurityPayload,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Smb1ExtendedSecurityPayload {
    pub server_guid: Guid,
    #[br(parse_with = binrw::helpers::until_eof)]
    pub security_blob: Vec<u8>,
}

/// A non-extended-security response: a raw challenge instead of a GSS blob.
#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Smb1BasicNegotiateResponse {
    pub dialect_index: u16,
    pub security_mode: Smb1SecurityMode,
    pub max_mpx_count: u16,
    pub max_number_vcs: u16,
    pub max_buffer_size: u32,
    pub max_raw_size: u32,
    pub session_key: u32,
    pub capabilities: Smb1Capabilities,
    pub system_time: FileTime,
    pub server_time_zone: i16,
    #[bw(try_calc(u8::try_from(challenge.len())))]
    challenge_length: u8,
    #[bw(try_calc(u16::try_from(challenge.len() + domain_name.len())))]
    byte_count: u16,
    #[br(count = challenge_length)]
    pub challenge: Vec<u8>,
    #[br(count = byte_count.saturating_sub(challenge_length.into()))]
    pub domain_name: Vec<u8>,
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct Smb1SecurityMode {
    pub user_security: bool,
    pub encrypt_passwords: bool,
    pub security_signatures_enabled: bool,
    pub security_signatures_required: bool,
    #[skip]
    __: B4,
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct Smb1Capabilities {
    pub raw_mode: bool,
    pub mpx_mode: bool,
    pub unicode: bool,
    pub large_files: bool,
    pub nt_smbs: bool,
    pub rpc_remote_apis: bool,
    pub status32: bool,
    pub level_ii_oplocks: bool,
    pub lock_and_read: bool,
    pub nt_find: bool,
    #[skip]
    __: B2,
    pub dfs: bool,
    pub infolevel_passthru: bool,
    pub large_readx: bool,
    pub large_writex: bool,
    pub lwio: bool,
    #[skip]
    __: B14,
    pub extended_security: bool,
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    pub fn test_smb1_negotiate_req_write() {
        let msg = Smb1NegotiateRequest::new(&[
            Smb1Dialect::NT_LM_0_12,
            Smb1Dialect::SMB_2_002,
            Smb1Dialect::SMB_2_WILDCARD,
        ]);
        let mut cursor = Cursor::new(Vec::new());
        msg.write(&mut cursor).unwrap();
        assert_eq!(
            cursor.into_inner(),
            [
                0xff, 0x53, 0x4d, 0x42, 0x72, 0x0, 0x0, 0x0, 0x0, 0x18, 0x53, 0xc8, 0x0, 0x0, 0x0,
                0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0xff, 0xff, 0x01, 0x00, 0x0, 0x0, 0x0,
                0x0, 0x0, 0x22, 0x0, 0x2, 0x4e, 0x54, 0x20, 0x4c, 0x4d, 0x20, 0x30, 0x2e, 0x31,
                0x32, 0x0, 0x2, 0x53, 0x4d, 0x42, 0x20, 0x32, 0x2e, 0x30, 0x30, 0x32, 0x0, 0x2,
                0x53, 0x4d, 0x42, 0x20, 0x32, 0x2e, 0x3f, 0x3f, 0x3f, 0x0
            ]
        )
    }

    #[test]
    pub fn test_smb1_negotiate_req_parse_offers() {
        let msg = Smb1NegotiateRequest::new(&[Smb1Dialect::NT_LM_0_12, Smb1Dialect::SMB_2_002]);
        let mut cursor = Cursor::new(Vec::new());
        msg.write(&mut cursor).unwrap();
        let parsed = Smb1NegotiateRequest::read(&mut Cursor::new(cursor.into_inner())).unwrap();
        assert!(parsed.offers(Smb1Dialect::SMB_2_002));
        assert!(!parsed.offers(Smb1Dialect::SMB_2_WILDCARD));
    }

    #[test]
    pub fn test_smb1_no_dialect_response_write() {
        let request = Smb1NegotiateRequest::new(&[Smb1Dialect::NT_LM_0_12]);
        let response = Smb1NegotiateResponse {
            header: Smb1Header::reply_to(&request.header),
            body: Smb1NegotiateResponseBody::NoDialect(Smb1NoDialectResponse::default()),
        };
        let mut cursor = Cursor::new(Vec::new());
        response.write(&mut cursor).unwrap();
        let data = cursor.into_inner();
        assert_eq!(data.len(), Smb1Header::SIZE + 5);
        assert_eq!(data[9], 0x98);
        assert_eq!(&data[Smb1Header::SIZE..], &[0x01, 0xff, 0xff, 0x00, 0x00]);
    }

    #[test]
    pub fn test_smb1_extended_response_parse() {
        let mut data = vec![
            0xff, 0x53, 0x4d, 0x42, 0x72, 0x0, 0x0, 0x0, 0x0, 0x98, 0x53, 0xc8, 0x0, 0x0, 0x0, 0x0,
            0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0xff, 0xff, 0x01, 0x00, 0x0, 0x0, 0x0, 0x0,
        ];
        data.extend_from_slice(&[
            0x11, // word count
            0x00, 0x00, // dialect index
            0x03, // security mode
            0x32, 0x00, 0x01, 0x00, // mpx, vcs
            0x04, 0x41, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, // max buffer, max raw
            0x00, 0x00, 0x00, 0x00, // session key
            0xfc, 0xe3, 0x01, 0x80, // capabilities
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // system time
            0x00, 0x00, // tz
            0x00, // challenge length
            0x14, 0x00, // byte count
        ]);
        data.extend_from_slice(&[0x11; 16]);
        data.extend_from_slice(&[0x60, 0x02, 0x01, 0x00]);

        let parsed = Smb1NegotiateResponse::read(&mut Cursor::new(&data)).unwrap();
        let body = match parsed.body {
            Smb1NegotiateResponseBody::Extended(body) => body,
            other => panic!("Unexpected body {:?}", other),
        };
        assert_eq!(body.dialect_index, 0);
        assert!(!body.security_mode.security_signatures_enabled());
        assert!(body.security_mode.encrypt_passwords());
        assert!(body.capabilities.extended_security());
        assert_eq!(body.max_buffer_size, 0x4104);
        assert_eq!(body.payload.server_guid, Guid::from([0x11; 16]));
        assert_eq!(body.payload.security_blob, vec![0x60, 0x02, 0x01, 0x00]);
    }
}
