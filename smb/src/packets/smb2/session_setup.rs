use binrw::prelude::*;
use modular_bitfield::prelude::*;

use crate::packets::binrw_util::prelude::*;

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SessionSetupRequest {
    #[bw(calc = 25)]
    #[br(assert(_structure_size == 25))]
    _structure_size: u16,
    pub flags: SetupRequestFlags,
    pub security_mode: SessionSecurityMode,
    pub capabilities: NegotiateCapabilities,
    #[bw(calc = 0)]
    _channel: u32,
    #[bw(calc = PosMarker::default())]
    security_buffer_offset: PosMarker<u16>,
    #[bw(calc = PosMarker::default())]
    security_buffer_length: PosMarker<u16>,
    pub previous_session_id: u64,
    #[br(count = security_buffer_length.value, seek_before = security_buffer_offset.seek_absolute())]
    #[bw(write_with = PosMarker::write_aoff_size, args(&security_buffer_offset, &security_buffer_length))]
    pub buffer: Vec<u8>,
}

impl SessionSetupRequest {
    pub fn new(buffer: Vec<u8>, security_mode: SessionSecurityMode) -> SessionSetupRequest {
        SessionSetupRequest {
            flags: SetupRequestFlags::new(),
            security_mode,
            capabilities: NegotiateCapabilities::new().with_dfs(true),
            previous_session_id: 0,
            buffer,
        }
    }
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct SessionSecurityMode {
    pub signing_enabled: bool,
    pub signing_required: bool,
    #[skip]
    __: B6,
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct SetupRequestFlags {
    pub binding: bool,
    #[skip]
    __: B7,
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct NegotiateCapabilities {
    pub dfs: bool,
    #[skip]
    __: B31,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SessionSetupResponse {
    #[bw(calc = 9)]
    #[br(assert(_structure_size == 9))]
    _structure_size: u16,
    pub session_flags: SessionFlags,
    #[bw(calc = PosMarker::default())]
    security_buffer_offset: PosMarker<u16>,
    #[bw(calc = PosMarker::default())]
    security_buffer_length: PosMarker<u16>,
    #[br(count = security_buffer_length.value, seek_before = security_buffer_offset.seek_absolute())]
    #[bw(write_with = PosMarker::write_aoff_size, args(&security_buffer_offset, &security_buffer_length))]
    pub buffer: Vec<u8>,
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct SessionFlags {
    pub is_guest: bool,
    pub is_null_session: bool,
    pub encrypt_data: bool,
    #[skip]
    __: B13,
}

#[binrw::binrw]
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct LogoffRequest {
    #[bw(calc = 4)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    _reserved: u16,
}

#[binrw::binrw]
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct LogoffResponse {
    #[bw(calc = 4)]
    #[br(assert(_structure_size == 4))]
    _structure_size: u16,
    #[bw(calc = 0)]
    _reserved: u16,
}

#[cfg(test)]
mod tests {
    use crate::packets::smb2::*;

    use super::*;

    #[test]
    pub fn test_setup_req_write() {
        let data = encode_content(RequestContent::SessionSetup(SessionSetupRequest::new(
            vec![0x60, 0x48, 0x06, 0x06],
            SessionSecurityMode::new().with_signing_enabled(true),
        )));
        assert_eq!(
            data,
            [
                0x19, 0x0, 0x0, 0x1, 0x1, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x58, 0x0, 0x4, 0x0,
                0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x60, 0x48, 0x06, 0x06
            ]
        );
    }

    #[test]
    pub fn test_setup_resp_parse() {
        let data = [
            0xfe, 0x53, 0x4d, 0x42, 0x40, 0x0, 0x1, 0x0, 0x16, 0x0, 0x0, 0xc0, 0x1, 0x0, 0x1, 0x0,
            0x1, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x1, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0,
            0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x29, 0x0, 0x0, 0x3c, 0x0, 0x40, 0x0, 0x0, 0x0,
            0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x9, 0x0,
            0x4, 0x0, 0x48, 0x0, 0x3, 0x0, 0xa1, 0x01, 0x00,
        ];
        let msg = decode_content(&data);
        assert_eq!(msg.header.status, Status::U32_MORE_PROCESSING_REQUIRED);
        assert_eq!(
            msg.content.to_session_setup().unwrap(),
            SessionSetupResponse {
                session_flags: SessionFlags::new().with_encrypt_data(true),
                buffer: vec![0xa1, 0x01, 0x00],
            }
        );
    }
}
