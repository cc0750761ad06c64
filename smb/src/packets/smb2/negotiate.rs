use binrw::io::TakeSeekExt;
use binrw::prelude::*;
use modular_bitfield::prelude::*;

use crate::Error;

use crate::packets::{binrw_util::prelude::*, guid::Guid};

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NegotiateRequest {
    #[bw(calc = 0x24)]
    #[br(assert(_structure_size == 0x24))]
    _structure_size: u16,
    #[bw(try_calc(u16::try_from(dialects.len())))]
    dialect_count: u16,
    pub security_mode: NegotiateSecurityMode,
    #[bw(calc = 0)]
    _reserved: u16,
    pub capabilities: GlobalCapabilities,
    pub client_guid: Guid,

    // ClientStartTime on dialects below 3.1.1.
    #[bw(calc = PosMarker::default())]
    negotiate_context_offset: PosMarker<u32>,
    #[bw(try_calc(u16::try_from(negotiate_context_list.as_ref().map(|v| v.len()).unwrap_or(0))))]
    negotiate_context_count: u16,
    #[bw(calc = 0)]
    _reserved2: u16,
    #[br(count = dialect_count)]
    pub dialects: Vec<Dialect>,
    // Only clients offering 3.1.1 carry negotiate contexts, 8-byte aligned.
    #[brw(if(dialects.contains(&Dialect::Smb0311)), align_before = 8)]
    #[br(count = negotiate_context_count, seek_before = negotiate_context_offset.seek_absolute())]
    #[bw(write_with = PosMarker::write_aoff, args(&negotiate_context_offset))]
    pub negotiate_context_list: Option<Vec<NegotiateContext>>,
}

impl NegotiateContexts for NegotiateRequest {
    fn contexts(&self) -> &[NegotiateContext] {
        self.negotiate_context_list.as_deref().unwrap_or_default()
    }
}

#[bitfield]
#[derive(BinRead, BinWrite, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct NegotiateSecurityMode {
    pub signing_enabled: bool,
    pub signing_required: bool,
    #[skip]
    __: B14,
}

#[bitfield]
#[derive(BinRead, BinWrite, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct GlobalCapabilities {
    pub dfs: bool,
    pub leasing: bool,
    pub large_mtu: bool,
    pub multi_channel: bool,

    pub persistent_handles: bool,
    pub directory_leasing: bool,
    pub encryption: bool,
    pub notifications: bool,

    #[skip]
    __: B24,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NegotiateResponse {
    #[br(assert(_structure_size == 0x41))]
    #[bw(calc = 0x41)]
    _structure_size: u16,
    pub security_mode: NegotiateSecurityMode,
    pub dialect_revision: NegotiateDialect,
    #[bw(try_calc(u16::try_from(negotiate_context_list.as_ref().map(|v| v.len()).unwrap_or(0))))]
    negotiate_context_count: u16,
    pub server_guid: Guid,
    pub capabilities: GlobalCapabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: FileTime,
    pub server_start_time: FileTime,
    #[bw(calc = PosMarker::default())]
    security_buffer_offset: PosMarker<u16>,
    #[bw(calc = PosMarker::default())]
    security_buffer_length: PosMarker<u16>,
    #[bw(calc = PosMarker::default())]
    negotiate_context_offset: PosMarker<u32>,
    #[br(count = security_buffer_length.value, seek_before = security_buffer_offset.seek_absolute())]
    #[bw(write_with = PosMarker::write_aoff_size, args(&security_buffer_offset, &security_buffer_length))]
    pub buffer: Vec<u8>,

    // A missing or empty list under 3.1.1 is reported by the negotiation engine, not here.
    #[brw(if(matches!(dialect_revision, NegotiateDialect::Smb0311)), align_before = 8)]
    #[br(count = negotiate_context_count, seek_before = negotiate_context_offset.seek_absolute())]
    #[bw(write_with = PosMarker::write_aoff, args(&negotiate_context_offset))]
    pub negotiate_context_list: Option<Vec<NegotiateContext>>,
}

impl NegotiateContexts for NegotiateResponse {
    fn contexts(&self) -> &[NegotiateContext] {
        self.negotiate_context_list.as_deref().unwrap_or_default()
    }
}

/// Typed lookups over the negotiate context list of a request or a response.
/// Each lookup returns the first context of its type.
pub trait NegotiateContexts {
    fn contexts(&self) -> &[NegotiateContext];

    fn preauth_integrity_ctx(&self) -> Option<&PreauthIntegrityCapabilities> {
        self.contexts()
            .iter()
            .find_map(|c| c.data.as_preauth_integrity_capabilities())
    }

    fn encryption_ctx(&self) -> Option<&EncryptionCapabilities> {
        self.contexts()
            .iter()
            .find_map(|c| c.data.as_encryption_capabilities())
    }

    fn compression_ctx(&self) -> Option<&CompressionCapabilities> {
        self.contexts()
            .iter()
            .find_map(|c| c.data.as_compression_capabilities())
    }

    fn netname_ctx(&self) -> Option<&NetnameNegotiateContextId> {
        self.contexts()
            .iter()
            .find_map(|c| c.data.as_netname_negotiate_context_id())
    }
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Hash)]
#[brw(repr(u16))]
pub enum Dialect {
    Smb0202 = 0x0202,
    Smb021 = 0x0210,
    Smb030 = 0x0300,
    Smb0302 = 0x0302,
    Smb0311 = 0x0311,
}

impl Dialect {
    pub const MAX: Dialect = Dialect::Smb0311;
    pub const MIN: Dialect = Dialect::Smb0202;
    pub const ALL: [Dialect; 5] = [
        Dialect::Smb0202,
        Dialect::Smb021,
        Dialect::Smb030,
        Dialect::Smb0302,
        Dialect::Smb0311,
    ];

    #[inline]
    pub fn is_smb3(&self) -> bool {
        matches!(self, Dialect::Smb030 | Dialect::Smb0302 | Dialect::Smb0311)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", *self as u16)
    }
}

/// Dialects that may appear in the SMB negotiate response.
/// The same as [Dialect] but with a wildcard for SMB 2.0.
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u16))]
pub enum NegotiateDialect {
    Smb0202 = Dialect::Smb0202 as isize,
    Smb021 = Dialect::Smb021 as isize,
    Smb030 = Dialect::Smb030 as isize,
    Smb0302 = Dialect::Smb0302 as isize,
    Smb0311 = Dialect::Smb0311 as isize,
    Smb02Wildcard = 0x02FF,
}

impl std::fmt::Display for NegotiateDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", *self as u16)
    }
}

impl From<Dialect> for NegotiateDialect {
    fn from(value: Dialect) -> Self {
        match value {
            Dialect::Smb0202 => NegotiateDialect::Smb0202,
            Dialect::Smb021 => NegotiateDialect::Smb021,
            Dialect::Smb030 => NegotiateDialect::Smb030,
            Dialect::Smb0302 => NegotiateDialect::Smb0302,
            Dialect::Smb0311 => NegotiateDialect::Smb0311,
        }
    }
}

impl TryFrom<NegotiateDialect> for Dialect {
    type Error = Error;

    fn try_from(value: NegotiateDialect) -> Result<Self, Self::Error> {
        match value {
            NegotiateDialect::Smb0202 => Ok(Dialect::Smb0202),
            NegotiateDialect::Smb021 => Ok(Dialect::Smb021),
            NegotiateDialect::Smb030 => Ok(Dialect::Smb030),
            NegotiateDialect::Smb0302 => Ok(Dialect::Smb0302),
            NegotiateDialect::Smb0311 => Ok(Dialect::Smb0311),
            _ => Err(Error::UnsupportedDialect(value)),
        }
    }
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NegotiateContext {
    // The entire context is 8-byte aligned.
    #[brw(align_before = 8)]
    pub context_type: NegotiateContextType,
    #[bw(calc = PosMarker::default())]
    data_length: PosMarker<u16>,
    #[bw(calc = 0)]
    _reserved: u32,
    #[br(args(&context_type))]
    #[br(map_stream = |s| s.take_seek(data_length.value as u64))]
    #[bw(write_with = PosMarker::write_size, args(&data_length))]
    pub data: NegotiateContextValue,
}

macro_rules! negotiate_context_type {
    ($($name:ident = $id:literal,)+) => {
#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u16))]
pub enum NegotiateContextType {
    $(
        $name = $id,
    )+
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone)]
#[br(import(context_type: &NegotiateContextType))]
pub enum NegotiateContextValue {
    $(
        #[br(pre_assert(context_type == &NegotiateContextType::$name))]
        $name($name),
    )+
}

impl NegotiateContextValue {
    pub fn get_matching_type(&self) -> NegotiateContextType {
        match self {
            $(
                NegotiateContextValue::$name(_) => {
                    NegotiateContextType::$name
                }
            )+
        }
    }

    paste::paste! {
        $(
            pub fn [<as_ $name:snake>](&self) -> Option<&$name> {
                match self {
                    NegotiateContextValue::$name(v) => Some(v),
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        )+
    }
}
    };
}

negotiate_context_type!(
    PreauthIntegrityCapabilities = 0x0001,
    EncryptionCapabilities = 0x0002,
    CompressionCapabilities = 0x0003,
    NetnameNegotiateContextId = 0x0005,
    TransportCapabilities = 0x0006,
    RdmaTransformCapabilities = 0x0007,
    SigningCapabilities = 0x0008,
);

impl From<NegotiateContextValue> for NegotiateContext {
    fn from(val: NegotiateContextValue) -> Self {
        NegotiateContext {
            context_type: val.get_matching_type(),
            data: val,
        }
    }
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u16))]
pub enum HashAlgorithm {
    Sha512 = 0x01,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PreauthIntegrityCapabilities {
    #[bw(try_calc(u16::try_from(hash_algorithms.len())))]
    hash_algorithm_count: u16,
    #[bw(try_calc(u16::try_from(salt.len())))]
    salt_length: u16,
    #[br(count = hash_algorithm_count)]
    pub hash_algorithms: Vec<HashAlgorithm>,
    #[br(count = salt_length)]
    pub salt: Vec<u8>,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EncryptionCapabilities {
    #[bw(try_calc(u16::try_from(ciphers.len())))]
    cipher_count: u16,
    #[br(count = cipher_count)]
    pub ciphers: Vec<EncryptionCipher>,
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u16))]
pub enum EncryptionCipher {
    Aes128Ccm = 0x0001,
    Aes128Gcm = 0x0002,
    Aes256Ccm = 0x0003,
    Aes256Gcm = 0x0004,
}

impl std::fmt::Display for EncryptionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EncryptionCipher::Aes128Ccm => "AES-128-CCM",
            EncryptionCipher::Aes128Gcm => "AES-128-GCM",
            EncryptionCipher::Aes256Ccm => "AES-256-CCM",
            EncryptionCipher::Aes256Gcm => "AES-256-GCM",
        };
        write!(f, "{} ({:#x})", name, *self as u16)
    }
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CompressionCapabilities {
    #[bw(try_calc(u16::try_from(compression_algorithms.len())))]
    compression_algorithm_count: u16,
    #[bw(calc = 0)]
    _padding: u16,
    pub flags: CompressionCapsFlags,
    #[br(count = compression_algorithm_count)]
    pub compression_algorithms: Vec<CompressionAlgorithm>,
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u16))]
pub enum CompressionAlgorithm {
    None = 0x0000,
    LZNT1 = 0x0001,
    LZ77 = 0x0002,
    LZ77Huffman = 0x0003,
    PatternV1 = 0x0004,
    LZ4 = 0x0005,
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message_as_string = match self {
            CompressionAlgorithm::None => "None",
            CompressionAlgorithm::LZNT1 => "LZNT1",
            CompressionAlgorithm::LZ77 => "LZ77",
            CompressionAlgorithm::LZ77Huffman => "LZ77+Huffman",
            CompressionAlgorithm::PatternV1 => "PatternV1",
            CompressionAlgorithm::LZ4 => "LZ4",
        };
        write!(f, "{} ({:#x})", message_as_string, *self as u16)
    }
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct CompressionCapsFlags {
    pub chained: bool,
    #[skip]
    __: B31,
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone)]
pub struct NetnameNegotiateContextId {
    #[br(parse_with = binrw::helpers::until_eof)]
    pub netname: SizedWideString,
}

#[bitfield]
#[derive(BinWrite, BinRead, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[bw(map = |&x| Self::into_bytes(x))]
#[br(map = Self::from_bytes)]
pub struct TransportCapabilities {
    pub accept_transport_layer_security: bool,
    #[skip]
    __: B31,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RdmaTransformCapabilities {
    #[bw(try_calc(u16::try_from(transforms.len())))]
    transform_count: u16,
    #[bw(calc = 0)]
    _reserved1: u16,
    #[bw(calc = 0)]
    _reserved2: u32,
    #[br(count = transform_count)]
    pub transforms: Vec<u16>,
}

#[binrw::binrw]
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SigningCapabilities {
    #[bw(try_calc(u16::try_from(signing_algorithms.len())))]
    signing_algorithm_count: u16,
    #[br(count = signing_algorithm_count)]
    pub signing_algorithms: Vec<SigningAlgorithmId>,
}

#[derive(BinRead, BinWrite, Debug, PartialEq, Eq, Clone, Copy)]
#[brw(repr(u16))]
pub enum SigningAlgorithmId {
    HmacSha256 = 0x0000,
    AesCmac = 0x0001,
    AesGmac = 0x0002,
}
