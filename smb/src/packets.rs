//! Wire formats: SMB1 negotiation, SMB2/3 messages, and transport framing.

pub mod binrw_util;
pub mod guid;
pub mod netbios;
pub mod smb1;
pub mod smb2;
pub mod transport;

/// The protocol a raw SMB packet claims to be, by its first four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolId {
    /// `\xffSMB`
    Smb1,
    /// `\xfeSMB`
    Smb2,
    /// `\xfdSMB`, an SMB3 transform header.
    Transform,
}

impl ProtocolId {
    pub fn of(packet: &[u8]) -> Option<ProtocolId> {
        match packet.get(..4)? {
            b"\xffSMB" => Some(ProtocolId::Smb1),
            b"\xfeSMB" => Some(ProtocolId::Smb2),
            b"\xfdSMB" => Some(ProtocolId::Transform),
            _ => None,
        }
    }

    /// Describes a packet's protocol and command byte, for diagnostics.
    pub fn describe(packet: &[u8]) -> String {
        match ProtocolId::of(packet) {
            Some(ProtocolId::Smb1) => match packet.get(4) {
                Some(cmd) => format!("SMB1 command {:#04x}", cmd),
                None => "truncated SMB1 packet".to_string(),
            },
            Some(ProtocolId::Smb2) => match packet.get(12..14) {
                Some(cmd) => format!("SMB2 command {:#06x}", u16::from_le_bytes([cmd[0], cmd[1]])),
                None => "truncated SMB2 packet".to_string(),
            },
            Some(ProtocolId::Transform) => "SMB3 transform header".to_string(),
            None => format!(
                "unknown protocol {:02x?}",
                &packet[..packet.len().min(4)]
            ),
        }
    }
}
