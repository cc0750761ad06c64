//! Echo request and response messages
use binrw::prelude::*;

#[binrw::binrw]
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct EchoMessage {
    #[br(assert(_structure_size == 4))]
    #[bw(calc = 4)]
    _structure_size: u16,
    #[bw(calc = 0)]
    _reserved: u16,
}

pub type EchoRequest = EchoMessage;
pub type EchoResponse = EchoMessage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_echo_req_write() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        EchoRequest::default().write_le(&mut cursor).unwrap();
        assert_eq!(cursor.into_inner(), [0x4, 0x0, 0x0, 0x0])
    }
}
