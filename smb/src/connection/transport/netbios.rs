use std::{io::Cursor, time::Duration};

use super::{tcp::TcpTransport, SmbTransport};
use crate::{
    packets::netbios::{
        NBSSPacketHeader, NBSSPacketType, NBSSTrailer, NBSessionRequest, NetBiosName,
    },
    Error,
};
use binrw::{BinRead, BinWrite};

/// NetBIOS session service transport (port 139).
///
/// After the session request succeeds, session messages share the direct TCP framing,
/// so sending and receiving go straight to the TCP transport.
pub struct NetBiosTransport {
    tcp: TcpTransport,
    calling_name: NetBiosName,
}

impl NetBiosTransport {
    pub const CALLED_NAME: &'static str = "*SMBSERVER";
    pub const SERVER_SUFFIX: u8 = 0x20;

    pub fn new(timeout: Duration) -> NetBiosTransport {
        NetBiosTransport {
            tcp: TcpTransport::new(timeout),
            calling_name: NetBiosName::new("SMBCLIENT".to_string(), 0x0),
        }
    }

    /// Starts the underlying TCP connection, and sends NetBIOS session request and expects a session response.
    fn do_connect(&mut self, endpoint: &str) -> crate::Result<()> {
        log::debug!("Connecting to NetBIOS Session services TCP...");
        self.tcp.connect(endpoint)?;

        log::info!("Performing NetBIOS session setup...");
        self.netbios_session_setup()?;

        log::debug!("NetBIOS session setup completed.");
        Ok(())
    }

    fn netbios_session_setup(&mut self) -> crate::Result<()> {
        let session_request = NBSessionRequest {
            called_name: NetBiosName::new(Self::CALLED_NAME.to_string(), Self::SERVER_SUFFIX),
            calling_name: self.calling_name.clone(),
        };

        let mut req_buf = Vec::new();
        session_request.write(&mut Cursor::new(&mut req_buf))?;
        log::debug!("Sending NetBIOS session request");
        let mut header_cursor = Cursor::new([0u8; NBSSPacketHeader::SIZE]);
        let header = NBSSPacketHeader {
            ptype: NBSSPacketType::SessionRequest,
            flags: 0,
            length: req_buf.len().try_into()?,
        };
        header.write(&mut header_cursor)?;
        self.tcp.send_raw(header_cursor.into_inner().as_slice())?;
        self.tcp.send_raw(req_buf.as_slice())?;

        log::debug!("Waiting for NetBIOS session response");
        let header = self.netbios_receive_header()?;
        let mut result_packet = vec![0u8; header.length as usize];
        self.tcp.receive_exact(&mut result_packet)?;

        let nbss_packet =
            NBSSTrailer::read_args(&mut Cursor::new(&result_packet), (header.ptype,))?;

        match nbss_packet {
            NBSSTrailer::PositiveSessionResponse(_) => {
                log::debug!("NetBIOS session request succeeded.");
            }
            x => {
                return Err(Error::InvalidState(format!(
                    "Unexpected NetBIOS session response: {x:?}",
                )));
            }
        }

        Ok(())
    }

    fn netbios_receive_header(&mut self) -> crate::Result<NBSSPacketHeader> {
        let mut header = [0u8; NBSSPacketHeader::SIZE];
        self.tcp.receive_exact(&mut header)?;

        let header = NBSSPacketHeader::read(&mut Cursor::new(&header))?;
        Ok(header)
    }
}

impl SmbTransport for NetBiosTransport {
    fn connect(&mut self, endpoint: &str) -> crate::Result<()> {
        self.do_connect(endpoint)
    }

    fn default_port(&self) -> u16 {
        139
    }

    fn send_raw(&mut self, buf: &[u8]) -> crate::Result<()> {
        self.tcp.send_raw(buf)
    }

    fn receive_exact(&mut self, out_buf: &mut [u8]) -> crate::Result<()> {
        self.tcp.receive_exact(out_buf)
    }

    fn set_read_timeout(&self, timeout: Duration) -> crate::Result<()> {
        self.tcp.set_read_timeout(timeout)
    }
}
