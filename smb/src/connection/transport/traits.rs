use binrw::{BinRead, BinWrite};
use std::io::Cursor;

use crate::packets::transport::SmbTcpMessageHeader;

/// A blocking, connected byte stream carrying whole SMB messages.
pub trait SmbTransport: Send {
    fn connect(&mut self, endpoint: &str) -> crate::Result<()>;

    fn default_port(&self) -> u16;

    fn send_raw(&mut self, buf: &[u8]) -> crate::Result<()>;

    fn receive_exact(&mut self, out_buf: &mut [u8]) -> crate::Result<()>;

    /// Sets the read timeout for the connection. Zero means blocking forever.
    fn set_read_timeout(&self, timeout: std::time::Duration) -> crate::Result<()>;

    /// Use this method to send a SMB message to the server.
    /// This sends the message itself, adding the transport header.
    fn send(&mut self, message: &[u8]) -> crate::Result<()> {
        let length = u32::try_from(message.len())?;
        if length > SmbTcpMessageHeader::MAX_LENGTH {
            return Err(crate::Error::InvalidMessage(format!(
                "Message of {length} bytes does not fit the transport header"
            )));
        }
        // Transport Header
        let header = SmbTcpMessageHeader {
            stream_protocol_length: length,
        };
        let mut header_buf = Vec::with_capacity(SmbTcpMessageHeader::SIZE);
        header.write(&mut Cursor::new(&mut header_buf))?;
        self.send_raw(&header_buf)?;

        log::trace!("Sending SMB message of {} bytes: {:02x?}", message.len(), message);

        // Content - final response.
        self.send_raw(message)
    }

    /// Use this method to receive a SMB message from the server.
    /// This returns the message itself, dropping the transport header.
    fn receive(&mut self) -> crate::Result<Vec<u8>> {
        // Transport Header
        let mut header_data = [0; SmbTcpMessageHeader::SIZE];
        self.receive_exact(&mut header_data)?;
        let header = SmbTcpMessageHeader::read(&mut Cursor::new(header_data))?;

        // Content - final response.
        let mut data = vec![0; header.stream_protocol_length as usize];
        self.receive_exact(&mut data)?;

        log::trace!(
            "Received SMB message of {} bytes: {:02x?}",
            data.len(),
            data
        );

        Ok(data)
    }
}

#[cfg(test)]
pub mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;

    /// An in-memory transport: replays scripted inbound messages and records outbound ones.
    #[derive(Default)]
    pub struct ScriptedTransport {
        inbound: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ScriptedTransport {
        pub fn new(inbound: Vec<Vec<u8>>) -> Self {
            Self {
                inbound: inbound.into(),
                ..Default::default()
            }
        }

        /// A handle to the messages sent so far, usable after the transport was boxed.
        pub fn sent_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
            self.sent.clone()
        }
    }

    impl SmbTransport for ScriptedTransport {
        fn connect(&mut self, _endpoint: &str) -> crate::Result<()> {
            Ok(())
        }

        fn default_port(&self) -> u16 {
            445
        }

        fn send_raw(&mut self, _buf: &[u8]) -> crate::Result<()> {
            Ok(())
        }

        fn receive_exact(&mut self, _out_buf: &mut [u8]) -> crate::Result<()> {
            Err(crate::Error::NotConnected)
        }

        fn set_read_timeout(&self, _timeout: std::time::Duration) -> crate::Result<()> {
            Ok(())
        }

        fn send(&mut self, message: &[u8]) -> crate::Result<()> {
            self.sent.lock().unwrap().push(message.to_vec());
            Ok(())
        }

        fn receive(&mut self) -> crate::Result<Vec<u8>> {
            self.inbound.pop_front().ok_or(crate::Error::NotConnected)
        }
    }
}
