use super::traits::SmbTransport;
use std::{
    io::{self, Read, Write},
    net::TcpStream,
    time::Duration,
};

pub struct TcpTransport {
    stream: Option<TcpStream>,
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> TcpTransport {
        TcpTransport {
            stream: None,
            timeout,
        }
    }

    /// Wraps an already connected stream, such as one accepted by a listener.
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> crate::Result<TcpTransport> {
        let transport = TcpTransport {
            stream: Some(stream),
            timeout,
        };
        transport.set_read_timeout(timeout)?;
        Ok(transport)
    }

    /// Connects to a server in the specified address with a timeout.
    fn connect_timeout(&mut self, address: &str) -> crate::Result<TcpStream> {
        use super::utils::TransportUtils;

        if self.timeout == Duration::ZERO {
            log::debug!("Connecting to {}.", address);
            return TcpStream::connect(address).map_err(Into::into);
        }

        log::debug!("Connecting to {} with timeout {:?}.", address, self.timeout);
        // convert to SocketAddr:
        let address = TransportUtils::parse_socket_address(address)?;
        TcpStream::connect_timeout(&address, self.timeout).map_err(Into::into)
    }

    /// Gets the read timeout for the connection.
    pub fn read_timeout(&self) -> crate::Result<Option<Duration>> {
        self.stream
            .as_ref()
            .ok_or(crate::Error::NotConnected)?
            .read_timeout()
            .map_err(|e| e.into())
    }

    /// The address of the connected peer.
    pub fn peer_addr(&self) -> crate::Result<std::net::SocketAddr> {
        self.stream
            .as_ref()
            .ok_or(crate::Error::NotConnected)?
            .peer_addr()
            .map_err(|e| e.into())
    }

    /// Maps a TCP error to a crate error.
    /// Connection aborts and unexpected EOFs are mapped to [crate::Error::NotConnected].
    #[inline]
    fn map_tcp_error(e: io::Error) -> crate::Error {
        if e.kind() == io::ErrorKind::ConnectionAborted
            || e.kind() == io::ErrorKind::ConnectionReset
            || e.kind() == io::ErrorKind::UnexpectedEof
        {
            log::debug!("Got IO error: {} -- Connection Error, notify NotConnected!", e);
            return crate::Error::NotConnected;
        }
        if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
            log::debug!("Got IO error: {} -- read timed out.", e);
        } else {
            log::error!("Got IO error: {} -- Mapping to IO error.", e);
        }
        e.into()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Shuts the socket down in both directions. Further I/O fails with [crate::Error::NotConnected].
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl SmbTransport for TcpTransport {
    fn connect(&mut self, address: &str) -> crate::Result<()> {
        let socket = self.connect_timeout(address)?;
        self.stream = Some(socket);
        self.set_read_timeout(self.timeout)
    }

    fn default_port(&self) -> u16 {
        445
    }

    fn send_raw(&mut self, message: &[u8]) -> crate::Result<()> {
        let writer = self.stream.as_mut().ok_or(crate::Error::NotConnected)?;
        writer.write_all(message).map_err(Self::map_tcp_error)?;
        Ok(())
    }

    fn receive_exact(&mut self, out_buf: &mut [u8]) -> crate::Result<()> {
        let reader = self.stream.as_mut().ok_or(crate::Error::NotConnected)?;
        log::trace!("Reading {} bytes.", out_buf.len());
        reader.read_exact(out_buf).map_err(Self::map_tcp_error)?;
        log::trace!("Read {} bytes OK.", out_buf.len());
        Ok(())
    }

    fn set_read_timeout(&self, timeout: Duration) -> crate::Result<()> {
        let timeout = if timeout == Duration::ZERO {
            None
        } else {
            Some(timeout)
        };
        self.stream
            .as_ref()
            .ok_or(crate::Error::NotConnected)?
            .set_read_timeout(timeout)
            .map_err(|e| e.into())
    }
}
