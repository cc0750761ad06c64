use std::net::{SocketAddr, ToSocketAddrs};

pub struct TransportUtils;

impl TransportUtils {
    pub fn parse_socket_address(address: &str) -> crate::Result<SocketAddr> {
        let mut socket_addrs = address
            .to_socket_addrs()
            .map_err(|_| crate::Error::InvalidAddress(address.to_string()))?;
        socket_addrs
            .next()
            .ok_or(crate::Error::InvalidAddress(address.to_string()))
    }

    /// The host part of `host[:port]`.
    pub fn get_server_name(address: &str) -> crate::Result<String> {
        let server_name = address
            .split(':')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(crate::Error::InvalidAddress(address.to_string()))?;
        Ok(server_name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name() {
        assert_eq!(
            TransportUtils::get_server_name("fileserver:445").unwrap(),
            "fileserver"
        );
        assert_eq!(TransportUtils::get_server_name("host").unwrap(), "host");
        assert!(TransportUtils::get_server_name("").is_err());
    }

    #[test]
    fn test_parse_socket_address() {
        let addr = TransportUtils::parse_socket_address("127.0.0.1:445").unwrap();
        assert_eq!(addr.port(), 445);
        assert!(TransportUtils::parse_socket_address("not an address").is_err());
    }
}
