//! A blocking SMB2/3 server: accepts connections and runs each on its own thread.

use std::{
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::connection::transport::tcp::TcpTransport;

pub mod auth;
pub mod config;
pub mod connection;
pub mod negotiate;
pub mod session;

pub use auth::{AnonymousAuthProvider, AuthProvider};
pub use config::ServerConfig;
pub use connection::ServerConnection;

pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    provider: Arc<dyn AuthProvider>,
}

impl Server {
    /// Validates `config` and binds a listener to `address`.
    pub fn bind(
        address: impl ToSocketAddrs,
        config: ServerConfig,
        provider: Arc<dyn AuthProvider>,
    ) -> crate::Result<Server> {
        config.validate()?;
        let listener = TcpListener::bind(address)?;
        log::info!("Listening on {}.", listener.local_addr()?);
        Ok(Server {
            listener,
            config: Arc::new(config),
            provider,
        })
    }

    pub fn local_addr(&self) -> crate::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts connections forever. A failing connection only affects its own peer.
    pub fn serve(&self) -> crate::Result<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.spawn(stream) {
                        log::error!("Failed to start a connection handler: {}", e);
                    }
                }
                Err(e) => log::warn!("Failed to accept a connection: {}", e),
            }
        }
        Ok(())
    }

    /// Accepts a single connection and serves it on a new thread.
    pub fn accept(&self) -> crate::Result<JoinHandle<crate::Result<()>>> {
        let (stream, _) = self.listener.accept()?;
        self.spawn(stream)
    }

    fn spawn(&self, stream: TcpStream) -> crate::Result<JoinHandle<crate::Result<()>>> {
        let peer = stream.peer_addr()?.to_string();
        log::debug!("Accepted connection from {}.", peer);
        let timeout = self.config.read_timeout.unwrap_or(Duration::ZERO);
        let transport = TcpTransport::from_stream(stream, timeout)?;
        let connection = ServerConnection::new(
            Box::new(transport),
            peer.clone(),
            self.config.clone(),
            self.provider.clone(),
        );
        let handle = thread::Builder::new()
            .name(format!("smb-server-{}", peer))
            .spawn(move || connection.run())?;
        Ok(handle)
    }
}
