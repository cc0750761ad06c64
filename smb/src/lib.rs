pub mod connection;
pub mod crypto;
pub mod dialects;
pub mod error;
pub mod msg_handler;
pub mod packets;
pub mod server;
pub mod session;

pub use connection::{Connection, ConnectionConfig, ProtocolFamily};
pub use error::Error;
pub use server::{Server, ServerConfig};
pub use session::Session;

pub type Result<T> = std::result::Result<T, crate::Error>;
