pub mod echo;
pub mod encrypted;
pub mod error;
pub mod header;
pub mod negotiate;
pub mod plain;
pub mod session_setup;
pub mod tree_connect;

pub use echo::*;
pub use encrypted::*;
pub use error::*;
pub use header::*;
pub use negotiate::*;
pub use plain::*;
pub use session_setup::*;
pub use tree_connect::*;

#[cfg(test)]
pub use plain::tests::{decode_content, decode_request, encode_content, encode_request};
