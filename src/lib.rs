pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use config::{HandshakePolicy, ServerConfig};
pub use error::{HandshakeError, RelayError};
pub use server::hub::Hub;
pub use server::Server;
