use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The listening endpoint could not be opened. Fatal for the server.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("hub is no longer running")]
    HubClosed,

    #[error("peer writer has stopped")]
    PeerGone,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("stream closed before the first line")]
    Closed,

    #[error("expected CONNECT:<name>, got {0:?}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
