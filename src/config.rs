use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use clap::Parser;

/// Connections beyond this many pending accepts are refused by the OS.
pub const LISTEN_BACKLOG: u32 = 50;

const MAX_PORT_DIGITS: usize = 4;

#[derive(Parser, Debug, Clone)]
#[command(name = "server", about = "Line-based chat relay")]
pub struct ServerConfig {
    /// IPv4 address to bind (0.0.0.0 for all interfaces)
    #[arg(long, default_value = "0.0.0.0")]
    pub addr: Ipv4Addr,

    /// TCP port, at most four digits
    #[arg(long, default_value = "8080", value_parser = parse_port)]
    pub port: u16,

    /// Relay lines from connections that never sent CONNECT:<name>
    #[arg(long)]
    pub lenient_handshake: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.addr, self.port))
    }

    pub fn handshake_policy(&self) -> HandshakePolicy {
        if self.lenient_handshake {
            HandshakePolicy::Lenient
        } else {
            HandshakePolicy::Strict
        }
    }
}

/// What a worker does when the first line is not `CONNECT:<name>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandshakePolicy {
    /// Close the connection without joining.
    #[default]
    Strict,
    /// Never join, but keep relaying the connection's lines. Un-joined
    /// peers stay out of the roster and get no join or leave notice.
    Lenient,
}

fn parse_port(s: &str) -> Result<u16, String> {
    if s.is_empty() || s.len() > MAX_PORT_DIGITS || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("port must be 1 to {MAX_PORT_DIGITS} digits (0-9999)"));
    }
    s.parse().map_err(|e| format!("invalid port: {e}"))
}
