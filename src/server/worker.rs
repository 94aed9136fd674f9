use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::HandshakePolicy;
use crate::error::{HandshakeError, RelayError, Result};
use crate::protocol;
use crate::server::hub::{ConnId, Hub, Participant};

/// Outbound line sink of one connection.
///
/// Lines are queued without bound and written in order by the connection's
/// write pump. A sink that was never attached to a pump drops every line.
#[derive(Clone, Default)]
pub struct Outbound {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn detached() -> Self {
        Self::default()
    }

    /// Fails only once the write pump has stopped.
    pub fn send_line(&self, line: &str) -> Result<()> {
        match &self.tx {
            Some(tx) => tx.send(line.to_owned()).map_err(|_| RelayError::PeerGone),
            None => Ok(()),
        }
    }
}

/// One accepted connection: handshake, relay, then leave.
pub struct Worker {
    id: ConnId,
    peer: SocketAddr,
    hub: Hub,
    policy: HandshakePolicy,
}

impl Worker {
    pub fn new(id: ConnId, peer: SocketAddr, hub: Hub, policy: HandshakePolicy) -> Self {
        Self { id, peer, hub, policy }
    }

    /// Starts the worker on its own task; the caller never waits for it.
    pub fn spawn(self, conn: TcpStream) -> JoinHandle<()> {
        tokio::spawn(self.run(conn))
    }

    async fn run(self, conn: TcpStream) {
        let (reader, writer) = conn.into_split();
        let (outbound, rx) = Outbound::channel();
        let pump = tokio::spawn(write_pump(self.id, writer, rx));
        let mut lines = BufReader::new(reader).lines();

        let mut joined = false;
        let relay = match read_handshake(&mut lines).await {
            Ok(name) => {
                let participant =
                    Participant::new(self.id, name, outbound).with_peer(self.peer);
                match self.hub.register(participant).await {
                    Ok(()) => {
                        joined = true;
                        true
                    }
                    Err(e) => {
                        warn!(conn = self.id, "join failed: {}", e);
                        false
                    }
                }
            }
            Err(RelayError::Handshake(HandshakeError::Malformed(line)))
                if self.policy == HandshakePolicy::Lenient =>
            {
                debug!(conn = self.id, first_line = %line, "relaying without join");
                drop(outbound);
                true
            }
            Err(e) => {
                debug!(conn = self.id, peer = %self.peer, "closing: {}", e);
                drop(outbound);
                false
            }
        };

        if relay {
            match relay_lines(&mut lines, &self.hub).await {
                Ok(()) => debug!(conn = self.id, "peer closed the stream"),
                Err(e) => debug!(conn = self.id, "connection ended: {}", e),
            }
        }

        if joined {
            if let Err(e) = self.hub.deregister(self.id).await {
                warn!(conn = self.id, "leave failed: {}", e);
            }
        }

        drop(lines);
        if let Err(e) = pump.await {
            warn!(conn = self.id, "write pump failed: {}", e);
        }
        info!(conn = self.id, peer = %self.peer, "connection closed");
    }
}

/// Reads the first line and returns the display name it carries.
pub async fn read_handshake<R>(lines: &mut Lines<R>) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let first = lines.next_line().await?.ok_or(HandshakeError::Closed)?;
    match protocol::parse_connect(&first) {
        Some(name) => Ok(name.to_owned()),
        None => Err(HandshakeError::Malformed(first).into()),
    }
}

/// Hands every line to the hub unmodified until end of stream.
pub async fn relay_lines<R>(lines: &mut Lines<R>, hub: &Hub) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        hub.broadcast(line).await?;
    }
    Ok(())
}

/// Writes `line` and a terminator, then flushes.
pub async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn write_pump(
    id: ConnId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = write_line(&mut writer, &line).await {
            debug!(conn = id, "write failed, dropping peer output: {}", e);
            break;
        }
    }
    rx.close();
    if let Err(e) = writer.shutdown().await {
        debug!(conn = id, "shutdown: {}", e);
    }
}
