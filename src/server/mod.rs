pub mod hub;
pub mod worker;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tracing::{info, warn};

use crate::config::{HandshakePolicy, LISTEN_BACKLOG};
use crate::error::{RelayError, Result};
use hub::Hub;
use worker::Worker;

/// Pause after a failed accept so a persistent OS error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// Accept loop plus the hub it feeds.
///
/// Every accepted connection gets its own worker task. There is no cap on
/// the number of concurrent connections and no backpressure toward peers.
pub struct Server {
    hub: Hub,
    policy: HandshakePolicy,
    conn_counter: AtomicU64,
}

impl Server {
    /// Must be called inside a tokio runtime; spawns the hub task.
    pub fn new(policy: HandshakePolicy) -> Self {
        Self {
            hub: Hub::spawn(),
            policy,
            conn_counter: AtomicU64::new(0),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Opens the listening endpoint with the fixed backlog.
    pub fn bind(addr: SocketAddr) -> Result<TcpListener> {
        let bind_err = |source: std::io::Error| RelayError::Bind { addr, source };
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_err)
    }

    pub async fn listen_and_serve(&self, addr: SocketAddr) -> Result<()> {
        let listener = Self::bind(addr)?;
        self.serve(listener).await;
        Ok(())
    }

    /// Runs the accept loop until the future is dropped. Accept errors are
    /// logged and never end the loop.
    pub async fn serve(&self, listener: TcpListener) {
        match listener.local_addr() {
            Ok(local) => info!("listening on {}", local),
            Err(e) => warn!("listening on unknown address: {}", e),
        }

        loop {
            match listener.accept().await {
                Ok((conn, peer)) => {
                    let id = self.conn_counter.fetch_add(1, Ordering::Relaxed);
                    info!(conn = id, %peer, "accepted");
                    let worker = Worker::new(id, peer, self.hub.clone(), self.policy);
                    worker.spawn(conn);
                }
                Err(e) => {
                    warn!("accept error: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                }
            }
        }
    }
}
