use std::collections::BTreeMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::protocol;
use crate::server::worker::Outbound;

const HUB_QUEUE: usize = 256;

/// Monotonic per-connection id. Ordering by id is join order.
pub type ConnId = u64;

/// A joined connection as the hub sees it.
pub struct Participant {
    pub id: ConnId,
    pub name: String,
    pub peer: Option<SocketAddr>,
    pub outbound: Outbound,
    joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: ConnId, name: impl Into<String>, outbound: Outbound) -> Self {
        Self {
            id,
            name: name.into(),
            peer: None,
            outbound,
            joined_at: Utc::now(),
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }
}

enum HubCommand {
    Register(Participant),
    Deregister(ConnId),
    Broadcast(String),
    Roster(oneshot::Sender<Vec<String>>),
}

/// Handle to the hub task. Cloning is cheap; the task stops once every
/// handle is dropped.
///
/// Commands are applied one at a time in arrival order, so a roster line
/// always matches the set it was computed from, and a line is fully queued
/// to every peer before the next command starts.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawns the hub task on the current runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(HUB_QUEUE);
        tokio::spawn(run_hub(rx));
        Self { tx }
    }

    /// Adds `participant`, announces the join and redistributes the roster.
    pub async fn register(&self, participant: Participant) -> Result<()> {
        self.send(HubCommand::Register(participant)).await
    }

    /// Removes `id`, redistributes the roster and announces the leave.
    /// Unknown ids are ignored without broadcasting anything.
    pub async fn deregister(&self, id: ConnId) -> Result<()> {
        self.send(HubCommand::Deregister(id)).await
    }

    /// Queues `line` to every joined participant, the sender included.
    pub async fn broadcast(&self, line: String) -> Result<()> {
        self.send(HubCommand::Broadcast(line)).await
    }

    /// Current display names in roster order.
    pub async fn participants(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Roster(reply)).await?;
        rx.await.map_err(|_| RelayError::HubClosed)
    }

    async fn send(&self, cmd: HubCommand) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| RelayError::HubClosed)
    }
}

#[derive(Default)]
struct Members {
    by_id: BTreeMap<ConnId, Participant>,
}

impl Members {
    fn names(&self) -> impl Iterator<Item = &str> {
        self.by_id.values().map(|p| p.name.as_str())
    }

    fn broadcast(&self, line: &str) {
        info!(target: "relay::broadcast", "{}", line);
        for p in self.by_id.values() {
            if p.outbound.send_line(line).is_err() {
                debug!(conn = p.id, name = %p.name, "skipping peer whose writer is gone");
            }
        }
    }

    fn redistribute_roster(&self) {
        self.broadcast(&protocol::roster_line(self.names()));
    }
}

async fn run_hub(mut rx: mpsc::Receiver<HubCommand>) {
    let mut members = Members::default();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCommand::Register(p) => {
                info!(
                    conn = p.id,
                    name = %p.name,
                    peer = ?p.peer,
                    total = members.by_id.len() + 1,
                    "+participant"
                );
                let notice = protocol::join_notice(&p.name);
                members.by_id.insert(p.id, p);
                members.broadcast(&notice);
                members.redistribute_roster();
            }
            HubCommand::Deregister(id) => match members.by_id.remove(&id) {
                Some(p) => {
                    let session = Utc::now().signed_duration_since(p.joined_at);
                    info!(
                        conn = p.id,
                        name = %p.name,
                        session_secs = session.num_seconds(),
                        total = members.by_id.len(),
                        "-participant"
                    );
                    members.redistribute_roster();
                    members.broadcast(&protocol::leave_notice(&p.name));
                }
                None => debug!(conn = id, "deregister for unknown connection ignored"),
            },
            HubCommand::Broadcast(line) => members.broadcast(&line),
            HubCommand::Roster(reply) => {
                let names = members.names().map(str::to_owned).collect();
                reply.send(names).ok();
            }
        }
    }

    debug!("hub stopped");
}
