//! End-to-end relay behaviour over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use relay::protocol::{self, Message};
use relay::{HandshakePolicy, RelayError, Server};

const WAIT: Duration = Duration::from_secs(5);

async fn start(policy: HandshakePolicy) -> (SocketAddr, Arc<Server>) {
    let listener = Server::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(policy));
    let srv = server.clone();
    tokio::spawn(async move { srv.serve(listener).await });
    (addr, server)
}

/// Polls the hub until the roster has `n` entries.
async fn wait_for_roster(server: &Server, n: usize) -> Vec<String> {
    timeout(WAIT, async {
        loop {
            let names = server.hub().participants().await.unwrap();
            if names.len() == n {
                return names;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("roster never reached the expected size")
}

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Connects, joins and consumes the joiner's own join notice and roster.
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut c = Self::connect(addr).await;
        c.send(&protocol::connect_line(name)).await;
        assert_eq!(c.recv().await, protocol::join_notice(name));
        assert!(c.recv().await.starts_with(protocol::PARTICIPANTS_PREFIX));
        c
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("stream closed")
    }

    async fn recv_until(&mut self, wanted: &str) {
        while self.recv().await != wanted {}
    }

    async fn expect_closed(&mut self) {
        let next = timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for close");
        assert!(matches!(next, Ok(None) | Err(_)), "got {next:?}");
    }
}

#[tokio::test]
async fn roster_tracks_joins_and_leaves_in_order() {
    let (addr, server) = start(HandshakePolicy::Strict).await;

    let mut ann = Client::join(addr, "Ann").await;
    let bob = Client::join(addr, "Bob").await;
    let mut cleo = Client::connect(addr).await;
    cleo.send("CONNECT:Cleo").await;
    assert_eq!(cleo.recv().await, "SYSTEM: Cleo hat den Chat betreten.");
    assert_eq!(cleo.recv().await, "PARTICIPANTS: Ann, Bob, Cleo, ");

    ann.recv_until("PARTICIPANTS: Ann, Bob, Cleo, ").await;
    drop(bob);

    assert_eq!(ann.recv().await, "PARTICIPANTS: Ann, Cleo, ");
    assert_eq!(ann.recv().await, "SYSTEM: Bob hat den Chat verlassen.");
    assert_eq!(cleo.recv().await, "PARTICIPANTS: Ann, Cleo, ");
    assert_eq!(wait_for_roster(&server, 2).await, vec!["Ann", "Cleo"]);
}

#[tokio::test]
async fn chat_line_reaches_everyone_including_sender() {
    let (addr, _server) = start(HandshakePolicy::Strict).await;
    let mut ann = Client::join(addr, "Ann").await;
    let mut bob = Client::join(addr, "Bob").await;
    ann.recv_until("PARTICIPANTS: Ann, Bob, ").await;

    ann.send("Ann: Hallo  zusammen ").await;
    assert_eq!(ann.recv().await, "Ann: Hallo  zusammen ");
    assert_eq!(bob.recv().await, "Ann: Hallo  zusammen ");
}

#[tokio::test]
async fn image_lines_are_relayed_verbatim() {
    let (addr, _server) = start(HandshakePolicy::Strict).await;
    let mut ann = Client::join(addr, "Ann").await;
    let mut bob = Client::join(addr, "Bob").await;
    ann.recv_until("PARTICIPANTS: Ann, Bob, ").await;

    ann.send("IMAGE:Ann:AAAB==").await;
    for client in [&mut ann, &mut bob] {
        let line = client.recv().await;
        assert_eq!(line, "IMAGE:Ann:AAAB==");
        assert_eq!(
            Message::classify(&line),
            Message::Image {
                sender: "Ann",
                base64: "AAAB==",
            }
        );
    }
}

#[tokio::test]
async fn connection_without_handshake_never_joins() {
    let (addr, server) = start(HandshakePolicy::Strict).await;
    let mut ann = Client::join(addr, "Ann").await;

    let mut stranger = Client::connect(addr).await;
    stranger.send("Eve: hi").await;
    stranger.expect_closed().await;

    let silent = Client::connect(addr).await;
    drop(silent);

    let _bob = Client::join(addr, "Bob").await;
    assert_eq!(ann.recv().await, "SYSTEM: Bob hat den Chat betreten.");
    assert_eq!(ann.recv().await, "PARTICIPANTS: Ann, Bob, ");
    assert_eq!(wait_for_roster(&server, 2).await, vec!["Ann", "Bob"]);
}

#[tokio::test]
async fn lenient_handshake_relays_without_joining() {
    let (addr, server) = start(HandshakePolicy::Lenient).await;
    let mut ann = Client::join(addr, "Ann").await;

    let mut stranger = Client::connect(addr).await;
    stranger.send("hello").await;
    stranger.send("Eve: hi").await;

    assert_eq!(ann.recv().await, "Eve: hi");
    assert_eq!(wait_for_roster(&server, 1).await, vec!["Ann"]);

    drop(stranger);
    let _bob = Client::join(addr, "Bob").await;
    assert_eq!(ann.recv().await, "SYSTEM: Bob hat den Chat betreten.");
    assert_eq!(ann.recv().await, "PARTICIPANTS: Ann, Bob, ");
}

#[tokio::test]
async fn dropped_peer_does_not_interrupt_others() {
    let (addr, server) = start(HandshakePolicy::Strict).await;
    let mut ann = Client::join(addr, "Ann").await;
    let bob = Client::join(addr, "Bob").await;
    let mut cleo = Client::join(addr, "Cleo").await;
    ann.recv_until("PARTICIPANTS: Ann, Bob, Cleo, ").await;

    drop(bob);
    cleo.send("Cleo: noch da?").await;
    cleo.send("Cleo: ja").await;

    ann.recv_until("Cleo: noch da?").await;
    ann.recv_until("Cleo: ja").await;
    wait_for_roster(&server, 2).await;
}

#[tokio::test]
async fn concurrent_joins_and_leaves_settle_to_survivors() {
    const N: usize = 10;
    let (addr, server) = start(HandshakePolicy::Strict).await;
    let mut ann = Client::join(addr, "Ann").await;

    let joins = (0..N).map(|i| {
        tokio::spawn(async move {
            let mut c = Client::connect(addr).await;
            c.send(&format!("CONNECT:guest{i}")).await;
            c
        })
    });
    let mut guests = Vec::new();
    for j in joins {
        guests.push(j.await.unwrap());
    }
    wait_for_roster(&server, N + 1).await;

    drop(guests);
    assert_eq!(wait_for_roster(&server, 1).await, vec!["Ann"]);

    let mut joined = 0;
    let mut left = 0;
    let mut last_roster = None;
    while left < N {
        let line = ann.recv().await;
        match Message::classify(&line) {
            Message::Joined(_) => joined += 1,
            Message::Left(_) => left += 1,
            Message::Participants(names) => {
                let mut unique = names.clone();
                unique.sort();
                unique.dedup();
                assert_eq!(unique.len(), names.len(), "duplicate in {line:?}");
                last_roster = Some(line.clone());
            }
            other => panic!("unexpected line {other:?}"),
        }
    }
    assert_eq!(joined, N);
    assert_eq!(last_roster.as_deref(), Some("PARTICIPANTS: Ann, "));
}

#[tokio::test]
async fn binding_a_busy_port_fails() {
    let (addr, _server) = start(HandshakePolicy::Strict).await;
    match Server::bind(addr) {
        Err(RelayError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
        other => panic!("expected bind failure, got {other:?}"),
    }
}

#[tokio::test]
async fn listen_and_serve_reports_a_busy_port() {
    let (addr, server) = start(HandshakePolicy::Strict).await;
    match server.listen_and_serve(addr).await {
        Err(RelayError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
        other => panic!("expected bind failure, got {other:?}"),
    }
}
