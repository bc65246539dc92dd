// Test support: engines on manual clocks and hand-driven peers

use shard_sync::collation::{Collation, CollationHeader, MemoryShard};
use shard_sync::merkle::{calc_chunk_root, zpad_right};
use shard_sync::peer::{PeerId, PeerLink};
use shard_sync::protocol::{Command, CommandCodec};
use shard_sync::sync::{ManualPeriodClock, SyncConfig, SyncEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SHARD_ID: u64 = 1;
pub const BODY_SIZE: usize = 256;

pub struct TestNode {
    pub engine: SyncEngine,
    pub clock: Arc<ManualPeriodClock>,
    pub peer_id: PeerId,
}

pub fn node(name: &str) -> TestNode {
    let clock = Arc::new(ManualPeriodClock::new(0));
    let config = SyncConfig::new()
        .with_node_name(name)
        .with_collation_size(BODY_SIZE)
        .with_request_timeout(5);
    let engine = SyncEngine::with_clock(
        Arc::new(MemoryShard::new(SHARD_ID)),
        config,
        clock.clone(),
    )
    .unwrap();
    TestNode {
        engine,
        clock,
        peer_id: PeerId::generate(),
    }
}

/// Connect two engines and wait for both handshakes
pub async fn link(a: &TestNode, b: &TestNode) {
    let (link_a, link_b) = PeerLink::pair();
    a.engine.register_peer(b.peer_id, link_a);
    b.engine.register_peer(a.peer_id, link_b);
    wait_until(|| {
        a.engine.peer(&b.peer_id).is_some() && b.engine.peer(&a.peer_id).is_some()
    })
    .await;
}

/// A collation with a correct chunk root, as a remote proposer would build it
pub fn remote_collation(content: &str, period: u64) -> Collation {
    let body = zpad_right(content.as_bytes(), BODY_SIZE);
    let header = CollationHeader::new(SHARD_ID, calc_chunk_root(&body).unwrap(), period, [0x33; 20]);
    Collation::new(header, body)
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

pub struct RawPeer {
    pub peer_id: PeerId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    codec: CommandCodec,
}

impl RawPeer {
    /// Attach a hand-driven peer to `engine` and complete the handshake
    pub async fn attach(engine: &SyncEngine) -> Self {
        let (local, remote) = PeerLink::pair();
        let (tx, rx) = remote.into_parts();
        let mut raw = Self {
            peer_id: PeerId::generate(),
            tx,
            rx,
            codec: CommandCodec::new(),
        };
        engine.register_peer(raw.peer_id, local);

        assert_eq!(raw.recv().await, Command::Status);
        raw.send(Command::Status);
        let peer_id = raw.peer_id;
        wait_until(|| engine.peer(&peer_id).is_some()).await;
        raw
    }

    /// Attach without answering the handshake
    pub fn attach_silent(engine: &SyncEngine) -> Self {
        let (local, remote) = PeerLink::pair();
        let (tx, rx) = remote.into_parts();
        let raw = Self {
            peer_id: PeerId::generate(),
            tx,
            rx,
            codec: CommandCodec::new(),
        };
        engine.register_peer(raw.peer_id, local);
        raw
    }

    pub fn send(&self, command: Command) {
        self.tx.send(self.codec.encode(&command).unwrap()).unwrap();
    }

    pub async fn recv(&mut self) -> Command {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("link closed");
        self.codec.decode(&frame).unwrap()
    }

    /// Assert nothing arrives for a short while
    pub async fn expect_silence(&mut self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
        if let Ok(frame) = self.rx.try_recv() {
            panic!("unexpected frame {:?}", self.codec.decode(&frame));
        }
    }

    pub async fn wait_closed(&mut self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.rx.recv().await.is_some() {}
        })
        .await
        .expect("link still open");
    }

    /// Answer the next GetCollations with `collations`, returning the hashes asked for
    pub async fn serve(&mut self, collations: Vec<Collation>) -> Vec<shard_sync::merkle::Hash32> {
        match self.recv().await {
            Command::GetCollations {
                request_id,
                collation_hashes,
            } => {
                self.send(Command::Collations {
                    request_id,
                    collations,
                });
                collation_hashes
            }
            other => panic!("expected GetCollations, got {:?}", other),
        }
    }
}
