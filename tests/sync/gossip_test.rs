// Gossip Tests
// Tests for delta-based announcement fan-out between engines

use crate::support::{link, node, remote_collation, wait_until, RawPeer};
use shard_sync::collation::{Availability, Shard};
use shard_sync::merkle::Hash32;
use shard_sync::protocol::Command;

fn announced(command: Command) -> Vec<(Hash32, u64)> {
    match command {
        Command::NewCollationHashes {
            collation_hashes_and_periods,
        } => collation_hashes_and_periods,
        other => panic!("expected NewCollationHashes, got {:?}", other),
    }
}

// ============================================================================
// END TO END
// ============================================================================

#[tokio::test]
async fn test_collation_travels_down_a_line() {
    let a = node("a");
    let b = node("b");
    let c = node("c");
    link(&a, &b).await;
    link(&b, &c).await;

    a.clock.set(5);
    let collation = a.engine.propose().unwrap();

    wait_until(|| {
        c.engine.shard().get_availability(collation.header()) == Availability::Available
    })
    .await;
    assert_eq!(
        b.engine.shard().get_availability(collation.header()),
        Availability::Available
    );

    // a -> b, then b -> c only; nobody announces back toward the source
    wait_until(|| c.engine.stats().collations_imported == 1).await;
    assert_eq!(a.engine.stats().announcements_sent, 1);
    assert_eq!(b.engine.stats().announcements_sent, 1);
    assert_eq!(c.engine.stats().announcements_sent, 0);
    wait_until(|| a.engine.stats().requests_served == 1).await;
    wait_until(|| b.engine.stats().requests_served == 1).await;
}

#[tokio::test]
async fn test_mesh_converges_on_all_proposals() {
    let nodes = [node("a"), node("b"), node("c")];
    link(&nodes[0], &nodes[1]).await;
    link(&nodes[1], &nodes[2]).await;
    link(&nodes[0], &nodes[2]).await;

    let proposed: Vec<_> = nodes.iter().map(|n| n.engine.propose().unwrap()).collect();

    wait_until(|| {
        nodes.iter().all(|n| {
            proposed
                .iter()
                .all(|c| n.engine.shard().get_availability(c.header()) == Availability::Available)
        })
    })
    .await;
}

// ============================================================================
// NO RE-ANNOUNCEMENT
// ============================================================================

#[tokio::test]
async fn test_same_proposal_is_announced_once() {
    let n = node("proposer");
    let mut raw = RawPeer::attach(&n.engine).await;
    n.clock.set(2);

    let first = n.engine.propose().unwrap();
    let second = n.engine.propose().unwrap();
    assert_eq!(first.hash(), second.hash());

    assert_eq!(announced(raw.recv().await), vec![(first.hash(), 2)]);
    raw.expect_silence().await;
}

#[tokio::test]
async fn test_no_reannouncement_to_peer_that_has_it() {
    let n = node("hub");
    let mut source = RawPeer::attach(&n.engine).await;
    let mut other = RawPeer::attach(&n.engine).await;
    let collation = remote_collation("gossip", 9);

    source.send(Command::NewCollationHashes {
        collation_hashes_and_periods: vec![(collation.hash(), 9)],
    });
    source.serve(vec![collation.clone()]).await;

    // Only the peer that did not send it hears about it
    assert_eq!(announced(other.recv().await), vec![(collation.hash(), 9)]);
    source.expect_silence().await;

    // Announcing it back still triggers a fetch, but nothing is re-gossiped
    other.send(Command::NewCollationHashes {
        collation_hashes_and_periods: vec![(collation.hash(), 9)],
    });
    other.serve(vec![collation.clone()]).await;

    source.expect_silence().await;
    other.expect_silence().await;
    assert_eq!(n.engine.stats().announcements_sent, 1);
}

#[tokio::test]
async fn test_each_peer_gets_only_its_delta() {
    let n = node("hub");
    let mut source = RawPeer::attach(&n.engine).await;
    let mut curious = RawPeer::attach(&n.engine).await;
    let mut fresh = RawPeer::attach(&n.engine).await;
    let first = remote_collation("first", 1);
    let second = remote_collation("second", 2);

    // `curious` asks for `first` before anyone has it
    curious.send(Command::GetCollations {
        request_id: 1,
        collation_hashes: vec![first.hash()],
    });
    assert_eq!(
        curious.recv().await,
        Command::Collations {
            request_id: 1,
            collations: vec![],
        }
    );

    source.send(Command::NewCollationHashes {
        collation_hashes_and_periods: vec![(first.hash(), 1), (second.hash(), 2)],
    });
    source.serve(vec![first.clone(), second.clone()]).await;

    assert_eq!(announced(curious.recv().await), vec![(second.hash(), 2)]);
    assert_eq!(
        announced(fresh.recv().await),
        vec![(first.hash(), 1), (second.hash(), 2)]
    );
    curious.expect_silence().await;
    fresh.expect_silence().await;
    source.expect_silence().await;
}

// ============================================================================
// KNOWLEDGE FROM REQUESTS
// ============================================================================

/// Asking for a hash counts as knowing it, even when we could not serve it.
/// Such a peer is never told when the collation later becomes available.
#[tokio::test]
async fn test_requested_hash_is_never_announced_to_requester() {
    let n = node("hub");
    let mut asker = RawPeer::attach(&n.engine).await;
    let mut source = RawPeer::attach(&n.engine).await;
    let collation = remote_collation("late", 3);

    asker.send(Command::GetCollations {
        request_id: 11,
        collation_hashes: vec![collation.hash()],
    });
    assert_eq!(
        asker.recv().await,
        Command::Collations {
            request_id: 11,
            collations: vec![],
        }
    );
    assert!(n.engine.peer(&asker.peer_id).unwrap().knows(&collation.hash()));

    source.send(Command::NewCollationHashes {
        collation_hashes_and_periods: vec![(collation.hash(), 3)],
    });
    source.serve(vec![collation.clone()]).await;
    wait_until(|| n.engine.stats().collations_imported == 1).await;

    asker.expect_silence().await;
    assert_eq!(n.engine.stats().announcements_sent, 0);
}
