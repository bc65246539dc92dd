// Sync Engine - The heart of collation synchronization
//
// Owns one session per connected peer and:
// - Proposes collations for the current period
// - Serves GetCollations from the local shard
// - Fetches announced collations from the announcing peer
// - Gossips newly available hashes, each peer receiving only its delta

use crate::collation::{Availability, Collation, CollationHeader, Shard, ShardError};
use crate::merkle::{calc_chunk_root, zpad_right, Hash32, MerkleError};
use crate::peer::{DisconnectReason, PeerId, PeerLink, PeerRequest, PeerSession, SessionError};
use crate::sync::clock::{PeriodSource, SystemPeriodClock};
use crate::sync::config::SyncConfig;
use crate::sync::deadline::deadline_token;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sync-related errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Notifications from the peer pool
#[derive(Debug)]
pub enum PeerPoolEvent {
    /// A peer connected; its link is ready for the sub-protocol
    Joined(PeerId, PeerLink),
    /// A peer went away
    Left(PeerId),
}

/// Statistics about the sync engine
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub collations_proposed: u64,
    pub collations_imported: u64,
    pub collations_rejected: u64,
    pub requests_served: u64,
    pub announcements_sent: u64,
    pub fetches_started: u64,
    pub fetches_failed: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct EngineInner {
    config: SyncConfig,
    shard: Arc<dyn Shard>,
    clock: Arc<dyn PeriodSource>,
    /// Sessions still handshaking
    connecting: Mutex<HashMap<PeerId, Arc<PeerSession>>>,
    /// Sessions that completed the handshake
    peers: Mutex<HashMap<PeerId, Arc<PeerSession>>>,
    /// Makes availability check plus add one step
    import_lock: Mutex<()>,
    stats: Mutex<SyncStats>,
    token: CancellationToken,
}

/// The sync engine - orchestrates collation exchange with all peers
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine whose periods come from the wall clock
    pub fn new(shard: Arc<dyn Shard>, config: SyncConfig) -> Result<Self, SyncError> {
        let clock = Arc::new(SystemPeriodClock::new(config.period_length()));
        Self::with_clock(shard, config, clock)
    }

    /// Create an engine with an injected period source
    pub fn with_clock(
        shard: Arc<dyn Shard>,
        config: SyncConfig,
        clock: Arc<dyn PeriodSource>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                shard,
                clock,
                connecting: Mutex::new(HashMap::new()),
                peers: Mutex::new(HashMap::new()),
                import_lock: Mutex::new(()),
                stats: Mutex::new(SyncStats::default()),
                token: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn shard(&self) -> &Arc<dyn Shard> {
        &self.inner.shard
    }

    pub fn stats(&self) -> SyncStats {
        lock(&self.inner.stats).clone()
    }

    /// Current period according to the engine's period source
    pub fn current_period(&self) -> u64 {
        self.inner.clock.current_period()
    }

    /// Connected (handshaken) peers
    pub fn peers(&self) -> Vec<PeerId> {
        lock(&self.inner.peers).keys().copied().collect()
    }

    /// Session of a connected peer
    pub fn peer(&self, peer_id: &PeerId) -> Option<Arc<PeerSession>> {
        lock(&self.inner.peers).get(peer_id).cloned()
    }

    pub fn is_running(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// Token fired when the engine stops
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Stop the engine and every peer session
    pub fn stop(&self) {
        info!(node = %self.inner.config.node_name, "stopping sync engine");
        self.inner.token.cancel();
        let mut sessions: Vec<Arc<PeerSession>> =
            lock(&self.inner.connecting).drain().map(|(_, s)| s).collect();
        sessions.extend(lock(&self.inner.peers).drain().map(|(_, s)| s));
        for session in sessions {
            session.disconnect(DisconnectReason::ClientQuitting);
        }
    }

    // ========================================================================
    // PROPOSING
    // ========================================================================

    /// Create a collation for the current period, store it and announce it
    pub fn propose(&self) -> Result<Collation, SyncError> {
        self.inner.propose()
    }

    // ========================================================================
    // PEER POOL
    // ========================================================================

    /// Start handling a newly connected peer
    ///
    /// The returned task ends when the peer disconnects or the engine stops.
    pub fn register_peer(&self, peer_id: PeerId, link: PeerLink) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.handle_peer(peer_id, link).await })
    }

    /// Drop a peer the pool reported gone
    ///
    /// A peer still handshaking is closed too and never becomes connected.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        let connecting = lock(&self.inner.connecting).remove(peer_id);
        let connected = lock(&self.inner.peers).remove(peer_id);
        for session in connecting.into_iter().chain(connected) {
            session.disconnect(DisconnectReason::PeerLeft);
        }
    }

    /// Follow peer pool notifications until the engine stops
    pub async fn run(&self, mut events: mpsc::Receiver<PeerPoolEvent>) {
        let token = self.inner.token.clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(PeerPoolEvent::Joined(peer_id, link)) => {
                        self.register_peer(peer_id, link);
                    }
                    Some(PeerPoolEvent::Left(peer_id)) => self.remove_peer(&peer_id),
                    None => {
                        debug!("peer pool closed, waiting for stop");
                        token.cancelled().await;
                        break;
                    }
                },
            }
        }
    }

    /// Store fetched collations and gossip the new ones
    ///
    /// Returns the collations that were not available before.
    pub fn import_collations(
        &self,
        sender: &PeerSession,
        collations: Vec<Collation>,
    ) -> Vec<Collation> {
        self.inner.import_collations(sender, collations)
    }
}

impl EngineInner {
    fn bump(&self, update: impl FnOnce(&mut SyncStats)) {
        update(&mut lock(&self.stats));
    }

    fn propose(&self) -> Result<Collation, SyncError> {
        let period = self.clock.current_period();
        let content = format!("{} period {}", self.config.node_name, period);
        let body = zpad_right(content.as_bytes(), self.config.collation_size);
        let chunk_root = calc_chunk_root(&body)?;
        let header = CollationHeader::new(
            self.shard.shard_id(),
            chunk_root,
            period,
            self.config.proposer_address,
        );
        let collation = Collation::new(header, body);

        debug!(hash = %collation.hash(), period, "proposing collation");

        {
            let _import = lock(&self.import_lock);
            self.shard.add_collation(collation.clone())?;
        }
        self.bump(|s| s.collations_proposed += 1);

        self.fan_out(std::slice::from_ref(&collation));
        Ok(collation)
    }

    // ========================================================================
    // PEER LIFECYCLE
    // ========================================================================

    async fn handle_peer(self: Arc<Self>, peer_id: PeerId, link: PeerLink) {
        let session = Arc::new(PeerSession::new(peer_id, link));
        // Fired when this peer's loop ends, taking its fetches with it
        let peer_token = self.token.child_token();

        let superseded = lock(&self.connecting).insert(peer_id, Arc::clone(&session));
        if let Some(old) = superseded {
            old.disconnect(DisconnectReason::ClientQuitting);
        }

        let handshake_token = deadline_token(&peer_token, self.config.request_timeout());
        let handshake = session.handshake(&handshake_token).await;
        handshake_token.cancel();

        {
            // Registration and removal both go through `connecting`, so a
            // peer removed mid-handshake cannot slip into `peers`
            let mut connecting = lock(&self.connecting);
            let still_wanted = connecting
                .get(&peer_id)
                .is_some_and(|s| Arc::ptr_eq(s, &session));
            if still_wanted {
                connecting.remove(&peer_id);
            }

            if let Err(e) = handshake {
                warn!(peer = %peer_id, error = %e, "handshake failed");
                return;
            }
            if !still_wanted || !session.is_active() {
                session.disconnect(DisconnectReason::PeerLeft);
                debug!(peer = %peer_id, "peer left during handshake");
                return;
            }

            let replaced = lock(&self.peers).insert(peer_id, Arc::clone(&session));
            if let Some(old) = replaced {
                old.disconnect(DisconnectReason::ClientQuitting);
            }
        }
        info!(peer = %peer_id, "peer connected");

        loop {
            match session.next_request(&peer_token).await {
                Ok(request) => self.handle_request(&session, request, &peer_token),
                Err(SessionError::Cancelled) | Err(SessionError::ConnectionLost) => break,
                Err(e) => {
                    warn!(peer = %peer_id, error = %e, "peer loop failed");
                    break;
                }
            }
        }

        peer_token.cancel();
        session.disconnect(DisconnectReason::ClientQuitting);

        let mut peers = lock(&self.peers);
        if peers.get(&peer_id).is_some_and(|s| Arc::ptr_eq(s, &session)) {
            peers.remove(&peer_id);
        }
        info!(peer = %peer_id, "peer loop finished");
    }

    fn handle_request(
        self: &Arc<Self>,
        session: &Arc<PeerSession>,
        request: PeerRequest,
        peer_token: &CancellationToken,
    ) {
        match request {
            PeerRequest::GetCollations {
                request_id,
                collation_hashes,
            } => self.handle_get_collations(session, request_id, collation_hashes),
            PeerRequest::NewCollationHashes {
                collation_hashes_and_periods,
            } => self.handle_new_collation_hashes(session, collation_hashes_and_periods, peer_token),
        }
    }

    // ========================================================================
    // REQUEST HANDLERS
    // ========================================================================

    /// Respond with all requested collations we have
    fn handle_get_collations(
        &self,
        session: &PeerSession,
        request_id: u64,
        collation_hashes: Vec<Hash32>,
    ) {
        // Asking for a hash is taken as knowing it, so it is never announced
        // back to this peer even if we turn out not to have it
        session.mark_known(collation_hashes.iter().copied());

        let mut seen = HashSet::new();
        let collations: Vec<Collation> = collation_hashes
            .iter()
            .filter(|hash| seen.insert(**hash))
            .filter_map(|hash| match self.shard.get_collation_by_hash(hash) {
                Ok(collation) => Some(collation),
                Err(ShardError::NotFound(_)) => None,
                Err(e) => {
                    warn!(%hash, error = %e, "collation lookup failed");
                    None
                }
            })
            .collect();

        info!(
            peer = %session.peer_id(),
            request_id,
            count = collations.len(),
            "responding with collations"
        );
        match session.send_collations(request_id, collations) {
            Ok(()) => self.bump(|s| s.requests_served += 1),
            Err(e) => debug!(peer = %session.peer_id(), error = %e, "reply not sent"),
        }
    }

    /// Request every announced collation from the announcing peer
    ///
    /// Hashes are not filtered against what we already have.
    fn handle_new_collation_hashes(
        self: &Arc<Self>,
        session: &Arc<PeerSession>,
        collation_hashes_and_periods: Vec<(Hash32, u64)>,
        peer_token: &CancellationToken,
    ) {
        let mut seen = HashSet::new();
        let collation_hashes: Vec<Hash32> = collation_hashes_and_periods
            .into_iter()
            .map(|(hash, _)| hash)
            .filter(|hash| seen.insert(*hash))
            .collect();

        if collation_hashes.is_empty() {
            return;
        }

        self.bump(|s| s.fetches_started += 1);
        let inner = Arc::clone(self);
        let session = Arc::clone(session);
        let token = deadline_token(peer_token, self.config.request_timeout());

        // Runs apart from the peer loop, which has to keep reading for the
        // reply to be matched
        tokio::spawn(async move {
            let result = session.get_collations(&collation_hashes, &token).await;
            token.cancel();

            match result {
                Ok(collations) => {
                    inner.import_collations(&session, collations);
                }
                Err(SessionError::UnexpectedMessage { expected, got }) => {
                    warn!(peer = %session.peer_id(), expected, got, "bad reply to GetCollations");
                    inner.bump(|s| s.fetches_failed += 1);
                    session.disconnect(DisconnectReason::ProtocolViolation);
                }
                Err(e) => {
                    debug!(peer = %session.peer_id(), error = %e, "collation fetch ended");
                    inner.bump(|s| s.fetches_failed += 1);
                }
            }
        });
    }

    // ========================================================================
    // IMPORT AND GOSSIP
    // ========================================================================

    fn import_collations(&self, sender: &PeerSession, collations: Vec<Collation>) -> Vec<Collation> {
        let mut seen = HashSet::new();
        let received: Vec<Collation> = collations
            .into_iter()
            .filter(|c| seen.insert(c.hash()))
            .collect();
        sender.mark_known(received.iter().map(Collation::hash));

        let received_count = received.len();
        let mut added = Vec::new();
        {
            let _import = lock(&self.import_lock);
            for collation in received {
                if self.shard.get_availability(collation.header()) == Availability::Available {
                    continue;
                }
                if let Err(reason) = self.check_collation(&collation) {
                    warn!(peer = %sender.peer_id(), hash = %collation.hash(), %reason, "rejecting collation");
                    self.bump(|s| s.collations_rejected += 1);
                    continue;
                }
                match self.shard.add_collation(collation.clone()) {
                    Ok(()) => added.push(collation),
                    Err(e) => {
                        warn!(hash = %collation.hash(), error = %e, "failed to store collation");
                        self.bump(|s| s.collations_rejected += 1);
                    }
                }
            }
        }

        info!(
            peer = %sender.peer_id(),
            received = received_count,
            new = added.len(),
            "received collations"
        );
        self.bump(|s| s.collations_imported += added.len() as u64);

        self.fan_out(&added);
        added
    }

    fn check_collation(&self, collation: &Collation) -> Result<(), String> {
        if collation.shard_id() != self.shard.shard_id() {
            return Err(format!("foreign shard {}", collation.shard_id()));
        }
        if self.config.verify_chunk_roots {
            let root = calc_chunk_root(collation.body()).map_err(|e| e.to_string())?;
            if root != collation.header().chunk_root() {
                return Err("chunk root mismatch".to_string());
            }
        }
        Ok(())
    }

    /// Announce new collations to every peer that does not know them yet
    ///
    /// Each peer gets at most one message holding only its delta.
    fn fan_out(&self, new_collations: &[Collation]) {
        if new_collations.is_empty() {
            return;
        }

        let periods: HashMap<Hash32, u64> = new_collations
            .iter()
            .map(|c| (c.hash(), c.period()))
            .collect();
        let hashes: Vec<Hash32> = new_collations.iter().map(Collation::hash).collect();

        let sessions: Vec<Arc<PeerSession>> = lock(&self.peers).values().cloned().collect();
        for session in sessions {
            let delta = session.record_unknown(&hashes);
            if delta.is_empty() {
                continue;
            }

            let announcement: Vec<(Hash32, u64)> = delta
                .into_iter()
                .map(|hash| (hash, periods[&hash]))
                .collect();

            match session.send_new_collation_hashes(announcement) {
                Ok(()) => self.bump(|s| s.announcements_sent += 1),
                Err(e) => debug!(peer = %session.peer_id(), error = %e, "announcement not sent"),
            }
        }
    }
}
