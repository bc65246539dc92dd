// Peer Session - State machine for one sharding peer
//
// Connecting -> Handshaking -> Active -> Disconnected
//
// The session owns the pending-request table. Replies are matched to
// requests by request id only, so they may resolve in any order. Every
// pending entry is removed on resolution, cancellation or disconnect.

use crate::collation::Collation;
use crate::merkle::Hash32;
use crate::peer::link::{PeerId, PeerLink};
use crate::protocol::{Command, CommandCodec, ProtocolError};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session-level errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    #[error("Session is {0}, not active")]
    NotActive(SessionState),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Active,
    /// Terminal
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Active => "active",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Why a session was closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer broke the protocol
    ProtocolViolation,
    /// We are shutting down
    ClientQuitting,
    /// The peer pool dropped the peer
    PeerLeft,
    /// The underlying link closed
    ConnectionClosed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DisconnectReason::ProtocolViolation => "protocol violation",
            DisconnectReason::ClientQuitting => "client quitting",
            DisconnectReason::PeerLeft => "peer left",
            DisconnectReason::ConnectionClosed => "connection closed",
        };
        f.write_str(reason)
    }
}

/// Inbound commands that need handling by the engine
///
/// Replies never show up here: they are consumed by the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerRequest {
    GetCollations {
        request_id: u64,
        collation_hashes: Vec<Hash32>,
    },
    NewCollationHashes {
        collation_hashes_and_periods: Vec<(Hash32, u64)>,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One connected sharding peer
pub struct PeerSession {
    peer_id: PeerId,
    codec: CommandCodec,
    state: Mutex<SessionState>,
    disconnect_reason: Mutex<Option<DisconnectReason>>,
    /// `None` once disconnected; dropping the sender closes the link
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Command>>>,
    /// Collation hashes believed known to the peer. Only grows.
    known_hashes: Mutex<HashSet<Hash32>>,
    /// Fired on disconnect
    closed: CancellationToken,
}

/// Removes a pending entry when the waiting call ends, however it ends
struct PendingGuard<'a> {
    session: &'a PeerSession,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.session.pending).remove(&self.request_id);
    }
}

impl PeerSession {
    /// Create a session over `link`, not yet handshaken
    pub fn new(peer_id: PeerId, link: PeerLink) -> Self {
        Self::with_codec(peer_id, link, CommandCodec::new())
    }

    /// Create a session using a specific command codec
    pub fn with_codec(peer_id: PeerId, link: PeerLink, codec: CommandCodec) -> Self {
        let (outbound, inbound) = link.into_parts();
        Self {
            peer_id,
            codec,
            state: Mutex::new(SessionState::Connecting),
            disconnect_reason: Mutex::new(None),
            outbound: Mutex::new(Some(outbound)),
            inbound: tokio::sync::Mutex::new(inbound),
            pending: Mutex::new(HashMap::new()),
            known_hashes: Mutex::new(HashSet::new()),
            closed: CancellationToken::new(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Reason given when the session was closed
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *lock(&self.disconnect_reason)
    }

    /// Number of requests still waiting for a reply
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// A token that fires once the session disconnects
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    // ========================================================================
    // HANDSHAKE
    // ========================================================================

    /// Exchange `Status` with the peer
    ///
    /// The first command the peer sends must be `Status`. Anything else
    /// disconnects the peer with a protocol violation.
    pub async fn handshake(&self, token: &CancellationToken) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Connecting {
            return Err(SessionError::NotActive(state));
        }
        self.set_state(SessionState::Handshaking);

        if let Err(e) = self.send_status() {
            self.disconnect(DisconnectReason::ConnectionClosed);
            return Err(e);
        }

        match self.recv_command(token).await {
            Ok(Command::Status) => {
                self.set_state(SessionState::Active);
                debug!(peer = %self.peer_id, "handshake complete");
                Ok(())
            }
            Ok(other) => {
                self.disconnect(DisconnectReason::ProtocolViolation);
                Err(SessionError::HandshakeFailure(format!(
                    "expected Status, got {}",
                    other.name()
                )))
            }
            Err(SessionError::Protocol(e)) => Err(SessionError::HandshakeFailure(e.to_string())),
            Err(SessionError::Cancelled) => {
                self.disconnect(DisconnectReason::ClientQuitting);
                Err(SessionError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // INBOUND
    // ========================================================================

    async fn recv_command(&self, token: &CancellationToken) -> Result<Command, SessionError> {
        let mut inbound = self.inbound.lock().await;
        let frame = tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(SessionError::ConnectionLost),
            _ = token.cancelled() => return Err(SessionError::Cancelled),
            frame = inbound.recv() => frame,
        };
        drop(inbound);

        let Some(frame) = frame else {
            self.disconnect(DisconnectReason::ConnectionClosed);
            return Err(SessionError::ConnectionLost);
        };

        self.codec.decode(&frame).map_err(|e| {
            warn!(peer = %self.peer_id, error = %e, "undecodable frame");
            self.disconnect(DisconnectReason::ProtocolViolation);
            SessionError::Protocol(e)
        })
    }

    /// Wait for the next command the engine has to handle
    ///
    /// Commands are read in arrival order. A command whose request id matches
    /// a pending request resolves that request and is consumed here.
    pub async fn next_request(&self, token: &CancellationToken) -> Result<PeerRequest, SessionError> {
        match self.state() {
            SessionState::Active => {}
            SessionState::Disconnected => return Err(SessionError::ConnectionLost),
            other => return Err(SessionError::NotActive(other)),
        }

        loop {
            let command = self.recv_command(token).await?;

            if let Some(request_id) = command.request_id() {
                let waiter = lock(&self.pending).remove(&request_id);
                if let Some(waiter) = waiter {
                    debug!(peer = %self.peer_id, request_id, cmd = command.name(), "resolving pending request");
                    // The waiter may have just been cancelled; nothing to do then
                    let _ = waiter.send(command);
                    continue;
                }
            }

            match command {
                Command::Status => {
                    debug!(peer = %self.peer_id, "ignoring repeated Status");
                }
                Command::Collations { request_id, .. } => {
                    // Late reply to a request that was cancelled or timed out
                    debug!(peer = %self.peer_id, request_id, "dropping unsolicited Collations");
                }
                Command::GetCollations {
                    request_id,
                    collation_hashes,
                } => {
                    return Ok(PeerRequest::GetCollations {
                        request_id,
                        collation_hashes,
                    })
                }
                Command::NewCollationHashes {
                    collation_hashes_and_periods,
                } => {
                    return Ok(PeerRequest::NewCollationHashes {
                        collation_hashes_and_periods,
                    })
                }
            }
        }
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    fn send(&self, command: &Command) -> Result<(), SessionError> {
        let frame = self.codec.encode(command)?;
        let outbound = lock(&self.outbound);
        let sender = outbound.as_ref().ok_or(SessionError::ConnectionLost)?;
        sender
            .send(frame)
            .map_err(|_| SessionError::ConnectionLost)
    }

    pub fn send_status(&self) -> Result<(), SessionError> {
        debug!(peer = %self.peer_id, "sending status msg");
        self.send(&Command::Status)
    }

    pub fn send_collations(
        &self,
        request_id: u64,
        collations: Vec<Collation>,
    ) -> Result<(), SessionError> {
        debug!(peer = %self.peer_id, request_id, count = collations.len(), "sending collations");
        self.send(&Command::Collations {
            request_id,
            collations,
        })
    }

    pub fn send_get_collations(
        &self,
        request_id: u64,
        collation_hashes: Vec<Hash32>,
    ) -> Result<(), SessionError> {
        debug!(peer = %self.peer_id, request_id, count = collation_hashes.len(), "requesting collations");
        self.send(&Command::GetCollations {
            request_id,
            collation_hashes,
        })
    }

    pub fn send_new_collation_hashes(
        &self,
        collation_hashes_and_periods: Vec<(Hash32, u64)>,
    ) -> Result<(), SessionError> {
        let periods = collation_hashes_and_periods.iter().map(|(_, period)| *period);
        debug!(
            peer = %self.peer_id,
            count = collation_hashes_and_periods.len(),
            first_period = ?periods.clone().min(),
            last_period = ?periods.max(),
            "announcing new collations"
        );
        self.send(&Command::NewCollationHashes {
            collation_hashes_and_periods,
        })
    }

    // ========================================================================
    // REQUESTS
    // ========================================================================

    fn register_pending(&self, waiter: oneshot::Sender<Command>) -> u64 {
        let mut pending = lock(&self.pending);
        let mut request_id: u64 = rand::random();
        while pending.contains_key(&request_id) {
            request_id = rand::random();
        }
        pending.insert(request_id, waiter);
        request_id
    }

    /// Fetch collations by hash from the peer
    ///
    /// An empty hash list returns immediately without touching the network.
    /// Fails with `Cancelled` if `token` fires first, `ConnectionLost` if the
    /// peer goes away, and `UnexpectedMessage` if the reply is not
    /// `Collations`; the caller should disconnect the peer in that case.
    pub async fn get_collations(
        &self,
        collation_hashes: &[Hash32],
        token: &CancellationToken,
    ) -> Result<Vec<Collation>, SessionError> {
        if collation_hashes.is_empty() {
            return Ok(Vec::new());
        }
        if self.closed.is_cancelled() {
            return Err(SessionError::ConnectionLost);
        }

        let (waiter, reply) = oneshot::channel();
        let request_id = self.register_pending(waiter);
        let _guard = PendingGuard {
            session: self,
            request_id,
        };

        self.send_get_collations(request_id, collation_hashes.to_vec())?;

        let reply = tokio::select! {
            biased;
            reply = reply => reply.map_err(|_| SessionError::ConnectionLost)?,
            _ = token.cancelled() => return Err(SessionError::Cancelled),
            _ = self.closed.cancelled() => return Err(SessionError::ConnectionLost),
        };

        match reply {
            Command::Collations { collations, .. } => Ok(collations),
            other => Err(SessionError::UnexpectedMessage {
                expected: "Collations",
                got: other.name(),
            }),
        }
    }

    // ========================================================================
    // PEER KNOWLEDGE
    // ========================================================================

    /// Record hashes as known to the peer
    pub fn mark_known<I: IntoIterator<Item = Hash32>>(&self, hashes: I) {
        lock(&self.known_hashes).extend(hashes);
    }

    /// Whether the peer is believed to know `hash`
    pub fn knows(&self, hash: &Hash32) -> bool {
        lock(&self.known_hashes).contains(hash)
    }

    pub fn known_count(&self) -> usize {
        lock(&self.known_hashes).len()
    }

    /// Return the hashes the peer does not know yet and mark them known
    ///
    /// Input order is kept; duplicates are reported once.
    pub fn record_unknown(&self, hashes: &[Hash32]) -> Vec<Hash32> {
        let mut known = lock(&self.known_hashes);
        hashes
            .iter()
            .filter(|hash| known.insert(**hash))
            .copied()
            .collect()
    }

    // ========================================================================
    // DISCONNECT
    // ========================================================================

    /// Close the session
    ///
    /// Idempotent. Pending requests fail with `ConnectionLost`.
    pub fn disconnect(&self, reason: DisconnectReason) {
        let outbound = lock(&self.outbound).take();
        if outbound.is_none() {
            return;
        }
        drop(outbound);

        self.set_state(SessionState::Disconnected);
        *lock(&self.disconnect_reason) = Some(reason);
        lock(&self.pending).clear();
        self.closed.cancel();

        match reason {
            DisconnectReason::ProtocolViolation => {
                warn!(peer = %self.peer_id, %reason, "disconnecting peer")
            }
            _ => info!(peer = %self.peer_id, %reason, "disconnecting peer"),
        }
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("known", &self.known_count())
            .finish()
    }
}
