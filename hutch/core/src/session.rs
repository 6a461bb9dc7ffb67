//! Session registry
//!
//! One client connection = one session. The registry tracks every live
//! session's outbound channel so the animator can answer the originating
//! session and broadcast state changes to everyone. All sends are
//! non-blocking: a session whose outbound queue is full or whose writer has
//! hung up is reported back to the caller, which unregisters it. A slow
//! client can lose its own connection but never stall the others.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::ServerMessage;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of one client connection.
///
/// Monotonic for the life of the process; never reused, so a queued command
/// can safely name its originating session long after it disconnected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Write capability plus metadata for one connected client.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Identity used for response routing and logging.
    pub id: SessionId,
    /// Outbound queue drained by the connection's writer task.
    pub tx: mpsc::Sender<ServerMessage>,
    /// Peer address, for logs.
    pub peer: SocketAddr,
    /// When the connection was accepted.
    pub connected_at: Instant,
}

impl SessionHandle {
    /// Build a handle for a freshly accepted connection.
    pub fn new(id: SessionId, tx: mpsc::Sender<ServerMessage>, peer: SocketAddr) -> Self {
        SessionHandle {
            id,
            tx,
            peer,
            connected_at: Instant::now(),
        }
    }
}

/// Outcome of one broadcast attempt.
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// Sessions whose outbound queue accepted the message.
    pub delivered: usize,
    /// Sessions that must be unregistered: queue full or writer gone.
    pub failed: Vec<SessionId>,
}

/// Why a targeted send did not reach its session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendFailure {
    /// No session with that id is registered.
    Gone,
    /// The session exists but its queue is full or its writer hung up.
    Stalled,
}

/// Tracks every live session. Cheap to clone; all clones share state.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session.
    pub fn register(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.write();
        debug!(session = %handle.id, peer = %handle.peer, total = sessions.len() + 1, "session registered");
        sessions.insert(handle.id, handle);
    }

    /// Remove a session, returning its handle if it was present. Any
    /// messages still sitting in its queue are simply dropped with it.
    pub fn unregister(&self, id: SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.write().remove(&id);
        if removed.is_some() {
            debug!(session = %id, "session unregistered");
        }
        removed
    }

    /// Queue a message for one session without blocking.
    pub fn send_to(&self, id: SessionId, message: ServerMessage) -> Result<(), SendFailure> {
        let sessions = self.sessions.read();
        let handle = sessions.get(&id).ok_or(SendFailure::Gone)?;
        handle.tx.try_send(message).map_err(|_| SendFailure::Stalled)
    }

    /// Queue a message for every registered session without blocking.
    ///
    /// Failures never interrupt delivery to the remaining sessions; the
    /// failed ids come back so the caller can unregister them.
    pub fn broadcast(&self, message: &ServerMessage) -> BroadcastOutcome {
        let sessions = self.sessions.read();
        let mut outcome = BroadcastOutcome::default();
        for (id, handle) in sessions.iter() {
            match handle.tx.try_send(message.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(_) => outcome.failed.push(*id),
            }
        }
        outcome
    }

    /// Whether a session is currently registered.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// True when no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Snapshot of the registered ids, in no particular order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().keys().copied().collect()
    }
}
