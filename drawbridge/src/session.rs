//! Session state (§4.B): a passive record, plus the concurrency wrapper
//! around it. Never mutated without holding `Session::state`'s lock — the
//! entire {apply op -> append log -> increment version -> broadcast}
//! sequence runs while that lock is held, so broadcast order always matches
//! log order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};

use crate::messages::ServerMessage;
use crate::model::{FilesMeta, Snapshot};

pub type SubscriberId = u64;

/// In-memory state for one session. Everything here except `subscribers`,
/// `version`, and the debounce bookkeeping is reconstructable from disk.
pub struct SessionState {
    pub snapshot: Snapshot,
    pub files: FilesMeta,
    pub version: u64,
    pub subscribers: HashMap<SubscriberId, mpsc::Sender<ServerMessage>>,
    pub last_snapshot_at: Instant,

    /// Bumped on every accepted subscriber update; used to let only the most
    /// recently scheduled debounce task perform the actual log append.
    pub update_generation: u64,
    pub flushed_generation: u64,
}

impl SessionState {
    pub fn new(snapshot: Snapshot, files: FilesMeta) -> Self {
        Self {
            snapshot,
            files,
            version: 0,
            subscribers: HashMap::new(),
            last_snapshot_at: Instant::now(),
            update_generation: 0,
            flushed_generation: 0,
        }
    }

    /// Whether an update-debounce append is still owed.
    pub fn has_unflushed_update(&self) -> bool {
        self.update_generation != self.flushed_generation
    }
}

pub struct Session {
    pub id: String,
    next_subscriber_id: AtomicU64,
    pub state: Mutex<SessionState>,
}

impl Session {
    pub fn new(id: String, snapshot: Snapshot, files: FilesMeta) -> Self {
        Self {
            id,
            next_subscriber_id: AtomicU64::new(0),
            state: Mutex::new(SessionState::new(snapshot, files)),
        }
    }

    pub fn next_subscriber_id(&self) -> SubscriberId {
        self.next_subscriber_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Send to one subscriber's bounded queue; a full or closed queue silently
/// drops the message, per §4.E — the connection's own error path handles the
/// rest.
pub fn send_to(sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    if let Err(e) = sender.try_send(message) {
        log::debug!("dropping message to slow or closed subscriber: {e}");
    }
}

/// Broadcast to every subscriber currently in the set, optionally skipping
/// one (the originator of an `update`, which is never echoed back).
pub fn broadcast(state: &SessionState, message: ServerMessage, exclude: Option<SubscriberId>) {
    for (id, sender) in &state.subscribers {
        if Some(*id) == exclude {
            continue;
        }
        send_to(sender, message.clone());
    }
}
