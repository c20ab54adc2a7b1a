//! Session registry and broadcast fan-out.
//!
//! Every live connection registers a [`SessionHandle`] here. When a write
//! commits, [`BroadcastRouter::broadcast`] walks every *other* session and
//! either pushes the chunk immediately (coordinate inside that session's
//! current range) or parks it in the session's dirty buffer, where the
//! next covering `SetRange` will deliver it exactly once.
//!
//! The registry is explicit state owned by the server; there is no
//! ambient event-emitter whose listener ordering matters. A broadcast
//! racing a session's teardown degrades to a send on a closed channel,
//! which is ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use oekaki_types::{ChunkCoord, ChunkRect, ServerMsg};

/// Process-local identifier for one connection.
pub type SessionId = u64;

/// Mutable per-session subscription state.
#[derive(Default)]
struct SessionState {
    /// Current viewport range. `None` until the first valid `SetRange`.
    range: Option<ChunkRect>,
    /// Chunks that changed while outside the range, newest bytes per
    /// coordinate. Unbounded for idle sessions by design; entries leave
    /// only by covering range changes or disconnect.
    dirty: HashMap<ChunkCoord, Arc<Vec<u8>>>,
}

/// Handle to one live session: its outbound channel plus range state.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<ServerMsg>,
    state: Arc<Mutex<SessionState>>,
}

fn chunk_msg(coord: ChunkCoord, bytes: &[u8]) -> ServerMsg {
    let (x, y) = coord.to_wire();
    ServerMsg::Chunk { x, y, data: bytes.to_vec() }
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queue a message for the client. A closed connection is a no-op.
    pub fn send(&self, msg: ServerMsg) {
        let _ = self.tx.send(msg);
    }

    /// Replace the viewport range, then deliver and drop every buffered
    /// chunk the new range covers. Entries outside it stay buffered.
    pub fn set_range(&self, range: ChunkRect) {
        let mut state = self.state.lock();
        state.range = Some(range);
        let tx = &self.tx;
        state.dirty.retain(|coord, bytes| {
            if range.contains(*coord) {
                let _ = tx.send(chunk_msg(*coord, bytes));
                false
            } else {
                true
            }
        });
        trace!(session = self.id, ?range, buffered = state.dirty.len(), "range updated");
    }

    /// Route one committed chunk update to this session: push it if
    /// visible, otherwise overwrite the dirty entry for later delivery.
    fn deliver(&self, coord: ChunkCoord, bytes: &Arc<Vec<u8>>) {
        let mut state = self.state.lock();
        match state.range {
            Some(range) if range.contains(coord) => {
                let _ = self.tx.send(chunk_msg(coord, bytes));
            }
            _ => {
                state.dirty.insert(coord, bytes.clone());
            }
        }
    }

    #[cfg(test)]
    fn dirty_len(&self) -> usize {
        self.state.lock().dirty.len()
    }
}

/// Registry of live sessions and the fan-out path for committed writes.
pub struct BroadcastRouter {
    sessions: DashMap<SessionId, SessionHandle>,
    next_id: AtomicU64,
}

impl BroadcastRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a new session around its outbound channel.
    pub fn register(&self, tx: mpsc::UnboundedSender<ServerMsg>) -> SessionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SessionHandle {
            id,
            tx,
            state: Arc::new(Mutex::new(SessionState::default())),
        };
        self.sessions.insert(id, handle.clone());
        debug!(session = id, live = self.sessions.len(), "session registered");
        handle
    }

    /// Drop a session; its dirty buffer dies with it.
    pub fn deregister(&self, id: SessionId) {
        self.sessions.remove(&id);
        debug!(session = id, live = self.sessions.len(), "session deregistered");
    }

    /// Fan a committed write out to every session except its origin.
    pub fn broadcast(&self, origin: SessionId, coord: ChunkCoord, bytes: &Arc<Vec<u8>>) {
        for entry in self.sessions.iter() {
            if entry.id == origin {
                continue;
            }
            entry.deliver(coord, bytes);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
