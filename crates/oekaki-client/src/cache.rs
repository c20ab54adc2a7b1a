//! The client-side chunk cache.
//!
//! Holds the best-known bytes for every chunk this process has seen,
//! keyed by coordinate. Local writes merge optimistically before the
//! server answers (zero-latency feedback); acknowledgments apply only if
//! no newer local write superseded them; remote pushes always win.
//! Reads fetch through the transport with an explicit retry loop and
//! coalesce concurrent fetches for the same coordinate.
//!
//! Repaint scheduling is a [`CanvasEvent`] channel: the render layer
//! redraws whatever coordinates the cache reports changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace, warn};

use oekaki_types::{BlendMode, ChunkCoord, TileGeometry, merge_chunk};

use crate::error::ClientError;
use crate::stamps::WriteStamps;
use crate::transport::{ChunkTransport, ConnectionStatus};

/// Per-fetch timeout before an idempotent read is retried.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause before retrying a read that failed outright (not a timeout).
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// What the render layer needs to redraw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanvasEvent {
    /// This chunk's cached bytes changed; repaint its rectangle.
    ChunkChanged(ChunkCoord),
    /// The whole cache was dropped (connection loss); blank the view.
    Cleared,
}

type Shared = Arc<Vec<u8>>;

/// In-flight fetch slot: followers watch until the leader publishes.
type Fetch = watch::Receiver<Option<Shared>>;

/// Cache of chunk bytes with optimistic writes and staleness guards.
pub struct ChunkCache {
    transport: Arc<dyn ChunkTransport>,
    geometry: TileGeometry,
    chunks: Mutex<HashMap<ChunkCoord, Shared>>,
    inflight: Mutex<HashMap<ChunkCoord, Fetch>>,
    stamps: WriteStamps,
    events: mpsc::UnboundedSender<CanvasEvent>,
    read_timeout: Duration,
}

impl ChunkCache {
    /// Build a cache over a transport and start its listener task.
    ///
    /// The returned receiver carries repaint events; dropping it is fine
    /// if the caller polls the cache instead.
    pub fn new(transport: Arc<dyn ChunkTransport>) -> (Arc<Self>, mpsc::UnboundedReceiver<CanvasEvent>) {
        Self::with_read_timeout(transport, DEFAULT_READ_TIMEOUT)
    }

    /// As [`new`](Self::new) with a custom per-fetch timeout.
    pub fn with_read_timeout(
        transport: Arc<dyn ChunkTransport>,
        read_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<CanvasEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let geometry = transport.geometry();
        let cache = Arc::new(Self {
            transport,
            geometry,
            chunks: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            stamps: WriteStamps::default(),
            events,
            read_timeout,
        });
        spawn_listeners(&cache);
        (cache, events_rx)
    }

    pub fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    /// Current bytes for a coordinate, fetching (and retrying) until the
    /// server answers. Never fails; a coordinate nobody painted resolves
    /// to the server's blank chunk.
    pub async fn read_chunk(&self, coord: ChunkCoord) -> Shared {
        loop {
            if let Some(bytes) = self.chunks.lock().get(&coord) {
                return bytes.clone();
            }

            match self.join_or_lead(coord) {
                Role::Follower(mut rx) => {
                    loop {
                        if let Some(bytes) = rx.borrow_and_update().clone() {
                            return bytes;
                        }
                        if rx.changed().await.is_err() {
                            // Leader vanished without publishing; take
                            // over on the next pass.
                            break;
                        }
                    }
                }
                Role::Leader(tx) => {
                    let stamp_before = self.stamps.current(coord);
                    let fetched = self.fetch_with_retry(coord).await;
                    let result = {
                        let mut chunks = self.chunks.lock();
                        if self.stamps.current(coord) == stamp_before {
                            chunks.insert(coord, fetched.clone());
                            fetched
                        } else {
                            // A local write landed while we fetched; its
                            // optimistic bytes are newer than ours.
                            chunks.get(&coord).cloned().unwrap_or(fetched)
                        }
                    };
                    self.inflight.lock().remove(&coord);
                    let _ = tx.send(Some(result.clone()));
                    self.emit(CanvasEvent::ChunkChanged(coord));
                    return result;
                }
            }
        }
    }

    /// Merge a stroke locally and repaint immediately, then reconcile
    /// with the server's authoritative result.
    ///
    /// Writes are not retried: if the request fails, the optimistic bytes
    /// stay on screen until a later remote push reconciles the view.
    pub async fn write_chunk(
        &self,
        coord: ChunkCoord,
        stroke: &[u8],
        mode: BlendMode,
    ) -> Result<(), ClientError> {
        if !self.geometry.fits(stroke) {
            return Err(ClientError::LengthMismatch {
                expected: self.geometry.byte_len(),
                got: stroke.len(),
            });
        }

        let stamp = self.stamps.begin(coord);
        {
            let mut chunks = self.chunks.lock();
            let current = chunks
                .get(&coord)
                .cloned()
                .unwrap_or_else(|| Arc::new(self.geometry.blank()));
            chunks.insert(coord, Arc::new(merge_chunk(&current, stroke, mode)));
        }
        self.emit(CanvasEvent::ChunkChanged(coord));

        let ack = self.transport.write_chunk(coord, stroke.to_vec(), mode).await?;

        if !self.stamps.is_current(coord, stamp) {
            // A newer write on this tile owns its final state.
            trace!(%coord, "discarding superseded write acknowledgment");
            return Ok(());
        }
        if !self.geometry.fits(&ack) {
            warn!(%coord, len = ack.len(), "malformed write acknowledgment");
            return Ok(());
        }
        self.chunks.lock().insert(coord, Arc::new(ack));
        self.emit(CanvasEvent::ChunkChanged(coord));
        Ok(())
    }

    /// Apply a pushed remote update: unconditional replace, repaint.
    pub fn apply_remote(&self, coord: ChunkCoord, data: Shared) {
        self.chunks.lock().insert(coord, data);
        self.emit(CanvasEvent::ChunkChanged(coord));
    }

    /// Forget everything and blank the view. Run on connection loss so
    /// stale tiles are never presented as authoritative.
    pub fn clear(&self) {
        self.chunks.lock().clear();
        self.stamps.clear();
        self.emit(CanvasEvent::Cleared);
    }

    /// Cached bytes, if any, without fetching.
    pub fn peek(&self, coord: ChunkCoord) -> Option<Shared> {
        self.chunks.lock().get(&coord).cloned()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    /// Join an in-flight fetch for `coord`, or become its leader.
    fn join_or_lead(&self, coord: ChunkCoord) -> Role {
        let mut inflight = self.inflight.lock();
        if let Some(rx) = inflight.get(&coord) {
            // A dead sender with no published value means the previous
            // leader was cancelled; replace it.
            if rx.borrow().is_some() || rx.has_changed().is_ok() {
                return Role::Follower(rx.clone());
            }
        }
        let (tx, rx) = watch::channel(None);
        inflight.insert(coord, rx);
        Role::Leader(tx)
    }

    async fn fetch_with_retry(&self, coord: ChunkCoord) -> Shared {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match tokio::time::timeout(self.read_timeout, self.transport.read_chunk(coord)).await {
                Ok(Ok(data)) if self.geometry.fits(&data) => return Arc::new(data),
                Ok(Ok(data)) => {
                    warn!(%coord, len = data.len(), "malformed chunk from server, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Ok(Err(e)) => {
                    debug!(%coord, attempt, error = %e, "chunk fetch failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(_) => {
                    debug!(%coord, attempt, "chunk fetch timed out, retrying");
                }
            }
        }
    }

    fn emit(&self, event: CanvasEvent) {
        let _ = self.events.send(event);
    }
}

enum Role {
    Leader(watch::Sender<Option<Shared>>),
    Follower(Fetch),
}

/// Forward transport pushes and status changes into the cache.
fn spawn_listeners(cache: &Arc<ChunkCache>) {
    let mut pushes = cache.transport.subscribe_chunks();
    let mut status = cache.transport.subscribe_status();
    let weak = Arc::downgrade(cache);

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                push = pushes.recv() => match push {
                    Ok(chunk) => Some(Listened::Push(chunk)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "push subscription lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => None,
                },
                st = status.recv() => match st {
                    Ok(st) => Some(Listened::Status(st)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => None,
                },
            };
            let Some(event) = event else { break };
            let Some(cache) = weak.upgrade() else { break };
            match event {
                Listened::Push(chunk) => cache.apply_remote(chunk.coord, chunk.data),
                Listened::Status(ConnectionStatus::Disconnected) => cache.clear(),
                Listened::Status(_) => {}
            }
        }
    });
}

enum Listened {
    Push(crate::transport::RemoteChunk),
    Status(ConnectionStatus),
}
