//! The chunk store: authoritative state, serialized merges, coalesced flush.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use oekaki_types::{BlendMode, ChunkCoord, TileGeometry, merge_chunk};

use crate::error::StoreError;

/// Cached authoritative bytes for one coordinate. `None` until first use;
/// the slot's mutex is what serializes merges on that coordinate.
type Slot = Arc<Mutex<Option<Arc<Vec<u8>>>>>;

/// Authoritative tile storage.
///
/// Exactly one value exists per coordinate at any instant: the result of
/// every acknowledged merge in the order this store applied them. Reads
/// never fail: a chunk with no durable state (or unreadable durable
/// state) is a fully transparent buffer.
///
/// Merges on the same coordinate are serialized by a per-coordinate async
/// mutex; merges on different coordinates run fully in parallel. Merged
/// bytes land in a write queue that the flusher drains on an interval,
/// coalescing any number of merges between two ticks into one disk write
/// of the latest composite.
pub struct ChunkStore {
    geometry: TileGeometry,
    root: PathBuf,
    chunks: DashMap<ChunkCoord, Slot>,
    write_queue: SyncMutex<HashMap<ChunkCoord, Arc<Vec<u8>>>>,
}

impl ChunkStore {
    /// Open a store rooted at `root`, creating the directory if absent.
    pub fn open(root: impl Into<PathBuf>, geometry: TileGeometry) -> Result<Arc<Self>, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Arc::new(Self {
            geometry,
            root,
            chunks: DashMap::new(),
            write_queue: SyncMutex::new(HashMap::new()),
        }))
    }

    pub fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot(&self, coord: ChunkCoord) -> Slot {
        self.chunks.entry(coord).or_default().value().clone()
    }

    fn chunk_path(&self, coord: ChunkCoord) -> PathBuf {
        // The display form "x,y" is the on-disk name; it never contains
        // a path separator.
        self.root.join(coord.to_string())
    }

    /// Current authoritative bytes for a coordinate.
    ///
    /// Cached value if present, else loaded from disk; missing or
    /// malformed durable state degrades to a blank chunk.
    pub async fn read(&self, coord: ChunkCoord) -> Arc<Vec<u8>> {
        let slot = self.slot(coord);
        let mut guard = slot.lock().await;
        if let Some(bytes) = guard.as_ref() {
            return bytes.clone();
        }
        let bytes = Arc::new(self.load(coord).await);
        *guard = Some(bytes.clone());
        bytes
    }

    /// Composite `incoming` onto the coordinate's current bytes.
    ///
    /// Rejects buffers of the wrong length before touching any state.
    /// On success the merged result replaces the cached value, lands in
    /// the write queue (overwriting any unflushed entry for the same
    /// coordinate), and is returned.
    pub async fn merge(
        &self,
        coord: ChunkCoord,
        incoming: &[u8],
        mode: BlendMode,
    ) -> Result<Arc<Vec<u8>>, StoreError> {
        if !self.geometry.fits(incoming) {
            return Err(StoreError::LengthMismatch {
                expected: self.geometry.byte_len(),
                got: incoming.len(),
            });
        }

        let slot = self.slot(coord);
        let mut guard = slot.lock().await;
        let current = match guard.as_ref() {
            Some(bytes) => bytes.clone(),
            None => {
                let bytes = Arc::new(self.load(coord).await);
                *guard = Some(bytes.clone());
                bytes
            }
        };

        let merged = Arc::new(merge_chunk(&current, incoming, mode));
        *guard = Some(merged.clone());
        self.write_queue.lock().insert(coord, merged.clone());
        trace!(%coord, mode = ?mode, "merged chunk");
        Ok(merged)
    }

    /// Drain the write queue and persist every pending chunk.
    ///
    /// The queue is snapshotted under a short lock, so merges recorded
    /// while files are being written are kept for the next cycle. Returns
    /// the number of chunks drained. Failed writes are logged and dropped;
    /// the cache still holds those bytes, so the next merge on the same
    /// coordinate re-queues them.
    pub async fn flush_once(&self) -> usize {
        let pending: Vec<(ChunkCoord, Arc<Vec<u8>>)> = {
            let mut queue = self.write_queue.lock();
            queue.drain().collect()
        };
        let count = pending.len();
        for (coord, bytes) in pending {
            if let Err(e) = tokio::fs::write(self.chunk_path(coord), bytes.as_slice()).await {
                warn!(%coord, error = %e, "failed to persist chunk");
            }
        }
        if count > 0 {
            trace!(chunks = count, "flushed write queue");
        }
        count
    }

    /// Spawn the periodic flusher. Abort the handle on shutdown, then call
    /// [`flush_once`](Self::flush_once) a final time to drain stragglers.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so a freshly
            // started store doesn't flush an empty queue.
            tick.tick().await;
            loop {
                tick.tick().await;
                store.flush_once().await;
            }
        })
    }

    /// Number of chunks waiting for the next flush.
    pub fn pending_writes(&self) -> usize {
        self.write_queue.lock().len()
    }

    async fn load(&self, coord: ChunkCoord) -> Vec<u8> {
        match tokio::fs::read(self.chunk_path(coord)).await {
            Ok(bytes) if self.geometry.fits(&bytes) => bytes,
            Ok(bytes) => {
                warn!(%coord, len = bytes.len(), "chunk file has wrong length, treating as blank");
                self.geometry.blank()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => self.geometry.blank(),
            Err(e) => {
                debug!(%coord, error = %e, "chunk file unreadable, treating as blank");
                self.geometry.blank()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn geom() -> TileGeometry {
        TileGeometry::new(2)
    }

    fn setup() -> (Arc<ChunkStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path(), geom()).unwrap();
        (store, dir)
    }

    /// A 2×2 buffer filled with one RGBA pixel value.
    fn fill(pixel: [u8; 4]) -> Vec<u8> {
        pixel.repeat(4)
    }

    #[tokio::test]
    async fn missing_chunk_reads_blank() {
        let (store, _dir) = setup();
        let bytes = store.read(ChunkCoord::new(100, -100)).await;
        assert_eq!(*bytes, geom().blank());
    }

    #[tokio::test]
    async fn merge_is_visible_before_any_flush() {
        let (store, _dir) = setup();
        let coord = ChunkCoord::new(0, 0);
        let stroke = fill([1, 2, 3, 255]);

        let merged = store.merge(coord, &stroke, BlendMode::Normal).await.unwrap();
        assert_eq!(*merged, stroke);
        assert_eq!(store.read(coord).await, merged);
        assert_eq!(store.pending_writes(), 1);
    }

    #[tokio::test]
    async fn wrong_length_is_rejected_without_mutation() {
        let (store, _dir) = setup();
        let coord = ChunkCoord::new(4, 4);
        store
            .merge(coord, &fill([9, 9, 9, 255]), BlendMode::Normal)
            .await
            .unwrap();

        let err = store.merge(coord, &[0u8; 3], BlendMode::Normal).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::LengthMismatch { expected: 16, got: 3 }
        ));
        // The earlier merge is untouched.
        assert_eq!(*store.read(coord).await, fill([9, 9, 9, 255]));
    }

    #[tokio::test]
    async fn flush_coalesces_to_the_final_composite() {
        let (store, dir) = setup();
        let coord = ChunkCoord::new(-1, 3);

        store.merge(coord, &fill([10, 0, 0, 255]), BlendMode::Normal).await.unwrap();
        store.merge(coord, &fill([0, 20, 0, 255]), BlendMode::Normal).await.unwrap();
        let last = store.merge(coord, &fill([0, 0, 30, 255]), BlendMode::Normal).await.unwrap();

        assert_eq!(store.pending_writes(), 1);
        assert_eq!(store.flush_once().await, 1);
        assert_eq!(store.pending_writes(), 0);

        let on_disk = std::fs::read(dir.path().join("-1,3")).unwrap();
        assert_eq!(on_disk, *last);

        // Nothing left to write.
        assert_eq!(store.flush_once().await, 0);
    }

    #[tokio::test]
    async fn flushed_chunks_survive_a_fresh_store() {
        let (store, dir) = setup();
        let coord = ChunkCoord::new(7, 7);
        let stroke = fill([200, 100, 50, 255]);
        store.merge(coord, &stroke, BlendMode::Normal).await.unwrap();
        store.flush_once().await;

        let reopened = ChunkStore::open(dir.path(), geom()).unwrap();
        assert_eq!(*reopened.read(coord).await, stroke);
    }

    #[tokio::test]
    async fn corrupt_chunk_file_reads_blank() {
        let (store, dir) = setup();
        std::fs::write(dir.path().join("5,5"), b"short").unwrap();
        let bytes = store.read(ChunkCoord::new(5, 5)).await;
        assert_eq!(*bytes, geom().blank());
    }

    #[tokio::test]
    async fn concurrent_merges_on_one_coordinate_are_lossless() {
        let (store, _dir) = setup();
        let coord = ChunkCoord::new(0, 0);

        // Each task paints one distinct pixel of the 2×2 tile opaquely.
        let mut tasks = Vec::new();
        for pixel in 0..4usize {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut stroke = vec![0u8; 16];
                stroke[pixel * 4..pixel * 4 + 4].copy_from_slice(&[255, 0, 0, 255]);
                store.merge(coord, &stroke, BlendMode::Normal).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every pixel survived: no merge read a stale composite.
        let merged = store.read(coord).await;
        for pixel in 0..4 {
            assert_eq!(merged[pixel * 4 + 3], 255, "pixel {pixel} lost");
        }
    }

    #[tokio::test]
    async fn erase_round_trip() {
        let (store, _dir) = setup();
        let coord = ChunkCoord::new(2, 2);
        store.merge(coord, &fill([50, 60, 70, 255]), BlendMode::Normal).await.unwrap();
        let erased = store.merge(coord, &fill([0, 0, 0, 255]), BlendMode::Erase).await.unwrap();
        assert!(erased.chunks_exact(4).all(|p| p[3] == 0));
        // RGB kept from the destination.
        assert_eq!(&erased[..3], &[50, 60, 70]);
    }
}
