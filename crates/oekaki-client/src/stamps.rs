//! Per-coordinate write stamps.
//!
//! Every local write records a fresh stamp for its coordinate before its
//! request leaves the process. When the acknowledgment comes back, the
//! write applies its result only if its stamp is still the newest, so a
//! slower response to an older write can then never clobber a newer
//! optimistic edit. Stamps order nothing across coordinates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use oekaki_types::ChunkCoord;

#[derive(Default)]
pub(crate) struct WriteStamps {
    next: AtomicU64,
    table: Mutex<HashMap<ChunkCoord, u64>>,
}

impl WriteStamps {
    /// Record that a new write on `coord` is starting; returns its stamp.
    pub fn begin(&self, coord: ChunkCoord) -> u64 {
        let stamp = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.table.lock().insert(coord, stamp);
        stamp
    }

    /// The newest stamp recorded for `coord`, if any write ever started.
    pub fn current(&self, coord: ChunkCoord) -> Option<u64> {
        self.table.lock().get(&coord).copied()
    }

    /// Whether `stamp` is still the newest write on `coord`.
    pub fn is_current(&self, coord: ChunkCoord, stamp: u64) -> bool {
        self.current(coord) == Some(stamp)
    }

    pub fn clear(&self) {
        self.table.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_write_supersedes_older() {
        let stamps = WriteStamps::default();
        let coord = ChunkCoord::new(0, 0);

        let first = stamps.begin(coord);
        assert!(stamps.is_current(coord, first));

        let second = stamps.begin(coord);
        assert!(stamps.is_current(coord, second));
        assert!(!stamps.is_current(coord, first));
        assert!(second > first);
    }

    #[test]
    fn coordinates_are_independent() {
        let stamps = WriteStamps::default();
        let a = ChunkCoord::new(0, 0);
        let b = ChunkCoord::new(1, 0);

        let on_a = stamps.begin(a);
        stamps.begin(b);
        assert!(stamps.is_current(a, on_a));
    }

    #[test]
    fn untouched_coordinates_have_no_stamp() {
        let stamps = WriteStamps::default();
        assert_eq!(stamps.current(ChunkCoord::new(9, 9)), None);
        assert!(!stamps.is_current(ChunkCoord::new(9, 9), 1));
    }

    #[test]
    fn clear_forgets_everything() {
        let stamps = WriteStamps::default();
        let coord = ChunkCoord::new(2, 2);
        let stamp = stamps.begin(coord);
        stamps.clear();
        assert!(!stamps.is_current(coord, stamp));
    }
}
