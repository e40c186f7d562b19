use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// Per-frame access history: the timestamps of the K most recent accesses
struct FrameHistory {
    timestamps: VecDeque<u64>,
    evictable: bool,
}

/// LRU-K page replacement policy.
///
/// The victim is the evictable frame with the largest backward k-distance
/// (current timestamp minus the k-th most recent access). Frames with fewer
/// than K recorded accesses count as +inf distance and are evicted first,
/// breaking ties by the earliest recorded access (classical LRU).
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
    num_frames: usize,
    k: usize,
}

struct ReplacerInner {
    histories: HashMap<FrameId, FrameHistory>,
    /// Logical clock, bumped on every recorded access
    current_ts: u64,
    /// Number of frames currently marked evictable
    evictable_count: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            inner: Mutex::new(ReplacerInner {
                histories: HashMap::new(),
                current_ts: 0,
                evictable_count: 0,
            }),
            num_frames,
            k,
        }
    }

    /// Record an access to `frame_id` at the current logical timestamp.
    /// A frame recorded for the first time starts out non-evictable.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(frame_id < self.num_frames, "frame id {} out of range", frame_id);
        let mut inner = self.inner.lock();

        let ts = inner.current_ts;
        inner.current_ts += 1;

        let history = inner.histories.entry(frame_id).or_insert_with(|| FrameHistory {
            timestamps: VecDeque::with_capacity(self.k),
            evictable: false,
        });
        if history.timestamps.len() == self.k {
            history.timestamps.pop_front();
        }
        history.timestamps.push_back(ts);
    }

    /// Toggle the evictable flag of a frame. No-op if the frame has no
    /// recorded accesses.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        assert!(frame_id < self.num_frames, "frame id {} out of range", frame_id);
        let mut inner = self.inner.lock();

        let Some(history) = inner.histories.get_mut(&frame_id) else {
            return;
        };
        if history.evictable == evictable {
            return;
        }
        history.evictable = evictable;
        if evictable {
            inner.evictable_count += 1;
        } else {
            inner.evictable_count -= 1;
        }
    }

    /// Evict the frame with the largest backward k-distance, removing its
    /// history entirely. Returns `None` if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        // Two candidate classes: frames with fewer than K accesses (infinite
        // distance, evicted first) and frames with a full history. Within a
        // class the earliest front timestamp wins.
        let mut cold_victim: Option<(u64, FrameId)> = None;
        let mut full_victim: Option<(u64, FrameId)> = None;

        for (&frame_id, history) in &inner.histories {
            if !history.evictable {
                continue;
            }
            let front = *history.timestamps.front().expect("recorded frame has history");
            let slot = if history.timestamps.len() < self.k {
                &mut cold_victim
            } else {
                &mut full_victim
            };
            match slot {
                Some((best_ts, _)) if *best_ts <= front => {}
                _ => *slot = Some((front, frame_id)),
            }
        }

        let (_, victim) = cold_victim.or(full_victim)?;
        inner.histories.remove(&victim);
        inner.evictable_count -= 1;
        Some(victim)
    }

    /// Force-remove an evictable frame's history. No-op if the frame is
    /// unknown; panics if the frame is known but pinned (non-evictable),
    /// since that indicates a bug in the caller.
    pub fn remove(&self, frame_id: FrameId) {
        assert!(frame_id < self.num_frames, "frame id {} out of range", frame_id);
        let mut inner = self.inner.lock();

        let Some(history) = inner.histories.get(&frame_id) else {
            return;
        };
        assert!(history.evictable, "cannot remove non-evictable frame {}", frame_id);
        inner.histories.remove(&frame_id);
        inner.evictable_count -= 1;
    }

    /// Number of currently evictable frames
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_order_respects_k_distance() {
        let replacer = LruKReplacer::new(7, 2);

        // Accesses: frame 1 twice, frames 2..=4 once each
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.record_access(3);
        replacer.record_access(4);
        replacer.record_access(1);

        for frame in 1..=4 {
            replacer.set_evictable(frame, true);
        }
        assert_eq!(replacer.size(), 4);

        // Frames 2, 3, 4 have fewer than K accesses (infinite distance) and
        // are evicted first in order of earliest access; frame 1 goes last.
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(3));
        assert_eq!(replacer.evict(), Some(4));
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_full_history_tie_break() {
        let replacer = LruKReplacer::new(4, 2);

        // Give every frame a full history; backward k-distance is decided
        // by the older of the two timestamps.
        replacer.record_access(0); // ts 0
        replacer.record_access(1); // ts 1
        replacer.record_access(0); // ts 2
        replacer.record_access(1); // ts 3
        replacer.record_access(0); // ts 4 -> history {2, 4}
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        // Frame 1's k-th most recent access (ts 1) is older than frame 0's (ts 2)
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_set_evictable_unknown_frame_is_noop() {
        let replacer = LruKReplacer::new(3, 2);
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_pinned_frame_not_evicted() {
        let replacer = LruKReplacer::new(3, 2);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);

        // Frame 1 was never marked evictable
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_remove_unknown_frame_is_noop() {
        let replacer = LruKReplacer::new(3, 2);
        replacer.remove(2);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    #[should_panic(expected = "non-evictable")]
    fn test_remove_pinned_frame_panics() {
        let replacer = LruKReplacer::new(3, 2);
        replacer.record_access(0);
        replacer.remove(0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_record_access_out_of_range_panics() {
        let replacer = LruKReplacer::new(3, 2);
        replacer.record_access(9);
    }
}
