use std::{collections::VecDeque, sync::Mutex};

use log::debug;

use crate::types::FrameId;

/// Per-frame access record. With `k` timestamps recorded, the front of the
/// history is the k-th most recent access.
struct FrameRecord {
    history: VecDeque<u64>,
    evictable: bool,
}

impl FrameRecord {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            evictable: false,
        }
    }
}

struct ReplacerInner {
    frames: Vec<FrameRecord>,
    current_timestamp: u64,
    evictable_count: usize,
}

/// Eviction policy based on backward K-distance: frames with fewer than K
/// recorded accesses have infinite distance and go first (earliest first
/// access breaks the tie); otherwise the frame whose K-th most recent
/// access is oldest is the victim.
pub struct LruKReplacer {
    k: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1);
        let mut frames = Vec::with_capacity(num_frames);
        frames.resize_with(num_frames, FrameRecord::new);
        Self {
            k,
            inner: Mutex::new(ReplacerInner {
                frames,
                current_timestamp: 0,
                evictable_count: 0,
            }),
        }
    }

    /// Record an access. Does not change evictability or size.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock().unwrap();
        assert!(frame_id < inner.frames.len(), "frame id out of range");

        let timestamp = inner.current_timestamp;
        inner.current_timestamp += 1;

        let record = &mut inner.frames[frame_id];
        if record.history.len() == self.k {
            record.history.pop_front();
        }
        record.history.push_back(timestamp);
    }

    /// Toggle evictability. A no-op for frames without recorded accesses.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock().unwrap();
        assert!(frame_id < inner.frames.len(), "frame id out of range");

        let record = &inner.frames[frame_id];
        if record.history.is_empty() {
            return;
        }
        let was_evictable = record.evictable;

        if evictable && !was_evictable {
            inner.evictable_count += 1;
        } else if !evictable && was_evictable {
            inner.evictable_count -= 1;
        }
        inner.frames[frame_id].evictable = evictable;
    }

    /// Pick a victim, clear its history and mark it non-evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock().unwrap();

        let now = inner.current_timestamp;
        let mut victim: Option<FrameId> = None;
        // Distinguishes the under-K frames: for them the contest is the
        // earliest first access, for full ones the oldest K-th access.
        let mut max_interval: u64 = 0;
        let mut earliest_first: u64 = u64::MAX;

        for (frame_id, record) in inner.frames.iter().enumerate() {
            if !record.evictable || record.history.is_empty() {
                continue;
            }

            let first = *record.history.front().unwrap();
            if record.history.len() < self.k {
                max_interval = u64::MAX;
                if first < earliest_first {
                    earliest_first = first;
                    victim = Some(frame_id);
                }
            } else if max_interval < u64::MAX && now - first > max_interval {
                max_interval = now - first;
                victim = Some(frame_id);
            }
        }

        if let Some(frame_id) = victim {
            debug!("evicting frame {}", frame_id);
            let record = &mut inner.frames[frame_id];
            record.history.clear();
            record.evictable = false;
            inner.evictable_count -= 1;
        }

        victim
    }

    /// Drop an evictable frame's history outright. Panics when called on a
    /// non-evictable frame that has recorded accesses.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock().unwrap();
        assert!(frame_id < inner.frames.len(), "frame id out of range");

        let record = &mut inner.frames[frame_id];
        if record.history.is_empty() {
            return;
        }
        assert!(record.evictable, "removing a non-evictable frame");

        record.history.clear();
        record.evictable = false;
        inner.evictable_count -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().evictable_count
    }
}
