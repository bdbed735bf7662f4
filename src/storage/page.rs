use std::sync::atomic::{AtomicUsize, Ordering};

use crate::types::{PageId, Pod, INVALID_PAGE_ID, PAGE_SIZE};

/// A buffer pool slot. Holds at most one disk page at a time; which page it
/// holds changes across evictions, so callers must not cache a frame beyond
/// the pin they balance with `unpin_page`.
pub struct BufferFrame {
    pub page_id: PageId,
    pub is_dirty: bool,
    pub data: [u8; PAGE_SIZE],
    // Atomic so the pool can pin a resident frame without taking its latch.
    pin_count: AtomicUsize,
}

pub type FrameRef = Pod<BufferFrame>;

impl BufferFrame {
    pub(crate) fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            is_dirty: false,
            data: [0; PAGE_SIZE],
            pin_count: AtomicUsize::new(0),
        }
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::SeqCst)
    }

    pub(crate) fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the pin count after the decrement.
    pub(crate) fn unpin(&self) -> usize {
        self.pin_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn set_pin_count(&self, count: usize) {
        self.pin_count.store(count, Ordering::SeqCst);
    }

    pub(crate) fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.is_dirty = false;
        self.data.fill(0);
        self.set_pin_count(0);
    }
}
