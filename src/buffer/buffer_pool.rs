use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, RwLock},
};

use log::debug;

use crate::{
    buffer::LruKReplacer,
    container::ExtendibleHashTable,
    error::{Error, Result},
    storage::{page::BufferFrame, DiskManager, FrameRef},
    types::{FrameId, PageId, BUCKET_SIZE},
    utils::HandyRwLock,
};

/// Demand-paged cache of disk pages. A fixed set of frames is shared by
/// all pages; the page table maps resident page ids to frames, the free
/// list holds unused frames, and the replacer picks victims among
/// unpinned residents.
///
/// Every `new_page`/`fetch_page` must be balanced by exactly one
/// `unpin_page`.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FrameRef>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    free_list: Mutex<VecDeque<FrameId>>,
    // All operations run under this latch; the per-structure locks above
    // only exist because the structures own their state.
    latch: Mutex<()>,
    disk: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk: Arc<DiskManager>) -> Self {
        let mut frames: Vec<FrameRef> = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(Arc::new(RwLock::new(BufferFrame::new())));
            free_list.push_back(i);
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            free_list: Mutex::new(free_list),
            latch: Mutex::new(()),
            disk,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn replacer_size(&self) -> usize {
        self.replacer.size()
    }

    pub fn free_frame_count(&self) -> usize {
        self.free_list.lock().unwrap().len()
    }

    /// Allocate a fresh page and pin it. Fails with `BufferPoolFull` when
    /// no frame is free and nothing can be evicted.
    pub fn new_page(&self) -> Result<(PageId, FrameRef)> {
        let _latch = self.latch.lock().unwrap();

        let frame_id = self.acquire_frame()?;
        let page_id = self.disk.allocate_page();

        let frame = &self.frames[frame_id];
        {
            let mut guard = frame.wl();
            guard.page_id = page_id;
            guard.set_pin_count(1);
        }
        self.page_table.insert(&page_id, &frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        debug!("new page {} in frame {}", page_id, frame_id);
        Ok((page_id, Arc::clone(frame)))
    }

    /// Fetch a page, reading it from disk if it is not resident, and pin
    /// it. Does not touch the dirty flag.
    pub fn fetch_page(&self, page_id: PageId) -> Result<FrameRef> {
        let _latch = self.latch.lock().unwrap();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id];
            frame.rl().pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(frame));
        }

        let frame_id = self.acquire_frame()?;
        let frame = &self.frames[frame_id];
        {
            let mut guard = frame.wl();
            guard.page_id = page_id;
            guard.set_pin_count(1);
            self.disk.read_page(page_id, &mut guard.data)?;
        }
        self.page_table.insert(&page_id, &frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(frame))
    }

    /// Drop one pin. `is_dirty` ors into the frame's dirty flag. Returns
    /// false when the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let _latch = self.latch.lock().unwrap();

        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };

        let frame = &self.frames[frame_id];
        let mut guard = frame.wl();
        if guard.pin_count() == 0 {
            return false;
        }

        if is_dirty {
            guard.is_dirty = true;
        }
        if guard.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write a resident page back to disk and clear its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let _latch = self.latch.lock().unwrap();
        self.flush_locked(page_id)
    }

    pub fn flush_all(&self) {
        let _latch = self.latch.lock().unwrap();
        for frame in &self.frames {
            let page_id = frame.rl().page_id;
            if self.page_table.find(&page_id).is_some() {
                self.flush_locked(page_id);
            }
        }
    }

    /// Evict a page from the pool and return its frame to the free list.
    /// Fails (returns false) when the page is pinned; deleting a
    /// non-resident page trivially succeeds.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let _latch = self.latch.lock().unwrap();

        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return Ok(true),
        };

        let frame = &self.frames[frame_id];
        {
            let mut guard = frame.wl();
            if guard.pin_count() > 0 {
                return Ok(false);
            }
            if guard.is_dirty {
                self.disk.write_page(guard.page_id, &guard.data)?;
            }
            guard.reset();
        }

        self.page_table.remove(&page_id);
        self.replacer.set_evictable(frame_id, true);
        self.replacer.remove(frame_id);
        self.free_list.lock().unwrap().push_back(frame_id);
        self.disk.deallocate_page(page_id);

        debug!("deleted page {} from frame {}", page_id, frame_id);
        Ok(true)
    }

    /// Find a frame for a new resident: the free list first, then the
    /// replacer. An evicted victim is written back when dirty and wiped.
    fn acquire_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().unwrap().pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match self.replacer.evict() {
            Some(frame_id) => frame_id,
            None => return Err(Error::buffer_pool_full()),
        };

        let frame = &self.frames[frame_id];
        let mut guard = frame.wl();
        debug!("evicting page {} from frame {}", guard.page_id, frame_id);
        if guard.is_dirty {
            self.disk.write_page(guard.page_id, &guard.data)?;
        }
        self.page_table.remove(&guard.page_id);
        guard.reset();

        Ok(frame_id)
    }

    fn flush_locked(&self, page_id: PageId) -> bool {
        let frame_id = match self.page_table.find(&page_id) {
            Some(frame_id) => frame_id,
            None => return false,
        };

        let frame = &self.frames[frame_id];
        let mut guard = frame.wl();
        if self.disk.write_page(page_id, &guard.data).is_err() {
            return false;
        }
        guard.is_dirty = false;
        true
    }
}
