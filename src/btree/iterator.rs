use std::sync::Arc;

use crate::{
    btree::{key::TreeKey, page::LeafView},
    buffer::BufferPoolManager,
    storage::FrameRef,
    types::{PageId, Rid, INVALID_PAGE_ID},
    utils::HandyRwLock,
};

/// Forward iterator over the leaf chain. Holds a pin on the current leaf
/// and releases it when advancing past it or when dropped.
pub struct TreeIterator<K: TreeKey> {
    bpm: Arc<BufferPoolManager>,
    current: Option<(PageId, FrameRef)>,
    index: usize,
    _key: std::marker::PhantomData<K>,
}

impl<K: TreeKey> TreeIterator<K> {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        page_id: PageId,
        frame: FrameRef,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            current: Some((page_id, frame)),
            index,
            _key: std::marker::PhantomData,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            current: None,
            index: 0,
            _key: std::marker::PhantomData,
        }
    }

    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }
}

impl<K: TreeKey> Iterator for TreeIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            let (page_id, frame) = match &self.current {
                Some((page_id, frame)) => (*page_id, Arc::clone(frame)),
                None => return None,
            };

            let (item, next_pid) = {
                let mut guard = frame.wl();
                let leaf = LeafView::<K>::new(&mut guard.data);
                let item = if self.index < leaf.size() {
                    Some((leaf.key_at(self.index), leaf.rid_at(self.index)))
                } else {
                    None
                };
                (item, leaf.next_page_id())
            };

            if let Some(item) = item {
                self.index += 1;
                return Some(item);
            }

            // This leaf is exhausted; move along the sibling chain.
            self.current = None;
            self.bpm.unpin_page(page_id, false);
            if next_pid == INVALID_PAGE_ID {
                return None;
            }
            match self.bpm.fetch_page(next_pid) {
                Ok(next_frame) => {
                    self.current = Some((next_pid, next_frame));
                    self.index = 0;
                }
                Err(_) => return None,
            }
        }
    }
}

impl<K: TreeKey> Drop for TreeIterator<K> {
    fn drop(&mut self) {
        // The pool may already be tearing down; a failed unpin is fine.
        if let Some((page_id, _)) = self.current.take() {
            self.bpm.unpin_page(page_id, false);
        }
    }
}
