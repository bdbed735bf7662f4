use std::sync::{Arc, RwLock};

use log::debug;

use crate::{
    btree::{
        iterator::TreeIterator,
        key::TreeKey,
        page::{self, BTreePageType, HeaderView, InternalView, LeafView},
    },
    buffer::BufferPoolManager,
    error::Result,
    storage::FrameRef,
    types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID},
    utils::HandyRwLock,
};

/// Cached root bookkeeping, guarded by the tree latch: readers share it
/// for lookups, writers hold it exclusively across structure changes.
struct RootAnchor {
    root_page_id: PageId,
    begin_page_id: PageId,
}

enum MergeOutcome {
    Done,
    /// The parent lost a separator and fell below minimum; continue there.
    Continue(PageId),
}

/// Disk-resident B+ tree index. All page access goes through the buffer
/// pool; every fetched or created page is unpinned before the operation
/// returns.
pub struct BTree<K: TreeKey> {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    leaf_max_size: usize,
    leaf_min_size: usize,
    internal_max_size: usize,
    internal_min_size: usize,
    root: RwLock<RootAnchor>,
    _marker: std::marker::PhantomData<K>,
}

impl<K: TreeKey> BTree<K> {
    /// Open (or create) the tree named `index_name`. If the header page
    /// already records a root for this name, the tree resumes from it.
    pub fn new(
        index_name: &str,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2 && leaf_max_size <= LeafView::<K>::capacity());
        assert!(
            internal_max_size >= 3 && internal_max_size < InternalView::<K>::capacity(),
            "internal nodes overflow by one entry before splitting"
        );

        let tree = Self {
            index_name: index_name.to_string(),
            bpm,
            leaf_max_size,
            leaf_min_size: leaf_max_size >> 1,
            internal_max_size,
            internal_min_size: (1 + internal_max_size) >> 1,
            root: RwLock::new(RootAnchor {
                root_page_id: INVALID_PAGE_ID,
                begin_page_id: INVALID_PAGE_ID,
            }),
            _marker: std::marker::PhantomData,
        };
        tree.recover_root()?;
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        self.root.rl().root_page_id == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root.rl().root_page_id
    }

    /// Point lookup.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>> {
        let anchor = self.root.rl();
        if anchor.root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let leaf_pid = self.find_leaf(anchor.root_page_id, key)?;
        let frame = self.bpm.fetch_page(leaf_pid)?;
        let result = {
            let mut guard = frame.wl();
            let leaf = LeafView::<K>::new(&mut guard.data);
            let index = leaf.lower_bound(key);
            if index < leaf.size() && leaf.key_at(index) == *key {
                Some(leaf.rid_at(index))
            } else {
                None
            }
        };
        self.bpm.unpin_page(leaf_pid, false);
        Ok(result)
    }

    /// Insert a unique key. Returns false when the key is already present.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool> {
        let mut anchor = self.root.wl();

        if anchor.root_page_id == INVALID_PAGE_ID {
            self.start_new_tree(&mut anchor, key, rid)?;
            return Ok(true);
        }

        let leaf_pid = self.find_leaf(anchor.root_page_id, key)?;
        let leaf_frame = self.bpm.fetch_page(leaf_pid)?;

        {
            let mut guard = leaf_frame.wl();
            let mut leaf = LeafView::<K>::new(&mut guard.data);
            let index = leaf.lower_bound(key);
            if index < leaf.size() && leaf.key_at(index) == *key {
                drop(guard);
                self.bpm.unpin_page(leaf_pid, false);
                return Ok(false);
            }
            leaf.insert_at(index, key, rid);
        }

        let done = self.split_leaf(&mut anchor, &leaf_frame, leaf_pid)?;
        let parent_pid = page::read_u32(&leaf_frame.rl().data, page::OFFSET_PARENT);
        self.bpm.unpin_page(leaf_pid, true);
        if done {
            return Ok(true);
        }

        // Propagate the split upward until a parent absorbs the separator.
        let mut current_pid = parent_pid;
        loop {
            let frame = self.bpm.fetch_page(current_pid)?;
            let done = self.split_internal(&mut anchor, &frame, current_pid)?;
            let next_pid = page::read_u32(&frame.rl().data, page::OFFSET_PARENT);
            self.bpm.unpin_page(current_pid, true);
            if done {
                break;
            }
            current_pid = next_pid;
        }

        Ok(true)
    }

    /// Remove a key; absent keys are a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut anchor = self.root.wl();
        if anchor.root_page_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let leaf_pid = self.find_leaf(anchor.root_page_id, key)?;
        let leaf_frame = self.bpm.fetch_page(leaf_pid)?;

        {
            let mut guard = leaf_frame.wl();
            let mut leaf = LeafView::<K>::new(&mut guard.data);
            let index = leaf.lower_bound(key);
            if index >= leaf.size() || leaf.key_at(index) != *key {
                drop(guard);
                self.bpm.unpin_page(leaf_pid, false);
                return Ok(());
            }
            leaf.remove_at(index);
        }

        let mut outcome = self.merge_leaf(&mut anchor, &leaf_frame, leaf_pid)?;
        while let MergeOutcome::Continue(pid) = outcome {
            let frame = self.bpm.fetch_page(pid)?;
            outcome = self.merge_internal(&mut anchor, &frame, pid)?;
        }
        Ok(())
    }

    /// Iterator over the whole tree, starting at the leftmost leaf.
    pub fn iter(&self) -> Result<TreeIterator<K>> {
        let anchor = self.root.rl();
        if anchor.begin_page_id == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(Arc::clone(&self.bpm)));
        }
        let frame = self.bpm.fetch_page(anchor.begin_page_id)?;
        Ok(TreeIterator::new(
            Arc::clone(&self.bpm),
            anchor.begin_page_id,
            frame,
            0,
        ))
    }

    /// Iterator positioned at the first entry whose key is `>= key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<K>> {
        let anchor = self.root.rl();
        if anchor.root_page_id == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(Arc::clone(&self.bpm)));
        }

        let leaf_pid = self.find_leaf(anchor.root_page_id, key)?;
        let frame = self.bpm.fetch_page(leaf_pid)?;
        let (index, size, next_pid) = {
            let mut guard = frame.wl();
            let leaf = LeafView::<K>::new(&mut guard.data);
            (leaf.lower_bound(key), leaf.size(), leaf.next_page_id())
        };

        if index < size {
            return Ok(TreeIterator::new(
                Arc::clone(&self.bpm),
                leaf_pid,
                frame,
                index,
            ));
        }

        // Everything in this leaf is smaller; start at the next one.
        drop(frame);
        self.bpm.unpin_page(leaf_pid, false);
        if next_pid == INVALID_PAGE_ID {
            return Ok(TreeIterator::end(Arc::clone(&self.bpm)));
        }
        let frame = self.bpm.fetch_page(next_pid)?;
        Ok(TreeIterator::new(Arc::clone(&self.bpm), next_pid, frame, 0))
    }

    fn recover_root(&self) -> Result<()> {
        let frame = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        let recorded = {
            let mut guard = frame.wl();
            let header = HeaderView::new(&mut guard.data);
            header.get_root(&self.index_name)
        };
        self.bpm.unpin_page(HEADER_PAGE_ID, false);

        if let Some(root_pid) = recorded {
            if root_pid != INVALID_PAGE_ID {
                let mut anchor = self.root.wl();
                anchor.root_page_id = root_pid;
                anchor.begin_page_id = self.find_leftmost(root_pid)?;
                debug!(
                    "index {} resumed from root page {}",
                    self.index_name, root_pid
                );
            }
        }
        Ok(())
    }

    /// Record the current root in the header page so the tree survives a
    /// restart.
    fn update_root_record(&self, anchor: &RootAnchor) -> Result<()> {
        let frame = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut guard = frame.wl();
            let mut header = HeaderView::new(&mut guard.data);
            if !header.update_record(&self.index_name, anchor.root_page_id) {
                header.insert_record(&self.index_name, anchor.root_page_id);
            }
        }
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    fn start_new_tree(&self, anchor: &mut RootAnchor, key: &K, rid: Rid) -> Result<()> {
        let (page_id, frame) = self.bpm.new_page()?;
        {
            let mut guard = frame.wl();
            let mut leaf = LeafView::<K>::new(&mut guard.data);
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert_at(0, key, rid);
        }
        anchor.root_page_id = page_id;
        anchor.begin_page_id = page_id;
        self.update_root_record(anchor)?;
        self.bpm.unpin_page(page_id, true);

        debug!("index {} started new tree at page {}", self.index_name, page_id);
        Ok(())
    }

    /// Descend from `root_pid` to the leaf that owns `key`. Every page on
    /// the path is unpinned, including the returned leaf.
    fn find_leaf(&self, root_pid: PageId, key: &K) -> Result<PageId> {
        let mut pid = root_pid;
        loop {
            let frame = self.bpm.fetch_page(pid)?;
            let next = {
                let mut guard = frame.wl();
                match page::page_type(&guard.data) {
                    BTreePageType::Leaf => None,
                    _ => {
                        let node = InternalView::<K>::new(&mut guard.data);
                        let index = node.upper_bound(key);
                        Some(node.value_at(index - 1))
                    }
                }
            };
            self.bpm.unpin_page(pid, false);
            match next {
                None => return Ok(pid),
                Some(child) => pid = child,
            }
        }
    }

    fn find_leftmost(&self, root_pid: PageId) -> Result<PageId> {
        let mut pid = root_pid;
        loop {
            let frame = self.bpm.fetch_page(pid)?;
            let next = {
                let mut guard = frame.wl();
                match page::page_type(&guard.data) {
                    BTreePageType::Leaf => None,
                    _ => Some(InternalView::<K>::new(&mut guard.data).value_at(0)),
                }
            };
            self.bpm.unpin_page(pid, false);
            match next {
                None => return Ok(pid),
                Some(child) => pid = child,
            }
        }
    }

    /// Rewrite a child's parent pointer. The header layout is shared by
    /// leaf and internal pages, so the child's type does not matter.
    fn set_parent(&self, pid: PageId, parent: PageId) -> Result<()> {
        let frame = self.bpm.fetch_page(pid)?;
        {
            let mut guard = frame.wl();
            page::write_u32(&mut guard.data, page::OFFSET_PARENT, parent);
        }
        self.bpm.unpin_page(pid, true);
        Ok(())
    }

    /// Split an overfull leaf. Returns true when no further propagation is
    /// needed; the caller keeps responsibility for unpinning `leaf_frame`.
    fn split_leaf(
        &self,
        anchor: &mut RootAnchor,
        leaf_frame: &FrameRef,
        leaf_pid: PageId,
    ) -> Result<bool> {
        {
            let mut guard = leaf_frame.wl();
            let leaf = LeafView::<K>::new(&mut guard.data);
            if leaf.size() < self.leaf_max_size {
                return Ok(true);
            }
        }

        let (new_pid, new_frame) = self.bpm.new_page()?;
        let pivot;
        let was_root;
        let parent_pid;
        {
            let mut leaf_guard = leaf_frame.wl();
            let mut new_guard = new_frame.wl();
            let mut leaf = LeafView::<K>::new(&mut leaf_guard.data);
            let mut new_leaf = LeafView::<K>::new(&mut new_guard.data);
            new_leaf.init(new_pid, leaf.parent_page_id(), self.leaf_max_size);

            // Move the upper half to the new right sibling.
            let total = leaf.size();
            for (j, i) in (self.leaf_min_size..total).enumerate() {
                let k = leaf.key_at(i);
                new_leaf.set_entry(j, &k, leaf.rid_at(i));
            }
            new_leaf.set_size(total - self.leaf_min_size);
            leaf.set_size(self.leaf_min_size);

            // Chain: old -> new -> old's former next.
            new_leaf.set_next_page_id(leaf.next_page_id());
            leaf.set_next_page_id(new_pid);

            pivot = new_leaf.key_at(0);
            was_root = leaf.is_root();
            parent_pid = leaf.parent_page_id();
        }

        if was_root {
            let root_pid = self.install_new_root(leaf_pid, new_pid, &pivot)?;
            {
                let mut guard = leaf_frame.wl();
                LeafView::<K>::new(&mut guard.data).set_parent_page_id(root_pid);
            }
            {
                let mut guard = new_frame.wl();
                LeafView::<K>::new(&mut guard.data).set_parent_page_id(root_pid);
            }
            anchor.root_page_id = root_pid;
            self.update_root_record(anchor)?;
            self.bpm.unpin_page(new_pid, true);
            debug!("leaf {} split into {}, new root {}", leaf_pid, new_pid, root_pid);
            return Ok(true);
        }

        let parent_frame = self.bpm.fetch_page(parent_pid)?;
        let parent_fits = {
            let mut guard = parent_frame.wl();
            let mut parent = InternalView::<K>::new(&mut guard.data);
            let index = parent.lower_bound(&pivot);
            parent.insert_at(index, &pivot, new_pid);
            parent.size() <= self.internal_max_size
        };
        self.bpm.unpin_page(new_pid, true);
        self.bpm.unpin_page(parent_pid, true);
        debug!("leaf {} split into {}", leaf_pid, new_pid);
        Ok(parent_fits)
    }

    /// Split an overfull internal node, promoting (not copying) the pivot.
    /// Returns true when no further propagation is needed.
    fn split_internal(
        &self,
        anchor: &mut RootAnchor,
        frame: &FrameRef,
        pid: PageId,
    ) -> Result<bool> {
        {
            let mut guard = frame.wl();
            let node = InternalView::<K>::new(&mut guard.data);
            if node.size() <= self.internal_max_size {
                return Ok(true);
            }
        }

        let (new_pid, new_frame) = self.bpm.new_page()?;
        let pivot;
        let was_root;
        let parent_pid;
        let mut moved_children = Vec::new();
        {
            let mut guard = frame.wl();
            let mut new_guard = new_frame.wl();
            let mut node = InternalView::<K>::new(&mut guard.data);
            let mut new_node = InternalView::<K>::new(&mut new_guard.data);
            new_node.init(new_pid, node.parent_page_id(), self.internal_max_size);

            // The key at the split point moves up; its child pointer
            // becomes slot 0 of the new right page.
            pivot = node.key_at(self.internal_min_size);
            new_node.set_value_at(0, node.value_at(self.internal_min_size));
            moved_children.push(node.value_at(self.internal_min_size));

            let total = node.size();
            for (j, i) in (self.internal_min_size + 1..total).enumerate() {
                let k = node.key_at(i);
                new_node.set_entry(j + 1, &k, node.value_at(i));
                moved_children.push(node.value_at(i));
            }
            new_node.set_size(total - self.internal_min_size);
            node.set_size(self.internal_min_size);

            was_root = node.is_root();
            parent_pid = node.parent_page_id();
        }

        for child in moved_children {
            self.set_parent(child, new_pid)?;
        }

        if was_root {
            let root_pid = self.install_new_root(pid, new_pid, &pivot)?;
            {
                let mut guard = frame.wl();
                InternalView::<K>::new(&mut guard.data).set_parent_page_id(root_pid);
            }
            {
                let mut guard = new_frame.wl();
                InternalView::<K>::new(&mut guard.data).set_parent_page_id(root_pid);
            }
            anchor.root_page_id = root_pid;
            self.update_root_record(anchor)?;
            self.bpm.unpin_page(new_pid, true);
            debug!("internal {} split into {}, new root {}", pid, new_pid, root_pid);
            return Ok(true);
        }

        let parent_frame = self.bpm.fetch_page(parent_pid)?;
        let parent_fits = {
            let mut guard = parent_frame.wl();
            let mut parent = InternalView::<K>::new(&mut guard.data);
            let index = parent.lower_bound(&pivot);
            parent.insert_at(index, &pivot, new_pid);
            parent.size() <= self.internal_max_size
        };
        self.bpm.unpin_page(new_pid, true);
        self.bpm.unpin_page(parent_pid, true);
        debug!("internal {} split into {}", pid, new_pid);
        Ok(parent_fits)
    }

    /// Allocate a fresh root with exactly two children.
    fn install_new_root(&self, left: PageId, right: PageId, pivot: &K) -> Result<PageId> {
        let (root_pid, root_frame) = self.bpm.new_page()?;
        {
            let mut guard = root_frame.wl();
            let mut root = InternalView::<K>::new(&mut guard.data);
            root.init(root_pid, INVALID_PAGE_ID, self.internal_max_size);
            root.set_size(2);
            root.set_value_at(0, left);
            root.set_entry(1, pivot, right);
        }
        self.bpm.unpin_page(root_pid, true);
        Ok(root_pid)
    }

    /// Rebalance an underfull leaf: steal from a sibling when possible,
    /// otherwise merge. Consumes the caller's pin on `leaf_frame`.
    fn merge_leaf(
        &self,
        anchor: &mut RootAnchor,
        leaf_frame: &FrameRef,
        leaf_pid: PageId,
    ) -> Result<MergeOutcome> {
        let size;
        let is_root;
        let parent_pid;
        {
            let mut guard = leaf_frame.wl();
            let leaf = LeafView::<K>::new(&mut guard.data);
            size = leaf.size();
            is_root = leaf.is_root();
            parent_pid = leaf.parent_page_id();
        }

        if size >= self.leaf_min_size || (is_root && size > 0) {
            self.bpm.unpin_page(leaf_pid, true);
            return Ok(MergeOutcome::Done);
        }

        if is_root {
            // The last entry is gone; the tree is empty now.
            self.bpm.unpin_page(leaf_pid, true);
            let _ = self.bpm.delete_page(leaf_pid)?;
            anchor.root_page_id = INVALID_PAGE_ID;
            anchor.begin_page_id = INVALID_PAGE_ID;
            self.update_root_record(anchor)?;
            debug!("index {} is empty, root released", self.index_name);
            return Ok(MergeOutcome::Done);
        }

        let parent_frame = self.bpm.fetch_page(parent_pid)?;
        let (child_index, left_pid, right_pid) = {
            let mut guard = parent_frame.wl();
            let parent = InternalView::<K>::new(&mut guard.data);
            let child_index = parent
                .child_index_of(leaf_pid)
                .expect("leaf missing from its parent");
            let left_pid = (child_index >= 1).then(|| parent.value_at(child_index - 1));
            let right_pid =
                (child_index + 1 < parent.size()).then(|| parent.value_at(child_index + 1));
            (child_index, left_pid, right_pid)
        };

        // Redistribution: the left sibling first, then the right.
        if let Some(left_pid) = left_pid {
            let left_frame = self.bpm.fetch_page(left_pid)?;
            let stolen = {
                let mut guard = left_frame.wl();
                let mut left = LeafView::<K>::new(&mut guard.data);
                if left.size() > self.leaf_min_size {
                    let last = left.size() - 1;
                    let entry = (left.key_at(last), left.rid_at(last));
                    left.set_size(last);
                    Some(entry)
                } else {
                    None
                }
            };
            match stolen {
                Some((k, r)) => {
                    {
                        let mut guard = leaf_frame.wl();
                        LeafView::<K>::new(&mut guard.data).insert_at(0, &k, r);
                    }
                    {
                        let mut guard = parent_frame.wl();
                        InternalView::<K>::new(&mut guard.data).set_key_at(child_index, &k);
                    }
                    self.bpm.unpin_page(left_pid, true);
                    self.bpm.unpin_page(parent_pid, true);
                    self.bpm.unpin_page(leaf_pid, true);
                    debug!("leaf {} borrowed from left sibling {}", leaf_pid, left_pid);
                    return Ok(MergeOutcome::Done);
                }
                None => {
                    self.bpm.unpin_page(left_pid, false);
                }
            }
        }

        if let Some(right_pid) = right_pid {
            let right_frame = self.bpm.fetch_page(right_pid)?;
            let stolen = {
                let mut guard = right_frame.wl();
                let mut right = LeafView::<K>::new(&mut guard.data);
                if right.size() > self.leaf_min_size {
                    let entry = (right.key_at(0), right.rid_at(0));
                    right.remove_at(0);
                    let boundary = right.key_at(0);
                    Some((entry, boundary))
                } else {
                    None
                }
            };
            match stolen {
                Some(((k, r), boundary)) => {
                    {
                        let mut guard = leaf_frame.wl();
                        let mut leaf = LeafView::<K>::new(&mut guard.data);
                        let end = leaf.size();
                        leaf.insert_at(end, &k, r);
                    }
                    {
                        let mut guard = parent_frame.wl();
                        InternalView::<K>::new(&mut guard.data)
                            .set_key_at(child_index + 1, &boundary);
                    }
                    self.bpm.unpin_page(right_pid, true);
                    self.bpm.unpin_page(parent_pid, true);
                    self.bpm.unpin_page(leaf_pid, true);
                    debug!("leaf {} borrowed from right sibling {}", leaf_pid, right_pid);
                    return Ok(MergeOutcome::Done);
                }
                None => {
                    self.bpm.unpin_page(right_pid, false);
                }
            }
        }

        // Merge. Preferring the left sibling keeps the surviving page on
        // the left, which keeps the leftmost leaf's id stable.
        if let Some(left_pid) = left_pid {
            let left_frame = self.bpm.fetch_page(left_pid)?;
            {
                let mut left_guard = left_frame.wl();
                let mut leaf_guard = leaf_frame.wl();
                let mut left = LeafView::<K>::new(&mut left_guard.data);
                let leaf = LeafView::<K>::new(&mut leaf_guard.data);
                let base = left.size();
                for i in 0..leaf.size() {
                    let k = leaf.key_at(i);
                    left.set_entry(base + i, &k, leaf.rid_at(i));
                }
                left.set_size(base + leaf.size());
                left.set_next_page_id(leaf.next_page_id());
            }
            self.bpm.unpin_page(leaf_pid, true);
            let _ = self.bpm.delete_page(leaf_pid)?;
            debug!("leaf {} merged into {}", leaf_pid, left_pid);

            return self.finish_merge(anchor, &parent_frame, parent_pid, child_index, left_pid, &left_frame);
        }

        let right_pid = right_pid.expect("underfull non-root leaf with no siblings");
        let right_frame = self.bpm.fetch_page(right_pid)?;
        {
            let mut leaf_guard = leaf_frame.wl();
            let mut right_guard = right_frame.wl();
            let mut leaf = LeafView::<K>::new(&mut leaf_guard.data);
            let right = LeafView::<K>::new(&mut right_guard.data);
            let base = leaf.size();
            for i in 0..right.size() {
                let k = right.key_at(i);
                leaf.set_entry(base + i, &k, right.rid_at(i));
            }
            leaf.set_size(base + right.size());
            leaf.set_next_page_id(right.next_page_id());
        }
        self.bpm.unpin_page(right_pid, true);
        let _ = self.bpm.delete_page(right_pid)?;
        debug!("leaf {} merged into {}", right_pid, leaf_pid);

        self.finish_merge(anchor, &parent_frame, parent_pid, child_index + 1, leaf_pid, leaf_frame)
    }

    /// Shared tail of every merge: drop the separator at `remove_index`
    /// from the parent, collapse the root if it is down to one child, and
    /// decide whether rebalancing continues at the parent.
    ///
    /// `survivor_frame` is the page that absorbed the merge; its pin is
    /// released here.
    fn finish_merge(
        &self,
        anchor: &mut RootAnchor,
        parent_frame: &FrameRef,
        parent_pid: PageId,
        remove_index: usize,
        survivor_pid: PageId,
        survivor_frame: &FrameRef,
    ) -> Result<MergeOutcome> {
        let (is_root, parent_size) = {
            let mut guard = parent_frame.wl();
            let mut parent = InternalView::<K>::new(&mut guard.data);
            parent.remove_at(remove_index);
            (parent.is_root(), parent.size())
        };

        if is_root && parent_size <= 1 {
            {
                let mut guard = survivor_frame.wl();
                page::write_u32(&mut guard.data, page::OFFSET_PARENT, INVALID_PAGE_ID);
            }
            anchor.root_page_id = survivor_pid;
            self.update_root_record(anchor)?;
            self.bpm.unpin_page(survivor_pid, true);
            self.bpm.unpin_page(parent_pid, true);
            let _ = self.bpm.delete_page(parent_pid)?;
            debug!("root collapsed, page {} promoted", survivor_pid);
            return Ok(MergeOutcome::Done);
        }

        self.bpm.unpin_page(survivor_pid, true);
        self.bpm.unpin_page(parent_pid, true);
        if parent_size >= self.internal_min_size {
            Ok(MergeOutcome::Done)
        } else {
            Ok(MergeOutcome::Continue(parent_pid))
        }
    }

    /// Rebalance an underfull internal node. Consumes the caller's pin on
    /// `frame`.
    fn merge_internal(
        &self,
        anchor: &mut RootAnchor,
        frame: &FrameRef,
        pid: PageId,
    ) -> Result<MergeOutcome> {
        let size;
        let is_root;
        let parent_pid;
        {
            let mut guard = frame.wl();
            let node = InternalView::<K>::new(&mut guard.data);
            size = node.size();
            is_root = node.is_root();
            parent_pid = node.parent_page_id();
        }

        if size >= self.internal_min_size || is_root {
            self.bpm.unpin_page(pid, true);
            return Ok(MergeOutcome::Done);
        }

        let parent_frame = self.bpm.fetch_page(parent_pid)?;
        let (child_index, left_pid, right_pid) = {
            let mut guard = parent_frame.wl();
            let parent = InternalView::<K>::new(&mut guard.data);
            let child_index = parent
                .child_index_of(pid)
                .expect("node missing from its parent");
            let left_pid = (child_index >= 1).then(|| parent.value_at(child_index - 1));
            let right_pid =
                (child_index + 1 < parent.size()).then(|| parent.value_at(child_index + 1));
            (child_index, left_pid, right_pid)
        };

        // Rotate through the parent: the separator comes down, the
        // sibling's boundary key goes up.
        if let Some(left_pid) = left_pid {
            let left_frame = self.bpm.fetch_page(left_pid)?;
            let stolen = {
                let mut guard = left_frame.wl();
                let mut left = InternalView::<K>::new(&mut guard.data);
                if left.size() > self.internal_min_size {
                    let last = left.size() - 1;
                    let entry = (left.key_at(last), left.value_at(last));
                    left.set_size(last);
                    Some(entry)
                } else {
                    None
                }
            };
            match stolen {
                Some((up_key, child)) => {
                    let separator = {
                        let mut guard = parent_frame.wl();
                        InternalView::<K>::new(&mut guard.data).key_at(child_index)
                    };
                    {
                        let mut guard = frame.wl();
                        let mut node = InternalView::<K>::new(&mut guard.data);
                        node.push_front(&separator, child);
                    }
                    {
                        let mut guard = parent_frame.wl();
                        InternalView::<K>::new(&mut guard.data).set_key_at(child_index, &up_key);
                    }
                    self.set_parent(child, pid)?;
                    self.bpm.unpin_page(left_pid, true);
                    self.bpm.unpin_page(parent_pid, true);
                    self.bpm.unpin_page(pid, true);
                    debug!("internal {} borrowed from left sibling {}", pid, left_pid);
                    return Ok(MergeOutcome::Done);
                }
                None => {
                    self.bpm.unpin_page(left_pid, false);
                }
            }
        }

        if let Some(right_pid) = right_pid {
            let right_frame = self.bpm.fetch_page(right_pid)?;
            let stolen = {
                let mut guard = right_frame.wl();
                let mut right = InternalView::<K>::new(&mut guard.data);
                if right.size() > self.internal_min_size {
                    let child = right.value_at(0);
                    let up_key = right.key_at(1);
                    right.remove_at(0);
                    Some((child, up_key))
                } else {
                    None
                }
            };
            match stolen {
                Some((child, up_key)) => {
                    let separator = {
                        let mut guard = parent_frame.wl();
                        InternalView::<K>::new(&mut guard.data).key_at(child_index + 1)
                    };
                    {
                        let mut guard = frame.wl();
                        let mut node = InternalView::<K>::new(&mut guard.data);
                        let end = node.size();
                        node.set_size(end + 1);
                        node.set_entry(end, &separator, child);
                    }
                    {
                        let mut guard = parent_frame.wl();
                        InternalView::<K>::new(&mut guard.data)
                            .set_key_at(child_index + 1, &up_key);
                    }
                    self.set_parent(child, pid)?;
                    self.bpm.unpin_page(right_pid, true);
                    self.bpm.unpin_page(parent_pid, true);
                    self.bpm.unpin_page(pid, true);
                    debug!("internal {} borrowed from right sibling {}", pid, right_pid);
                    return Ok(MergeOutcome::Done);
                }
                None => {
                    self.bpm.unpin_page(right_pid, false);
                }
            }
        }

        // Merge, demoting the separator between the two nodes.
        if let Some(left_pid) = left_pid {
            let left_frame = self.bpm.fetch_page(left_pid)?;
            let separator = {
                let mut guard = parent_frame.wl();
                InternalView::<K>::new(&mut guard.data).key_at(child_index)
            };
            let mut moved_children = Vec::new();
            {
                let mut left_guard = left_frame.wl();
                let mut guard = frame.wl();
                let mut left = InternalView::<K>::new(&mut left_guard.data);
                let node = InternalView::<K>::new(&mut guard.data);
                let base = left.size();
                left.set_entry(base, &separator, node.value_at(0));
                moved_children.push(node.value_at(0));
                for i in 1..node.size() {
                    let k = node.key_at(i);
                    left.set_entry(base + i, &k, node.value_at(i));
                    moved_children.push(node.value_at(i));
                }
                left.set_size(base + node.size());
            }
            for child in moved_children {
                self.set_parent(child, left_pid)?;
            }
            self.bpm.unpin_page(pid, true);
            let _ = self.bpm.delete_page(pid)?;
            debug!("internal {} merged into {}", pid, left_pid);

            return self.finish_merge(anchor, &parent_frame, parent_pid, child_index, left_pid, &left_frame);
        }

        let right_pid = right_pid.expect("underfull non-root node with no siblings");
        let right_frame = self.bpm.fetch_page(right_pid)?;
        let separator = {
            let mut guard = parent_frame.wl();
            InternalView::<K>::new(&mut guard.data).key_at(child_index + 1)
        };
        let mut moved_children = Vec::new();
        {
            let mut guard = frame.wl();
            let mut right_guard = right_frame.wl();
            let mut node = InternalView::<K>::new(&mut guard.data);
            let right = InternalView::<K>::new(&mut right_guard.data);
            let base = node.size();
            node.set_entry(base, &separator, right.value_at(0));
            moved_children.push(right.value_at(0));
            for i in 1..right.size() {
                let k = right.key_at(i);
                node.set_entry(base + i, &k, right.value_at(i));
                moved_children.push(right.value_at(i));
            }
            node.set_size(base + right.size());
        }
        for child in moved_children {
            self.set_parent(child, pid)?;
        }
        self.bpm.unpin_page(right_pid, true);
        let _ = self.bpm.delete_page(right_pid)?;
        debug!("internal {} merged into {}", right_pid, pid);

        self.finish_merge(anchor, &parent_frame, parent_pid, child_index + 1, pid, frame)
    }
}

/// Test-support walkers. `check_integrity` panics on any violated tree
/// invariant; `draw` renders the tree as graphviz for eyeballing.
impl<K: TreeKey> BTree<K> {
    pub fn check_integrity(&self) {
        let anchor = self.root.rl();
        if anchor.root_page_id == INVALID_PAGE_ID {
            assert_eq!(anchor.begin_page_id, INVALID_PAGE_ID);
            return;
        }

        let mut leaves = Vec::new();
        self.check_node(anchor.root_page_id, INVALID_PAGE_ID, None, None, &mut leaves)
            .unwrap();

        // The sibling chain from the leftmost leaf must visit exactly the
        // leaves of the in-order walk.
        let mut chain = Vec::new();
        let mut pid = anchor.begin_page_id;
        while pid != INVALID_PAGE_ID {
            chain.push(pid);
            let frame = self.bpm.fetch_page(pid).unwrap();
            let next = {
                let mut guard = frame.wl();
                LeafView::<K>::new(&mut guard.data).next_page_id()
            };
            self.bpm.unpin_page(pid, false);
            pid = next;
        }
        assert_eq!(chain, leaves, "sibling chain disagrees with tree order");
    }

    fn check_node(
        &self,
        pid: PageId,
        expected_parent: PageId,
        lower: Option<K>,
        upper: Option<K>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        let is_root = expected_parent == INVALID_PAGE_ID;
        let frame = self.bpm.fetch_page(pid)?;
        let children = {
            let mut guard = frame.wl();
            match page::page_type(&guard.data) {
                BTreePageType::Leaf => {
                    let leaf = LeafView::<K>::new(&mut guard.data);
                    assert_eq!(leaf.page_id(), pid);
                    assert_eq!(leaf.parent_page_id(), expected_parent);
                    assert!(leaf.size() <= self.leaf_max_size);
                    if !is_root {
                        assert!(leaf.size() >= self.leaf_min_size, "leaf {} underfull", pid);
                    }
                    for i in 0..leaf.size() {
                        let k = leaf.key_at(i);
                        if i > 0 {
                            assert!(leaf.key_at(i - 1) < k, "leaf {} keys out of order", pid);
                        }
                        if let Some(lo) = lower {
                            assert!(k >= lo, "leaf {} key below subtree bound", pid);
                        }
                        if let Some(hi) = upper {
                            assert!(k < hi, "leaf {} key above subtree bound", pid);
                        }
                    }
                    leaves.push(pid);
                    Vec::new()
                }
                _ => {
                    let node = InternalView::<K>::new(&mut guard.data);
                    assert_eq!(node.page_id(), pid);
                    assert_eq!(node.parent_page_id(), expected_parent);
                    assert!(node.size() <= self.internal_max_size);
                    if !is_root {
                        assert!(
                            node.size() >= self.internal_min_size,
                            "internal {} underfull",
                            pid
                        );
                    } else {
                        assert!(node.size() >= 2, "internal root {} has one child", pid);
                    }

                    let mut children = Vec::with_capacity(node.size());
                    for i in 0..node.size() {
                        if i > 0 {
                            let k = node.key_at(i);
                            if i > 1 {
                                assert!(node.key_at(i - 1) < k, "internal {} keys out of order", pid);
                            }
                            if let Some(lo) = lower {
                                assert!(k >= lo);
                            }
                            if let Some(hi) = upper {
                                assert!(k < hi);
                            }
                        }
                        let child_lower = if i == 0 { lower } else { Some(node.key_at(i)) };
                        let child_upper = if i + 1 < node.size() {
                            Some(node.key_at(i + 1))
                        } else {
                            upper
                        };
                        children.push((node.value_at(i), child_lower, child_upper));
                    }
                    children
                }
            }
        };
        self.bpm.unpin_page(pid, false);

        for (child, lo, hi) in children {
            self.check_node(child, pid, lo, hi, leaves)?;
        }
        Ok(())
    }

    pub fn draw(&self) -> Result<String> {
        let anchor = self.root.rl();
        let mut out = String::from("digraph G {\n");
        if anchor.root_page_id != INVALID_PAGE_ID {
            self.draw_node(anchor.root_page_id, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn draw_node(&self, pid: PageId, out: &mut String) -> Result<()> {
        let frame = self.bpm.fetch_page(pid)?;
        let (label, children, next) = {
            let mut guard = frame.wl();
            match page::page_type(&guard.data) {
                BTreePageType::Leaf => {
                    let leaf = LeafView::<K>::new(&mut guard.data);
                    let keys: Vec<String> =
                        (0..leaf.size()).map(|i| format!("{:?}", leaf.key_at(i))).collect();
                    (
                        format!("n_{} [shape=box label=\"{}\"];\n", pid, keys.join("|")),
                        Vec::new(),
                        leaf.next_page_id(),
                    )
                }
                _ => {
                    let node = InternalView::<K>::new(&mut guard.data);
                    let keys: Vec<String> =
                        (1..node.size()).map(|i| format!("{:?}", node.key_at(i))).collect();
                    let children: Vec<PageId> =
                        (0..node.size()).map(|i| node.value_at(i)).collect();
                    (
                        format!("n_{} [label=\"{}\"];\n", pid, keys.join("|")),
                        children,
                        INVALID_PAGE_ID,
                    )
                }
            }
        };
        self.bpm.unpin_page(pid, false);

        out.push_str(&label);
        if next != INVALID_PAGE_ID {
            out.push_str(&format!("n_{} -> n_{};\n", pid, next));
        }
        for child in children {
            out.push_str(&format!("n_{} -> n_{};\n", pid, child));
            self.draw_node(child, out)?;
        }
        Ok(())
    }
}
