use std::sync::RwLock;

use bit_vec::BitVec;

use crate::{
    storage::Tuple,
    types::{Rid, TableOid},
    utils::HandyRwLock,
};

struct HeapInner {
    tuples: Vec<Tuple>,
    // Slot occupancy; a cleared bit is a deleted row.
    live: BitVec,
}

/// In-memory slotted row store, one per table. Row ids are
/// `(table oid, slot)` and are never reused, so a rid stays valid as a
/// lockable name even after deletion.
pub struct TableHeap {
    oid: TableOid,
    inner: RwLock<HeapInner>,
}

impl TableHeap {
    pub fn new(oid: TableOid) -> Self {
        Self {
            oid,
            inner: RwLock::new(HeapInner {
                tuples: Vec::new(),
                live: BitVec::new(),
            }),
        }
    }

    pub fn oid(&self) -> TableOid {
        self.oid
    }

    pub fn insert_tuple(&self, tuple: Tuple) -> Rid {
        let mut inner = self.inner.wl();
        let slot = inner.tuples.len() as u32;
        inner.tuples.push(tuple);
        inner.live.push(true);
        Rid::new(self.oid, slot)
    }

    /// Mark a row deleted. Returns false when the rid is unknown or the
    /// row is already gone.
    pub fn mark_delete(&self, rid: Rid) -> bool {
        if rid.page_id != self.oid {
            return false;
        }
        let mut inner = self.inner.wl();
        let slot = rid.slot as usize;
        if slot >= inner.tuples.len() || !inner.live.get(slot).unwrap_or(false) {
            return false;
        }
        inner.live.set(slot, false);
        true
    }

    pub fn get_tuple(&self, rid: Rid) -> Option<Tuple> {
        if rid.page_id != self.oid {
            return None;
        }
        let inner = self.inner.rl();
        let slot = rid.slot as usize;
        if slot >= inner.tuples.len() || !inner.live.get(slot).unwrap_or(false) {
            return None;
        }
        Some(inner.tuples[slot].clone())
    }

    /// Snapshot of all live rows in slot order.
    pub fn scan(&self) -> Vec<(Rid, Tuple)> {
        let inner = self.inner.rl();
        inner
            .tuples
            .iter()
            .enumerate()
            .filter(|(slot, _)| inner.live.get(*slot).unwrap_or(false))
            .map(|(slot, tuple)| (Rid::new(self.oid, slot as u32), tuple.clone()))
            .collect()
    }

    pub fn live_count(&self) -> usize {
        let inner = self.inner.rl();
        inner.live.iter().filter(|b| *b).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Cell;

    fn row(v: i64) -> Tuple {
        Tuple::new(vec![Cell::Int64(v)])
    }

    #[test]
    fn test_insert_get_delete() {
        let heap = TableHeap::new(5);
        let r1 = heap.insert_tuple(row(10));
        let r2 = heap.insert_tuple(row(20));
        assert_eq!(r1, Rid::new(5, 0));
        assert_eq!(r2, Rid::new(5, 1));

        assert_eq!(heap.get_tuple(r1), Some(row(10)));
        assert_eq!(heap.live_count(), 2);

        assert!(heap.mark_delete(r1));
        assert!(!heap.mark_delete(r1));
        assert_eq!(heap.get_tuple(r1), None);
        assert_eq!(heap.live_count(), 1);

        let rows = heap.scan();
        assert_eq!(rows, vec![(r2, row(20))]);
    }

    #[test]
    fn test_foreign_rid_rejected() {
        let heap = TableHeap::new(5);
        heap.insert_tuple(row(1));
        assert_eq!(heap.get_tuple(Rid::new(6, 0)), None);
        assert!(!heap.mark_delete(Rid::new(6, 0)));
    }
}
