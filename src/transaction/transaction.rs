use core::fmt;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, RwLock,
    },
};

use crate::{
    types::{Rid, TableOid, TxnId},
    utils::HandyRwLock,
};

static TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Per-mode lock bookkeeping. The lock manager is the only writer; the
/// sets always mirror the granted requests in its queues.
#[derive(Default)]
pub struct LockSets {
    pub shared_tables: HashSet<TableOid>,
    pub exclusive_tables: HashSet<TableOid>,
    pub intention_shared_tables: HashSet<TableOid>,
    pub intention_exclusive_tables: HashSet<TableOid>,
    pub shared_intention_exclusive_tables: HashSet<TableOid>,
    pub shared_rows: HashMap<TableOid, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    pub fn holds_any_row_lock(&self, oid: TableOid) -> bool {
        self.shared_rows.get(&oid).map_or(false, |s| !s.is_empty())
            || self.exclusive_rows.get(&oid).map_or(false, |s| !s.is_empty())
    }
}

pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    lock_sets: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(isolation_level: IsolationLevel) -> Arc<Self> {
        Arc::new(Self {
            id: TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            lock_sets: Mutex::new(LockSets::default()),
        })
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.rl()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.wl() = state;
    }

    pub fn lock_sets(&self) -> MutexGuard<'_, LockSets> {
        self.lock_sets.lock().unwrap()
    }

    pub fn is_table_shared_locked(&self, oid: TableOid) -> bool {
        self.lock_sets().shared_tables.contains(&oid)
    }

    pub fn is_table_exclusive_locked(&self, oid: TableOid) -> bool {
        self.lock_sets().exclusive_tables.contains(&oid)
    }

    pub fn is_table_intention_shared_locked(&self, oid: TableOid) -> bool {
        self.lock_sets().intention_shared_tables.contains(&oid)
    }

    pub fn is_table_intention_exclusive_locked(&self, oid: TableOid) -> bool {
        self.lock_sets().intention_exclusive_tables.contains(&oid)
    }

    pub fn is_table_shared_intention_exclusive_locked(&self, oid: TableOid) -> bool {
        self.lock_sets()
            .shared_intention_exclusive_tables
            .contains(&oid)
    }

    pub fn is_row_shared_locked(&self, oid: TableOid, rid: &Rid) -> bool {
        self.lock_sets()
            .shared_rows
            .get(&oid)
            .map_or(false, |s| s.contains(rid))
    }

    pub fn is_row_exclusive_locked(&self, oid: TableOid, rid: &Rid) -> bool {
        self.lock_sets()
            .exclusive_rows
            .get(&oid)
            .map_or(false, |s| s.contains(rid))
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx_{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let t1 = Transaction::new(IsolationLevel::RepeatableRead);
        let t2 = Transaction::new(IsolationLevel::RepeatableRead);
        assert!(t2.id() > t1.id());
        assert_eq!(t1.state(), TransactionState::Growing);
    }

    #[test]
    fn test_lock_set_queries() {
        let txn = Transaction::new(IsolationLevel::ReadCommitted);
        assert!(!txn.is_table_shared_locked(3));

        txn.lock_sets().shared_tables.insert(3);
        assert!(txn.is_table_shared_locked(3));

        let rid = Rid::new(3, 0);
        txn.lock_sets()
            .exclusive_rows
            .entry(3)
            .or_default()
            .insert(rid);
        assert!(txn.is_row_exclusive_locked(3, &rid));
        assert!(txn.lock_sets().holds_any_row_lock(3));
    }
}
