use core::fmt;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, Weak,
    },
    thread,
    time::Duration,
};

use log::{debug, info};

use crate::{
    error::{AbortReason, Error, Result},
    transaction::{IsolationLevel, Transaction, TransactionState},
    types::{Rid, TableOid, TxnId},
};

use super::wait_for_graph::WaitForGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
    IntentionShared,
    IntentionExclusive,
    SharedIntentionExclusive,
}

impl LockMode {
    /// Standard compatibility matrix.
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, x) | (x, IntentionShared) => x != Exclusive,
            (IntentionExclusive, IntentionExclusive) => true,
            (IntentionExclusive, _) | (_, IntentionExclusive) => false,
            (Shared, Shared) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LockMode::Shared => "S",
            LockMode::Exclusive => "X",
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::SharedIntentionExclusive => "SIX",
        };
        write!(f, "{}", s)
    }
}

/// Legal strengthenings: IS->{S,X,IX,SIX}, S->{X,SIX}, IX->{X,SIX},
/// SIX->{X}.
fn can_upgrade(from: LockMode, to: LockMode) -> bool {
    use LockMode::*;
    matches!(
        (from, to),
        (IntentionShared, Shared)
            | (IntentionShared, Exclusive)
            | (IntentionShared, IntentionExclusive)
            | (IntentionShared, SharedIntentionExclusive)
            | (Shared, Exclusive)
            | (Shared, SharedIntentionExclusive)
            | (IntentionExclusive, Exclusive)
            | (IntentionExclusive, SharedIntentionExclusive)
            | (SharedIntentionExclusive, Exclusive)
    )
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

#[derive(Default)]
struct QueueState {
    requests: Vec<LockRequest>,
    /// The one transaction allowed to have a pending upgrade here.
    upgrading: Option<TxnId>,
}

struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new_arc() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            cv: Condvar::new(),
        })
    }
}

/// Hierarchical two-phase lock manager: five table modes, S/X row modes,
/// FIFO queues with a single prioritized upgrade per queue, and a
/// background wait-for-graph deadlock detector that aborts the youngest
/// transaction of every cycle.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<(TableOid, Rid), Arc<LockRequestQueue>>>,
    // Lets the detector flip a victim to Aborted; populated on first use.
    txns: Mutex<HashMap<TxnId, Arc<Transaction>>>,
    stop: AtomicBool,
}

impl LockManager {
    /// Create the manager and spawn its deadlock detector, which runs
    /// every `cycle_detection_interval` until the manager is dropped.
    pub fn new(cycle_detection_interval: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            stop: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&manager);
        thread::Builder::new()
            .name("deadlock-detector".to_string())
            .spawn(move || Self::run_cycle_detection(weak, cycle_detection_interval))
            .expect("failed to spawn deadlock detector");

        manager
    }

    /// Acquire a table lock, blocking while incompatible requests are
    /// ahead. Returns false when the transaction was aborted while
    /// waiting; isolation or upgrade violations abort and error out.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool> {
        self.register(txn);

        match txn.state() {
            TransactionState::Aborted | TransactionState::Committed => return Ok(false),
            _ => {}
        }
        self.check_table_request(txn, mode)?;

        let queue = {
            let mut map = self.table_lock_map.lock().unwrap();
            Arc::clone(map.entry(oid).or_insert_with(LockRequestQueue::new_arc))
        };

        let mut state = queue.state.lock().unwrap();
        let mut upgraded = false;

        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
            let held = state.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if state.upgrading.is_some() && state.upgrading != Some(txn.id()) {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !can_upgrade(held, mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }

            // Drop the held lock, then re-queue ahead of ordinary waiters.
            Self::table_lock_set_remove(txn, held, oid);
            state.requests.remove(pos);
            state.upgrading = Some(txn.id());
            upgraded = true;
            let front = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                front,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
        } else {
            state.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        while !Self::grantable(&state, txn.id(), mode) {
            state = queue.cv.wait(state).unwrap();
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn_id != txn.id());
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                debug!("{} aborted while waiting for {} on table {}", txn, mode, oid);
                return Ok(false);
            }
        }

        for r in state.requests.iter_mut() {
            if r.txn_id == txn.id() {
                r.granted = true;
            }
        }
        if upgraded {
            state.upgrading = None;
        }
        Self::table_lock_set_insert(txn, mode, oid);
        debug!("{} granted {} on table {}", txn, mode, oid);
        Ok(true)
    }

    /// Release a granted table lock, applying the 2PL state transition.
    /// Fails while the transaction still holds row locks on the table.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> Result<bool> {
        let queue = {
            let map = self.table_lock_map.lock().unwrap();
            match map.get(&oid) {
                Some(queue) => Arc::clone(queue),
                None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
            }
        };

        let mut state = queue.state.lock().unwrap();

        if txn.lock_sets().holds_any_row_lock(oid) {
            return Err(self.abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let pos = match state
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id())
        {
            Some(pos) => pos,
            None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
        };

        let mode = state.requests[pos].mode;
        Self::transition_on_unlock(txn, mode);
        if state.upgrading == Some(txn.id()) {
            state.upgrading = None;
        }
        state.requests.remove(pos);
        Self::table_lock_set_remove(txn, mode, oid);
        queue.cv.notify_all();
        debug!("{} released {} on table {}", txn, mode, oid);
        Ok(true)
    }

    /// Acquire a row lock. Rows take only S or X, and require a covering
    /// table lock.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool> {
        self.register(txn);

        match txn.state() {
            TransactionState::Aborted | TransactionState::Committed => return Ok(false),
            _ => {}
        }

        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.check_row_request(txn, mode)?;
        self.check_row_hierarchy(txn, mode, oid)?;

        let queue = {
            let mut map = self.row_lock_map.lock().unwrap();
            Arc::clone(
                map.entry((oid, rid))
                    .or_insert_with(LockRequestQueue::new_arc),
            )
        };

        let mut state = queue.state.lock().unwrap();
        let mut upgraded = false;

        if let Some(pos) = state.requests.iter().position(|r| r.txn_id == txn.id()) {
            let held = state.requests[pos].mode;
            if held == mode {
                return Ok(true);
            }
            if state.upgrading.is_some() && state.upgrading != Some(txn.id()) {
                return Err(self.abort(txn, AbortReason::UpgradeConflict));
            }
            if !can_upgrade(held, mode) {
                return Err(self.abort(txn, AbortReason::IncompatibleUpgrade));
            }

            Self::row_lock_set_remove(txn, held, oid, rid);
            state.requests.remove(pos);
            state.upgrading = Some(txn.id());
            upgraded = true;
            let front = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                front,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
        } else {
            state.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        while !Self::grantable(&state, txn.id(), mode) {
            state = queue.cv.wait(state).unwrap();
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn_id != txn.id());
                if state.upgrading == Some(txn.id()) {
                    state.upgrading = None;
                }
                queue.cv.notify_all();
                debug!("{} aborted while waiting for {} on {}", txn, mode, rid);
                return Ok(false);
            }
        }

        for r in state.requests.iter_mut() {
            if r.txn_id == txn.id() {
                r.granted = true;
            }
        }
        if upgraded {
            state.upgrading = None;
        }
        Self::row_lock_set_insert(txn, mode, oid, rid);
        debug!("{} granted {} on table {} {}", txn, mode, oid, rid);
        Ok(true)
    }

    pub fn unlock_row(&self, txn: &Arc<Transaction>, oid: TableOid, rid: Rid) -> Result<bool> {
        let queue = {
            let map = self.row_lock_map.lock().unwrap();
            match map.get(&(oid, rid)) {
                Some(queue) => Arc::clone(queue),
                None => return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld)),
            }
        };

        let mut state = queue.state.lock().unwrap();

        let pos = match state
            .requests
            .iter()
            .position(|r| r.granted && r.txn_id == txn.id())
        {
            Some(pos) => pos,
            None => {
                // A transaction cleaning up after an abort finds nothing
                // here; that is not a protocol violation.
                match txn.state() {
                    TransactionState::Aborted | TransactionState::Committed => return Ok(false),
                    _ => {
                        return Err(self.abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
                    }
                }
            }
        };

        let mode = state.requests[pos].mode;
        Self::transition_on_unlock(txn, mode);
        if state.upgrading == Some(txn.id()) {
            state.upgrading = None;
        }
        state.requests.remove(pos);
        Self::row_lock_set_remove(txn, mode, oid, rid);
        queue.cv.notify_all();
        debug!("{} released {} on table {} {}", txn, mode, oid, rid);
        Ok(true)
    }

    /// Release everything the transaction still holds, rows before
    /// tables, with no 2PL transitions. Commit/abort cleanup.
    pub fn unlock_all(&self, txn: &Arc<Transaction>) {
        let row_locks: Vec<(TableOid, Rid)> = {
            let sets = txn.lock_sets();
            sets.shared_rows
                .iter()
                .chain(sets.exclusive_rows.iter())
                .flat_map(|(oid, rids)| rids.iter().map(|rid| (*oid, *rid)))
                .collect()
        };
        for (oid, rid) in row_locks {
            self.release_quietly(&self.row_lock_map, &(oid, rid), txn);
        }

        let table_locks: Vec<TableOid> = {
            let sets = txn.lock_sets();
            sets.shared_tables
                .iter()
                .chain(sets.exclusive_tables.iter())
                .chain(sets.intention_shared_tables.iter())
                .chain(sets.intention_exclusive_tables.iter())
                .chain(sets.shared_intention_exclusive_tables.iter())
                .copied()
                .collect()
        };
        for oid in table_locks {
            self.release_quietly(&self.table_lock_map, &oid, txn);
        }

        {
            let mut sets = txn.lock_sets();
            *sets = Default::default();
        }
        self.txns.lock().unwrap().remove(&txn.id());
    }

    /// One pass of deadlock detection: build the wait-for graph, abort
    /// the youngest member of every cycle, wake its queues.
    pub fn detect_deadlocks(&self) {
        let table_queues: Vec<Arc<LockRequestQueue>> = self
            .table_lock_map
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        let row_queues: Vec<Arc<LockRequestQueue>> =
            self.row_lock_map.lock().unwrap().values().cloned().collect();

        let mut graph = WaitForGraph::new();
        for queue in table_queues.iter().chain(row_queues.iter()) {
            let state = queue.state.lock().unwrap();
            for waiter in state.requests.iter().filter(|r| !r.granted) {
                for granted in state.requests.iter().filter(|r| r.granted) {
                    if !waiter.mode.compatible_with(granted.mode) {
                        graph.add_edge(waiter.txn_id, granted.txn_id);
                    }
                }
            }
        }

        while let Some(cycle) = graph.find_cycle() {
            let victim = *cycle.iter().max().unwrap();
            info!("deadlock cycle {:?}, aborting tx_{}", cycle, victim);

            if let Some(txn) = self.txns.lock().unwrap().get(&victim).cloned() {
                txn.set_state(TransactionState::Aborted);
            }
            graph.remove_txn(victim);

            for queue in table_queues.iter().chain(row_queues.iter()) {
                let state = queue.state.lock().unwrap();
                if state.requests.iter().any(|r| r.txn_id == victim) {
                    queue.cv.notify_all();
                }
            }
        }
    }

    /// Stop the background detector at the next tick.
    pub fn stop_detection(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn run_cycle_detection(weak: Weak<LockManager>, interval: Duration) {
        loop {
            thread::sleep(interval);
            let manager = match weak.upgrade() {
                Some(manager) => manager,
                None => break,
            };
            if manager.stop.load(Ordering::Relaxed) {
                break;
            }
            manager.detect_deadlocks();
        }
    }

    fn register(&self, txn: &Arc<Transaction>) {
        self.txns
            .lock()
            .unwrap()
            .entry(txn.id())
            .or_insert_with(|| Arc::clone(txn));
    }

    fn abort(&self, txn: &Transaction, reason: AbortReason) -> Error {
        txn.set_state(TransactionState::Aborted);
        Error::abort(txn.id(), reason)
    }

    fn check_table_request(&self, txn: &Transaction, mode: LockMode) -> Result<()> {
        use LockMode::*;

        if txn.isolation_level() == IsolationLevel::ReadUncommitted
            && matches!(mode, Shared | IntentionShared | SharedIntentionExclusive)
        {
            return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }

        if txn.state() == TransactionState::Shrinking {
            match txn.isolation_level() {
                IsolationLevel::RepeatableRead | IsolationLevel::ReadUncommitted => {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
                IsolationLevel::ReadCommitted => {
                    if !matches!(mode, Shared | IntentionShared) {
                        return Err(self.abort(txn, AbortReason::LockOnShrinking));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_row_request(&self, txn: &Transaction, mode: LockMode) -> Result<()> {
        if txn.isolation_level() == IsolationLevel::ReadUncommitted && mode == LockMode::Shared {
            return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }

        if txn.state() == TransactionState::Shrinking {
            match txn.isolation_level() {
                IsolationLevel::RepeatableRead | IsolationLevel::ReadUncommitted => {
                    return Err(self.abort(txn, AbortReason::LockOnShrinking));
                }
                IsolationLevel::ReadCommitted => {
                    if mode != LockMode::Shared {
                        return Err(self.abort(txn, AbortReason::LockOnShrinking));
                    }
                }
            }
        }
        Ok(())
    }

    /// S on a row needs any table lock; X needs one of {IX, SIX, X}.
    fn check_row_hierarchy(&self, txn: &Transaction, mode: LockMode, oid: TableOid) -> Result<()> {
        let covered = match mode {
            LockMode::Shared => {
                txn.is_table_intention_shared_locked(oid)
                    || txn.is_table_shared_locked(oid)
                    || txn.is_table_intention_exclusive_locked(oid)
                    || txn.is_table_shared_intention_exclusive_locked(oid)
                    || txn.is_table_exclusive_locked(oid)
            }
            LockMode::Exclusive => {
                txn.is_table_exclusive_locked(oid)
                    || txn.is_table_intention_exclusive_locked(oid)
                    || txn.is_table_shared_intention_exclusive_locked(oid)
            }
            _ => false,
        };
        if !covered {
            return Err(self.abort(txn, AbortReason::TableLockNotPresent));
        }
        Ok(())
    }

    /// FIFO grant check: the request must be compatible with every
    /// granted request and with every request queued ahead of it.
    fn grantable(state: &QueueState, txn_id: TxnId, mode: LockMode) -> bool {
        for r in &state.requests {
            if r.granted && !r.mode.compatible_with(mode) {
                return false;
            }
        }

        for (i, r) in state.requests.iter().enumerate() {
            if !r.granted {
                for earlier in &state.requests[..i] {
                    if !r.mode.compatible_with(earlier.mode) {
                        return false;
                    }
                }
            }
            if r.txn_id == txn_id {
                return true;
            }
        }
        false
    }

    fn transition_on_unlock(txn: &Transaction, mode: LockMode) {
        match txn.state() {
            TransactionState::Aborted | TransactionState::Committed => return,
            _ => {}
        }

        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if matches!(mode, LockMode::Shared | LockMode::Exclusive) {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
            IsolationLevel::ReadCommitted | IsolationLevel::ReadUncommitted => {
                if mode == LockMode::Exclusive {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
        }
    }

    fn table_lock_set_insert(txn: &Transaction, mode: LockMode, oid: TableOid) {
        let mut sets = txn.lock_sets();
        match mode {
            LockMode::Shared => sets.shared_tables.insert(oid),
            LockMode::Exclusive => sets.exclusive_tables.insert(oid),
            LockMode::IntentionShared => sets.intention_shared_tables.insert(oid),
            LockMode::IntentionExclusive => sets.intention_exclusive_tables.insert(oid),
            LockMode::SharedIntentionExclusive => {
                sets.shared_intention_exclusive_tables.insert(oid)
            }
        };
    }

    fn table_lock_set_remove(txn: &Transaction, mode: LockMode, oid: TableOid) {
        let mut sets = txn.lock_sets();
        match mode {
            LockMode::Shared => sets.shared_tables.remove(&oid),
            LockMode::Exclusive => sets.exclusive_tables.remove(&oid),
            LockMode::IntentionShared => sets.intention_shared_tables.remove(&oid),
            LockMode::IntentionExclusive => sets.intention_exclusive_tables.remove(&oid),
            LockMode::SharedIntentionExclusive => {
                sets.shared_intention_exclusive_tables.remove(&oid)
            }
        };
    }

    fn row_lock_set_insert(txn: &Transaction, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut sets = txn.lock_sets();
        match mode {
            LockMode::Shared => sets.shared_rows.entry(oid).or_default().insert(rid),
            LockMode::Exclusive => sets.exclusive_rows.entry(oid).or_default().insert(rid),
            _ => return,
        };
    }

    fn row_lock_set_remove(txn: &Transaction, mode: LockMode, oid: TableOid, rid: Rid) {
        let mut sets = txn.lock_sets();
        match mode {
            LockMode::Shared => {
                if let Some(rids) = sets.shared_rows.get_mut(&oid) {
                    rids.remove(&rid);
                }
            }
            LockMode::Exclusive => {
                if let Some(rids) = sets.exclusive_rows.get_mut(&oid) {
                    rids.remove(&rid);
                }
            }
            _ => {}
        }
    }

    fn release_quietly<K: std::hash::Hash + Eq + Clone>(
        &self,
        map: &Mutex<HashMap<K, Arc<LockRequestQueue>>>,
        key: &K,
        txn: &Transaction,
    ) {
        let queue = match map.lock().unwrap().get(key) {
            Some(queue) => Arc::clone(queue),
            None => return,
        };
        let mut state = queue.state.lock().unwrap();
        state.requests.retain(|r| r.txn_id != txn.id());
        if state.upgrading == Some(txn.id()) {
            state.upgrading = None;
        }
        queue.cv.notify_all();
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.stop_detection();
    }
}
