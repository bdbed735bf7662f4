mod common;

use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use shale_db::{
    error::AbortReason,
    transaction::{IsolationLevel, LockManager, LockMode, Transaction, TransactionState},
    types::Rid,
};

fn lock_manager() -> Arc<LockManager> {
    common::setup();
    LockManager::new(Duration::from_millis(50))
}

#[test]
fn test_table_lock_and_unlock() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1).unwrap());
    assert!(txn.is_table_intention_shared_locked(1));

    assert!(lm.unlock_table(&txn, 1).unwrap());
    assert!(!txn.is_table_intention_shared_locked(1));
    // IS release does not end the growing phase.
    assert_eq!(txn.state(), TransactionState::Growing);
}

#[test]
fn test_shared_locks_coexist() {
    let lm = lock_manager();
    let t1 = Transaction::new(IsolationLevel::RepeatableRead);
    let t2 = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1).unwrap());
    assert!(lm.lock_table(&t2, LockMode::Shared, 1).unwrap());

    lm.unlock_all(&t1);
    lm.unlock_all(&t2);
}

#[test]
fn test_exclusive_waits_for_shared() {
    let lm = lock_manager();
    let t1 = Transaction::new(IsolationLevel::RepeatableRead);
    let t2 = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1).unwrap());

    let (tx, rx) = mpsc::channel();
    let lm2 = Arc::clone(&lm);
    let t2c = Arc::clone(&t2);
    let handle = thread::spawn(move || {
        let granted = lm2.lock_table(&t2c, LockMode::Exclusive, 1).unwrap();
        tx.send(granted).unwrap();
    });

    // The writer is stuck behind the reader.
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    assert!(lm.unlock_table(&t1, 1).unwrap());
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    handle.join().unwrap();

    lm.unlock_all(&t2);
}

// S5: a transaction holding S and alone in the queue upgrades to SIX
// immediately.
#[test]
fn test_upgrade_shared_to_six() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, 7).unwrap());
    assert!(lm
        .lock_table(&txn, LockMode::SharedIntentionExclusive, 7)
        .unwrap());

    assert!(txn.is_table_shared_intention_exclusive_locked(7));
    assert!(!txn.is_table_shared_locked(7));
    lm.unlock_all(&txn);
}

#[test]
fn test_downgrade_is_incompatible() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Exclusive, 1).unwrap());
    let err = lm.lock_table(&txn, LockMode::Shared, 1).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::IncompatibleUpgrade));
    assert_eq!(txn.state(), TransactionState::Aborted);
    lm.unlock_all(&txn);
}

#[test]
fn test_one_pending_upgrade_per_queue() {
    let lm = lock_manager();
    let t1 = Transaction::new(IsolationLevel::RepeatableRead);
    let t2 = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1).unwrap());
    assert!(lm.lock_table(&t2, LockMode::Shared, 1).unwrap());

    // t2's upgrade has to wait for t1's S.
    let (tx, rx) = mpsc::channel();
    let lm2 = Arc::clone(&lm);
    let t2c = Arc::clone(&t2);
    let handle = thread::spawn(move || {
        let granted = lm2.lock_table(&t2c, LockMode::Exclusive, 1).unwrap();
        tx.send(granted).unwrap();
    });
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    // A second concurrent upgrade on the same queue aborts.
    let err = lm.lock_table(&t1, LockMode::Exclusive, 1).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::UpgradeConflict));
    assert_eq!(t1.state(), TransactionState::Aborted);

    // Releasing the aborted transaction's locks unblocks the upgrade.
    lm.unlock_all(&t1);
    assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    handle.join().unwrap();
    assert!(t2.is_table_exclusive_locked(1));
    lm.unlock_all(&t2);
}

#[test]
fn test_read_uncommitted_rejects_shared() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::ReadUncommitted);

    let err = lm.lock_table(&txn, LockMode::Shared, 1).unwrap_err();
    assert_eq!(
        err.abort_reason(),
        Some(AbortReason::LockSharedOnReadUncommitted)
    );
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_repeatable_read_shrinking_rejects_locks() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, 1).unwrap());
    assert!(lm.unlock_table(&txn, 1).unwrap());
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lm.lock_table(&txn, LockMode::Shared, 2).unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
}

#[test]
fn test_read_committed_shrinking_allows_shared_only() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::ReadCommitted);

    assert!(lm.lock_table(&txn, LockMode::Exclusive, 1).unwrap());
    assert!(lm.unlock_table(&txn, 1).unwrap());
    assert_eq!(txn.state(), TransactionState::Shrinking);

    // S and IS stay legal.
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 2).unwrap());
    assert!(lm.lock_table(&txn, LockMode::Shared, 3).unwrap());

    let err = lm
        .lock_table(&txn, LockMode::IntentionExclusive, 4)
        .unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::LockOnShrinking));
    lm.unlock_all(&txn);
}

#[test]
fn test_row_locks_require_table_lock() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    let err = lm
        .lock_row(&txn, LockMode::Exclusive, 1, rid)
        .unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::TableLockNotPresent));
    assert_eq!(txn.state(), TransactionState::Aborted);

    // IS covers S rows but not X rows.
    let txn = Transaction::new(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1).unwrap());
    assert!(lm.lock_row(&txn, LockMode::Shared, 1, rid).unwrap());
    let err = lm
        .lock_row(&txn, LockMode::Exclusive, 1, Rid::new(1, 1))
        .unwrap_err();
    assert_eq!(err.abort_reason(), Some(AbortReason::TableLockNotPresent));
    lm.unlock_all(&txn);
}

#[test]
fn test_no_intention_locks_on_rows() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1).unwrap());

    let err = lm
        .lock_row(&txn, LockMode::IntentionShared, 1, Rid::new(1, 0))
        .unwrap_err();
    assert_eq!(
        err.abort_reason(),
        Some(AbortReason::AttemptedIntentionLockOnRow)
    );
}

#[test]
fn test_unlock_table_with_row_locks_held() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::RepeatableRead);
    let rid = Rid::new(1, 0);

    assert!(lm
        .lock_table(&txn, LockMode::IntentionExclusive, 1)
        .unwrap());
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, rid).unwrap());

    let err = lm.unlock_table(&txn, 1).unwrap_err();
    assert_eq!(
        err.abort_reason(),
        Some(AbortReason::TableUnlockedBeforeUnlockingRows)
    );
    lm.unlock_all(&txn);
}

#[test]
fn test_unlock_without_lock() {
    let lm = lock_manager();
    let txn = Transaction::new(IsolationLevel::RepeatableRead);

    let err = lm.unlock_table(&txn, 9).unwrap_err();
    assert_eq!(
        err.abort_reason(),
        Some(AbortReason::AttemptedUnlockButNoLockHeld)
    );
}

// FIFO: a later S request may not jump over a waiting X request.
#[test]
fn test_fifo_no_starvation_bypass() {
    let lm = lock_manager();
    let t1 = Transaction::new(IsolationLevel::RepeatableRead);
    let t2 = Transaction::new(IsolationLevel::RepeatableRead);
    let t3 = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1).unwrap());

    let (order_tx, order_rx) = mpsc::channel();

    let lm2 = Arc::clone(&lm);
    let t2c = Arc::clone(&t2);
    let tx2 = order_tx.clone();
    let h2 = thread::spawn(move || {
        assert!(lm2.lock_table(&t2c, LockMode::Exclusive, 1).unwrap());
        tx2.send("x").unwrap();
        thread::sleep(Duration::from_millis(100));
        lm2.unlock_all(&t2c);
    });

    // Give the X request time to queue up.
    thread::sleep(Duration::from_millis(100));

    let lm3 = Arc::clone(&lm);
    let t3c = Arc::clone(&t3);
    let tx3 = order_tx;
    let h3 = thread::spawn(move || {
        assert!(lm3.lock_table(&t3c, LockMode::Shared, 1).unwrap());
        tx3.send("s").unwrap();
        lm3.unlock_all(&t3c);
    });

    thread::sleep(Duration::from_millis(100));
    // Neither waiter can run while t1 holds S: the X is blocked by the
    // grant, the S is blocked by the earlier X.
    assert!(order_rx.try_recv().is_err());

    lm.unlock_all(&t1);

    assert_eq!(order_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "x");
    assert_eq!(order_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "s");
    h2.join().unwrap();
    h3.join().unwrap();
}

// S6: two transactions each hold one row X and want the other's. The
// detector aborts the younger; the survivor proceeds once the victim's
// locks are released.
#[test]
fn test_deadlock_detection_aborts_youngest() {
    let lm = lock_manager();
    let t1 = Transaction::new(IsolationLevel::RepeatableRead);
    let t2 = Transaction::new(IsolationLevel::RepeatableRead);
    let r1 = Rid::new(1, 1);
    let r2 = Rid::new(1, 2);

    assert!(lm
        .lock_table(&t1, LockMode::IntentionExclusive, 1)
        .unwrap());
    assert!(lm
        .lock_table(&t2, LockMode::IntentionExclusive, 1)
        .unwrap());
    assert!(lm.lock_row(&t1, LockMode::Exclusive, 1, r1).unwrap());
    assert!(lm.lock_row(&t2, LockMode::Exclusive, 1, r2).unwrap());

    let lm1 = Arc::clone(&lm);
    let t1c = Arc::clone(&t1);
    let h1 = thread::spawn(move || lm1.lock_row(&t1c, LockMode::Exclusive, 1, r2).unwrap());

    // Let t1 block first so it is the older waiter.
    thread::sleep(Duration::from_millis(50));

    let lm2 = Arc::clone(&lm);
    let t2c = Arc::clone(&t2);
    let h2 = thread::spawn(move || lm2.lock_row(&t2c, LockMode::Exclusive, 1, r1).unwrap());

    // The victim's lock call returns false with the transaction aborted.
    let survivor_waits = h2.join().unwrap();
    assert!(!survivor_waits);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Releasing the victim's locks lets the survivor finish.
    lm.unlock_all(&t2);
    assert!(h1.join().unwrap());
    assert_eq!(t1.state(), TransactionState::Growing);
    assert!(t1.is_row_exclusive_locked(1, &r2));
    lm.unlock_all(&t1);
}

#[test]
fn test_detect_deadlocks_is_idempotent_without_cycles() {
    let lm = lock_manager();
    let t1 = Transaction::new(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, 1).unwrap());
    lm.detect_deadlocks();
    assert_eq!(t1.state(), TransactionState::Growing);
    lm.unlock_all(&t1);
}
