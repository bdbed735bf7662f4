#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use tempfile::TempDir;

use shale_db::{
    buffer::BufferPoolManager,
    catalog::Catalog,
    storage::DiskManager,
    transaction::{IsolationLevel, LockManager, Transaction},
    utils,
};

pub fn setup() {
    utils::init_log();
}

/// A buffer pool over a throwaway disk file. Keep the TempDir alive for
/// the duration of the test.
pub fn test_bpm(pool_size: usize, replacer_k: usize) -> (TempDir, Arc<BufferPoolManager>) {
    let dir = tempfile::tempdir().unwrap();
    let disk = Arc::new(DiskManager::new(&dir.path().join("test.db")).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, replacer_k, disk));
    (dir, bpm)
}

pub struct TestDb {
    _dir: TempDir,
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
}

pub fn test_db() -> TestDb {
    setup();
    let (dir, bpm) = test_bpm(64, 2);
    TestDb {
        _dir: dir,
        bpm,
        catalog: Arc::new(Catalog::new()),
        lock_manager: LockManager::new(Duration::from_millis(50)),
    }
}

pub fn begin(level: IsolationLevel) -> Arc<Transaction> {
    Transaction::new(level)
}

/// No frame may stay pinned once an operation has returned.
pub fn assert_no_pins(bpm: &BufferPoolManager) {
    assert_eq!(
        bpm.replacer_size() + bpm.free_frame_count(),
        bpm.pool_size(),
        "a page pin leaked"
    );
}
