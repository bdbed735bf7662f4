mod common;

use shale_db::utils::HandyRwLock;

#[test]
fn test_new_fetch_unpin_cycle() {
    common::setup();
    let (_dir, bpm) = common::test_bpm(10, 5);

    let (pid0, frame0) = bpm.new_page().unwrap();
    assert_eq!(pid0, 1);
    {
        let mut guard = frame0.wl();
        guard.data[..5].copy_from_slice(b"Hello");
    }

    // Fill the rest of the pool.
    for _ in 1..10 {
        bpm.new_page().unwrap();
    }

    // Everything is pinned, nothing can give way.
    assert!(bpm.new_page().is_err());
    assert!(bpm.fetch_page(999).is_err());

    // Release the first five pages and take their frames for new pages.
    for pid in 1..=5 {
        assert!(bpm.unpin_page(pid, true));
    }
    for _ in 0..4 {
        bpm.new_page().unwrap();
    }

    // Page 1 went to disk dirty, so its bytes survive the round trip.
    let frame = bpm.fetch_page(pid0).unwrap();
    assert_eq!(&frame.rl().data[..5], b"Hello");
    assert!(bpm.unpin_page(pid0, false));
}

#[test]
fn test_unpin_preconditions() {
    common::setup();
    let (_dir, bpm) = common::test_bpm(4, 2);

    // Not resident.
    assert!(!bpm.unpin_page(77, false));

    let (pid, _frame) = bpm.new_page().unwrap();
    assert!(bpm.unpin_page(pid, false));
    // Already at pin count zero.
    assert!(!bpm.unpin_page(pid, false));
}

#[test]
fn test_fetch_does_not_set_dirty() {
    common::setup();
    let (_dir, bpm) = common::test_bpm(2, 2);

    let (pid, frame) = bpm.new_page().unwrap();
    {
        let mut guard = frame.wl();
        guard.data[0] = 0xee;
    }
    // Unpinned clean: the write is in memory only.
    assert!(bpm.unpin_page(pid, false));

    // Fetching does not dirty the page either.
    let frame = bpm.fetch_page(pid).unwrap();
    assert_eq!(frame.rl().data[0], 0xee);
    assert!(bpm.unpin_page(pid, false));

    // Force the page out; a clean page is dropped, not written back.
    let (evictor1, _) = bpm.new_page().unwrap();
    let (evictor2, _) = bpm.new_page().unwrap();
    bpm.unpin_page(evictor1, false);
    bpm.unpin_page(evictor2, false);

    let frame = bpm.fetch_page(pid).unwrap();
    assert_eq!(frame.rl().data[0], 0, "clean page must not be written back");
    bpm.unpin_page(pid, false);
}

#[test]
fn test_dirty_page_written_back_on_eviction() {
    common::setup();
    let (_dir, bpm) = common::test_bpm(2, 2);

    let (pid, frame) = bpm.new_page().unwrap();
    frame.wl().data[0] = 0x42;
    assert!(bpm.unpin_page(pid, true));

    let (e1, _) = bpm.new_page().unwrap();
    let (e2, _) = bpm.new_page().unwrap();
    bpm.unpin_page(e1, false);
    bpm.unpin_page(e2, false);

    let frame = bpm.fetch_page(pid).unwrap();
    assert_eq!(frame.rl().data[0], 0x42);
    bpm.unpin_page(pid, false);
}

#[test]
fn test_delete_page() {
    common::setup();
    let (_dir, bpm) = common::test_bpm(2, 2);

    let (pid, _frame) = bpm.new_page().unwrap();

    // Pinned pages cannot be deleted.
    assert!(!bpm.delete_page(pid).unwrap());

    assert!(bpm.unpin_page(pid, true));
    assert!(bpm.delete_page(pid).unwrap());

    // Deleting a non-resident page succeeds trivially.
    assert!(bpm.delete_page(pid).unwrap());

    // The frame went back to the free list.
    assert_eq!(bpm.free_frame_count(), 2);
}

#[test]
fn test_flush_page_clears_dirty() {
    common::setup();
    let (_dir, bpm) = common::test_bpm(2, 2);

    let (pid, frame) = bpm.new_page().unwrap();
    frame.wl().data[7] = 9;
    bpm.unpin_page(pid, true);

    assert!(bpm.flush_page(pid));
    assert!(!bpm.flush_page(999));

    // After the flush the page can be dropped and reread intact.
    let (e1, _) = bpm.new_page().unwrap();
    let (e2, _) = bpm.new_page().unwrap();
    bpm.unpin_page(e1, false);
    bpm.unpin_page(e2, false);

    let frame = bpm.fetch_page(pid).unwrap();
    assert_eq!(frame.rl().data[7], 9);
    bpm.unpin_page(pid, false);
}

// After any unpin-balanced workload: resident evictable frames plus free
// frames account for the whole pool.
#[test]
fn test_frame_accounting() {
    common::setup();
    let (_dir, bpm) = common::test_bpm(8, 2);

    let mut pids = Vec::new();
    for _ in 0..8 {
        let (pid, _) = bpm.new_page().unwrap();
        pids.push(pid);
    }
    assert_eq!(bpm.replacer_size(), 0);
    assert_eq!(bpm.free_frame_count(), 0);

    for pid in &pids {
        assert!(bpm.unpin_page(*pid, false));
    }
    common::assert_no_pins(&bpm);

    // Churn: refetch some, delete some, allocate more.
    for pid in &pids[..4] {
        bpm.fetch_page(*pid).unwrap();
    }
    for pid in &pids[..4] {
        bpm.unpin_page(*pid, false);
    }
    assert!(bpm.delete_page(pids[0]).unwrap());
    let (extra, _) = bpm.new_page().unwrap();
    bpm.unpin_page(extra, false);

    common::assert_no_pins(&bpm);
}

#[test]
fn test_pins_are_counted_per_fetch() {
    common::setup();
    let (_dir, bpm) = common::test_bpm(2, 2);

    let (pid, frame) = bpm.new_page().unwrap();
    let again = bpm.fetch_page(pid).unwrap();
    assert_eq!(frame.rl().pin_count(), 2);
    drop(again);

    assert!(bpm.unpin_page(pid, false));
    assert_eq!(frame.rl().pin_count(), 1);
    // Still pinned once, so not evictable.
    assert_eq!(bpm.replacer_size(), 0);

    assert!(bpm.unpin_page(pid, false));
    assert_eq!(bpm.replacer_size(), 1);
}
