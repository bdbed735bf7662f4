mod common;

use std::{collections::HashMap, sync::Arc, thread};

use shale_db::container::ExtendibleHashTable;

#[test]
fn test_sample_depths() {
    common::setup();
    let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(2);

    for (k, v) in [
        (1, "a"),
        (2, "b"),
        (3, "c"),
        (4, "d"),
        (5, "e"),
        (6, "f"),
        (7, "g"),
        (8, "h"),
        (9, "i"),
    ] {
        table.insert(&k, &v.to_string());
    }

    assert_eq!(table.local_depth(0), 2);
    assert_eq!(table.local_depth(1), 3);
    assert_eq!(table.local_depth(2), 2);
    assert_eq!(table.local_depth(3), 2);

    assert_eq!(table.find(&9), Some("i".to_string()));
    assert_eq!(table.find(&8), Some("h".to_string()));
    assert_eq!(table.find(&2), Some("b".to_string()));
    assert_eq!(table.find(&10), None);

    assert!(table.remove(&8));
    assert!(table.remove(&4));
    assert!(table.remove(&1));
    assert!(!table.remove(&20));
}

#[test]
fn test_bucket_counts_across_splits() {
    common::setup();
    let table: ExtendibleHashTable<i32, String> = ExtendibleHashTable::new(2);

    table.insert(&4, &"a".to_string());
    table.insert(&12, &"b".to_string());
    table.insert(&16, &"c".to_string());
    assert_eq!(table.num_buckets(), 4);

    table.insert(&64, &"d".to_string());
    table.insert(&31, &"e".to_string());
    table.insert(&10, &"f".to_string());
    table.insert(&51, &"g".to_string());
    assert_eq!(table.num_buckets(), 4);

    table.insert(&15, &"h".to_string());
    table.insert(&18, &"i".to_string());
    table.insert(&20, &"j".to_string());
    assert_eq!(table.num_buckets(), 7);

    table.insert(&7, &"k".to_string());
    table.insert(&23, &"l".to_string());
    assert_eq!(table.num_buckets(), 8);
}

// Mirror the table against a HashMap through inserts, removals and
// reinserts.
#[test]
fn test_against_reference_map() {
    common::setup();
    let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(10);
    let mut reference = HashMap::new();

    for i in 0..1000 {
        table.insert(&i, &i);
        reference.insert(i, i);
    }

    for i in 0..100 {
        if i % 3 == 0 {
            assert!(table.remove(&i));
            reference.remove(&i);
        }
    }

    for i in 0..1000 {
        assert_eq!(table.find(&i), reference.get(&i).copied());
    }

    for i in 0..1000 {
        table.insert(&i, &(i * 2));
        reference.insert(i, i * 2);
    }
    for i in 0..1000 {
        assert_eq!(table.find(&i), reference.get(&i).copied());
    }
}

#[test]
fn test_concurrent_insert_find() {
    common::setup();

    for _ in 0..50 {
        let table: Arc<ExtendibleHashTable<i32, i32>> = Arc::new(ExtendibleHashTable::new(2));
        let mut handles = Vec::new();

        for tid in 0..5 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in (tid * 10)..((tid + 1) * 10) {
                    table.insert(&i, &i);
                    assert_eq!(table.find(&i), Some(i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..50 {
            assert_eq!(table.find(&i), Some(i));
        }
    }
}
