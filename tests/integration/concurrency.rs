use crate::common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn unique_value_claimed_by_exactly_one_writer() {
    let t = TestDb::new();
    t.db.create_index("users", "email", IndexKind::unique()).unwrap();

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let db = Arc::clone(&t.db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut txn = db.begin();
                txn.put_entity("users", &entity(&format!("u{}", i), &[("email", "same@x.io".into())]))?;
                barrier.wait();
                txn.commit()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().filter(|r| r.is_err()).all(|r| match r {
        Err(e) => e.is_conflict(),
        Ok(_) => false,
    }));
    assert_eq!(t.db.scan_equal("users", "email", &"same@x.io".into()).unwrap().len(), 1);
}

#[test]
fn retried_increments_all_land() {
    let t = TestDb::new();
    t.db.put("counters", &entity("hits", &[("n", 0.into())])).unwrap();

    let threads = 4;
    let per_thread = 10;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let db = Arc::clone(&t.db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..per_thread {
                    loop {
                        let outcome = db.transaction(|txn| {
                            let current = txn.get_entity("counters", "hits")?.unwrap();
                            let n = current.get_field_as_int("n")?.unwrap_or(0);
                            txn.put_entity("counters", &entity("hits", &[("n", (n + 1).into())]))
                        });
                        match outcome {
                            Ok(()) => break,
                            Err(e) if e.is_conflict() => continue,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let hits = t.db.get("counters", "hits").unwrap().unwrap();
    assert_eq!(hits.get_field_as_int("n").unwrap(), Some((threads * per_thread) as i64));
    let stats = t.db.transaction_stats();
    assert_eq!(stats.committed, (threads * per_thread) as u64 + 1);
    assert_eq!(stats.active, 0);
}

#[test]
fn readers_never_see_half_a_transaction() {
    let t = TestDb::new();
    t.db.create_index("pairs", "side", IndexKind::equality()).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let db = Arc::clone(&t.db);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            for i in 0..100 {
                db.transaction(|txn| {
                    txn.put_entity("pairs", &entity(&format!("l{}", i), &[("side", "left".into())]))?;
                    txn.put_entity("pairs", &entity(&format!("r{}", i), &[("side", "right".into())]))
                })
                .unwrap();
            }
            stop.store(true, Ordering::SeqCst);
        })
    };

    let reader = {
        let db = Arc::clone(&t.db);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                // Each commit adds one of each, so a later scan of the right
                // side can never come up shorter
                let left = db.scan_equal("pairs", "side", &"left".into()).unwrap();
                let right = db.scan_equal("pairs", "side", &"right".into()).unwrap();
                assert!(right.len() >= left.len(), "{} left, {} right", left.len(), right.len());
                for pk in left {
                    let partner = format!("r{}", &pk[1..]);
                    assert!(db.get("pairs", &partner).unwrap().is_some());
                }
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(t.db.scan_equal("pairs", "side", &"right".into()).unwrap().len(), 100);
}
