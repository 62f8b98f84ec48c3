use crate::common::*;
use mosaicdb::{Database, RangeQuery};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct Clocked {
    _dir: TempDir,
    db: Arc<Database>,
    now: Arc<AtomicI64>,
}

fn clocked(start: i64) -> Clocked {
    init_logging();
    let dir = TempDir::new().unwrap();
    let now = Arc::new(AtomicI64::new(start));
    let clock_now = Arc::clone(&now);
    let db = Database::builder()
        .path(dir.path().join("db"))
        .clock(Arc::new(move || clock_now.load(Ordering::SeqCst)))
        .open()
        .unwrap();
    db.create_index("sessions", "token", IndexKind::Ttl { ttl_seconds: 60 }).unwrap();
    db.create_index("sessions", "user", IndexKind::equality()).unwrap();
    db.create_index("sessions", "started", IndexKind::Range).unwrap();
    Clocked { _dir: dir, db, now }
}

fn session(pk: &str, user: &str, started: i64) -> BaseEntity {
    entity(pk, &[("token", pk.into()), ("user", user.into()), ("started", started.into())])
}

#[test]
fn expired_entities_hidden_from_scans() {
    let c = clocked(1_000);
    c.db.put("sessions", &session("s1", "ann", 1)).unwrap();
    c.now.store(1_030, Ordering::SeqCst);
    c.db.put("sessions", &session("s2", "ann", 2)).unwrap();

    assert_eq!(c.db.scan_equal("sessions", "user", &"ann".into()).unwrap(), vec!["s1", "s2"]);

    // s1 expires at exactly 1060
    c.now.store(1_060, Ordering::SeqCst);
    assert_eq!(c.db.scan_equal("sessions", "user", &"ann".into()).unwrap(), vec!["s2"]);
    assert_eq!(c.db.scan_range("sessions", "started", &RangeQuery::all()).unwrap(), vec!["s2"]);

    c.now.store(1_090, Ordering::SeqCst);
    assert!(c.db.scan_equal("sessions", "user", &"ann".into()).unwrap().is_empty());
}

#[test]
fn rewrite_extends_expiry() {
    let c = clocked(0);
    c.db.put("sessions", &session("s1", "bo", 1)).unwrap();
    c.now.store(50, Ordering::SeqCst);
    c.db.put("sessions", &session("s1", "bo", 1)).unwrap();

    c.now.store(100, Ordering::SeqCst);
    assert_eq!(c.db.cleanup_expired("sessions", "token").unwrap(), 0);
    assert_eq!(c.db.scan_equal("sessions", "user", &"bo".into()).unwrap(), vec!["s1"]);

    c.now.store(110, Ordering::SeqCst);
    assert_eq!(c.db.cleanup_expired("sessions", "token").unwrap(), 1);
}

#[test]
fn cleanup_removes_entity_and_every_index_entry() {
    let c = clocked(0);
    for i in 0..5 {
        c.db.put("sessions", &session(&format!("s{}", i), "cy", i)).unwrap();
    }
    // No TTL column, never expires
    c.db.put("sessions", &entity("keep", &[("user", "cy".into()), ("started", 9.into())]))
        .unwrap();

    c.now.store(61, Ordering::SeqCst);
    assert_eq!(c.db.cleanup_expired("sessions", "token").unwrap(), 5);
    assert_eq!(c.db.cleanup_expired("sessions", "token").unwrap(), 0);

    for i in 0..5 {
        assert!(c.db.get("sessions", &format!("s{}", i)).unwrap().is_none());
    }
    assert_eq!(c.db.scan_equal("sessions", "user", &"cy".into()).unwrap(), vec!["keep"]);
    assert_eq!(c.db.scan_range("sessions", "started", &RangeQuery::all()).unwrap(), vec!["keep"]);
}

#[test]
fn cleanup_requires_a_ttl_index() {
    let c = clocked(0);
    let err = c.db.cleanup_expired("sessions", "user").unwrap_err();
    assert!(matches!(err, Error::IndexMisconfigured(_)));
}

#[test]
fn expired_edges_leave_the_topology() {
    let c = clocked(0);
    let edges = c.db.graph().edge_table().to_string();
    c.db.create_index(&edges, "lease", IndexKind::Ttl { ttl_seconds: 60 }).unwrap();

    let mut leased = edge("ab", "A", "B");
    leased.set_field("lease", true).unwrap();
    c.db.add_edge(&leased).unwrap();
    c.db.add_edge(&edge("ac", "A", "C")).unwrap();
    assert_eq!(c.db.bfs("A", 1).unwrap(), vec!["A", "B", "C"]);

    c.now.store(60, Ordering::SeqCst);
    assert_eq!(c.db.cleanup_expired(&edges, "lease").unwrap(), 1);
    assert_eq!(c.db.bfs("A", 1).unwrap(), vec!["A", "C"]);
    assert!(c.db.get(&edges, "ab").unwrap().is_none());
}

#[test]
fn expired_vectors_leave_the_vector_index() {
    let c = clocked(0);
    c.db.create_vector_index("docs", 2, Metric::L2).unwrap();
    c.db.create_index("docs", "lease", IndexKind::Ttl { ttl_seconds: 60 }).unwrap();

    let mut d1 = doc("d1", &[0.0, 0.0]);
    d1.set_field("lease", true).unwrap();
    c.db.transaction(|txn| {
        txn.add_vector("docs", &d1)?;
        txn.add_vector("docs", &doc("d2", &[5.0, 5.0]))
    })
    .unwrap();
    assert_eq!(c.db.search_knn("docs", &[0.0, 0.0], 1).unwrap()[0].0, "d1");

    c.now.store(61, Ordering::SeqCst);
    assert_eq!(c.db.cleanup_expired("docs", "lease").unwrap(), 1);
    let hits = c.db.search_knn("docs", &[0.0, 0.0], 5).unwrap();
    let keys: Vec<&str> = hits.iter().map(|(pk, _)| pk.as_str()).collect();
    assert_eq!(keys, vec!["d2"]);
    assert_eq!(c.db.vector_stats()[0].tombstones, 1);
}
