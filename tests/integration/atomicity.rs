use crate::common::*;
use mosaicdb::RangeQuery;

fn indexed(t: &TestDb) {
    t.db.create_index("users", "email", IndexKind::unique()).unwrap();
    t.db.create_index("users", "age", IndexKind::Range).unwrap();
    t.db.create_vector_index("docs", 2, Metric::L2).unwrap();
}

#[test]
fn aborted_transaction_invisible_after_reopen() {
    let t = TestDb::strict();
    indexed(&t);
    t.db.put("users", &entity("taken", &[("email", "x@y.z".into()), ("age", 50.into())]))
        .unwrap();

    {
        let mut txn = t.db.begin();
        txn.put_entity("users", &entity("u1", &[("email", "a@y.z".into()), ("age", 30.into())]))
            .unwrap();
        txn.add_edge(&edge("e1", "u1", "taken")).unwrap();
        txn.add_vector("docs", &doc("d1", &[1.0, 2.0])).unwrap();
        // A unique violation midway aborts the whole handle
        assert!(txn
            .put_entity("users", &entity("u2", &[("email", "x@y.z".into())]))
            .is_err());
        assert!(txn.commit().is_err());
    }

    let t = t.reopen();
    assert!(t.db.get("users", "u1").unwrap().is_none());
    assert!(t.db.get("users", "u2").unwrap().is_none());
    assert!(t.db.get("docs", "d1").unwrap().is_none());
    assert!(t.db.scan_equal("users", "email", &"a@y.z".into()).unwrap().is_empty());
    assert_eq!(t.db.scan_range("users", "age", &RangeQuery::all()).unwrap(), vec!["taken"]);
    assert_eq!(t.db.bfs("u1", 1).unwrap(), vec!["u1"]);
    assert!(t.db.search_knn("docs", &[1.0, 2.0], 1).unwrap().is_empty());
}

#[test]
fn dropped_transaction_lost_on_reopen() {
    let t = TestDb::new();
    indexed(&t);
    {
        let mut txn = t.db.begin();
        txn.put_entity("users", &entity("u1", &[("email", "a@y.z".into())])).unwrap();
        txn.add_edge(&edge("e1", "u1", "u2")).unwrap();
        drop(txn);
    }
    let t = t.reopen();
    assert!(t.db.get("users", "u1").unwrap().is_none());
    assert!(t.db.get("edges", "e1").unwrap().is_none());
    assert!(t.db.scan_equal("users", "email", &"a@y.z".into()).unwrap().is_empty());
}

#[test]
fn committed_transaction_survives_reopen() {
    let t = TestDb::strict();
    indexed(&t);
    t.db.transaction(|txn| {
        txn.put_entity("users", &entity("u1", &[("email", "a@y.z".into()), ("age", 30.into())]))?;
        txn.add_edge(&edge("e1", "u1", "u2"))?;
        txn.add_vector("docs", &doc("d1", &[1.0, 2.0]))
    })
    .unwrap();

    let t = t.reopen();
    assert_eq!(t.db.scan_equal("users", "email", &"a@y.z".into()).unwrap(), vec!["u1"]);
    assert_eq!(t.db.scan_range("users", "age", &RangeQuery::between(18, 40)).unwrap(), vec!["u1"]);
    assert_eq!(t.db.bfs("u1", 1).unwrap(), vec!["u1", "u2"]);
    // The vector file predates the commit and is rebuilt from storage
    assert_eq!(t.db.search_knn("docs", &[1.0, 2.0], 1).unwrap()[0].0, "d1");
}
