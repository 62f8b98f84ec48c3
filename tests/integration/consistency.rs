use crate::common::*;
use mosaicdb::{IndexType, Predicate, RangeQuery};

fn shop(t: &TestDb) {
    t.db.create_index("items", "color", IndexKind::equality()).unwrap();
    t.db.create_index("items", "price", IndexKind::Range).unwrap();
    t.db.create_index("items", "sku", IndexKind::Sparse { unique: true }).unwrap();
    t.db.create_index("items", "loc", IndexKind::Geo).unwrap();
    t.db.create_fulltext_index("items", "title").unwrap();
}

fn item(pk: &str, color: &str, price: i64, title: &str) -> BaseEntity {
    entity(
        pk,
        &[
            ("color", color.into()),
            ("price", price.into()),
            ("title", title.into()),
            ("loc_lat", 52.52.into()),
            ("loc_lon", 13.40.into()),
        ],
    )
}

#[test]
fn every_index_follows_updates_and_deletes() {
    let t = TestDb::new();
    shop(&t);
    t.db.put("items", &item("i1", "red", 10, "red wool scarf")).unwrap();
    t.db.put("items", &item("i2", "blue", 20, "blue cotton shirt")).unwrap();
    let mut sku = item("i3", "red", 30, "red cotton cap");
    sku.set_field("sku", "CAP-1").unwrap();
    t.db.put("items", &sku).unwrap();

    // i1 changes every indexed column
    let mut moved = item("i1", "green", 99, "green silk tie");
    moved.set_field("loc_lat", 48.137).unwrap();
    moved.set_field("loc_lon", 11.575).unwrap();
    t.db.put("items", &moved).unwrap();

    assert_eq!(t.db.scan_equal("items", "color", &"red".into()).unwrap(), vec!["i3"]);
    assert_eq!(t.db.scan_equal("items", "color", &"green".into()).unwrap(), vec!["i1"]);
    assert_eq!(
        t.db.scan_range("items", "price", &RangeQuery::all().lt(50)).unwrap(),
        vec!["i2", "i3"]
    );
    let near: Vec<String> = t
        .db
        .scan_geo_radius("items", "loc", 52.52, 13.40, 1.0)
        .unwrap()
        .into_iter()
        .map(|(pk, _)| pk)
        .collect();
    assert_eq!(near, vec!["i2", "i3"]);
    assert!(t.db.scan_fulltext_with_scores("items", "title", "wool", 10).unwrap().is_empty());
    assert_eq!(t.db.scan_fulltext_with_scores("items", "title", "silk", 10).unwrap()[0].0, "i1");

    t.db.delete("items", "i3").unwrap();
    assert!(t.db.scan_equal("items", "sku", &"CAP-1".into()).unwrap().is_empty());
    assert!(t.db.scan_equal("items", "color", &"red".into()).unwrap().is_empty());
    assert!(t.db.scan_fulltext_with_scores("items", "title", "cap", 10).unwrap().is_empty());

    // The sparse unique value is free again
    let mut reuse = item("i4", "red", 5, "red cap");
    reuse.set_field("sku", "CAP-1").unwrap();
    t.db.put("items", &reuse).unwrap();
}

#[test]
fn conjunctive_and_over_mixed_kinds() {
    let t = TestDb::new();
    shop(&t);
    t.db.put("items", &item("i1", "red", 10, "red wool scarf")).unwrap();
    t.db.put("items", &item("i2", "red", 40, "red cotton shirt")).unwrap();
    t.db.put("items", &item("i3", "blue", 15, "blue cotton shirt")).unwrap();

    let hits = t
        .db
        .conjunctive_and(
            "items",
            &[
                Predicate::equal("color", "red"),
                Predicate::range("price", RangeQuery::all().lte(20)),
                Predicate::fulltext("title", "scarf"),
            ],
        )
        .unwrap();
    assert_eq!(hits, vec!["i1"]);

    let cotton = t
        .db
        .conjunctive_and(
            "items",
            &[Predicate::fulltext("title", "cotton"), Predicate::equal("color", "blue")],
        )
        .unwrap();
    assert_eq!(cotton, vec!["i3"]);

    let err = t
        .db
        .conjunctive_and("items", &[Predicate::equal("weight", 3)])
        .unwrap_err();
    assert!(matches!(err, Error::IndexMisconfigured(_)));
}

#[test]
fn rebuild_and_reopen_agree_with_live_indexes() {
    let t = TestDb::new();
    shop(&t);
    for i in 0..30 {
        let color = if i % 3 == 0 { "red" } else { "blue" };
        t.db.put("items", &item(&format!("i{:02}", i), color, i, "plain item")).unwrap();
    }
    let before = t.db.scan_equal("items", "color", &"red".into()).unwrap();
    let cheap = t.db.scan_range("items", "price", &RangeQuery::between(5, 12)).unwrap();

    assert_eq!(t.db.rebuild_index("items", "color", IndexType::Equality).unwrap(), 30);
    assert_eq!(t.db.scan_equal("items", "color", &"red".into()).unwrap(), before);

    t.db.flush().unwrap();
    let t = t.reopen();
    assert_eq!(t.db.scan_equal("items", "color", &"red".into()).unwrap(), before);
    assert_eq!(t.db.scan_range("items", "price", &RangeQuery::between(5, 12)).unwrap(), cheap);
    assert_eq!(before.len(), 10);
    assert_eq!(cheap.len(), 8);
}
