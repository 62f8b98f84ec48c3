//! Secondary index behavior over a real engine

use mosaic_concurrency::TransactionContext;
use mosaic_core::{BaseEntity, EntityCodec, FieldValue, StatusCode};
use mosaic_index::{
    FulltextConfig, IndexKind, IndexType, Language, Predicate, RangeQuery, SecondaryIndexManager,
};
use mosaic_storage::{LsmEngine, StorageConfig};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn open(dir: &TempDir) -> SecondaryIndexManager {
    let engine = LsmEngine::open(dir.path(), StorageConfig::default()).unwrap();
    SecondaryIndexManager::open(engine, EntityCodec::plain()).unwrap()
}

fn entity(pk: &str, fields: &[(&str, FieldValue)]) -> BaseEntity {
    let mut e = BaseEntity::new(pk);
    for (name, value) in fields {
        e.set_field(*name, value.clone()).unwrap();
    }
    e
}

fn put(mgr: &SecondaryIndexManager, table: &str, e: &BaseEntity) {
    let status = mgr.put(table, e);
    assert!(status.is_ok(), "{}", status.message());
}

mod equality {
    use super::*;

    #[test]
    fn update_moves_entry_to_new_value() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("users", "city", IndexKind::equality()).unwrap();

        put(&mgr, "users", &entity("u1", &[("city", "Berlin".into())]));
        put(&mgr, "users", &entity("u2", &[("city", "Berlin".into())]));
        assert_eq!(mgr.scan_equal("users", "city", &"Berlin".into()).unwrap(), vec!["u1", "u2"]);

        put(&mgr, "users", &entity("u1", &[("city", "Paris".into())]));
        assert_eq!(mgr.scan_equal("users", "city", &"Berlin".into()).unwrap(), vec!["u2"]);
        assert_eq!(mgr.scan_equal("users", "city", &"Paris".into()).unwrap(), vec!["u1"]);

        assert!(mgr.erase("users", "u2").is_ok());
        assert!(mgr.scan_equal("users", "city", &"Berlin".into()).unwrap().is_empty());
    }

    #[test]
    fn create_index_backfills_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        put(&mgr, "users", &entity("u1", &[("email", "a@x.io".into())]));

        mgr.create_index("users", "email", IndexKind::equality()).unwrap();
        mgr.create_index("users", "email", IndexKind::equality()).unwrap();
        assert_eq!(mgr.scan_equal("users", "email", &"a@x.io".into()).unwrap(), vec!["u1"]);

        let err = mgr.create_index("users", "email", IndexKind::unique()).unwrap_err();
        assert!(matches!(err, mosaic_core::Error::InvalidOperation(_)));
    }

    #[test]
    fn unique_rejects_second_owner() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("users", "email", IndexKind::unique()).unwrap();

        put(&mgr, "users", &entity("u1", &[("email", "a@x.io".into())]));
        let status = mgr.put("users", &entity("u2", &[("email", "a@x.io".into())]));
        assert_eq!(status.code(), StatusCode::Invalid);
        assert!(mgr.get("users", "u2").unwrap().is_none());

        // Same owner may rewrite, and the value frees up after a change
        put(&mgr, "users", &entity("u1", &[("email", "a@x.io".into()), ("n", 1.into())]));
        put(&mgr, "users", &entity("u1", &[("email", "b@x.io".into())]));
        put(&mgr, "users", &entity("u2", &[("email", "a@x.io".into())]));
    }

    #[test]
    fn unique_creation_fails_on_duplicates() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        put(&mgr, "users", &entity("u1", &[("email", "a@x.io".into())]));
        put(&mgr, "users", &entity("u2", &[("email", "a@x.io".into())]));
        assert!(mgr.create_index("users", "email", IndexKind::unique()).is_err());
        assert!(!mgr.has_index("users", "email", IndexType::Equality));
    }

    #[test]
    fn composite_lookup() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("addr", "city+zip", IndexKind::equality()).unwrap();
        put(&mgr, "addr", &entity("a1", &[("city", "Berlin".into()), ("zip", "10115".into())]));
        put(&mgr, "addr", &entity("a2", &[("city", "Berlin".into()), ("zip", "10117".into())]));

        let hits = mgr
            .scan_equal_composite("addr", &["city", "zip"], &["Berlin".into(), "10117".into()])
            .unwrap();
        assert_eq!(hits, vec!["a2"]);
        assert!(mgr.scan_equal_composite("addr", &["city"], &[]).is_err());
    }

    #[test]
    fn query_without_index_is_misconfigured() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        let err = mgr.scan_equal("users", "city", &"x".into()).unwrap_err();
        assert!(matches!(err, mosaic_core::Error::IndexMisconfigured(_)));
        assert!(mgr.scan_range("users", "age", &RangeQuery::all()).is_err());
    }

    #[test]
    fn estimate_count_caps() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("t", "c", IndexKind::equality()).unwrap();
        for i in 0..5 {
            put(&mgr, "t", &entity(&format!("p{}", i), &[("c", "v".into())]));
        }
        assert_eq!(mgr.estimate_count_equal("t", "c", &"v".into(), 3).unwrap(), (3, true));
        assert_eq!(mgr.estimate_count_equal("t", "c", &"v".into(), 10).unwrap(), (5, false));
    }
}

mod range {
    use super::*;

    fn ages(dir: &TempDir) -> SecondaryIndexManager {
        let mgr = open(dir);
        mgr.create_index("people", "age", IndexKind::Range).unwrap();
        for (pk, age) in [("a", 17), ("b", 30), ("c", -4), ("d", 30), ("e", 65)] {
            put(&mgr, "people", &entity(pk, &[("age", age.into())]));
        }
        mgr
    }

    #[test]
    fn bounds_and_inclusivity() {
        let dir = TempDir::new().unwrap();
        let mgr = ages(&dir);
        let q = |q: RangeQuery| mgr.scan_range("people", "age", &q).unwrap();

        assert_eq!(q(RangeQuery::all()), vec!["c", "a", "b", "d", "e"]);
        assert_eq!(q(RangeQuery::between(17, 30)), vec!["a", "b", "d"]);
        assert_eq!(q(RangeQuery::all().gt(17).lt(65)), vec!["b", "d"]);
        assert_eq!(
            q(RangeQuery::with_bounds(Some(30.into()), None, false, true)),
            vec!["e"]
        );
        assert_eq!(q(RangeQuery::all().lt(0.5)), vec!["c"]);
    }

    #[test]
    fn limit_and_reverse() {
        let dir = TempDir::new().unwrap();
        let mgr = ages(&dir);
        let hits = mgr
            .scan_range("people", "age", &RangeQuery::all().reversed().limit(2))
            .unwrap();
        assert_eq!(hits, vec!["e", "d"]);
    }

    #[test]
    fn no_stale_hits_after_update() {
        let dir = TempDir::new().unwrap();
        let mgr = ages(&dir);
        put(&mgr, "people", &entity("e", &[("age", 5.into())]));
        assert_eq!(
            mgr.scan_range("people", "age", &RangeQuery::all().gte(60)).unwrap(),
            Vec::<String>::new()
        );
        assert_eq!(
            mgr.scan_range("people", "age", &RangeQuery::between(0, 10)).unwrap(),
            vec!["e"]
        );
    }

    #[test]
    fn integers_beyond_double_precision() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("ids", "n", IndexKind::Range).unwrap();
        let big = 1i64 << 53;
        for (pk, n) in [("x0", big), ("x1", big + 1), ("x2", big + 2), ("max", i64::MAX)] {
            put(&mgr, "ids", &entity(pk, &[("n", n.into())]));
        }
        put(&mgr, "ids", &entity("d", &[("n", (big as f64).into())]));
        let q = |q: RangeQuery| mgr.scan_range("ids", "n", &q).unwrap();

        assert_eq!(q(RangeQuery::all().gt(big)), vec!["x1", "x2", "max"]);
        assert_eq!(q(RangeQuery::between(big + 1, big + 1)), vec!["x1"]);
        assert_eq!(q(RangeQuery::all().lt(big + 1)), vec!["d", "x0"]);
        assert_eq!(q(RangeQuery::all().gte(i64::MAX)), vec!["max"]);
    }
}

mod sparse {
    use super::*;

    #[test]
    fn only_present_values_indexed() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("t", "nick", IndexKind::Sparse { unique: false }).unwrap();
        put(&mgr, "t", &entity("1", &[("nick", "ada".into())]));
        put(&mgr, "t", &entity("2", &[("nick", "".into())]));
        put(&mgr, "t", &entity("3", &[("nick", FieldValue::Null)]));
        put(&mgr, "t", &entity("4", &[]));

        assert_eq!(mgr.scan_present("t", "nick").unwrap(), vec!["1"]);
        assert_eq!(mgr.scan_equal("t", "nick", &"ada".into()).unwrap(), vec!["1"]);
    }
}

mod geo {
    use super::*;

    #[test]
    fn radius_sorted_by_distance() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("places", "loc", IndexKind::Geo).unwrap();
        let place = |pk: &str, lat: f64, lon: f64| {
            entity(pk, &[("loc_lat", lat.into()), ("loc_lon", lon.into())])
        };
        put(&mgr, "places", &place("brandenburg_gate", 52.5163, 13.3777));
        put(&mgr, "places", &place("alexanderplatz", 52.5219, 13.4132));
        put(&mgr, "places", &place("potsdam", 52.3906, 13.0645));
        put(&mgr, "places", &place("munich", 48.1372, 11.5756));
        put(&mgr, "places", &place("bad", 123.0, 13.0));

        let hits = mgr.scan_geo_radius("places", "loc", 52.52, 13.405, 5.0).unwrap();
        let names: Vec<&str> = hits.iter().map(|(pk, _)| pk.as_str()).collect();
        assert_eq!(names, vec!["alexanderplatz", "brandenburg_gate"]);
        assert!(hits[0].1 < hits[1].1);

        let wide = mgr.scan_geo_radius("places", "loc", 52.52, 13.405, 40.0).unwrap();
        assert_eq!(wide.len(), 3);

        let boxed = mgr.scan_geo_box("places", "loc", 47.0, 49.0, 10.0, 13.0).unwrap();
        assert_eq!(boxed, vec!["munich"]);
    }

    fn point(pk: &str, lat: f64, lon: f64) -> BaseEntity {
        entity(pk, &[("loc_lat", lat.into()), ("loc_lon", lon.into())])
    }

    #[test]
    fn radius_crosses_the_antimeridian() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("buoys", "loc", IndexKind::Geo).unwrap();
        put(&mgr, "buoys", &point("east", 0.0, 179.95));
        put(&mgr, "buoys", &point("west", 0.0, -179.95));
        put(&mgr, "buoys", &point("far", 0.0, -179.7));

        let hits = mgr.scan_geo_radius("buoys", "loc", 0.0, 179.99, 20.0).unwrap();
        let names: Vec<&str> = hits.iter().map(|(pk, _)| pk.as_str()).collect();
        assert_eq!(names, vec!["east", "west"]);
        assert!(hits[1].1 < 7.0);
    }

    #[test]
    fn radius_reaches_the_widest_point_of_the_circle() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("places", "loc", IndexKind::Geo).unwrap();
        // About 994 km from (60, 0), east of lon 18 and north of the center
        put(&mgr, "places", &point("edge", 61.26, 18.1));

        let hits = mgr.scan_geo_radius("places", "loc", 60.0, 0.0, 1000.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1 > 990.0 && hits[0].1 <= 1000.0);
    }
}

mod ttl {
    use super::*;

    #[test]
    fn expired_hidden_from_scans_until_cleanup() {
        let dir = TempDir::new().unwrap();
        let now = Arc::new(AtomicI64::new(1_000));
        let clock_now = now.clone();
        let mgr = open(&dir).with_clock(Arc::new(move || clock_now.load(Ordering::SeqCst)));
        mgr.create_index("sessions", "created", IndexKind::Ttl { ttl_seconds: 60 }).unwrap();
        mgr.create_index("sessions", "score", IndexKind::Range).unwrap();

        put(&mgr, "sessions", &entity("s1", &[("created", 1.into()), ("score", 10.into())]));
        now.store(1_030, Ordering::SeqCst);
        put(&mgr, "sessions", &entity("s2", &[("created", 1.into()), ("score", 20.into())]));

        now.store(1_070, Ordering::SeqCst);
        let live = mgr.scan_range("sessions", "score", &RangeQuery::all()).unwrap();
        assert_eq!(live, vec!["s2"]);
        assert!(mgr.get("sessions", "s1").unwrap().is_some());

        assert_eq!(mgr.cleanup_expired_entities("sessions", "created").unwrap(), 1);
        assert!(mgr.get("sessions", "s1").unwrap().is_none());
        assert_eq!(mgr.cleanup_expired_entities("sessions", "created").unwrap(), 0);
    }

    #[test]
    fn rewrite_extends_expiry() {
        let dir = TempDir::new().unwrap();
        let now = Arc::new(AtomicI64::new(0));
        let clock_now = now.clone();
        let mgr = open(&dir).with_clock(Arc::new(move || clock_now.load(Ordering::SeqCst)));
        mgr.create_index("t", "ttl", IndexKind::Ttl { ttl_seconds: 10 }).unwrap();

        put(&mgr, "t", &entity("k", &[("ttl", true.into())]));
        now.store(8, Ordering::SeqCst);
        put(&mgr, "t", &entity("k", &[("ttl", true.into())]));
        assert_eq!(mgr.cleanup_expired_entities_at("t", "ttl", 12).unwrap(), 0);
        assert_eq!(mgr.cleanup_expired_entities_at("t", "ttl", 18).unwrap(), 1);
    }

    fn clocked(dir: &TempDir) -> (SecondaryIndexManager, Arc<AtomicI64>) {
        let now = Arc::new(AtomicI64::new(0));
        let clock_now = now.clone();
        let mgr = open(dir).with_clock(Arc::new(move || clock_now.load(Ordering::SeqCst)));
        mgr.create_index("t", "ttl", IndexKind::Ttl { ttl_seconds: 10 }).unwrap();
        (mgr, now)
    }

    #[test]
    fn renewal_between_scan_and_erase_survives() {
        let dir = TempDir::new().unwrap();
        let (mgr, now) = clocked(&dir);
        put(&mgr, "t", &entity("a", &[("ttl", 1.into())]));
        put(&mgr, "t", &entity("b", &[("ttl", 1.into())]));

        now.store(20, Ordering::SeqCst);
        let expired = mgr.expired_keys_at("t", "ttl", 20).unwrap();
        assert_eq!(expired, vec!["a", "b"]);
        // Renewed to expire at 30
        put(&mgr, "t", &entity("a", &[("ttl", 2.into())]));

        let mut txn = TransactionContext::begin(mgr.engine());
        let mut erased = Vec::new();
        for pk in &expired {
            if mgr.is_expired_in(&txn, "t", "ttl", pk, 20).unwrap() {
                assert!(mgr.erase_in(&mut txn, "t", pk).is_ok());
                erased.push(pk.clone());
            }
        }
        txn.commit().unwrap();
        assert_eq!(erased, vec!["b"]);
        assert!(mgr.get("t", "a").unwrap().is_some());
        assert!(mgr.get("t", "b").unwrap().is_none());
        assert_eq!(mgr.cleanup_expired_entities_at("t", "ttl", 20).unwrap(), 0);
    }

    #[test]
    fn renewal_after_check_fails_the_cleanup_commit() {
        let dir = TempDir::new().unwrap();
        let (mgr, now) = clocked(&dir);
        put(&mgr, "t", &entity("a", &[("ttl", 1.into())]));
        now.store(20, Ordering::SeqCst);

        let mut txn = TransactionContext::begin(mgr.engine());
        assert!(mgr.is_expired_in(&txn, "t", "ttl", "a", 20).unwrap());
        assert!(mgr.erase_in(&mut txn, "t", "a").is_ok());

        put(&mgr, "t", &entity("a", &[("ttl", 2.into())]));
        assert!(txn.commit().unwrap_err().is_conflict());
        assert_eq!(mgr.get("t", "a").unwrap().unwrap().get_field_as_int("ttl").unwrap(), Some(2));
        assert!(!mgr.is_expired_in(&mgr.engine().snapshot(), "t", "ttl", "a", 20).unwrap());
    }
}

mod fulltext {
    use super::*;

    fn docs(dir: &TempDir, config: FulltextConfig) -> SecondaryIndexManager {
        let mgr = open(dir);
        mgr.create_index("docs", "body", IndexKind::Fulltext(config)).unwrap();
        mgr
    }

    #[test]
    fn bm25_ranks_full_match_first() {
        let dir = TempDir::new().unwrap();
        let mgr = docs(&dir, FulltextConfig::default());
        put(&mgr, "docs", &entity("d1", &[("body", "deep learning neural networks".into())]));
        put(&mgr, "docs", &entity("d2", &[("body", "neural network optimization".into())]));

        // Without stemming only d1 contains "networks"
        let hits = mgr.scan_fulltext_with_scores("docs", "body", "neural networks", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "d1");
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn stemming_matches_inflections() {
        let dir = TempDir::new().unwrap();
        let config = FulltextConfig {
            stemming_enabled: true,
            language: Language::En,
            ..FulltextConfig::default()
        };
        let mgr = docs(&dir, config);
        put(&mgr, "docs", &entity("d1", &[("body", "deep learning neural networks".into())]));
        put(&mgr, "docs", &entity("d2", &[("body", "neural network optimization".into())]));

        // Both match once stemmed; equal tf, so the shorter document wins
        let hits = mgr.scan_fulltext_with_scores("docs", "body", "neural networks", 10).unwrap();
        let order: Vec<&str> = hits.iter().map(|(pk, _)| pk.as_str()).collect();
        assert_eq!(order, vec!["d2", "d1"]);
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn phrase_post_filter_and_updates() {
        let dir = TempDir::new().unwrap();
        let mgr = docs(&dir, FulltextConfig::default());
        put(&mgr, "docs", &entity("d1", &[("body", "memory safety without gc".into())]));
        put(&mgr, "docs", &entity("d2", &[("body", "safety of memory".into())]));

        assert_eq!(mgr.scan_fulltext("docs", "body", "memory safety", 10).unwrap().len(), 2);
        assert_eq!(
            mgr.scan_fulltext("docs", "body", "\"memory safety\"", 10).unwrap(),
            vec!["d1"]
        );

        put(&mgr, "docs", &entity("d1", &[("body", "garbage collection".into())]));
        assert_eq!(
            mgr.scan_fulltext("docs", "body", "memory", 10).unwrap(),
            vec!["d2"]
        );
        assert!(mgr.scan_fulltext("docs", "body", "", 10).unwrap().is_empty());
    }

    #[test]
    fn limit_truncates_ranked_results() {
        let dir = TempDir::new().unwrap();
        let mgr = docs(&dir, FulltextConfig::default());
        for i in 0..5 {
            let body = "rust ".repeat(i + 1);
            put(&mgr, "docs", &entity(&format!("d{}", i), &[("body", body.into())]));
        }
        assert_eq!(mgr.scan_fulltext("docs", "body", "rust", 2).unwrap().len(), 2);
    }
}

mod conjunctive {
    use super::*;

    #[test]
    fn and_of_three_index_kinds() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("p", "city", IndexKind::equality()).unwrap();
        mgr.create_index("p", "age", IndexKind::Range).unwrap();
        mgr.create_index("p", "bio", IndexKind::Fulltext(FulltextConfig::default())).unwrap();

        let rows = [
            ("1", "Berlin", 25, "likes rust"),
            ("2", "Berlin", 40, "likes rust and go"),
            ("3", "Paris", 30, "likes rust"),
            ("4", "Berlin", 33, "likes python"),
        ];
        for (pk, city, age, bio) in rows {
            put(&mgr, "p", &entity(pk, &[("city", city.into()), ("age", age.into()), ("bio", bio.into())]));
        }

        let hits = mgr
            .conjunctive_and(
                "p",
                &[
                    Predicate::equal("city", "Berlin"),
                    Predicate::range("age", RangeQuery::between(20, 35)),
                    Predicate::fulltext("bio", "rust"),
                ],
            )
            .unwrap();
        assert_eq!(hits, vec!["1"]);

        let none = mgr
            .conjunctive_and("p", &[Predicate::equal("city", "Rome"), Predicate::fulltext("bio", "rust")])
            .unwrap();
        assert!(none.is_empty());

        assert!(mgr.conjunctive_and("p", &[Predicate::present("city")]).is_err());
        assert!(mgr.conjunctive_and("p", &[]).is_err());
    }
}

mod maintenance {
    use super::*;

    #[test]
    fn drop_rebuild_and_stats() {
        let dir = TempDir::new().unwrap();
        let mgr = open(&dir);
        mgr.create_index("t", "c", IndexKind::equality()).unwrap();
        for i in 0..10 {
            put(&mgr, "t", &entity(&format!("k{}", i), &[("c", (i % 3).into())]));
        }

        let stats = mgr.index_stats("t", "c", IndexType::Equality).unwrap();
        assert_eq!(stats.entry_count, 10);
        assert!(stats.estimated_size_bytes > 0);

        let mut calls = 0;
        let visited = mgr
            .rebuild_index("t", "c", IndexType::Equality, &mut |_, total| {
                calls += 1;
                assert_eq!(total, 10);
                true
            })
            .unwrap();
        assert_eq!(visited, 10);
        assert_eq!(calls, 11);
        assert_eq!(mgr.scan_equal("t", "c", &1.into()).unwrap().len(), 3);
        assert_eq!(mgr.rebuild_metrics().rebuild_count.load(Ordering::Relaxed), 2);

        let cancelled = mgr.rebuild_index("t", "c", IndexType::Equality, &mut |done, _| done < 3);
        assert!(cancelled.is_err());

        assert!(mgr.drop_index("t", "c", IndexType::Equality).unwrap());
        assert!(!mgr.drop_index("t", "c", IndexType::Equality).unwrap());
        assert!(mgr.scan_equal("t", "c", &1.into()).is_err());
        assert!(mgr.all_index_stats("t").unwrap().is_empty());
    }

    #[test]
    fn descriptors_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mgr = open(&dir);
            let config = FulltextConfig {
                language: Language::De,
                stemming_enabled: true,
                ..FulltextConfig::default()
            };
            mgr.create_index("docs", "body", IndexKind::Fulltext(config)).unwrap();
            mgr.create_index("docs", "lang", IndexKind::equality()).unwrap();
            put(&mgr, "docs", &entity("d1", &[("body", "Die Häuser".into()), ("lang", "de".into())]));
        }
        let mgr = open(&dir);
        assert_eq!(mgr.list_indexes("docs").len(), 2);
        assert_eq!(mgr.fulltext_config("docs", "body").unwrap().language, Language::De);
        assert_eq!(mgr.scan_equal("docs", "lang", &"de".into()).unwrap(), vec!["d1"]);
        assert_eq!(mgr.reindex_table("docs").unwrap(), 2);
    }
}
