use crate::common::*;
use mosaicdb::index::Language;
use mosaicdb::{Database, FulltextConfig};
use tempfile::TempDir;

fn english() -> FulltextConfig {
    FulltextConfig {
        stemming_enabled: true,
        language: Language::En,
        stopwords_enabled: true,
        ..FulltextConfig::default()
    }
}

fn article(pk: &str, body: &str) -> BaseEntity {
    entity(pk, &[("body", body.into())])
}

fn ranked(t: &TestDb, query: &str, limit: usize) -> Vec<String> {
    t.db.scan_fulltext_with_scores("articles", "body", query, limit)
        .unwrap()
        .into_iter()
        .map(|(pk, _)| pk)
        .collect()
}

#[test]
fn bm25_prefers_frequent_and_rare_terms() {
    let t = TestDb::new();
    t.db.create_fulltext_index("articles", "body").unwrap();
    t.db.put("articles", &article("a1", "rust rust rust systems")).unwrap();
    t.db.put("articles", &article("a2", "rust web")).unwrap();
    t.db.put("articles", &article("a3", "python web")).unwrap();
    t.db.put("articles", &article("a4", "python data")).unwrap();

    assert_eq!(ranked(&t, "rust", 10), vec!["a1", "a2"]);

    // Every term must match
    assert_eq!(ranked(&t, "rust web", 10), vec!["a2"]);
    assert!(ranked(&t, "rust data", 10).is_empty());

    let scores = t.db.scan_fulltext_with_scores("articles", "body", "web", 10).unwrap();
    assert_eq!(scores.len(), 2);
    assert!(scores.iter().all(|(_, s)| *s > 0.0));
}

#[test]
fn ties_break_by_key_and_limit_truncates() {
    let t = TestDb::new();
    t.db.create_fulltext_index("articles", "body").unwrap();
    for pk in ["c", "a", "d", "b"] {
        t.db.put("articles", &article(pk, "same words here")).unwrap();
    }
    assert_eq!(ranked(&t, "words", 2), vec!["a", "b"]);
    assert!(ranked(&t, "words", 0).is_empty());
}

#[test]
fn stemming_and_stopwords() {
    let t = TestDb::new();
    t.db.create_index("articles", "body", IndexKind::Fulltext(english())).unwrap();
    t.db.put("articles", &article("a1", "The dogs were running in the park")).unwrap();
    t.db.put("articles", &article("a2", "A cat sleeps")).unwrap();

    assert_eq!(ranked(&t, "dog runs", 10), vec!["a1"]);
    assert_eq!(ranked(&t, "the dog", 10), vec!["a1"]);
    // A query made only of stopwords matches nothing
    assert!(ranked(&t, "the", 10).is_empty());
}

#[test]
fn german_umlauts_fold() {
    let t = TestDb::new();
    let config = FulltextConfig {
        stemming_enabled: true,
        language: Language::De,
        stopwords_enabled: true,
        normalize_umlauts: true,
        ..FulltextConfig::default()
    };
    t.db.create_index("articles", "body", IndexKind::Fulltext(config)).unwrap();
    t.db.put("articles", &article("d1", "Die Straße und die Häuser")).unwrap();

    assert_eq!(ranked(&t, "Strasse", 10), vec!["d1"]);
    assert_eq!(ranked(&t, "haeuser", 10), vec!["d1"]);
    assert!(ranked(&t, "und", 10).is_empty());
}

#[test]
fn quoted_phrase_must_appear_verbatim() {
    let t = TestDb::new();
    t.db.create_fulltext_index("articles", "body").unwrap();
    t.db.put("articles", &article("p1", "the quick  brown fox")).unwrap();
    t.db.put("articles", &article("p2", "brown and quick fox")).unwrap();

    assert_eq!(ranked(&t, "quick brown", 10), vec!["p1", "p2"]);
    // Whitespace and case are normalized before comparing
    assert_eq!(ranked(&t, "\"Quick Brown\"", 10), vec!["p1"]);
    assert_eq!(ranked(&t, "fox \"brown and\"", 10), vec!["p2"]);
}

#[test]
fn analyzer_from_config_survives_reopen() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    let config = MosaicConfig {
        fulltext: english(),
        ..MosaicConfig::default()
    };
    {
        let db = Database::open_with_config(&path, config).unwrap();
        db.create_fulltext_index("articles", "body").unwrap();
        db.put("articles", &article("a1", "Walked dogs")).unwrap();
        db.close().unwrap();
    }

    // The analyzer is stored with the index, not re-read from the config
    let db = Database::open_with_config(&path, MosaicConfig::default()).unwrap();
    let hits = db.scan_fulltext_with_scores("articles", "body", "walk dog", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "a1");
}
