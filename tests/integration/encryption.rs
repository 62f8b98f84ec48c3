use crate::common::*;
use mosaicdb::core::key::entity_key;
use mosaicdb::core::FieldCipher;
use mosaicdb::storage::KvRead;
use mosaicdb::{Database, EntityCodec, RangeQuery};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SSN: &str = "123-45-6789";

fn sealed_codec() -> EntityCodec {
    EntityCodec::with_cipher(Arc::new(XorCipher(0x5a)))
        .encrypt_field("patients", "ssn")
        .encrypt_field("patients", "age")
}

fn open_sealed(path: &Path) -> Arc<Database> {
    init_logging();
    Database::builder().path(path).codec(sealed_codec()).open().unwrap()
}

fn patient(pk: &str, name: &str, age: i64) -> BaseEntity {
    entity(pk, &[("name", name.into()), ("ssn", SSN.into()), ("age", age.into())])
}

#[test]
fn sealed_at_rest_plain_through_the_api() {
    let dir = TempDir::new().unwrap();
    let db = open_sealed(&dir.path().join("db"));
    db.create_index("patients", "name", IndexKind::equality()).unwrap();
    db.create_index("patients", "age", IndexKind::Range).unwrap();
    db.put("patients", &patient("p1", "Bob", 41)).unwrap();
    db.put("patients", &patient("p2", "Eve", 29)).unwrap();

    let raw = db.engine().get(&entity_key("patients", "p1")).unwrap().unwrap();
    assert!(!raw.windows(SSN.len()).any(|w| w == SSN.as_bytes()));
    assert!(raw.windows(3).any(|w| w == b"Bob"));

    let p1 = db.get("patients", "p1").unwrap().unwrap();
    assert_eq!(p1, patient("p1", "Bob", 41));

    // Indexes are maintained from the plaintext values
    assert_eq!(db.scan_range("patients", "age", &RangeQuery::all().gte(30)).unwrap(), vec!["p1"]);
    assert_eq!(db.scan_equal("patients", "name", &"Eve".into()).unwrap(), vec!["p2"]);

    // Reads inside a transaction decrypt as well
    let mut txn = db.begin();
    let seen = txn.get_entity("patients", "p2").unwrap().unwrap();
    assert_eq!(seen.get_field_as_int("age").unwrap(), Some(29));
    txn.rollback();
}

#[test]
fn ciphertext_without_the_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    {
        let db = open_sealed(&path);
        db.put("patients", &patient("p1", "Bob", 41)).unwrap();
        db.close().unwrap();
    }

    {
        let plain = Database::open(&path).unwrap();
        let opaque = plain.get("patients", "p1").unwrap().unwrap();
        assert_eq!(opaque.get_field_as_string("name").unwrap().as_deref(), Some("Bob"));
        assert!(matches!(opaque.get_field("ssn").unwrap(), Some(FieldValue::Binary(_))));
        plain.close().unwrap();
    }

    let db = open_sealed(&path);
    assert_eq!(db.get("patients", "p1").unwrap().unwrap(), patient("p1", "Bob", 41));
}

#[test]
fn other_tables_stay_plain() {
    let dir = TempDir::new().unwrap();
    let db = open_sealed(&dir.path().join("db"));
    db.put("visitors", &patient("v1", "Ann", 50)).unwrap();
    let raw = db.engine().get(&entity_key("visitors", "v1")).unwrap().unwrap();
    assert!(raw.windows(SSN.len()).any(|w| w == SSN.as_bytes()));
}

struct RefusingCipher;

impl FieldCipher for RefusingCipher {
    fn encrypt(&self, _table: &str, _field: &str, _plaintext: &[u8]) -> mosaicdb::Result<Vec<u8>> {
        Err(Error::InvalidOperation("key unavailable".into()))
    }

    fn decrypt(&self, _table: &str, _field: &str, _ciphertext: &[u8]) -> mosaicdb::Result<Vec<u8>> {
        Err(Error::InvalidOperation("key unavailable".into()))
    }
}

#[test]
fn cipher_failure_aborts_the_write() {
    let dir = TempDir::new().unwrap();
    let codec = EntityCodec::with_cipher(Arc::new(RefusingCipher)).encrypt_field("patients", "ssn");
    let db = Database::builder().path(dir.path().join("db")).codec(codec).open().unwrap();
    db.create_index("patients", "name", IndexKind::equality()).unwrap();

    assert!(db.put("patients", &patient("p1", "Bob", 41)).is_err());
    assert!(db.get("patients", "p1").unwrap().is_none());
    assert!(db.scan_equal("patients", "name", &"Bob".into()).unwrap().is_empty());
    assert_eq!(db.transaction_stats().active, 0);
}
