//! Shared test utilities for the workspace-level suites.
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

pub use mosaicdb::{BaseEntity, Database, Edge, Error, FieldValue, IndexKind, Metric, MosaicConfig};
use mosaicdb::core::FieldCipher;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use tempfile::TempDir;

static INIT_LOGGING: Once = Once::new();

/// Route `tracing` output through the test harness; set `RUST_LOG`-style
/// filtering through `MOSAIC_TEST_LOG=debug`
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        if std::env::var_os("MOSAIC_TEST_LOG").is_some() {
            let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        }
    });
}

/// Database in a fresh temporary directory
pub struct TestDb {
    pub dir: TempDir,
    pub db: Arc<Database>,
}

impl TestDb {
    pub fn new() -> Self {
        init_logging();
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        TestDb { dir, db }
    }

    /// fsync on every commit
    pub fn strict() -> Self {
        init_logging();
        let dir = TempDir::new().unwrap();
        let config = MosaicConfig {
            durability: "always".into(),
            ..MosaicConfig::default()
        };
        let db = Database::open_with_config(dir.path().join("db"), config).unwrap();
        TestDb { dir, db }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("db")
    }

    /// Drop the handle and open the directory again
    pub fn reopen(self) -> Self {
        let TestDb { dir, db } = self;
        drop(db);
        let db = Database::open(dir.path().join("db")).unwrap();
        TestDb { dir, db }
    }
}

pub fn entity(pk: &str, fields: &[(&str, FieldValue)]) -> BaseEntity {
    let mut e = BaseEntity::new(pk);
    for (name, value) in fields {
        e.set_field(*name, value.clone()).unwrap();
    }
    e
}

pub fn edge(id: &str, from: &str, to: &str) -> BaseEntity {
    Edge::new(id, from, to).to_entity().unwrap()
}

pub fn weighted(id: &str, from: &str, to: &str, weight: f64) -> BaseEntity {
    Edge::new(id, from, to).with_weight(weight).to_entity().unwrap()
}

pub fn doc(pk: &str, v: &[f32]) -> BaseEntity {
    entity(pk, &[("embedding", v.to_vec().into())])
}

/// Toy cipher: XOR with a key byte, tagged so double decryption is caught
pub struct XorCipher(pub u8);

impl FieldCipher for XorCipher {
    fn encrypt(&self, _table: &str, _field: &str, plaintext: &[u8]) -> mosaicdb::Result<Vec<u8>> {
        let mut out = vec![0xE5];
        out.extend(plaintext.iter().map(|b| b ^ self.0));
        Ok(out)
    }

    fn decrypt(&self, _table: &str, _field: &str, ciphertext: &[u8]) -> mosaicdb::Result<Vec<u8>> {
        match ciphertext.split_first() {
            Some((0xE5, rest)) => Ok(rest.iter().map(|b| b ^ self.0).collect()),
            _ => Err(Error::Corrupt("not sealed by XorCipher".into())),
        }
    }
}
