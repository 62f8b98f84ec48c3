//! MANIFEST file: which SSTables are live and how far the WAL is flushed
//!
//! ## Format
//!
//! ```text
//! [magic: "MSMF"][version: u32][payload_len: u32][payload: bincode][crc32: u32]
//! ```
//!
//! The CRC covers the payload. The file is replaced atomically by writing
//! `MANIFEST.tmp`, fsyncing it and renaming over `MANIFEST`.

use byteorder::{LittleEndian, ReadBytesExt};
use mosaic_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use uuid::Uuid;

/// Magic bytes at the start of the manifest
pub const MANIFEST_MAGIC: [u8; 4] = *b"MSMF";
/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;
/// File name inside the database directory
pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST.tmp";

/// Persistent engine metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Identity of the database, stable across restarts
    pub database_id: Uuid,
    /// Highest commit sequence contained in live SSTables
    pub flushed_seq: u64,
    /// Next SSTable file id to allocate
    pub next_table_id: u64,
    /// Live SSTable ids, newest first
    pub tables: Vec<u64>,
    /// Oldest WAL segment that may still hold unflushed commits
    pub wal_segment: u64,
}

impl Manifest {
    /// Manifest of a freshly created database
    pub fn new() -> Self {
        Manifest {
            database_id: Uuid::new_v4(),
            flushed_seq: 0,
            next_table_id: 1,
            tables: Vec::new(),
            wal_segment: 1,
        }
    }

    /// Serialize with header and checksum
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let mut buf = Vec::with_capacity(16 + payload.len());
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        Ok(buf)
    }

    /// Parse and verify
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 || bytes[..4] != MANIFEST_MAGIC {
            return Err(Error::Corrupt("manifest has bad magic".into()));
        }
        let mut cursor = Cursor::new(&bytes[4..12]);
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != MANIFEST_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported manifest version {}",
                version
            )));
        }
        let len = cursor.read_u32::<LittleEndian>()? as usize;
        if bytes.len() != 12 + len + 4 {
            return Err(Error::Corrupt(format!(
                "manifest length mismatch: header says {}, file has {}",
                len,
                bytes.len().saturating_sub(16)
            )));
        }
        let payload = &bytes[12..12 + len];
        let mut crc_cursor = Cursor::new(&bytes[12 + len..]);
        let stored = crc_cursor.read_u32::<LittleEndian>()?;
        if crc32fast::hash(payload) != stored {
            return Err(Error::Corrupt("manifest checksum mismatch".into()));
        }
        bincode::deserialize(payload)
            .map_err(|e| Error::Corrupt(format!("manifest payload: {}", e)))
    }

    /// Load from `dir`, `None` if the database has never been created
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Self::decode(&bytes).map(Some)
    }

    /// Atomically replace the manifest in `dir`
    pub fn store(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(MANIFEST_TMP);
        let bytes = self.encode()?;
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        // Persist the rename itself
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
        Ok(())
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}
