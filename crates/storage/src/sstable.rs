//! Sorted string tables
//!
//! ## File Format
//!
//! ```text
//! data:   repeated [key_len: u32][key][seq: u64][kind: u8][val_len: u32][val]
//! index:  [count: u32] repeated [key_len: u32][key][offset: u64]
//! footer: [index_offset: u64][entry_count: u64][max_seq: u64][crc32: u32][magic: u32]
//! ```
//!
//! Entries are ordered by `(key asc, seq desc)`. `kind` is 1 for a put and
//! 0 for a tombstone (`val_len` is then 0). The sparse index samples every
//! Nth entry. The CRC covers data and index. Files are immutable once
//! written and read through a memory map.

use crate::merge::Entry;
use crate::traits::KeyRange;
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use mosaic_core::error::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trailing magic ("MSST")
pub const SSTABLE_MAGIC: u32 = 0x4D53_5354;
const FOOTER_LEN: usize = 8 + 8 + 8 + 4 + 4;
const KIND_TOMBSTONE: u8 = 0;
const KIND_PUT: u8 = 1;

/// File name of table `id`
pub fn table_file_name(id: u64) -> String {
    format!("{:08}.sst", id)
}

/// Parse a table id back out of a file name
pub fn parse_table_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(".sst")?.parse().ok()
}

// ============================================================================
// Writer
// ============================================================================

/// Summary of a written table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// Number of entries
    pub entry_count: u64,
    /// Highest sequence stored
    pub max_seq: u64,
    /// File size in bytes
    pub file_size: u64,
}

/// Write `entries` (already sorted) to `path`
pub fn write_table<I>(path: &Path, entries: I, index_interval: usize) -> Result<TableMeta>
where
    I: IntoIterator<Item = Entry>,
{
    let interval = index_interval.max(1);
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    let mut hasher = crc32fast::Hasher::new();
    let mut offset: u64 = 0;
    let mut index: Vec<(String, u64)> = Vec::new();
    let mut count: u64 = 0;
    let mut max_seq: u64 = 0;

    let mut emit = |bytes: &[u8], out: &mut BufWriter<File>| -> Result<()> {
        hasher.update(bytes);
        out.write_all(bytes)?;
        Ok(())
    };

    for entry in entries {
        if count % interval as u64 == 0 {
            index.push((entry.key.clone(), offset));
        }
        let mut buf = Vec::with_capacity(17 + entry.key.len());
        buf.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(entry.key.as_bytes());
        buf.extend_from_slice(&entry.seq.to_le_bytes());
        match &entry.value {
            Some(v) => {
                buf.push(KIND_PUT);
                buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
                buf.extend_from_slice(v);
            }
            None => {
                buf.push(KIND_TOMBSTONE);
                buf.extend_from_slice(&0u32.to_le_bytes());
            }
        }
        emit(&buf, &mut out)?;
        offset += buf.len() as u64;
        count += 1;
        max_seq = max_seq.max(entry.seq);
    }

    let index_offset = offset;
    let mut ibuf = Vec::new();
    ibuf.extend_from_slice(&(index.len() as u32).to_le_bytes());
    for (key, off) in &index {
        ibuf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        ibuf.extend_from_slice(key.as_bytes());
        ibuf.extend_from_slice(&off.to_le_bytes());
    }
    emit(&ibuf, &mut out)?;
    offset += ibuf.len() as u64;

    let crc = hasher.finalize();
    let mut footer = Vec::with_capacity(FOOTER_LEN);
    footer.extend_from_slice(&index_offset.to_le_bytes());
    footer.extend_from_slice(&count.to_le_bytes());
    footer.extend_from_slice(&max_seq.to_le_bytes());
    footer.extend_from_slice(&crc.to_le_bytes());
    footer.extend_from_slice(&SSTABLE_MAGIC.to_le_bytes());
    out.write_all(&footer)?;
    offset += footer.len() as u64;

    let file = out
        .into_inner()
        .map_err(|e| Error::StorageIo(e.into_error()))?;
    file.sync_all()?;

    Ok(TableMeta {
        entry_count: count,
        max_seq,
        file_size: offset,
    })
}

// ============================================================================
// Reader
// ============================================================================

/// An open, verified, memory-mapped table
#[derive(Debug)]
pub struct SsTable {
    id: u64,
    path: PathBuf,
    mmap: Mmap,
    data_end: usize,
    index: Vec<(String, usize)>,
    entry_count: u64,
    max_seq: u64,
}

fn corrupt(path: &Path, what: &str) -> Error {
    Error::Corrupt(format!("sstable {}: {}", path.display(), what))
}

impl SsTable {
    /// Map and verify a table file
    pub fn open(path: &Path, id: u64) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: table files are never modified after being written
        let mmap = unsafe { Mmap::map(&file)? };
        let len = mmap.len();
        if len < FOOTER_LEN + 4 {
            return Err(corrupt(path, "file too short"));
        }
        let footer = &mmap[len - FOOTER_LEN..];
        let index_offset = LittleEndian::read_u64(&footer[0..8]) as usize;
        let entry_count = LittleEndian::read_u64(&footer[8..16]);
        let max_seq = LittleEndian::read_u64(&footer[16..24]);
        let crc = LittleEndian::read_u32(&footer[24..28]);
        let magic = LittleEndian::read_u32(&footer[28..32]);
        if magic != SSTABLE_MAGIC {
            return Err(corrupt(path, "bad magic"));
        }
        let body_end = len - FOOTER_LEN;
        if index_offset > body_end {
            return Err(corrupt(path, "index offset past end"));
        }
        if crc32fast::hash(&mmap[..body_end]) != crc {
            return Err(corrupt(path, "checksum mismatch"));
        }

        let mut index = Vec::new();
        let ibuf = &mmap[index_offset..body_end];
        if ibuf.len() < 4 {
            return Err(corrupt(path, "index truncated"));
        }
        let n = LittleEndian::read_u32(&ibuf[0..4]) as usize;
        let mut pos = 4;
        for _ in 0..n {
            let klen = ibuf
                .get(pos..pos + 4)
                .map(LittleEndian::read_u32)
                .ok_or_else(|| corrupt(path, "index truncated"))? as usize;
            pos += 4;
            let key = ibuf
                .get(pos..pos + klen)
                .and_then(|b| std::str::from_utf8(b).ok())
                .ok_or_else(|| corrupt(path, "bad index key"))?
                .to_string();
            pos += klen;
            let off = ibuf
                .get(pos..pos + 8)
                .map(LittleEndian::read_u64)
                .ok_or_else(|| corrupt(path, "index truncated"))? as usize;
            pos += 8;
            index.push((key, off));
        }

        Ok(SsTable {
            id,
            path: path.to_path_buf(),
            mmap,
            data_end: index_offset,
            index,
            entry_count,
            max_seq,
        })
    }

    /// Table id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Highest sequence stored
    pub fn max_seq(&self) -> u64 {
        self.max_seq
    }

    /// Decode the entry at `pos`; returns the entry and the next offset
    fn entry_at(&self, pos: usize) -> Result<(Entry, usize)> {
        let data = &self.mmap[..self.data_end];
        let err = || corrupt(&self.path, "entry truncated");
        let klen = data.get(pos..pos + 4).map(LittleEndian::read_u32).ok_or_else(err)? as usize;
        let mut p = pos + 4;
        let key = data
            .get(p..p + klen)
            .and_then(|b| std::str::from_utf8(b).ok())
            .ok_or_else(|| corrupt(&self.path, "bad entry key"))?
            .to_string();
        p += klen;
        let seq = data.get(p..p + 8).map(LittleEndian::read_u64).ok_or_else(err)?;
        p += 8;
        let kind = *data.get(p).ok_or_else(err)?;
        p += 1;
        let vlen = data.get(p..p + 4).map(LittleEndian::read_u32).ok_or_else(err)? as usize;
        p += 4;
        let value = match kind {
            KIND_PUT => Some(data.get(p..p + vlen).ok_or_else(err)?.to_vec()),
            KIND_TOMBSTONE => None,
            other => {
                return Err(corrupt(
                    &self.path,
                    &format!("unknown entry kind {}", other),
                ))
            }
        };
        p += vlen;
        Ok((Entry { key, seq, value }, p))
    }

    /// Offset of the sampled entry to start scanning from for `key`
    fn seek_offset(&self, key: &str) -> usize {
        // Last sample strictly below `key`; versions of `key` itself may
        // start before a sample that equals it
        let idx = self.index.partition_point(|(k, _)| k.as_str() < key);
        if idx == 0 {
            0
        } else {
            self.index[idx - 1].1
        }
    }

    /// Newest version of `key` at or below `snapshot`
    pub fn get(&self, key: &str, snapshot: u64) -> Result<Option<Option<Vec<u8>>>> {
        let mut pos = self.seek_offset(key);
        while pos < self.data_end {
            let (entry, next) = self.entry_at(pos)?;
            match entry.key.as_str().cmp(key) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => {
                    if entry.seq <= snapshot {
                        return Ok(Some(entry.value));
                    }
                }
                std::cmp::Ordering::Greater => return Ok(None),
            }
            pos = next;
        }
        Ok(None)
    }

    /// Iterate entries inside `range` in file order
    pub fn iter_range(self: &Arc<Self>, range: &KeyRange) -> TableIter {
        let start = match &range.start {
            Bound::Included(s) | Bound::Excluded(s) => self.seek_offset(s),
            Bound::Unbounded => 0,
        };
        TableIter {
            table: Arc::clone(self),
            pos: start,
            range: range.clone(),
            done: false,
        }
    }

    /// Iterate every entry
    pub fn iter_all(self: &Arc<Self>) -> TableIter {
        self.iter_range(&KeyRange::all())
    }
}

/// Forward iterator over a table range.
///
/// A decode error ends iteration and is logged; the table was checksummed
/// on open, so this only happens if the file changed underneath the map.
pub struct TableIter {
    table: Arc<SsTable>,
    pos: usize,
    range: KeyRange,
    done: bool,
}

impl Iterator for TableIter {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        while !self.done && self.pos < self.table.data_end {
            let (entry, next) = match self.table.entry_at(self.pos) {
                Ok(x) => x,
                Err(e) => {
                    tracing::error!(target: "mosaic::sstable", table = self.table.id, error = %e, "SSTable read failed");
                    self.done = true;
                    return None;
                }
            };
            self.pos = next;
            if !self.range.after_start(&entry.key) {
                continue;
            }
            if !self.range.before_end(&entry.key) {
                self.done = true;
                return None;
            }
            return Some(entry);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries() -> Vec<Entry> {
        let mut v = Vec::new();
        for i in 0..50u64 {
            let key = format!("key{:03}", i);
            v.push(Entry {
                key: key.clone(),
                seq: 100 + i,
                value: if i % 10 == 0 { None } else { Some(vec![i as u8; 3]) },
            });
            v.push(Entry {
                key,
                seq: i + 1,
                value: Some(vec![0xAA]),
            });
        }
        v
    }

    fn build(dir: &TempDir) -> Arc<SsTable> {
        let path = dir.path().join(table_file_name(1));
        let meta = write_table(&path, entries(), 4).unwrap();
        assert_eq!(meta.entry_count, 100);
        assert_eq!(meta.max_seq, 149);
        Arc::new(SsTable::open(&path, 1).unwrap())
    }

    #[test]
    fn test_point_lookup_versions() {
        let dir = TempDir::new().unwrap();
        let t = build(&dir);
        assert_eq!(t.get("key007", u64::MAX).unwrap(), Some(Some(vec![7; 3])));
        assert_eq!(t.get("key007", 50).unwrap(), Some(Some(vec![0xAA])));
        assert_eq!(t.get("key007", 0).unwrap(), None);
        assert_eq!(t.get("key010", u64::MAX).unwrap(), Some(None));
        assert_eq!(t.get("nope", u64::MAX).unwrap(), None);
        assert_eq!(t.get("key0075", u64::MAX).unwrap(), None);
    }

    #[test]
    fn test_every_key_is_findable() {
        let dir = TempDir::new().unwrap();
        let t = build(&dir);
        for i in 0..50u64 {
            let key = format!("key{:03}", i);
            assert!(t.get(&key, u64::MAX).unwrap().is_some(), "{}", key);
        }
    }

    #[test]
    fn test_range_iteration() {
        let dir = TempDir::new().unwrap();
        let t = build(&dir);
        let keys: Vec<String> = t
            .iter_range(&KeyRange::half_open("key010", "key013"))
            .map(|e| e.key)
            .collect();
        assert_eq!(keys.len(), 6);
        assert_eq!(keys.first().map(String::as_str), Some("key010"));
        assert_eq!(keys.last().map(String::as_str), Some("key012"));
        assert_eq!(t.iter_all().count(), 100);
    }

    #[test]
    fn test_corruption_detected_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(table_file_name(2));
        write_table(&path, entries(), 4).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(SsTable::open(&path, 2), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_file_name_roundtrip() {
        assert_eq!(parse_table_file_name(&table_file_name(42)), Some(42));
        assert_eq!(parse_table_file_name("MANIFEST"), None);
    }
}
