//! Vector index file
//!
//! One self-contained file per index, `<dir>/<name>.mvx`:
//!
//! ```text
//! [magic "MVX1" 4B]
//! [version u32 LE]
//! [storage seq u64]  last commit sequence the index reflects
//! [dimension u32][metric u8][m u32][ef_construction u32][ef_search u32]
//! [field_len u16][field]
//! [next_id u64]
//! [key count u64]    then per key: [pk_len u32][pk][VectorId u64]
//! [vector count u64] then per vector: [VectorId u64][dimension * f32]
//! [HNSW link state]
//! [xxh3 u64 over everything before it]
//! ```
//!
//! Vectors of tombstoned nodes are written too; searches route through them.
//! The file is replaced atomically through a temporary file and rename.

use crate::config::{Metric, VectorConfig};
use crate::heap::{VectorHeap, VectorId};
use crate::hnsw::HnswGraph;
use crate::index::VectorIndex;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use mosaic_core::{Error, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

const MAGIC: &[u8; 4] = b"MVX1";
const VERSION: u32 = 1;
const EXTENSION: &str = "mvx";

/// Path of the file holding index `name` inside `dir`
pub fn index_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, EXTENSION))
}

pub(crate) fn encode(index: &VectorIndex, seq: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + index.heap.memory_usage());
    let config = &index.config;
    buf.write_all(MAGIC)?;
    buf.write_u32::<LittleEndian>(VERSION)?;
    buf.write_u64::<LittleEndian>(seq)?;
    buf.write_u32::<LittleEndian>(config.dimension as u32)?;
    buf.write_u8(config.metric.tag())?;
    buf.write_u32::<LittleEndian>(config.m as u32)?;
    buf.write_u32::<LittleEndian>(config.ef_construction as u32)?;
    buf.write_u32::<LittleEndian>(config.ef_search as u32)?;
    buf.write_u16::<LittleEndian>(config.field.len() as u16)?;
    buf.write_all(config.field.as_bytes())?;
    buf.write_u64::<LittleEndian>(index.next_id)?;

    buf.write_u64::<LittleEndian>(index.pk_to_id.len() as u64)?;
    for (pk, id) in &index.pk_to_id {
        buf.write_u32::<LittleEndian>(pk.len() as u32)?;
        buf.write_all(pk.as_bytes())?;
        buf.write_u64::<LittleEndian>(id.0)?;
    }

    buf.write_u64::<LittleEndian>(index.heap.len() as u64)?;
    for id in index.heap.ids() {
        buf.write_u64::<LittleEndian>(id.0)?;
        if let Some(v) = index.heap.get(id) {
            for x in v {
                buf.write_f32::<LittleEndian>(*x)?;
            }
        }
    }

    index.graph.write_state(&mut buf)?;
    let checksum = xxh3_64(&buf);
    buf.write_u64::<LittleEndian>(checksum)?;
    Ok(buf)
}

/// Index and the storage sequence it was saved at
pub(crate) fn decode(bytes: &[u8]) -> Result<(VectorIndex, u64)> {
    if bytes.len() < MAGIC.len() + 4 + 8 {
        return Err(Error::Corrupt("vector index file too small".into()));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 8);
    let stored = Cursor::new(trailer).read_u64::<LittleEndian>()?;
    if xxh3_64(body) != stored {
        return Err(Error::Corrupt("vector index checksum mismatch".into()));
    }
    // The checksum matched, so a short read here means a writer bug
    decode_body(body).map_err(|e| match e {
        Error::StorageIo(io) => Error::Corrupt(format!("vector index truncated: {}", io)),
        other => other,
    })
}

fn decode_body(body: &[u8]) -> Result<(VectorIndex, u64)> {
    let mut r = Cursor::new(body);
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::Corrupt("not a vector index file".into()));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(Error::Corrupt(format!("unsupported vector index version {}", version)));
    }
    let seq = r.read_u64::<LittleEndian>()?;

    let dimension = r.read_u32::<LittleEndian>()? as usize;
    let metric = Metric::from_tag(r.read_u8()?)?;
    let mut config = VectorConfig::new(dimension, metric)
        .with_m(r.read_u32::<LittleEndian>()? as usize)
        .with_ef_construction(r.read_u32::<LittleEndian>()? as usize)
        .with_ef_search(r.read_u32::<LittleEndian>()? as usize);
    let field_len = r.read_u16::<LittleEndian>()? as usize;
    config.field = read_string(&mut r, field_len)?;
    config
        .validate()
        .map_err(|e| Error::Corrupt(format!("vector index config: {}", e)))?;
    let next_id = r.read_u64::<LittleEndian>()?;

    let key_count = r.read_u64::<LittleEndian>()?;
    let mut keys = BTreeMap::new();
    for _ in 0..key_count {
        let len = r.read_u32::<LittleEndian>()? as usize;
        let pk = read_string(&mut r, len)?;
        keys.insert(pk, VectorId(r.read_u64::<LittleEndian>()?));
    }

    let vector_count = r.read_u64::<LittleEndian>()?;
    let mut heap = VectorHeap::new(dimension);
    let mut v = vec![0.0f32; dimension];
    for _ in 0..vector_count {
        let id = VectorId(r.read_u64::<LittleEndian>()?);
        r.read_f32_into::<LittleEndian>(&mut v)?;
        heap.upsert(id, &v)?;
    }
    if let Some((pk, _)) = keys.iter().find(|(_, id)| heap.get(**id).is_none()) {
        return Err(Error::Corrupt(format!("vector index key {:?} has no vector", pk)));
    }

    let mut graph = HnswGraph::new(&config);
    graph.read_state(&mut r)?;
    if (r.position() as usize) != body.len() {
        return Err(Error::Corrupt("trailing bytes in vector index file".into()));
    }
    Ok((VectorIndex::restore(config, heap, graph, keys, next_id), seq))
}

fn read_string<R: Read>(r: &mut R, len: usize) -> Result<String> {
    let mut raw = vec![0u8; len];
    r.read_exact(&mut raw)?;
    String::from_utf8(raw).map_err(|e| Error::Corrupt(format!("vector index string: {}", e)))
}

/// Atomically replace `path` with `bytes`
pub(crate) fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("{}.tmp", EXTENSION));
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    if let Some(dir) = path.parent() {
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VectorIndex {
        let mut idx = VectorIndex::new(VectorConfig::new(3, Metric::L2).with_m(4));
        for i in 0..30 {
            let f = i as f32;
            idx.upsert(&format!("doc{}", i), &[f, f * 0.5, 1.0 - f]).unwrap();
        }
        idx.remove("doc7");
        idx
    }

    #[test]
    fn test_encode_decode_preserves_search() {
        let idx = sample();
        let (restored, seq) = decode(&encode(&idx, 42).unwrap()).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(restored.config, idx.config);
        assert_eq!(restored.live(), 29);
        assert_eq!(restored.tombstones(), 1);
        let q = [3.3, 1.0, -2.0];
        assert_eq!(restored.search(&q, 5, None).unwrap(), idx.search(&q, 5, None).unwrap());
    }

    #[test]
    fn test_flipped_byte_is_corrupt() {
        let mut bytes = encode(&sample(), 1).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(matches!(decode(&bytes), Err(Error::Corrupt(_))));
        assert!(matches!(decode(&bytes[..5]), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_index_path() {
        assert_eq!(index_path(Path::new("/tmp/db"), "docs"), PathBuf::from("/tmp/db/docs.mvx"));
    }
}
