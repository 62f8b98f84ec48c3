//! Index administration: create, drop, rebuild, statistics

use crate::descriptor::{IndexDescriptor, IndexKind, IndexType, COMPOSITE_SEP};
use crate::fulltext::FulltextConfig;
use crate::keys::{self, UNIQUE};
use crate::manager::{Entries, SecondaryIndexManager};
use mosaic_concurrency::TransactionContext;
use mosaic_core::key::{entity_prefix, last_component, validate_table_name};
use mosaic_core::{Error, Result};
use mosaic_storage::{KvRead, KvWrite};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tracing::{info, warn};

/// Attempts before a rebuild gives up on write conflicts
const REBUILD_ATTEMPTS: usize = 5;

/// Size and shape of one index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    /// Kind
    pub index_type: IndexType,
    /// Indexed table
    pub table: String,
    /// Indexed column (`a+b` for composite)
    pub column: String,
    /// Number of entries in the index's main key space
    pub entry_count: usize,
    /// Bytes of keys and values across all key spaces of the index
    pub estimated_size_bytes: usize,
    /// Whether the index enforces uniqueness
    pub unique: bool,
    /// Kind-specific details
    pub additional_info: String,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}: {} entries, ~{} bytes",
            self.index_type, self.table, self.column, self.entry_count, self.estimated_size_bytes
        )?;
        if !self.additional_info.is_empty() {
            write!(f, " ({})", self.additional_info)?;
        }
        Ok(())
    }
}

fn validate_definition(table: &str, column: &str, kind: &IndexKind) -> Result<()> {
    validate_table_name(table)?;
    if column.is_empty() || column.split(COMPOSITE_SEP).any(str::is_empty) {
        return Err(Error::InvalidArgument(format!("invalid index column {:?}", column)));
    }
    let composite = column.contains(COMPOSITE_SEP);
    match kind {
        IndexKind::Equality { .. } => Ok(()),
        _ if composite => Err(Error::InvalidArgument(format!(
            "{} indexes cannot span several columns",
            kind.index_type()
        ))),
        IndexKind::Ttl { ttl_seconds } if *ttl_seconds <= 0 => Err(Error::InvalidArgument(
            "ttl_seconds must be positive".into(),
        )),
        _ => Ok(()),
    }
}

impl SecondaryIndexManager {
    /// Define an index and index every existing entity of the table.
    ///
    /// Redefining an index identically is a no-op; a different configuration
    /// for the same column and kind is rejected.
    pub fn create_index(&self, table: &str, column: &str, kind: IndexKind) -> Result<()> {
        validate_definition(table, column, &kind)?;
        let desc = IndexDescriptor::new(table, column, kind);
        let index_type = desc.index_type();
        {
            let mut descs = self.descriptors.write();
            let list = descs.entry(table.to_string()).or_default();
            if let Some(existing) = list
                .iter()
                .find(|d| d.column == column && d.index_type() == index_type)
            {
                if *existing == desc {
                    return Ok(());
                }
                return Err(Error::InvalidOperation(format!(
                    "{} index on {}.{} already exists with a different configuration",
                    index_type, table, column
                )));
            }
            let mut batch = self.engine.batch();
            batch.put(&keys::meta_key(table, column, index_type), serde_json::to_vec(&desc)?)?;
            batch.commit()?;
            list.push(desc);
        }
        info!(target: "mosaic::index", table, column, kind = %index_type, "Created index");

        let indexed = self.rebuild_index(table, column, index_type, &mut |_, _| true);
        if let Err(e) = indexed {
            // Leave no half-defined index behind
            let _ = self.drop_index(table, column, index_type);
            return Err(e);
        }
        Ok(())
    }

    /// Remove an index definition and all of its entries.
    ///
    /// Returns whether the index existed.
    pub fn drop_index(&self, table: &str, column: &str, index_type: IndexType) -> Result<bool> {
        let mut descs = self.descriptors.write();
        let Some(list) = descs.get_mut(table) else {
            return Ok(false);
        };
        let Some(pos) = list
            .iter()
            .position(|d| d.column == column && d.index_type() == index_type)
        else {
            return Ok(false);
        };

        let desc = list[pos].clone();
        let mut batch = self.engine.batch();
        batch.delete(&keys::meta_key(table, column, index_type))?;
        let mut removed = 0usize;
        for prefix in keys::owned_prefixes(&desc) {
            for key in self.engine.keys_with_prefix(&prefix)? {
                batch.delete(&key)?;
                removed += 1;
            }
        }
        batch.commit()?;
        list.remove(pos);
        if list.is_empty() {
            descs.remove(table);
        }
        info!(target: "mosaic::index", table, column, kind = %index_type, removed, "Dropped index");
        Ok(true)
    }

    /// Whether the index is defined
    pub fn has_index(&self, table: &str, column: &str, index_type: IndexType) -> bool {
        self.descriptor(table, column, index_type).is_some()
    }

    /// Every index of `table`
    pub fn list_indexes(&self, table: &str) -> Vec<IndexDescriptor> {
        self.descriptors_for(table)
    }

    /// Analyzer settings of a fulltext index
    pub fn fulltext_config(&self, table: &str, column: &str) -> Option<FulltextConfig> {
        match self.descriptor(table, column, IndexType::Fulltext)?.kind {
            IndexKind::Fulltext(config) => Some(config),
            _ => None,
        }
    }

    /// Recompute an index from the stored entities.
    ///
    /// Stale entries are removed and missing ones added in one transaction;
    /// TTL expiries already recorded are kept. `progress(done, total)` is
    /// called per entity and cancels the rebuild by returning `false`.
    /// Returns the number of entities visited.
    pub fn rebuild_index(
        &self,
        table: &str,
        column: &str,
        index_type: IndexType,
        progress: &mut dyn FnMut(usize, usize) -> bool,
    ) -> Result<usize> {
        let desc = self.require(table, column, index_type)?;
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut txn = TransactionContext::begin(&self.engine);
            let visited = match self.rebuild_in(&mut txn, &desc, progress) {
                Ok(n) => n,
                Err(e) => {
                    txn.abort(e.to_string());
                    return Err(e);
                }
            };
            match txn.commit() {
                Ok(_) => {
                    let elapsed = started.elapsed().as_millis() as u64;
                    self.metrics.record(visited as u64, elapsed);
                    info!(
                        target: "mosaic::index",
                        table,
                        column,
                        kind = %index_type,
                        entities = visited,
                        elapsed_ms = elapsed,
                        "Rebuilt index"
                    );
                    return Ok(visited);
                }
                Err(e) if e.is_conflict() && attempt < REBUILD_ATTEMPTS => {
                    warn!(target: "mosaic::index", table, column, attempt, "Rebuild raced a writer, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn rebuild_in(
        &self,
        txn: &mut TransactionContext,
        desc: &IndexDescriptor,
        progress: &mut dyn FnMut(usize, usize) -> bool,
    ) -> Result<usize> {
        let mut stored: Vec<(String, Vec<u8>)> = Vec::new();
        txn.scan_prefix(&entity_prefix(&desc.table), &mut |key, value| {
            stored.push((key.to_string(), value.to_vec()));
            true
        })?;
        let total = stored.len();
        let now = self.now();

        let mut wanted = Entries::new();
        for (done, (key, blob)) in stored.into_iter().enumerate() {
            if !progress(done, total) {
                return Err(Error::InvalidOperation("index rebuild cancelled".into()));
            }
            let pk = last_component(&key)?;
            let entity = self.codec.decode(&desc.table, &pk, &blob)?;
            let mut entries = self.stored_entries(&*txn, desc, Some(&entity), &pk)?;
            if entries.is_empty() {
                entries = self.entries_for(desc, &entity, now)?;
            }
            for (k, v) in entries {
                if k.starts_with(UNIQUE) {
                    if let Some(owner) = wanted.get(&k) {
                        if *owner != v {
                            return Err(Error::InvalidOperation(format!(
                                "unique index {}.{} has duplicate values",
                                desc.table, desc.column
                            )));
                        }
                    }
                }
                wanted.insert(k, v);
            }
            // Rewriting the blob makes a concurrent writer of this entity conflict
            txn.put(&key, blob)?;
        }
        progress(total, total);

        let mut existing: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for prefix in keys::owned_prefixes(desc) {
            txn.scan_prefix(&prefix, &mut |k, v| {
                existing.insert(k.to_string(), v.to_vec());
                true
            })?;
        }
        for key in existing.keys() {
            if !wanted.contains_key(key) {
                txn.delete(key)?;
            }
        }
        for (key, value) in wanted {
            if existing.get(&key) != Some(&value) {
                txn.put(&key, value)?;
            }
        }
        Ok(total)
    }

    /// Rebuild every index of `table`; returns the number of indexes
    pub fn reindex_table(&self, table: &str) -> Result<usize> {
        let descs = self.descriptors_for(table);
        for desc in &descs {
            self.rebuild_index(table, &desc.column, desc.index_type(), &mut |_, _| true)?;
        }
        Ok(descs.len())
    }

    /// Statistics of one index
    pub fn index_stats(&self, table: &str, column: &str, index_type: IndexType) -> Result<IndexStats> {
        let desc = self.require(table, column, index_type)?;
        self.stats_for(&desc)
    }

    /// Statistics of every index of `table`
    pub fn all_index_stats(&self, table: &str) -> Result<Vec<IndexStats>> {
        self.descriptors_for(table)
            .iter()
            .map(|d| self.stats_for(d))
            .collect()
    }

    fn stats_for(&self, desc: &IndexDescriptor) -> Result<IndexStats> {
        let view = self.engine.snapshot();
        let main = keys::column_prefix(keys::primary_space(desc.index_type()), &desc.table, &desc.column);
        let mut entry_count = 0usize;
        let mut size = 0usize;
        for prefix in keys::owned_prefixes(desc) {
            let counts_entries = prefix == main;
            view.scan_prefix(&prefix, &mut |k, v| {
                if counts_entries {
                    entry_count += 1;
                }
                size += k.len() + v.len();
                true
            })?;
        }
        let additional_info = match &desc.kind {
            IndexKind::Equality { .. } if desc.is_composite() => {
                format!("columns={}", desc.columns().len())
            }
            IndexKind::Geo => format!("geohash_precision={}", crate::geo::GEOHASH_PRECISION),
            IndexKind::Ttl { ttl_seconds } => format!("ttl_seconds={}", ttl_seconds),
            IndexKind::Fulltext(config) => {
                let stats = self.corpus_stats(&view, desc, &AtomicBool::new(false))?;
                format!(
                    "docs={} avg_doc_len={:.2} language={:?} stemming={} stopwords={}",
                    stats.doc_count,
                    stats.avg_doc_len,
                    config.language,
                    config.stemming_enabled,
                    config.stopwords_enabled
                )
            }
            _ => String::new(),
        };
        Ok(IndexStats {
            index_type: desc.index_type(),
            table: desc.table.clone(),
            column: desc.column.clone(),
            entry_count,
            estimated_size_bytes: size,
            unique: desc.kind.is_unique(),
            additional_info,
        })
    }
}
