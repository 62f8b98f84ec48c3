//! Key layouts of the index key spaces
//!
//! | kind | entry key | value |
//! |---|---|---|
//! | equality | `idx:<t>:<c>:<v1>[:<v2>...]:<pk>` | empty |
//! | unique guard | `uniq:<t>:<c>:<kind>:<v1>[:<v2>...]` | pk |
//! | range | `ridx:<t>:<c>:<sortable>:<pk>` | empty |
//! | sparse | `sidx:<t>:<c>:<v>:<pk>` | empty |
//! | geo | `gidx:<t>:<c>:<geohash>:<pk>` | `lat,lon` |
//! | ttl | `ttlidx:<t>:<c>:<expiry>:<pk>` | empty |
//! | ttl pointer | `ttlptr:<t>:<c>:<pk>` | expiry |
//! | fulltext posting | `ftidx:<t>:<c>:<token>:<pk>` | term frequency |
//! | fulltext length | `ftlen:<t>:<c>:<pk>` | token count |
//!
//! Every component goes through [`join`], so values containing `:` stay a
//! single component and the primary key is always the last one.

use crate::descriptor::{IndexDescriptor, IndexType};
use mosaic_core::key::{join, SEP};

pub(crate) const EQUALITY: &str = "idx";
pub(crate) const UNIQUE: &str = "uniq";
pub(crate) const RANGE: &str = "ridx";
pub(crate) const SPARSE: &str = "sidx";
pub(crate) const GEO: &str = "gidx";
pub(crate) const TTL: &str = "ttlidx";
pub(crate) const TTL_PTR: &str = "ttlptr";
pub(crate) const FT_POSTING: &str = "ftidx";
pub(crate) const FT_LENGTH: &str = "ftlen";
pub(crate) const META: &str = "idxmeta";

fn with_sep(mut key: String) -> String {
    key.push(SEP);
    key
}

/// Descriptor key
pub fn meta_key(table: &str, column: &str, index_type: IndexType) -> String {
    join([META, table, column, index_type.name()])
}

/// All descriptors
pub fn meta_prefix() -> String {
    with_sep(META.to_string())
}

/// Every key of `space` for one column
pub fn column_prefix(space: &str, table: &str, column: &str) -> String {
    with_sep(join([space, table, column]))
}

/// Entries of one value (or one token) of a column
pub fn value_prefix(space: &str, table: &str, column: &str, values: &[&str]) -> String {
    let mut parts = vec![space, table, column];
    parts.extend_from_slice(values);
    with_sep(join(parts))
}

/// Entry key for `pk` under one value
pub fn entry_key(space: &str, table: &str, column: &str, values: &[&str], pk: &str) -> String {
    let mut parts = vec![space, table, column];
    parts.extend_from_slice(values);
    parts.push(pk);
    join(parts)
}

/// Guard key of a unique value
pub fn unique_key(table: &str, column: &str, index_type: IndexType, values: &[&str]) -> String {
    let mut parts = vec![UNIQUE, table, column, index_type.name()];
    parts.extend_from_slice(values);
    join(parts)
}

/// Fixed-width expiry so keys sort by time
pub fn encode_expiry(expiry: i64) -> String {
    format!("{:020}", expiry.max(0))
}

/// `ttlptr:<t>:<c>:<pk>`
pub fn ttl_ptr_key(table: &str, column: &str, pk: &str) -> String {
    join([TTL_PTR, table, column, pk])
}

/// `ftlen:<t>:<c>:<pk>`
pub fn ft_length_key(table: &str, column: &str, pk: &str) -> String {
    join([FT_LENGTH, table, column, pk])
}

/// Key spaces an index writes to
pub fn spaces(index_type: IndexType) -> &'static [&'static str] {
    match index_type {
        IndexType::Equality => &[EQUALITY, UNIQUE],
        IndexType::Range => &[RANGE],
        IndexType::Sparse => &[SPARSE, UNIQUE],
        IndexType::Geo => &[GEO],
        IndexType::Ttl => &[TTL, TTL_PTR],
        IndexType::Fulltext => &[FT_POSTING, FT_LENGTH],
    }
}

/// Primary space whose entries count as the index's entries
pub fn primary_space(index_type: IndexType) -> &'static str {
    spaces(index_type)[0]
}

/// Every key prefix owned by `desc`
pub fn owned_prefixes(desc: &IndexDescriptor) -> Vec<String> {
    let index_type = desc.index_type();
    spaces(index_type)
        .iter()
        .map(|space| {
            if *space == UNIQUE {
                value_prefix(UNIQUE, &desc.table, &desc.column, &[index_type.name()])
            } else {
                column_prefix(space, &desc.table, &desc.column)
            }
        })
        .collect()
}
