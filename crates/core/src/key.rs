//! Storage key schema
//!
//! All keys are UTF-8 strings built from `:`-separated components. Any `:`
//! or `%` inside a component is percent-escaped so a component never
//! contains the separator:
//!
//! - entities: `<table>:<pk>`
//! - index entries and metadata use reserved leading components
//!   (see [`RESERVED_PREFIXES`]), so table names may not collide with them.

use crate::error::{Error, Result};

/// Component separator
pub const SEP: char = ':';

/// Leading components owned by the index, graph and metadata layers
pub const RESERVED_PREFIXES: &[&str] = &[
    "idx", "ridx", "sidx", "gidx", "ttlidx", "ttlptr", "ftidx", "ftlen", "uniq", "idxmeta",
    "graph", "sys",
];

/// Escape `%` and `:` inside a key component
pub fn escape_component(raw: &str) -> String {
    if !raw.contains(['%', ':']) {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse of [`escape_component`]
pub fn unescape_component(escaped: &str) -> Result<String> {
    if !escaped.contains('%') {
        return Ok(escaped.to_string());
    }
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3).ok_or_else(|| {
            Error::Corrupt(format!("truncated escape in key component {:?}", escaped))
        })?;
        match code {
            "25" => out.push('%'),
            "3A" => out.push(':'),
            other => {
                return Err(Error::Corrupt(format!(
                    "unknown escape %{} in key component {:?}",
                    other, escaped
                )))
            }
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Join components, escaping each one
pub fn join<I, S>(components: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = components
        .into_iter()
        .map(|c| escape_component(c.as_ref()))
        .collect();
    parts.join(":")
}

/// Split a key into unescaped components
pub fn split(key: &str) -> Result<Vec<String>> {
    key.split(SEP).map(unescape_component).collect()
}

/// Last component of a key, unescaped (the primary key for index entries)
pub fn last_component(key: &str) -> Result<String> {
    let raw = key.rsplit(SEP).next().unwrap_or(key);
    unescape_component(raw)
}

/// Reject empty names and names that shadow reserved key spaces
pub fn validate_table_name(table: &str) -> Result<()> {
    if table.is_empty() {
        return Err(Error::InvalidArgument("table name must not be empty".into()));
    }
    if RESERVED_PREFIXES.contains(&table) {
        return Err(Error::InvalidArgument(format!(
            "table name {:?} is reserved",
            table
        )));
    }
    Ok(())
}

/// `<table>:<pk>`
pub fn entity_key(table: &str, pk: &str) -> String {
    join([table, pk])
}

/// `<table>:` — every entity of the table
pub fn entity_prefix(table: &str) -> String {
    let mut p = escape_component(table);
    p.push(SEP);
    p
}

/// Smallest string greater than every string starting with `prefix`
///
/// Returns `None` when no such string exists (prefix made only of
/// `char::MAX`).
pub fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let mut next = last as u32 + 1;
        // Skip the surrogate gap
        if (0xD800..=0xDFFF).contains(&next) {
            next = 0xE000;
        }
        if let Some(c) = char::from_u32(next) {
            chars.push(c);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
