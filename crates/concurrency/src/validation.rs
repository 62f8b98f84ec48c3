//! Commit-time validation for OCC
//!
//! Rules:
//! - A key conflicts when some other transaction committed it after this
//!   transaction's start sequence
//! - Both the read set and the write set are checked, so two transactions
//!   writing the same key never both commit
//! - Validation runs under the engine's commit lock, so the check and the
//!   write that follows are atomic with respect to other commits

use mosaic_core::Error;
use mosaic_storage::LsmEngine;
use std::collections::BTreeSet;

/// Kinds of conflict found during validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// A key this transaction read was committed by someone else afterwards
    ReadWriteConflict {
        /// Conflicting key
        key: String,
        /// Sequence the transaction started from
        start_seq: u64,
        /// Sequence of the other commit
        committed_seq: u64,
    },

    /// A key this transaction writes was committed by someone else afterwards
    WriteWriteConflict {
        /// Conflicting key
        key: String,
        /// Sequence the transaction started from
        start_seq: u64,
        /// Sequence of the other commit
        committed_seq: u64,
    },
}

impl ConflictType {
    /// Conflicting key
    pub fn key(&self) -> &str {
        match self {
            ConflictType::ReadWriteConflict { key, .. }
            | ConflictType::WriteWriteConflict { key, .. } => key,
        }
    }
}

impl From<ConflictType> for Error {
    fn from(c: ConflictType) -> Self {
        match c {
            ConflictType::ReadWriteConflict {
                key,
                start_seq,
                committed_seq,
            }
            | ConflictType::WriteWriteConflict {
                key,
                start_seq,
                committed_seq,
            } => Error::Conflict {
                key,
                start_seq,
                committed_seq,
            },
        }
    }
}

/// Result of transaction validation
///
/// Accumulates every conflict found; the transaction commits only if
/// [`is_valid`](Self::is_valid) holds.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// No conflicts
    pub fn ok() -> Self {
        Self::default()
    }

    /// Whether validation passed
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// `Ok` when valid, otherwise the first conflict as an error
    pub fn into_result(self) -> mosaic_core::Result<()> {
        match self.conflicts.into_iter().next() {
            None => Ok(()),
            Some(c) => Err(c.into()),
        }
    }
}

/// Check every read key against the engine's commit history
pub fn validate_read_set(
    engine: &LsmEngine,
    start_seq: u64,
    read_set: &BTreeSet<String>,
) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for key in read_set {
        if let Some(committed_seq) = engine.last_commit_seq(key) {
            if committed_seq > start_seq {
                result.conflicts.push(ConflictType::ReadWriteConflict {
                    key: key.clone(),
                    start_seq,
                    committed_seq,
                });
            }
        }
    }
    result
}

/// Check every written key against the engine's commit history
pub fn validate_write_set<'a>(
    engine: &LsmEngine,
    start_seq: u64,
    write_keys: impl IntoIterator<Item = &'a str>,
) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for key in write_keys {
        if let Some(committed_seq) = engine.last_commit_seq(key) {
            if committed_seq > start_seq {
                result.conflicts.push(ConflictType::WriteWriteConflict {
                    key: key.to_string(),
                    start_seq,
                    committed_seq,
                });
            }
        }
    }
    result
}

/// Full validation: read set, then write set
pub fn validate_transaction<'a>(
    engine: &LsmEngine,
    start_seq: u64,
    read_set: &BTreeSet<String>,
    write_keys: impl IntoIterator<Item = &'a str>,
) -> ValidationResult {
    let mut result = validate_read_set(engine, start_seq, read_set);
    result.merge(validate_write_set(engine, start_seq, write_keys));
    result
}
