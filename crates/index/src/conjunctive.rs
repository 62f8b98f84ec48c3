//! Multi-predicate AND queries
//!
//! Each predicate is scanned on its own rayon worker against one shared
//! snapshot. A worker that finds no match, or fails, raises the shared
//! cancel flag; the others notice it in their scan callbacks and stop.

use crate::manager::SecondaryIndexManager;
use crate::query::RangeQuery;
use mosaic_core::{Error, FieldValue, Result};
use mosaic_storage::Snapshot;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// One condition of a conjunctive query
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Equality (or sparse) index lookup
    Equal {
        /// Indexed column
        column: String,
        /// Value to match
        value: FieldValue,
    },
    /// Range index scan
    Range {
        /// Indexed column
        column: String,
        /// Bounds; limit and order are ignored
        query: RangeQuery,
    },
    /// Sparse index presence
    Present {
        /// Indexed column
        column: String,
    },
    /// Geo index bounding box
    GeoBox {
        /// Indexed column
        column: String,
        /// Southern edge
        min_lat: f64,
        /// Northern edge
        max_lat: f64,
        /// Western edge
        min_lon: f64,
        /// Eastern edge
        max_lon: f64,
    },
    /// Fulltext match of every term
    Fulltext {
        /// Indexed column
        column: String,
        /// Query text
        query: String,
    },
}

impl Predicate {
    /// `column == value`
    pub fn equal(column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Equal {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column` within `query`
    pub fn range(column: impl Into<String>, query: RangeQuery) -> Self {
        Predicate::Range {
            column: column.into(),
            query,
        }
    }

    /// `column` holds a non-empty value
    pub fn present(column: impl Into<String>) -> Self {
        Predicate::Present {
            column: column.into(),
        }
    }

    /// `column` matches the fulltext query
    pub fn fulltext(column: impl Into<String>, query: impl Into<String>) -> Self {
        Predicate::Fulltext {
            column: column.into(),
            query: query.into(),
        }
    }

    fn column(&self) -> &str {
        match self {
            Predicate::Equal { column, .. }
            | Predicate::Range { column, .. }
            | Predicate::Present { column }
            | Predicate::GeoBox { column, .. }
            | Predicate::Fulltext { column, .. } => column,
        }
    }
}

impl SecondaryIndexManager {
    /// Primary keys satisfying every predicate, ordered by key
    pub fn conjunctive_and(&self, table: &str, predicates: &[Predicate]) -> Result<Vec<String>> {
        if predicates.is_empty() {
            return Err(Error::InvalidArgument("conjunctive query needs a predicate".into()));
        }
        let view = self.engine.snapshot();
        let cancel = AtomicBool::new(false);
        let results: Vec<Mutex<Option<Result<BTreeSet<String>>>>> =
            predicates.iter().map(|_| Mutex::new(None)).collect();

        rayon::scope(|s| {
            for (pred, slot) in predicates.iter().zip(&results) {
                let (view, cancel) = (&view, &cancel);
                s.spawn(move |_| {
                    let outcome = self.predicate_pks(view, table, pred, cancel);
                    match &outcome {
                        Ok(pks) if pks.is_empty() => cancel.store(true, Ordering::Relaxed),
                        Err(_) => cancel.store(true, Ordering::Relaxed),
                        Ok(_) => {}
                    }
                    *slot.lock() = Some(outcome);
                });
            }
        });

        let mut sets = Vec::with_capacity(results.len());
        let mut cancelled = false;
        for slot in results {
            match slot.into_inner() {
                Some(Ok(set)) => sets.push(set),
                Some(Err(e)) => return Err(e),
                None => cancelled = true,
            }
        }
        if cancelled || sets.iter().any(BTreeSet::is_empty) {
            return Ok(Vec::new());
        }

        // Smallest first keeps the intermediate set small
        sets.sort_by_key(BTreeSet::len);
        let mut iter = sets.into_iter();
        let mut acc = iter.next().unwrap_or_default();
        for set in iter {
            acc.retain(|pk| set.contains(pk));
            if acc.is_empty() {
                break;
            }
        }
        debug!(target: "mosaic::index", table, predicates = predicates.len(), hits = acc.len(), "Conjunctive query");
        Ok(acc.into_iter().collect())
    }

    fn predicate_pks(
        &self,
        view: &Snapshot,
        table: &str,
        pred: &Predicate,
        cancel: &AtomicBool,
    ) -> Result<BTreeSet<String>> {
        let column = pred.column();
        let pks: Vec<String> = match pred {
            Predicate::Equal { value, .. } => self.equal_pks(view, table, column, value, cancel)?,
            Predicate::Range { query, .. } => {
                let unbounded = RangeQuery {
                    limit: None,
                    reversed: false,
                    ..query.clone()
                };
                self.range_pks(view, table, column, &unbounded, cancel)?
            }
            Predicate::Present { .. } => self.present_pks(view, table, column, cancel)?,
            Predicate::GeoBox {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
                ..
            } => self
                .geo_points(view, table, column, (*min_lat, *max_lat, *min_lon, *max_lon), cancel)?
                .into_keys()
                .collect(),
            Predicate::Fulltext { query, .. } => self
                .fulltext_hits(view, table, column, query, usize::MAX, cancel)?
                .into_iter()
                .map(|(pk, _)| pk)
                .collect(),
        };
        Ok(pks.into_iter().collect())
    }
}
