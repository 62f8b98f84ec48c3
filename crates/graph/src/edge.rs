//! Edge entities and adjacency keys
//!
//! An edge is an ordinary entity in the edge table whose primary key is the
//! edge id. Adding it also writes two adjacency keys:
//!
//! - `graph:out:<from>:<edge_id>` → `<to>`
//! - `graph:in:<to>:<edge_id>` → `<from>`
//!
//! Validity bounds are epoch milliseconds and inclusive; a missing bound is
//! unbounded on that side.

use mosaic_core::key::{join, SEP};
use mosaic_core::{BaseEntity, Error, FieldValue, Result};

/// Source vertex field
pub const FROM_FIELD: &str = "_from";
/// Target vertex field
pub const TO_FIELD: &str = "_to";
/// Optional edge label
pub const LABEL_FIELD: &str = "_label";
/// Traversal cost, defaults to [`DEFAULT_WEIGHT`]
pub const WEIGHT_FIELD: &str = "_weight";
/// Start of the validity interval
pub const VALID_FROM_FIELD: &str = "valid_from";
/// End of the validity interval
pub const VALID_TO_FIELD: &str = "valid_to";

/// Table edges are stored in unless configured otherwise
pub const DEFAULT_EDGE_TABLE: &str = "edges";
/// Weight of an edge without `_weight`
pub const DEFAULT_WEIGHT: f64 = 1.0;

const SPACE: &str = "graph";
const OUT: &str = "out";
const IN: &str = "in";

/// A directed edge between two vertex ids
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Edge id, the primary key of the edge entity
    pub id: String,
    /// Source vertex
    pub from: String,
    /// Target vertex
    pub to: String,
    /// Optional label
    pub label: Option<String>,
    /// Non-negative traversal cost
    pub weight: f64,
    /// First instant (inclusive) the edge exists
    pub valid_from: Option<i64>,
    /// Last instant (inclusive) the edge exists
    pub valid_to: Option<i64>,
}

impl Edge {
    /// Unlabelled edge of default weight, valid at all times
    pub fn new(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Edge {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            label: None,
            weight: DEFAULT_WEIGHT,
            valid_from: None,
            valid_to: None,
        }
    }

    /// Set the label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the validity interval
    pub fn with_validity(mut self, valid_from: Option<i64>, valid_to: Option<i64>) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    /// Reject edges traversals cannot handle
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidArgument("edge id must not be empty".into()));
        }
        if self.from.is_empty() || self.to.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "edge {:?} needs non-empty {} and {}",
                self.id, FROM_FIELD, TO_FIELD
            )));
        }
        if self.weight.is_nan() || self.weight < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "edge {:?} has invalid weight {}",
                self.id, self.weight
            )));
        }
        Ok(())
    }

    /// Read an edge from its entity
    pub fn from_entity(entity: &BaseEntity) -> Result<Self> {
        let text = |name: &str| -> Result<Option<String>> {
            Ok(match entity.get_field(name)? {
                None | Some(FieldValue::Null) => None,
                Some(v) => Some(v.to_text()),
            })
        };
        let weight = match entity.get_field(WEIGHT_FIELD)? {
            None | Some(FieldValue::Null) => DEFAULT_WEIGHT,
            Some(v) => v.as_f64().ok_or_else(|| {
                Error::InvalidArgument(format!("{} must be numeric, got {}", WEIGHT_FIELD, v.type_name()))
            })?,
        };
        let edge = Edge {
            id: entity.primary_key().to_string(),
            from: text(FROM_FIELD)?.unwrap_or_default(),
            to: text(TO_FIELD)?.unwrap_or_default(),
            label: text(LABEL_FIELD)?,
            weight,
            valid_from: entity.get_field_as_int(VALID_FROM_FIELD)?,
            valid_to: entity.get_field_as_int(VALID_TO_FIELD)?,
        };
        edge.validate()?;
        Ok(edge)
    }

    /// Entity carrying this edge's fields
    pub fn to_entity(&self) -> Result<BaseEntity> {
        let mut entity = BaseEntity::new(self.id.clone());
        entity.set_field(FROM_FIELD, self.from.as_str())?;
        entity.set_field(TO_FIELD, self.to.as_str())?;
        if let Some(label) = &self.label {
            entity.set_field(LABEL_FIELD, label.as_str())?;
        }
        entity.set_field(WEIGHT_FIELD, self.weight)?;
        if let Some(t) = self.valid_from {
            entity.set_field(VALID_FROM_FIELD, t)?;
        }
        if let Some(t) = self.valid_to {
            entity.set_field(VALID_TO_FIELD, t)?;
        }
        Ok(entity)
    }
}

/// Whether an edge with these bounds exists at `t`
pub fn valid_at(valid_from: Option<i64>, valid_to: Option<i64>, t: i64) -> bool {
    valid_from.map_or(true, |from| t >= from) && valid_to.map_or(true, |to| t <= to)
}

/// Whether the validity interval intersects `[start, end]`, or lies inside
/// it entirely when `full_containment` is set. Containment needs both
/// bounds to be known.
pub fn in_time_range(
    valid_from: Option<i64>,
    valid_to: Option<i64>,
    start: i64,
    end: i64,
    full_containment: bool,
) -> bool {
    if full_containment {
        return valid_from.is_some_and(|f| f >= start) && valid_to.is_some_and(|t| t <= end);
    }
    !(valid_from.is_some_and(|f| f > end) || valid_to.is_some_and(|t| t < start))
}

/// `graph:out:<from>:<edge_id>`
pub fn out_key(from: &str, edge_id: &str) -> String {
    join([SPACE, OUT, from, edge_id])
}

/// `graph:in:<to>:<edge_id>`
pub fn in_key(to: &str, edge_id: &str) -> String {
    join([SPACE, IN, to, edge_id])
}

/// Every outgoing adjacency key of `vertex`
pub fn out_prefix(vertex: &str) -> String {
    let mut p = join([SPACE, OUT, vertex]);
    p.push(SEP);
    p
}

/// Every incoming adjacency key of `vertex`
pub fn in_prefix(vertex: &str) -> String {
    let mut p = join([SPACE, IN, vertex]);
    p.push(SEP);
    p
}

/// Every outgoing adjacency key of the graph
pub fn all_out_prefix() -> String {
    let mut p = join([SPACE, OUT]);
    p.push(SEP);
    p
}
