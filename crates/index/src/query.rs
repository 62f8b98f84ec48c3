//! Index scans
//!
//! Every query reads one engine snapshot, so a result never mixes two
//! commits. Entities whose TTL has passed are filtered out of every scan of
//! their table; they stay readable through a direct get until cleanup.

use crate::descriptor::{composite_column, IndexDescriptor, IndexKind, IndexType};
use crate::fulltext::bm25::{self, CorpusStats};
use crate::fulltext::{normalize_text, parse_query};
use crate::geo;
use crate::keys::{self, EQUALITY, FT_LENGTH, FT_POSTING, GEO, RANGE, SPARSE};
use crate::manager::SecondaryIndexManager;
use crate::sortable;
use mosaic_core::key::{last_component, prefix_successor};
use mosaic_core::{BaseEntity, Error, FieldValue, Result};
use mosaic_storage::{KeyRange, KvRead};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

/// Bounds and options of a range scan
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    /// Lower bound
    pub lower: Bound<FieldValue>,
    /// Upper bound
    pub upper: Bound<FieldValue>,
    /// Stop after this many live matches
    pub limit: Option<usize>,
    /// Descending value order
    pub reversed: bool,
}

impl Default for RangeQuery {
    fn default() -> Self {
        RangeQuery {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            limit: None,
            reversed: false,
        }
    }
}

impl RangeQuery {
    /// Unbounded on both ends
    pub fn all() -> Self {
        Self::default()
    }

    /// `lo <= v <= hi`
    pub fn between(lo: impl Into<FieldValue>, hi: impl Into<FieldValue>) -> Self {
        Self::all().gte(lo).lte(hi)
    }

    /// Explicit bounds with inclusive flags; `None` leaves an end open
    pub fn with_bounds(
        lo: Option<FieldValue>,
        hi: Option<FieldValue>,
        include_lo: bool,
        include_hi: bool,
    ) -> Self {
        let bound = |v: Option<FieldValue>, inclusive: bool| match v {
            Some(v) if inclusive => Bound::Included(v),
            Some(v) => Bound::Excluded(v),
            None => Bound::Unbounded,
        };
        RangeQuery {
            lower: bound(lo, include_lo),
            upper: bound(hi, include_hi),
            ..Self::default()
        }
    }

    /// `v >= lo`
    pub fn gte(mut self, lo: impl Into<FieldValue>) -> Self {
        self.lower = Bound::Included(lo.into());
        self
    }

    /// `v > lo`
    pub fn gt(mut self, lo: impl Into<FieldValue>) -> Self {
        self.lower = Bound::Excluded(lo.into());
        self
    }

    /// `v <= hi`
    pub fn lte(mut self, hi: impl Into<FieldValue>) -> Self {
        self.upper = Bound::Included(hi.into());
        self
    }

    /// `v < hi`
    pub fn lt(mut self, hi: impl Into<FieldValue>) -> Self {
        self.upper = Bound::Excluded(hi.into());
        self
    }

    /// Cap the number of results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Highest values first
    pub fn reversed(mut self) -> Self {
        self.reversed = true;
        self
    }

    fn key_range(&self, table: &str, column: &str) -> Result<KeyRange> {
        let prefix = keys::column_prefix(RANGE, table, column);
        let encode = |v: &FieldValue| {
            sortable::encode_value(v).ok_or_else(|| {
                Error::InvalidArgument(format!("{} values have no range order", v.type_name()))
            })
        };
        // ':' precedes every pk of a value, ';' follows all of them
        let start = match &self.lower {
            Bound::Included(v) => Bound::Included(format!("{}{}:", prefix, encode(v)?)),
            Bound::Excluded(v) => Bound::Included(format!("{}{};", prefix, encode(v)?)),
            Bound::Unbounded => Bound::Included(prefix.clone()),
        };
        let end = match &self.upper {
            Bound::Included(v) => Bound::Excluded(format!("{}{};", prefix, encode(v)?)),
            Bound::Excluded(v) => Bound::Excluded(format!("{}{}:", prefix, encode(v)?)),
            Bound::Unbounded => match prefix_successor(&prefix) {
                Some(succ) => Bound::Excluded(succ),
                None => Bound::Unbounded,
            },
        };
        let mut range = KeyRange::new(start, end);
        range.reverse = self.reversed;
        Ok(range)
    }
}

/// Visit index entries of `range`, handing `(pk, value)` to `f` until it
/// returns `false` or `cancel` is raised
pub(crate) fn scan_entries<R: KvRead + ?Sized>(
    view: &R,
    range: &KeyRange,
    cancel: &AtomicBool,
    f: &mut dyn FnMut(String, &[u8]) -> Result<bool>,
) -> Result<()> {
    let mut failure = None;
    view.scan(range, &mut |key, value| {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        match last_component(key).and_then(|pk| f(pk, value)) {
            Ok(more) => more,
            Err(e) => {
                failure = Some(e);
                false
            }
        }
    })?;
    failure.map_or(Ok(()), Err)
}

fn parse_u32(raw: &[u8]) -> Result<u32> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Corrupt("unreadable fulltext counter".into()))
}

fn parse_point(raw: &[u8]) -> Option<(f64, f64)> {
    let s = std::str::from_utf8(raw).ok()?;
    let (lat, lon) = s.split_once(',')?;
    Some((lat.parse().ok()?, lon.parse().ok()?))
}

impl SecondaryIndexManager {
    /// Primary keys whose `column` equals `value`.
    ///
    /// Uses the equality index of the column, or its sparse index.
    pub fn scan_equal(&self, table: &str, column: &str, value: &FieldValue) -> Result<Vec<String>> {
        let view = self.engine.snapshot();
        self.equal_pks(&view, table, column, value, &AtomicBool::new(false))
    }

    /// Entities whose `column` equals `value`
    pub fn scan_entities_equal(&self, table: &str, column: &str, value: &FieldValue) -> Result<Vec<BaseEntity>> {
        let view = self.engine.snapshot();
        let pks = self.equal_pks(&view, table, column, value, &AtomicBool::new(false))?;
        self.load_entities(&view, table, pks)
    }

    /// Primary keys matching every `(column, value)` pair of a composite index
    pub fn scan_equal_composite(
        &self,
        table: &str,
        columns: &[&str],
        values: &[FieldValue],
    ) -> Result<Vec<String>> {
        if columns.len() != values.len() || columns.is_empty() {
            return Err(Error::InvalidArgument(
                "composite lookup needs one value per column".into(),
            ));
        }
        let column = composite_column(columns);
        self.require(table, &column, IndexType::Equality)?;
        let texts: Vec<String> = values.iter().map(FieldValue::to_text).collect();
        let parts: Vec<&str> = texts.iter().map(String::as_str).collect();
        let view = self.engine.snapshot();
        let range = KeyRange::prefix(&keys::value_prefix(EQUALITY, table, &column, &parts));
        self.live_pks(&view, table, &range, None, &AtomicBool::new(false))
    }

    pub(crate) fn equal_pks<R: KvRead + ?Sized>(
        &self,
        view: &R,
        table: &str,
        column: &str,
        value: &FieldValue,
        cancel: &AtomicBool,
    ) -> Result<Vec<String>> {
        let text = value.to_text();
        let space = if self.descriptor(table, column, IndexType::Equality).is_some() {
            EQUALITY
        } else if self.descriptor(table, column, IndexType::Sparse).is_some() {
            SPARSE
        } else {
            return Err(Error::IndexMisconfigured(format!(
                "no equality index on {}.{}",
                table, column
            )));
        };
        let range = KeyRange::prefix(&keys::value_prefix(space, table, column, &[&text]));
        self.live_pks(view, table, &range, None, cancel)
    }

    /// Count matches up to `max_count`; the flag reports truncation
    pub fn estimate_count_equal(
        &self,
        table: &str,
        column: &str,
        value: &FieldValue,
        max_count: usize,
    ) -> Result<(usize, bool)> {
        self.require(table, column, IndexType::Equality)?;
        let text = value.to_text();
        let range = KeyRange::prefix(&keys::value_prefix(EQUALITY, table, column, &[&text]));
        let mut count = 0usize;
        let mut capped = false;
        self.engine.snapshot().scan(&range, &mut |_, _| {
            if count >= max_count {
                capped = true;
                return false;
            }
            count += 1;
            true
        })?;
        Ok((count, capped))
    }

    /// Primary keys whose `column` lies inside `query`, in value order
    pub fn scan_range(&self, table: &str, column: &str, query: &RangeQuery) -> Result<Vec<String>> {
        let view = self.engine.snapshot();
        self.range_pks(&view, table, column, query, &AtomicBool::new(false))
    }

    pub(crate) fn range_pks<R: KvRead + ?Sized>(
        &self,
        view: &R,
        table: &str,
        column: &str,
        query: &RangeQuery,
        cancel: &AtomicBool,
    ) -> Result<Vec<String>> {
        self.require(table, column, IndexType::Range)?;
        let range = query.key_range(table, column)?;
        self.live_pks(view, table, &range, query.limit, cancel)
    }

    /// Primary keys with a non-empty `column`, via its sparse index
    pub fn scan_present(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let view = self.engine.snapshot();
        self.present_pks(&view, table, column, &AtomicBool::new(false))
    }

    pub(crate) fn present_pks<R: KvRead + ?Sized>(
        &self,
        view: &R,
        table: &str,
        column: &str,
        cancel: &AtomicBool,
    ) -> Result<Vec<String>> {
        self.require(table, column, IndexType::Sparse)?;
        let range = KeyRange::prefix(&keys::column_prefix(SPARSE, table, column));
        let mut pks = self.live_pks(view, table, &range, None, cancel)?;
        pks.sort();
        pks.dedup();
        Ok(pks)
    }

    /// Primary keys located inside the box, ordered by key
    pub fn scan_geo_box(
        &self,
        table: &str,
        column: &str,
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    ) -> Result<Vec<String>> {
        let view = self.engine.snapshot();
        let hits = self.geo_points(&view, table, column, (min_lat, max_lat, min_lon, max_lon), &AtomicBool::new(false))?;
        Ok(hits.into_keys().collect())
    }

    /// Primary keys within `radius_km` of the point, nearest first, with
    /// their distance in kilometres
    pub fn scan_geo_radius(
        &self,
        table: &str,
        column: &str,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Vec<(String, f64)>> {
        if !geo::valid_coordinates(lat, lon) || radius_km.is_nan() || radius_km < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "invalid radius query ({}, {}) r={}",
                lat, lon, radius_km
            )));
        }
        let view = self.engine.snapshot();
        let mut points = BTreeMap::new();
        for bbox in geo::radius_boxes(lat, lon, radius_km) {
            points.extend(self.geo_points(&view, table, column, bbox, &AtomicBool::new(false))?);
        }
        let mut hits: Vec<(String, f64)> = points
            .into_iter()
            .map(|(pk, (plat, plon))| (pk, geo::haversine_km(lat, lon, plat, plon)))
            .filter(|(_, d)| *d <= radius_km)
            .collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(CmpOrdering::Equal).then_with(|| a.0.cmp(&b.0)));
        Ok(hits)
    }

    /// Points inside `(min_lat, max_lat, min_lon, max_lon)`, keyed by pk
    pub(crate) fn geo_points<R: KvRead + ?Sized>(
        &self,
        view: &R,
        table: &str,
        column: &str,
        bbox: (f64, f64, f64, f64),
        cancel: &AtomicBool,
    ) -> Result<BTreeMap<String, (f64, f64)>> {
        self.require(table, column, IndexType::Geo)?;
        let (min_lat, max_lat, min_lon, max_lon) = bbox;
        if min_lat > max_lat || min_lon > max_lon {
            return Err(Error::InvalidArgument("geo box bounds are inverted".into()));
        }
        let ttl = self.ttl_descriptors(table);
        let now = self.now();
        let mut hits = BTreeMap::new();
        for cell in geo::covering_prefixes(min_lat, max_lat, min_lon, max_lon) {
            let mut prefix = keys::column_prefix(GEO, table, column);
            prefix.push_str(&cell);
            scan_entries(view, &KeyRange::prefix(&prefix), cancel, &mut |pk, value| {
                if let Some((lat, lon)) = parse_point(value) {
                    let inside = (min_lat..=max_lat).contains(&lat) && (min_lon..=max_lon).contains(&lon);
                    if inside && self.is_live(view, &ttl, &pk, now)? {
                        hits.insert(pk, (lat, lon));
                    }
                }
                Ok(true)
            })?;
        }
        Ok(hits)
    }

    /// Primary keys of documents matching every query term, best first
    pub fn scan_fulltext(&self, table: &str, column: &str, query: &str, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .scan_fulltext_with_scores(table, column, query, limit)?
            .into_iter()
            .map(|(pk, _)| pk)
            .collect())
    }

    /// BM25-ranked matches of `query`.
    ///
    /// Candidates must contain every analyzed term. Quoted phrases are then
    /// checked as substrings of the normalized field text, which is not
    /// positional: a phrase whose words were stemmed or dropped as
    /// stopwords is still compared literally. Ties are ordered by key.
    pub fn scan_fulltext_with_scores(
        &self,
        table: &str,
        column: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(String, f64)>> {
        let view = self.engine.snapshot();
        self.fulltext_hits(&view, table, column, query, limit, &AtomicBool::new(false))
    }

    pub(crate) fn fulltext_hits<R: KvRead + ?Sized>(
        &self,
        view: &R,
        table: &str,
        column: &str,
        query: &str,
        limit: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<(String, f64)>> {
        let desc = self.require(table, column, IndexType::Fulltext)?;
        let IndexKind::Fulltext(config) = &desc.kind else {
            return Err(Error::IndexMisconfigured(format!("{}.{} is not fulltext", table, column)));
        };
        let parsed = parse_query(query, config);
        if parsed.tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // Postings per term, intersected as we go
        let mut postings: Vec<(f64, HashMap<String, u32>)> = Vec::with_capacity(parsed.tokens.len());
        let mut candidates: Option<BTreeSet<String>> = None;
        for token in &parsed.tokens {
            let mut tf = HashMap::new();
            let range = KeyRange::prefix(&keys::value_prefix(FT_POSTING, table, column, &[token]));
            scan_entries(view, &range, cancel, &mut |pk, value| {
                tf.insert(pk, parse_u32(value)?);
                Ok(true)
            })?;
            let here: BTreeSet<String> = tf.keys().cloned().collect();
            let next = match candidates {
                Some(prev) => prev.intersection(&here).cloned().collect(),
                None => here,
            };
            let empty = next.is_empty();
            candidates = Some(next);
            postings.push((tf.len() as f64, tf));
            if empty {
                return Ok(Vec::new());
            }
        }
        let candidates = candidates.unwrap_or_default();

        let stats = self.corpus_stats(view, &desc, cancel)?;
        let ttl = self.ttl_descriptors(table);
        let now = self.now();
        let mut scored = Vec::with_capacity(candidates.len());
        for pk in candidates {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            if !self.is_live(view, &ttl, &pk, now)? {
                continue;
            }
            if !parsed.phrases.is_empty() {
                let text = match self.get_in(view, table, &pk)? {
                    Some(entity) => entity.get_field(column)?.map(|v| v.to_text()).unwrap_or_default(),
                    None => continue,
                };
                let normalized = normalize_text(&text, config);
                if !parsed.phrases.iter().all(|p| normalized.contains(p.as_str())) {
                    continue;
                }
            }
            let doc_len = match view.get(&keys::ft_length_key(table, column, &pk))? {
                Some(raw) => parse_u32(&raw)?,
                None => 0,
            };
            let score: f64 = postings
                .iter()
                .map(|(df, tf)| {
                    let idf = bm25::idf(stats.doc_count, *df as u64);
                    bm25::term_score(idf, tf.get(&pk).copied().unwrap_or(0), doc_len, &stats)
                })
                .sum();
            scored.push((pk, score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(CmpOrdering::Equal).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Document count and average length of one fulltext index
    pub(crate) fn corpus_stats<R: KvRead + ?Sized>(
        &self,
        view: &R,
        desc: &IndexDescriptor,
        cancel: &AtomicBool,
    ) -> Result<CorpusStats> {
        let mut doc_count = 0u64;
        let mut total = 0u64;
        let range = KeyRange::prefix(&keys::column_prefix(FT_LENGTH, &desc.table, &desc.column));
        scan_entries(view, &range, cancel, &mut |_, value| {
            doc_count += 1;
            total += u64::from(parse_u32(value)?);
            Ok(true)
        })?;
        let avg_doc_len = if doc_count == 0 { 0.0 } else { total as f64 / doc_count as f64 };
        Ok(CorpusStats { doc_count, avg_doc_len })
    }

    /// Live primary keys of an index range, in scan order
    pub(crate) fn live_pks<R: KvRead + ?Sized>(
        &self,
        view: &R,
        table: &str,
        range: &KeyRange,
        limit: Option<usize>,
        cancel: &AtomicBool,
    ) -> Result<Vec<String>> {
        let ttl = self.ttl_descriptors(table);
        let now = self.now();
        let limit = limit.unwrap_or(usize::MAX);
        let mut pks = Vec::new();
        if limit == 0 {
            return Ok(pks);
        }
        scan_entries(view, range, cancel, &mut |pk, _| {
            if self.is_live(view, &ttl, &pk, now)? {
                pks.push(pk);
            }
            Ok(pks.len() < limit)
        })?;
        Ok(pks)
    }

    pub(crate) fn load_entities<R: KvRead + ?Sized>(
        &self,
        view: &R,
        table: &str,
        pks: Vec<String>,
    ) -> Result<Vec<BaseEntity>> {
        let mut out = Vec::with_capacity(pks.len());
        for pk in pks {
            if let Some(entity) = self.get_in(view, table, &pk)? {
                out.push(entity);
            }
        }
        Ok(out)
    }
}
