//! Per-query planning state and the scan entry point.
//!
//! The builder holds the pagination, ordering and aggregation the query
//! would like an index scan to take over. Each `reset_*` call records that
//! the chosen scan cannot perform one of them, so after planning the fields
//! describe exactly what was pushed down.
use std::collections::BTreeMap;

use crate::config::PlannerConfig;
use crate::datastore::{Datastore, IndexApi, PartitionStrategy};
use crate::error::{PlanError, Result};
use crate::expr::{Expr, Formalizer};
use crate::plan::{IndexAggregate, IndexGroupAggs, IndexKeyOrder, IndexProjection, IndexScan, Operator};
use crate::value::Value;

use super::candidates::sargable_indexes;
use super::cover::{filter_covers_json, is_covered, FilterCovers};
use super::dnf::Dnf;
use super::entry::{IndexEntry, PushDownProperty};
use super::keyspace::{BaseKeyspace, Filter, KeyspaceTerm};
use super::sarg::{sarg_for, sarg_for_filters};
use super::shape::{Aggregate, OrderTerm, QueryShape};

/// Index-scan planner for one query.
pub struct Builder<'a> {
    pub(super) config: PlannerConfig,
    pub(super) datastore: &'a dyn Datastore,
    pub(super) dnf: Dnf,
    pub(super) cover: Option<Vec<Expr>>,
    pub(super) order: Option<Vec<OrderTerm>>,
    pub(super) offset: Option<i64>,
    pub(super) limit: Option<i64>,
    pub(super) group: Option<Vec<Expr>>,
    pub(super) aggs: Vec<Aggregate>,
    pub(super) distinct: bool,
    pub(super) max_parallelism: usize,
    pub(super) order_scan: bool,
    pub(super) covering_scans: Vec<String>,
    pub(super) base_keyspaces: BTreeMap<String, BaseKeyspace>,
}

/// What one index scan returns besides document keys.
#[derive(Default)]
pub(super) struct ScanParts {
    pub projection: Option<IndexProjection>,
    pub index_order: Vec<IndexKeyOrder>,
    pub group_aggs: Option<IndexGroupAggs>,
    pub covers: Vec<Expr>,
    pub filter_covers: FilterCovers,
    pub distinct: bool,
}

impl<'a> Builder<'a> {
    /// Builder with nothing to push down.
    pub fn new(config: PlannerConfig, datastore: &'a dyn Datastore) -> Self {
        let dnf = Dnf::new(config.max_dnf_terms);
        Self {
            config,
            datastore,
            dnf,
            cover: None,
            order: None,
            offset: None,
            limit: None,
            group: None,
            aggs: Vec::new(),
            distinct: false,
            max_parallelism: 0,
            order_scan: false,
            covering_scans: Vec::new(),
            base_keyspaces: BTreeMap::new(),
        }
    }

    /// Sets the query shape the scans may take over.
    pub fn with_shape(mut self, shape: QueryShape) -> Self {
        self.cover = shape.cover;
        self.order = (!shape.order.is_empty()).then_some(shape.order);
        self.offset = shape.offset;
        self.limit = shape.limit;
        self.group = shape.group;
        self.aggs = shape.aggregates;
        self.distinct = shape.distinct;
        self
    }

    /// Registers the WHERE/ON filters of keyspace `alias`.
    pub fn add_keyspace(&mut self, alias: &str, filters: Vec<Filter>) -> &BaseKeyspace {
        let base = BaseKeyspace::new(alias, filters, &self.dnf);
        self.base_keyspaces.insert(alias.to_owned(), base);
        &self.base_keyspaces[alias]
    }

    /// Registered filters of `alias`.
    pub fn base_keyspace(&self, alias: &str) -> Option<&BaseKeyspace> {
        self.base_keyspaces.get(alias)
    }

    /// Active configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// ORDER BY still pushed into the scan.
    pub fn order(&self) -> Option<&[OrderTerm]> {
        self.order.as_deref()
    }

    /// OFFSET pushed into the scan.
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// LIMIT pushed into the scan.
    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    /// GROUP BY keys pushed into the scan.
    pub fn group(&self) -> Option<&[Expr]> {
        self.group.as_deref()
    }

    /// Aggregates pushed into the scan.
    pub fn aggregates(&self) -> &[Aggregate] {
        &self.aggs
    }

    /// Whether the scan returns distinct projections.
    pub fn distinct(&self) -> bool {
        self.distinct
    }

    pub(super) fn group_aggs_pushed(&self) -> bool {
        self.group.is_some() || !self.aggs.is_empty()
    }

    /// Parallelism ceiling; 0 means unrestricted.
    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Whether the scan returns rows in ORDER BY order.
    pub fn order_scan(&self) -> bool {
        self.order_scan
    }

    /// Indexes chosen for covering scans and joins, in planning order.
    pub fn covering_scans(&self) -> &[String] {
        &self.covering_scans
    }

    /// Plans the scan of `term`: a secondary (possibly covering or
    /// intersecting) index scan when some index is sargable, else a scan of
    /// the primary index.
    pub fn build_scan(&mut self, term: &KeyspaceTerm) -> Result<Operator> {
        let indexes = self.datastore.indexes(&term.keyspace)?;
        let base = match self.base_keyspaces.get(&term.alias) {
            Some(base) => base.clone(),
            None => BaseKeyspace::new(term.alias.as_str(), Vec::new(), &self.dnf),
        };
        let pred = base.dnf_pred.clone();
        let id = Expr::meta_id(term.alias.as_str());
        let mut formalizer = Formalizer::new(term.alias.as_str());
        let candidates = sargable_indexes(
            &indexes,
            pred.as_ref(),
            pred.as_ref(),
            std::slice::from_ref(&id),
            &mut formalizer,
            &self.dnf,
        )?;

        if !candidates.sargables.is_empty() {
            if let Some((scan, sarg_length)) = self.build_secondary_scan(candidates.sargables, term, &base, &id)? {
                tracing::debug!(
                    alias = %term.alias,
                    operator = scan.name(),
                    sarg_length,
                    covering = scan.is_covering(),
                    "planner.scan.secondary"
                );
                return Ok(scan);
            }
        }

        let primary = candidates.primary.ok_or_else(|| PlanError::NoPrimaryIndex {
            keyspace: term.keyspace.clone(),
        })?;
        let unfiltered = pred.as_ref().map_or(true, |p| p.value() == Some(&Value::TRUE));
        let limit = if unfiltered && self.order.is_none() && !self.group_aggs_pushed() && !self.distinct {
            offset_plus_limit(self.offset, self.limit)
        } else {
            None
        };
        self.reset_push_downs();
        self.reset_projection();
        tracing::debug!(alias = %term.alias, index = primary.name(), "planner.scan.primary");
        Ok(Operator::PrimaryScan {
            index: primary.name().to_owned(),
            keyspace: term.keyspace.clone(),
            alias: term.alias.clone(),
            limit,
        })
    }

    /// Computes spans for `entries` from the keyspace's predicate.
    ///
    /// A disjunction is sarged disjunct by disjunct unless the keyspace is
    /// the build side of a hash join, where join filters are left to the
    /// join. An index below API v2 honours only its leading key, so its
    /// spans stay exact only if they constrain nothing else.
    pub(super) fn sarg_indexes<'e>(
        &self,
        base: &BaseKeyspace,
        under_hash: bool,
        entries: impl IntoIterator<Item = &'e mut IndexEntry>,
    ) -> Result<()> {
        let pred = base.dnf_pred.as_ref();
        let max_spans = self.config.max_index_spans;
        for entry in entries {
            let (spans, mut exact) = match pred {
                Some(p @ Expr::Or(_)) if !under_hash => sarg_for(
                    p,
                    &entry.keys,
                    entry.min_keys,
                    base.or_is_join(),
                    &base.name,
                    max_spans,
                ),
                _ => sarg_for_filters(&base.filters, &entry.keys, entry.min_keys, under_hash, &base.name, max_spans),
            };
            if spans.size() == 0 {
                let keys: Vec<String> = entry.sarg_keys().iter().map(ToString::to_string).collect();
                tracing::error!(
                    index = entry.name(),
                    pred = %format!("<ud>{}</ud>", pred.map(ToString::to_string).unwrap_or_default()),
                    sarg_keys = %format!("<ud>{}</ud>", keys.join(", ")),
                    "planner.sarg.failed"
                );
                return Err(PlanError::SargFailure {
                    index: entry.name().to_owned(),
                });
            }
            if exact && entry.index.effective_api(self.config.index_api) < IndexApi::V2 {
                exact = spans.exact_span1(entry.keys.len());
            }
            entry.spans = Some(spans);
            entry.exact_spans = exact;
        }
        Ok(())
    }

    /// Operations a scan of `entry` can take over for this query.
    ///
    /// Nothing is pushed unless the spans apply the whole predicate. GROUP
    /// BY and aggregates need a covering v3 scan without duplicates; once
    /// the query groups, ordering and pagination apply to groups and stay
    /// out of the scan. LIMIT and OFFSET follow only when ORDER BY (if any)
    /// is served by the index.
    pub(super) fn index_push_down_property(
        &self,
        entry: &IndexEntry,
        keys: &[Expr],
        pred: Option<&Expr>,
        alias: &str,
        covering: bool,
    ) -> PushDownProperty {
        let mut property = PushDownProperty::NONE;
        let Some(spans) = &entry.spans else {
            return property;
        };
        if !entry.exact_spans {
            return property;
        }
        let api = entry.index.effective_api(self.config.index_api);

        if self.group_aggs_pushed() {
            let duplicates = spans.can_have_duplicates(entry.has_array_key(), may_overlap(pred));
            if covering
                && api >= IndexApi::V3
                && self.config.group_agg_pushdown
                && !duplicates
                && self.group_aggs_covered(keys, alias)
            {
                property |= PushDownProperty::GROUPAGGS;
            }
            return property;
        }

        if self.order.is_some() {
            if self.use_index_order(entry, keys).is_none() {
                return property;
            }
            property |= PushDownProperty::ORDER;
        }
        if self.distinct && covering && api >= IndexApi::V3 {
            property |= PushDownProperty::DISTINCT;
        }
        if self.limit.is_some() {
            property |= PushDownProperty::LIMIT;
        }
        if self.offset.is_some() && api >= IndexApi::V2 {
            property |= PushDownProperty::OFFSET;
        }
        property
    }

    fn group_aggs_covered(&self, keys: &[Expr], alias: &str) -> bool {
        let group_ok = self
            .group
            .iter()
            .flatten()
            .all(|g| is_covered(g, alias, keys));
        let aggs_ok = self
            .aggs
            .iter()
            .filter_map(|a| a.operand.as_ref())
            .all(|op| is_covered(op, alias, keys));
        group_ok && aggs_ok
    }

    /// Index key positions that produce the ORDER BY terms in order, or
    /// `None` when the scan cannot.
    ///
    /// Keys pinned to a single value by every span may be skipped. All terms
    /// must share a direction; descending scans need API v3.
    pub(super) fn use_index_order(&self, entry: &IndexEntry, keys: &[Expr]) -> Option<Vec<IndexKeyOrder>> {
        let order = self.order.as_ref()?;
        let spans = entry.spans.as_ref()?;
        if !spans.is_ordered() {
            return None;
        }
        let desc = order.first()?.descending;
        if order.iter().any(|t| t.descending != desc) {
            return None;
        }
        if desc && entry.index.effective_api(self.config.index_api) < IndexApi::V3 {
            return None;
        }
        let mut pos = 0;
        let mut out = Vec::with_capacity(order.len());
        for term in order {
            loop {
                let key = keys.get(pos)?;
                if !key.is_array_index_key() && key.equivalent_to(&term.expr) {
                    out.push(IndexKeyOrder { key_pos: pos, desc });
                    pos += 1;
                    break;
                }
                if !spans.equality_key(pos) {
                    return None;
                }
                pos += 1;
            }
        }
        Some(out)
    }

    /// Entry fields a scan returns: the keys `exprs` read, plus the document
    /// key when `primary_key` is set or `exprs` read it.
    pub(super) fn build_index_projection(
        &self,
        entry: Option<&IndexEntry>,
        exprs: Option<&[Expr]>,
        id: Option<&Expr>,
        primary_key: bool,
    ) -> IndexProjection {
        let mut projection = IndexProjection {
            entry_keys: Vec::new(),
            primary_key,
        };
        if let (Some(entry), Some(exprs)) = (entry, exprs) {
            for (pos, key) in entry.keys.iter().enumerate() {
                if exprs.iter().any(|e| e.depends_on(key)) {
                    projection.entry_keys.push(pos);
                }
            }
            if let Some(id) = id {
                if exprs.iter().any(|e| e.depends_on(id)) {
                    projection.primary_key = true;
                }
            }
        }
        projection
    }

    /// Drops pagination the chosen covering entry cannot take over and
    /// returns the index order to scan in.
    pub(super) fn check_reset_paginations(&mut self, entry: &IndexEntry, keys: &[Expr]) -> Vec<IndexKeyOrder> {
        let mut index_order = Vec::new();
        if self.order.is_some() {
            if entry.is_push_down(PushDownProperty::ORDER) {
                index_order = self.use_index_order(entry, keys).unwrap_or_default();
                self.max_parallelism = 1;
            } else {
                self.reset_order_offset_limit();
            }
        }
        if self.offset.is_some() && !entry.is_push_down(PushDownProperty::OFFSET) {
            self.limit = offset_plus_limit(self.offset, self.limit);
            self.reset_offset();
        }
        if self.limit.is_some() && !entry.is_push_down(PushDownProperty::LIMIT) {
            self.reset_limit();
        }
        index_order
    }

    /// Group/aggregate push-down of a covering scan over `entry`.
    ///
    /// The result is partial when a hash-partitioned index is grouped by
    /// something other than all of its partition keys, since groups then
    /// span partitions.
    pub(super) fn build_index_group_aggs(&self, entry: &IndexEntry, keys: &[Expr]) -> Option<IndexGroupAggs> {
        if !self.group_aggs_pushed() || !entry.is_push_down(PushDownProperty::GROUPAGGS) {
            return None;
        }
        let group: &[Expr] = self.group.as_deref().unwrap_or(&[]);
        let used: Vec<&Expr> = group
            .iter()
            .chain(self.aggs.iter().filter_map(|a| a.operand.as_ref()))
            .collect();
        let depends_on_index_keys = keys
            .iter()
            .enumerate()
            .filter(|(_, key)| used.iter().any(|e| e.depends_on(key)))
            .map(|(pos, _)| pos)
            .collect();
        let partial = entry.index.partition.strategy != PartitionStrategy::None
            && !entry
                .partition_keys
                .iter()
                .all(|pk| group.iter().any(|g| g.equivalent_to(pk)));
        Some(IndexGroupAggs {
            group: group.iter().map(ToString::to_string).collect(),
            aggregates: self
                .aggs
                .iter()
                .map(|a| IndexAggregate {
                    aggregate: a.func.name().to_owned(),
                    expr: a.operand.as_ref().map(ToString::to_string),
                    distinct: a.distinct,
                })
                .collect(),
            depends_on_index_keys,
            partial,
        })
    }

    /// Index scan over a sarged entry; a scan that may return a document
    /// more than once is wrapped in a `DistinctScan` carrying the
    /// pagination.
    pub(super) fn create_scan(
        &self,
        entry: &IndexEntry,
        term: &KeyspaceTerm,
        pred: Option<&Expr>,
        parts: ScanParts,
    ) -> Result<Operator> {
        let spans = entry
            .spans
            .as_ref()
            .ok_or_else(|| PlanError::Internal(format!("index {} was not sarged", entry.name())))?;
        let duplicates = !parts.distinct && spans.can_have_duplicates(entry.has_array_key(), may_overlap(pred));
        let (offset, limit) = if duplicates {
            (None, None)
        } else {
            (self.offset, self.limit)
        };
        let scan = Operator::IndexScan(IndexScan {
            index: entry.name().to_owned(),
            keyspace: term.keyspace.clone(),
            alias: term.alias.clone(),
            spans: spans.to_plan(),
            covers: parts.covers.iter().map(ToString::to_string).collect(),
            filter_covers: filter_covers_json(&parts.filter_covers),
            limit,
            offset,
            index_projection: parts.projection,
            index_order: parts.index_order,
            index_group_aggs: parts.group_aggs,
            distinct: parts.distinct,
        });
        if !duplicates {
            return Ok(scan);
        }
        Ok(Operator::DistinctScan {
            limit: self.limit,
            offset: self.offset,
            scan: Box::new(scan),
        })
    }

    pub(super) fn reset_order_offset_limit(&mut self) {
        self.order = None;
        self.reset_offset_limit();
    }

    pub(super) fn reset_offset_limit(&mut self) {
        self.reset_offset();
        self.reset_limit();
    }

    pub(super) fn reset_offset(&mut self) {
        self.offset = None;
    }

    pub(super) fn reset_limit(&mut self) {
        self.limit = None;
    }

    pub(super) fn reset_index_group_aggs(&mut self) {
        self.group = None;
        self.aggs.clear();
    }

    pub(super) fn reset_projection(&mut self) {
        self.distinct = false;
    }

    pub(super) fn reset_push_downs(&mut self) {
        self.reset_order_offset_limit();
        self.reset_index_group_aggs();
    }
}

/// OR spans may overlap and return a document twice.
pub(super) fn may_overlap(pred: Option<&Expr>) -> bool {
    matches!(pred, Some(Expr::Or(_)))
}

/// LIMIT to apply when OFFSET cannot be pushed.
pub(super) fn offset_plus_limit(offset: Option<i64>, limit: Option<i64>) -> Option<i64> {
    match (offset, limit) {
        (Some(offset), Some(limit)) => Some(offset.saturating_add(limit)),
        (None, limit) => limit,
        (Some(_), None) => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::datastore::{IndexDef, InMemoryDatastore};
    use crate::expr::IsKind;

    fn store() -> InMemoryDatastore {
        InMemoryDatastore::new()
            .with_index(IndexDef::primary("#primary", "customer"))
            .with_index(IndexDef::secondary(
                "ix_age_name",
                "customer",
                vec![Expr::ident("age"), Expr::ident("name")],
            ))
    }

    fn sarged(builder: &Builder<'_>, base: &BaseKeyspace, keys: Vec<Expr>, min_keys: usize) -> IndexEntry {
        let mut entry = IndexEntry {
            index: Arc::new(IndexDef::secondary("ix", "customer", Vec::new())),
            keys,
            min_keys,
            sum_keys: min_keys,
            partition_keys: Vec::new(),
            cond: None,
            orig_cond: None,
            spans: None,
            exact_spans: false,
            push_down: PushDownProperty::NONE,
        };
        builder.sarg_indexes(base, false, std::iter::once(&mut entry)).unwrap();
        entry
    }

    #[test]
    fn offset_folds_into_limit() {
        assert_eq!(offset_plus_limit(Some(5), Some(10)), Some(15));
        assert_eq!(offset_plus_limit(None, Some(10)), Some(10));
        assert_eq!(offset_plus_limit(Some(5), None), None);
        assert_eq!(offset_plus_limit(Some(i64::MAX), Some(1)), Some(i64::MAX));
    }

    #[test]
    fn index_order_skips_equality_keys() {
        let ds = store();
        let mut builder = Builder::new(PlannerConfig::default(), &ds)
            .with_shape(QueryShape::default().with_order(vec![OrderTerm::asc(Expr::path("c.name"))]));
        let base = builder
            .add_keyspace("c", vec![Filter::new(Expr::path("c.age").equals(Expr::constant(30)), ["c"])])
            .clone();
        let keys = vec![Expr::path("c.age"), Expr::path("c.name")];
        let entry = sarged(&builder, &base, keys.clone(), 1);
        assert_eq!(
            builder.use_index_order(&entry, &keys),
            Some(vec![IndexKeyOrder { key_pos: 1, desc: false }])
        );

        let ranged = builder
            .add_keyspace("c", vec![Filter::new(Expr::path("c.age").greater_than(Expr::constant(30)), ["c"])])
            .clone();
        let entry = sarged(&builder, &ranged, keys.clone(), 1);
        assert_eq!(builder.use_index_order(&entry, &keys), None);
    }

    #[test]
    fn push_down_requires_exact_spans_and_served_order() {
        let ds = store();
        let mut builder = Builder::new(PlannerConfig::default(), &ds).with_shape(
            QueryShape::default()
                .with_order(vec![OrderTerm::asc(Expr::path("c.age"))])
                .with_offset(5)
                .with_limit(10),
        );
        let base = builder
            .add_keyspace("c", vec![Filter::new(Expr::path("c.age").greater_than(Expr::constant(21)), ["c"])])
            .clone();
        let keys = vec![Expr::path("c.age")];
        let entry = sarged(&builder, &base, keys.clone(), 1);
        let property = builder.index_push_down_property(&entry, &keys, base.dnf_pred.as_ref(), "c", false);
        assert!(property.contains(PushDownProperty::ORDER | PushDownProperty::LIMIT | PushDownProperty::OFFSET));

        let mut inexact = entry.clone();
        inexact.exact_spans = false;
        let property = builder.index_push_down_property(&inexact, &keys, base.dnf_pred.as_ref(), "c", false);
        assert_eq!(property, PushDownProperty::NONE);

        builder.order = Some(vec![OrderTerm::asc(Expr::path("c.name"))]);
        let property = builder.index_push_down_property(&entry, &keys, base.dnf_pred.as_ref(), "c", false);
        assert_eq!(property, PushDownProperty::NONE);
    }

    #[test]
    fn unpushable_offset_becomes_limit() {
        let ds = store();
        let mut builder = Builder::new(PlannerConfig::default(), &ds)
            .with_shape(QueryShape::default().with_offset(5).with_limit(10));
        let base = builder
            .add_keyspace("c", vec![Filter::new(Expr::path("c.age").equals(Expr::constant(1)), ["c"])])
            .clone();
        let keys = vec![Expr::path("c.age")];
        let mut entry = sarged(&builder, &base, keys.clone(), 1);
        entry.push_down = PushDownProperty::LIMIT;
        let order = builder.check_reset_paginations(&entry, &keys);
        assert!(order.is_empty());
        assert_eq!(builder.offset(), None);
        assert_eq!(builder.limit(), Some(15));
    }

    #[test]
    fn primary_scan_when_nothing_is_sargable() {
        let ds = store();
        let mut builder = Builder::new(PlannerConfig::default(), &ds);
        builder.add_keyspace("c", vec![Filter::new(Expr::path("c.email").is(IsKind::NotNull), ["c"])]);
        let plan = builder.build_scan(&KeyspaceTerm::new("customer", "c")).unwrap();
        assert!(matches!(plan, Operator::PrimaryScan { ref index, .. } if index == "#primary"));

        let empty = InMemoryDatastore::new();
        let mut builder = Builder::new(PlannerConfig::default(), &empty);
        let err = builder.build_scan(&KeyspaceTerm::new("customer", "c")).unwrap_err();
        assert_eq!(err.code(), "NoPrimaryIndex");
    }

    #[test]
    fn unfiltered_primary_scan_takes_the_limit() {
        let ds = store();
        let mut builder =
            Builder::new(PlannerConfig::default(), &ds).with_shape(QueryShape::default().with_offset(2).with_limit(3));
        let plan = builder.build_scan(&KeyspaceTerm::new("customer", "c")).unwrap();
        assert!(matches!(plan, Operator::PrimaryScan { limit: Some(5), .. }));
    }
}
