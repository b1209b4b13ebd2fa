use std::collections::BTreeMap;

use crate::error::Result;
use crate::expr::Expr;
use crate::plan::Operator;

use super::builder::{may_overlap, Builder, ScanParts};
use super::cover::{index_cover_expressions, is_covered, FilterCovers};
use super::entry::{IndexEntry, PushDownProperty};
use super::keyspace::{BaseKeyspace, KeyspaceTerm};
use super::pool::index_set_pool;

impl Builder<'_> {
    /// Picks an index that answers the query from its entries alone.
    ///
    /// Array indexes are only used when nothing else covers. Among the rest
    /// the highest `sum_keys` wins, then the richest push-down, then the
    /// shortest key list, then a partial index, then the index name.
    pub fn build_covering_scan(
        &mut self,
        indexes: &mut BTreeMap<String, IndexEntry>,
        term: &KeyspaceTerm,
        base: &BaseKeyspace,
        id: &Expr,
    ) -> Result<Option<(Operator, usize)>> {
        let Some(exprs) = self.cover.clone() else {
            return Ok(None);
        };
        let alias = term.alias.as_str();
        let pred = base.dnf_pred.as_ref();
        let orig_pred = base.orig_pred.as_ref();

        let mut arrays = index_set_pool().lease();
        let mut covering = index_set_pool().lease();
        let mut filter_covers: BTreeMap<String, FilterCovers> = BTreeMap::new();

        for (name, entry) in indexes.iter_mut() {
            let has_array = entry.index.has_array_index_key();
            if has_array && arrays.len() < covering.len() {
                continue;
            }
            self.sarg_indexes(base, term.under_hash, std::iter::once(&mut *entry))?;

            let keys = scan_keys(entry, id);
            let (cover_exprs, fc) = index_cover_expressions(entry, &keys, pred, orig_pred, alias);
            if !exprs.iter().all(|e| is_covered(e, alias, &cover_exprs)) {
                continue;
            }
            if has_array {
                arrays.insert(name.clone());
            }
            covering.insert(name.clone());
            filter_covers.insert(name.clone(), fc);
            entry.push_down = self.index_push_down_property(entry, &keys, pred, alias, true);
        }

        if covering.is_empty() {
            return Ok(None);
        }
        if arrays.len() < covering.len() {
            for name in arrays.iter() {
                covering.remove(name);
            }
        }
        let max_sum = covering.iter().map(|c| indexes[c].sum_keys).max().unwrap_or(0);
        covering.retain(|c| indexes[c].sum_keys >= max_sum);

        let mut names: Vec<&String> = covering.iter().collect();
        names.sort();
        let Some(chosen) = names.into_iter().min_by(|a, b| {
            let (ea, eb) = (&indexes[a.as_str()], &indexes[b.as_str()]);
            eb.push_down
                .cmp(&ea.push_down)
                .then(ea.index.range_keys.len().cmp(&eb.index.range_keys.len()))
                .then(eb.cond.is_some().cmp(&ea.cond.is_some()))
        }) else {
            return Ok(None);
        };
        let chosen = chosen.clone();
        let entry = &indexes[&chosen];
        let sarg_length = entry.sarg_keys().len();
        let keys = scan_keys(entry, id);
        let fc = filter_covers.remove(&chosen).unwrap_or_default();
        let array_index = arrays.contains(&chosen);
        drop(arrays);
        drop(covering);

        let duplicates = entry
            .spans
            .as_ref()
            .is_some_and(|s| s.can_have_duplicates(array_index, may_overlap(pred)));
        let projection = self.build_index_projection(
            Some(entry),
            Some(&exprs),
            Some(id),
            entry.index.primary || array_index || duplicates,
        );
        let index_order = self.check_reset_paginations(entry, &keys);
        if !entry.is_push_down(PushDownProperty::GROUPAGGS) {
            self.reset_index_group_aggs();
        }
        let group_aggs = self.build_index_group_aggs(entry, &keys);
        let distinct = entry.is_push_down(PushDownProperty::DISTINCT);
        if !distinct {
            self.reset_projection();
        }

        tracing::debug!(
            alias,
            index = %chosen,
            push_down = %entry.push_down,
            "planner.scan.covering"
        );
        let scan = self.create_scan(
            entry,
            term,
            pred,
            ScanParts {
                projection: Some(projection),
                index_order,
                group_aggs,
                covers: keys,
                filter_covers: fc,
                distinct,
            },
        )?;
        self.covering_scans.push(chosen);
        Ok(Some((scan, sarg_length)))
    }
}

// Index entries carry the document key after the range keys.
pub(super) fn scan_keys(entry: &IndexEntry, id: &Expr) -> Vec<Expr> {
    let mut keys = entry.keys.clone();
    if !entry.index.primary {
        keys.push(id.clone());
    }
    keys
}
