//! Index joins and nests (`ON KEY ... FOR ...`) and nested-loop ANSI nests.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::datastore::IndexDef;
use crate::error::{PlanError, Result};
use crate::expr::{Expr, Formalizer, IsKind};
use crate::plan::{IndexJoin, NLNest, Operator};

use super::builder::Builder;
use super::candidates::sargable_indexes;
use super::cover::{filter_covers_json, index_cover_expressions, is_covered, FilterCovers};
use super::entry::IndexEntry;
use super::keyspace::KeyspaceTerm;
use super::minimal::minimal_indexes;
use super::scan_covering::scan_keys;

/// Index chosen for the right side of an index join or nest.
#[derive(Clone, Debug)]
pub struct JoinScan {
    pub index: Arc<IndexDef>,
    /// Index keys plus document key when the join is covered, else empty.
    pub covers: Vec<Expr>,
    pub filter_covers: FilterCovers,
}

impl Builder<'_> {
    /// Index join of `term` (`JOIN ks ON KEY expr FOR left`).
    pub fn build_index_join(&mut self, term: &KeyspaceTerm) -> Result<Operator> {
        let scan = self.build_join_scan(term, "join")?;
        let on_key = join_keys(term)?.to_string();
        let covered = !scan.covers.is_empty();
        if covered {
            self.covering_scans.push(scan.index.name.clone());
        }
        tracing::debug!(alias = %term.alias, index = %scan.index.name, covered, "planner.join.index");
        Ok(Operator::IndexJoin(IndexJoin {
            keyspace: term.keyspace.clone(),
            alias: term.alias.clone(),
            on_key,
            outer: term.outer,
            index: scan.index.name.clone(),
            covers: scan.covers.iter().map(ToString::to_string).collect(),
            filter_covers: filter_covers_json(&scan.filter_covers),
        }))
    }

    /// Index nest of `term`; nests are never covered.
    pub fn build_index_nest(&mut self, term: &KeyspaceTerm) -> Result<Operator> {
        let scan = self.build_join_scan(term, "nest")?;
        let on_key = join_keys(term)?.to_string();
        tracing::debug!(alias = %term.alias, index = %scan.index.name, "planner.nest.index");
        Ok(Operator::IndexNest {
            keyspace: term.keyspace.clone(),
            alias: term.alias.clone(),
            on_key,
            outer: term.outer,
            index: scan.index.name.clone(),
        })
    }

    /// ANSI NEST of `term` evaluated as a nested loop over a scan of the
    /// nested keyspace. The scan is never covering, since whole documents
    /// are nested.
    pub fn build_nl_nest(&mut self, term: &KeyspaceTerm, on_clause: &Expr) -> Result<Operator> {
        let term = KeyspaceTerm {
            ansi_nest: true,
            ..term.clone()
        };
        let child = self.build_scan(&term)?;
        let on_clause = self.dnf.normalize(on_clause);
        Ok(Operator::NLNest(NLNest::new(child, term.alias.as_str(), &on_clause, term.outer)))
    }

    /// Index for the right side of an index join or nest.
    ///
    /// Only non-array indexes whose leading key is the `ON KEY` expression
    /// qualify. Candidates are then sarged on `ON KEY IS NOT NULL`, with the
    /// keyspace's own filters deciding which partial indexes apply.
    pub fn build_join_scan(&self, term: &KeyspaceTerm, op: &'static str) -> Result<JoinScan> {
        let alias = term.alias.as_str();
        let no_index = || PlanError::NoIndexJoin {
            alias: alias.to_owned(),
            op,
        };
        let on_key = self.dnf.normalize(join_keys(term)?);
        let mut formalizer = Formalizer::new(alias);

        let all = self.datastore.indexes(&term.keyspace)?;
        let mut indexes = Vec::new();
        for index in &all {
            let Some(first) = index.range_keys.first() else {
                continue;
            };
            formalizer.set_index_scope();
            let key = formalizer.map(first);
            formalizer.clear_index_scope();
            let key = match key {
                Ok(key) => self.dnf.normalize(&key),
                Err(err) => {
                    tracing::debug!(index = %index.name, code = err.code(), error = %err, "planner.candidate.skipped");
                    continue;
                }
            };
            if on_key.equivalent_to(&key) && !index.has_array_index_key() {
                indexes.push(Arc::clone(index));
            }
        }
        if indexes.is_empty() {
            return Err(no_index());
        }

        let pred = self.dnf.normalize(&on_key.clone().is(IsKind::NotNull));
        let base = self
            .base_keyspaces
            .get(alias)
            .ok_or_else(|| PlanError::Internal(format!("join scan: keyspace {alias} not found")))?;
        let subset = match &base.dnf_pred {
            Some(filters) => self.dnf.normalize(&Expr::and(vec![pred.clone(), filters.clone()])),
            None => pred.clone(),
        };

        let primary_key = [Expr::meta_id(alias)];
        let candidates = sargable_indexes(
            &indexes,
            Some(&pred),
            Some(&subset),
            &primary_key,
            &mut formalizer,
            &self.dnf,
        )?;
        let minimals = minimal_indexes(candidates.sargables, false, Some(&pred));
        if minimals.is_empty() {
            return Err(no_index());
        }
        self.build_covering_join_scan(minimals, term, op, &pred)
    }

    /// Prefers a covering index for joins; otherwise the first index of the
    /// minimal set that needs the fewest scans.
    pub fn build_covering_join_scan(
        &self,
        secondaries: BTreeMap<String, IndexEntry>,
        term: &KeyspaceTerm,
        op: &'static str,
        pred: &Expr,
    ) -> Result<JoinScan> {
        let alias = term.alias.as_str();
        if let Some(exprs) = self.cover.as_ref().filter(|_| op == "join") {
            let id = Expr::meta_id(alias);
            for entry in secondaries.values() {
                let keys = scan_keys(entry, &id);
                let (cover_exprs, filter_covers) = index_cover_expressions(entry, &keys, None, None, alias);
                if exprs.iter().all(|e| is_covered(e, alias, &cover_exprs)) {
                    return Ok(JoinScan {
                        index: Arc::clone(&entry.index),
                        covers: keys,
                        filter_covers,
                    });
                }
            }
        }

        minimal_indexes(secondaries, true, Some(pred))
            .into_values()
            .next()
            .map(|entry| JoinScan {
                index: entry.index,
                covers: Vec::new(),
                filter_covers: FilterCovers::new(),
            })
            .ok_or_else(|| PlanError::NoIndexJoin {
                alias: alias.to_owned(),
                op,
            })
    }
}

fn join_keys(term: &KeyspaceTerm) -> Result<&Expr> {
    term.join_keys
        .as_ref()
        .ok_or_else(|| PlanError::Internal(format!("keyspace {} has no ON KEY expression", term.alias)))
}
