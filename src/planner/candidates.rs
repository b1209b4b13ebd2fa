use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::datastore::{IndexDef, PartitionStrategy};
use crate::error::Result;
use crate::expr::{Expr, Formalizer};

use super::dnf::Dnf;
use super::entry::{IndexEntry, PushDownProperty};
use super::sarg::sargable_for;
use super::subset::subset_of;

/// Candidate entries for one keyspace, keyed by index name.
#[derive(Clone, Debug, Default)]
pub struct Candidates {
    /// Entries with at least one sargable key.
    pub sargables: BTreeMap<String, IndexEntry>,
    /// Every retained entry.
    pub all: BTreeMap<String, IndexEntry>,
    /// Names of retained entries with an array index key.
    pub arrays: BTreeSet<String>,
    /// Full-scan fallback over the primary index.
    pub primary: Option<IndexEntry>,
}

/// Builds one entry per usable index.
///
/// Secondary keys and partial conditions are formalized into the alias
/// scope and normalized; a partial index is kept only when `subset` implies
/// its condition. An index whose expressions cannot be formalized is skipped.
/// Primary indexes are keyed by `primary_key` and always kept as fallback.
pub fn sargable_indexes(
    indexes: &[Arc<IndexDef>],
    pred: Option<&Expr>,
    subset: Option<&Expr>,
    primary_key: &[Expr],
    formalizer: &mut Formalizer,
    dnf: &Dnf,
) -> Result<Candidates> {
    let mut out = Candidates::default();
    for index in indexes {
        let entry = match build_entry(index, pred, subset, primary_key, formalizer, dnf) {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(err) => {
                tracing::debug!(
                    index = %index.name,
                    code = err.code(),
                    error = %err,
                    "planner.candidate.skipped"
                );
                continue;
            }
        };
        if index.primary {
            if out.primary.is_none() {
                out.primary = Some(entry.clone());
            }
            if entry.min_keys == 0 {
                continue;
            }
        }
        let name = index.name.clone();
        if entry.has_array_key() {
            out.arrays.insert(name.clone());
        }
        if entry.min_keys > 0 {
            out.sargables.insert(name.clone(), entry.clone());
        }
        out.all.insert(name, entry);
    }
    tracing::trace!(
        alias = formalizer.alias(),
        sargable = out.sargables.len(),
        retained = out.all.len(),
        "planner.candidates"
    );
    Ok(out)
}

fn build_entry(
    index: &Arc<IndexDef>,
    pred: Option<&Expr>,
    subset: Option<&Expr>,
    primary_key: &[Expr],
    formalizer: &mut Formalizer,
    dnf: &Dnf,
) -> Result<Option<IndexEntry>> {
    formalizer.set_index_scope();
    let mapped = map_index_exprs(index, primary_key, formalizer, dnf);
    formalizer.clear_index_scope();
    let (keys, cond, orig_cond, partition_keys) = mapped?;
    if keys.is_empty() {
        return Ok(None);
    }
    if let Some(cond) = &cond {
        match subset {
            Some(subset) if subset_of(subset, cond) => {}
            _ => return Ok(None),
        }
    }
    let (min_keys, sum_keys) = match pred {
        Some(pred) => sargable_for(pred, &keys, formalizer.alias()),
        None => (0, 0),
    };
    Ok(Some(IndexEntry {
        index: Arc::clone(index),
        keys,
        min_keys,
        sum_keys,
        partition_keys,
        cond,
        orig_cond,
        spans: None,
        exact_spans: false,
        push_down: PushDownProperty::NONE,
    }))
}

type MappedIndex = (Vec<Expr>, Option<Expr>, Option<Expr>, Vec<Expr>);

fn map_index_exprs(
    index: &IndexDef,
    primary_key: &[Expr],
    formalizer: &Formalizer,
    dnf: &Dnf,
) -> Result<MappedIndex> {
    let keys = if index.primary {
        primary_key.to_vec()
    } else {
        index
            .range_keys
            .iter()
            .map(|key| formalizer.map(key).map(|k| dnf.normalize(&k)))
            .collect::<Result<Vec<_>>>()?
    };
    let (cond, orig_cond) = match &index.condition {
        Some(cond) => {
            let orig = formalizer.map(cond)?;
            (Some(dnf.normalize(&orig)), Some(orig))
        }
        None => (None, None),
    };
    let partition_keys = match index.partition.strategy {
        PartitionStrategy::None => Vec::new(),
        PartitionStrategy::Hash | PartitionStrategy::Other => index
            .partition
            .exprs
            .iter()
            .map(|e| formalizer.map(e))
            .collect::<Result<Vec<_>>>()?,
    };
    Ok((keys, cond, orig_cond, partition_keys))
}
