//! Pairwise elimination of dominated index candidates.
use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::expr::Expr;

use super::entry::IndexEntry;
use super::pool::{filter_covers_pool, index_set_pool};
use super::subset::subset_of;

/// Removes every entry some other entry is narrower than or equivalent to.
///
/// Entries are visited in rank order (higher `sum_keys` first, then shorter
/// key lists when `shortest`, then partial indexes, then name) and an entry
/// removed earlier never eliminates anything, so mutual ties keep the
/// higher-ranked entry regardless of map order. Without `shortest`, entries
/// tied on `sum_keys` all survive unless a partial condition separates them.
pub fn minimal_indexes(
    mut entries: BTreeMap<String, IndexEntry>,
    shortest: bool,
    pred: Option<&Expr>,
) -> BTreeMap<String, IndexEntry> {
    if entries.len() < 2 {
        return entries;
    }
    let mut order: Vec<&IndexEntry> = entries.values().collect();
    order.sort_by_key(|e| {
        (
            Reverse(e.sum_keys),
            if shortest { e.keys.len() } else { 0 },
            e.cond.is_none(),
            e.name().to_owned(),
        )
    });
    let mut removed = index_set_pool().lease();
    for s in &order {
        if removed.contains(s.name()) {
            continue;
        }
        for t in &order {
            if t.name() == s.name() || removed.contains(t.name()) {
                continue;
            }
            if narrower_or_equivalent(s, t, shortest, pred) {
                tracing::trace!(kept = s.name(), dropped = t.name(), "planner.minimal.dominated");
                removed.insert(t.name().to_owned());
            }
        }
    }
    entries.retain(|name, _| !removed.contains(name));
    entries
}

/// Whether `s` is at least as selective as `t`.
///
/// Every sarg key of `t` must be subsumed by (or a sub-expression of) a sarg
/// key of `s`, or be pinned by an equality in `s`'s partial condition. When
/// picking the fewest scans (`shortest`), a key that `s`'s condition merely
/// mentions also counts unless the query predicate itself fixes that key.
///
/// `s` wins outright only when its condition accounts for every key of `t`.
/// Otherwise it needs a higher `sum_keys`, or, when `shortest`, a key list
/// no longer than `t`'s.
pub fn narrower_or_equivalent(s: &IndexEntry, t: &IndexEntry, shortest: bool, pred: Option<&Expr>) -> bool {
    let s_keys = s.sarg_keys();
    let t_keys = t.sarg_keys();
    if t_keys.len() > s_keys.len() {
        return false;
    }
    if let Some(t_cond) = &t.cond {
        match &s.cond {
            Some(s_cond) if subset_of(s_cond, t_cond) => {}
            _ => return false,
        }
    }

    let mut cond_covers = filter_covers_pool().lease();
    if let Some(s_cond) = &s.cond {
        s_cond.filter_covers(&mut cond_covers);
    }
    let mut pred_covers = filter_covers_pool().lease();
    if shortest {
        if let Some(pred) = pred {
            pred.filter_covers(&mut pred_covers);
        }
    }

    let mut cond_matched = 0;
    for tk in t_keys {
        if s_keys.iter().any(|sk| subset_of(sk, tk) || sk.depends_on(tk)) {
            continue;
        }
        let Some(s_cond) = &s.cond else {
            return false;
        };
        let key = tk.to_string();
        let cond_eq = cond_covers.contains_key(&key);
        let pred_eq = pred_covers.contains_key(&key);
        if cond_eq || (shortest && !pred_eq && s_cond.depends_on(tk)) {
            cond_matched += 1;
        } else {
            return false;
        }
    }

    if cond_matched == t_keys.len() {
        return true;
    }
    s.sum_keys > t.sum_keys || (shortest && s.keys.len() <= t.keys.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::datastore::IndexDef;
    use crate::planner::entry::PushDownProperty;

    fn entry(name: &str, keys: &[&str], min: usize, cond: Option<Expr>) -> IndexEntry {
        let keys: Vec<Expr> = keys.iter().map(|k| Expr::path(&format!("c.{k}"))).collect();
        IndexEntry {
            index: Arc::new(IndexDef::secondary(name, "customer", Vec::new())),
            keys,
            min_keys: min,
            sum_keys: min,
            partition_keys: Vec::new(),
            cond: cond.clone(),
            orig_cond: cond,
            spans: None,
            exact_spans: false,
            push_down: PushDownProperty::NONE,
        }
    }

    fn map(entries: Vec<IndexEntry>) -> BTreeMap<String, IndexEntry> {
        entries.into_iter().map(|e| (e.name().to_owned(), e)).collect()
    }

    #[test]
    fn wider_prefix_dominates() {
        let out = minimal_indexes(
            map(vec![entry("ix_a", &["a"], 1, None), entry("ix_ab", &["a", "b"], 2, None)]),
            true,
            None,
        );
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["ix_ab"]);
    }

    #[test]
    fn disjoint_keys_both_survive() {
        let out = minimal_indexes(
            map(vec![entry("ix_a", &["a"], 1, None), entry("ix_b", &["b"], 1, None)]),
            true,
            None,
        );
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn ties_prefer_shorter_then_partial_then_name() {
        let out = minimal_indexes(
            map(vec![entry("ix_a2", &["a", "x"], 1, None), entry("ix_a1", &["a"], 1, None)]),
            true,
            None,
        );
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["ix_a1"]);

        let cond = Expr::path("c.t").equals(Expr::constant("u"));
        let out = minimal_indexes(
            map(vec![entry("ix_plain", &["a"], 1, None), entry("ix_part", &["a"], 1, Some(cond))]),
            true,
            None,
        );
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["ix_part"]);

        let out = minimal_indexes(
            map(vec![entry("ix_y", &["a"], 1, None), entry("ix_x", &["a"], 1, None)]),
            true,
            None,
        );
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["ix_x"]);
    }

    #[test]
    fn equal_sum_keys_survive_unless_shortest() {
        let short = || entry("ix_cust", &["cust"], 1, None);
        let long = || entry("ix_cust_total", &["cust", "total"], 1, None);

        let out = minimal_indexes(map(vec![short(), long()]), false, None);
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["ix_cust", "ix_cust_total"]);

        let out = minimal_indexes(map(vec![short(), long()]), true, None);
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["ix_cust"]);
    }

    #[test]
    fn higher_sum_keys_dominates_without_shortest() {
        let s = entry("ix_ab", &["a", "b"], 2, None);
        let t = entry("ix_a", &["a"], 1, None);
        assert!(narrower_or_equivalent(&s, &t, false, None));
        let peer = entry("ix_a2", &["a"], 1, None);
        assert!(!narrower_or_equivalent(&peer, &t, false, None));
    }

    #[test]
    fn partial_condition_blocks_unconditioned_winner() {
        let cond = Expr::path("c.t").equals(Expr::constant("u"));
        let s = entry("ix_ab", &["a", "b"], 2, None);
        let t = entry("ix_part", &["a"], 1, Some(cond));
        assert!(!narrower_or_equivalent(&s, &t, true, None));
        assert!(!narrower_or_equivalent(&t, &s, true, None));
    }

    #[test]
    fn condition_equality_accounts_for_keys() {
        let cond = Expr::path("c.t").equals(Expr::constant("u"));
        let s = entry("ix_a_t", &["a"], 1, Some(cond.clone()));
        let t = entry("ix_t", &["t"], 1, Some(cond));
        assert!(narrower_or_equivalent(&s, &t, false, None));
        let pred = Expr::path("c.t").equals(Expr::constant("u"));
        assert!(narrower_or_equivalent(&s, &t, true, Some(&pred)));
    }
}
