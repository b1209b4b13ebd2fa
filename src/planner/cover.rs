//! Covering analysis: whether an index alone can answer a query.
use std::collections::BTreeMap;

use crate::expr::Expr;
use crate::value::Value;

use super::entry::IndexEntry;
use super::pool::filter_covers_pool;
use super::sarg::{conjuncts, constrain};
use super::span::SargSpans;

/// Expressions whose values an index scan supplies through its partial
/// condition, keyed by their string form.
pub type FilterCovers = BTreeMap<String, (Expr, Value)>;

/// Expressions an index scan over `entry` makes available: its `keys`, the
/// filter covers of its partial condition and, for exact array-index spans,
/// the `ANY` predicates those spans apply.
pub fn index_cover_expressions(
    entry: &IndexEntry,
    keys: &[Expr],
    pred: Option<&Expr>,
    orig_pred: Option<&Expr>,
    alias: &str,
) -> (Vec<Expr>, FilterCovers) {
    let mut filter_covers = FilterCovers::new();
    if let Some(cond) = &entry.cond {
        let mut fc = filter_covers_pool().lease();
        cond.filter_covers(&mut fc);
        if let Some(orig) = &entry.orig_cond {
            orig.filter_covers(&mut fc);
        }
        filter_covers.extend(fc.drain());
    }

    if let Some(pred) = pred {
        let sarg_array = entry.sarg_keys().iter().any(Expr::is_array_index_key);
        let intersect = matches!(entry.spans, Some(SargSpans::Intersect(_)));
        if entry.exact_spans && sarg_array && !intersect {
            for (key, cover) in covers_for(pred, orig_pred, keys, alias) {
                filter_covers.entry(key).or_insert(cover);
            }
        }
    }

    let mut exprs = Vec::with_capacity(keys.len() + filter_covers.len());
    exprs.extend(keys.iter().cloned());
    exprs.extend(filter_covers.values().map(|(e, _)| e.clone()));
    (exprs, filter_covers)
}

/// `ANY` conjuncts of the predicate that an array key applies exactly; each
/// is covered as `TRUE`.
pub fn covers_for(pred: &Expr, orig_pred: Option<&Expr>, keys: &[Expr], alias: &str) -> FilterCovers {
    let mut out = FilterCovers::new();
    let scope = [alias];
    let sources = std::iter::once(pred).chain(orig_pred);
    for source in sources {
        for term in conjuncts(source) {
            if !matches!(term, Expr::Any { .. }) {
                continue;
            }
            let exact = keys
                .iter()
                .filter(|k| k.is_array_index_key())
                .any(|k| constrain(term, k, &scope).is_some_and(|c| c.exact));
            if exact {
                out.entry(term.to_string())
                    .or_insert_with(|| (term.clone(), Value::TRUE));
            }
        }
    }
    out
}

/// Whether `expr` can be computed from `covers` alone.
///
/// An expression is covered when it is equivalent to a cover, when it does
/// not read from `alias`, or when all of its children are covered.
pub fn is_covered(expr: &Expr, alias: &str, covers: &[Expr]) -> bool {
    if covers.iter().any(|c| c.equivalent_to(expr)) {
        return true;
    }
    if !expr.references(alias) {
        return true;
    }
    match expr {
        Expr::Identifier(_) | Expr::MetaId { .. } | Expr::Constant(_) => false,
        // A binding is scoped to the element, so only the whole expression
        // or its source can cover it.
        Expr::Any { .. } | Expr::ArrayKey { .. } => false,
        _ => {
            let children = expr.children();
            !children.is_empty() && children.into_iter().all(|c| is_covered(c, alias, covers))
        }
    }
}

/// Filter covers as plan JSON.
pub(crate) fn filter_covers_json(covers: &FilterCovers) -> BTreeMap<String, serde_json::Value> {
    covers
        .iter()
        .map(|(k, (_, v))| (k.clone(), v.to_json()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::datastore::IndexDef;
    use crate::expr::IsKind;
    use crate::planner::entry::PushDownProperty;

    fn entry(keys: Vec<Expr>, cond: Option<Expr>) -> IndexEntry {
        IndexEntry {
            index: Arc::new(IndexDef::secondary("ix", "customer", Vec::new())),
            min_keys: 1,
            sum_keys: 1,
            keys,
            partition_keys: Vec::new(),
            cond: cond.clone(),
            orig_cond: cond,
            spans: None,
            exact_spans: false,
            push_down: PushDownProperty::NONE,
        }
    }

    #[test]
    fn keys_cover_paths_built_from_them() {
        let covers = vec![Expr::path("c.name"), Expr::meta_id("c")];
        assert!(is_covered(&Expr::path("c.name"), "c", &covers));
        assert!(is_covered(
            &Expr::path("c.name").equals(Expr::constant("x")),
            "c",
            &covers
        ));
        assert!(is_covered(&Expr::path("o.total"), "c", &covers));
        assert!(!is_covered(&Expr::path("c.age"), "c", &covers));
        assert!(!is_covered(&Expr::ident("c"), "c", &covers));
        assert!(is_covered(&Expr::meta_id("c"), "c", &covers));
    }

    #[test]
    fn partial_condition_contributes_covers() {
        let cond = Expr::path("c.type").equals(Expr::constant("user"));
        let e = entry(vec![Expr::path("c.age")], Some(cond.clone()));
        let (exprs, fc) = index_cover_expressions(&e, &e.keys, None, None, "c");
        assert!(fc.contains_key(&Expr::path("c.type").to_string()));
        assert!(fc.contains_key(&cond.to_string()));
        assert!(is_covered(&Expr::path("c.type"), "c", &exprs));
        assert!(is_covered(&cond, "c", &exprs));
        assert_eq!(filter_covers_json(&fc)[&Expr::path("c.type").to_string()], serde_json::json!("user"));
    }

    #[test]
    fn exact_array_spans_cover_any() {
        let key = Expr::array_key(true, Expr::ident("v"), "v", Expr::path("c.tags"));
        let any = Expr::any("t", Expr::path("c.tags"), Expr::ident("t").equals(Expr::constant("red")));
        let mut e = entry(vec![key], None);
        e.exact_spans = true;
        let (exprs, fc) = index_cover_expressions(&e, &e.keys, Some(&any), None, "c");
        assert_eq!(fc.len(), 1);
        assert!(is_covered(&any, "c", &exprs));

        e.exact_spans = false;
        let (exprs, fc) = index_cover_expressions(&e, &e.keys, Some(&any), None, "c");
        assert!(fc.is_empty());
        assert!(!is_covered(&any, "c", &exprs));
    }

    #[test]
    fn covers_for_ignores_non_any_terms() {
        let key = Expr::array_key(true, Expr::ident("v"), "v", Expr::path("c.tags"));
        let pred = Expr::and(vec![
            Expr::path("c.tags").is(IsKind::NotNull),
            Expr::any("t", Expr::path("c.tags"), Expr::ident("t").equals(Expr::constant(1))),
        ]);
        let out = covers_for(&pred, None, &[key], "c");
        assert_eq!(out.len(), 1);
        assert!(out.values().all(|(e, v)| matches!(e, Expr::Any { .. }) && *v == Value::TRUE));
    }
}
