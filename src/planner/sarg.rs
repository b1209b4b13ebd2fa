//! Sargability: which leading index keys a predicate constrains, and the
//! spans an index scan must enumerate for them.
use std::ops::Bound;

use smallvec::SmallVec;

use crate::expr::func_token::{like_prefix, LikeShape};
use crate::expr::{CompareOp, Expr, FuncName, IsKind};
use crate::value::Value;

use super::keyspace::Filter;
use super::span::{next_prefix, KeyRange, RangeMerge, SargSpans, Span};

/// Ranges one predicate imposes on one index key.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Constraint {
    pub ranges: Vec<KeyRange>,
    pub exact: bool,
    pub duplicates: bool,
}

impl Constraint {
    fn new(ranges: Vec<KeyRange>, exact: bool) -> Self {
        Self {
            ranges,
            exact,
            duplicates: false,
        }
    }

    fn contradiction() -> Self {
        Self::new(Vec::new(), true)
    }

    fn all_strings(exact: bool) -> Self {
        Self::new(
            vec![KeyRange::new(
                Bound::Included(Expr::constant("")),
                Bound::Excluded(Expr::Constant(Value::Array(Vec::new()))),
            )],
            exact,
        )
    }

    fn with_duplicates(mut self) -> Self {
        self.duplicates = true;
        self
    }

    fn inexact(mut self) -> Self {
        self.exact = false;
        self
    }

    fn intersect(self, other: Constraint) -> Constraint {
        let mut exact = self.exact && other.exact;
        let mut ranges = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                match a.intersect(b) {
                    RangeMerge::Exact(r) => push_unique(&mut ranges, r),
                    RangeMerge::Empty => {}
                    RangeMerge::Inexact(r) => {
                        exact = false;
                        push_unique(&mut ranges, r);
                    }
                }
            }
        }
        Constraint {
            ranges,
            exact,
            duplicates: self.duplicates || other.duplicates,
        }
    }

    fn union(mut self, other: Constraint) -> Constraint {
        for r in other.ranges {
            push_unique(&mut self.ranges, r);
        }
        self.exact &= other.exact;
        self.duplicates |= other.duplicates;
        self
    }

    /// Whether the constraint admits no value.
    pub fn is_contradiction(&self) -> bool {
        self.ranges.iter().all(KeyRange::is_empty)
    }
}

fn push_unique(ranges: &mut Vec<KeyRange>, range: KeyRange) {
    if !ranges.contains(&range) {
        ranges.push(range);
    }
}

/// Top-level conjuncts of a normalized predicate.
pub(crate) fn conjuncts(pred: &Expr) -> Vec<&Expr> {
    match pred {
        Expr::And(children) => children.iter().collect(),
        other => vec![other],
    }
}

// A range bound may not read the key itself or anything bound in `scope`.
fn bound_usable(bound: &Expr, key: &Expr, scope: &[&str]) -> bool {
    !bound.depends_on(key) && scope.iter().all(|name| !bound.references(name))
}

fn compare_constraint(op: CompareOp, bound: &Expr) -> Option<Constraint> {
    if bound.value().is_some_and(Value::is_unknown) {
        return Some(Constraint::contradiction());
    }
    let exact = bound.is_constant();
    let null = || Bound::Excluded(Expr::Constant(Value::Null));
    let range = match op {
        CompareOp::Eq => KeyRange::point(bound.clone()),
        CompareOp::Ne => return None,
        CompareOp::Lt => KeyRange::new(null(), Bound::Excluded(bound.clone())),
        CompareOp::Le => KeyRange::new(null(), Bound::Included(bound.clone())),
        CompareOp::Gt => KeyRange::new(Bound::Excluded(bound.clone()), Bound::Unbounded),
        CompareOp::Ge => KeyRange::new(Bound::Included(bound.clone()), Bound::Unbounded),
    };
    Some(Constraint::new(vec![range], exact))
}

fn like_constraint(pattern: &Expr) -> Constraint {
    match pattern.value() {
        Some(Value::String(p)) => {
            let (prefix, shape) = like_prefix(p);
            if shape == LikeShape::Exact {
                return Constraint::new(vec![KeyRange::point(Expr::constant(prefix))], true);
            }
            let high = next_prefix(&prefix)
                .map(Value::String)
                .unwrap_or_else(|| Value::Array(Vec::new()));
            Constraint::new(
                vec![KeyRange::new(
                    Bound::Included(Expr::constant(prefix)),
                    Bound::Excluded(Expr::Constant(high)),
                )],
                shape == LikeShape::PrefixOnly,
            )
        }
        Some(_) => Constraint::contradiction(),
        None => Constraint::all_strings(false),
    }
}

fn is_constraint(kind: IsKind) -> Option<Constraint> {
    let null = || Expr::Constant(Value::Null);
    let range = match kind {
        IsKind::Null => KeyRange::point(null()),
        IsKind::NotNull | IsKind::Valued => KeyRange::new(Bound::Excluded(null()), Bound::Unbounded),
        IsKind::NotMissing => KeyRange::new(Bound::Included(null()), Bound::Unbounded),
        IsKind::Missing | IsKind::NotValued => return None,
    };
    Some(Constraint::new(vec![range], true))
}

// Token functions are sargable on an array key over `tokens(src)`; the
// tokenizer options may differ, so such spans are never exact.
fn token_constraint(name: FuncName, args: &[Expr], key: &Expr, scope: &[&str]) -> Option<Constraint> {
    let Expr::ArrayKey {
        mapping,
        binding,
        source,
        ..
    } = key
    else {
        return None;
    };
    if !matches!(mapping.as_ref(), Expr::Identifier(m) if m == binding) {
        return None;
    }
    let Expr::Function {
        name: FuncName::Tokens,
        args: token_args,
    } = source.as_ref()
    else {
        return None;
    };
    let (Some(src), Some(wanted), Some(arg)) = (token_args.first(), args.first(), args.get(1)) else {
        return None;
    };
    if !src.equivalent_to(wanted) || !bound_usable(arg, key, scope) {
        return None;
    }
    let constraint = match name {
        FuncName::ContainsToken => match arg.value() {
            Some(v) if v.is_unknown() => Constraint::contradiction(),
            _ => Constraint::new(vec![KeyRange::point(arg.clone())], false),
        },
        FuncName::ContainsTokenLike => like_constraint(arg),
        FuncName::ContainsTokenRegexp => Constraint::all_strings(false),
        _ => return None,
    };
    Some(constraint.inexact().with_duplicates())
}

/// Ranges `expr` imposes on `key`, or `None` when it does not constrain it.
///
/// `scope` lists names a bound must not reference: the keyspace alias and
/// any enclosing `ANY` bindings.
pub(crate) fn constrain(expr: &Expr, key: &Expr, scope: &[&str]) -> Option<Constraint> {
    match expr {
        Expr::Compare { op, lhs, rhs } => {
            let (op, bound) = if lhs.equivalent_to(key) {
                (*op, rhs.as_ref())
            } else if rhs.equivalent_to(key) {
                (op.flip(), lhs.as_ref())
            } else {
                return None;
            };
            if !bound_usable(bound, key, scope) {
                return None;
            }
            compare_constraint(op, bound)
        }
        Expr::Between { expr: e, low, high } => {
            if !e.equivalent_to(key) || !bound_usable(low, key, scope) || !bound_usable(high, key, scope) {
                return None;
            }
            let lo = compare_constraint(CompareOp::Ge, low)?;
            let hi = compare_constraint(CompareOp::Le, high)?;
            Some(lo.intersect(hi))
        }
        Expr::In { expr: e, list } => {
            if !e.equivalent_to(key) || !list.iter().all(|item| bound_usable(item, key, scope)) {
                return None;
            }
            let exact = list.iter().all(Expr::is_constant);
            let mut points: Vec<&Expr> = list
                .iter()
                .filter(|item| !item.value().is_some_and(Value::is_unknown))
                .collect();
            if exact {
                points.sort_by(|a, b| match (a.value(), b.value()) {
                    (Some(x), Some(y)) => x.collate(y),
                    _ => std::cmp::Ordering::Equal,
                });
            }
            let mut ranges = Vec::with_capacity(points.len());
            for point in points {
                push_unique(&mut ranges, KeyRange::point(point.clone()));
            }
            Some(Constraint::new(ranges, exact))
        }
        Expr::Like { expr: e, pattern } => {
            if !e.equivalent_to(key) || !bound_usable(pattern, key, scope) {
                return None;
            }
            Some(like_constraint(pattern))
        }
        Expr::Is { kind, expr: e } => {
            if !e.equivalent_to(key) {
                return None;
            }
            is_constraint(*kind)
        }
        Expr::Function { name, args } if name.is_condition() => token_constraint(*name, args, key, scope),
        Expr::Any {
            binding,
            source,
            satisfies,
        } => {
            let Expr::ArrayKey {
                mapping,
                binding: key_binding,
                source: key_source,
                ..
            } = key
            else {
                return None;
            };
            if !source.equivalent_to(key_source) {
                return None;
            }
            let element_key = mapping.rename_identifier(key_binding, binding);
            let mut inner: Vec<&str> = scope.to_vec();
            inner.push(binding);
            constrain(satisfies, &element_key, &inner).map(Constraint::with_duplicates)
        }
        Expr::And(children) => {
            let mut merged: Option<Constraint> = None;
            let mut complete = true;
            for child in children {
                match constrain(child, key, scope) {
                    Some(c) => {
                        merged = Some(match merged {
                            Some(acc) => acc.intersect(c),
                            None => c,
                        })
                    }
                    None => complete = false,
                }
            }
            merged.map(|c| if complete { c } else { c.inexact() })
        }
        Expr::Or(children) => {
            let mut merged: Option<Constraint> = None;
            for child in children {
                let c = constrain(child, key, scope)?;
                merged = Some(match merged {
                    Some(acc) => acc.union(c),
                    None => c,
                });
            }
            merged
        }
        Expr::Constant(_)
        | Expr::Identifier(_)
        | Expr::Field { .. }
        | Expr::MetaId { .. }
        | Expr::Not(_)
        | Expr::ArrayKey { .. }
        | Expr::Function { .. } => None,
    }
}

/// Ranges a single predicate atom imposes on its subject expression; used for
/// implication checks between predicates.
pub(crate) fn atom_ranges(atom: &Expr) -> Option<(&Expr, Constraint)> {
    let subject = match atom {
        Expr::Compare { lhs, rhs, .. } => {
            if rhs.is_constant() {
                lhs.as_ref()
            } else if lhs.is_constant() {
                rhs.as_ref()
            } else {
                return None;
            }
        }
        Expr::In { expr, list } if list.iter().all(Expr::is_constant) => expr.as_ref(),
        Expr::Like { expr, pattern } if pattern.is_constant() => expr.as_ref(),
        Expr::Is { expr, .. } => expr.as_ref(),
        _ => return None,
    };
    let constraint = constrain(atom, subject, &[])?;
    constraint.exact.then_some((subject, constraint))
}

/// Leading sargable key count and aggregate precision of `pred` over `keys`.
///
/// For a conjunction both numbers are the length of the constrained key
/// prefix. For a disjunction every disjunct must be sargable: the minimum is
/// the smallest prefix and the sum adds up the disjuncts' prefixes.
pub fn sargable_for(pred: &Expr, keys: &[Expr], alias: &str) -> (usize, usize) {
    if let Expr::Or(children) = pred {
        if children.is_empty() {
            return (0, 0);
        }
        let mut min = usize::MAX;
        let mut sum = 0;
        for child in children {
            let (cmin, csum) = sargable_for(child, keys, alias);
            if cmin == 0 {
                return (0, 0);
            }
            min = min.min(cmin);
            sum += csum;
        }
        return (min, sum);
    }
    let terms = conjuncts(pred);
    let scope = [alias];
    let n = keys
        .iter()
        .take_while(|key| terms.iter().any(|t| constrain(t, key, &scope).is_some()))
        .count();
    (n, n)
}

/// Spans for a disjunctive predicate: each disjunct is sarged on its own and
/// the results are merged. A disjunction that spans keyspaces is never exact.
pub fn sarg_for(
    pred: &Expr,
    keys: &[Expr],
    min_keys: usize,
    or_is_join: bool,
    alias: &str,
    max_spans: usize,
) -> (SargSpans, bool) {
    let Expr::Or(children) = pred else {
        return sarg_term(&conjuncts(pred), keys, min_keys, alias, max_spans);
    };
    let mut exact = !or_is_join;
    let mut parts = Vec::with_capacity(children.len());
    for child in children {
        let (spans, child_exact) = sarg_term(&conjuncts(child), keys, min_keys, alias, max_spans);
        exact &= child_exact;
        parts.push(spans);
    }
    if !parts.iter().all(|p| matches!(p, SargSpans::Term(_))) {
        return (SargSpans::Union(parts), exact);
    }
    let mut spans: Vec<Span> = Vec::new();
    for part in parts {
        if let SargSpans::Term(term) = part {
            for span in term {
                if !spans.contains(&span) {
                    spans.push(span);
                }
            }
        }
    }
    if spans.len() > 1 {
        spans.retain(|s| !s.is_empty());
        if spans.is_empty() {
            spans.push(Span::empty());
        }
    }
    (SargSpans::Term(spans), exact)
}

/// Spans for a keyspace's filters. Under a hash join the join filters are
/// applied by the join and are left out of the scan.
pub fn sarg_for_filters(
    filters: &[Filter],
    keys: &[Expr],
    min_keys: usize,
    under_hash: bool,
    alias: &str,
    max_spans: usize,
) -> (SargSpans, bool) {
    let terms: Vec<&Expr> = filters
        .iter()
        .filter(|f| !(under_hash && f.is_join()))
        .flat_map(|f| conjuncts(&f.expr))
        .collect();
    sarg_term(&terms, keys, min_keys, alias, max_spans)
}

struct Alternative {
    constraint: Constraint,
    consumes: Vec<usize>,
}

fn merge_alternatives(found: Vec<(usize, Constraint)>) -> Alternative {
    let mut indexes = Vec::with_capacity(found.len());
    let mut merged: Option<Constraint> = None;
    for (i, c) in found {
        indexes.push(i);
        merged = Some(match merged {
            Some(acc) => acc.intersect(c),
            None => c,
        });
    }
    let constraint = merged.unwrap_or_else(|| Constraint::new(Vec::new(), false));
    let consumes = if constraint.exact { indexes } else { Vec::new() };
    Alternative { constraint, consumes }
}

fn sarg_term(
    terms: &[&Expr],
    keys: &[Expr],
    min_keys: usize,
    alias: &str,
    max_spans: usize,
) -> (SargSpans, bool) {
    let scope = [alias];
    let keys = &keys[..min_keys.min(keys.len())];
    let mut per_key: Vec<Vec<Alternative>> = Vec::with_capacity(keys.len());
    for key in keys {
        let found: Vec<(usize, Constraint)> = terms
            .iter()
            .enumerate()
            .filter_map(|(i, t)| constrain(t, key, &scope).map(|c| (i, c)))
            .collect();
        if found.is_empty() {
            break;
        }
        // Separate ANY predicates on one array key hold for possibly different
        // elements, so they intersect scans instead of ranges.
        let alternatives = if key.is_array_index_key() && found.len() > 1 {
            found
                .into_iter()
                .map(|(i, c)| Alternative {
                    consumes: if c.exact { vec![i] } else { Vec::new() },
                    constraint: c,
                })
                .collect()
        } else {
            vec![merge_alternatives(found)]
        };
        per_key.push(alternatives);
    }
    if per_key.is_empty() {
        return (SargSpans::Term(Vec::new()), false);
    }
    if per_key
        .iter()
        .flatten()
        .any(|alt| alt.constraint.is_contradiction())
    {
        return (SargSpans::Term(vec![Span::empty()]), true);
    }

    let branch_key = per_key.iter().position(|alts| alts.len() > 1);
    let branches = branch_key.map_or(1, |pos| per_key[pos].len());
    let mut exact = true;
    let mut consumed = vec![false; terms.len()];
    let mut results = Vec::with_capacity(branches);
    for branch in 0..branches {
        let chosen: Vec<&Alternative> = per_key
            .iter()
            .enumerate()
            .map(|(pos, alts)| if Some(pos) == branch_key { &alts[branch] } else { &alts[0] })
            .collect();
        let constraints: Vec<&Constraint> = chosen.iter().map(|alt| &alt.constraint).collect();
        let (spans, used, composed_exact) = compose(&constraints, max_spans);
        exact &= composed_exact;
        for alt in &chosen[..used] {
            for &i in &alt.consumes {
                consumed[i] = true;
            }
        }
        results.push(SargSpans::Term(spans));
    }
    exact &= consumed.iter().all(|c| *c);
    if results.len() == 1 {
        let spans = results.pop().unwrap_or_else(|| SargSpans::Term(Vec::new()));
        (spans, exact)
    } else {
        (SargSpans::Intersect(results), exact)
    }
}

// Cross product of per-key ranges, stopping after the first key that is not a
// point and before exceeding `max_spans`.
fn compose(constraints: &[&Constraint], max_spans: usize) -> (Vec<Span>, usize, bool) {
    let mut spans = vec![Span::new(SmallVec::new())];
    let mut used = 0;
    let mut exact = true;
    for (pos, c) in constraints.iter().enumerate() {
        if pos > 0 && spans.len().saturating_mul(c.ranges.len()) > max_spans {
            exact = false;
            break;
        }
        let mut next = Vec::with_capacity(spans.len() * c.ranges.len());
        for span in &spans {
            for range in &c.ranges {
                let mut s = span.clone();
                s.ranges.push(range.clone());
                s.duplicates |= c.duplicates;
                next.push(s);
            }
        }
        spans = next;
        used = pos + 1;
        if !c.ranges.iter().all(KeyRange::is_point) {
            break;
        }
    }
    (spans, used, exact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Expr {
        Expr::path(&format!("c.{name}"))
    }

    fn keys(names: &[&str]) -> Vec<Expr> {
        names.iter().map(|n| field(n)).collect()
    }

    #[test]
    fn leading_prefix_stops_at_first_gap() {
        let pred = Expr::and(vec![
            field("a").equals(Expr::constant(1)),
            field("c").equals(Expr::constant(3)),
        ]);
        assert_eq!(sargable_for(&pred, &keys(&["a", "b", "c"]), "c"), (1, 1));
        assert_eq!(sargable_for(&pred, &keys(&["b", "a"]), "c"), (0, 0));
    }

    #[test]
    fn disjunction_needs_every_branch() {
        let pred = Expr::or(vec![
            field("a").equals(Expr::constant(1)),
            Expr::and(vec![
                field("a").equals(Expr::constant(2)),
                field("b").greater_than(Expr::constant(0)),
            ]),
        ]);
        assert_eq!(sargable_for(&pred, &keys(&["a", "b"]), "c"), (1, 3));
        let partial = Expr::or(vec![
            field("a").equals(Expr::constant(1)),
            field("b").equals(Expr::constant(2)),
        ]);
        assert_eq!(sargable_for(&partial, &keys(&["a"]), "c"), (0, 0));
    }

    #[test]
    fn equality_prefix_composes_with_range() {
        let pred = Expr::and(vec![
            field("a").in_list(vec![Expr::constant(2), Expr::constant(1)]),
            field("b").greater_than(Expr::constant(10)),
        ]);
        let (spans, exact) = sarg_term(&conjuncts(&pred), &keys(&["a", "b"]), 2, "c", 100);
        assert!(exact);
        assert_eq!(spans.size(), 2);
        let SargSpans::Term(list) = &spans else {
            panic!("expected term spans");
        };
        assert_eq!(list[0].ranges[0], KeyRange::point(Expr::constant(1)));
        assert_eq!(list[1].ranges.len(), 2);
    }

    #[test]
    fn range_on_first_key_stops_composition() {
        let pred = Expr::and(vec![
            field("a").greater_than(Expr::constant(1)),
            field("b").equals(Expr::constant(2)),
        ]);
        let (spans, exact) = sarg_term(&conjuncts(&pred), &keys(&["a", "b"]), 2, "c", 100);
        assert!(!exact);
        let SargSpans::Term(list) = spans else {
            panic!("expected term spans");
        };
        assert_eq!(list[0].ranges.len(), 1);
    }

    #[test]
    fn contradiction_yields_single_empty_span() {
        let pred = Expr::and(vec![
            field("a").equals(Expr::constant(1)),
            field("a").equals(Expr::constant(2)),
        ]);
        let (spans, exact) = sarg_term(&conjuncts(&pred), &keys(&["a"]), 1, "c", 100);
        assert!(exact);
        assert_eq!(spans.size(), 1);
        assert!(spans.is_empty_scan());
    }

    #[test]
    fn span_cap_truncates_composition() {
        let list: Vec<Expr> = (0..10).map(Expr::constant).collect();
        let pred = Expr::and(vec![
            field("a").in_list(list.clone()),
            field("b").in_list(list),
        ]);
        let (spans, exact) = sarg_term(&conjuncts(&pred), &keys(&["a", "b"]), 2, "c", 50);
        assert_eq!(spans.size(), 10);
        assert!(!exact);
    }

    #[test]
    fn like_and_is_ranges() {
        let like = constrain(&field("n").like(Expr::constant("ab%")), &field("n"), &["c"]).unwrap();
        assert!(like.exact);
        assert_eq!(
            like.ranges[0],
            KeyRange::new(Bound::Included(Expr::constant("ab")), Bound::Excluded(Expr::constant("ac")))
        );
        let complex = constrain(&field("n").like(Expr::constant("a_b")), &field("n"), &["c"]).unwrap();
        assert!(!complex.exact);
        let not_null = constrain(&field("n").is(IsKind::NotNull), &field("n"), &["c"]).unwrap();
        assert_eq!(
            not_null.ranges[0],
            KeyRange::new(Bound::Excluded(Expr::Constant(Value::Null)), Bound::Unbounded)
        );
        assert!(constrain(&field("n").is(IsKind::Missing), &field("n"), &["c"]).is_none());
        assert!(constrain(&field("n").not_equals(Expr::constant(1)), &field("n"), &["c"]).is_none());
    }

    #[test]
    fn correlated_bounds_are_inexact() {
        let key = Expr::meta_id("c");
        let join = key.clone().equals(Expr::path("o.cid"));
        let c = constrain(&join, &key, &["c"]).unwrap();
        assert!(!c.exact);
        let self_ref = field("a").equals(field("b"));
        assert!(constrain(&self_ref, &field("a"), &["c"]).is_none());
    }

    #[test]
    fn any_matches_array_key() {
        let key = Expr::array_key(true, Expr::ident("v"), "v", field("tags"));
        let pred = Expr::any("t", field("tags"), Expr::ident("t").equals(Expr::constant("x")));
        let c = constrain(&pred, &key, &["c"]).unwrap();
        assert!(c.exact);
        assert!(c.duplicates);
        assert_eq!(c.ranges, vec![KeyRange::point(Expr::constant("x"))]);

        let two = Expr::and(vec![
            pred.clone(),
            Expr::any("t", field("tags"), Expr::ident("t").equals(Expr::constant("y"))),
        ]);
        let (spans, exact) = sarg_term(&conjuncts(&two), &[key], 1, "c", 100);
        assert!(exact);
        assert!(matches!(spans, SargSpans::Intersect(ref parts) if parts.len() == 2));
    }

    #[test]
    fn token_functions_use_token_array_keys() {
        let src = field("title");
        let key = Expr::array_key(
            true,
            Expr::ident("t"),
            "t",
            Expr::call(FuncName::Tokens, vec![src.clone()]),
        );
        let pred = Expr::call(FuncName::ContainsToken, vec![src, Expr::constant("rust")]);
        let c = constrain(&pred, &key, &["c"]).unwrap();
        assert!(!c.exact);
        assert_eq!(c.ranges, vec![KeyRange::point(Expr::constant("rust"))]);
    }

    #[test]
    fn or_path_merges_terms() {
        let pred = Expr::or(vec![
            field("a").equals(Expr::constant(1)),
            field("a").equals(Expr::constant(5)),
        ]);
        let (spans, exact) = sarg_for(&pred, &keys(&["a"]), 1, false, "c", 100);
        assert!(exact);
        assert_eq!(spans.size(), 2);
        let (_, join_exact) = sarg_for(&pred, &keys(&["a"]), 1, true, "c", 100);
        assert!(!join_exact);
    }
}
