//! Predicate implication used for partial-index selection and dominance.
use std::cmp::Ordering;
use std::ops::Bound;

use crate::expr::{CompareOp, Expr};

use super::sarg::atom_ranges;
use super::span::RangeMerge;

/// Whether every document satisfying `pred` also satisfies `cond`.
///
/// Both sides are expected in normal form. The check is sound but not
/// complete: `false` only means the implication could not be shown.
pub fn subset_of(pred: &Expr, cond: &Expr) -> bool {
    if pred.equivalent_to(cond) {
        return true;
    }
    if let Expr::Constant(v) = cond {
        if v.truth() {
            return true;
        }
    }
    if let Expr::Constant(v) = pred {
        if !v.is_unknown() && !v.truth() {
            return true;
        }
    }
    if let Expr::Or(disjuncts) = pred {
        return disjuncts.iter().all(|d| subset_of(d, cond));
    }
    match cond {
        Expr::And(required) => return required.iter().all(|r| subset_of(pred, r)),
        Expr::Or(options) => {
            if options.iter().any(|o| subset_of(pred, o)) {
                return true;
            }
        }
        _ => {}
    }
    match pred {
        Expr::And(terms) => terms.iter().any(|t| subset_of(t, cond)),
        _ => atom_implies(pred, cond),
    }
}

fn atom_implies(pred: &Expr, cond: &Expr) -> bool {
    let Some((subject, have)) = atom_ranges(pred) else {
        return false;
    };
    if let Expr::Compare {
        op: CompareOp::Ne,
        lhs,
        rhs,
    } = cond
    {
        let excluded = if lhs.equivalent_to(subject) {
            rhs
        } else if rhs.equivalent_to(subject) {
            lhs
        } else {
            return false;
        };
        let Some(excluded) = excluded.value() else {
            return false;
        };
        // Every admitted value is a point other than the excluded one.
        return have.ranges.iter().all(|r| match &r.low {
            Bound::Included(e) if r.is_point() => {
                e.value().is_some_and(|v| v.collate(excluded) != Ordering::Equal)
            }
            _ => false,
        });
    }
    let Some((cond_subject, want)) = atom_ranges(cond) else {
        return false;
    };
    if !subject.equivalent_to(cond_subject) {
        return false;
    }
    have.ranges.iter().all(|inner| {
        want.ranges
            .iter()
            .any(|outer| inner.intersect(outer) == RangeMerge::Exact(inner.clone()))
    })
}
