//! Disjunctive normal form.
//!
//! `Dnf::normalize` rewrites a predicate into an OR of ANDs: `BETWEEN` becomes
//! a pair of range comparisons, `NOT` is pushed down to the atoms, nested
//! connectives are flattened and AND is distributed over OR. Children are
//! de-duplicated and ordered by their string form so equal predicates
//! normalize to identical trees. Truthiness is preserved under the
//! four-valued logic used by evaluation.
use std::cmp::Ordering;

use crate::config::DEFAULT_MAX_DNF_TERMS;
use crate::expr::{CompareOp, Expr};
use crate::value::{AnnotatedValue, Value};

// Upper bound on distribute/simplify rounds.
const MAX_PASSES: usize = 16;

/// DNF normalizer.
#[derive(Clone, Copy, Debug)]
pub struct Dnf {
    max_terms: usize,
}

impl Default for Dnf {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DNF_TERMS)
    }
}

impl Dnf {
    /// Normalizer that distributes only while the result has at most
    /// `max_terms` disjuncts per conjunction.
    pub fn new(max_terms: usize) -> Self {
        Self {
            max_terms: max_terms.max(1),
        }
    }

    /// Normalizes a copy of `expr`; the input is never modified.
    pub fn normalize(&self, expr: &Expr) -> Expr {
        let mut current = simplify(expr);
        for _ in 0..MAX_PASSES {
            let next = simplify(&self.distribute(current.clone()));
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn distribute(&self, expr: Expr) -> Expr {
        match expr {
            Expr::Or(children) => Expr::Or(children.into_iter().map(|c| self.distribute(c)).collect()),
            Expr::And(children) => {
                let children: Vec<Expr> = children.into_iter().map(|c| self.distribute(c)).collect();
                let product = children.iter().try_fold(1usize, |acc, c| match c {
                    Expr::Or(terms) => acc.checked_mul(terms.len()),
                    _ => Some(acc),
                });
                match product {
                    Some(n) if n > 1 && n <= self.max_terms => Expr::Or(cross_product(&children)),
                    _ => Expr::And(children),
                }
            }
            other => other,
        }
    }
}

fn cross_product(children: &[Expr]) -> Vec<Expr> {
    let mut terms: Vec<Vec<Expr>> = vec![Vec::new()];
    for child in children {
        let options: &[Expr] = match child {
            Expr::Or(terms) => terms,
            single => std::slice::from_ref(single),
        };
        let mut next = Vec::with_capacity(terms.len() * options.len());
        for term in &terms {
            for option in options {
                let mut extended = term.clone();
                extended.push(option.clone());
                next.push(extended);
            }
        }
        terms = next;
    }
    terms.into_iter().map(Expr::And).collect()
}

// Value of an expression with no free references, if it has none.
fn fold(expr: Expr) -> Expr {
    if expr.children().iter().all(|c| c.is_constant()) {
        Expr::Constant(expr.evaluate(&AnnotatedValue::from(Value::Missing)))
    } else {
        expr
    }
}

fn by_string(a: &Expr, b: &Expr) -> Ordering {
    a.to_string().cmp(&b.to_string())
}

/// One bottom-up simplification pass. Idempotent.
pub(crate) fn simplify(expr: &Expr) -> Expr {
    match expr {
        Expr::Constant(_) | Expr::Identifier(_) | Expr::MetaId { .. } => expr.clone(),
        Expr::Field { base, name } => fold(Expr::Field {
            base: Box::new(simplify(base)),
            name: name.clone(),
        }),
        Expr::Between { expr: e, low, high } => simplify(&Expr::And(vec![
            e.as_ref().clone().at_least(low.as_ref().clone()),
            e.as_ref().clone().at_most(high.as_ref().clone()),
        ])),
        Expr::Compare { op, lhs, rhs } => {
            let lhs = simplify(lhs);
            let rhs = simplify(rhs);
            compare(*op, lhs, rhs)
        }
        Expr::In { expr: e, list } => {
            let mut list: Vec<Expr> = list.iter().map(simplify).collect();
            if list.iter().all(Expr::is_constant) {
                list.sort_by(|a, b| match (a.value(), b.value()) {
                    (Some(x), Some(y)) => x.collate(y),
                    _ => Ordering::Equal,
                });
                list.dedup();
            }
            fold(Expr::In {
                expr: Box::new(simplify(e)),
                list,
            })
        }
        Expr::Like { expr: e, pattern } => fold(Expr::Like {
            expr: Box::new(simplify(e)),
            pattern: Box::new(simplify(pattern)),
        }),
        Expr::Is { kind, expr: e } => fold(Expr::Is {
            kind: *kind,
            expr: Box::new(simplify(e)),
        }),
        Expr::Not(child) => negate(simplify(child)),
        Expr::And(children) => conjoin(children.iter().map(simplify).collect()),
        Expr::Or(children) => disjoin(children.iter().map(simplify).collect()),
        Expr::Any {
            binding,
            source,
            satisfies,
        } => Expr::Any {
            binding: binding.clone(),
            source: Box::new(simplify(source)),
            satisfies: Box::new(simplify(satisfies)),
        },
        Expr::ArrayKey {
            distinct,
            mapping,
            binding,
            source,
        } => Expr::ArrayKey {
            distinct: *distinct,
            mapping: Box::new(simplify(mapping)),
            binding: binding.clone(),
            source: Box::new(simplify(source)),
        },
        Expr::Function { name, args } => fold(Expr::Function {
            name: *name,
            args: args.iter().map(simplify).collect(),
        }),
    }
}

// Constants go to the right; symmetric operators order their operands.
fn compare(op: CompareOp, lhs: Expr, rhs: Expr) -> Expr {
    match (lhs.is_constant(), rhs.is_constant()) {
        (true, true) => fold(lhs.compare(op, rhs)),
        (true, false) => rhs.compare(op.flip(), lhs),
        (false, true) => lhs.compare(op, rhs),
        (false, false) => {
            if matches!(op, CompareOp::Eq | CompareOp::Ne) && by_string(&lhs, &rhs) == Ordering::Greater {
                rhs.compare(op, lhs)
            } else {
                lhs.compare(op, rhs)
            }
        }
    }
}

// `NOT` of an already simplified expression.
fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Not(inner) => *inner,
        Expr::Constant(v) => fold(Expr::Not(Box::new(Expr::Constant(v)))),
        Expr::Compare { op, lhs, rhs } => Expr::Compare {
            op: op.negate(),
            lhs,
            rhs,
        },
        Expr::Is { kind, expr } => Expr::Is {
            kind: kind.negate(),
            expr,
        },
        Expr::And(children) => disjoin(children.into_iter().map(negate).collect()),
        Expr::Or(children) => conjoin(children.into_iter().map(negate).collect()),
        other => Expr::Not(Box::new(other)),
    }
}

enum Absorb {
    Keep,
    Drop,
    Decide,
}

fn connective(children: Vec<Expr>, is_and: bool) -> Expr {
    let mut flat: Vec<Expr> = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Expr::And(inner) if is_and => flat.extend(inner),
            Expr::Or(inner) if !is_and => flat.extend(inner),
            other => flat.push(other),
        }
    }
    let mut kept = Vec::with_capacity(flat.len());
    for child in flat {
        let action = match child.value() {
            Some(v) if v.is_unknown() => Absorb::Keep,
            Some(v) if v.truth() == is_and => Absorb::Drop,
            Some(_) => Absorb::Decide,
            None => Absorb::Keep,
        };
        match action {
            Absorb::Keep => kept.push(child),
            Absorb::Drop => {}
            Absorb::Decide => return Expr::Constant(Value::Bool(!is_and)),
        }
    }
    kept.sort_by(by_string);
    kept.dedup_by(|a, b| a.to_string() == b.to_string());
    match kept.len() {
        0 => Expr::Constant(Value::Bool(is_and)),
        1 => kept.pop().unwrap_or(Expr::Constant(Value::Bool(is_and))),
        _ if is_and => Expr::And(kept),
        _ => Expr::Or(kept),
    }
}

fn conjoin(children: Vec<Expr>) -> Expr {
    connective(children, true)
}

fn disjoin(children: Vec<Expr>) -> Expr {
    connective(children, false)
}
