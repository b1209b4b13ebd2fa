//! Expression tree consumed by the planner and evaluated by execution operators.
//!
//! `Expr` is a closed sum type; every consumer matches exhaustively, so adding
//! a node kind forces each pass (normalization, sargability, formalization,
//! evaluation, rendering) to handle it.
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

mod eval;
pub mod formalize;
pub mod func_token;

pub use formalize::Formalizer;

/// Filter covers keyed by the string form of the covered expression.
pub type CoverMap = FxHashMap<String, (Expr, Value)>;

/// Binary comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Operator text.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Logical complement (`NOT (a < b)` is `a >= b`).
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
        }
    }

    /// Operator with swapped operands (`a < b` is `b > a`).
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
        }
    }
}

/// `IS` tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsKind {
    /// `IS NULL`
    Null,
    /// `IS NOT NULL`
    NotNull,
    /// `IS MISSING`
    Missing,
    /// `IS NOT MISSING`
    NotMissing,
    /// `IS VALUED`
    Valued,
    /// `IS NOT VALUED`
    NotValued,
}

impl IsKind {
    /// Logical complement.
    pub fn negate(self) -> Self {
        match self {
            IsKind::Null => IsKind::NotNull,
            IsKind::NotNull => IsKind::Null,
            IsKind::Missing => IsKind::NotMissing,
            IsKind::NotMissing => IsKind::Missing,
            IsKind::Valued => IsKind::NotValued,
            IsKind::NotValued => IsKind::Valued,
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            IsKind::Null => "is null",
            IsKind::NotNull => "is not null",
            IsKind::Missing => "is missing",
            IsKind::NotMissing => "is not missing",
            IsKind::Valued => "is valued",
            IsKind::NotValued => "is not valued",
        }
    }
}

/// Built-in functions understood by the planner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuncName {
    /// `lower(s)`
    Lower,
    /// `upper(s)`
    Upper,
    /// `tokens(v[, options])`
    Tokens,
    /// `contains_token(src, token[, options])`
    ContainsToken,
    /// `contains_token_like(src, pattern[, options])`
    ContainsTokenLike,
    /// `contains_token_regexp(src, regexp[, options])`
    ContainsTokenRegexp,
}

impl FuncName {
    /// Function name as written in queries.
    pub fn name(self) -> &'static str {
        match self {
            FuncName::Lower => "lower",
            FuncName::Upper => "upper",
            FuncName::Tokens => "tokens",
            FuncName::ContainsToken => "contains_token",
            FuncName::ContainsTokenLike => "contains_token_like",
            FuncName::ContainsTokenRegexp => "contains_token_regexp",
        }
    }

    /// Whether the function returns a boolean condition.
    pub fn is_condition(self) -> bool {
        matches!(
            self,
            FuncName::ContainsToken | FuncName::ContainsTokenLike | FuncName::ContainsTokenRegexp
        )
    }
}

/// Expression node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Literal value.
    Constant(Value),
    /// Bare identifier: a keyspace alias or a bound variable.
    Identifier(String),
    /// `base.name`
    Field { base: Box<Expr>, name: String },
    /// `meta(alias).id`; the alias is filled in by formalization.
    MetaId { alias: Option<String> },
    /// Binary comparison.
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `expr BETWEEN low AND high`
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    /// `expr IN [list]`
    In { expr: Box<Expr>, list: Vec<Expr> },
    /// `expr LIKE pattern`
    Like { expr: Box<Expr>, pattern: Box<Expr> },
    /// `expr IS ...`
    Is { kind: IsKind, expr: Box<Expr> },
    /// Conjunction.
    And(Vec<Expr>),
    /// Disjunction.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// `ANY binding IN source SATISFIES satisfies END`
    Any {
        binding: String,
        source: Box<Expr>,
        satisfies: Box<Expr>,
    },
    /// Array index key `[DISTINCT|ALL] ARRAY mapping FOR binding IN source END`.
    ArrayKey {
        distinct: bool,
        mapping: Box<Expr>,
        binding: String,
        source: Box<Expr>,
    },
    /// Built-in function call.
    Function { name: FuncName, args: Vec<Expr> },
}

impl Expr {
    /// Literal constant.
    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Constant(value.into())
    }

    /// Bare identifier.
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Identifier(name.into())
    }

    /// Dotted path such as `c.address.city`.
    pub fn path(path: &str) -> Self {
        let mut parts = path.split('.');
        let mut expr = Expr::ident(parts.next().unwrap_or_default());
        for part in parts {
            expr = expr.dot(part);
        }
        expr
    }

    /// Field access on this expression.
    pub fn dot(self, name: impl Into<String>) -> Self {
        Expr::Field {
            base: Box::new(self),
            name: name.into(),
        }
    }

    /// `meta(alias).id`
    pub fn meta_id(alias: impl Into<String>) -> Self {
        Expr::MetaId {
            alias: Some(alias.into()),
        }
    }

    /// Comparison with `self` on the left.
    pub fn compare(self, op: CompareOp, rhs: Expr) -> Self {
        Expr::Compare {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs),
        }
    }

    /// `self = rhs`
    pub fn equals(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Eq, rhs)
    }

    /// `self != rhs`
    pub fn not_equals(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Ne, rhs)
    }

    /// `self < rhs`
    pub fn less_than(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Lt, rhs)
    }

    /// `self <= rhs`
    pub fn at_most(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Le, rhs)
    }

    /// `self > rhs`
    pub fn greater_than(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Gt, rhs)
    }

    /// `self >= rhs`
    pub fn at_least(self, rhs: Expr) -> Self {
        self.compare(CompareOp::Ge, rhs)
    }

    /// `self BETWEEN low AND high`
    pub fn between(self, low: Expr, high: Expr) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    /// `self IN list`
    pub fn in_list(self, list: Vec<Expr>) -> Self {
        Expr::In {
            expr: Box::new(self),
            list,
        }
    }

    /// `self LIKE pattern`
    pub fn like(self, pattern: Expr) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern),
        }
    }

    /// `self IS <kind>`
    pub fn is(self, kind: IsKind) -> Self {
        Expr::Is {
            kind,
            expr: Box::new(self),
        }
    }

    /// Conjunction of `children`.
    pub fn and(children: Vec<Expr>) -> Self {
        Expr::And(children)
    }

    /// Disjunction of `children`.
    pub fn or(children: Vec<Expr>) -> Self {
        Expr::Or(children)
    }

    /// Negation of `child`.
    #[allow(clippy::should_implement_trait)]
    pub fn not(child: Expr) -> Self {
        Expr::Not(Box::new(child))
    }

    /// `ANY binding IN source SATISFIES satisfies END`
    pub fn any(binding: impl Into<String>, source: Expr, satisfies: Expr) -> Self {
        Expr::Any {
            binding: binding.into(),
            source: Box::new(source),
            satisfies: Box::new(satisfies),
        }
    }

    /// `DISTINCT ARRAY mapping FOR binding IN source END`
    pub fn array_key(distinct: bool, mapping: Expr, binding: impl Into<String>, source: Expr) -> Self {
        Expr::ArrayKey {
            distinct,
            mapping: Box::new(mapping),
            binding: binding.into(),
            source: Box::new(source),
        }
    }

    /// Function call.
    pub fn call(name: FuncName, args: Vec<Expr>) -> Self {
        Expr::Function { name, args }
    }

    /// Literal payload, if this is a constant.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Expr::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this node is a literal.
    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Constant(_))
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant(_) | Expr::Identifier(_) | Expr::MetaId { .. } => Vec::new(),
            Expr::Field { base, .. } => vec![base.as_ref()],
            Expr::Compare { lhs, rhs, .. } => vec![lhs.as_ref(), rhs.as_ref()],
            Expr::Between { expr, low, high } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
            Expr::In { expr, list } => {
                let mut out = Vec::with_capacity(list.len() + 1);
                out.push(expr.as_ref());
                out.extend(list.iter());
                out
            }
            Expr::Like { expr, pattern } => vec![expr.as_ref(), pattern.as_ref()],
            Expr::Is { expr, .. } => vec![expr.as_ref()],
            Expr::And(children) | Expr::Or(children) => children.iter().collect(),
            Expr::Not(child) => vec![child.as_ref()],
            Expr::Any {
                source, satisfies, ..
            } => vec![source.as_ref(), satisfies.as_ref()],
            Expr::ArrayKey {
                mapping, source, ..
            } => vec![mapping.as_ref(), source.as_ref()],
            Expr::Function { args, .. } => args.iter().collect(),
        }
    }

    /// Structural equivalence; `=` and `!=` are treated as symmetric.
    pub fn equivalent_to(&self, other: &Expr) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (
                Expr::Compare { op, lhs, rhs },
                Expr::Compare {
                    op: other_op,
                    lhs: other_lhs,
                    rhs: other_rhs,
                },
            ) if op == other_op && matches!(op, CompareOp::Eq | CompareOp::Ne) => {
                lhs.equivalent_to(other_rhs) && rhs.equivalent_to(other_lhs)
            }
            _ => false,
        }
    }

    /// True when `other` is this expression or a sub-expression of it.
    pub fn depends_on(&self, other: &Expr) -> bool {
        self.equivalent_to(other) || self.children().into_iter().any(|c| c.depends_on(other))
    }

    /// True when the expression reads anything from keyspace `alias`.
    pub fn references(&self, alias: &str) -> bool {
        match self {
            Expr::Identifier(name) => name == alias,
            Expr::MetaId { alias: Some(a) } => a == alias,
            Expr::Any {
                binding, source, satisfies,
            } => source.references(alias) || (binding != alias && satisfies.references(alias)),
            Expr::ArrayKey {
                binding, mapping, source, ..
            } => source.references(alias) || (binding != alias && mapping.references(alias)),
            _ => self.children().into_iter().any(|c| c.references(alias)),
        }
    }

    /// Whether this is an array index key.
    pub fn is_array_index_key(&self) -> bool {
        matches!(self, Expr::ArrayKey { .. })
    }

    /// Adds the covers implied when this expression is known to be true.
    ///
    /// A condition covers itself as `TRUE`; `x = constant` additionally covers
    /// `x` with the constant.
    pub fn filter_covers(&self, covers: &mut CoverMap) {
        match self {
            Expr::And(children) => {
                for child in children {
                    child.filter_covers(covers);
                }
            }
            Expr::Compare { op, lhs, rhs } => {
                if *op == CompareOp::Eq {
                    if let Some(v) = rhs.value() {
                        if !lhs.is_constant() {
                            covers.insert(lhs.to_string(), (lhs.as_ref().clone(), v.clone()));
                        }
                    } else if let Some(v) = lhs.value() {
                        covers.insert(rhs.to_string(), (rhs.as_ref().clone(), v.clone()));
                    }
                }
                self.cover_self(covers);
            }
            Expr::Between { .. }
            | Expr::In { .. }
            | Expr::Like { .. }
            | Expr::Is { .. }
            | Expr::Or(_)
            | Expr::Not(_)
            | Expr::Any { .. } => self.cover_self(covers),
            Expr::Function { name, .. } if name.is_condition() => self.cover_self(covers),
            Expr::Function { .. }
            | Expr::Constant(_)
            | Expr::Identifier(_)
            | Expr::Field { .. }
            | Expr::MetaId { .. }
            | Expr::ArrayKey { .. } => {}
        }
    }

    fn cover_self(&self, covers: &mut CoverMap) {
        covers.insert(self.to_string(), (self.clone(), Value::TRUE));
    }

    /// Replaces free occurrences of identifier `from` with `to`.
    pub fn rename_identifier(&self, from: &str, to: &str) -> Expr {
        match self {
            Expr::Identifier(name) if name == from => Expr::Identifier(to.to_owned()),
            Expr::Constant(_) | Expr::Identifier(_) | Expr::MetaId { .. } => self.clone(),
            Expr::Field { base, name } => Expr::Field {
                base: Box::new(base.rename_identifier(from, to)),
                name: name.clone(),
            },
            Expr::Compare { op, lhs, rhs } => Expr::Compare {
                op: *op,
                lhs: Box::new(lhs.rename_identifier(from, to)),
                rhs: Box::new(rhs.rename_identifier(from, to)),
            },
            Expr::Between { expr, low, high } => Expr::Between {
                expr: Box::new(expr.rename_identifier(from, to)),
                low: Box::new(low.rename_identifier(from, to)),
                high: Box::new(high.rename_identifier(from, to)),
            },
            Expr::In { expr, list } => Expr::In {
                expr: Box::new(expr.rename_identifier(from, to)),
                list: list.iter().map(|e| e.rename_identifier(from, to)).collect(),
            },
            Expr::Like { expr, pattern } => Expr::Like {
                expr: Box::new(expr.rename_identifier(from, to)),
                pattern: Box::new(pattern.rename_identifier(from, to)),
            },
            Expr::Is { kind, expr } => Expr::Is {
                kind: *kind,
                expr: Box::new(expr.rename_identifier(from, to)),
            },
            Expr::And(children) => {
                Expr::And(children.iter().map(|e| e.rename_identifier(from, to)).collect())
            }
            Expr::Or(children) => {
                Expr::Or(children.iter().map(|e| e.rename_identifier(from, to)).collect())
            }
            Expr::Not(child) => Expr::Not(Box::new(child.rename_identifier(from, to))),
            Expr::Any {
                binding,
                source,
                satisfies,
            } => Expr::Any {
                binding: binding.clone(),
                source: Box::new(source.rename_identifier(from, to)),
                satisfies: if binding == from {
                    satisfies.clone()
                } else {
                    Box::new(satisfies.rename_identifier(from, to))
                },
            },
            Expr::ArrayKey {
                distinct,
                mapping,
                binding,
                source,
            } => Expr::ArrayKey {
                distinct: *distinct,
                mapping: if binding == from {
                    mapping.clone()
                } else {
                    Box::new(mapping.rename_identifier(from, to))
                },
                binding: binding.clone(),
                source: Box::new(source.rename_identifier(from, to)),
            },
            Expr::Function { name, args } => Expr::Function {
                name: *name,
                args: args.iter().map(|e| e.rename_identifier(from, to)).collect(),
            },
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Constant(value)
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write!(f, "{v}"),
            Expr::Identifier(name) => write!(f, "`{name}`"),
            Expr::Field { base, name } => write!(f, "({base}.`{name}`)"),
            Expr::MetaId { alias: Some(a) } => write!(f, "(meta(`{a}`).`id`)"),
            Expr::MetaId { alias: None } => f.write_str("(meta().`id`)"),
            Expr::Compare { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Between { expr, low, high } => write!(f, "({expr} between {low} and {high})"),
            Expr::In { expr, list } => {
                write!(f, "({expr} in [")?;
                write_joined(f, list, ", ")?;
                f.write_str("])")
            }
            Expr::Like { expr, pattern } => write!(f, "({expr} like {pattern})"),
            Expr::Is { kind, expr } => write!(f, "({expr} {})", kind.keyword()),
            Expr::And(children) => {
                f.write_str("(")?;
                write_joined(f, children, " and ")?;
                f.write_str(")")
            }
            Expr::Or(children) => {
                f.write_str("(")?;
                write_joined(f, children, " or ")?;
                f.write_str(")")
            }
            Expr::Not(child) => write!(f, "(not {child})"),
            Expr::Any {
                binding,
                source,
                satisfies,
            } => write!(f, "any `{binding}` in {source} satisfies {satisfies} end"),
            Expr::ArrayKey {
                distinct,
                mapping,
                binding,
                source,
            } => write!(
                f,
                "({} array {mapping} for `{binding}` in {source} end)",
                if *distinct { "distinct" } else { "all" }
            ),
            Expr::Function { name, args } => {
                write!(f, "{}(", name.name())?;
                write_joined(f, args, ", ")?;
                f.write_str(")")
            }
        }
    }
}
