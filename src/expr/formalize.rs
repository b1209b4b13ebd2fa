//! Maps expressions into a keyspace alias scope.
use crate::error::{PlanError, Result};

use super::Expr;

/// Resolves identifiers of an expression against a keyspace alias.
///
/// Index definitions name fields without the alias (`age`, `meta().id`); in
/// index scope those become `c.age` and `meta(c).id` for alias `c`.
#[derive(Clone, Debug)]
pub struct Formalizer {
    alias: String,
    index_scope: bool,
    bindings: Vec<String>,
}

impl Formalizer {
    /// Formalizer for `alias` outside index scope.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            index_scope: false,
            bindings: Vec::new(),
        }
    }

    /// Adds variables that are already bound around the expression.
    pub fn with_bindings(mut self, bindings: impl IntoIterator<Item = String>) -> Self {
        self.bindings.extend(bindings);
        self
    }

    /// Keyspace alias this formalizer resolves against.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Bare identifiers resolve to fields of the alias while set.
    pub fn set_index_scope(&mut self) {
        self.index_scope = true;
    }

    /// Leaves index scope.
    pub fn clear_index_scope(&mut self) {
        self.index_scope = false;
    }

    /// Returns a formalized copy of `expr`; the input is never modified.
    pub fn map(&self, expr: &Expr) -> Result<Expr> {
        let mut scope = self.bindings.clone();
        self.map_scoped(expr, &mut scope)
    }

    fn map_scoped(&self, expr: &Expr, scope: &mut Vec<String>) -> Result<Expr> {
        Ok(match expr {
            Expr::Constant(_) => expr.clone(),
            Expr::Identifier(name) => {
                if name == &self.alias || scope.iter().any(|b| b == name) {
                    expr.clone()
                } else if self.index_scope {
                    Expr::ident(self.alias.clone()).dot(name.clone())
                } else {
                    return Err(PlanError::formalize(
                        expr,
                        format!("identifier {name} is not in scope of keyspace {}", self.alias),
                    ));
                }
            }
            Expr::MetaId { alias: None } => Expr::meta_id(self.alias.clone()),
            Expr::MetaId { alias: Some(a) } => {
                if a != &self.alias {
                    return Err(PlanError::formalize(
                        expr,
                        format!("meta() refers to {a}, expected {}", self.alias),
                    ));
                }
                expr.clone()
            }
            Expr::Field { base, name } => Expr::Field {
                base: Box::new(self.map_scoped(base, scope)?),
                name: name.clone(),
            },
            Expr::Compare { op, lhs, rhs } => Expr::Compare {
                op: *op,
                lhs: Box::new(self.map_scoped(lhs, scope)?),
                rhs: Box::new(self.map_scoped(rhs, scope)?),
            },
            Expr::Between { expr, low, high } => Expr::Between {
                expr: Box::new(self.map_scoped(expr, scope)?),
                low: Box::new(self.map_scoped(low, scope)?),
                high: Box::new(self.map_scoped(high, scope)?),
            },
            Expr::In { expr, list } => Expr::In {
                expr: Box::new(self.map_scoped(expr, scope)?),
                list: self.map_all(list, scope)?,
            },
            Expr::Like { expr, pattern } => Expr::Like {
                expr: Box::new(self.map_scoped(expr, scope)?),
                pattern: Box::new(self.map_scoped(pattern, scope)?),
            },
            Expr::Is { kind, expr } => Expr::Is {
                kind: *kind,
                expr: Box::new(self.map_scoped(expr, scope)?),
            },
            Expr::And(children) => Expr::And(self.map_all(children, scope)?),
            Expr::Or(children) => Expr::Or(self.map_all(children, scope)?),
            Expr::Not(child) => Expr::Not(Box::new(self.map_scoped(child, scope)?)),
            Expr::Any {
                binding,
                source,
                satisfies,
            } => {
                let source = self.map_scoped(source, scope)?;
                scope.push(binding.clone());
                let satisfies = self.map_scoped(satisfies, scope);
                scope.pop();
                Expr::Any {
                    binding: binding.clone(),
                    source: Box::new(source),
                    satisfies: Box::new(satisfies?),
                }
            }
            Expr::ArrayKey {
                distinct,
                mapping,
                binding,
                source,
            } => {
                let source = self.map_scoped(source, scope)?;
                scope.push(binding.clone());
                let mapping = self.map_scoped(mapping, scope);
                scope.pop();
                Expr::ArrayKey {
                    distinct: *distinct,
                    mapping: Box::new(mapping?),
                    binding: binding.clone(),
                    source: Box::new(source),
                }
            }
            Expr::Function { name, args } => Expr::Function {
                name: *name,
                args: self.map_all(args, scope)?,
            },
        })
    }

    fn map_all(&self, exprs: &[Expr], scope: &mut Vec<String>) -> Result<Vec<Expr>> {
        exprs.iter().map(|e| self.map_scoped(e, scope)).collect()
    }
}
