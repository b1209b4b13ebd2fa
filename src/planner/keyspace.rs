//! Per-keyspace planning inputs: filters, normalized predicates and the
//! keyspace term being planned.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;

use super::dnf::Dnf;

/// One WHERE/ON conjunct attached to a keyspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// The conjunct, formalized against its keyspaces.
    pub expr: Expr,
    /// Every alias the conjunct references.
    #[serde(default)]
    pub keyspaces: BTreeSet<String>,
}

impl Filter {
    /// Filter over the given aliases.
    pub fn new<'a>(expr: Expr, keyspaces: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            expr,
            keyspaces: keyspaces.into_iter().map(str::to_owned).collect(),
        }
    }

    /// Whether the filter correlates more than one keyspace.
    pub fn is_join(&self) -> bool {
        self.keyspaces.len() > 1
    }
}

/// Filters of one keyspace alias and their combined normal form.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseKeyspace {
    /// Alias the filters apply to.
    pub name: String,
    /// Normalized filters.
    pub filters: Vec<Filter>,
    /// Normalized conjunction of all filters.
    pub dnf_pred: Option<Expr>,
    /// Conjunction of the filters as written.
    pub orig_pred: Option<Expr>,
}

impl BaseKeyspace {
    /// Normalizes `filters` and combines them.
    pub fn new(name: impl Into<String>, filters: Vec<Filter>, dnf: &Dnf) -> Self {
        let orig_pred = match filters.len() {
            0 => None,
            1 => Some(filters[0].expr.clone()),
            _ => Some(Expr::And(filters.iter().map(|f| f.expr.clone()).collect())),
        };
        let dnf_pred = orig_pred.as_ref().map(|p| dnf.normalize(p));
        let filters = filters
            .into_iter()
            .map(|f| Filter {
                expr: dnf.normalize(&f.expr),
                keyspaces: f.keyspaces,
            })
            .collect();
        Self {
            name: name.into(),
            filters,
            dnf_pred,
            orig_pred,
        }
    }

    /// Whether the normalized predicate is a disjunction that correlates
    /// keyspaces.
    pub fn or_is_join(&self) -> bool {
        matches!(self.dnf_pred, Some(Expr::Or(_))) && self.filters.iter().any(Filter::is_join)
    }
}

/// The keyspace reference being planned.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyspaceTerm {
    /// Alias used by every expression of the query.
    pub alias: String,
    /// Keyspace name in the datastore.
    pub keyspace: String,
    /// `ON KEY` expression of an index join or nest.
    pub join_keys: Option<Expr>,
    /// Join on the right-hand document key.
    pub primary_join: bool,
    /// Right side of a hash join.
    pub under_hash: bool,
    /// Right side of an ANSI NEST.
    pub ansi_nest: bool,
    /// Outer join or nest.
    pub outer: bool,
}

impl KeyspaceTerm {
    /// Term for `keyspace AS alias`.
    pub fn new(keyspace: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            keyspace: keyspace.into(),
            ..Self::default()
        }
    }

    /// Sets the `ON KEY` expression.
    pub fn with_join_keys(mut self, keys: Expr) -> Self {
        self.join_keys = Some(keys);
        self
    }

    /// Marks a join on the document key.
    pub fn with_primary_join(mut self) -> Self {
        self.primary_join = true;
        self
    }

    /// Marks the term as the build side of a hash join.
    pub fn with_under_hash(mut self) -> Self {
        self.under_hash = true;
        self
    }

    /// Marks an ANSI NEST.
    pub fn with_ansi_nest(mut self) -> Self {
        self.ansi_nest = true;
        self
    }

    /// Marks an outer join or nest.
    pub fn with_outer(mut self) -> Self {
        self.outer = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_and_normalizes_filters() {
        let filters = vec![
            Filter::new(Expr::constant(5).less_than(Expr::path("c.age")), ["c"]),
            Filter::new(Expr::path("c.type").equals(Expr::constant("user")), ["c"]),
        ];
        let base = BaseKeyspace::new("c", filters, &Dnf::default());
        assert_eq!(base.filters[0].expr, Expr::path("c.age").greater_than(Expr::constant(5)));
        assert!(matches!(base.dnf_pred, Some(Expr::And(ref c)) if c.len() == 2));
        assert!(matches!(base.orig_pred, Some(Expr::And(_))));
        assert!(!base.or_is_join());
    }

    #[test]
    fn correlated_disjunction_is_a_join() {
        let pred = Expr::or(vec![
            Expr::path("c.a").equals(Expr::path("o.a")),
            Expr::path("c.b").equals(Expr::constant(1)),
        ]);
        let base = BaseKeyspace::new("c", vec![Filter::new(pred, ["c", "o"])], &Dnf::default());
        assert!(base.or_is_join());
        assert!(base.filters[0].is_join());
    }
}
