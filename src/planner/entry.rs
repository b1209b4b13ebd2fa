use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use crate::datastore::IndexDef;
use crate::expr::Expr;

use super::span::SargSpans;

/// Operations an index scan can perform itself for the current query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PushDownProperty(u8);

impl PushDownProperty {
    /// Nothing can be pushed.
    pub const NONE: Self = Self(0);
    /// LIMIT.
    pub const LIMIT: Self = Self(1);
    /// OFFSET.
    pub const OFFSET: Self = Self(1 << 1);
    /// ORDER BY.
    pub const ORDER: Self = Self(1 << 2);
    /// DISTINCT projection.
    pub const DISTINCT: Self = Self(1 << 3);
    /// GROUP BY and aggregates.
    pub const GROUPAGGS: Self = Self(1 << 4);

    /// Whether any bit of `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for PushDownProperty {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PushDownProperty {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for PushDownProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PushDownProperty, &str); 5] = [
            (PushDownProperty::LIMIT, "limit"),
            (PushDownProperty::OFFSET, "offset"),
            (PushDownProperty::ORDER, "order"),
            (PushDownProperty::DISTINCT, "distinct"),
            (PushDownProperty::GROUPAGGS, "groupaggs"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Planner working record for one candidate index.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    /// The index.
    pub index: Arc<IndexDef>,
    /// Formalized, normalized range keys.
    pub keys: Vec<Expr>,
    /// Length of the sargable key prefix.
    pub min_keys: usize,
    /// Aggregate precision over the sargable prefix.
    pub sum_keys: usize,
    /// Formalized partition keys.
    pub partition_keys: Vec<Expr>,
    /// Normalized partial-index condition.
    pub cond: Option<Expr>,
    /// Partial-index condition before normalization.
    pub orig_cond: Option<Expr>,
    /// Spans, once sarged.
    pub spans: Option<SargSpans>,
    /// The spans apply the whole predicate.
    pub exact_spans: bool,
    /// Push-downs available for the current query.
    pub push_down: PushDownProperty,
}

impl IndexEntry {
    /// The constrained key prefix.
    pub fn sarg_keys(&self) -> &[Expr] {
        &self.keys[..self.min_keys.min(self.keys.len())]
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.index.name
    }

    /// Whether any of the `flags` can be pushed down.
    pub fn is_push_down(&self, flags: PushDownProperty) -> bool {
        self.push_down.intersects(flags)
    }

    /// Whether the index has an array key.
    pub fn has_array_key(&self) -> bool {
        self.keys.iter().any(Expr::is_array_index_key)
    }
}
