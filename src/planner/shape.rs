//! The parts of a query outside its WHERE clause that decide what an index
//! scan may take over.
use serde::{Deserialize, Serialize};

use crate::expr::Expr;

/// One ORDER BY term.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderTerm {
    pub expr: Expr,
    #[serde(default)]
    pub descending: bool,
}

impl OrderTerm {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            descending: false,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            descending: true,
        }
    }
}

/// Aggregate function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Avg => "avg",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
        }
    }
}

/// Aggregate call; `operand` is absent for `COUNT(*)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub func: AggregateFunc,
    #[serde(default)]
    pub operand: Option<Expr>,
    #[serde(default)]
    pub distinct: bool,
}

impl Aggregate {
    pub fn new(func: AggregateFunc, operand: Option<Expr>) -> Self {
        Self {
            func,
            operand,
            distinct: false,
        }
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

/// Query shape handed to the builder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryShape {
    /// Expressions the query reads from its keyspaces; `None` when whole
    /// documents are needed and no scan can be covering.
    pub cover: Option<Vec<Expr>>,
    pub order: Vec<OrderTerm>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    /// GROUP BY keys; `Some(vec![])` for aggregates without GROUP BY.
    pub group: Option<Vec<Expr>>,
    pub aggregates: Vec<Aggregate>,
    /// SELECT DISTINCT.
    pub distinct: bool,
}

impl QueryShape {
    pub fn with_cover(mut self, exprs: Vec<Expr>) -> Self {
        self.cover = Some(exprs);
        self
    }

    pub fn with_order(mut self, terms: Vec<OrderTerm>) -> Self {
        self.order = terms;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_group(mut self, group: Vec<Expr>, aggregates: Vec<Aggregate>) -> Self {
        self.group = Some(group);
        self.aggregates = aggregates;
        self
    }

    pub fn with_distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}
