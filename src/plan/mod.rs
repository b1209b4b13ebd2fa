//! Physical plan operators emitted by the planner.
//!
//! Operators serialize to JSON with a `"#operator"` tag. Expressions are
//! embedded in their string form so a persisted plan does not depend on the
//! expression tree's internal layout.
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

mod nest_nl;

pub use nest_nl::NLNest;

/// One key range of a span.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRange {
    /// Low bound; absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<String>,
    /// High bound; absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<String>,
    /// Inclusion bits: [`PlanRange::LOW`] and [`PlanRange::HIGH`].
    pub inclusion: u8,
}

impl PlanRange {
    /// Low bound is inclusive.
    pub const LOW: u8 = 1;
    /// High bound is inclusive.
    pub const HIGH: u8 = 2;
}

/// Composite span: one range per leading index key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSpan {
    /// Per-key ranges.
    pub range: Vec<PlanRange>,
}

/// Span set of an index scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSpans {
    /// Spans scanned in sequence.
    Spans(Vec<PlanSpan>),
    /// Union of span sets.
    Union(Vec<PlanSpans>),
    /// Intersection of span sets.
    Intersect(Vec<PlanSpans>),
}

/// Which index entry fields a scan returns.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexProjection {
    /// Positions of returned index keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_keys: Vec<usize>,
    /// Whether the document key is returned.
    #[serde(default)]
    pub primary_key: bool,
}

/// Index key driving ORDER BY.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKeyOrder {
    /// Position of the key in the index.
    pub key_pos: usize,
    /// Scan the key in descending order.
    #[serde(default)]
    pub desc: bool,
}

/// Aggregate computed by the index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexAggregate {
    /// Aggregate function.
    pub aggregate: String,
    /// Operand, absent for `COUNT(*)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// Aggregate over distinct operand values.
    #[serde(default)]
    pub distinct: bool,
}

/// GROUP BY / aggregate push-down.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexGroupAggs {
    /// Group keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<String>,
    /// Aggregates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<IndexAggregate>,
    /// Index key positions the grouping reads.
    #[serde(default)]
    pub depends_on_index_keys: Vec<usize>,
    /// Groups span partitions; a final aggregation is still required.
    #[serde(default)]
    pub partial: bool,
}

/// Range scan of a secondary (or primary, by key) index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexScan {
    /// Index name.
    pub index: String,
    /// Keyspace name.
    pub keyspace: String,
    /// Keyspace alias.
    #[serde(rename = "as")]
    pub alias: String,
    /// Spans to enumerate.
    pub spans: PlanSpans,
    /// Index keys the scan supplies without a fetch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub covers: Vec<String>,
    /// Expressions known from the index condition.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter_covers: BTreeMap<String, serde_json::Value>,
    /// Pushed LIMIT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Pushed OFFSET.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Returned entry fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_projection: Option<IndexProjection>,
    /// Pushed ORDER BY.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub index_order: Vec<IndexKeyOrder>,
    /// Pushed GROUP BY / aggregates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_group_aggs: Option<IndexGroupAggs>,
    /// Pushed DISTINCT projection.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub distinct: bool,
}

/// Index-based join of the right keyspace (`ON KEY ... FOR ...`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexJoin {
    /// Right keyspace name.
    pub keyspace: String,
    /// Right keyspace alias.
    #[serde(rename = "as")]
    pub alias: String,
    /// `ON KEY` expression.
    pub on_key: String,
    /// Left outer join.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub outer: bool,
    /// Index probed for each left row.
    pub index: String,
    /// Covering keys, when the join is covered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub covers: Vec<String>,
    /// Expressions known from the index condition.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter_covers: BTreeMap<String, serde_json::Value>,
}

/// Physical operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "#operator")]
pub enum Operator {
    /// Full scan of the primary index.
    PrimaryScan {
        /// Primary index name.
        index: String,
        /// Keyspace name.
        keyspace: String,
        /// Keyspace alias.
        #[serde(rename = "as")]
        alias: String,
        /// Pushed LIMIT.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<i64>,
    },
    /// Index range scan.
    IndexScan(IndexScan),
    /// De-duplicates document keys of a scan that may repeat them.
    DistinctScan {
        /// LIMIT applied after de-duplication.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<i64>,
        /// OFFSET applied after de-duplication.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<i64>,
        /// Underlying scan.
        scan: Box<Operator>,
    },
    /// Keys returned by every child scan.
    IntersectScan {
        /// LIMIT over the intersection.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<i64>,
        /// Child scans.
        scans: Vec<Operator>,
    },
    /// Intersection preserving the order of the first scan.
    OrderedIntersectScan {
        /// LIMIT over the intersection.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<i64>,
        /// Child scans; the first one drives order.
        scans: Vec<Operator>,
    },
    /// Index join.
    IndexJoin(IndexJoin),
    /// Index nest.
    IndexNest {
        /// Right keyspace name.
        keyspace: String,
        /// Right keyspace alias.
        #[serde(rename = "as")]
        alias: String,
        /// `ON KEY` expression.
        on_key: String,
        /// Left outer nest.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        outer: bool,
        /// Index probed for each left row.
        index: String,
    },
    /// Nested-loop nest for ANSI NEST.
    #[serde(rename = "NestedLoopNest")]
    NLNest(NLNest),
}

/// Explain node describing one operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplainNode {
    /// Operator name.
    pub op: String,
    /// Operator properties.
    pub props: Vec<ExplainProp>,
    /// Input operators.
    pub inputs: Vec<ExplainNode>,
}

/// Property of an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Rendered value.
    pub value: String,
    /// Value carries user data and is redacted on request.
    pub redactable: bool,
}

impl ExplainProp {
    fn plain(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_owned(),
            value: value.into(),
            redactable: false,
        }
    }

    fn literal(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_owned(),
            value: value.into(),
            redactable: true,
        }
    }
}

impl ExplainNode {
    /// Indented text tree; user data is wrapped in `<ud>` markers when
    /// `redact` is set.
    pub fn render(&self, redact: bool) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0, redact);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize, redact: bool) {
        let _ = write!(out, "{:indent$}{}", "", self.op, indent = depth * 2);
        for prop in &self.props {
            if redact && prop.redactable {
                let _ = write!(out, " {}=<ud>{}</ud>", prop.key, prop.value);
            } else {
                let _ = write!(out, " {}={}", prop.key, prop.value);
            }
        }
        out.push('\n');
        for input in &self.inputs {
            input.render_into(out, depth + 1, redact);
        }
    }
}

fn spans_text(spans: &PlanSpans) -> String {
    match spans {
        PlanSpans::Spans(list) => {
            let parts: Vec<String> = list
                .iter()
                .map(|span| {
                    let ranges: Vec<String> = span
                        .range
                        .iter()
                        .map(|r| {
                            format!(
                                "{}{},{}{}",
                                if r.inclusion & PlanRange::LOW != 0 { '[' } else { '(' },
                                r.low.as_deref().unwrap_or("-inf"),
                                r.high.as_deref().unwrap_or("+inf"),
                                if r.inclusion & PlanRange::HIGH != 0 { ']' } else { ')' },
                            )
                        })
                        .collect();
                    ranges.join("")
                })
                .collect();
            parts.join(" ")
        }
        PlanSpans::Union(children) => {
            let parts: Vec<String> = children.iter().map(spans_text).collect();
            format!("union({})", parts.join("; "))
        }
        PlanSpans::Intersect(children) => {
            let parts: Vec<String> = children.iter().map(spans_text).collect();
            format!("intersect({})", parts.join("; "))
        }
    }
}

impl Operator {
    /// Operator name as it appears under `"#operator"`.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::PrimaryScan { .. } => "PrimaryScan",
            Operator::IndexScan(_) => "IndexScan",
            Operator::DistinctScan { .. } => "DistinctScan",
            Operator::IntersectScan { .. } => "IntersectScan",
            Operator::OrderedIntersectScan { .. } => "OrderedIntersectScan",
            Operator::IndexJoin(_) => "IndexJoin",
            Operator::IndexNest { .. } => "IndexNest",
            Operator::NLNest(_) => "NestedLoopNest",
        }
    }

    /// Direct inputs.
    pub fn children(&self) -> Vec<&Operator> {
        match self {
            Operator::DistinctScan { scan, .. } => vec![scan.as_ref()],
            Operator::IntersectScan { scans, .. } | Operator::OrderedIntersectScan { scans, .. } => {
                scans.iter().collect()
            }
            Operator::NLNest(nest) => vec![nest.child()],
            Operator::PrimaryScan { .. }
            | Operator::IndexScan(_)
            | Operator::IndexJoin(_)
            | Operator::IndexNest { .. } => Vec::new(),
        }
    }

    /// Whether the operator tree reads index entries only.
    pub fn is_covering(&self) -> bool {
        match self {
            Operator::IndexScan(scan) => !scan.covers.is_empty(),
            Operator::IndexJoin(join) => !join.covers.is_empty(),
            Operator::DistinctScan { scan, .. } => scan.is_covering(),
            _ => false,
        }
    }

    fn props(&self) -> Vec<ExplainProp> {
        let mut props = Vec::new();
        match self {
            Operator::PrimaryScan {
                index,
                keyspace,
                alias,
                limit,
            } => {
                props.push(ExplainProp::plain("index", index.as_str()));
                props.push(ExplainProp::plain("keyspace", format!("{keyspace} as {alias}")));
                if let Some(limit) = limit {
                    props.push(ExplainProp::plain("limit", limit.to_string()));
                }
            }
            Operator::IndexScan(scan) => {
                props.push(ExplainProp::plain("index", scan.index.as_str()));
                props.push(ExplainProp::plain("keyspace", format!("{} as {}", scan.keyspace, scan.alias)));
                props.push(ExplainProp::literal("spans", spans_text(&scan.spans)));
                if !scan.covers.is_empty() {
                    props.push(ExplainProp::plain("covers", scan.covers.join(", ")));
                }
                if !scan.filter_covers.is_empty() {
                    let fc: Vec<String> = scan
                        .filter_covers
                        .iter()
                        .map(|(k, v)| format!("{k}: {v}"))
                        .collect();
                    props.push(ExplainProp::literal("filter_covers", fc.join(", ")));
                }
                if let Some(offset) = scan.offset {
                    props.push(ExplainProp::plain("offset", offset.to_string()));
                }
                if let Some(limit) = scan.limit {
                    props.push(ExplainProp::plain("limit", limit.to_string()));
                }
                if !scan.index_order.is_empty() {
                    let order: Vec<String> = scan
                        .index_order
                        .iter()
                        .map(|o| format!("{}{}", o.key_pos, if o.desc { " desc" } else { "" }))
                        .collect();
                    props.push(ExplainProp::plain("order", order.join(", ")));
                }
                if let Some(aggs) = &scan.index_group_aggs {
                    props.push(ExplainProp::plain("group", aggs.group.join(", ")));
                    props.push(ExplainProp::plain("partial", aggs.partial.to_string()));
                }
                if scan.distinct {
                    props.push(ExplainProp::plain("distinct", "true"));
                }
            }
            Operator::DistinctScan { limit, offset, .. } => {
                if let Some(offset) = offset {
                    props.push(ExplainProp::plain("offset", offset.to_string()));
                }
                if let Some(limit) = limit {
                    props.push(ExplainProp::plain("limit", limit.to_string()));
                }
            }
            Operator::IntersectScan { limit, .. } | Operator::OrderedIntersectScan { limit, .. } => {
                if let Some(limit) = limit {
                    props.push(ExplainProp::plain("limit", limit.to_string()));
                }
            }
            Operator::IndexJoin(join) => {
                props.push(ExplainProp::plain("keyspace", format!("{} as {}", join.keyspace, join.alias)));
                props.push(ExplainProp::literal("on_key", join.on_key.as_str()));
                props.push(ExplainProp::plain("index", join.index.as_str()));
                if join.outer {
                    props.push(ExplainProp::plain("outer", "true"));
                }
                if !join.covers.is_empty() {
                    props.push(ExplainProp::plain("covers", join.covers.join(", ")));
                }
            }
            Operator::IndexNest {
                keyspace,
                alias,
                on_key,
                outer,
                index,
            } => {
                props.push(ExplainProp::plain("keyspace", format!("{keyspace} as {alias}")));
                props.push(ExplainProp::literal("on_key", on_key.as_str()));
                props.push(ExplainProp::plain("index", index.as_str()));
                if *outer {
                    props.push(ExplainProp::plain("outer", "true"));
                }
            }
            Operator::NLNest(nest) => {
                props.push(ExplainProp::plain("alias", nest.alias()));
                props.push(ExplainProp::literal("on_clause", nest.on_clause()));
                if nest.outer() {
                    props.push(ExplainProp::plain("outer", "true"));
                }
            }
        }
        props
    }

    /// Explain tree of this operator and its inputs.
    pub fn explain(&self) -> ExplainNode {
        ExplainNode {
            op: self.name().to_owned(),
            props: self.props(),
            inputs: self.children().into_iter().map(Operator::explain).collect(),
        }
    }

    /// Deterministic hash of the operator tree.
    pub fn plan_hash(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        hash_explain(&self.explain(), &mut hasher);
        hasher.finish()
    }

    /// JSON form of the plan.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

fn hash_explain(node: &ExplainNode, hasher: &mut Xxh64) {
    hasher.write(node.op.as_bytes());
    for prop in &node.props {
        hasher.write(prop.key.as_bytes());
        hasher.write(prop.value.as_bytes());
    }
    hasher.write_u64(node.inputs.len() as u64);
    for input in &node.inputs {
        hash_explain(input, hasher);
    }
}
