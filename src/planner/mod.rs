//! Index selection for document queries.
//!
//! Planning runs bottom-up: predicates are normalized to DNF, every index of
//! the keyspace becomes a candidate entry, dominated entries are eliminated,
//! and the survivors are sarged into spans and turned into scan operators.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::PlannerConfig;
use crate::datastore::Datastore;
use crate::error::Result;
use crate::expr::Expr;
use crate::plan::{ExplainNode, Operator};

mod builder;
pub mod candidates;
pub mod cover;
pub mod dnf;
pub mod entry;
mod join_index;
pub mod keyspace;
pub mod minimal;
pub mod pool;
pub mod sarg;
mod scan_covering;
mod scan_secondary;
pub mod shape;
pub mod span;
pub mod subset;

pub use builder::Builder;
pub use candidates::{sargable_indexes, Candidates};
pub use cover::{covers_for, index_cover_expressions, is_covered, FilterCovers};
pub use dnf::Dnf;
pub use entry::{IndexEntry, PushDownProperty};
pub use join_index::JoinScan;
pub use keyspace::{BaseKeyspace, Filter, KeyspaceTerm};
pub use minimal::{minimal_indexes, narrower_or_equivalent};
pub use sarg::{sarg_for, sarg_for_filters, sargable_for};
pub use shape::{Aggregate, AggregateFunc, OrderTerm, QueryShape};
pub use span::{KeyRange, SargSpans, Span};
pub use subset::subset_of;

/// How the keyspace term is reached.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Access {
    /// Plain scan of the keyspace.
    #[default]
    Scan,
    /// Right side of `JOIN ... ON KEY ... FOR ...`.
    IndexJoin,
    /// Right side of `NEST ... ON KEY ... FOR ...`.
    IndexNest,
    /// Right side of an ANSI `NEST ... ON ...`.
    NestedLoopNest { on_clause: Expr },
}

/// One planning request: a keyspace term, the filters of every keyspace in
/// the query and the query shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanRequest {
    /// Identifier propagated to the output.
    pub request_id: Option<String>,
    /// Keyspace reference to plan.
    pub term: KeyspaceTerm,
    /// How the term is reached.
    pub access: Access,
    /// Filters keyed by keyspace alias.
    pub filters: BTreeMap<String, Vec<Filter>>,
    /// Covers, ordering, pagination and grouping the scan may take over.
    pub shape: QueryShape,
}

/// Explain tree and plan hash.
#[derive(Clone, Debug)]
pub struct PlanExplain {
    /// Explain tree of the plan.
    pub root: ExplainNode,
    /// Hash of `root`.
    pub plan_hash: u64,
}

/// Planner result.
#[derive(Clone, Debug)]
pub struct PlannerOutput {
    /// Identifier propagated from the request.
    pub request_id: Option<String>,
    /// Chosen operator tree.
    pub plan: Operator,
    /// Explain tree and its hash.
    pub explain: PlanExplain,
    /// Deterministic hash of the operator tree.
    pub plan_hash: u64,
    /// Parallelism ceiling for the scan; 0 means unrestricted.
    pub max_parallelism: usize,
    /// Indexes answering the query without document fetches.
    pub covering_scans: Vec<String>,
    /// What remained pushed into the scan after planning.
    pub pushed: QueryShape,
}

/// Plans keyspace access against a datastore.
pub struct Planner {
    datastore: Arc<dyn Datastore>,
    config: PlannerConfig,
}

impl Planner {
    /// Planner over `datastore`.
    ///
    /// Applies `scratch_pool_capacity` to the process-wide scratch pools.
    pub fn new(config: PlannerConfig, datastore: Arc<dyn Datastore>) -> Self {
        pool::configure_global_pools(config.scratch_pool_capacity);
        Self { datastore, config }
    }

    /// Active configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plans one request.
    pub fn plan(&self, request: &PlanRequest) -> Result<PlannerOutput> {
        let mut builder = Builder::new(self.config.clone(), self.datastore.as_ref()).with_shape(request.shape.clone());
        for (alias, filters) in &request.filters {
            builder.add_keyspace(alias, filters.clone());
        }
        let term = &request.term;
        let plan = match &request.access {
            Access::Scan => builder.build_scan(term)?,
            Access::IndexJoin => builder.build_index_join(term)?,
            Access::IndexNest => builder.build_index_nest(term)?,
            Access::NestedLoopNest { on_clause } => builder.build_nl_nest(term, on_clause)?,
        };
        let plan_hash = plan.plan_hash();
        let explain = PlanExplain {
            root: plan.explain(),
            plan_hash,
        };
        tracing::debug!(
            request_id = request.request_id.as_deref().unwrap_or(""),
            operator = plan.name(),
            plan_hash,
            "planner.plan"
        );
        Ok(PlannerOutput {
            request_id: request.request_id.clone(),
            explain,
            plan_hash,
            max_parallelism: builder.max_parallelism(),
            covering_scans: builder.covering_scans().to_vec(),
            pushed: QueryShape {
                cover: None,
                order: builder.order().map(<[OrderTerm]>::to_vec).unwrap_or_default(),
                offset: builder.offset(),
                limit: builder.limit(),
                group: builder.group().map(<[Expr]>::to_vec),
                aggregates: builder.aggregates().to_vec(),
                distinct: builder.distinct(),
            },
            plan,
        })
    }
}
