//! Index selection and correlated execution for a document query engine.
//!
//! The [`planner`] turns a keyspace term and its filters into a physical
//! [`plan::Operator`]: predicates are normalized to DNF, indexes are sarged
//! into spans, dominated indexes are dropped and covering indexes preferred.
//! The [`execution`] module provides the duplicate-preserving
//! [`execution::HashTable`] and the join, nest and intersect operators built
//! on it.

#![warn(missing_docs)]

pub mod config;
pub mod datastore;
pub mod error;
pub mod execution;
pub mod expr;
pub mod plan;
pub mod planner;
pub mod value;

pub use config::{ConfigError, PlannerConfig};
pub use datastore::{Datastore, InMemoryDatastore, IndexApi, IndexDef};
pub use error::{HashTableError, PlanError, Result};
pub use execution::HashTable;
pub use expr::Expr;
pub use plan::Operator;
pub use planner::{PlanRequest, Planner, PlannerOutput};
pub use value::{AnnotatedValue, Value};
