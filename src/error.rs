use thiserror::Error;

use crate::config::ConfigError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PlanError>;

/// Errors raised while planning a query.
#[derive(Debug, Error)]
pub enum PlanError {
    /// An expression could not be mapped into the keyspace alias scope.
    #[error("cannot formalize {expr}: {reason}")]
    Formalize { expr: String, reason: String },
    /// A join or nest requires an index on the right-hand keyspace and none qualifies.
    #[error("no index available on keyspace {alias} that matches your query; use CREATE INDEX or CREATE PRIMARY INDEX to create an index, or check that your expected index is online ({op})")]
    NoIndexJoin { alias: String, op: &'static str },
    /// Span computation returned nothing for a candidate that was deemed sargable.
    #[error("sargable index {index} not sarged")]
    SargFailure { index: String },
    /// No index can sarg the predicate and the keyspace has no primary index.
    #[error("no index available on keyspace {keyspace}; create a primary index or an index matching the query")]
    NoPrimaryIndex { keyspace: String },
    /// Planner invariant violated.
    #[error("internal planner error: {0}")]
    Internal(String),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Execution-side hash table failure.
    #[error(transparent)]
    HashTable(#[from] HashTableError),
}

impl PlanError {
    /// Machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::Formalize { .. } => "Formalize",
            PlanError::NoIndexJoin { .. } => "NoIndexJoin",
            PlanError::SargFailure { .. } => "SargFailure",
            PlanError::NoPrimaryIndex { .. } => "NoPrimaryIndex",
            PlanError::Internal(_) => "Internal",
            PlanError::Config(_) => "Config",
            PlanError::HashTable(err) => err.code(),
        }
    }

    pub(crate) fn formalize(expr: impl ToString, reason: impl Into<String>) -> Self {
        PlanError::Formalize {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by [`HashTable`](crate::execution::HashTable).
///
/// Key-not-found and exhausted cursors are reported as `None`, never as errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashTableError {
    /// Growing the table failed to allocate.
    #[error("hash table allocation failed ({requested} entries requested)")]
    Alloc { requested: usize },
    /// The table was used after `drop_table`.
    #[error("hash table used after drop")]
    Dropped,
}

impl HashTableError {
    /// Machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            HashTableError::Alloc { .. } => "HashTableAlloc",
            HashTableError::Dropped => "HashTableDropped",
        }
    }
}
