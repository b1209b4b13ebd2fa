//! Index metadata the planner reads from the storage layer.
//!
//! Index definitions are immutable and shared behind `Arc`; the planner only
//! ever works on formalized copies of their expressions.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::expr::Expr;

/// Capability level of an index implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexApi {
    /// Single-key spans only.
    V1,
    /// Exact composite spans, OFFSET push-down.
    V2,
    /// GROUP BY / aggregate push-down.
    #[default]
    V3,
}

/// Partitioning strategy of an index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    /// Not partitioned.
    #[default]
    None,
    /// Hash partitioned on the partition expressions.
    Hash,
    /// Any other strategy.
    Other,
}

/// Partition information of an index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    /// Strategy in use.
    #[serde(default)]
    pub strategy: PartitionStrategy,
    /// Partition key expressions, written in index scope.
    #[serde(default)]
    pub exprs: Vec<Expr>,
}

/// Immutable index descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name, unique per keyspace.
    pub name: String,
    /// Keyspace the index belongs to.
    pub keyspace: String,
    /// Ordered range keys, written in index scope (no alias).
    #[serde(default)]
    pub range_keys: Vec<Expr>,
    /// Partial-index condition.
    #[serde(default)]
    pub condition: Option<Expr>,
    /// Primary index over document keys.
    #[serde(default)]
    pub primary: bool,
    /// Partitioning.
    #[serde(default)]
    pub partition: Partition,
    /// Capability level.
    #[serde(default)]
    pub api: IndexApi,
}

impl IndexDef {
    /// Secondary index over `range_keys`.
    pub fn secondary(name: impl Into<String>, keyspace: impl Into<String>, range_keys: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            keyspace: keyspace.into(),
            range_keys,
            condition: None,
            primary: false,
            partition: Partition::default(),
            api: IndexApi::default(),
        }
    }

    /// Primary index of `keyspace`.
    pub fn primary(name: impl Into<String>, keyspace: impl Into<String>) -> Self {
        Self {
            primary: true,
            ..Self::secondary(name, keyspace, Vec::new())
        }
    }

    /// Adds a partial-index condition.
    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Sets partitioning.
    pub fn with_partition(mut self, strategy: PartitionStrategy, exprs: Vec<Expr>) -> Self {
        self.partition = Partition { strategy, exprs };
        self
    }

    /// Sets the capability level.
    pub fn with_api(mut self, api: IndexApi) -> Self {
        self.api = api;
        self
    }

    /// Whether any range key is an array index key.
    pub fn has_array_index_key(&self) -> bool {
        self.range_keys.iter().any(Expr::is_array_index_key)
    }

    /// Capability level usable under the planner's configured ceiling.
    pub fn effective_api(&self, ceiling: IndexApi) -> IndexApi {
        self.api.min(ceiling)
    }
}

/// Source of index metadata.
pub trait Datastore {
    /// Every index defined on `keyspace`, in a stable order.
    fn indexes(&self, keyspace: &str) -> Result<Vec<Arc<IndexDef>>>;
}

/// Datastore backed by in-memory definitions; used by tests and the CLI.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDatastore {
    indexes: BTreeMap<String, Vec<Arc<IndexDef>>>,
}

impl InMemoryDatastore {
    /// Creates an empty datastore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index.
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.add_index(index);
        self
    }

    /// Registers an index in place.
    pub fn add_index(&mut self, index: IndexDef) {
        self.indexes
            .entry(index.keyspace.clone())
            .or_default()
            .push(Arc::new(index));
    }
}

impl Datastore for InMemoryDatastore {
    fn indexes(&self, keyspace: &str) -> Result<Vec<Arc<IndexDef>>> {
        Ok(self.indexes.get(keyspace).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_indexes_per_keyspace() {
        let ds = InMemoryDatastore::new()
            .with_index(IndexDef::primary("#primary", "customer"))
            .with_index(IndexDef::secondary("ix_age", "customer", vec![Expr::ident("age")]))
            .with_index(IndexDef::secondary("ix_total", "orders", vec![Expr::ident("total")]));
        let names: Vec<String> = ds
            .indexes("customer")
            .unwrap()
            .iter()
            .map(|i| i.name.clone())
            .collect();
        assert_eq!(names, vec!["#primary", "ix_age"]);
        assert!(ds.indexes("nothing").unwrap().is_empty());
    }

    #[test]
    fn api_ceiling_caps_capability() {
        let ix = IndexDef::secondary("ix", "k", vec![]).with_api(IndexApi::V2);
        assert_eq!(ix.effective_api(IndexApi::V3), IndexApi::V2);
        assert_eq!(ix.effective_api(IndexApi::V1), IndexApi::V1);
    }

    #[test]
    fn index_def_deserializes_with_defaults() {
        let json = r#"{"name":"ix","keyspace":"k","range_keys":[{"identifier":"a"}]}"#;
        let ix: IndexDef = serde_json::from_str(json).unwrap();
        assert_eq!(ix.range_keys, vec![Expr::ident("a")]);
        assert!(!ix.primary);
        assert_eq!(ix.api, IndexApi::V3);
    }
}
