//! Tunables loaded from TOML reach the planner pools and execution tables.
#![allow(missing_docs)]

use std::sync::Arc;

use docquery::execution::{intersect_keys, BoxRowStream, HashTable, VecRowStream};
use docquery::planner::pool::{filter_covers_pool, index_set_pool};
use docquery::{AnnotatedValue, InMemoryDatastore, Planner, PlannerConfig};

#[test]
fn planner_applies_scratch_pool_capacity() {
    let config = PlannerConfig::from_toml_str("scratch_pool_capacity = 3\n").unwrap();
    let planner = Planner::new(config, Arc::new(InMemoryDatastore::new()));
    assert_eq!(planner.config().scratch_pool_capacity, 3);
    assert_eq!(filter_covers_pool().status().capacity, 3);
    assert_eq!(index_set_pool().status().capacity, 3);
}

#[test]
fn hash_tables_start_at_the_configured_size() {
    let config = PlannerConfig::from_toml_str("hash_table_initial_buckets = 16\n").unwrap();
    assert_eq!(HashTable::from_config(&config).num_buckets(), 16);
    assert_eq!(HashTable::from_config(&PlannerConfig::default()).num_buckets(), 512);

    let keys = |ids: &[&str]| -> BoxRowStream {
        Box::new(VecRowStream::new(
            ids.iter().map(|id| AnnotatedValue::for_cover("t", *id)).collect(),
        ))
    };
    let out = intersect_keys(vec![keys(&["a", "b", "c"]), keys(&["c", "a"])], "t", None, &config).unwrap();
    assert_eq!(out.len(), 2);
}
