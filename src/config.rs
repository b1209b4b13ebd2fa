//! Planner and execution tunables loaded from TOML.
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::datastore::IndexApi;

/// Default bound on the number of disjuncts DNF distribution may produce.
pub const DEFAULT_MAX_DNF_TERMS: usize = 4096;
/// Default bound on composite spans produced per index.
pub const DEFAULT_MAX_INDEX_SPANS: usize = 8192;
/// Default capacity of each scratch pool.
pub const DEFAULT_SCRATCH_POOL_CAPACITY: usize = 64;
/// Default initial bucket count for execution hash tables.
pub const DEFAULT_HASH_TABLE_BUCKETS: usize = 512;

/// Planner configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// Highest index API level the planner may rely on.
    pub index_api: IndexApi,
    /// Upper bound on DNF disjuncts before distribution is abandoned.
    pub max_dnf_terms: usize,
    /// Upper bound on composite spans per index scan.
    pub max_index_spans: usize,
    /// Whether GROUP BY / aggregates may be pushed into index scans.
    pub group_agg_pushdown: bool,
    /// Number of idle scratch containers retained per pool.
    pub scratch_pool_capacity: usize,
    /// Initial bucket count for hash tables built by execution operators.
    pub hash_table_initial_buckets: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            index_api: IndexApi::V3,
            max_dnf_terms: DEFAULT_MAX_DNF_TERMS,
            max_index_spans: DEFAULT_MAX_INDEX_SPANS,
            group_agg_pushdown: true,
            scratch_pool_capacity: DEFAULT_SCRATCH_POOL_CAPACITY,
            hash_table_initial_buckets: DEFAULT_HASH_TABLE_BUCKETS,
        }
    }
}

impl PlannerConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: None,
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the planner cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_dnf_terms == 0 {
            return Err(ConfigError::Invalid {
                field: "max_dnf_terms",
                reason: "must be positive".into(),
            });
        }
        if self.max_index_spans == 0 {
            return Err(ConfigError::Invalid {
                field: "max_index_spans",
                reason: "must be positive".into(),
            });
        }
        if !self.hash_table_initial_buckets.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "hash_table_initial_buckets",
                reason: format!("{} is not a power of two", self.hash_table_initial_buckets),
            });
        }
        Ok(())
    }

    /// Sets the index API level.
    pub fn with_index_api(mut self, api: IndexApi) -> Self {
        self.index_api = api;
        self
    }

    /// Sets the DNF term bound.
    pub fn with_max_dnf_terms(mut self, terms: usize) -> Self {
        self.max_dnf_terms = terms;
        self
    }

    /// Sets the composite span bound.
    pub fn with_max_index_spans(mut self, spans: usize) -> Self {
        self.max_index_spans = spans;
        self
    }

    /// Enables or disables GROUP/aggregate push-down.
    pub fn with_group_agg_pushdown(mut self, enabled: bool) -> Self {
        self.group_agg_pushdown = enabled;
        self
    }

    /// Sets the scratch pool capacity.
    pub fn with_scratch_pool_capacity(mut self, capacity: usize) -> Self {
        self.scratch_pool_capacity = capacity;
        self
    }

    /// Sets the hash table initial bucket count.
    pub fn with_hash_table_initial_buckets(mut self, buckets: usize) -> Self {
        self.hash_table_initial_buckets = buckets;
        self
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read planner config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse planner config{}: {source}", display_path(.path))]
    Parse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    #[error("invalid planner config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}
