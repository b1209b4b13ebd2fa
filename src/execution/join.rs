//! Build/probe operators backed by [`HashTable`].
//!
//! The build side is drained into a table keyed by its join expression and
//! the probe side is streamed. Build rows stay in a vector; the table stores
//! their positions as payloads.
use std::collections::VecDeque;

use crate::config::PlannerConfig;
use crate::error::{PlanError, Result};
use crate::expr::Expr;
use crate::value::{AnnotatedValue, Value};

use super::hash_table::HashTable;

/// Pull-based row source.
pub trait RowStream {
    /// Next row, `None` once the stream is exhausted.
    fn try_next(&mut self) -> Result<Option<AnnotatedValue>>;
}

/// Boxed stream handed between operators.
pub type BoxRowStream = Box<dyn RowStream>;

/// Stream over rows already in memory.
#[derive(Debug, Default)]
pub struct VecRowStream {
    rows: std::vec::IntoIter<AnnotatedValue>,
}

impl VecRowStream {
    /// Streams `rows` in order.
    pub fn new(rows: Vec<AnnotatedValue>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowStream for VecRowStream {
    fn try_next(&mut self) -> Result<Option<AnnotatedValue>> {
        Ok(self.rows.next())
    }
}

/// Drains a stream.
pub fn collect_rows(stream: &mut dyn RowStream) -> Result<Vec<AnnotatedValue>> {
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next()? {
        rows.push(row);
    }
    Ok(rows)
}

// Shared build phase: rows whose key is MISSING or NULL are kept out of the
// table and can never match.
struct BuildSide {
    rows: Vec<AnnotatedValue>,
    table: HashTable,
}

impl BuildSide {
    fn new(build: &mut dyn RowStream, key: &Expr, config: &PlannerConfig) -> Result<Self> {
        let mut rows = Vec::new();
        let mut table = HashTable::from_config(config);
        while let Some(row) = build.try_next()? {
            let k = key.evaluate(&row);
            if k.is_unknown() {
                continue;
            }
            table.put(k, position(rows.len()))?;
            rows.push(row);
        }
        tracing::debug!(rows = rows.len(), buckets = table.num_buckets(), "execution.hash.build");
        Ok(Self { rows, table })
    }

    // Every build row whose key equals `key`, in build order.
    fn matches(&mut self, key: &Value) -> Result<Vec<usize>> {
        let mut found = Vec::new();
        if key.is_unknown() {
            return Ok(found);
        }
        let mut next = self.table.get(key)?.cloned();
        while let Some(payload) = next {
            found.push(index_of(&payload)?);
            next = self.table.get_next()?.cloned();
        }
        Ok(found)
    }

    fn release(&mut self) {
        self.table.drop_table();
        self.rows.clear();
    }
}

fn position(idx: usize) -> Value {
    Value::Int(idx as i64)
}

fn index_of(payload: &Value) -> Result<usize> {
    match payload {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        other => Err(PlanError::Internal(format!("hash build payload {other} is not a row position"))),
    }
}

/// Hash join. Each probe row is merged with every build row sharing its key.
/// A left-outer join passes unmatched probe rows through unchanged.
pub struct HashJoin {
    build: BuildSide,
    probe: BoxRowStream,
    probe_key: Expr,
    outer: bool,
    pending: VecDeque<AnnotatedValue>,
}

impl HashJoin {
    /// Drains `build` keyed by `build_key`; `probe` is read lazily.
    pub fn new(
        mut build: BoxRowStream,
        build_key: &Expr,
        probe: BoxRowStream,
        probe_key: Expr,
        outer: bool,
        config: &PlannerConfig,
    ) -> Result<Self> {
        Ok(Self {
            build: BuildSide::new(build.as_mut(), build_key, config)?,
            probe,
            probe_key,
            outer,
            pending: VecDeque::new(),
        })
    }
}

impl RowStream for HashJoin {
    fn try_next(&mut self) -> Result<Option<AnnotatedValue>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }

            let Some(row) = self.probe.try_next()? else {
                self.build.release();
                return Ok(None);
            };
            let key = self.probe_key.evaluate(&row);
            let matches = self.build.matches(&key)?;
            if matches.is_empty() {
                if self.outer {
                    return Ok(Some(row));
                }
                continue;
            }
            for idx in matches {
                let mut joined = row.clone();
                joined.merge(&self.build.rows[idx]);
                self.pending.push_back(joined);
            }
        }
    }
}

/// Hash nest. Each probe row gets an array of the `alias` values of all
/// matching build rows. Inner nests drop rows without matches; outer nests
/// keep them with `alias` left MISSING.
pub struct HashNest {
    build: BuildSide,
    probe: BoxRowStream,
    probe_key: Expr,
    alias: String,
    outer: bool,
}

impl HashNest {
    /// Drains `build`; matches are nested under `alias` of each probe row.
    pub fn new(
        mut build: BoxRowStream,
        build_key: &Expr,
        probe: BoxRowStream,
        probe_key: Expr,
        alias: impl Into<String>,
        outer: bool,
        config: &PlannerConfig,
    ) -> Result<Self> {
        Ok(Self {
            build: BuildSide::new(build.as_mut(), build_key, config)?,
            probe,
            probe_key,
            alias: alias.into(),
            outer,
        })
    }
}

impl RowStream for HashNest {
    fn try_next(&mut self) -> Result<Option<AnnotatedValue>> {
        loop {
            let Some(mut row) = self.probe.try_next()? else {
                self.build.release();
                return Ok(None);
            };
            let key = self.probe_key.evaluate(&row);
            let matches = self.build.matches(&key)?;
            if matches.is_empty() {
                if self.outer {
                    return Ok(Some(row));
                }
                continue;
            }
            let nested: Vec<Value> = matches
                .into_iter()
                .map(|idx| self.build.rows[idx].value().field(&self.alias).clone())
                .collect();
            row.value_mut().set_field(self.alias.clone(), Value::Array(nested));
            return Ok(Some(row));
        }
    }
}

/// Intersects the document-key streams of an intersect scan.
///
/// A key survives when every stream produced it; duplicates inside a stream
/// count once. Rows come back in the order of the first stream, at most
/// `limit` of them. No streams yield no rows.
pub fn intersect_keys(
    streams: Vec<BoxRowStream>,
    alias: &str,
    limit: Option<u64>,
    config: &PlannerConfig,
) -> Result<Vec<AnnotatedValue>> {
    let wanted = streams.len();
    let mut streams = streams.into_iter();
    let Some(mut first) = streams.next() else {
        return Ok(Vec::new());
    };
    let id = Expr::meta_id(alias);

    // Distinct rows of the first stream and how many streams saw each.
    let mut rows = Vec::new();
    let mut hits: Vec<usize> = Vec::new();
    let mut seen = HashTable::from_config(config);
    while let Some(row) = first.try_next()? {
        let key = id.evaluate(&row);
        if key.is_unknown() || seen.get(&key)?.is_some() {
            continue;
        }
        seen.put(key, position(rows.len()))?;
        rows.push(row);
        hits.push(1);
    }

    for mut stream in streams {
        let mut counted = HashTable::from_config(config);
        while let Some(row) = stream.try_next()? {
            let key = id.evaluate(&row);
            if key.is_unknown() || counted.get(&key)?.is_some() {
                continue;
            }
            let Some(payload) = seen.get(&key)?.cloned() else {
                continue;
            };
            hits[index_of(&payload)?] += 1;
            counted.put(key, Value::Null)?;
        }
        counted.drop_table();
    }
    seen.drop_table();

    let max = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
    let out: Vec<AnnotatedValue> = rows
        .into_iter()
        .zip(hits)
        .filter(|(_, n)| *n == wanted)
        .map(|(row, _)| row)
        .take(max)
        .collect();
    tracing::debug!(streams = wanted, rows = out.len(), "execution.intersect");
    Ok(out)
}
