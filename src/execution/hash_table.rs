//! Duplicate-preserving hash table used by join, nest and intersect operators.
//!
//! Entries live in one flat vector in insertion order. Each bucket stores the
//! head and tail index of its chain and every entry stores the index of the
//! next entry in the same bucket, so growing the table only relinks indexes.
use std::hash::{Hash, Hasher};

use xxhash_rust::xxh64::Xxh64;

use crate::config::{PlannerConfig, DEFAULT_HASH_TABLE_BUCKETS};
use crate::error::HashTableError;
use crate::value::Value;

type Result<T> = std::result::Result<T, HashTableError>;

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    head: Option<usize>,
    tail: Option<usize>,
}

#[derive(Debug)]
struct Entry {
    hash: u64,
    key: Value,
    payload: Value,
    next: Option<usize>,
}

/// Multimap from [`Value`] keys to payload values.
///
/// Keys compare by collation, so `Int(1)` and `Float(1.0)` are the same key.
/// Every `put` is retained; `get` followed by `get_next` returns the payloads
/// of all equal keys in insertion order. The table is not synchronized: a
/// `get` session belongs to one caller at a time.
#[derive(Debug)]
pub struct HashTable {
    buckets: Vec<Bucket>,
    entries: Vec<Entry>,
    /// Entry returned by the last `get`/`get_next`.
    current: Option<usize>,
    /// Next entry for `iterate`.
    scan_pos: usize,
    dropped: bool,
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HashTable {
    /// Empty table with the default bucket count.
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_HASH_TABLE_BUCKETS)
    }

    /// Empty table sized by `hash_table_initial_buckets`.
    pub fn from_config(config: &PlannerConfig) -> Self {
        Self::with_buckets(config.hash_table_initial_buckets)
    }

    /// Empty table with at least `buckets` buckets, rounded up to a power of two.
    pub fn with_buckets(buckets: usize) -> Self {
        let buckets = buckets.max(1).next_power_of_two();
        Self {
            buckets: vec![Bucket::default(); buckets],
            entries: Vec::new(),
            current: None,
            scan_pos: 0,
            dropped: false,
        }
    }

    /// Number of entries, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was put.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current bucket count; zero after [`drop_table`](Self::drop_table).
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Appends `(key, payload)`; equal keys are never merged.
    ///
    /// The table doubles once it holds more entries than buckets.
    pub fn put(&mut self, key: Value, payload: Value) -> Result<()> {
        self.check_live()?;
        self.entries
            .try_reserve(1)
            .map_err(|_| HashTableError::Alloc {
                requested: self.entries.len() + 1,
            })?;
        let hash = hash_key(&key);
        let idx = self.entries.len();
        self.entries.push(Entry {
            hash,
            key,
            payload,
            next: None,
        });
        self.link(idx);
        if self.entries.len() > self.buckets.len() {
            self.grow()?;
        }
        Ok(())
    }

    /// Starts a lookup session and returns the first payload stored under `key`.
    pub fn get(&mut self, key: &Value) -> Result<Option<&Value>> {
        self.check_live()?;
        let hash = hash_key(key);
        let head = self.buckets[self.bucket_of(hash)].head;
        self.current = self.find_from(head, hash, key);
        Ok(self.current.map(|idx| &self.entries[idx].payload))
    }

    /// Next payload for the key of the current session, `None` once exhausted.
    pub fn get_next(&mut self) -> Result<Option<&Value>> {
        self.check_live()?;
        let Some(cur) = self.current else {
            return Ok(None);
        };
        let entry = &self.entries[cur];
        self.current = self.find_from(entry.next, entry.hash, &entry.key);
        Ok(self.current.map(|idx| &self.entries[idx].payload))
    }

    /// Full scan in insertion order, one entry per call. The scan cursor is
    /// independent of the lookup session.
    pub fn iterate(&mut self) -> Result<Option<(&Value, &Value)>> {
        self.check_live()?;
        let Some(entry) = self.entries.get(self.scan_pos) else {
            return Ok(None);
        };
        self.scan_pos += 1;
        Ok(Some((&entry.key, &entry.payload)))
    }

    /// Restarts [`iterate`](Self::iterate) from the first entry.
    pub fn reset_iterate(&mut self) {
        self.scan_pos = 0;
    }

    /// Borrowing iterator over `(key, payload)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> + '_ {
        self.entries.iter().map(|e| (&e.key, &e.payload))
    }

    /// Releases all storage. Any later use returns [`HashTableError::Dropped`].
    pub fn drop_table(&mut self) {
        self.buckets = Vec::new();
        self.entries = Vec::new();
        self.current = None;
        self.scan_pos = 0;
        self.dropped = true;
    }

    fn check_live(&self) -> Result<()> {
        if self.dropped {
            return Err(HashTableError::Dropped);
        }
        Ok(())
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn find_from(&self, mut pos: Option<usize>, hash: u64, key: &Value) -> Option<usize> {
        while let Some(idx) = pos {
            let entry = &self.entries[idx];
            if entry.hash == hash && entry.key == *key {
                return Some(idx);
            }
            pos = entry.next;
        }
        None
    }

    // Appends entry `idx` to the tail of its bucket chain.
    fn link(&mut self, idx: usize) {
        let b = self.bucket_of(self.entries[idx].hash);
        self.entries[idx].next = None;
        match self.buckets[b].tail {
            Some(tail) => self.entries[tail].next = Some(idx),
            None => self.buckets[b].head = Some(idx),
        }
        self.buckets[b].tail = Some(idx);
    }

    fn grow(&mut self) -> Result<()> {
        let from = self.buckets.len();
        let to = from * 2;
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(to)
            .map_err(|_| HashTableError::Alloc { requested: to })?;
        buckets.resize(to, Bucket::default());
        self.buckets = buckets;
        // Relinking in index order keeps every chain in insertion order.
        for idx in 0..self.entries.len() {
            self.link(idx);
        }
        tracing::debug!(from, to, entries = self.entries.len(), "hash_table.grow");
        Ok(())
    }
}

fn hash_key(key: &Value) -> u64 {
    let mut hasher = Xxh64::new(0);
    key.hash(&mut hasher);
    hasher.finish()
}
