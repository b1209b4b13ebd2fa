//! Rows flowing through execution operators.
use std::collections::BTreeMap;

use super::Value;

/// A value plus the per-alias metadata and cover values attached by scans.
///
/// Covering scans store index key values under the string form of the covered
/// expression; evaluating that expression later reads the cover instead of the
/// document.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotatedValue {
    value: Value,
    meta: BTreeMap<String, Value>,
    covers: BTreeMap<String, Value>,
}

impl AnnotatedValue {
    /// Wraps a plain value with no metadata.
    pub fn new(value: Value) -> Self {
        Self {
            value,
            meta: BTreeMap::new(),
            covers: BTreeMap::new(),
        }
    }

    /// Row for a single fetched document bound to `alias`.
    pub fn for_document(alias: &str, id: impl Into<Value>, document: Value) -> Self {
        let mut row = Self::new(Value::Object(BTreeMap::new()));
        row.value.set_field(alias, document);
        let mut meta = Value::Object(BTreeMap::new());
        meta.set_field("id", id.into());
        row.meta.insert(alias.to_owned(), meta);
        row
    }

    /// Row produced by a covering scan: no document, only covers and the key.
    pub fn for_cover(alias: &str, id: impl Into<Value>) -> Self {
        let mut row = Self::new(Value::Object(BTreeMap::new()));
        let mut meta = Value::Object(BTreeMap::new());
        meta.set_field("id", id.into());
        row.meta.insert(alias.to_owned(), meta);
        row
    }

    /// The underlying value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Mutable access to the underlying value.
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// Consumes the row and returns its value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Metadata object for `alias`, `MISSING` when none was attached.
    pub fn meta(&self, alias: &str) -> &Value {
        static MISSING: Value = Value::Missing;
        self.meta.get(alias).unwrap_or(&MISSING)
    }

    /// Attaches metadata for `alias`.
    pub fn set_meta(&mut self, alias: impl Into<String>, meta: Value) {
        self.meta.insert(alias.into(), meta);
    }

    /// All cover values keyed by expression string.
    pub fn covers(&self) -> &BTreeMap<String, Value> {
        &self.covers
    }

    /// Cover value for an expression string.
    pub fn get_cover(&self, key: &str) -> Option<&Value> {
        self.covers.get(key)
    }

    /// Records a cover value.
    pub fn set_cover(&mut self, key: impl Into<String>, value: Value) {
        self.covers.insert(key.into(), value);
    }

    /// Copies every cover of `other` into this row.
    pub fn copy_covers(&mut self, other: &AnnotatedValue) {
        for (k, v) in &other.covers {
            self.covers.insert(k.clone(), v.clone());
        }
    }

    /// Combines a join partner into this row: fields, metadata and covers of
    /// `other` are added, overwriting on conflict.
    pub fn merge(&mut self, other: &AnnotatedValue) {
        if let Value::Object(fields) = &other.value {
            for (k, v) in fields {
                self.value.set_field(k.clone(), v.clone());
            }
        }
        for (k, v) in &other.meta {
            self.meta.insert(k.clone(), v.clone());
        }
        self.copy_covers(other);
    }
}

impl From<Value> for AnnotatedValue {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}
