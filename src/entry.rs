//! The value type carried through the pipeline: a journal entry's fields plus
//! its two journal timestamps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A tagged-variant field value.
///
/// Formatters may replace an entry's flat `fields` mapping with an arbitrary
/// tree (e.g. `unmarshal` parsing a nested JSON blob), so this has to be able
/// to represent a mapping, a sequence, or a scalar -- not just a flat map of
/// strings. `Null` doubles as the drop sentinel (see [`Entry::is_dropped`]);
/// callers must not use it to mean "empty mapping".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Sequence(Vec<FieldValue>),
    Mapping(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn empty_mapping() -> Self {
        FieldValue::Mapping(BTreeMap::new())
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_owned())
    }
}

/// A single record read from the journal, possibly rewritten in place by
/// formatters.
///
/// An entry has no identity independent of its position within an
/// [`crate::chunk::InputChunk`] -- it is never looked up by id, only iterated
/// in order.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub fields: FieldValue,
    pub realtime_timestamp: u64,
    pub monotonic_timestamp: u64,
}

impl Entry {
    pub fn new(fields: FieldValue, realtime_timestamp: u64, monotonic_timestamp: u64) -> Self {
        Self {
            fields,
            realtime_timestamp,
            monotonic_timestamp,
        }
    }

    /// A formatter marks an entry dropped by setting `fields` to `Null`.
    /// This is distinct from an empty mapping, which is a legitimate (if
    /// useless) entry.
    pub fn is_dropped(&self) -> bool {
        matches!(self.fields, FieldValue::Null)
    }

    pub fn mark_dropped(&mut self) {
        self.fields = FieldValue::Null;
    }
}
