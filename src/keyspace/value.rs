//! The value types a key can hold.

use std::time::SystemTime;

use bytes::Bytes;

/// One entry in a stream's append-only log (§3, XADD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// The `(milliseconds, sequence)` ID, kept as a tuple so ordering is a plain `<`.
    pub id: (u64, u64),
    pub field: Bytes,
    pub value: Bytes,
}

/// Everything a key can be bound to.
#[derive(Debug, Clone)]
pub enum StoredValue {
    String(StringValue),
    Stream(StreamValue),
}

#[derive(Debug, Clone)]
pub struct StringValue {
    pub data: Bytes,
    pub created_at: SystemTime,
    pub expiry_at: Option<SystemTime>,
    /// The keyspace generation counter at the moment this value was stored, captured so a
    /// scheduled expiry timer can tell whether it is still looking at the value it was
    /// scheduled for or at a value that has since overwritten it (§4.2 / §9).
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct StreamValue {
    pub entries: Vec<StreamEntry>,
    pub created_at: SystemTime,
}

impl StoredValue {
    /// The name `TYPE` reports for this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            StoredValue::String(_) => "string",
            StoredValue::Stream(_) => "stream",
        }
    }
}
