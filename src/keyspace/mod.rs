//! The shared, in-memory keyspace.
//!
//! A single `RwLock<HashMap<...>>` backs every key (§4.2: one lock over the whole map,
//! no per-shard striping — this is a teaching server, not a throughput target). Callers
//! always reach a `Keyspace` through an `Arc`, since expiry timers and replica ingestion
//! both need to outlive any one connection.

mod value;

pub use value::{StoredValue, StreamEntry, StreamValue, StringValue};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::errors::CommandError;

pub struct Keyspace {
    map: RwLock<HashMap<Bytes, StoredValue>>,
    /// Bumped on every write; a StringValue's `generation` field is a snapshot of this
    /// counter taken at write time, so a scheduled expiry timer can detect whether its
    /// target has since been overwritten (see `set` below).
    generation: AtomicU64,
}

impl Keyspace {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let guard = self.map.read().expect("keyspace lock poisoned");
        match guard.get(key) {
            Some(StoredValue::String(s)) => {
                if is_expired(s.expiry_at) {
                    None
                } else {
                    Some(s.data.clone())
                }
            }
            _ => None,
        }
    }

    /// Stores a string value, optionally with an absolute expiry. If `expiry_at` is
    /// already in the past this is rejected outright rather than silently storing an
    /// immediately-dead key (§4.2 edge case: PX/PXAT in the past is a command error, not
    /// a silent no-op).
    pub fn set(
        self: &Arc<Self>,
        key: Bytes,
        data: Bytes,
        expiry_at: Option<SystemTime>,
    ) -> Result<(), CommandError> {
        if let Some(at) = expiry_at {
            if at <= SystemTime::now() {
                return Err(CommandError::new("Expiration time is in the past"));
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let value = StringValue {
            data,
            created_at: SystemTime::now(),
            expiry_at,
            generation,
        };

        {
            let mut guard = self.map.write().expect("keyspace lock poisoned");
            guard.insert(key.clone(), StoredValue::String(value));
        }

        if let Some(at) = expiry_at {
            self.schedule_expiry(key, generation, at);
        }

        Ok(())
    }

    /// Inserts a value loaded from an RDB snapshot, bypassing the past-due rejection that
    /// `set` applies to live SET commands: a snapshot entry whose expiry has already
    /// elapsed by load time is simply dropped (it would be immediately invisible anyway),
    /// matching how a real server treats a stale key found on restart.
    pub fn load_entry(self: &Arc<Self>, key: Bytes, data: Bytes, expiry_at: Option<SystemTime>) {
        if is_expired(expiry_at) {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let value = StringValue {
            data,
            created_at: SystemTime::now(),
            expiry_at,
            generation,
        };
        {
            let mut guard = self.map.write().expect("keyspace lock poisoned");
            guard.insert(key.clone(), StoredValue::String(value));
        }
        if let Some(at) = expiry_at {
            self.schedule_expiry(key, generation, at);
        }
    }

    pub fn del(&self, keys: &[Bytes]) -> i64 {
        let mut guard = self.map.write().expect("keyspace lock poisoned");
        keys.iter().filter(|k| guard.remove(k.as_ref()).is_some()).count() as i64
    }

    /// Only the literal pattern `*` is supported (§4.2: KEYS is not a general glob
    /// matcher here), returning every live, non-expired key.
    pub fn keys(&self, pattern: &[u8]) -> Result<Vec<Bytes>, CommandError> {
        if pattern != b"*" {
            return Err(CommandError::new("KEYS error"));
        }
        let guard = self.map.read().expect("keyspace lock poisoned");
        Ok(guard
            .iter()
            .filter(|(_, v)| match v {
                StoredValue::String(s) => !is_expired(s.expiry_at),
                StoredValue::Stream(_) => true,
            })
            .map(|(k, _)| k.clone())
            .collect())
    }

    pub fn key_type(&self, key: &[u8]) -> &'static str {
        let guard = self.map.read().expect("keyspace lock poisoned");
        match guard.get(key) {
            Some(StoredValue::String(s)) if !is_expired(s.expiry_at) => "string",
            Some(StoredValue::Stream(_)) => "stream",
            _ => "none",
        }
    }

    /// Appends one entry to a stream, creating it if absent. `id` is the caller-parsed
    /// `(ms, seq)` pair; the command layer (`commands::streams::parse_id`) only accepts
    /// a literal `ms-seq` pair and rejects `ms-*`, so auto-sequence resolution is not
    /// supported anywhere in this server.
    ///
    /// Enforces: the ID must be strictly greater than the stream's last entry, and
    /// `0-0` is never a valid ID (§4.2, §9 — this server does NOT reproduce the
    /// off-by-one field/value pairing bug the original had; fields and values are paired
    /// straightforwardly as `(args[i], args[i+1])`).
    pub fn xadd(
        self: &Arc<Self>,
        key: Bytes,
        id: (u64, u64),
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<(u64, u64), CommandError> {
        if id == (0, 0) {
            return Err(CommandError::new(
                "The ID specified in XADD must be greater than 0-0",
            ));
        }

        let mut guard = self.map.write().expect("keyspace lock poisoned");
        match guard.get_mut(key.as_ref()) {
            Some(StoredValue::Stream(stream)) => {
                if let Some(last) = stream.entries.last() {
                    if id <= last.id {
                        return Err(CommandError::new(
                            "ERR The ID specified in XADD is equal or smaller than the target stream top item",
                        ));
                    }
                }
                for (field, value) in fields {
                    stream.entries.push(StreamEntry { id, field, value });
                }
                Ok(id)
            }
            Some(StoredValue::String(_)) => Err(CommandError::new(
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            )),
            None => {
                let entries = fields
                    .into_iter()
                    .map(|(field, value)| StreamEntry { id, field, value })
                    .collect();
                guard.insert(
                    key,
                    StoredValue::Stream(StreamValue {
                        entries,
                        created_at: SystemTime::now(),
                    }),
                );
                Ok(id)
            }
        }
    }

    /// Spawns a one-shot background thread that deletes `key` once `at` has elapsed,
    /// provided the key still holds the same generation of value it was scheduled for
    /// (§4.2/§9: a later SET on the same key must not be clobbered by an earlier timer).
    fn schedule_expiry(self: &Arc<Self>, key: Bytes, generation: u64, at: SystemTime) {
        let keyspace = Arc::clone(self);
        std::thread::spawn(move || {
            if let Ok(remaining) = at.duration_since(SystemTime::now()) {
                std::thread::sleep(remaining);
            }
            let mut guard = keyspace.map.write().expect("keyspace lock poisoned");
            if let Some(StoredValue::String(s)) = guard.get(key.as_ref()) {
                if s.generation == generation {
                    guard.remove(key.as_ref());
                }
            }
        });
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

fn is_expired(expiry_at: Option<SystemTime>) -> bool {
    matches!(expiry_at, Some(at) if at <= SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ks() -> Arc<Keyspace> {
        Arc::new(Keyspace::new())
    }

    #[test]
    fn set_then_get_round_trips() {
        let keyspace = ks();
        keyspace
            .set(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), None)
            .unwrap();
        assert_eq!(keyspace.get(b"foo"), Some(Bytes::from_static(b"bar")));
    }

    #[test]
    fn get_missing_key_is_none() {
        let keyspace = ks();
        assert_eq!(keyspace.get(b"missing"), None);
    }

    #[test]
    fn set_rejects_past_expiry() {
        let keyspace = ks();
        let past = SystemTime::now() - Duration::from_secs(5);
        let err = keyspace
            .set(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), Some(past))
            .unwrap_err();
        assert!(err.0.contains("Expiration time is in the past"));
    }

    #[test]
    fn expired_key_reads_as_missing_before_timer_fires() {
        let keyspace = ks();
        let soon = SystemTime::now() + Duration::from_millis(20);
        keyspace
            .set(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), Some(soon))
            .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(keyspace.get(b"foo"), None);
    }

    #[test]
    fn overwrite_after_scheduling_survives_original_timer() {
        let keyspace = ks();
        let soon = SystemTime::now() + Duration::from_millis(20);
        keyspace
            .set(Bytes::from_static(b"foo"), Bytes::from_static(b"first"), Some(soon))
            .unwrap();
        keyspace
            .set(Bytes::from_static(b"foo"), Bytes::from_static(b"second"), None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(keyspace.get(b"foo"), Some(Bytes::from_static(b"second")));
    }

    #[test]
    fn keys_rejects_non_wildcard_pattern() {
        let keyspace = ks();
        assert!(keyspace.keys(b"foo*").is_err());
    }

    #[test]
    fn type_reports_none_for_missing_key() {
        let keyspace = ks();
        assert_eq!(keyspace.key_type(b"nope"), "none");
    }

    #[test]
    fn xadd_creates_stream_and_enforces_strictly_increasing_ids() {
        let keyspace = ks();
        keyspace
            .xadd(
                Bytes::from_static(b"s"),
                (1, 1),
                vec![(Bytes::from_static(b"field"), Bytes::from_static(b"value"))],
            )
            .unwrap();
        assert_eq!(keyspace.key_type(b"s"), "stream");

        let err = keyspace.xadd(Bytes::from_static(b"s"), (1, 1), vec![]).unwrap_err();
        assert!(err.0.contains("equal or smaller"));
    }

    #[test]
    fn xadd_rejects_zero_zero() {
        let keyspace = ks();
        let err = keyspace.xadd(Bytes::from_static(b"s"), (0, 0), vec![]).unwrap_err();
        assert!(err.0.contains("greater than 0-0"));
    }

    #[test]
    fn load_entry_drops_already_expired_snapshot_rows() {
        let keyspace = ks();
        let past = SystemTime::now() - Duration::from_secs(5);
        keyspace.load_entry(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"), Some(past));
        assert_eq!(keyspace.get(b"foo"), None);
    }
}
