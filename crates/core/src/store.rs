//! Crawl-scoped argument caches.
//!
//! Two maps cooperate to keep large argument values out of the request queue
//! and off the wire:
//!
//! - [`LocalValueStore`] holds fingerprint → original value, so a queued
//!   request only carries the fingerprint string.
//! - [`RemoteKeyStore`] holds fingerprint → key issued by the render service,
//!   meaning the service already caches the value and a reference suffices.
//!
//! Both are shared across all in-flight requests of a crawl, so they are
//! backed by `DashMap`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;

/// Fingerprint → original argument value, for the lifetime of the crawl.
///
/// A fingerprint maps to exactly one value: inserting the same fingerprint
/// again is a no-op, which keeps concurrent substitution of the same value
/// idempotent.
#[derive(Debug, Default)]
pub struct LocalValueStore {
    values: DashMap<String, Value>,
}

impl LocalValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under its fingerprint. Re-inserting an existing
    /// fingerprint leaves the stored value untouched; a conflicting value
    /// for the same fingerprint breaks the one-value-per-fingerprint
    /// invariant and is only logged.
    pub fn insert(&self, fingerprint: &str, value: Value) {
        match self.values.entry(fingerprint.to_string()) {
            Entry::Occupied(existing) => {
                if *existing.get() != value {
                    tracing::warn!(fingerprint, "conflicting value for an existing fingerprint; keeping the first");
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
    }

    /// Look up the original value for a fingerprint.
    pub fn get(&self, fingerprint: &str) -> Option<Value> {
        self.values.get(fingerprint).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Fingerprint → key assigned by the render service.
///
/// An entry means "the service already holds this value"; it is removed when
/// a cache-miss response proves the key stale.
#[derive(Debug, Default)]
pub struct RemoteKeyStore {
    keys: DashMap<String, String>,
}

impl RemoteKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, fingerprint: &str, key: String) {
        self.keys.insert(fingerprint.to_string(), key);
    }

    pub fn get(&self, fingerprint: &str) -> Option<String> {
        self.keys.get(fingerprint).map(|k| k.value().clone())
    }

    /// Drop a stale fingerprint. Returns the removed key, if any.
    pub fn remove(&self, fingerprint: &str) -> Option<String> {
        self.keys.remove(fingerprint).map(|(_, k)| k)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
