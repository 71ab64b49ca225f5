//! Coordination store abstraction.
//!
//! Quota and throttle state is shared across every caller and process using
//! the proxy pool, so it lives in an external TTL-capable key/value store
//! rather than in memory. This module defines the operations the pool needs
//! and ships an in-memory reference backend for single-process use and tests;
//! distributed deployments implement [`CoordinationStore`] over Redis or a
//! similar server.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreError;

/// Operations the proxy pool issues against the shared store.
///
/// Every write is append-or-expire only; the pool never asks for locks,
/// transactions, or compare-and-swap. Backends only need plain key TTLs,
/// list push/peek/trim, and glob-style key scans.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `key` with `value`, expiring after `ttl`.
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Return all live keys matching `pattern`, where `*` matches any run of
    /// characters (Redis `KEYS` semantics for the patterns this crate uses).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Push `value` onto the front of the list at `key`.
    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Read the list element at `index` (0 = most recently pushed), if any.
    async fn list_peek(&self, key: &str, index: usize) -> Result<Option<String>, StoreError>;

    /// Truncate the list at `key` to its first `len` elements.
    async fn list_trim(&self, key: &str, len: usize) -> Result<(), StoreError>;

    /// Delete the given keys. Missing keys are not an error.
    async fn delete(&self, keys: &[String]) -> Result<(), StoreError>;
}

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct StoreInner {
    values: HashMap<String, ValueEntry>,
    lists: HashMap<String, Vec<String>>,
}

/// In-memory [`CoordinationStore`] backend.
///
/// Suitable when all callers share one process; state does not survive a
/// restart and is invisible to other processes. Expired entries are dropped
/// lazily on scan.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(inner: &mut StoreInner) {
        let now = Instant::now();
        inner.values.retain(|_, entry| !entry.is_expired(now));
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);
        let mut keys: Vec<String> = inner
            .values
            .keys()
            .chain(inner.lists.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .insert(0, value.to_string());
        Ok(())
    }

    async fn list_peek(&self, key: &str, index: usize) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .lists
            .get(key)
            .and_then(|list| list.get(index))
            .cloned())
    }

    async fn list_trim(&self, key: &str, len: usize) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(list) = inner.lists.get_mut(key) {
            list.truncate(len);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for key in keys {
            inner.values.remove(key);
            inner.lists.remove(key);
        }
        Ok(())
    }
}

/// Match `text` against `pattern`, where `*` matches any (possibly empty)
/// run of characters. All other characters match literally.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut segments = pattern.split('*');

    // Text before the first `*` must anchor at the start.
    let first = segments.next().unwrap_or("");
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];

    let mut segments = segments.peekable();
    if segments.peek().is_none() {
        // No wildcard at all: the pattern is a literal key.
        return rest.is_empty();
    }

    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            // Final segment must anchor at the end.
            return segment.is_empty() || rest.ends_with(segment);
        }
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }
    true
}
