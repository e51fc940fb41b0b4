//! Abstract storage interface for bucket state.
//!
//! The shared store is the single source of truth for bucket counters. The
//! trait models a string key-value store with expiries plus the two atomic
//! server-side operations the coordinator depends on for cross-process
//! correctness: [`resolve_hash`](BucketStore::resolve_hash) and
//! [`consume`](BucketStore::consume). A backend must run each of those as
//! one indivisible step (a Lua script on Redis, a mutex-serialized closure
//! in memory) — the coordinator itself performs no locking.

use async_trait::async_trait;
use std::time::Duration;

/// How a written key should expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Relative time-to-live.
    Ttl(Duration),
    /// Absolute deadline, milliseconds since the Unix epoch.
    AtMillis(u64),
}

/// Outcome of the atomic resolve operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The mapping key held a learned bucket hash.
    Resolved(String),
    /// Another caller holds the resolving lock for this route.
    Resolving,
    /// No hash is known; the resolving lock was acquired for this caller
    /// as a side effect.
    Unresolved,
}

/// Storage backend for bucket tracking keys.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch a key's value.
    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Write a key, replacing any previous value and expiry.
    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Expiry>,
    ) -> Result<(), Self::Error>;

    /// Write a key only if absent. Returns `true` if this call set it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Expiry>,
    ) -> Result<bool, Self::Error>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), Self::Error>;

    /// Atomically resolve a route's bucket hash.
    ///
    /// * mapping key present → [`Resolution::Resolved`]
    /// * lock key present → [`Resolution::Resolving`]
    /// * neither → acquire the lock (with `lock_ttl`, so a crashed resolver
    ///   cannot wedge the route) and return [`Resolution::Unresolved`]
    async fn resolve_hash(
        &self,
        mapping_key: &str,
        lock_key: &str,
        lock_ttl: Duration,
    ) -> Result<Resolution, Self::Error>;

    /// Atomically consume one unit of a bucket's budget.
    ///
    /// Semantics, executed as a single step:
    /// 1. `limit` = value of `limit_key`, defaulting to 1 when unset.
    /// 2. `remaining` = value of `remaining_key`; when unset (window
    ///    expired or never observed) it defaults to `limit`.
    /// 3. `remaining == 0` → `None`, nothing written.
    /// 4. Increment `global_key` (expiring in ~2 s; the key is already
    ///    partitioned by wall-clock second). Post-increment value above
    ///    `global_limit` → `None`.
    /// 5. Decrement and write back `remaining`, keeping its existing
    ///    expiry; a key created here gets `window_ttl` so it cannot
    ///    outlive a window whose reset we never learned.
    ///
    /// Returns the post-decrement `(remaining, limit)`.
    async fn consume(
        &self,
        remaining_key: &str,
        limit_key: &str,
        global_key: &str,
        global_limit: u64,
        window_ttl: Duration,
    ) -> Result<Option<(u64, u64)>, Self::Error>;
}

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_ms: Option<u64>,
}

/// In-memory store: single-process stand-in and test double.
///
/// One mutex serializes every operation, which trivially gives the two
/// script operations their atomicity. Expiry is lazy (checked on read).
/// Clones share the same map, so cloning models multiple workers hitting
/// one shared store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBucketStore {
    data: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms() -> u64 {
        u64::try_from(
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis(),
        )
        .unwrap_or(u64::MAX)
    }

    fn expiry_deadline(expiry: Option<Expiry>) -> Option<u64> {
        match expiry {
            Some(Expiry::Ttl(ttl)) => {
                Some(Self::now_ms().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)))
            }
            Some(Expiry::AtMillis(at)) => Some(at),
            None => None,
        }
    }

    fn live_value(guard: &mut HashMap<String, Entry>, key: &str) -> Option<String> {
        let expired = match guard.get(key) {
            Some(entry) => entry.expires_at_ms.is_some_and(|at| at <= Self::now_ms()),
            None => return None,
        };
        if expired {
            guard.remove(key);
            return None;
        }
        guard.get(key).map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let mut guard = self.data.lock().unwrap();
        Ok(Self::live_value(&mut guard, key))
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Expiry>,
    ) -> Result<(), Self::Error> {
        let mut guard = self.data.lock().unwrap();
        guard.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at_ms: Self::expiry_deadline(expiry) },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Expiry>,
    ) -> Result<bool, Self::Error> {
        let mut guard = self.data.lock().unwrap();
        if Self::live_value(&mut guard, key).is_some() {
            return Ok(false);
        }
        guard.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at_ms: Self::expiry_deadline(expiry) },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), Self::Error> {
        let mut guard = self.data.lock().unwrap();
        guard.remove(key);
        Ok(())
    }

    async fn resolve_hash(
        &self,
        mapping_key: &str,
        lock_key: &str,
        lock_ttl: Duration,
    ) -> Result<Resolution, Self::Error> {
        let mut guard = self.data.lock().unwrap();

        if let Some(hash) = Self::live_value(&mut guard, mapping_key) {
            return Ok(Resolution::Resolved(hash));
        }
        if Self::live_value(&mut guard, lock_key).is_some() {
            return Ok(Resolution::Resolving);
        }
        guard.insert(
            lock_key.to_string(),
            Entry {
                value: "1".to_string(),
                expires_at_ms: Self::expiry_deadline(Some(Expiry::Ttl(lock_ttl))),
            },
        );
        Ok(Resolution::Unresolved)
    }

    async fn consume(
        &self,
        remaining_key: &str,
        limit_key: &str,
        global_key: &str,
        global_limit: u64,
        window_ttl: Duration,
    ) -> Result<Option<(u64, u64)>, Self::Error> {
        let mut guard = self.data.lock().unwrap();

        let limit = Self::live_value(&mut guard, limit_key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1);
        let stored_remaining = Self::live_value(&mut guard, remaining_key);
        let remaining = stored_remaining
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(limit);

        if remaining == 0 {
            return Ok(None);
        }

        let global = Self::live_value(&mut guard, global_key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        guard.insert(
            global_key.to_string(),
            Entry {
                value: global.to_string(),
                expires_at_ms: Self::expiry_deadline(Some(Expiry::Ttl(Duration::from_secs(2)))),
            },
        );
        if global > global_limit {
            return Ok(None);
        }

        let remaining = remaining - 1;
        let expires_at_ms = match stored_remaining {
            // Keep the window's absolute expiry.
            Some(_) => guard.get(remaining_key).and_then(|entry| entry.expires_at_ms),
            None => Self::expiry_deadline(Some(Expiry::Ttl(window_ttl))),
        };
        guard.insert(
            remaining_key.to_string(),
            Entry { value: remaining.to_string(), expires_at_ms },
        );

        Ok(Some((remaining, limit)))
    }
}
