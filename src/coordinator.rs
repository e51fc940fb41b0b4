//! The bucket coordinator: resolve, call, update.
//!
//! One coordinator instance is shared by every caller in a process; all
//! cross-process correctness comes from the store's atomic operations, so
//! the coordinator holds no authoritative state of its own.
//!
//! Semantics:
//! - `resolve` maps `(method, endpoint)` to a [`Bucket`] handle, taking the
//!   resolving lock when the route's real hash is unknown so concurrent
//!   callers fail fast instead of bursting an unmeasured endpoint.
//! - `call` consumes one unit of budget immediately before the network
//!   call. Denials surface as [`CoordinatorError`] rate-limit signals;
//!   the coordinator never retries or sleeps on the caller's behalf.
//! - `update` reconciles the store with the response headers afterwards
//!   and, for a provisional bucket, learns the real hash and releases the
//!   lock.
//!
//! Invariants:
//! - At most `remaining` admission checks succeed per window, however many
//!   callers race.
//! - A persisted `remaining` never moves upward within a window on account
//!   of a stale caller's headers.
//! - Exactly one caller at a time may resolve a given unknown route.

use crate::bucket::Bucket;
use crate::clock::{Clock, SystemClock};
use crate::error::CoordinatorError;
use crate::headers::{RateLimitHeaders, ResponseHeaders};
use crate::route::{default_scopes, normalize_route, Method, RouteScope};
use crate::store::{BucketStore, Expiry};
use std::time::Duration;

/// Tuning for a [`BucketCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Prefix for every tracking key in the shared store.
    pub prefix: String,
    /// TTL on the route→hash mapping and limit keys. Buckets the upstream
    /// stops reporting simply age out; there is no explicit deletion.
    pub mapping_ttl: Duration,
    /// Upstream's global ceiling, in calls per wall-clock second.
    ///
    /// Enforced by counting calls in per-second keys — a deliberate
    /// low-precision approximation of a sliding window, acceptable while
    /// the upstream ceiling is generous. Revisit with a real sliding
    /// window if the upstream tightens it.
    pub global_per_second: u64,
    /// TTL on the resolving lock, bounding how long a crashed resolver can
    /// block a route.
    pub lock_ttl: Duration,
    /// Fallback TTL for a remaining counter created before any reset
    /// timestamp has been observed for its window.
    pub default_window: Duration,
    /// Resource families the upstream rate-limits per top-level resource.
    pub scopes: Vec<RouteScope>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            prefix: "discord:ratelimit:bucket".into(),
            mapping_ttl: Duration::from_secs(86_400),
            global_per_second: 50,
            lock_ttl: Duration::from_secs(60),
            default_window: Duration::from_secs(60),
            scopes: default_scopes(),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_mapping_ttl(mut self, ttl: Duration) -> Self {
        self.mapping_ttl = ttl;
        self
    }

    pub fn with_global_per_second(mut self, ceiling: u64) -> Self {
        self.global_per_second = ceiling;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Replace the scoped-family list (see [`RouteScope`]).
    pub fn with_scopes(mut self, scopes: Vec<RouteScope>) -> Self {
        self.scopes = scopes;
        self
    }
}

/// Coordinates shared rate-limit buckets across concurrent callers.
///
/// Generic over the store backend and (for tests) the wall clock.
#[derive(Debug, Clone)]
pub struct BucketCoordinator<S, C = SystemClock> {
    store: S,
    clock: C,
    config: CoordinatorConfig,
}

impl<S: BucketStore> BucketCoordinator<S, SystemClock> {
    /// Coordinator with default configuration over `store`.
    pub fn new(store: S) -> Self {
        Self::with_config(store, CoordinatorConfig::default())
    }

    pub fn with_config(store: S, config: CoordinatorConfig) -> Self {
        Self { store, clock: SystemClock, config }
    }
}

impl<S: BucketStore, C: Clock> BucketCoordinator<S, C> {
    /// Coordinator with an injected clock. Production code wants
    /// [`BucketCoordinator::new`]; this exists so tests can pin the
    /// wall-clock second the global counter partitions on.
    pub fn with_clock(store: S, config: CoordinatorConfig, clock: C) -> Self {
        Self { store, clock, config }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn mapping_key(&self, method: Method, route: &str) -> String {
        format!("{}:{}|{}", self.config.prefix, method, route)
    }

    fn lock_key(mapping_key: &str) -> String {
        format!("{mapping_key}:lock")
    }

    fn limit_key(&self, hash: &str) -> String {
        format!("{}:{}:limit", self.config.prefix, hash)
    }

    fn remaining_key(&self, hash: &str) -> String {
        format!("{}:{}:remaining", self.config.prefix, hash)
    }

    fn global_key(&self) -> String {
        format!("{}:global:{}", self.config.prefix, self.clock.now_millis() / 1000)
    }

    /// Resolve the bucket handle for an outbound `(method, endpoint)` call.
    ///
    /// Returns a resolved handle when the route's hash is known, or a
    /// provisional handle (and takes the resolving lock) when it is not.
    ///
    /// # Errors
    /// [`CoordinatorError::Resolving`] when another caller holds the
    /// resolving lock — back off rather than burst an unmeasured endpoint.
    pub async fn resolve(
        &self,
        method: Method,
        endpoint: &str,
    ) -> Result<Bucket, CoordinatorError<S::Error>> {
        use crate::store::Resolution;

        let route = normalize_route(endpoint, &self.config.scopes);
        let mapping_key = self.mapping_key(method, &route);
        let lock_key = Self::lock_key(&mapping_key);

        match self
            .store
            .resolve_hash(&mapping_key, &lock_key, self.config.lock_ttl)
            .await
            .map_err(CoordinatorError::Store)?
        {
            Resolution::Resolved(hash) => Ok(Bucket::resolved(hash)),
            Resolution::Resolving => {
                tracing::debug!(%method, %route, "route is mid-resolution; rejecting");
                Err(CoordinatorError::Resolving { route })
            }
            Resolution::Unresolved => {
                tracing::debug!(%method, %route, "no bucket hash known; issuing provisional handle");
                Ok(Bucket::provisional(method, route))
            }
        }
    }

    /// Consume one unit of the bucket's budget, immediately before the
    /// network call.
    ///
    /// Provisional buckets pass unconditionally: nothing has been measured
    /// for them yet, and the response to this very call is what teaches the
    /// store their real hash and counters. Resolved buckets go through the
    /// store's atomic check-and-decrement, which also enforces the global
    /// per-second ceiling; on success the handle's cached counters take the
    /// store's post-decrement values (other callers may have moved them).
    ///
    /// # Errors
    /// [`CoordinatorError::Exhausted`] when the bucket or the global
    /// ceiling has no budget; no network I/O should follow.
    pub async fn call(&self, bucket: &mut Bucket) -> Result<(), CoordinatorError<S::Error>> {
        let hash = match bucket {
            Bucket::Provisional { .. } => return Ok(()),
            Bucket::Resolved { hash, .. } => hash.clone(),
        };

        let reply = self
            .store
            .consume(
                &self.remaining_key(&hash),
                &self.limit_key(&hash),
                &self.global_key(),
                self.config.global_per_second,
                self.config.default_window,
            )
            .await
            .map_err(CoordinatorError::Store)?;

        match reply {
            Some((new_remaining, new_limit)) => {
                if let Bucket::Resolved { limit, remaining, .. } = bucket {
                    *remaining = new_remaining;
                    *limit = new_limit;
                }
                Ok(())
            }
            None => {
                tracing::debug!(bucket = %hash, "admission denied: no budget in window");
                Err(CoordinatorError::Exhausted { bucket: hash })
            }
        }
    }

    /// Reconcile the store with a response's rate-limit headers.
    ///
    /// No-op when the response carries no bucket identity. Otherwise the
    /// route→hash mapping, limit, and remaining keys are refreshed; for a
    /// provisional bucket the mapping write is set-if-absent (two callers
    /// may race to learn the same route) and the resolving lock is
    /// released. Missing or malformed numeric headers are skipped, never
    /// an error.
    ///
    /// # Errors
    /// Only on store failure.
    pub async fn update(
        &self,
        bucket: &mut Bucket,
        headers: &ResponseHeaders,
        method: Method,
        endpoint: &str,
    ) -> Result<(), CoordinatorError<S::Error>> {
        let Some(reported) = RateLimitHeaders::parse(headers) else {
            return Ok(());
        };

        let route = normalize_route(endpoint, &self.config.scopes);
        let mapping_key = self.mapping_key(method, &route);
        let mapping_ttl = Some(Expiry::Ttl(self.config.mapping_ttl));
        let limit_key = self.limit_key(&reported.bucket);
        let remaining_key = self.remaining_key(&reported.bucket);

        match bucket {
            Bucket::Resolved { limit, remaining, .. } => {
                // Unconditional: lets the upstream migrate a route to a new
                // bucket hash.
                self.store
                    .set(&mapping_key, &reported.bucket, mapping_ttl)
                    .await
                    .map_err(CoordinatorError::Store)?;

                if let Some(reported_limit) = reported.limit {
                    let reported_limit = reported_limit.max(1);
                    self.store
                        .set(&limit_key, &reported_limit.to_string(), mapping_ttl)
                        .await
                        .map_err(CoordinatorError::Store)?;
                    *limit = reported_limit;
                }

                if let (Some(reported_remaining), Some(reset)) =
                    (reported.remaining, reported.reset_epoch_ms)
                {
                    // Clamp against the handle's post-decrement view so a
                    // slow caller's stale headers cannot push the stored
                    // value back up within the window.
                    let clamped = reported_remaining.min(*remaining);
                    self.store
                        .set(&remaining_key, &clamped.to_string(), Some(Expiry::AtMillis(reset)))
                        .await
                        .map_err(CoordinatorError::Store)?;
                    *remaining = clamped;
                }
            }
            Bucket::Provisional { limit, remaining, .. } => {
                let learned = self
                    .store
                    .set_if_absent(&mapping_key, &reported.bucket, mapping_ttl)
                    .await
                    .map_err(CoordinatorError::Store)?;
                if learned {
                    tracing::debug!(%method, %route, bucket = %reported.bucket, "learned bucket hash for route");
                }

                if let Some(reported_limit) = reported.limit {
                    let reported_limit = reported_limit.max(1);
                    self.store
                        .set(&limit_key, &reported_limit.to_string(), mapping_ttl)
                        .await
                        .map_err(CoordinatorError::Store)?;
                    *limit = reported_limit;
                }

                if let (Some(reported_remaining), Some(reset)) =
                    (reported.remaining, reported.reset_epoch_ms)
                {
                    // The provisional 1/1 defaults are placeholders, not
                    // observations; the headers are this window's first
                    // measurement and are persisted as reported.
                    self.store
                        .set(
                            &remaining_key,
                            &reported_remaining.to_string(),
                            Some(Expiry::AtMillis(reset)),
                        )
                        .await
                        .map_err(CoordinatorError::Store)?;
                    *remaining = reported_remaining;
                }

                self.store
                    .del(&Self::lock_key(&mapping_key))
                    .await
                    .map_err(CoordinatorError::Store)?;
            }
        }

        Ok(())
    }
}
