#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # routebucket
//!
//! Distributed rate-limit bucket coordination for Discord-style APIs.
//!
//! Many worker processes share one rate-limit budget per upstream "bucket".
//! This crate tracks those buckets in a shared key-value store and gates
//! outbound calls with atomic check-and-decrement operations, so concurrent
//! callers can never over-commit a window — with no in-process coordination.
//!
//! ## Features
//!
//! - **Bucket resolution** with per-resource endpoint grouping and a
//!   resolving lock that prevents thundering herds on unknown endpoints
//! - **Atomic admission checks** (per-bucket remaining + global per-second
//!   ceiling) executed server-side in the store
//! - **Header-driven reconciliation** that learns real bucket hashes from
//!   responses and keeps `remaining` monotonically non-increasing within a
//!   window
//! - **Pluggable storage** via the [`BucketStore`] trait, with an in-memory
//!   implementation for tests and a Redis backend in `routebucket-redis`
//!
//! ## Quick Start
//!
//! ```rust
//! use routebucket::{BucketCoordinator, InMemoryBucketStore, Method, ResponseHeaders};
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = BucketCoordinator::new(InMemoryBucketStore::new());
//!
//!     // Before the network call: resolve the bucket and consume one unit.
//!     let mut bucket =
//!         coordinator.resolve(Method::Get, "channels/123/messages").await.unwrap();
//!     coordinator.call(&mut bucket).await.unwrap();
//!
//!     // ... perform the HTTP request, then feed the response headers back:
//!     let headers: ResponseHeaders =
//!         [("X-RateLimit-Bucket", "abcd"), ("X-RateLimit-Limit", "5")].into_iter().collect();
//!     coordinator
//!         .update(&mut bucket, &headers, Method::Get, "channels/123/messages")
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod bucket;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod headers;
pub mod route;
pub mod store;

// Re-exports
pub use bucket::Bucket;
pub use clock::{Clock, SystemClock};
pub use coordinator::{BucketCoordinator, CoordinatorConfig};
pub use error::CoordinatorError;
pub use headers::{RateLimitHeaders, ResponseHeaders};
pub use route::{normalize_route, Method, RouteScope};
pub use store::{BucketStore, Expiry, InMemoryBucketStore, Resolution};
