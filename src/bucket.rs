//! Bucket handles.
//!
//! A [`Bucket`] is the caller's ephemeral view of one upstream rate-limit
//! scope. It is either *resolved* (the upstream-assigned hash is known) or
//! *provisional* (keyed by `METHOD|route` until a response teaches us the
//! real hash). The shared store holds the authoritative counters; the
//! handle only caches the values observed by the current call.

use crate::route::Method;

/// Counter defaults before the upstream has reported anything.
pub(crate) const DEFAULT_LIMIT: u64 = 1;
pub(crate) const DEFAULT_REMAINING: u64 = 1;

/// One upstream rate-limit scope, as seen by a single in-flight call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucket {
    /// The upstream-assigned bucket hash is known.
    Resolved {
        /// Opaque hash assigned by the upstream service.
        hash: String,
        /// Max calls per window, as last observed.
        limit: u64,
        /// Calls left in the current window, as last observed.
        remaining: u64,
    },
    /// Stand-in for a route whose real hash has not been learned yet.
    ///
    /// The call that holds this handle owns the route's resolving lock;
    /// feeding the response headers back via
    /// [`BucketCoordinator::update`](crate::BucketCoordinator::update)
    /// releases it.
    Provisional {
        method: Method,
        /// Normalized route (see [`normalize_route`](crate::normalize_route)).
        route: String,
        limit: u64,
        remaining: u64,
    },
}

impl Bucket {
    pub(crate) fn resolved(hash: impl Into<String>) -> Self {
        Bucket::Resolved {
            hash: hash.into(),
            limit: DEFAULT_LIMIT,
            remaining: DEFAULT_REMAINING,
        }
    }

    pub(crate) fn provisional(method: Method, route: impl Into<String>) -> Self {
        Bucket::Provisional {
            method,
            route: route.into(),
            limit: DEFAULT_LIMIT,
            remaining: DEFAULT_REMAINING,
        }
    }

    /// Identity of this bucket: the upstream hash, or `METHOD|route` for a
    /// provisional handle.
    pub fn id(&self) -> String {
        match self {
            Bucket::Resolved { hash, .. } => hash.clone(),
            Bucket::Provisional { method, route, .. } => format!("{method}|{route}"),
        }
    }

    /// Max calls per window, as last observed by this handle.
    pub fn limit(&self) -> u64 {
        match self {
            Bucket::Resolved { limit, .. } | Bucket::Provisional { limit, .. } => *limit,
        }
    }

    /// Calls left in the current window, as last observed by this handle.
    pub fn remaining(&self) -> u64 {
        match self {
            Bucket::Resolved { remaining, .. } | Bucket::Provisional { remaining, .. } => {
                *remaining
            }
        }
    }

    /// True if the real upstream hash is not known yet.
    pub fn is_provisional(&self) -> bool {
        matches!(self, Bucket::Provisional { .. })
    }
}
