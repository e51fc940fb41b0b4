//! Error types for the bucket coordinator.
use std::fmt;

/// Unified error type for coordinator operations.
///
/// `Resolving` and `Exhausted` are rate-limit signals, not defects: the
/// caller is expected to catch them and retry after a backoff of its own
/// choosing. `Store` wraps an infrastructure failure in the shared store
/// and is propagated as-is — there is no meaningful local recovery and the
/// coordinator never retries internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError<E> {
    /// Another caller holds the resolving lock for this route's bucket.
    Resolving { route: String },
    /// The bucket, or the global per-second ceiling, has no budget left.
    Exhausted { bucket: String },
    /// The shared store failed.
    Store(E),
}

impl<E: fmt::Display> fmt::Display for CoordinatorError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolving { route } => {
                write!(f, "bucket for route '{}' is being resolved by another caller", route)
            }
            Self::Exhausted { bucket } => {
                write!(f, "rate limit exhausted for bucket '{}'", bucket)
            }
            Self::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CoordinatorError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> CoordinatorError<E> {
    /// True for both admission-denied variants (back off and retry).
    pub fn is_ratelimited(&self) -> bool {
        matches!(self, Self::Resolving { .. } | Self::Exhausted { .. })
    }

    /// Check if this error is a resolving-lock rejection.
    pub fn is_resolving(&self) -> bool {
        matches!(self, Self::Resolving { .. })
    }

    /// Check if this error is an exhausted-budget rejection.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Check if this error wraps a store failure.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Borrow the store error if present.
    pub fn as_store(&self) -> Option<&E> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }

    /// Extract the store error if present.
    pub fn into_store(self) -> Option<E> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}
