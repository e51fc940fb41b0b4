//! Rate-limit response headers.
//!
//! Header names follow the upstream API contract: bucket identity, numeric
//! limit and remaining, and a reset timestamp in fractional epoch seconds.
//! Lookup is case-insensitive because proxies and HTTP clients disagree on
//! header casing.

use std::collections::HashMap;

/// Upstream header carrying the bucket hash.
pub const BUCKET_HEADER: &str = "x-ratelimit-bucket";
/// Upstream header carrying the per-window limit.
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
/// Upstream header carrying the calls left in the current window.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
/// Upstream header carrying the window reset time (fractional epoch seconds).
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Case-insensitive view over a response's headers.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    map: HashMap<String, String>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.map.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for ResponseHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// The rate-limit fields extracted from one response.
///
/// `None` fields were absent or unparseable; extraction never fails once a
/// bucket identity is present.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitHeaders {
    /// Upstream-assigned bucket hash.
    pub bucket: String,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Window reset, absolute milliseconds since the Unix epoch.
    pub reset_epoch_ms: Option<u64>,
}

impl RateLimitHeaders {
    /// Extract the rate-limit fields, or `None` when the response carries
    /// no bucket identity (not every response is bucket-scoped).
    pub fn parse(headers: &ResponseHeaders) -> Option<Self> {
        let bucket = headers.get(BUCKET_HEADER)?.to_string();
        let limit = headers.get(LIMIT_HEADER).and_then(|v| v.parse().ok());
        let remaining = headers.get(REMAINING_HEADER).and_then(|v| v.parse().ok());
        let reset_epoch_ms = headers
            .get(RESET_HEADER)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| (secs * 1000.0) as u64);

        Some(Self { bucket, limit, remaining, reset_epoch_ms })
    }
}
