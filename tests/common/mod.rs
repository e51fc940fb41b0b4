#![allow(dead_code)] // each test binary uses its own subset of helpers

use routebucket::{Clock, ResponseHeaders};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock pinned by the test, so the global per-second counter key is
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn at_secs(secs: u64) -> Self {
        Self { millis: Arc::new(AtomicU64::new(secs * 1000)) }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("after epoch").as_millis() as u64
}

/// Response headers as the upstream sends them after a bucket-scoped call.
pub fn bucket_headers(hash: &str, limit: u64, remaining: u64, reset_ms: u64) -> ResponseHeaders {
    [
        ("X-RateLimit-Bucket".to_string(), hash.to_string()),
        ("X-RateLimit-Limit".to_string(), limit.to_string()),
        ("X-RateLimit-Remaining".to_string(), remaining.to_string()),
        ("X-RateLimit-Reset".to_string(), format!("{:.3}", reset_ms as f64 / 1000.0)),
    ]
    .into_iter()
    .collect()
}
