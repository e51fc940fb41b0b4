mod common;

use common::{bucket_headers, now_ms};
use routebucket::{
    BucketCoordinator, BucketStore, CoordinatorConfig, InMemoryBucketStore, Method,
    ResponseHeaders,
};

fn coordinator(
    store: InMemoryBucketStore,
) -> BucketCoordinator<InMemoryBucketStore> {
    BucketCoordinator::with_config(store, CoordinatorConfig::default().with_prefix("rl"))
}

#[tokio::test]
async fn fresh_endpoint_full_cycle() {
    let store = InMemoryBucketStore::new();
    let coordinator = coordinator(store.clone());
    let endpoint = "channels/123/messages";

    // First ever call: provisional handle with default counters, admitted
    // without a decrement.
    let mut bucket = coordinator.resolve(Method::Get, endpoint).await.expect("resolve");
    assert!(bucket.is_provisional());
    assert_eq!(bucket.id(), "GET|channels/123/messages");
    assert_eq!((bucket.limit(), bucket.remaining()), (1, 1));
    coordinator.call(&mut bucket).await.expect("first call is free");

    let headers = bucket_headers("abc", 5, 4, now_ms() + 60_000);
    coordinator.update(&mut bucket, &headers, Method::Get, endpoint).await.expect("update");
    assert_eq!(bucket.limit(), 5);
    assert_eq!(bucket.remaining(), 4);

    // Hash persisted, counters persisted, lock released.
    assert_eq!(
        store.get("rl:GET|channels/123/messages").await.unwrap().as_deref(),
        Some("abc")
    );
    assert_eq!(store.get("rl:abc:limit").await.unwrap().as_deref(), Some("5"));
    assert_eq!(store.get("rl:abc:remaining").await.unwrap().as_deref(), Some("4"));
    assert_eq!(store.get("rl:GET|channels/123/messages:lock").await.unwrap(), None);

    // Second pass: resolved handle, atomic decrement 4 -> 3.
    let mut second = coordinator.resolve(Method::Get, endpoint).await.expect("resolve");
    assert!(!second.is_provisional());
    assert_eq!(second.id(), "abc");
    coordinator.call(&mut second).await.expect("budget available");
    assert_eq!(second.remaining(), 3);
    assert_eq!(second.limit(), 5);
    assert_eq!(store.get("rl:abc:remaining").await.unwrap().as_deref(), Some("3"));
}

#[tokio::test]
async fn exhausted_bucket_rejects_without_underflow() {
    let store = InMemoryBucketStore::new();
    let coordinator = coordinator(store.clone());

    store.set("rl:GET|channels/1", "abc", None).await.unwrap();
    store.set("rl:abc:limit", "5", None).await.unwrap();
    store.set("rl:abc:remaining", "0", None).await.unwrap();

    let mut bucket = coordinator.resolve(Method::Get, "channels/1").await.expect("resolve");
    let err = coordinator.call(&mut bucket).await.expect_err("window is spent");
    assert!(err.is_exhausted());
    assert!(err.is_ratelimited());
    assert_eq!(store.get("rl:abc:remaining").await.unwrap().as_deref(), Some("0"));
}

#[tokio::test]
async fn stale_headers_cannot_raise_persisted_remaining() {
    let store = InMemoryBucketStore::new();
    let coordinator = coordinator(store.clone());
    let endpoint = "channels/7";

    store.set("rl:GET|channels/7", "abc", None).await.unwrap();
    store.set("rl:abc:limit", "5", None).await.unwrap();
    store.set("rl:abc:remaining", "5", None).await.unwrap();

    let mut bucket = coordinator.resolve(Method::Get, endpoint).await.expect("resolve");
    coordinator.call(&mut bucket).await.expect("budget available");
    assert_eq!(bucket.remaining(), 4);

    let reset = now_ms() + 60_000;

    // Fresh response: reported 2 is below our view, so it wins.
    let headers = bucket_headers("abc", 5, 2, reset);
    coordinator.update(&mut bucket, &headers, Method::Get, endpoint).await.expect("update");
    assert_eq!(store.get("rl:abc:remaining").await.unwrap().as_deref(), Some("2"));
    assert_eq!(bucket.remaining(), 2);

    // Out-of-order response: reported 4 arrived late and must not push the
    // stored value back up within the window.
    let stale = bucket_headers("abc", 5, 4, reset);
    coordinator.update(&mut bucket, &stale, Method::Get, endpoint).await.expect("update");
    assert_eq!(store.get("rl:abc:remaining").await.unwrap().as_deref(), Some("2"));
    assert_eq!(bucket.remaining(), 2);
}

#[tokio::test]
async fn hash_learning_is_first_writer_wins() {
    let store = InMemoryBucketStore::new();
    let coordinator = coordinator(store.clone());
    let endpoint = "guilds/9/members/3";

    let mut bucket = coordinator.resolve(Method::Patch, endpoint).await.expect("resolve");
    assert!(bucket.is_provisional());

    let reset = now_ms() + 60_000;
    let headers = bucket_headers("aaa", 5, 4, reset);
    coordinator.update(&mut bucket, &headers, Method::Patch, endpoint).await.expect("update");

    // Same identity again: idempotent.
    coordinator.update(&mut bucket, &headers, Method::Patch, endpoint).await.expect("update");
    assert_eq!(store.get("rl:PATCH|guilds/9/members").await.unwrap().as_deref(), Some("aaa"));

    // A losing racer reporting a different hash must not overwrite.
    let mut racer = routebucket::Bucket::Provisional {
        method: Method::Patch,
        route: "guilds/9/members".into(),
        limit: 1,
        remaining: 1,
    };
    let other = bucket_headers("zzz", 5, 4, reset);
    coordinator.update(&mut racer, &other, Method::Patch, endpoint).await.expect("update");
    assert_eq!(store.get("rl:PATCH|guilds/9/members").await.unwrap().as_deref(), Some("aaa"));
}

#[tokio::test]
async fn resolved_mapping_refresh_is_unconditional() {
    // An already-resolved bucket may be migrated to a new hash by the
    // upstream; the mapping write follows whatever the headers report.
    let store = InMemoryBucketStore::new();
    let coordinator = coordinator(store.clone());
    let endpoint = "channels/5";

    store.set("rl:GET|channels/5", "old-hash", None).await.unwrap();
    let mut bucket = coordinator.resolve(Method::Get, endpoint).await.expect("resolve");
    assert_eq!(bucket.id(), "old-hash");

    let headers = bucket_headers("new-hash", 5, 4, now_ms() + 60_000);
    coordinator.update(&mut bucket, &headers, Method::Get, endpoint).await.expect("update");
    assert_eq!(store.get("rl:GET|channels/5").await.unwrap().as_deref(), Some("new-hash"));
}

#[tokio::test]
async fn update_without_bucket_identity_is_a_noop() {
    let store = InMemoryBucketStore::new();
    let coordinator = coordinator(store.clone());
    let endpoint = "channels/11";

    let mut bucket = coordinator.resolve(Method::Get, endpoint).await.expect("resolve");
    let headers: ResponseHeaders =
        [("Content-Type", "application/json")].into_iter().collect();
    coordinator.update(&mut bucket, &headers, Method::Get, endpoint).await.expect("noop");

    assert_eq!(store.get("rl:GET|channels/11").await.unwrap(), None);
    assert_eq!((bucket.limit(), bucket.remaining()), (1, 1));
    // The resolving lock stays held: this response taught us nothing.
    let racer = coordinator.resolve(Method::Get, endpoint).await;
    assert!(racer.expect_err("lock still held").is_resolving());
}

#[tokio::test]
async fn update_skips_remaining_when_reset_is_missing() {
    let store = InMemoryBucketStore::new();
    let coordinator = coordinator(store.clone());
    let endpoint = "channels/13";

    let mut bucket = coordinator.resolve(Method::Get, endpoint).await.expect("resolve");
    let headers: ResponseHeaders = [
        ("X-RateLimit-Bucket", "abc"),
        ("X-RateLimit-Limit", "7"),
        ("X-RateLimit-Remaining", "6"),
        // no reset header: the remaining write has no expiry to anchor to
    ]
    .into_iter()
    .collect();
    coordinator.update(&mut bucket, &headers, Method::Get, endpoint).await.expect("update");

    assert_eq!(store.get("rl:abc:limit").await.unwrap().as_deref(), Some("7"));
    assert_eq!(store.get("rl:abc:remaining").await.unwrap(), None);
    assert_eq!(bucket.limit(), 7);
    // Lock still released: the hash itself was learned.
    assert_eq!(store.get("rl:GET|channels/13:lock").await.unwrap(), None);
}

#[tokio::test]
async fn scoped_routes_share_one_bucket_mapping() {
    let store = InMemoryBucketStore::new();
    let coordinator = coordinator(store.clone());

    let mut bucket =
        coordinator.resolve(Method::Get, "guilds/123/members/456?x=1").await.expect("resolve");
    let headers = bucket_headers("member-bucket", 10, 9, now_ms() + 60_000);
    coordinator
        .update(&mut bucket, &headers, Method::Get, "guilds/123/members/456?x=1")
        .await
        .expect("update");

    // A sibling member route resolves straight to the learned hash.
    let sibling =
        coordinator.resolve(Method::Get, "guilds/123/members/789").await.expect("resolve");
    assert_eq!(sibling.id(), "member-bucket");
}

mod failing_store {
    use super::*;
    use async_trait::async_trait;
    use routebucket::{Expiry, Resolution};
    use std::io;
    use std::time::Duration;

    /// Store whose every operation fails, standing in for an unreachable
    /// backend.
    #[derive(Debug, Clone, Default)]
    struct DownStore;

    fn down() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "store down")
    }

    #[async_trait]
    impl BucketStore for DownStore {
        type Error = io::Error;

        async fn get(&self, _key: &str) -> Result<Option<String>, Self::Error> {
            Err(down())
        }

        async fn set(
            &self,
            _key: &str,
            _value: &str,
            _expiry: Option<Expiry>,
        ) -> Result<(), Self::Error> {
            Err(down())
        }

        async fn set_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _expiry: Option<Expiry>,
        ) -> Result<bool, Self::Error> {
            Err(down())
        }

        async fn del(&self, _key: &str) -> Result<(), Self::Error> {
            Err(down())
        }

        async fn resolve_hash(
            &self,
            _mapping_key: &str,
            _lock_key: &str,
            _lock_ttl: Duration,
        ) -> Result<Resolution, Self::Error> {
            Err(down())
        }

        async fn consume(
            &self,
            _remaining_key: &str,
            _limit_key: &str,
            _global_key: &str,
            _global_limit: u64,
            _window_ttl: Duration,
        ) -> Result<Option<(u64, u64)>, Self::Error> {
            Err(down())
        }
    }

    #[tokio::test]
    async fn infrastructure_failures_propagate_as_store_errors() {
        let coordinator = BucketCoordinator::new(DownStore);

        let err = coordinator.resolve(Method::Get, "channels/1").await.expect_err("store down");
        assert!(err.is_store());
        assert!(!err.is_ratelimited());

        let mut bucket = routebucket::Bucket::Resolved {
            hash: "abc".into(),
            limit: 1,
            remaining: 1,
        };
        let err = coordinator.call(&mut bucket).await.expect_err("store down");
        assert!(err.is_store());

        let headers = bucket_headers("abc", 5, 4, now_ms() + 60_000);
        let err = coordinator
            .update(&mut bucket, &headers, Method::Get, "channels/1")
            .await
            .expect_err("store down");
        assert!(err.is_store());
    }
}
