//! Redis-backed [`BucketStore`] for `routebucket` (bring your own connection).
//!
//! The two coordination primitives — hash resolution and the admission
//! decrement — run as Lua scripts, so each executes as one server-side step
//! no matter how many worker processes share the Redis instance. Plain
//! key operations map directly onto `GET`/`SET`/`DEL` with `EX`/`PXAT`/`NX`
//! options.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};
use routebucket::{BucketStore, Expiry, Resolution};
use std::time::Duration;

/// Resolve a route's bucket hash, taking the resolving lock when unknown.
///
/// `KEYS[1]` mapping key, `KEYS[2]` lock key; `ARGV[1]` lock TTL seconds.
/// Replies with the hash, `-1` while another caller holds the lock, or nil
/// after acquiring the lock for this caller.
const RESOLVE_SCRIPT: &str = r"
local hash = redis.call('GET', KEYS[1])
if hash then
    return hash
end
if redis.call('EXISTS', KEYS[2]) == 1 then
    return -1
end
redis.call('SET', KEYS[2], '1', 'EX', ARGV[1])
return false
";

/// Consume one unit of a bucket's budget.
///
/// `KEYS[1]` remaining, `KEYS[2]` limit, `KEYS[3]` global per-second
/// counter; `ARGV[1]` global ceiling, `ARGV[2]` fallback window TTL
/// seconds. An absent remaining key means the window reset, so the budget
/// is the limit again. The decrement keeps the window's absolute expiry;
/// a counter created here gets the fallback TTL. Replies with
/// `{remaining, limit}` after the decrement, or nil when denied.
const CONSUME_SCRIPT: &str = r"
local limit = tonumber(redis.call('GET', KEYS[2]) or '1')
local remaining = redis.call('GET', KEYS[1])
if remaining == false then
    remaining = limit
else
    remaining = tonumber(remaining)
end
if remaining <= 0 then
    return false
end
local global = redis.call('INCR', KEYS[3])
redis.call('EXPIRE', KEYS[3], 2)
if global > tonumber(ARGV[1]) then
    return false
end
remaining = remaining - 1
if redis.call('EXISTS', KEYS[1]) == 1 then
    redis.call('SET', KEYS[1], remaining, 'KEEPTTL')
else
    redis.call('SET', KEYS[1], remaining, 'EX', ARGV[2])
end
return {remaining, limit}
";

/// [`BucketStore`] over a shared Redis instance.
///
/// Cloning is cheap; the managed connection multiplexes across clones.
#[derive(Clone)]
pub struct RedisBucketStore {
    conn: ConnectionManager,
    resolve: Script,
    consume: Script,
}

impl std::fmt::Debug for RedisBucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBucketStore")
            .field("conn", &"<redis::aio::ConnectionManager>")
            .finish()
    }
}

impl RedisBucketStore {
    /// Wrap an existing managed connection.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            resolve: Script::new(RESOLVE_SCRIPT),
            consume: Script::new(CONSUME_SCRIPT),
        }
    }

    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`) and wrap the
    /// resulting managed connection.
    ///
    /// # Errors
    /// Returns `Err` when the URL is invalid or the initial connection
    /// fails.
    pub async fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self::new(ConnectionManager::new(client).await?))
    }
}

fn apply_expiry(cmd: &mut redis::Cmd, expiry: Option<Expiry>) {
    match expiry {
        Some(Expiry::Ttl(ttl)) => {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        Some(Expiry::AtMillis(at)) => {
            cmd.arg("PXAT").arg(at);
        }
        None => {}
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    type Error = redis::RedisError;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let mut conn = self.conn.clone();
        redis::cmd("GET").arg(key).query_async(&mut conn).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Expiry>,
    ) -> Result<(), Self::Error> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        apply_expiry(&mut cmd, expiry);
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        expiry: Option<Expiry>,
    ) -> Result<bool, Self::Error> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        apply_expiry(&mut cmd, expiry);
        cmd.arg("NX");
        // SET ... NX replies OK when written, nil when the key existed.
        let written: bool = cmd.query_async(&mut conn).await?;
        Ok(written)
    }

    async fn del(&self, key: &str) -> Result<(), Self::Error> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn resolve_hash(
        &self,
        mapping_key: &str,
        lock_key: &str,
        lock_ttl: Duration,
    ) -> Result<Resolution, Self::Error> {
        let mut conn = self.conn.clone();
        let reply: Value = self
            .resolve
            .key(mapping_key)
            .key(lock_key)
            .arg(lock_ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await?;

        match reply {
            Value::Nil => Ok(Resolution::Unresolved),
            Value::Int(-1) => Ok(Resolution::Resolving),
            Value::BulkString(bytes) => {
                Ok(Resolution::Resolved(String::from_utf8_lossy(&bytes).into_owned()))
            }
            Value::SimpleString(s) => Ok(Resolution::Resolved(s)),
            _ => Err(redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "unexpected resolve script reply",
            ))),
        }
    }

    async fn consume(
        &self,
        remaining_key: &str,
        limit_key: &str,
        global_key: &str,
        global_limit: u64,
        window_ttl: Duration,
    ) -> Result<Option<(u64, u64)>, Self::Error> {
        let mut conn = self.conn.clone();
        self.consume
            .key(remaining_key)
            .key(limit_key)
            .key(global_key)
            .arg(global_limit)
            .arg(window_ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
    }
}
