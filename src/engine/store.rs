// ZapLine Engine — Shared Key-Value Store
//
// The engine's durable state (rate windows, conversation logs) lives in a
// shared store reached through the `SharedStore` trait: eleven primitives
// with Redis semantics. Any store offering them with the same atomicity
// guarantees is substitutable — production uses Redis, tests an in-memory
// implementation with a controllable clock.
//
// The Redis connection is process-wide: one multiplexed connection, created
// lazily on first use and reused for the process lifetime, with `shutdown()`
// as the single close hook. No call site constructs its own connection.

use async_trait::async_trait;
use log::info;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::OnceLock;
use tokio::sync::Mutex;

use crate::atoms::error::EngineResult;

// ── Primitive surface ──────────────────────────────────────────────────────

/// Minimal store surface the engine needs. Scores and TTLs are epoch millis
/// and seconds respectively; ranges use Redis index conventions (negative
/// indices count from the tail, `stop` is inclusive).
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn lpush(&self, key: &str, value: &str) -> EngineResult<()>;
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> EngineResult<()>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> EngineResult<Vec<String>>;
    async fn llen(&self, key: &str) -> EngineResult<usize>;
    async fn expire(&self, key: &str, seconds: i64) -> EngineResult<()>;
    async fn zadd(&self, key: &str, member: &str, score: i64) -> EngineResult<()>;
    async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> EngineResult<usize>;
    async fn zcard(&self, key: &str) -> EngineResult<usize>;
    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> EngineResult<Vec<(String, i64)>>;
    async fn del(&self, key: &str) -> EngineResult<()>;
    async fn keys_with_prefix(&self, prefix: &str) -> EngineResult<Vec<String>>;

    /// Prune sorted-set entries with score ≤ `cutoff`, then return the
    /// surviving cardinality — one atomic round trip, so concurrent
    /// admission checks for the same key cannot interleave between the
    /// prune and the count.
    async fn pruned_count(&self, key: &str, cutoff: i64) -> EngineResult<usize>;
}

// ── Process-wide Redis client ──────────────────────────────────────────────

static STORE_URL: OnceLock<String> = OnceLock::new();
static STORE_CONN: Mutex<Option<MultiplexedConnection>> = Mutex::const_new(None);

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1/";

/// Set the store URL before first use. A second call is ignored (first
/// configuration wins — the connection is process-wide).
pub fn configure(url: &str) {
    let _ = STORE_URL.set(url.to_string());
}

/// Get (or lazily create) the process-wide multiplexed connection.
/// `MultiplexedConnection` is a cheap clone over one socket, so every store
/// call clones the shared handle instead of opening its own.
async fn connection() -> EngineResult<MultiplexedConnection> {
    let mut guard = STORE_CONN.lock().await;
    if let Some(conn) = guard.as_ref() {
        return Ok(conn.clone());
    }
    let url = STORE_URL.get().map(String::as_str).unwrap_or(DEFAULT_REDIS_URL);
    let client = redis::Client::open(url)?;
    let conn = client.get_multiplexed_tokio_connection().await?;
    info!("[store] Connected to shared store at {}", url);
    *guard = Some(conn.clone());
    Ok(conn)
}

/// Close the process-wide connection. The next store call reconnects.
pub async fn shutdown() {
    let mut guard = STORE_CONN.lock().await;
    if guard.take().is_some() {
        info!("[store] Shared store connection closed");
    }
}

/// `SharedStore` over the process-wide Redis connection.
pub struct RedisStore;

#[async_trait]
impl SharedStore for RedisStore {
    async fn lpush(&self, key: &str, value: &str) -> EngineResult<()> {
        let mut conn = connection().await?;
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> EngineResult<()> {
        let mut conn = connection().await?;
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> EngineResult<Vec<String>> {
        let mut conn = connection().await?;
        let items: Vec<String> = conn.lrange(key, start, stop).await?;
        Ok(items)
    }

    async fn llen(&self, key: &str) -> EngineResult<usize> {
        let mut conn = connection().await?;
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn expire(&self, key: &str, seconds: i64) -> EngineResult<()> {
        let mut conn = connection().await?;
        let _: () = conn.expire(key, seconds).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> EngineResult<()> {
        let mut conn = connection().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, min: i64, max: i64) -> EngineResult<usize> {
        let mut conn = connection().await?;
        let removed: usize = conn.zrembyscore(key, min, max).await?;
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> EngineResult<usize> {
        let mut conn = connection().await?;
        let count: usize = conn.zcard(key).await?;
        Ok(count)
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> EngineResult<Vec<(String, i64)>> {
        let mut conn = connection().await?;
        // Scores come back as doubles; we only ever store integral epoch millis.
        let entries: Vec<(String, f64)> = conn.zrange_withscores(key, start, stop).await?;
        Ok(entries.into_iter().map(|(m, s)| (m, s as i64)).collect())
    }

    async fn del(&self, key: &str) -> EngineResult<()> {
        let mut conn = connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> EngineResult<Vec<String>> {
        let mut conn = connection().await?;
        let keys: Vec<String> = conn.keys(format!("{}*", prefix)).await?;
        Ok(keys)
    }

    async fn pruned_count(&self, key: &str, cutoff: i64) -> EngineResult<usize> {
        let mut conn = connection().await?;
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .zrembyscore(key, 0, cutoff)
            .ignore()
            .zcard(key)
            .query_async(&mut conn)
            .await?;
        Ok(count.max(0) as usize)
    }
}

// ── In-memory store (test builds) ──────────────────────────────────────────
