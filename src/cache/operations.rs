use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis::{AsyncCommands, Client as RedisClient, Script};
use thiserror::Error;
use tokio::time::Instant;

use super::models::{RateLimitCounter, WindowHit};

/// The shared counter table could not be read or written.
#[derive(Debug, Error)]
#[error("counter store unavailable: {0}")]
pub struct StoreUnavailable(pub String);

/// A durable table of fixed-window counters, one row per limited identity.
///
/// `hit` is the only mutation: insert-or-increment-with-reset, executed as a
/// single atomic operation so concurrent callers for the same key are
/// serialized by the store itself, not by the process.
pub trait CounterStore: Send + Sync {
    fn hit(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<WindowHit, StoreUnavailable>> + Send;

    /// Non-atomic read of the current row, for diagnostics and tests.
    fn peek(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<RateLimitCounter>, StoreUnavailable>> + Send;
}

// INCR creates the row at 1; a fresh row gets the window as its TTL, so the
// key expiring *is* the window reset. The PTTL < 0 branch self-heals a row
// that lost its expiry.
const HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Counter table in Redis. The Lua script runs server-side in one step, so
/// any number of server processes can share it without extra coordination.
#[derive(Clone)]
pub struct RedisCounterStore {
    client: Arc<RedisClient>,
    script: Arc<Script>,
}

impl RedisCounterStore {
    pub fn new(client: Arc<RedisClient>) -> Self {
        Self {
            client,
            script: Arc::new(Script::new(HIT_SCRIPT)),
        }
    }

    fn redis_key(key: &str) -> String {
        format!("rate_limit:{}", key)
    }
}

impl CounterStore for RedisCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, StoreUnavailable> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreUnavailable(e.to_string()))?;

        let (count, ttl): (i64, i64) = self
            .script
            .key(Self::redis_key(key))
            .arg(window.as_millis() as i64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreUnavailable(e.to_string()))?;

        Ok(WindowHit {
            count: count.clamp(0, u32::MAX as i64) as u32,
            reset_ms: ttl.max(0) as u64,
        })
    }

    async fn peek(&self, key: &str) -> Result<Option<RateLimitCounter>, StoreUnavailable> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreUnavailable(e.to_string()))?;

        let redis_key = Self::redis_key(key);
        let count: Option<u32> = conn
            .get(&redis_key)
            .await
            .map_err(|e| StoreUnavailable(e.to_string()))?;

        let Some(count) = count else {
            return Ok(None);
        };

        let ttl: i64 = conn
            .pttl(&redis_key)
            .await
            .map_err(|e| StoreUnavailable(e.to_string()))?;

        Ok(Some(RateLimitCounter {
            key: key.to_string(),
            count,
            reset_ms: ttl.max(0) as u64,
        }))
    }
}

struct MemoryRow {
    count: u32,
    reset_at: Instant,
}

/// In-process counter table with the same observable contract, for tests and
/// local development. Driven by the tokio clock so paused-time tests can
/// cross window boundaries deterministically.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    rows: Arc<Mutex<HashMap<String, MemoryRow>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowHit, StoreUnavailable> {
        let now = Instant::now();
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreUnavailable("poisoned lock".into()))?;

        let row = rows
            .entry(key.to_string())
            .and_modify(|row| {
                if now < row.reset_at {
                    row.count += 1;
                } else {
                    row.count = 1;
                    row.reset_at = now + window;
                }
            })
            .or_insert(MemoryRow {
                count: 1,
                reset_at: now + window,
            });

        Ok(WindowHit {
            count: row.count,
            reset_ms: row.reset_at.saturating_duration_since(now).as_millis() as u64,
        })
    }

    async fn peek(&self, key: &str) -> Result<Option<RateLimitCounter>, StoreUnavailable> {
        let now = Instant::now();
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreUnavailable("poisoned lock".into()))?;

        Ok(rows.get(key).map(|row| RateLimitCounter {
            key: key.to_string(),
            count: row.count,
            reset_ms: row.reset_at.saturating_duration_since(now).as_millis() as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn first_hit_opens_a_fresh_window() {
        let store = MemoryCounterStore::new();

        let hit = store.hit("vote:1.2.3.4", WINDOW).await.unwrap();
        assert_eq!(hit.count, 1);
        assert_eq!(hit.reset_ms, 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn hits_within_the_window_increment() {
        let store = MemoryCounterStore::new();

        for expected in 1..=5 {
            let hit = store.hit("vote:1.2.3.4", WINDOW).await.unwrap();
            assert_eq!(hit.count, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn keys_count_independently() {
        let store = MemoryCounterStore::new();

        store.hit("vote:1.2.3.4", WINDOW).await.unwrap();
        store.hit("vote:1.2.3.4", WINDOW).await.unwrap();
        let other = store.hit("vote:5.6.7.8", WINDOW).await.unwrap();

        assert_eq!(other.count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_ms_shrinks_as_the_window_ages() {
        let store = MemoryCounterStore::new();

        store.hit("vote:1.2.3.4", WINDOW).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let hit = store.hit("vote:1.2.3.4", WINDOW).await.unwrap();

        assert_eq!(hit.count, 2);
        assert_eq!(hit.reset_ms, 50_000);
    }

    #[tokio::test(start_paused = true)]
    async fn crossing_the_window_resets_to_one() {
        let store = MemoryCounterStore::new();

        for _ in 0..3 {
            store.hit("vote:1.2.3.4", WINDOW).await.unwrap();
        }
        tokio::time::advance(WINDOW + Duration::from_millis(1)).await;

        let hit = store.hit("vote:1.2.3.4", WINDOW).await.unwrap();
        assert_eq!(hit.count, 1);
        assert_eq!(hit.reset_ms, 60_000);
    }

    #[tokio::test(start_paused = true)]
    async fn peek_reads_without_mutating() {
        let store = MemoryCounterStore::new();

        assert!(store.peek("vote:1.2.3.4").await.unwrap().is_none());

        store.hit("vote:1.2.3.4", WINDOW).await.unwrap();
        let row = store.peek("vote:1.2.3.4").await.unwrap().unwrap();
        assert_eq!(row.count, 1);

        // A second peek still sees one hit.
        let row = store.peek("vote:1.2.3.4").await.unwrap().unwrap();
        assert_eq!(row.count, 1);
        assert_eq!(row.key, "vote:1.2.3.4");
    }
}
