//! Redis-backed store.

use std::fmt;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;
use tracing::debug;
use turnstile_core::{StoreError, StoreResult};

use super::{KeyValueStore, StoreCounters};

const SCAN_BATCH: usize = 200;

/// Sliding-window admission as a single server-side script.
///
/// KEYS[1] window set; ARGV: now, window_start, limit, ttl.
const ADMIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[2])
local count = redis.call('ZCARD', KEYS[1])
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[1])
    redis.call('EXPIRE', KEYS[1], ARGV[4])
end
return count
"#;

/// Store backed by a Redis server through a reconnecting connection manager.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    endpoint: String,
    admit: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.endpoint)
            .field("conn", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisStore {
    /// Open a connection to `url`.
    ///
    /// Returns [`StoreError::Unreachable`] when the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let endpoint = redact_url(url);
        let unreachable = |e: ::redis::RedisError| StoreError::Unreachable {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        };

        let client = ::redis::Client::open(url).map_err(unreachable)?;
        let conn = ConnectionManager::new(client).await.map_err(unreachable)?;
        debug!(endpoint = %endpoint, "Connected to redis");

        Ok(Self {
            conn,
            endpoint,
            admit: Script::new(ADMIT_SCRIPT),
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _pong: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StoreError::operation("GET", e))?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(|e| StoreError::operation("SETEX", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| StoreError::operation("DEL", e))?;
        Ok(removed > 0)
    }

    async fn scan_match(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::operation("SCAN", e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once across batches.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn flush_db(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = ::redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::operation("FLUSHDB", e))?;
        Ok(())
    }

    async fn counters(&self) -> StoreResult<StoreCounters> {
        let mut conn = self.conn.clone();
        let info: String = ::redis::cmd("INFO")
            .arg("stats")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::operation("INFO", e))?;
        Ok(parse_info_stats(&info))
    }

    async fn window_count(&self, key: &str, window_start: i64) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let (_pruned, count): (u64, u64) = ::redis::pipe()
            .atomic()
            .zrembyscore(key, 0, window_start)
            .zcard(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::operation("ZCARD", e))?;
        Ok(count)
    }

    async fn window_admit(
        &self,
        key: &str,
        now: i64,
        window_start: i64,
        limit: u32,
        ttl_secs: u64,
    ) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .admit
            .key(key)
            .arg(now)
            .arg(window_start)
            .arg(limit)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::operation("EVALSHA", e))?;
        Ok(count)
    }
}

/// Pull the counters out of an `INFO stats` reply.
fn parse_info_stats(info: &str) -> StoreCounters {
    let mut counters = StoreCounters::default();
    for line in info.lines() {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        match name {
            "total_commands_processed" => counters.total_commands = value,
            "keyspace_hits" => counters.keyspace_hits = value,
            "keyspace_misses" => counters.keyspace_misses = value,
            _ => {}
        }
    }
    counters
}

/// Strip credentials from a store URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
