//! Redis-backed counter store for multi-instance deployments.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, trace};

use super::{CounterStore, IncrementOutcome};
use crate::clock;
use crate::error::Result;

/// Increment a counter and stamp its window expiry in one indivisible unit.
///
/// Splitting this into separate INCR and PEXPIRE round trips would race under
/// concurrent clients: two first-writers could both observe count 1, or a
/// client could die between the calls and leave a counter that never expires.
/// The script also reads the remaining lifetime back so the caller learns the
/// window's absolute expiry from the same execution.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return { count, redis.call('PTTL', KEYS[1]) }
"#;

/// Counter store backed by a shared Redis instance.
///
/// Counters are plain integer keys with native expiry; every limiter process
/// pointed at the same Redis observes the same counts. Atomicity of the
/// read-check-write sequence rests entirely on the server-side script.
pub struct RedisStore {
    conn: MultiplexedConnection,
    script: Script,
}

impl RedisStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(url = %url, "Connected to Redis counter store");
        Ok(Self::new(conn))
    }

    /// Wrap an existing multiplexed connection.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
        }
    }
}

/// Absolute window expiry from a PTTL readback.
///
/// A live key reports its remaining lifetime; the supplied TTL only covers a
/// key that has no expiry at all (PTTL -1), so an existing window's expiry is
/// never extended by later increments.
fn window_expiry(now: u64, pttl_ms: i64, ttl_ms: u64) -> u64 {
    if pttl_ms > 0 {
        now + pttl_ms as u64
    } else {
        now + ttl_ms
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<IncrementOutcome> {
        let ttl_ms = ttl_secs * 1000;
        let mut conn = self.conn.clone();

        let (count, pttl_ms): (u64, i64) = self
            .script
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        trace!(key = %key, count, pttl_ms, "Incremented shared counter");

        Ok(IncrementOutcome {
            count,
            window_expires: window_expiry(clock::now_millis(), pttl_ms, ttl_ms),
        })
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let pttl_ms: i64 = conn.pttl(key).await?;
        // PTTL reports -2 for a missing key and -1 for a key without expiry;
        // both collapse to "no live window" here.
        Ok(if pttl_ms > 0 { pttl_ms } else { -1 })
    }

    async fn count(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = conn.get(key).await?;
        Ok(count.unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    // The multiplexed connection releases itself on drop; the default
    // `close` is sufficient.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_single_execution_unit() {
        // The whole increment contract must live inside one script.
        assert!(INCREMENT_SCRIPT.contains("INCR"));
        assert!(INCREMENT_SCRIPT.contains("PEXPIRE"));
        assert!(INCREMENT_SCRIPT.contains("PTTL"));
    }

    #[test]
    fn test_window_expiry_uses_live_pttl() {
        // Mid-window key: the readback wins, expiry is not extended.
        assert_eq!(window_expiry(10_000, 4_000, 60_000), 14_000);
    }

    #[test]
    fn test_window_expiry_falls_back_to_supplied_ttl() {
        // No expiry on the key (PTTL -1): supplied TTL covers it.
        assert_eq!(window_expiry(10_000, -1, 60_000), 70_000);
        assert_eq!(window_expiry(10_000, -2, 60_000), 70_000);
    }

    #[test]
    fn test_connect_rejects_malformed_url() {
        let err = redis::Client::open("not a url");
        assert!(err.is_err());
    }
}
