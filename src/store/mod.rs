//! Counter storage backends.
//!
//! Storage is the extension point of the crate: any store implementing
//! [`CounterStore`] can back the limiter. Two implementations ship here,
//! an in-process map for single-instance deployments and a Redis store for
//! counters shared across processes.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;

use crate::error::Result;

/// The result of one atomic counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// Counter value after the increment
    pub count: u64,
    /// Absolute expiry of the counter's window, epoch milliseconds
    pub window_expires: u64,
}

/// Trait for counter storage backends.
///
/// `increment` must be atomic with respect to concurrent callers on the same
/// key; it is the only operation that mutates a live counter, and everything
/// else in the limiter is derived from its result. A window's expiry is fixed
/// when the counter is created and is never extended by later increments.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key`.
    ///
    /// Creates the counter with count 1 and a fresh expiry of `ttl_secs`
    /// seconds when no live entry exists; otherwise bumps the count and
    /// returns the existing expiry unchanged.
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<IncrementOutcome>;

    /// Remaining lifetime of `key` in milliseconds, or -1 if the key is
    /// absent or expired. Never mutates state.
    async fn ttl(&self, key: &str) -> Result<i64>;

    /// Current count for `key` without incrementing, 0 if absent or expired.
    async fn count(&self, key: &str) -> Result<u64>;

    /// Remove the counter for `key` immediately, regardless of expiry.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Release any held connections or timers. Idempotent.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
