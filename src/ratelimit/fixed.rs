//! Fixed-window admission.
//!
//! The simplest windowing scheme: one counter per key, reset when its TTL
//! elapses. A window boundary causes an abrupt reset to full capacity, which
//! permits up to twice the limit across the boundary in the worst case (the
//! full limit at the end of one window, the full limit again at the start of
//! the next). That burst is the accepted cost of keeping a single counter;
//! the sliding-window algorithm exists to smooth it.

use crate::clock;
use crate::error::Result;
use crate::store::CounterStore;

use super::decision::Decision;

/// Window length in whole seconds, rounded up, for the storage TTL.
pub(crate) fn window_ttl_secs(window_ms: u64) -> u64 {
    (window_ms + 999) / 1000
}

/// Run one fixed-window check: increment the key's counter and derive the
/// decision from the post-increment count.
pub(crate) async fn check(
    store: &dyn CounterStore,
    key: &str,
    limit: u64,
    window_ms: u64,
) -> Result<Decision> {
    let outcome = store.increment(key, window_ttl_secs(window_ms)).await?;
    let now = clock::now_millis();
    Ok(Decision::from_count(
        outcome.count,
        limit,
        outcome.window_expires,
        now,
    ))
}
