//! Sliding-window admission, approximated over two fixed windows.
//!
//! A true sliding window needs a timestamp per event. This approximation
//! keeps exactly two counters per key: the current fixed window
//! (`floor(now / window)`) and the one before it. The previous window's
//! count is weighted by how much of it still overlaps the sliding span:
//!
//! ```text
//! effective = ceil(previous * (1 - elapsed / window) + current)
//! ```
//!
//! The weight falls linearly from 1 at the start of the current window to 0
//! at its end, which smooths the boundary burst fixed windows exhibit while
//! storing two keys instead of an unbounded event log.

use tracing::trace;

use crate::clock;
use crate::error::Result;
use crate::store::CounterStore;

use super::decision::Decision;
use super::fixed::window_ttl_secs;

/// Fraction of the previous window still inside the sliding span.
pub(crate) fn overlap_ratio(elapsed_ms: u64, window_ms: u64) -> f64 {
    1.0 - elapsed_ms as f64 / window_ms as f64
}

/// Blend the previous window's count into the current one.
pub(crate) fn effective_count(previous: u64, current: u64, overlap: f64) -> u64 {
    (previous as f64 * overlap + current as f64).ceil() as u64
}

/// Run one sliding-window check.
///
/// The current window's counter lives for twice the window length so the
/// next window can still read it as "previous". The previous window's count
/// is read without mutation; its own admission window has already closed.
pub(crate) async fn check(
    store: &dyn CounterStore,
    key: &str,
    limit: u64,
    window_ms: u64,
) -> Result<Decision> {
    let now = clock::now_millis();
    let index = now / window_ms;
    let current_key = format!("{}:{}", key, index);

    // Aliveness probe before the increment; the count itself comes later and
    // only if the previous window has not expired.
    let prev_key = format!("{}:{}", key, index.wrapping_sub(1));
    let prev_alive = index > 0 && store.ttl(&prev_key).await? > 0;

    let outcome = store
        .increment(&current_key, window_ttl_secs(2 * window_ms))
        .await?;

    let previous = if prev_alive {
        store.count(&prev_key).await?
    } else {
        0
    };

    let elapsed = now - index * window_ms;
    let overlap = overlap_ratio(elapsed, window_ms);
    let effective = effective_count(previous, outcome.count, overlap);
    let reset_at = (index + 1) * window_ms;

    trace!(
        key = %key,
        current = outcome.count,
        previous,
        overlap,
        effective,
        "Computed sliding window occupancy"
    );

    Ok(Decision::from_count(effective, limit, reset_at, now))
}
