//! Wall-clock time as epoch milliseconds.
//!
//! All window math in this crate runs on integer epoch milliseconds, so the
//! clock is read in exactly one place.

use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis() as u64
}
