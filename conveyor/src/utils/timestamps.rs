//! Timestamp helpers shared by the engine, the dispatch queue and the worker registry.

use chrono::{DateTime, Duration, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an RFC 3339 string with microsecond precision.
///
/// # Examples
///
/// ```
/// use conveyor::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns true when `since` lies strictly more than `threshold` before `now`.
///
/// A `since` in the future (clock skew between processes) never exceeds.
#[must_use]
pub fn age_exceeds(since: Timestamp, now: Timestamp, threshold: std::time::Duration) -> bool {
    let Ok(threshold) = Duration::from_std(threshold) else {
        return false;
    };
    now.signed_duration_since(since) > threshold
}
