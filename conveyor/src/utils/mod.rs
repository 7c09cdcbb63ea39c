//! Utility functions for identifier generation and timestamp handling.

pub mod timestamps;

pub use timestamps::{age_exceeds, iso_timestamp, now_utc, Timestamp};

use uuid::Uuid;

/// Generates a new time-ordered UUID (v7).
///
/// Instance and worker ids use v7 so that ordering by id roughly follows
/// creation order, which keeps dispatch tie-breaks stable.
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}
