//! Route handlers, one module per API area.

pub mod blueprints;
pub mod compose;
pub mod projects;
pub mod sources;
pub mod status;

use chrono::{DateTime, Utc};

/// Seconds since the epoch with millisecond precision, as the API reports times.
pub(crate) fn epoch_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}
