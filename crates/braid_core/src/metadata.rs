//! Invocation timing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Start and end of the most recent invocation.
///
/// Serialized with RFC 3339 timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// When the invocation started.
    pub start_time: Option<DateTime<Utc>>,
    /// When it ended. `None` while running.
    pub end_time: Option<DateTime<Utc>>,
}

impl Timing {
    pub(crate) fn start(&mut self) {
        self.start_time = Some(Utc::now());
        self.end_time = None;
    }

    pub(crate) fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    /// Elapsed time between start and end, once both are known.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }
}
