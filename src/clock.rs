//! Wall-clock abstraction used to stamp request expiry.

use chrono::{DateTime, Utc};

/// Clock abstraction so timestamps can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at }
    }

    /// Freeze at a Unix timestamp in milliseconds; out-of-range values clamp to the epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self { at: DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH) }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at
    }
}
