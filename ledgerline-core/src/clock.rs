//! Wall-clock source for commit stamps.

use std::fmt;

use chrono::{DateTime, Utc};

/// Supplies the time assigned to each commit.
///
/// Stamps are only used by time-bounded reads. Ordering always follows
/// stream revisions, so a clock that steps backwards never reorders history.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
