//! `Timeout`: a duration stored as whole nanoseconds.
//!
//! Equality and ordering compare the nanosecond count, so the unit a value
//! was built from never matters: `Timeout::seconds(1) == Timeout::millis(1000)`.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timeout {
    nanos: u64,
}

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SECOND: u64 = 1_000_000_000;
const NANOS_PER_MINUTE: u64 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u64 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: u64 = 24 * NANOS_PER_HOUR;

impl Timeout {
    pub const ZERO: Timeout = Timeout { nanos: 0 };

    pub const fn nanos(n: u64) -> Self {
        Timeout { nanos: n }
    }

    pub const fn micros(n: u64) -> Self {
        Timeout { nanos: n.saturating_mul(NANOS_PER_MICRO) }
    }

    pub const fn millis(n: u64) -> Self {
        Timeout { nanos: n.saturating_mul(NANOS_PER_MILLI) }
    }

    pub const fn seconds(n: u64) -> Self {
        Timeout { nanos: n.saturating_mul(NANOS_PER_SECOND) }
    }

    pub const fn minutes(n: u64) -> Self {
        Timeout { nanos: n.saturating_mul(NANOS_PER_MINUTE) }
    }

    pub const fn hours(n: u64) -> Self {
        Timeout { nanos: n.saturating_mul(NANOS_PER_HOUR) }
    }

    pub const fn days(n: u64) -> Self {
        Timeout { nanos: n.saturating_mul(NANOS_PER_DAY) }
    }

    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    pub const fn as_millis(&self) -> u64 {
        self.nanos / NANOS_PER_MILLI
    }

    /// Whole seconds part, as stored in `tv_sec`.
    pub const fn whole_seconds(&self) -> u64 {
        self.nanos / NANOS_PER_SECOND
    }

    /// Sub-second remainder, as stored in `tv_nsec`.
    pub const fn subsec_nanos(&self) -> u32 {
        (self.nanos % NANOS_PER_SECOND) as u32
    }

    pub const fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.nanos)
    }

    /// Deadline `self` from now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.as_duration()
    }

    pub const fn is_zero(&self) -> bool {
        self.nanos == 0
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout { nanos: u64::try_from(d.as_nanos()).unwrap_or(u64::MAX) }
    }
}

impl From<Timeout> for Duration {
    fn from(t: Timeout) -> Self {
        t.as_duration()
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_duration())
    }
}
