//! Clocks, timestamps and entity identifiers
//!
//! Ids combine a millisecond timestamp with random bits (UUIDv7), so they
//! sort chronologically in the common case and stay unique when two
//! entities are created in the same instant.

use crate::{PersistenceError, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::{NoContext, Timestamp, Uuid};

/// Source of the current time for timestamps and ids
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests and replays
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Move the clock forward (or backward, for a negative duration)
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared default clock
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Current time truncated to the persisted millisecond precision.
///
/// Truncating here keeps in-memory entities equal to what a round trip
/// through either medium gives back.
pub fn stamp(clock: &dyn Clock) -> DateTime<Utc> {
    let now = clock.now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Render a timestamp as ISO-8601 UTC with millisecond precision
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a persisted ISO-8601 timestamp
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("bad timestamp {:?}: {}", s, e)).into())
}

/// Produces entity ids from a clock and random bits
#[derive(Debug, Clone)]
pub struct IdGenerator {
    clock: Arc<dyn Clock>,
}

impl IdGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Current time at persisted precision
    pub fn now(&self) -> DateTime<Utc> {
        stamp(self.clock.as_ref())
    }

    /// Generate an id together with the instant it was stamped with,
    /// so a new entity's id and `createdAt` agree.
    pub fn next(&self) -> (String, DateTime<Utc>) {
        let now = self.now();
        (Self::id_at(&now), now)
    }

    /// Generate an id for a given instant
    pub fn id_at(at: &DateTime<Utc>) -> String {
        let millis = at.timestamp_millis().max(0) as u64;
        let ts = Timestamp::from_unix(NoContext, millis / 1000, ((millis % 1000) * 1_000_000) as u32);
        Uuid::new_v7(ts).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn test_ids_unique_at_same_instant() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        let ids = IdGenerator::new(clock);

        let generated: HashSet<String> = (0..1000).map(|_| ids.next().0).collect();
        assert_eq!(generated.len(), 1000);
    }

    #[test]
    fn test_ids_sort_chronologically() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        let ids = IdGenerator::new(clock.clone());

        let first = ids.next().0;
        clock.advance(Duration::milliseconds(1));
        let second = ids.next().0;
        clock.advance(Duration::seconds(90));
        let third = ids.next().0;

        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 58).unwrap() + Duration::milliseconds(7);
        let s = format_timestamp(&at);
        assert_eq!(s, "2024-12-31T23:59:58.007Z");
        assert_eq!(parse_timestamp(&s).unwrap(), at);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_stamp_truncates_to_millis() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::nanoseconds(1_234_567);
        let clock = ManualClock::new(at);
        let stamped = stamp(&clock);
        assert_eq!(stamped.timestamp_subsec_nanos(), 1_000_000);
        assert_eq!(parse_timestamp(&format_timestamp(&stamped)).unwrap(), stamped);
    }
}
