//! Time-related utilities with clock abstraction for testability.

use chrono::{DateTime, Duration, FixedOffset, Local, Offset, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;

    /// Current Unix timestamp (milliseconds)
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock implementation for testing (returns a fixed time)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    fixed_time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock at the given instant
    pub fn new(fixed_time: DateTime<Utc>) -> Self {
        Self { fixed_time }
    }

    /// Create a new fixed clock from a Unix timestamp in milliseconds
    pub fn from_millis(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: DateTime::from_timestamp_millis(fixed_time_millis).unwrap_or_default(),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.fixed_time
    }
}

/// UTC offset of the host's local time zone right now
pub fn local_offset() -> FixedOffset {
    Local::now().offset().fix()
}

/// Render a UTC instant as RFC 3339 in the given offset
pub fn to_rfc3339_at(instant: DateTime<Utc>, offset: FixedOffset) -> String {
    instant.with_timezone(&offset).to_rfc3339()
}

/// Format a message timestamp relative to `now` for display.
///
/// Less than a day old shows the clock time only, less than two days is
/// prefixed with "Yesterday", anything older carries the full date. Clock
/// times are shown in `offset`.
pub fn format_message_time(
    instant: DateTime<Utc>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> String {
    let local = instant.with_timezone(&offset);
    let age = now - instant;

    if age < Duration::hours(24) {
        local.format("%H:%M").to_string()
    } else if age < Duration::hours(48) {
        format!("Yesterday {}", local.format("%H:%M"))
    } else {
        local.format("%Y-%m-%d %H:%M").to_string()
    }
}
