//! Server logical clock.
//!
//! A single counter shared by every timestamp-assigning operation. The clock
//! itself is not synchronized; [`crate::BroadcastEngine`] keeps it behind the
//! same lock as the subscriber registry so that advancing the clock and
//! fanning out the resulting event form one atomic step.

use std::fmt;

use crate::error::EngineError;

/// Server-assigned sequence number.
///
/// Totally orders events as observed by the server. Unrelated to wall-clock
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogicalTimestamp(i64);

impl LogicalTimestamp {
    /// Wrap a raw value.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw value.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic counter.
///
/// # Invariants
///
/// - Each successful [`LogicalClock::advance`] returns exactly the previous
///   value plus one. No gaps, no repeats, never decreasing.
/// - A failed advance leaves the clock unchanged.
#[derive(Debug, Default)]
pub struct LogicalClock {
    current: LogicalTimestamp,
}

impl LogicalClock {
    /// Clock at zero. The first advance yields 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock resuming from `value`.
    pub fn starting_at(value: LogicalTimestamp) -> Self {
        Self { current: value }
    }

    /// Last assigned timestamp (zero before any event).
    pub fn now(&self) -> LogicalTimestamp {
        self.current
    }

    /// Increment and return the new timestamp.
    ///
    /// Fails with [`EngineError::Overflow`] when the counter is exhausted.
    pub fn advance(&mut self) -> Result<LogicalTimestamp, EngineError> {
        let next = self.current.0.checked_add(1).ok_or(EngineError::Overflow)?;
        self.current = LogicalTimestamp(next);
        Ok(self.current)
    }
}
