//! Wall-clock progress estimation for long batch runs.
//!
//! The estimate is advisory: it is printed between batches and never
//! drives control flow.

use std::fmt;
use std::time::Duration;

/// Source of monotonic timestamps.
///
/// Abstracted so batch orchestration can be timed deterministically in
/// tests.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Progress through a fixed number of batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingEstimate {
    /// Batches finished so far (successful or not).
    pub completed: u32,
    /// Batches requested in total.
    pub total: u32,
    /// Wall-clock time spent on the completed batches.
    pub elapsed: Duration,
}

impl RemainingEstimate {
    /// Estimated time left: mean time per completed batch times the
    /// number of batches still to run.
    ///
    /// Zero until at least one batch has completed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        if self.completed == 0 {
            return Duration::ZERO;
        }
        let left = self.total.saturating_sub(self.completed);
        (self.elapsed / self.completed).saturating_mul(left)
    }

    /// Completed fraction as a percentage.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        f64::from(self.completed) / f64::from(self.total) * 100.0
    }
}

impl fmt::Display for RemainingEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch {}/{}, progress: {:.2}%, estimated time remaining: {}",
            self.completed,
            self.total,
            self.percent(),
            HoursMinutesSeconds(self.remaining()),
        )
    }
}

/// Formats a duration as `Hh Mm Ss`, truncating fractional seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoursMinutesSeconds(pub Duration);

impl fmt::Display for HoursMinutesSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(f, "{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
