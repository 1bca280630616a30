use chrono::Duration;

use crate::accounting::{self, whole_seconds};
use crate::model::session::SessionModelError;

/// A timed block within a session.
///
/// `elapsed` only moves forward and never exceeds the time limit; callers
/// commit fresh values computed by the accountant and the section keeps the
/// larger, clamped one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    time_limit_minutes: u32,
    elapsed: Duration,
}

impl Section {
    #[must_use]
    pub fn new(name: impl Into<String>, time_limit_minutes: u32) -> Self {
        Self {
            name: name.into(),
            time_limit_minutes,
            elapsed: Duration::zero(),
        }
    }

    /// Rehydrate a section from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::InvalidSnapshot` if the elapsed time is
    /// negative or larger than the section's budget.
    pub fn from_persisted(
        name: String,
        time_limit_minutes: u32,
        elapsed_ms: i64,
    ) -> Result<Self, SessionModelError> {
        let Some(elapsed) = Duration::try_milliseconds(elapsed_ms)
            .filter(|d| *d >= Duration::zero() && *d <= accounting::minutes(time_limit_minutes))
        else {
            return Err(SessionModelError::InvalidSnapshot(format!(
                "section {name:?} has elapsed {elapsed_ms}ms outside its {time_limit_minutes}m budget"
            )));
        };
        Ok(Self {
            name,
            time_limit_minutes,
            elapsed,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn time_limit_minutes(&self) -> u32 {
        self.time_limit_minutes
    }

    #[must_use]
    pub fn limit(&self) -> Duration {
        accounting::minutes(self.time_limit_minutes)
    }

    /// Committed exam time; excludes any interval still accruing.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        self.elapsed.num_milliseconds()
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        whole_seconds(self.elapsed)
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u64 {
        whole_seconds(self.limit()).saturating_sub(self.elapsed_seconds())
    }

    pub(crate) fn commit(&mut self, elapsed: Duration) {
        let clamped = elapsed.min(self.limit());
        if clamped > self.elapsed {
            self.elapsed = clamped;
        }
    }
}
