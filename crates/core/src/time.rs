use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

/// A simple clock abstraction for deterministic time in services and tests.
///
/// `Manual` clocks share their instant between clones, so a test can hand a
/// clone to the state machine and keep advancing the original.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    #[default]
    Default,
    Fixed(DateTime<Utc>),
    Manual(Arc<RwLock<DateTime<Utc>>>),
}

impl Clock {
    /// Returns a clock that uses the current system time.
    #[must_use]
    pub fn default_clock() -> Self {
        Self::Default
    }

    /// Returns a clock fixed at the given timestamp.
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns a shared, manually advanced clock starting at the given timestamp.
    #[must_use]
    pub fn manual(at: DateTime<Utc>) -> Self {
        Self::Manual(Arc::new(RwLock::new(at)))
    }

    /// Returns the current time according to the clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::Default => Utc::now(),
            Clock::Fixed(t) => *t,
            Clock::Manual(t) => *t.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Advance a fixed or manual clock by the given duration.
    ///
    /// Has no effect on `Clock::Default`. Advancing a manual clock is visible
    /// to every clone of it.
    pub fn advance(&mut self, delta: Duration) {
        match self {
            Clock::Default => {}
            Clock::Fixed(t) => *t += delta,
            Clock::Manual(t) => {
                let mut guard = t.write().unwrap_or_else(PoisonError::into_inner);
                *guard += delta;
            }
        }
    }

    /// Move a fixed or manual clock to an absolute instant (may go backwards,
    /// which is how tests simulate a system clock adjustment).
    pub fn set(&mut self, at: DateTime<Utc>) {
        match self {
            Clock::Default => {}
            Clock::Fixed(t) => *t = at,
            Clock::Manual(t) => {
                let mut guard = t.write().unwrap_or_else(PoisonError::into_inner);
                *guard = at;
            }
        }
    }

    /// Returns true if this clock represents real time.
    #[must_use]
    pub fn is_default(&self) -> bool {
        matches!(self, Clock::Default)
    }

    /// Returns true if this clock is fixed.
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Clock::Fixed(_))
    }
}

/// Deterministic timestamp for tests and examples (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests and doc examples.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

/// Returns a shared manual `Clock` starting at the deterministic test timestamp.
#[must_use]
pub fn manual_clock() -> Clock {
    Clock::manual(fixed_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let mut clock = manual_clock();
        let observer = clock.clone();

        clock.advance(Duration::seconds(90));

        assert_eq!(observer.now(), fixed_now() + Duration::seconds(90));
    }

    #[test]
    fn fixed_clock_advances_only_itself() {
        let mut clock = fixed_clock();
        let copy = clock.clone();

        clock.advance(Duration::seconds(5));

        assert_eq!(clock.now(), fixed_now() + Duration::seconds(5));
        assert_eq!(copy.now(), fixed_now());
    }

    #[test]
    fn set_can_move_backwards() {
        let mut clock = manual_clock();
        clock.set(fixed_now() - Duration::seconds(30));
        assert!(clock.now() < fixed_now());
    }
}
