//! Timestamp-based time accounting for timed sections.
//!
//! Every value here is derived from instants, never from a count of timer
//! ticks. A display timer that stops firing for ten minutes loses nothing:
//! the next call computes the whole delta in one step.

use chrono::{DateTime, Duration, Utc};

/// Elapsed exam time for a section.
///
/// - When `is_paused`, returns `prior_elapsed` unchanged.
/// - Otherwise returns `prior_elapsed + max(0, now - last_resume)`; a clock that
///   moved backwards contributes nothing.
#[must_use]
pub fn compute_elapsed(
    prior_elapsed: Duration,
    last_resume: DateTime<Utc>,
    is_paused: bool,
    now: DateTime<Utc>,
) -> Duration {
    if is_paused {
        return prior_elapsed;
    }
    prior_elapsed + non_negative(now.signed_duration_since(last_resume))
}

/// Remaining budget, clamped to `[0, limit]`.
#[must_use]
pub fn remaining(limit: Duration, elapsed: Duration) -> Duration {
    (limit - elapsed).clamp(Duration::zero(), non_negative(limit))
}

/// Remaining time on a countdown that had `remaining_at_anchor` left when it
/// was last (re)started at `anchor`. `None` means the countdown is frozen.
#[must_use]
pub fn countdown_remaining(
    remaining_at_anchor: Duration,
    anchor: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Duration {
    let spent = match anchor {
        Some(anchor) => non_negative(now.signed_duration_since(anchor)),
        None => Duration::zero(),
    };
    non_negative(remaining_at_anchor - spent)
}

/// Whole seconds in a duration, rounded down and never negative.
#[must_use]
pub fn whole_seconds(d: Duration) -> u64 {
    u64::try_from(d.num_seconds()).unwrap_or(0)
}

/// Converts a minute budget into a duration.
#[must_use]
pub fn minutes(limit_minutes: u32) -> Duration {
    Duration::minutes(i64::from(limit_minutes))
}

fn non_negative(d: Duration) -> Duration {
    d.max(Duration::zero())
}

/// Inputs needed to evaluate one section's clock at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionClock {
    pub limit: Duration,
    pub prior_elapsed: Duration,
    /// Instant accrual last (re)started; `None` while frozen.
    pub resumed_at: Option<DateTime<Utc>>,
}

impl SectionClock {
    #[must_use]
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        let elapsed = match self.resumed_at {
            Some(resumed_at) => compute_elapsed(self.prior_elapsed, resumed_at, false, now),
            None => self.prior_elapsed,
        };
        elapsed.min(self.limit)
    }

    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        remaining(self.limit, self.elapsed_at(now))
    }

    /// Whole elapsed seconds (floor).
    #[must_use]
    pub fn elapsed_seconds_at(&self, now: DateTime<Utc>) -> u64 {
        whole_seconds(self.elapsed_at(now))
    }

    /// Whole remaining seconds, so that elapsed + remaining equals the limit.
    #[must_use]
    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> u64 {
        whole_seconds(self.limit).saturating_sub(self.elapsed_seconds_at(now))
    }

    /// Instant the budget runs out if accrual continues uninterrupted.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.resumed_at
            .map(|resumed_at| resumed_at + remaining(self.limit, self.prior_elapsed))
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_at(now) <= Duration::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn secs(s: i64) -> Duration {
        Duration::seconds(s)
    }

    #[test]
    fn paused_returns_prior_unchanged() {
        let t0 = fixed_now();
        let elapsed = compute_elapsed(secs(42), t0, true, t0 + secs(1_000));
        assert_eq!(elapsed, secs(42));
    }

    #[test]
    fn running_adds_delta_since_resume() {
        let t0 = fixed_now();
        assert_eq!(compute_elapsed(secs(10), t0, false, t0 + secs(5)), secs(15));
    }

    #[test]
    fn clock_skew_clamps_delta_to_zero() {
        let t0 = fixed_now();
        assert_eq!(compute_elapsed(secs(10), t0, false, t0 - secs(30)), secs(10));
    }

    #[test]
    fn elapsed_is_monotonic_while_running() {
        let t0 = fixed_now();
        let mut last = Duration::zero();
        for step in 0..120 {
            let now = t0 + Duration::milliseconds(step * 733);
            let elapsed = compute_elapsed(secs(3), t0, false, now);
            assert!(elapsed >= last);
            last = elapsed;
        }
    }

    #[test]
    fn dropped_ticks_match_ticked_accounting() {
        let resume = fixed_now();
        let now = resume + secs(600);

        let one_step = compute_elapsed(Duration::zero(), resume, false, now);

        let mut ticked = Duration::zero();
        let mut anchor = resume;
        for _ in 0..600 {
            let next = anchor + secs(1);
            ticked = compute_elapsed(ticked, anchor, false, next);
            anchor = next;
        }

        assert_eq!(one_step, secs(600));
        assert_eq!(one_step, ticked);
    }

    #[test]
    fn calling_twice_is_idempotent() {
        let t0 = fixed_now();
        let a = compute_elapsed(secs(7), t0, false, t0 + secs(9));
        let b = compute_elapsed(secs(7), t0, false, t0 + secs(9));
        assert_eq!(a, b);
    }

    #[test]
    fn remaining_is_clamped() {
        assert_eq!(remaining(minutes(10), secs(60)), secs(540));
        assert_eq!(remaining(minutes(10), secs(9_999)), Duration::zero());
        assert_eq!(remaining(minutes(10), secs(-5)), minutes(10));
    }

    #[test]
    fn countdown_freezes_without_anchor() {
        let t0 = fixed_now();
        assert_eq!(countdown_remaining(secs(60), None, t0 + secs(500)), secs(60));
        assert_eq!(countdown_remaining(secs(60), Some(t0), t0 + secs(20)), secs(40));
        assert_eq!(countdown_remaining(secs(60), Some(t0), t0 + secs(90)), Duration::zero());
    }

    #[test]
    fn section_clock_caps_at_limit_and_reports_expiry() {
        let t0 = fixed_now();
        let clock = SectionClock {
            limit: minutes(1),
            prior_elapsed: secs(30),
            resumed_at: Some(t0),
        };

        assert_eq!(clock.expires_at(), Some(t0 + secs(30)));
        assert!(!clock.is_expired_at(t0 + secs(29)));
        assert!(clock.is_expired_at(t0 + secs(30)));
        assert_eq!(clock.elapsed_at(t0 + secs(300)), minutes(1));
        assert_eq!(clock.remaining_seconds_at(t0 + secs(300)), 0);
    }

    #[test]
    fn section_clock_seconds_add_up_to_limit() {
        let t0 = fixed_now();
        let clock = SectionClock {
            limit: minutes(10),
            prior_elapsed: Duration::milliseconds(59_500),
            resumed_at: Some(t0),
        };
        let now = t0 + Duration::milliseconds(800);
        assert_eq!(
            clock.elapsed_seconds_at(now) + clock.remaining_seconds_at(now),
            600
        );
    }
}
