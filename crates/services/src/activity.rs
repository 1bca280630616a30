use chrono::{DateTime, Duration, Utc};
use exam_core::Clock;
use exam_core::model::SessionPhase;
use tracing::debug;

use crate::error::SessionError;
use crate::sessions::SessionStateMachine;

/// Page visibility as reported by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Turns environment signals into state machine commands.
///
/// The monitor only ever resumes a pause it caused itself; a pause the user
/// asked for stays in place until the user resumes.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    clock: Clock,
    inactivity_threshold: Duration,
    auto_paused: bool,
    last_input: Option<DateTime<Utc>>,
}

impl ActivityMonitor {
    #[must_use]
    pub fn new(clock: Clock, inactivity_threshold: Duration) -> Self {
        Self {
            clock,
            inactivity_threshold,
            auto_paused: false,
            last_input: None,
        }
    }

    #[must_use]
    pub fn is_auto_paused(&self) -> bool {
        self.auto_paused
    }

    #[must_use]
    pub fn last_input(&self) -> Option<DateTime<Utc>> {
        self.last_input
    }

    /// Forget per-session state when a different session becomes active.
    pub fn reset(&mut self) {
        self.auto_paused = false;
        self.last_input = None;
    }

    /// Keyboard, pointer or touch input.
    pub fn record_input(&mut self) {
        self.last_input = Some(self.clock.now());
    }

    /// # Errors
    ///
    /// Propagates state machine errors from the pause or resume it issues.
    pub fn visibility_changed(
        &mut self,
        machine: &mut SessionStateMachine,
        visibility: Visibility,
    ) -> Result<(), SessionError> {
        match visibility {
            Visibility::Hidden => {
                if is_live(machine) {
                    machine.pause_and_flush()?;
                    self.auto_paused = true;
                    debug!(session_id = %machine.id(), "auto-paused on hide");
                }
            }
            Visibility::Visible => {
                if std::mem::take(&mut self.auto_paused)
                    && machine.phase() == SessionPhase::Paused
                {
                    machine.resume()?;
                    debug!(session_id = %machine.id(), "auto-resumed on show");
                }
            }
        }
        Ok(())
    }

    /// Periodic presence check. Refreshes the session's last-active instant
    /// when input arrived within the inactivity threshold. Returns whether it
    /// did; time accounting is never touched.
    pub fn liveness_tick(&mut self, machine: &mut SessionStateMachine) -> bool {
        if !is_live(machine) {
            return false;
        }
        let now = self.clock.now();
        let present = self
            .last_input
            .is_some_and(|input| now.signed_duration_since(input) <= self.inactivity_threshold);
        if present {
            machine.touch_activity(now);
        }
        present
    }

    /// Page is going away. Best effort: pause and write through.
    ///
    /// # Errors
    ///
    /// Propagates state machine errors from the pause.
    pub fn unload(&mut self, machine: &mut SessionStateMachine) -> Result<(), SessionError> {
        if is_live(machine) {
            machine.pause_and_flush()?;
        }
        Ok(())
    }
}

fn is_live(machine: &SessionStateMachine) -> bool {
    machine.phase() == SessionPhase::Running
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use exam_core::model::{
        PaperId, PaperRef, QuestionId, QuestionRef, Section, SessionConfig, SessionId,
        SessionSnapshot,
    };
    use exam_core::time::manual_clock;

    use crate::persistence::{SaveMode, SnapshotSink};

    #[derive(Default)]
    struct Saves(Mutex<Vec<(SessionSnapshot, SaveMode)>>);

    impl SnapshotSink for Saves {
        fn save(&self, snapshot: SessionSnapshot, mode: SaveMode) {
            self.0.lock().unwrap().push((snapshot, mode));
        }

        fn discard(&self, _id: SessionId) {}
    }

    fn running(clock: &Clock) -> (SessionStateMachine, Arc<Saves>) {
        let saves = Arc::new(Saves::default());
        let mut machine = SessionStateMachine::new(
            SessionConfig {
                paper: PaperRef::new(PaperId::new(1), "BMAT 2019", Some("Section 1".into())),
                sections: vec![Section::new("Aptitude", 60)],
                questions: vec![QuestionRef::new(QuestionId::new(1), 0)],
            },
            clock.clone(),
            Arc::clone(&saves) as Arc<dyn SnapshotSink>,
            Duration::seconds(60),
        );
        machine.start().unwrap();
        machine.dismiss_instructions().unwrap();
        (machine, saves)
    }

    #[test]
    fn hide_pauses_with_forced_save_and_show_resumes() {
        let clock = manual_clock();
        let (mut machine, saves) = running(&clock);
        let mut monitor = ActivityMonitor::new(clock, Duration::seconds(30));

        monitor
            .visibility_changed(&mut machine, Visibility::Hidden)
            .unwrap();
        assert!(machine.is_paused());
        assert!(monitor.is_auto_paused());
        let (last, mode) = saves.0.lock().unwrap().last().cloned().unwrap();
        assert!(last.is_paused);
        assert_eq!(mode, SaveMode::Forced);

        monitor
            .visibility_changed(&mut machine, Visibility::Visible)
            .unwrap();
        assert!(!machine.is_paused());
        assert!(!monitor.is_auto_paused());
    }

    #[test]
    fn manual_pause_survives_visibility_changes() {
        let clock = manual_clock();
        let (mut machine, _saves) = running(&clock);
        let mut monitor = ActivityMonitor::new(clock, Duration::seconds(30));

        machine.pause().unwrap();
        monitor
            .visibility_changed(&mut machine, Visibility::Hidden)
            .unwrap();
        monitor
            .visibility_changed(&mut machine, Visibility::Visible)
            .unwrap();

        assert!(machine.is_paused());
    }

    #[test]
    fn liveness_requires_recent_input() {
        let mut clock = manual_clock();
        let (mut machine, _saves) = running(&clock);
        let mut monitor = ActivityMonitor::new(clock.clone(), Duration::seconds(30));

        clock.advance(Duration::seconds(5));
        assert!(!monitor.liveness_tick(&mut machine));

        monitor.record_input();
        clock.advance(Duration::seconds(20));
        assert!(monitor.liveness_tick(&mut machine));
        assert_eq!(machine.session().last_active_timestamp(), Some(clock.now()));

        let before = machine.remaining_seconds(0);
        clock.advance(Duration::seconds(11));
        assert!(!monitor.liveness_tick(&mut machine));
        assert_eq!(machine.remaining_seconds(0), before.map(|r| r - 11));
    }

    #[test]
    fn unload_pauses_running_session_only() {
        let clock = manual_clock();
        let (mut machine, saves) = running(&clock);
        let mut monitor = ActivityMonitor::new(clock, Duration::seconds(30));

        monitor.unload(&mut machine).unwrap();
        assert!(machine.is_paused());
        let count = saves.0.lock().unwrap().len();

        monitor.unload(&mut machine).unwrap();
        assert_eq!(saves.0.lock().unwrap().len(), count);
        assert!(!monitor.is_auto_paused());
    }
}
