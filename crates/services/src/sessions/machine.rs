use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use exam_core::Clock;
use exam_core::model::{
    Advance, QuestionRef, Section, SectionAdvance, Session, SessionConfig, SessionId,
    SessionPhase, SessionProgress, SessionSnapshot,
};
use tracing::{debug, info};

use super::events::SessionEvent;
use crate::error::SessionError;
use crate::persistence::{SaveMode, SnapshotSink};

//
// ─── STATE MACHINE ─────────────────────────────────────────────────────────────
//

/// Sole owner of an in-memory `Session`.
///
/// Every command reads the clock once, first applies any timeout that fell due
/// since the last call (instruction countdown, section budget), then performs
/// its own transition and hands a snapshot to the sink. Commands never wait on
/// persistence.
pub struct SessionStateMachine {
    session: Session,
    clock: Clock,
    sink: Arc<dyn SnapshotSink>,
    instruction_length: Duration,
    events: Vec<SessionEvent>,
    discarded: bool,
}

impl SessionStateMachine {
    /// A fresh session in setup.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        clock: Clock,
        sink: Arc<dyn SnapshotSink>,
        instruction_length: Duration,
    ) -> Self {
        Self::from_session(
            Session::new(SessionId::generate(), config),
            clock,
            sink,
            instruction_length,
        )
    }

    /// Wrap a session rehydrated from a snapshot.
    #[must_use]
    pub fn from_session(
        session: Session,
        clock: Clock,
        sink: Arc<dyn SnapshotSink>,
        instruction_length: Duration,
    ) -> Self {
        Self {
            session,
            clock,
            sink,
            instruction_length,
            events: Vec::new(),
            discarded: false,
        }
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.session.is_paused()
    }

    #[must_use]
    pub fn is_on_instructions(&self) -> bool {
        self.session.is_on_instructions()
    }

    #[must_use]
    pub fn current_section(&self) -> Option<&Section> {
        self.session.current_section()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&QuestionRef> {
        self.session.current_question()
    }

    #[must_use]
    pub fn elapsed_seconds(&self, section_index: usize) -> Option<u64> {
        self.session
            .elapsed_seconds_at(section_index, self.clock.now())
    }

    #[must_use]
    pub fn remaining_seconds(&self, section_index: usize) -> Option<u64> {
        self.session
            .remaining_seconds_at(section_index, self.clock.now())
    }

    /// Whole seconds left on the instruction countdown, if one is showing.
    #[must_use]
    pub fn instruction_seconds_remaining(&self) -> Option<u64> {
        let now = self.clock.now();
        self.session
            .instruction_timer()
            .map(|timer| exam_core::accounting::whole_seconds(timer.remaining_at(now)))
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        self.session.progress()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Drain transitions recorded since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ─── Commands ───────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `InvalidState` once started, `InvalidConfiguration` if `order`
    /// is not a permutation of the sections.
    pub fn reorder_sections(&mut self, order: &[usize]) -> Result<(), SessionError> {
        self.session.reorder_sections(order)?;
        Ok(())
    }

    /// Leave setup and show the first section's instructions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for empty or malformed configurations,
    /// `InvalidState` if already started.
    pub fn start(&mut self) -> Result<(), SessionError> {
        let now = self.clock.now();
        self.session.start(now, self.instruction_length)?;
        info!(
            session_id = %self.id(),
            sections = self.session.sections().len(),
            questions = self.session.questions().len(),
            "session started"
        );
        self.events.push(SessionEvent::Started { at: now });
        self.events.push(SessionEvent::SectionEntered { index: 0 });
        self.persist(SaveMode::Forced);
        Ok(())
    }

    /// Close the instruction screen and start the exam clock.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless running.
    pub fn dismiss_instructions(&mut self) -> Result<bool, SessionError> {
        let now = self.catch_up();
        let section = self.session.current_section_index();
        if !self.session.dismiss_instructions(now)? {
            return Ok(false);
        }
        self.session.touch_activity(now);
        self.events.push(SessionEvent::InstructionsClosed {
            section,
            timed_out: false,
        });
        self.persist(SaveMode::Debounced);
        Ok(true)
    }

    /// Presentation poll. Applies timeouts that fell due; cheap and safe to
    /// call at any rate, including not at all for long stretches.
    pub fn tick(&mut self) {
        self.catch_up();
    }

    /// Force the current section to close if its budget is spent.
    ///
    /// Returns `true` when the section was closed.
    pub fn section_expired(&mut self) -> bool {
        let now = self.clock.now();
        self.expire_section_at(now)
    }

    /// # Errors
    ///
    /// Returns `InvalidState` in setup or after the session ended.
    pub fn pause(&mut self) -> Result<bool, SessionError> {
        self.pause_with(SaveMode::Debounced)
    }

    /// Pause and write through immediately (tab hidden, unload).
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` in setup or after the session ended.
    pub fn pause_and_flush(&mut self) -> Result<bool, SessionError> {
        self.pause_with(SaveMode::Forced)
    }

    fn pause_with(&mut self, mode: SaveMode) -> Result<bool, SessionError> {
        let now = self.catch_up();
        let paused = self.session.pause(now)?;
        if paused {
            debug!(session_id = %self.id(), "session paused");
            self.events.push(SessionEvent::Paused { at: now });
        }
        // A forced save is still wanted when already paused: the caller is
        // about to lose the page.
        if paused || mode == SaveMode::Forced {
            self.persist(mode);
        }
        Ok(paused)
    }

    /// # Errors
    ///
    /// Returns `InvalidState` in setup or after the session ended.
    pub fn resume(&mut self) -> Result<bool, SessionError> {
        let now = self.clock.now();
        let resumed = self.session.resume(now)?;
        if resumed {
            debug!(session_id = %self.id(), "session resumed");
            self.events.push(SessionEvent::Resumed { at: now });
            self.persist(SaveMode::Debounced);
        }
        Ok(resumed)
    }

    /// # Errors
    ///
    /// Returns `OutOfRangeIndex` unless `question_index` is the current or an
    /// earlier question of the current section; `InvalidState` outside
    /// running/paused.
    pub fn record_answer(
        &mut self,
        question_index: usize,
        answer: impl Into<String>,
        is_correct: Option<bool>,
        guessed: bool,
        time_spent_sec: u32,
    ) -> Result<(), SessionError> {
        let now = self.catch_up();
        self.session
            .record_answer(question_index, answer, is_correct, guessed, time_spent_sec)?;
        self.session.touch_activity(now);
        debug!(session_id = %self.id(), question_index, "answer recorded");
        self.events
            .push(SessionEvent::AnswerRecorded { question_index });
        self.persist(SaveMode::Debounced);
        Ok(())
    }

    /// Post-hoc grading; allowed after the session ended.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRangeIndex` for unknown questions, `InvalidState` in setup.
    pub fn set_correctness(
        &mut self,
        question_index: usize,
        is_correct: Option<bool>,
    ) -> Result<(), SessionError> {
        self.session.set_correctness(question_index, is_correct)?;
        self.persist(SaveMode::Debounced);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `InvalidState` unless running.
    pub fn advance_question(&mut self) -> Result<Advance, SessionError> {
        let now = self.catch_up();
        let advance = self
            .session
            .advance_question(now, self.instruction_length)?;
        self.session.touch_activity(now);
        match advance {
            Advance::NextQuestion { index } => {
                self.events.push(SessionEvent::QuestionEntered { index });
                self.persist(SaveMode::Debounced);
            }
            Advance::Section(outcome) => self.after_section(outcome, false, now),
        }
        Ok(advance)
    }

    /// Submit the current section.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless running.
    pub fn advance_section(&mut self) -> Result<SectionAdvance, SessionError> {
        let now = self.catch_up();
        let outcome = self
            .session
            .advance_section(now, self.instruction_length)?;
        self.session.touch_activity(now);
        self.after_section(outcome, false, now);
        Ok(outcome)
    }

    /// Returns `false` if the session had already ended.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for a session that never started.
    pub fn end(&mut self) -> Result<bool, SessionError> {
        let now = self.catch_up();
        let ended = self.session.end(now)?;
        if ended {
            self.record_end(now);
        }
        Ok(ended)
    }

    /// Throw the attempt away, locally and remotely.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for ended sessions, which are kept for review.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        let phase = self.session.phase();
        if phase == SessionPhase::Ended {
            return Err(SessionError::InvalidState {
                command: "reset",
                phase,
            });
        }
        self.sink.discard(self.id());
        self.discarded = true;
        info!(session_id = %self.id(), "session discarded");
        self.events.push(SessionEvent::Discarded);
        Ok(())
    }

    /// Record confirmed user presence. Does not affect time accounting.
    pub fn touch_activity(&mut self, at: DateTime<Utc>) {
        if !matches!(
            self.session.phase(),
            SessionPhase::Running | SessionPhase::Paused
        ) {
            return;
        }
        let before = self.session.last_active_timestamp();
        self.session.touch_activity(at);
        if self.session.last_active_timestamp() != before {
            self.persist(SaveMode::Debounced);
        }
    }

    /// Write the current snapshot through immediately.
    pub fn save_now(&self) {
        self.persist(SaveMode::Forced);
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    /// Apply due timeouts and return the instant the calling command uses.
    fn catch_up(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        if self.session.phase() != SessionPhase::Running {
            return now;
        }

        let expired_instructions = self
            .session
            .instruction_timer()
            .and_then(|timer| timer.expires_at())
            .filter(|expires_at| *expires_at <= now);
        if let Some(expires_at) = expired_instructions {
            let section = self.session.current_section_index();
            // Accrual starts at the countdown's end even if noticed late.
            if let Ok(true) = self.session.dismiss_instructions(expires_at) {
                debug!(session_id = %self.id(), section, "instruction countdown ran out");
                self.events.push(SessionEvent::InstructionsClosed {
                    section,
                    timed_out: true,
                });
                self.persist(SaveMode::Debounced);
            }
        }

        self.expire_section_at(now);
        now
    }

    fn expire_section_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.session.phase() != SessionPhase::Running || !self.session.is_accruing() {
            return false;
        }
        let index = self.session.current_section_index();
        let expired = self
            .session
            .section_clock(index)
            .is_some_and(|clock| clock.is_expired_at(now));
        if !expired {
            return false;
        }

        match self.session.advance_section(now, self.instruction_length) {
            Ok(outcome) => {
                info!(session_id = %self.id(), section = index, "section time expired");
                self.after_section(outcome, true, now);
                true
            }
            Err(err) => {
                debug!(session_id = %self.id(), error = %err, "expiry not applied");
                false
            }
        }
    }

    fn after_section(&mut self, outcome: SectionAdvance, expired: bool, now: DateTime<Utc>) {
        if let Some(index) = outcome.completed {
            self.events.push(SessionEvent::SectionCompleted {
                index,
                elapsed_secs: exam_core::accounting::whole_seconds(outcome.elapsed),
                expired,
            });
        }
        match outcome.entered {
            Some(index) => {
                info!(session_id = %self.id(), section = index, "section entered");
                self.events.push(SessionEvent::SectionEntered { index });
                self.persist(SaveMode::Forced);
            }
            None => self.record_end(now),
        }
    }

    fn record_end(&mut self, now: DateTime<Utc>) {
        let progress = self.session.progress();
        info!(
            session_id = %self.id(),
            answered = progress.answered,
            total = progress.total,
            "session ended"
        );
        self.events.push(SessionEvent::Ended { at: now });
        self.persist(SaveMode::Forced);
    }

    fn persist(&self, mode: SaveMode) {
        if self.discarded || self.session.phase() == SessionPhase::Setup {
            return;
        }
        self.sink.save(self.session.snapshot(), mode);
    }
}
