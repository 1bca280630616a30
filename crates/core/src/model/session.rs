use std::fmt;
use std::ops::Range;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::accounting::{self, SectionClock};
use crate::model::ids::{PaperId, SessionId};
use crate::model::question::QuestionRef;
use crate::model::section::Section;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionModelError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("index {index} is outside the addressable range 0..{limit}")]
    OutOfRangeIndex { index: usize, limit: usize },

    #[error("{command} is not allowed while the session is {phase}")]
    InvalidState {
        command: &'static str,
        phase: SessionPhase,
    },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

//
// ─── PHASE ────────────────────────────────────────────────────────────────────
//

/// Lifecycle phase, derived from the session's timestamps and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Configuration is still mutable; nothing is timed yet.
    Setup,
    /// Started and not paused. May be on an instruction screen.
    Running,
    Paused,
    /// Terminal; only post-hoc grading fields may change.
    Ended,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionPhase::Setup => "in setup",
            SessionPhase::Running => "running",
            SessionPhase::Paused => "paused",
            SessionPhase::Ended => "ended",
        };
        f.write_str(label)
    }
}

//
// ─── CONFIGURATION ────────────────────────────────────────────────────────────
//

/// Which exam content an attempt targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperRef {
    pub id: PaperId,
    pub name: String,
    pub variant: Option<String>,
}

impl PaperRef {
    #[must_use]
    pub fn new(id: PaperId, name: impl Into<String>, variant: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            variant,
        }
    }
}

/// Everything needed to create a session in the setup phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub paper: PaperRef,
    pub sections: Vec<Section>,
    pub questions: Vec<QuestionRef>,
}

//
// ─── INSTRUCTION TIMER ────────────────────────────────────────────────────────
//

/// Countdown shown before a section's exam clock starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionTimer {
    remaining: Duration,
    resumed_at: Option<DateTime<Utc>>,
}

impl InstructionTimer {
    #[must_use]
    pub fn started(length: Duration, now: DateTime<Utc>) -> Self {
        Self {
            remaining: length,
            resumed_at: Some(now),
        }
    }

    /// # Errors
    ///
    /// Returns `SessionModelError::InvalidSnapshot` for a negative or
    /// unrepresentable remainder.
    pub fn from_persisted(
        remaining_ms: i64,
        resumed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, SessionModelError> {
        let remaining = Duration::try_milliseconds(remaining_ms)
            .filter(|d| *d >= Duration::zero())
            .ok_or_else(|| {
                SessionModelError::InvalidSnapshot(format!(
                    "instruction countdown has {remaining_ms}ms remaining"
                ))
            })?;
        Ok(Self {
            remaining,
            resumed_at,
        })
    }

    /// Remaining countdown as of the last freeze/resume.
    #[must_use]
    pub fn remaining_ms(&self) -> i64 {
        self.remaining.num_milliseconds()
    }

    #[must_use]
    pub fn resumed_at(&self) -> Option<DateTime<Utc>> {
        self.resumed_at
    }

    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        accounting::countdown_remaining(self.remaining, self.resumed_at, now)
    }

    /// Instant the countdown reaches zero, if it is running.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.resumed_at
            .and_then(|at| at.checked_add_signed(self.remaining))
    }

    fn freeze(&mut self, now: DateTime<Utc>) {
        self.remaining = self.remaining_at(now);
        self.resumed_at = None;
    }

    fn resume(&mut self, now: DateTime<Utc>) {
        self.resumed_at = Some(now);
    }
}

//
// ─── ADVANCE RESULTS ──────────────────────────────────────────────────────────
//

/// Result of leaving a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionAdvance {
    /// Section that was completed, if one was current.
    pub completed: Option<usize>,
    /// Final exam time committed for the completed section.
    pub elapsed: Duration,
    /// Next section (now on its instruction screen), or `None` if the session ended.
    pub entered: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    NextQuestion { index: usize },
    Section(SectionAdvance),
}

/// Aggregated view of session progress, useful for UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProgress {
    pub total: usize,
    pub answered: usize,
    pub position: usize,
    pub fraction: f64,
}

//
// ─── SESSION ──────────────────────────────────────────────────────────────────
//

/// One practice attempt: sections, questions, cursors, timing and answers.
///
/// Transition methods take the current instant explicitly so that the
/// aggregate stays deterministic; the services layer supplies it from a
/// `Clock`. All elapsed time is derived from `section_resumed_at` and the
/// committed per-section totals, never from tick counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: SessionId,
    paper: PaperRef,
    sections: Vec<Section>,
    questions: Vec<QuestionRef>,
    current_section_index: usize,
    current_question_index: usize,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    is_paused: bool,
    paused_at: Option<DateTime<Utc>>,
    last_active_timestamp: Option<DateTime<Utc>>,
    section_resumed_at: Option<DateTime<Utc>>,
    instruction_timer: Option<InstructionTimer>,
    answers: Vec<Option<String>>,
    correct_flags: Vec<Option<bool>>,
    guessed_flags: Vec<bool>,
    per_question_sec: Vec<u32>,
}

impl Session {
    /// Create a session in the setup phase.
    #[must_use]
    pub fn new(id: SessionId, config: SessionConfig) -> Self {
        let len = config.questions.len();
        Self {
            id,
            paper: config.paper,
            sections: config.sections,
            questions: config.questions,
            current_section_index: 0,
            current_question_index: 0,
            started_at: None,
            ended_at: None,
            is_paused: false,
            paused_at: None,
            last_active_timestamp: None,
            section_resumed_at: None,
            instruction_timer: None,
            answers: vec![None; len],
            correct_flags: vec![None; len],
            guessed_flags: vec![false; len],
            per_question_sec: vec![0; len],
        }
    }

    /// Rebuild a session from raw persisted parts, checking every invariant.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::InvalidSnapshot` when the parts describe a
    /// state the engine could never have produced.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: SessionId,
        paper: PaperRef,
        sections: Vec<Section>,
        questions: Vec<QuestionRef>,
        cursors: (usize, usize),
        lifecycle: PersistedLifecycle,
        instruction_timer: Option<InstructionTimer>,
        answers: PersistedAnswers,
    ) -> Result<Self, SessionModelError> {
        let invalid = |reason: String| -> Result<Self, SessionModelError> {
            Err(SessionModelError::InvalidSnapshot(reason))
        };
        let (current_section_index, current_question_index) = cursors;
        let len = questions.len();

        if answers.answers.len() != len
            || answers.correct_flags.len() != len
            || answers.guessed_flags.len() != len
            || answers.per_question_sec.len() != len
        {
            return invalid(format!("per-question arrays do not match {len} questions"));
        }
        if let Err(SessionModelError::InvalidConfiguration(reason)) =
            validate_partition(&sections, &questions)
        {
            return invalid(reason);
        }
        if current_section_index > sections.len() {
            return invalid(format!(
                "section cursor {current_section_index} beyond {} sections",
                sections.len()
            ));
        }
        if current_question_index > len {
            return invalid(format!(
                "question cursor {current_question_index} beyond {len} questions"
            ));
        }
        if current_section_index < sections.len() {
            let range = section_range(&questions, current_section_index);
            let inside = if range.is_empty() {
                current_question_index == range.start
            } else {
                range.contains(&current_question_index)
            };
            if !inside {
                return invalid(format!(
                    "question cursor {current_question_index} is not in section {current_section_index}"
                ));
            }
        }

        let PersistedLifecycle {
            started_at,
            ended_at,
            is_paused,
            paused_at,
            last_active_timestamp,
            section_resumed_at,
        } = lifecycle;

        if is_paused != paused_at.is_some() {
            return invalid("pause flag and pause instant disagree".into());
        }
        if is_paused && ended_at.is_some() {
            return invalid("session is both paused and ended".into());
        }
        if started_at.is_none() {
            let touched = ended_at.is_some()
                || is_paused
                || current_section_index > 0
                || current_question_index > 0
                || section_resumed_at.is_some()
                || instruction_timer.is_some();
            if touched {
                return invalid("session has progress but no start instant".into());
            }
        } else if sections.is_empty() || questions.is_empty() {
            return invalid("started session has no sections or questions".into());
        }
        if section_resumed_at.is_some() && instruction_timer.is_some() {
            return invalid("exam clock and instruction countdown both running".into());
        }
        if section_resumed_at.is_some() && (is_paused || ended_at.is_some()) {
            return invalid("exam clock running on a paused or ended session".into());
        }
        if section_resumed_at.is_some() && current_section_index >= sections.len() {
            return invalid("exam clock running with no current section".into());
        }
        if let Some(timer) = instruction_timer {
            if timer.resumed_at().is_some() && is_paused {
                return invalid("instruction countdown running on a paused session".into());
            }
            if ended_at.is_some() || current_section_index >= sections.len() {
                return invalid("instruction countdown without a current section".into());
            }
        }

        Ok(Self {
            id,
            paper,
            sections,
            questions,
            current_section_index,
            current_question_index,
            started_at,
            ended_at,
            is_paused,
            paused_at,
            last_active_timestamp,
            section_resumed_at,
            instruction_timer,
            answers: answers.answers,
            correct_flags: answers.correct_flags,
            guessed_flags: answers.guessed_flags,
            per_question_sec: answers.per_question_sec,
        })
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn paper(&self) -> &PaperRef {
        &self.paper
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[must_use]
    pub fn questions(&self) -> &[QuestionRef] {
        &self.questions
    }

    #[must_use]
    pub fn current_section_index(&self) -> usize {
        self.current_section_index
    }

    #[must_use]
    pub fn current_question_index(&self) -> usize {
        self.current_question_index
    }

    #[must_use]
    pub fn current_section(&self) -> Option<&Section> {
        self.sections.get(self.current_section_index)
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&QuestionRef> {
        if self.current_section().is_none() {
            return None;
        }
        self.questions
            .get(self.current_question_index)
            .filter(|q| q.section_index == self.current_section_index)
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    #[must_use]
    pub fn paused_at(&self) -> Option<DateTime<Utc>> {
        self.paused_at
    }

    #[must_use]
    pub fn last_active_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_active_timestamp
    }

    #[must_use]
    pub fn section_resumed_at(&self) -> Option<DateTime<Utc>> {
        self.section_resumed_at
    }

    #[must_use]
    pub fn instruction_timer(&self) -> Option<&InstructionTimer> {
        self.instruction_timer.as_ref()
    }

    #[must_use]
    pub fn answers(&self) -> &[Option<String>] {
        &self.answers
    }

    #[must_use]
    pub fn correct_flags(&self) -> &[Option<bool>] {
        &self.correct_flags
    }

    #[must_use]
    pub fn guessed_flags(&self) -> &[bool] {
        &self.guessed_flags
    }

    #[must_use]
    pub fn per_question_sec(&self) -> &[u32] {
        &self.per_question_sec
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.ended_at.is_some() {
            SessionPhase::Ended
        } else if self.started_at.is_none() {
            SessionPhase::Setup
        } else if self.is_paused {
            SessionPhase::Paused
        } else {
            SessionPhase::Running
        }
    }

    #[must_use]
    pub fn is_on_instructions(&self) -> bool {
        self.instruction_timer.is_some()
    }

    /// True while the current section's exam clock is running.
    #[must_use]
    pub fn is_accruing(&self) -> bool {
        self.section_resumed_at.is_some()
    }

    /// Question indices belonging to a section.
    #[must_use]
    pub fn section_range(&self, section_index: usize) -> Range<usize> {
        section_range(&self.questions, section_index)
    }

    /// Clock inputs for a section; only the current section can be accruing.
    #[must_use]
    pub fn section_clock(&self, section_index: usize) -> Option<SectionClock> {
        let section = self.sections.get(section_index)?;
        let resumed_at = if section_index == self.current_section_index {
            self.section_resumed_at
        } else {
            None
        };
        Some(SectionClock {
            limit: section.limit(),
            prior_elapsed: section.elapsed(),
            resumed_at,
        })
    }

    #[must_use]
    pub fn elapsed_at(&self, section_index: usize, now: DateTime<Utc>) -> Option<Duration> {
        self.section_clock(section_index).map(|c| c.elapsed_at(now))
    }

    #[must_use]
    pub fn elapsed_seconds_at(&self, section_index: usize, now: DateTime<Utc>) -> Option<u64> {
        self.section_clock(section_index)
            .map(|c| c.elapsed_seconds_at(now))
    }

    #[must_use]
    pub fn remaining_seconds_at(&self, section_index: usize, now: DateTime<Utc>) -> Option<u64> {
        self.section_clock(section_index)
            .map(|c| c.remaining_seconds_at(now))
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        let total = self.questions.len();
        let answered = self.answers.iter().filter(|a| a.is_some()).count();
        let position = if self.ended_at.is_some() {
            total
        } else {
            self.current_question_index.min(total)
        };
        #[allow(clippy::cast_precision_loss)]
        let fraction = if total == 0 {
            0.0
        } else {
            position as f64 / total as f64
        };
        SessionProgress {
            total,
            answered,
            position,
            fraction,
        }
    }

    // ─── Setup ────────────────────────────────────────────────────────────────

    /// Reorder sections before the session starts.
    ///
    /// `order[i]` is the current index of the section that should become
    /// section `i`. Questions follow their sections.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once started, `InvalidConfiguration` if `order`
    /// is not a permutation of the section indices.
    pub fn reorder_sections(&mut self, order: &[usize]) -> Result<(), SessionModelError> {
        self.require_phase("reorder_sections", &[SessionPhase::Setup])?;

        let n = self.sections.len();
        let mut seen = vec![false; n];
        if order.len() != n {
            return Err(SessionModelError::InvalidConfiguration(format!(
                "reorder lists {} sections, session has {n}",
                order.len()
            )));
        }
        for &old in order {
            if old >= n || seen[old] {
                return Err(SessionModelError::InvalidConfiguration(
                    "reorder is not a permutation of the sections".into(),
                ));
            }
            seen[old] = true;
        }

        let mut new_index_of = vec![0; n];
        for (new, &old) in order.iter().enumerate() {
            new_index_of[old] = new;
        }
        self.sections = order.iter().map(|&old| self.sections[old].clone()).collect();
        for q in &mut self.questions {
            if let Some(&new) = new_index_of.get(q.section_index) {
                q.section_index = new;
            }
        }
        self.questions.sort_by_key(|q| q.section_index);
        Ok(())
    }

    // ─── Transitions ──────────────────────────────────────────────────────────

    /// Leave setup and enter the first section's instruction screen.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for empty or malformed configurations,
    /// `InvalidState` if already started.
    pub fn start(
        &mut self,
        now: DateTime<Utc>,
        instruction_length: Duration,
    ) -> Result<(), SessionModelError> {
        self.require_phase("start", &[SessionPhase::Setup])?;
        validate_partition(&self.sections, &self.questions)?;
        if self.sections.is_empty() {
            return Err(SessionModelError::InvalidConfiguration(
                "a session needs at least one section".into(),
            ));
        }
        if self.questions.is_empty() {
            return Err(SessionModelError::InvalidConfiguration(
                "a session needs at least one question".into(),
            ));
        }
        if let Some(section) = self.sections.iter().find(|s| s.time_limit_minutes() == 0) {
            return Err(SessionModelError::InvalidConfiguration(format!(
                "section {:?} has no time budget",
                section.name()
            )));
        }

        self.started_at = Some(now);
        self.last_active_timestamp = Some(now);
        self.enter_section(0, now, instruction_length);
        Ok(())
    }

    fn enter_section(&mut self, index: usize, now: DateTime<Utc>, instruction_length: Duration) {
        self.current_section_index = index;
        self.current_question_index = self.section_range(index).start;
        self.section_resumed_at = None;
        self.instruction_timer = Some(InstructionTimer::started(instruction_length, now));
    }

    /// Close the instruction screen and start the exam clock at `at`.
    ///
    /// Returns `false` when no instruction screen was showing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is running.
    pub fn dismiss_instructions(&mut self, at: DateTime<Utc>) -> Result<bool, SessionModelError> {
        self.require_phase("dismiss_instructions", &[SessionPhase::Running])?;
        if self.instruction_timer.take().is_none() {
            return Ok(false);
        }
        self.section_resumed_at = Some(at);
        Ok(true)
    }

    /// Freeze all clocks. Returns `false` if already paused.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` in setup or after the session ended.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<bool, SessionModelError> {
        self.require_phase("pause", &[SessionPhase::Running, SessionPhase::Paused])?;
        if self.is_paused {
            return Ok(false);
        }
        self.commit_current(now);
        if let Some(timer) = self.instruction_timer.as_mut() {
            timer.freeze(now);
        }
        self.is_paused = true;
        self.paused_at = Some(now);
        Ok(true)
    }

    /// Restart the frozen clock from `now`. Returns `false` if not paused.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` in setup or after the session ended.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<bool, SessionModelError> {
        self.require_phase("resume", &[SessionPhase::Running, SessionPhase::Paused])?;
        if !self.is_paused {
            return Ok(false);
        }
        self.is_paused = false;
        self.paused_at = None;
        self.last_active_timestamp = Some(now);
        if let Some(timer) = self.instruction_timer.as_mut() {
            timer.resume(now);
        } else if self.current_section_index < self.sections.len() {
            self.section_resumed_at = Some(now);
        }
        Ok(true)
    }

    /// Store an answer in the per-question arrays.
    ///
    /// Only the current question or an earlier one in the current section can
    /// be written; cursors do not move.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRangeIndex` for any other index and `InvalidState`
    /// outside running/paused.
    pub fn record_answer(
        &mut self,
        question_index: usize,
        answer: impl Into<String>,
        is_correct: Option<bool>,
        guessed: bool,
        time_spent_sec: u32,
    ) -> Result<(), SessionModelError> {
        self.require_phase(
            "record_answer",
            &[SessionPhase::Running, SessionPhase::Paused],
        )?;
        let range = self.section_range(self.current_section_index);
        let limit = (self.current_question_index + 1).min(range.end);
        if question_index < range.start || question_index >= limit {
            return Err(SessionModelError::OutOfRangeIndex {
                index: question_index,
                limit,
            });
        }

        self.answers[question_index] = Some(answer.into());
        self.correct_flags[question_index] = is_correct;
        self.guessed_flags[question_index] = guessed;
        self.per_question_sec[question_index] = time_spent_sec;
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
    ) -> Result<(), SessionModelError> {
        self.require_phase(
            "set_correctness",
            &[
                SessionPhase::Running,
                SessionPhase::Paused,
                SessionPhase::Ended,
            ],
        )?;
        let limit = self.questions.len();
        let slot = self
            .correct_flags
            .get_mut(question_index)
            .ok_or(SessionModelError::OutOfRangeIndex {
                index: question_index,
                limit,
            })?;
        *slot = is_correct;
        Ok(())
    }

    /// Move to the next question of the current section, or leave the
    /// section when it has none left.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless running.
    pub fn advance_question(
        &mut self,
        now: DateTime<Utc>,
        instruction_length: Duration,
    ) -> Result<Advance, SessionModelError> {
        self.require_phase("advance_question", &[SessionPhase::Running])?;
        let range = self.section_range(self.current_section_index);
        let next = self.current_question_index + 1;
        if self.current_section_index < self.sections.len() && next < range.end {
            self.current_question_index = next;
            return Ok(Advance::NextQuestion { index: next });
        }
        self.advance_section(now, instruction_length)
            .map(Advance::Section)
    }

    /// Commit the outgoing section and move on; ends the session after the
    /// last section.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless running.
    pub fn advance_section(
        &mut self,
        now: DateTime<Utc>,
        instruction_length: Duration,
    ) -> Result<SectionAdvance, SessionModelError> {
        self.require_phase("advance_section", &[SessionPhase::Running])?;

        if self.current_section_index >= self.sections.len() {
            self.finish(now);
            return Ok(SectionAdvance {
                completed: None,
                elapsed: Duration::zero(),
                entered: None,
            });
        }

        let completed = self.current_section_index;
        self.commit_current(now);
        self.instruction_timer = None;
        let elapsed = self.sections[completed].elapsed();

        let next = completed + 1;
        if next < self.sections.len() {
            self.enter_section(next, now, instruction_length);
            Ok(SectionAdvance {
                completed: Some(completed),
                elapsed,
                entered: Some(next),
            })
        } else {
            self.current_section_index = next;
            self.current_question_index = self.questions.len();
            self.finish(now);
            Ok(SectionAdvance {
                completed: Some(completed),
                elapsed,
                entered: None,
            })
        }
    }

    /// Terminal transition. Returns `false` if the session had already ended.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for a session that never started.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<bool, SessionModelError> {
        self.require_phase(
            "end",
            &[
                SessionPhase::Running,
                SessionPhase::Paused,
                SessionPhase::Ended,
            ],
        )?;
        if self.ended_at.is_some() {
            return Ok(false);
        }
        self.commit_current(now);
        self.finish(now);
        Ok(true)
    }

    /// Record confirmed user activity. Never moves the timestamp backwards.
    pub fn touch_activity(&mut self, at: DateTime<Utc>) {
        if self.last_active_timestamp.is_none_or(|last| at > last) {
            self.last_active_timestamp = Some(at);
        }
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.section_resumed_at = None;
        self.instruction_timer = None;
        self.is_paused = false;
        self.paused_at = None;
        self.ended_at = Some(now);
    }

    /// Fold the running interval into the current section and stop the clock.
    fn commit_current(&mut self, now: DateTime<Utc>) {
        let Some(resumed_at) = self.section_resumed_at.take() else {
            return;
        };
        if let Some(section) = self.sections.get_mut(self.current_section_index) {
            let elapsed = accounting::compute_elapsed(section.elapsed(), resumed_at, false, now);
            section.commit(elapsed);
        }
    }

    fn require_phase(
        &self,
        command: &'static str,
        allowed: &[SessionPhase],
    ) -> Result<(), SessionModelError> {
        let phase = self.phase();
        if allowed.contains(&phase) {
            Ok(())
        } else {
            Err(SessionModelError::InvalidState { command, phase })
        }
    }
}

/// Lifecycle fields as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistedLifecycle {
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_active_timestamp: Option<DateTime<Utc>>,
    pub section_resumed_at: Option<DateTime<Utc>>,
}

/// Per-question arrays as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistedAnswers {
    pub answers: Vec<Option<String>>,
    pub correct_flags: Vec<Option<bool>>,
    pub guessed_flags: Vec<bool>,
    pub per_question_sec: Vec<u32>,
}

fn section_range(questions: &[QuestionRef], section_index: usize) -> Range<usize> {
    let start = questions.partition_point(|q| q.section_index < section_index);
    let end = questions.partition_point(|q| q.section_index <= section_index);
    start..end
}

fn validate_partition(
    sections: &[Section],
    questions: &[QuestionRef],
) -> Result<(), SessionModelError> {
    let mut previous = 0;
    for (i, q) in questions.iter().enumerate() {
        if q.section_index >= sections.len() {
            return Err(SessionModelError::InvalidConfiguration(format!(
                "question {i} refers to missing section {}",
                q.section_index
            )));
        }
        if q.section_index < previous {
            return Err(SessionModelError::InvalidConfiguration(format!(
                "question {i} is out of section order"
            )));
        }
        previous = q.section_index;
    }
    Ok(())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
