use chrono::{DateTime, Utc};

/// Observable transitions, drained with `SessionStateMachine::take_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { at: DateTime<Utc> },
    /// Instruction screen for the section is showing.
    SectionEntered { index: usize },
    /// Exam clock for the section started; `timed_out` when the countdown ran
    /// out rather than being dismissed.
    InstructionsClosed { section: usize, timed_out: bool },
    Paused { at: DateTime<Utc> },
    Resumed { at: DateTime<Utc> },
    AnswerRecorded { question_index: usize },
    QuestionEntered { index: usize },
    SectionCompleted {
        index: usize,
        elapsed_secs: u64,
        expired: bool,
    },
    Ended { at: DateTime<Utc> },
    Discarded,
}
