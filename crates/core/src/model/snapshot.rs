use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{PaperId, SessionId};
use crate::model::question::QuestionRef;
use crate::model::section::Section;
use crate::model::session::{
    InstructionTimer, PaperRef, PersistedAnswers, PersistedLifecycle, Session, SessionModelError,
};

/// Current layout version of `SessionSnapshot`.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Whole-state image of a session, written identically to the local store and
/// the remote endpoint. Always overwritten as a unit, keyed by `session_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub version: u32,
    pub session_id: SessionId,
    pub paper_id: PaperId,
    pub paper_name: String,
    pub paper_variant: Option<String>,
    pub sections: Vec<SectionSnapshot>,
    pub questions: Vec<QuestionRef>,
    pub current_section_index: usize,
    pub current_question_index: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_active_timestamp: Option<DateTime<Utc>>,
    pub section_resumed_at: Option<DateTime<Utc>>,
    pub section_instruction_timer: Option<InstructionTimerSnapshot>,
    pub answers: Vec<Option<String>>,
    pub correct_flags: Vec<Option<bool>>,
    pub guessed_flags: Vec<bool>,
    pub per_question_sec: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionSnapshot {
    pub name: String,
    pub time_limit_minutes: u32,
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionTimerSnapshot {
    pub remaining_ms: i64,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Started and not yet ended.
    #[must_use]
    pub fn is_unfinished(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }
}

impl Session {
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.id(),
            paper_id: self.paper().id,
            paper_name: self.paper().name.clone(),
            paper_variant: self.paper().variant.clone(),
            sections: self
                .sections()
                .iter()
                .map(|s| SectionSnapshot {
                    name: s.name().to_owned(),
                    time_limit_minutes: s.time_limit_minutes(),
                    elapsed_ms: s.elapsed_ms(),
                })
                .collect(),
            questions: self.questions().to_vec(),
            current_section_index: self.current_section_index(),
            current_question_index: self.current_question_index(),
            started_at: self.started_at(),
            ended_at: self.ended_at(),
            is_paused: self.is_paused(),
            paused_at: self.paused_at(),
            last_active_timestamp: self.last_active_timestamp(),
            section_resumed_at: self.section_resumed_at(),
            section_instruction_timer: self.instruction_timer().map(|t| {
                InstructionTimerSnapshot {
                    remaining_ms: t.remaining_ms(),
                    resumed_at: t.resumed_at(),
                }
            }),
            answers: self.answers().to_vec(),
            correct_flags: self.correct_flags().to_vec(),
            guessed_flags: self.guessed_flags().to_vec(),
            per_question_sec: self.per_question_sec().to_vec(),
        }
    }

    /// Rehydrate a session from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SessionModelError::InvalidSnapshot` for unknown versions or
    /// inconsistent state (e.g. cursors out of range for the stored sections).
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Result<Self, SessionModelError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SessionModelError::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let sections = snapshot
            .sections
            .into_iter()
            .map(|s| Section::from_persisted(s.name, s.time_limit_minutes, s.elapsed_ms))
            .collect::<Result<Vec<_>, _>>()?;

        Session::from_persisted(
            snapshot.session_id,
            PaperRef::new(snapshot.paper_id, snapshot.paper_name, snapshot.paper_variant),
            sections,
            snapshot.questions,
            (
                snapshot.current_section_index,
                snapshot.current_question_index,
            ),
            PersistedLifecycle {
                started_at: snapshot.started_at,
                ended_at: snapshot.ended_at,
                is_paused: snapshot.is_paused,
                paused_at: snapshot.paused_at,
                last_active_timestamp: snapshot.last_active_timestamp,
                section_resumed_at: snapshot.section_resumed_at,
            },
            snapshot
                .section_instruction_timer
                .map(|t| InstructionTimer::from_persisted(t.remaining_ms, t.resumed_at))
                .transpose()?,
            PersistedAnswers {
                answers: snapshot.answers,
                correct_flags: snapshot.correct_flags,
                guessed_flags: snapshot.guessed_flags,
                per_question_sec: snapshot.per_question_sec,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::QuestionId;
    use crate::model::session::SessionConfig;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn five_per_section(sections: usize) -> SessionConfig {
        let mut questions = Vec::new();
        for s in 0..sections {
            for q in 0..5 {
                questions.push(QuestionRef::new(
                    QuestionId::new((s * 5 + q) as u64 + 1),
                    s,
                ));
            }
        }
        SessionConfig {
            paper: PaperRef::new(PaperId::new(3), "ESAT 2023", None),
            sections: (0..sections)
                .map(|i| Section::new(format!("Part {}", i + 1), 20))
                .collect(),
            questions,
        }
    }

    #[test]
    fn paused_mid_section_three_survives_json() {
        let mut now = fixed_now();
        let instructions = Duration::seconds(60);
        let mut session = Session::new(SessionId::generate(), five_per_section(4));
        session.start(now, instructions).unwrap();

        for _ in 0..2 {
            now += Duration::seconds(10);
            session.dismiss_instructions(now).unwrap();
            now += Duration::seconds(200);
            session.advance_section(now, instructions).unwrap();
        }
        now += Duration::seconds(15);
        session.dismiss_instructions(now).unwrap();
        session.record_answer(10, "A", Some(true), false, 40).unwrap();
        now += Duration::seconds(40);
        session.advance_question(now, instructions).unwrap();
        session.record_answer(11, "D", None, true, 75).unwrap();
        now += Duration::seconds(75);
        session.advance_question(now, instructions).unwrap();
        now += Duration::milliseconds(1_250);
        session.pause(now).unwrap();

        let json = serde_json::to_string(&session.snapshot()).unwrap();
        let restored =
            Session::from_snapshot(serde_json::from_str::<SessionSnapshot>(&json).unwrap())
                .unwrap();

        let later = now + Duration::hours(3);
        assert_eq!(restored, session);
        assert_eq!(restored.current_section_index(), 2);
        assert_eq!(restored.current_question_index(), 12);
        assert_eq!(restored.answers(), session.answers());
        assert_eq!(
            restored.remaining_seconds_at(2, later),
            session.remaining_seconds_at(2, later)
        );
        assert_eq!(restored.remaining_seconds_at(2, later), Some(1200 - 116));
    }

    #[test]
    fn snapshot_uses_camel_case_keys() {
        let mut session = Session::new(SessionId::generate(), five_per_section(1));
        session.start(fixed_now(), Duration::seconds(60)).unwrap();
        let value = serde_json::to_value(session.snapshot()).unwrap();

        assert!(value.get("currentSectionIndex").is_some());
        assert!(value.get("perQuestionSec").is_some());
        assert!(value.get("sectionInstructionTimer").is_some());
        assert_eq!(value["sections"][0]["timeLimitMinutes"], 20);
    }

    #[test]
    fn cursor_outside_stored_sections_is_rejected() {
        let mut session = Session::new(SessionId::generate(), five_per_section(2));
        session.start(fixed_now(), Duration::seconds(60)).unwrap();
        let mut snapshot = session.snapshot();
        snapshot.current_section_index = 5;

        let err = Session::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, SessionModelError::InvalidSnapshot(_)));
    }

    #[test]
    fn mismatched_answer_arrays_are_rejected() {
        let mut session = Session::new(SessionId::generate(), five_per_section(1));
        session.start(fixed_now(), Duration::seconds(60)).unwrap();
        let mut snapshot = session.snapshot();
        snapshot.guessed_flags.pop();
        assert!(Session::from_snapshot(snapshot).is_err());
    }

    #[test]
    fn out_of_bounds_durations_are_rejected_without_panicking() {
        let mut session = Session::new(SessionId::generate(), five_per_section(1));
        session.start(fixed_now(), Duration::seconds(60)).unwrap();

        let mut snapshot = session.snapshot();
        snapshot.sections[0].elapsed_ms = i64::MIN;
        assert!(matches!(
            Session::from_snapshot(snapshot),
            Err(SessionModelError::InvalidSnapshot(_))
        ));

        let mut snapshot = session.snapshot();
        if let Some(timer) = snapshot.section_instruction_timer.as_mut() {
            timer.remaining_ms = -5;
        }
        assert!(matches!(
            Session::from_snapshot(snapshot),
            Err(SessionModelError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn paused_flag_without_instant_is_rejected() {
        let mut session = Session::new(SessionId::generate(), five_per_section(1));
        session.start(fixed_now(), Duration::seconds(60)).unwrap();
        let mut snapshot = session.snapshot();
        snapshot.is_paused = true;
        assert!(Session::from_snapshot(snapshot).is_err());
    }
}
