use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use exam_core::Clock;
use exam_core::model::{
    Advance, SectionAdvance, Session, SessionConfig, SessionId, SessionPhase, SessionSnapshot,
};
use storage::repository::SessionSnapshotRepository;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activity::{ActivityMonitor, Visibility};
use crate::config::EngineConfig;
use crate::error::SessionError;
use crate::persistence::SnapshotSink;
use crate::remote::RemoteSessionSync;
use crate::sessions::{SessionEvent, SessionStateMachine};

/// What the startup screen shows about an interrupted attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeSummary {
    pub session_id: SessionId,
    pub paper_name: String,
    pub paper_variant: Option<String>,
    pub section_index: usize,
    pub section_name: Option<String>,
    /// 1-based position of the current question.
    pub question_position: usize,
    pub total_questions: usize,
    pub answered: usize,
    /// Time left in the current section, frozen while paused.
    pub remaining_seconds: Option<u64>,
}

/// Outcome of `SessionController::recover`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Loaded paused; the user must choose to resume or quit.
    AwaitingChoice(ResumeSummary),
    /// Loaded read-only for review.
    Ended(ResumeSummary),
}

/// Surface used by UI collaborators. Owns the active state machine and the
/// activity monitor, and runs the recovery flow.
pub struct SessionController {
    store: Arc<dyn SessionSnapshotRepository>,
    remote: Option<Arc<dyn RemoteSessionSync>>,
    sink: Arc<dyn SnapshotSink>,
    clock: Clock,
    config: EngineConfig,
    monitor: ActivityMonitor,
    active: Option<SessionStateMachine>,
}

impl SessionController {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionSnapshotRepository>,
        remote: Option<Arc<dyn RemoteSessionSync>>,
        sink: Arc<dyn SnapshotSink>,
        clock: Clock,
        config: EngineConfig,
    ) -> Self {
        let monitor = ActivityMonitor::new(clock.clone(), config.inactivity_threshold);
        Self {
            store,
            remote,
            sink,
            clock,
            config,
            monitor,
            active: None,
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&SessionStateMachine> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn monitor(&self) -> &ActivityMonitor {
        &self.monitor
    }

    fn machine(&mut self) -> Result<&mut SessionStateMachine, SessionError> {
        self.active.as_mut().ok_or(SessionError::NoActiveSession)
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Load a configuration in setup so sections can still be reordered.
    pub fn prepare(&mut self, config: SessionConfig) -> SessionId {
        let machine = SessionStateMachine::new(
            config,
            self.clock.clone(),
            Arc::clone(&self.sink),
            self.config.instruction_length,
        );
        let id = machine.id();
        self.monitor.reset();
        self.active = Some(machine);
        id
    }

    /// # Errors
    ///
    /// Returns `NoActiveSession` without a prepared session, or the machine's
    /// error for a non-permutation or a started session.
    pub fn reorder_sections(&mut self, order: &[usize]) -> Result<(), SessionError> {
        self.machine()?.reorder_sections(order)
    }

    /// Start the prepared session.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveSession` without a prepared session, otherwise the
    /// machine's configuration or state error.
    pub fn begin(&mut self) -> Result<(), SessionError> {
        self.machine()?.start()
    }

    /// Prepare and start in one step.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for empty or malformed configurations;
    /// nothing stays active in that case.
    pub fn start(&mut self, config: SessionConfig) -> Result<SessionId, SessionError> {
        let id = self.prepare(config);
        if let Err(err) = self.begin() {
            self.active = None;
            return Err(err);
        }
        Ok(id)
    }

    /// Abandon the active session. Unfinished attempts are discarded
    /// everywhere; ended ones are only closed.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveSession` when nothing is loaded.
    pub fn quit(&mut self) -> Result<(), SessionError> {
        let mut machine = self.active.take().ok_or(SessionError::NoActiveSession)?;
        self.monitor.reset();
        if machine.phase() != SessionPhase::Ended {
            machine.reset()?;
        }
        Ok(())
    }

    // ─── Recovery ───────────────────────────────────────────────────────────

    /// Rehydrate a session from the local store, falling back to the remote.
    ///
    /// A snapshot saved while running is loaded paused at its last confirmed
    /// activity, so time nobody observed is never charged. Paused sessions
    /// are never resumed automatically.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotRecoverable` when neither store has a usable
    /// snapshot.
    pub async fn recover(&mut self, session_id: SessionId) -> Result<Recovery, SessionError> {
        let (snapshot, from_remote) = match self.load_local(session_id).await {
            Some(snapshot) => (snapshot, false),
            None => match self.load_remote(session_id).await {
                Some(snapshot) => (snapshot, true),
                None => {
                    return Err(SessionError::SessionNotRecoverable {
                        session_id,
                        reason: "no stored snapshot".into(),
                    });
                }
            },
        };

        let session = rehydrate(snapshot, self.config.instruction_length)?;
        let crashed = session.phase() == SessionPhase::Running;
        let summary = summarize(&session, &self.clock);
        let phase = session.phase();

        let machine = SessionStateMachine::from_session(
            session,
            self.clock.clone(),
            Arc::clone(&self.sink),
            self.config.instruction_length,
        );
        if crashed || from_remote {
            machine.save_now();
        }
        info!(%session_id, from_remote, %phase, "session recovered");

        self.monitor.reset();
        self.active = Some(machine);
        Ok(match phase {
            SessionPhase::Ended => Recovery::Ended(summary),
            _ => Recovery::AwaitingChoice(summary),
        })
    }

    /// The newest unfinished local attempt, if any.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the local store cannot be queried.
    pub async fn resumable_session(&self) -> Result<Option<ResumeSummary>, SessionError> {
        let snapshots = self.store.list_unfinished(5).await?;
        for snapshot in snapshots {
            let id = snapshot.session_id;
            match rehydrate(snapshot, self.config.instruction_length) {
                Ok(session) => return Ok(Some(summarize(&session, &self.clock))),
                Err(err) => warn!(session_id = %id, error = %err, "skipping unusable snapshot"),
            }
        }
        Ok(None)
    }

    async fn load_local(&self, id: SessionId) -> Option<SessionSnapshot> {
        match self.store.load_snapshot(id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(session_id = %id, error = %err, "local snapshot unreadable");
                None
            }
        }
    }

    async fn load_remote(&self, id: SessionId) -> Option<SessionSnapshot> {
        let remote = self.remote.as_ref()?;
        match remote.fetch(id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(session_id = %id, error = %err, "remote snapshot unavailable");
                None
            }
        }
    }

    // ─── Commands ───────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `NoActiveSession` or the machine's state error.
    pub fn dismiss_instructions(&mut self) -> Result<bool, SessionError> {
        self.machine()?.dismiss_instructions()
    }

    /// # Errors
    ///
    /// Returns `NoActiveSession` or the machine's state error.
    pub fn pause(&mut self) -> Result<bool, SessionError> {
        self.machine()?.pause()
    }

    /// # Errors
    ///
    /// Returns `NoActiveSession` or the machine's state error.
    pub fn resume(&mut self) -> Result<bool, SessionError> {
        self.machine()?.resume()
    }

    /// # Errors
    ///
    /// Returns `NoActiveSession`, `OutOfRangeIndex` or the machine's state
    /// error.
    pub fn record_answer(
        &mut self,
        question_index: usize,
        answer: impl Into<String>,
        is_correct: Option<bool>,
        guessed: bool,
        time_spent_sec: u32,
    ) -> Result<(), SessionError> {
        self.monitor.record_input();
        self.machine()?
            .record_answer(question_index, answer, is_correct, guessed, time_spent_sec)
    }

    /// # Errors
    ///
    /// Returns `NoActiveSession`, `OutOfRangeIndex` or the machine's state
    /// error.
    pub fn set_correctness(
        &mut self,
        question_index: usize,
        is_correct: Option<bool>,
    ) -> Result<(), SessionError> {
        self.machine()?.set_correctness(question_index, is_correct)
    }

    /// # Errors
    ///
    /// Returns `NoActiveSession` or the machine's state error.
    pub fn advance_question(&mut self) -> Result<Advance, SessionError> {
        self.machine()?.advance_question()
    }

    /// # Errors
    ///
    /// Returns `NoActiveSession` or the machine's state error.
    pub fn advance_section(&mut self) -> Result<SectionAdvance, SessionError> {
        self.machine()?.advance_section()
    }

    /// # Errors
    ///
    /// Returns `NoActiveSession` or the machine's state error.
    pub fn end(&mut self) -> Result<bool, SessionError> {
        self.machine()?.end()
    }

    /// Presentation poll; a no-op without an active session.
    pub fn tick(&mut self) {
        if let Some(machine) = self.active.as_mut() {
            machine.tick();
        }
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.active
            .as_mut()
            .map(SessionStateMachine::take_events)
            .unwrap_or_default()
    }

    // ─── Environment signals ────────────────────────────────────────────────

    pub fn record_input(&mut self) {
        self.monitor.record_input();
    }

    /// # Errors
    ///
    /// Propagates the machine's error from the pause or resume issued.
    pub fn visibility_changed(&mut self, visibility: Visibility) -> Result<(), SessionError> {
        match self.active.as_mut() {
            Some(machine) => self.monitor.visibility_changed(machine, visibility),
            None => Ok(()),
        }
    }

    pub fn liveness_tick(&mut self) -> bool {
        match self.active.as_mut() {
            Some(machine) => self.monitor.liveness_tick(machine),
            None => false,
        }
    }

    /// # Errors
    ///
    /// Propagates the machine's error from the pause issued.
    pub fn unload(&mut self) -> Result<(), SessionError> {
        match self.active.as_mut() {
            Some(machine) => self.monitor.unload(machine),
            None => Ok(()),
        }
    }
}

/// Controller handle shared between the host and background drivers.
pub type SharedController = Arc<Mutex<SessionController>>;

/// Issue a liveness tick every `interval`. The task holds only a weak
/// reference and exits once the host drops its last handle.
pub fn spawn_liveness_driver(
    controller: &SharedController,
    interval: StdDuration,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(controller);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(StdDuration::from_millis(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(controller) = weak.upgrade() else {
                debug!("liveness driver stopped");
                break;
            };
            let present = controller.lock().await.liveness_tick();
            if present {
                debug!("presence confirmed");
            }
        }
    })
}

/// Snapshot to session, with a crashed running snapshot frozen at its last
/// confirmed activity. The freeze never lands before the running clock's own
/// start, so time already on the clock is kept.
fn rehydrate(
    snapshot: SessionSnapshot,
    instruction_length: Duration,
) -> Result<Session, SessionError> {
    let session_id = snapshot.session_id;
    let not_recoverable = |reason: String| SessionError::SessionNotRecoverable { session_id, reason };

    let mut session = Session::from_snapshot(snapshot).map_err(|e| not_recoverable(e.to_string()))?;
    if let Some(timer) = session.instruction_timer() {
        if timer.remaining_ms() > instruction_length.num_milliseconds() {
            return Err(not_recoverable(format!(
                "instruction countdown has {}ms left, longer than the screen itself",
                timer.remaining_ms()
            )));
        }
    }
    match session.phase() {
        SessionPhase::Setup => Err(not_recoverable("session never started".into())),
        SessionPhase::Running => {
            let clock_started = session
                .section_resumed_at()
                .or(session.instruction_timer().and_then(|t| t.resumed_at()));
            let at = session
                .last_active_timestamp()
                .or(session.started_at())
                .max(clock_started)
                .ok_or_else(|| not_recoverable("running without a start instant".into()))?;
            session
                .pause(at)
                .map_err(|e| not_recoverable(e.to_string()))?;
            Ok(session)
        }
        _ => Ok(session),
    }
}

fn summarize(session: &Session, clock: &Clock) -> ResumeSummary {
    let progress = session.progress();
    let section_index = session.current_section_index();
    ResumeSummary {
        session_id: session.id(),
        paper_name: session.paper().name.clone(),
        paper_variant: session.paper().variant.clone(),
        section_index,
        section_name: session.current_section().map(|s| s.name().to_owned()),
        question_position: (progress.position + 1).min(progress.total),
        total_questions: progress.total,
        answered: progress.answered,
        remaining_seconds: session.remaining_seconds_at(section_index, clock.now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Duration;
    use exam_core::model::{PaperId, PaperRef, QuestionId, QuestionRef, Section};
    use exam_core::time::{fixed_now, manual_clock};
    use storage::repository::InMemoryRepository;

    use crate::persistence::SaveMode;
    use crate::remote::InMemoryRemote;

    #[derive(Default)]
    struct Sink {
        saves: Mutex<Vec<SaveMode>>,
        discards: Mutex<Vec<SessionId>>,
    }

    impl SnapshotSink for Sink {
        fn save(&self, _snapshot: SessionSnapshot, mode: SaveMode) {
            self.saves.lock().unwrap().push(mode);
        }

        fn discard(&self, id: SessionId) {
            self.discards.lock().unwrap().push(id);
        }
    }

    struct Fixture {
        controller: SessionController,
        store: InMemoryRepository,
        remote: InMemoryRemote,
        sink: Arc<Sink>,
        clock: Clock,
    }

    fn fixture() -> Fixture {
        let store = InMemoryRepository::new();
        let remote = InMemoryRemote::new();
        let sink = Arc::new(Sink::default());
        let clock = manual_clock();
        let controller = SessionController::new(
            Arc::new(store.clone()),
            Some(Arc::new(remote.clone())),
            Arc::clone(&sink) as Arc<dyn SnapshotSink>,
            clock.clone(),
            EngineConfig::default(),
        );
        Fixture {
            controller,
            store,
            remote,
            sink,
            clock,
        }
    }

    fn paper() -> SessionConfig {
        SessionConfig {
            paper: PaperRef::new(PaperId::new(2018), "TSA 2018", None),
            sections: vec![Section::new("Thinking Skills", 10), Section::new("Writing", 10)],
            questions: vec![
                QuestionRef::new(QuestionId::new(1), 0),
                QuestionRef::new(QuestionId::new(2), 0),
                QuestionRef::new(QuestionId::new(3), 1),
            ],
        }
    }

    /// Running snapshot with 100 s accrued and activity confirmed at +100 s.
    fn crashed_snapshot() -> SessionSnapshot {
        let t0 = fixed_now();
        let mut session = Session::new(SessionId::generate(), paper());
        session.start(t0, Duration::seconds(60)).unwrap();
        session.dismiss_instructions(t0).unwrap();
        session.record_answer(0, "A", None, false, 100).unwrap();
        session.touch_activity(t0 + Duration::seconds(100));
        session.snapshot()
    }

    #[tokio::test]
    async fn crashed_running_snapshot_resumes_paused_without_gap() {
        let mut f = fixture();
        let snapshot = crashed_snapshot();
        let id = snapshot.session_id;
        f.store.save_snapshot(&snapshot).await.unwrap();
        f.clock.advance(Duration::seconds(1_000));

        let Recovery::AwaitingChoice(summary) = f.controller.recover(id).await.unwrap() else {
            panic!("expected a resume choice");
        };
        assert_eq!(summary.remaining_seconds, Some(500));
        assert_eq!(summary.question_position, 1);
        assert_eq!(summary.answered, 1);
        assert!(f.controller.active().unwrap().is_paused());
        assert_eq!(*f.sink.saves.lock().unwrap(), vec![SaveMode::Forced]);

        f.controller.resume().unwrap();
        f.clock.advance(Duration::seconds(10));
        assert_eq!(f.controller.active().unwrap().remaining_seconds(0), Some(490));
    }

    fn two_by_two() -> SessionConfig {
        SessionConfig {
            paper: PaperRef::new(PaperId::new(2020), "TSA 2020", None),
            sections: vec![Section::new("Thinking Skills", 10), Section::new("Writing", 10)],
            questions: vec![
                QuestionRef::new(QuestionId::new(1), 0),
                QuestionRef::new(QuestionId::new(2), 0),
                QuestionRef::new(QuestionId::new(3), 1),
                QuestionRef::new(QuestionId::new(4), 1),
            ],
        }
    }

    #[tokio::test]
    async fn crash_after_section_change_keeps_time_seen_in_new_section() {
        let mut f = fixture();
        let t0 = f.clock.now();
        let id = f.controller.start(two_by_two()).unwrap();
        f.controller.dismiss_instructions().unwrap();
        f.clock.advance(Duration::seconds(10));
        f.controller.record_answer(0, "C", None, false, 10).unwrap();
        f.clock.advance(Duration::seconds(10));
        f.controller.advance_section().unwrap();
        f.clock.advance(Duration::seconds(5));
        f.controller.dismiss_instructions().unwrap();
        f.clock.advance(Duration::seconds(60));
        f.controller.advance_question().unwrap();

        // Nothing observed after +85 s; the page dies at +300 s.
        f.clock.advance(Duration::seconds(215));
        let snapshot = f.controller.active().unwrap().snapshot();
        f.store.save_snapshot(&snapshot).await.unwrap();

        let Recovery::AwaitingChoice(summary) = f.controller.recover(id).await.unwrap() else {
            panic!("expected a resume choice");
        };
        assert_eq!(summary.section_index, 1);
        assert_eq!(summary.remaining_seconds, Some(540));
        let machine = f.controller.active().unwrap();
        assert_eq!(machine.elapsed_seconds(0), Some(20));
        assert_eq!(
            machine.session().paused_at(),
            Some(t0 + Duration::seconds(85))
        );
    }

    #[tokio::test]
    async fn crash_after_instruction_timeout_never_pauses_before_clock_start() {
        let mut f = fixture();
        let t0 = f.clock.now();
        let id = f.controller.start(two_by_two()).unwrap();
        f.clock.advance(Duration::seconds(100));
        f.controller.tick();
        assert!(!f.controller.active().unwrap().is_on_instructions());

        f.clock.advance(Duration::seconds(200));
        let snapshot = f.controller.active().unwrap().snapshot();
        f.store.save_snapshot(&snapshot).await.unwrap();

        let Recovery::AwaitingChoice(summary) = f.controller.recover(id).await.unwrap() else {
            panic!("expected a resume choice");
        };
        assert_eq!(summary.remaining_seconds, Some(600));
        let session = f.controller.active().unwrap().session();
        assert_eq!(session.paused_at(), Some(t0 + Duration::seconds(60)));
    }

    #[tokio::test]
    async fn overlong_instruction_countdown_is_not_recoverable() {
        let mut f = fixture();
        let mut session = Session::new(SessionId::generate(), paper());
        session.start(fixed_now(), Duration::seconds(60)).unwrap();
        let mut snapshot = session.snapshot();
        if let Some(timer) = snapshot.section_instruction_timer.as_mut() {
            timer.remaining_ms = i64::MAX / 2;
        }
        f.store.save_snapshot(&snapshot).await.unwrap();

        let err = f.controller.recover(session.id()).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotRecoverable { .. }));
        assert!(f.controller.active().is_none());
    }

    #[tokio::test]
    async fn paused_snapshot_is_never_auto_resumed() {
        let mut f = fixture();
        let mut session = Session::new(SessionId::generate(), paper());
        session.start(fixed_now(), Duration::seconds(60)).unwrap();
        session.pause(fixed_now() + Duration::seconds(10)).unwrap();
        f.store.save_snapshot(&session.snapshot()).await.unwrap();

        let recovery = f.controller.recover(session.id()).await.unwrap();
        assert!(matches!(recovery, Recovery::AwaitingChoice(_)));
        let machine = f.controller.active().unwrap();
        assert!(machine.is_paused());
        assert_eq!(machine.instruction_seconds_remaining(), Some(50));
        assert!(f.sink.saves.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_remote_when_local_is_missing() {
        let mut f = fixture();
        let snapshot = crashed_snapshot();
        let id = snapshot.session_id;
        f.remote.insert(snapshot);

        let recovery = f.controller.recover(id).await.unwrap();
        assert!(matches!(recovery, Recovery::AwaitingChoice(_)));
    }

    #[tokio::test]
    async fn missing_or_corrupt_snapshots_are_not_recoverable() {
        let mut f = fixture();
        let err = f.controller.recover(SessionId::generate()).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotRecoverable { .. }));

        let mut corrupt = crashed_snapshot();
        corrupt.current_section_index = 7;
        let id = corrupt.session_id;
        f.store.save_snapshot(&corrupt).await.unwrap();
        let err = f.controller.recover(id).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotRecoverable { .. }));
        assert!(f.controller.active().is_none());
    }

    #[tokio::test]
    async fn ended_session_loads_for_review_and_quit_keeps_it() {
        let mut f = fixture();
        let mut session = Session::new(SessionId::generate(), paper());
        session.start(fixed_now(), Duration::seconds(60)).unwrap();
        session.end(fixed_now() + Duration::seconds(30)).unwrap();
        f.store.save_snapshot(&session.snapshot()).await.unwrap();

        let recovery = f.controller.recover(session.id()).await.unwrap();
        assert!(matches!(recovery, Recovery::Ended(_)));
        f.controller.set_correctness(0, Some(true)).unwrap();

        f.controller.quit().unwrap();
        assert!(f.sink.discards.lock().unwrap().is_empty());
        assert!(matches!(
            f.controller.pause(),
            Err(SessionError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn resumable_session_reports_newest_unfinished() {
        let f = fixture();
        assert_eq!(f.controller.resumable_session().await.unwrap(), None);

        let older = crashed_snapshot();
        f.store.save_snapshot(&older).await.unwrap();
        let newer = crashed_snapshot();
        f.store.save_snapshot(&newer).await.unwrap();

        let summary = f.controller.resumable_session().await.unwrap().unwrap();
        assert_eq!(summary.session_id, newer.session_id);
        assert_eq!(summary.paper_name, "TSA 2018");
        assert_eq!(summary.section_name.as_deref(), Some("Thinking Skills"));
        assert_eq!(summary.total_questions, 3);
        assert_eq!(summary.remaining_seconds, Some(500));
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_driver_confirms_presence_until_dropped() {
        let Fixture {
            controller,
            mut clock,
            ..
        } = fixture();
        let t0 = clock.now();
        let shared: SharedController = Arc::new(tokio::sync::Mutex::new(controller));
        {
            let mut controller = shared.lock().await;
            controller.start(paper()).unwrap();
            controller.dismiss_instructions().unwrap();
            controller.record_input();
        }
        let driver = spawn_liveness_driver(&shared, StdDuration::from_secs(5));

        clock.advance(Duration::seconds(5));
        tokio::time::sleep(StdDuration::from_secs(6)).await;
        let last_active = shared
            .lock()
            .await
            .active()
            .unwrap()
            .session()
            .last_active_timestamp();
        assert_eq!(last_active, Some(t0 + Duration::seconds(5)));

        drop(shared);
        tokio::time::sleep(StdDuration::from_secs(6)).await;
        assert!(driver.is_finished());
    }

    #[test]
    fn quit_discards_unfinished_attempt() {
        let mut f = fixture();
        let id = f.controller.start(paper()).unwrap();
        f.controller.quit().unwrap();
        assert_eq!(*f.sink.discards.lock().unwrap(), vec![id]);
        assert!(f.controller.active().is_none());
    }

    #[test]
    fn invalid_start_leaves_nothing_active() {
        let mut f = fixture();
        let mut config = paper();
        config.questions.clear();
        assert!(matches!(
            f.controller.start(config),
            Err(SessionError::InvalidConfiguration(_))
        ));
        assert!(f.controller.active().is_none());
    }

    #[test]
    fn prepared_sections_can_be_reordered_before_begin() {
        let mut f = fixture();
        f.controller.prepare(paper());
        f.controller.reorder_sections(&[1, 0]).unwrap();
        f.controller.begin().unwrap();

        let machine = f.controller.active().unwrap();
        assert_eq!(machine.current_section().unwrap().name(), "Writing");
        assert_eq!(machine.current_question().unwrap().id, QuestionId::new(3));
        assert!(matches!(
            f.controller.reorder_sections(&[0, 1]),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn hidden_tab_auto_pauses_through_controller() {
        let mut f = fixture();
        f.controller.start(paper()).unwrap();
        f.controller.dismiss_instructions().unwrap();

        f.controller.visibility_changed(Visibility::Hidden).unwrap();
        assert!(f.controller.active().unwrap().is_paused());
        assert_eq!(f.sink.saves.lock().unwrap().last(), Some(&SaveMode::Forced));

        f.controller.visibility_changed(Visibility::Visible).unwrap();
        assert!(!f.controller.active().unwrap().is_paused());
    }
}
