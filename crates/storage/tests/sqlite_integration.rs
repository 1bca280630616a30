use chrono::Duration;
use exam_core::model::{
    PaperId, PaperRef, QuestionId, QuestionRef, Section, Session, SessionConfig, SessionId,
};
use exam_core::time::fixed_now;
use storage::repository::SessionSnapshotRepository;
use storage::sqlite::SqliteRepository;

fn build_session(sections: usize) -> Session {
    let mut questions = Vec::new();
    for s in 0..sections {
        for q in 0..3 {
            questions.push(QuestionRef::new(QuestionId::new((s * 3 + q) as u64 + 1), s));
        }
    }
    Session::new(
        SessionId::generate(),
        SessionConfig {
            paper: PaperRef::new(PaperId::new(2021), "TMUA 2021", Some("Paper 1".into())),
            sections: (0..sections)
                .map(|i| Section::new(format!("Section {}", i + 1), 30))
                .collect(),
            questions,
        },
    )
}

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_roundtrip_keeps_paused_state_and_answers() {
    let repo = connect("memdb_roundtrip").await;
    let instructions = Duration::seconds(60);
    let mut now = fixed_now();

    let mut session = build_session(2);
    session.start(now, instructions).unwrap();
    now += Duration::seconds(5);
    session.dismiss_instructions(now).unwrap();
    session.record_answer(0, "C", Some(false), true, 42).unwrap();
    now += Duration::milliseconds(42_300);
    session.pause(now).unwrap();

    repo.save_snapshot(&session.snapshot()).await.unwrap();
    let loaded = repo
        .load_snapshot(session.id())
        .await
        .unwrap()
        .expect("stored");
    let restored = Session::from_snapshot(loaded).unwrap();

    assert_eq!(restored, session);
    assert!(restored.is_paused());
    assert_eq!(restored.answers()[0].as_deref(), Some("C"));
    assert_eq!(restored.remaining_seconds_at(0, now + Duration::hours(1)), Some(1800 - 42));
}

#[tokio::test]
async fn sqlite_save_overwrites_and_migrate_is_idempotent() {
    let repo = connect("memdb_overwrite").await;
    repo.migrate().await.expect("second migrate");

    let mut session = build_session(1);
    session.start(fixed_now(), Duration::seconds(60)).unwrap();
    repo.save_snapshot(&session.snapshot()).await.unwrap();

    session.end(fixed_now() + Duration::seconds(90)).unwrap();
    repo.save_snapshot(&session.snapshot()).await.unwrap();

    let loaded = repo.load_snapshot(session.id()).await.unwrap().unwrap();
    assert!(loaded.ended_at.is_some());
    assert!(repo.list_unfinished(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn sqlite_lists_unfinished_most_recent_first() {
    let repo = connect("memdb_unfinished").await;

    let setup = build_session(1);
    repo.save_snapshot(&setup.snapshot()).await.unwrap();

    let mut first = build_session(1);
    first.start(fixed_now(), Duration::seconds(60)).unwrap();
    repo.save_snapshot(&first.snapshot()).await.unwrap();

    let mut second = build_session(1);
    second.start(fixed_now(), Duration::seconds(60)).unwrap();
    repo.save_snapshot(&second.snapshot()).await.unwrap();

    // Re-saving the first moves it to the front.
    first.pause(fixed_now() + Duration::seconds(3)).unwrap();
    repo.save_snapshot(&first.snapshot()).await.unwrap();

    let ids: Vec<_> = repo
        .list_unfinished(10)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(ids, vec![first.id(), second.id()]);

    let limited = repo.list_unfinished(1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn sqlite_delete_removes_snapshot() {
    let repo = connect("memdb_delete").await;
    let mut session = build_session(1);
    session.start(fixed_now(), Duration::seconds(60)).unwrap();
    repo.save_snapshot(&session.snapshot()).await.unwrap();

    assert!(repo.delete_snapshot(session.id()).await.unwrap());
    assert!(!repo.delete_snapshot(session.id()).await.unwrap());
    assert!(repo.load_snapshot(session.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn sqlite_unfinished_listing_skips_undecodable_rows() {
    let repo = connect("memdb_corrupt_row").await;
    let mut broken = build_session(1);
    broken.start(fixed_now(), Duration::seconds(60)).unwrap();
    repo.save_snapshot(&broken.snapshot()).await.unwrap();
    let mut healthy = build_session(2);
    healthy.start(fixed_now(), Duration::seconds(60)).unwrap();
    repo.save_snapshot(&healthy.snapshot()).await.unwrap();

    sqlx::query("UPDATE session_snapshots SET payload = '{\"version\":' WHERE id = ?1")
        .bind(broken.id().to_string())
        .execute(repo.pool())
        .await
        .unwrap();

    let listed = repo.list_unfinished(10).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|s| s.session_id).collect();
    assert_eq!(ids, vec![healthy.id()]);
    assert!(repo.load_snapshot(broken.id()).await.is_err());
}
