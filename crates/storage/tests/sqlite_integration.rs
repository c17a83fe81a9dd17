use assess_core::model::{
    ConceptId, FocusContext, KnowledgeAreaId, SessionId, SessionSummary, SessionType,
    SummarySource,
};
use assess_core::time::fixed_now;
use chrono::Duration;
use storage::repository::{HistoryEntry, SessionHistoryRepository, StorageError};
use storage::sqlite::SqliteRepository;

fn entry(session: &str, focus: Option<FocusContext>, minutes: i64) -> HistoryEntry {
    HistoryEntry {
        session_id: SessionId::new(session),
        session_type: SessionType::Adaptive,
        focus,
        started_at: fixed_now(),
        summary: SessionSummary::from_local(7, 5, fixed_now() + Duration::minutes(minutes))
            .unwrap(),
    }
}

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_roundtrip_preserves_summary_and_focus() {
    let repo = connect("memdb_history_roundtrip").await;
    let focus = FocusContext::Concepts(vec![ConceptId::new("c-1"), ConceptId::new("c-2")]);

    let id = repo
        .append_entry(&entry("s-1", Some(focus.clone()), 20))
        .await
        .expect("append");
    let row = repo.get_entry(id).await.expect("fetch");

    assert_eq!(row.entry.session_id, SessionId::new("s-1"));
    assert_eq!(row.entry.focus, Some(focus));
    assert_eq!(row.entry.summary.total_questions(), 7);
    assert_eq!(row.entry.summary.correct_answers(), 5);
    assert_eq!(row.entry.summary.source(), SummarySource::LocalFallback);
    assert_eq!(row.entry.started_at, fixed_now());
}

#[tokio::test]
async fn sqlite_rejects_second_entry_for_same_session() {
    let repo = connect("memdb_history_unique").await;
    repo.append_entry(&entry("s-dup", None, 1)).await.unwrap();

    let err = repo.append_entry(&entry("s-dup", None, 2)).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));
}

#[tokio::test]
async fn sqlite_lists_recent_and_finds_by_session() {
    let repo = connect("memdb_history_recent").await;
    let area = FocusContext::KnowledgeArea(KnowledgeAreaId::new("ka-1"));
    repo.append_entry(&entry("first", None, 1)).await.unwrap();
    repo.append_entry(&entry("second", Some(area), 5)).await.unwrap();
    repo.append_entry(&entry("third", None, 3)).await.unwrap();

    let rows = repo.list_recent(10).await.unwrap();
    let order: Vec<_> = rows.iter().map(|r| r.entry.session_id.as_str()).collect();
    assert_eq!(order, vec!["second", "third", "first"]);

    let found = repo
        .find_by_session(&SessionId::new("third"))
        .await
        .unwrap()
        .expect("present");
    assert_eq!(found.entry.summary.total_questions(), 7);
    assert!(
        repo.find_by_session(&SessionId::new("missing"))
            .await
            .unwrap()
            .is_none()
    );
}
