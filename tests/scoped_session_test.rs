//! Scoped sessions used outside of request handling.

mod common;

use axum_db_session::models::SessionStatus;
use axum_db_session::{DbError, EngineKey};
use common::{AppError, TestEngines};
use std::sync::atomic::{AtomicBool, Ordering};

const NOTES: &str = "CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT NOT NULL)";

#[derive(Debug, sqlx::FromRow)]
struct Note {
    id: i64,
    body: String,
}

async fn engines() -> TestEngines {
    let engines = TestEngines::start(&[]).await;
    engines.exec("default", NOTES).await;
    engines
}

#[tokio::test]
async fn test_ok_commits_and_returns_value() {
    let engines = engines().await;

    let id: i64 = engines
        .factories
        .with_session(&EngineKey::default_key(), |session| async move {
            session
                .execute("INSERT INTO notes (body) VALUES (?)", &["first".into()])
                .await?;
            session.fetch_scalar("SELECT last_insert_rowid()", &[]).await
        })
        .await
        .unwrap();
    assert_eq!(id, 1);

    let notes: Vec<Note> = engines
        .factories
        .with_session(&EngineKey::default_key(), |session| async move {
            session
                .fetch_all::<Note>("SELECT id, body FROM notes ORDER BY id", &[])
                .await
        })
        .await
        .unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, 1);
    assert_eq!(notes[0].body, "first");
}

#[tokio::test]
async fn test_caller_error_is_returned_unchanged_and_rolled_back() {
    let engines = engines().await;

    let result: Result<(), AppError> = engines
        .factories
        .with_session(&EngineKey::default_key(), |session| async move {
            session
                .execute("INSERT INTO notes (body) VALUES (?)", &["lost".into()])
                .await?;
            Err(AppError::NotAllowed("notes are read-only today"))
        })
        .await;

    assert!(matches!(result, Err(AppError::NotAllowed("notes are read-only today"))));
    assert_eq!(engines.count("default", "notes").await, 0);
}

#[tokio::test]
async fn test_database_error_rolls_back_earlier_writes() {
    let engines = engines().await;

    let result: Result<u64, DbError> = engines
        .factories
        .with_session(&EngineKey::default_key(), |session| async move {
            session
                .execute("INSERT INTO notes (body) VALUES (?)", &["lost".into()])
                .await?;
            session.execute("INSERT INTO no_such_table VALUES (1)", &[]).await
        })
        .await;

    assert!(matches!(result, Err(DbError::Database { .. })));
    assert_eq!(engines.count("default", "notes").await, 0);
}

#[tokio::test]
async fn test_commit_failure_is_reported_as_commit_error() {
    let engines = TestEngines::start(&[]).await;
    engines
        .exec("default", "CREATE TABLE parents (id INTEGER PRIMARY KEY)")
        .await;
    engines
        .exec(
            "default",
            "CREATE TABLE children (
                id INTEGER PRIMARY KEY,
                parent_id INTEGER NOT NULL REFERENCES parents(id) DEFERRABLE INITIALLY DEFERRED
            )",
        )
        .await;

    let result: Result<u64, AppError> = engines
        .factories
        .with_session(&EngineKey::default_key(), |session| async move {
            Ok(session
                .execute("INSERT INTO children (id, parent_id) VALUES (1, 42)", &[])
                .await?)
        })
        .await;

    match result {
        Err(AppError::Db(DbError::Commit { engine_key, .. })) => assert_eq!(engine_key, "default"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(engines.count("default", "children").await, 0);
}

#[tokio::test]
async fn test_finished_session_is_closed() {
    let engines = engines().await;

    let scoped = engines
        .factories
        .open_session(&EngineKey::default_key())
        .await
        .unwrap();
    let handle = scoped.handle().clone();
    assert_eq!(handle.status().await, SessionStatus::Active);

    scoped.finish(Ok::<_, DbError>(())).await.unwrap();
    assert_eq!(handle.status().await, SessionStatus::Closed);
    assert!(matches!(
        handle.fetch_scalar::<i64>("SELECT 1", &[]).await,
        Err(DbError::SessionClosed { .. })
    ));
}

#[tokio::test]
async fn test_dropped_scope_rolls_back() {
    let engines = engines().await;

    {
        let scoped = engines
            .factories
            .open_session(&EngineKey::default_key())
            .await
            .unwrap();
        scoped
            .handle()
            .execute("INSERT INTO notes (body) VALUES (?)", &["abandoned".into()])
            .await
            .unwrap();
    }

    // The rollback runs on a spawned task and the pool holds a single SQLite
    // connection, so this waits until the connection is released.
    assert_eq!(engines.count("default", "notes").await, 0);
}

#[tokio::test]
async fn test_unknown_engine_fails_before_work_runs() {
    let engines = engines().await;

    let ran = AtomicBool::new(false);

    let result: Result<(), DbError> = engines
        .factories
        .with_session(&EngineKey::new("potato"), |_session| async {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(matches!(result, Err(DbError::UnknownEngine { .. })));
    assert!(!ran.load(Ordering::SeqCst));
}
