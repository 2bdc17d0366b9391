//! Sessions: one pooled connection with one open transaction.
//!
//! A [`Session`] is owned by whoever finalizes it (the HTTP middleware or a
//! [`crate::db::ScopedSession`]); request handlers only ever see a
//! [`SessionHandle`], which can run statements but cannot commit, roll back
//! or close.

use crate::db::lifecycle::UnitOfWork;
use crate::db::params::arguments;
use crate::db::pool::{DbConnection, DbPool};
use crate::error::{DbError, DbResult};
use crate::models::{EngineKey, QueryParam, SessionStatus};
use crate::with_connection;
use sqlx::FromRow;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Row types that decode from every supported backend.
pub trait FromDbRow:
    for<'r> FromRow<'r, MySqlRow>
    + for<'r> FromRow<'r, PgRow>
    + for<'r> FromRow<'r, SqliteRow>
    + Send
    + Unpin
{
}

impl<T> FromDbRow for T where
    T: for<'r> FromRow<'r, MySqlRow>
        + for<'r> FromRow<'r, PgRow>
        + for<'r> FromRow<'r, SqliteRow>
        + Send
        + Unpin
{
}

struct SessionState {
    connection: Option<DbConnection>,
    status: SessionStatus,
}

struct SessionShared {
    state: Mutex<SessionState>,
    dirty: AtomicBool,
}

/// Unit of work bound to one connection of one engine.
pub struct Session {
    id: Arc<str>,
    key: EngineKey,
    shared: Arc<SessionShared>,
    closed: bool,
}

impl Session {
    /// Acquire a connection from `pool` and begin a transaction on it.
    pub(crate) async fn begin(key: EngineKey, pool: &DbPool) -> DbResult<Self> {
        let mut connection = pool.acquire().await?;
        connection.execute_raw("BEGIN").await?;

        let id: Arc<str> = generate_session_id().into();
        debug!(engine_key = %key, session_id = %id, "Session created");

        Ok(Self {
            id,
            key,
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState {
                    connection: Some(connection),
                    status: SessionStatus::Created,
                }),
                dirty: AtomicBool::new(false),
            }),
            closed: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn status(&self) -> SessionStatus {
        self.shared.state.lock().await.status
    }

    /// Hand the session out to calling code.
    pub async fn activate(&self) -> SessionHandle {
        let mut state = self.shared.state.lock().await;
        if state.status == SessionStatus::Created {
            state.status = SessionStatus::Active;
        }
        self.handle()
    }

    /// A handle sharing this session, without changing its status.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: Arc::clone(&self.id),
            key: self.key.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run a transaction control statement and move through the given states.
    async fn finish_transaction(
        &mut self,
        statement: &'static str,
        pending: SessionStatus,
        done: SessionStatus,
    ) -> Result<(), String> {
        let mut state = self.shared.state.lock().await;
        state.status = pending;
        let connection = state
            .connection
            .as_mut()
            .ok_or_else(|| "session has no connection".to_string())?;
        connection
            .execute_raw(statement)
            .await
            .map_err(|e| e.to_string())?;
        state.status = done;
        Ok(())
    }
}

impl UnitOfWork for Session {
    async fn commit(&mut self) -> DbResult<()> {
        self.finish_transaction(
            "COMMIT",
            SessionStatus::Committing,
            SessionStatus::Committed,
        )
        .await
        .map_err(|message| DbError::commit(self.key.as_str(), message))?;
        debug!(engine_key = %self.key, session_id = %self.id, "Session committed");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.finish_transaction(
            "ROLLBACK",
            SessionStatus::RollingBack,
            SessionStatus::RolledBack,
        )
        .await
        .map_err(|message| DbError::rollback(self.key.as_str(), message))?;
        debug!(engine_key = %self.key, session_id = %self.id, "Session rolled back");
        Ok(())
    }

    async fn close(mut self) {
        self.closed = true;
        let (connection, status) = {
            let mut state = self.shared.state.lock().await;
            let status = state.status;
            state.status = SessionStatus::Closed;
            (state.connection.take(), status)
        };

        match connection {
            // Clean transaction state: the connection can be reused
            Some(connection) if status.is_finalized() => drop(connection),
            Some(connection) => {
                if let Err(e) = connection.close_hard().await {
                    warn!(
                        engine_key = %self.key,
                        session_id = %self.id,
                        error = %e,
                        "Failed to close connection with unfinished transaction"
                    );
                }
            }
            None => {}
        }
        debug!(engine_key = %self.key, session_id = %self.id, "Session closed");
    }

    fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Relaxed)
    }

    fn key(&self) -> &EngineKey {
        &self.key
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(
            engine_key = %self.key,
            session_id = %self.id,
            "Session dropped before finalization, rolling back"
        );

        let shared = Arc::clone(&self.shared);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let key = self.key.clone();
                let id = Arc::clone(&self.id);
                runtime.spawn(async move {
                    let (connection, status) = {
                        let mut state = shared.state.lock().await;
                        let status = state.status;
                        state.status = SessionStatus::Closed;
                        (state.connection.take(), status)
                    };
                    let Some(mut connection) = connection else {
                        return;
                    };
                    if status.is_finalized() {
                        return;
                    }
                    if let Err(e) = connection.execute_raw("ROLLBACK").await {
                        warn!(
                            engine_key = %key,
                            session_id = %id,
                            error = %e,
                            "Rollback of dropped session failed, discarding connection"
                        );
                        connection.discard();
                    }
                });
            }
            // No runtime to roll back on: take the connection out of the pool
            Err(_) => {
                if let Ok(mut state) = shared.state.try_lock() {
                    state.status = SessionStatus::Closed;
                    if let Some(connection) = state.connection.take() {
                        connection.discard();
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Shared access to an open session for request handlers.
///
/// Every operation fails with [`DbError::SessionClosed`] once the owning
/// session has been finalized.
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    key: EngineKey,
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &EngineKey {
        &self.key
    }

    pub async fn status(&self) -> SessionStatus {
        self.shared.state.lock().await.status
    }

    /// Whether a write or raw connection access happened through this session.
    pub fn is_dirty(&self) -> bool {
        self.shared.dirty.load(Ordering::Relaxed)
    }

    fn closed_error(&self) -> DbError {
        DbError::session_closed(self.key.as_str(), self.id.as_ref())
    }

    async fn lock_open(&self) -> DbResult<MutexGuard<'_, SessionState>> {
        let state = self.shared.state.lock().await;
        if state.status.is_open() && state.connection.is_some() {
            Ok(state)
        } else {
            Err(self.closed_error())
        }
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut state = self.lock_open().await?;
        self.shared.dirty.store(true, Ordering::Relaxed);
        let connection = state
            .connection
            .as_mut()
            .ok_or_else(|| self.closed_error())?;

        let rows_affected = with_connection!(connection, |conn, DB| {
            let args = arguments::<DB>(params)?;
            sqlx::query_with::<DB, _>(sql, args)
                .execute(&mut **conn)
                .await?
                .rows_affected()
        });

        debug!(
            session_id = %self.id,
            sql = %sql,
            rows_affected = rows_affected,
            "Executed in session"
        );
        Ok(rows_affected)
    }

    /// Fetch every row of a query.
    pub async fn fetch_all<T: FromDbRow>(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<T>> {
        let mut state = self.lock_open().await?;
        let connection = state
            .connection
            .as_mut()
            .ok_or_else(|| self.closed_error())?;

        let rows = with_connection!(connection, |conn, DB| {
            let args = arguments::<DB>(params)?;
            sqlx::query_as_with::<DB, T, _>(sql, args)
                .fetch_all(&mut **conn)
                .await?
        });

        debug!(session_id = %self.id, sql = %sql, row_count = rows.len(), "Queried in session");
        Ok(rows)
    }

    /// Fetch at most one row.
    pub async fn fetch_optional<T: FromDbRow>(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<T>> {
        let mut state = self.lock_open().await?;
        let connection = state
            .connection
            .as_mut()
            .ok_or_else(|| self.closed_error())?;

        let row = with_connection!(connection, |conn, DB| {
            let args = arguments::<DB>(params)?;
            sqlx::query_as_with::<DB, T, _>(sql, args)
                .fetch_optional(&mut **conn)
                .await?
        });
        Ok(row)
    }

    /// Fetch exactly one row; no row is a database error.
    pub async fn fetch_one<T: FromDbRow>(&self, sql: &str, params: &[QueryParam]) -> DbResult<T> {
        self.fetch_optional(sql, params)
            .await?
            .ok_or_else(|| DbError::database("No rows returned", None))
    }

    /// Fetch the first column of the first row.
    pub async fn fetch_scalar<O>(&self, sql: &str, params: &[QueryParam]) -> DbResult<O>
    where
        O: Send + Unpin,
        (O,): FromDbRow,
    {
        let (value,) = self.fetch_one::<(O,)>(sql, params).await?;
        Ok(value)
    }

    /// Lock the underlying connection for direct use with sqlx.
    ///
    /// The session is marked dirty since the caller may write through it.
    pub async fn connection(&self) -> DbResult<MappedMutexGuard<'_, DbConnection>> {
        let state = self.lock_open().await?;
        self.shared.dirty.store(true, Ordering::Relaxed);
        MutexGuard::try_map(state, |state| state.connection.as_mut())
            .map_err(|_| self.closed_error())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

/// Generate a unique session ID.
fn generate_session_id() -> String {
    format!("sess_{}", uuid::Uuid::new_v4().simple())
}
