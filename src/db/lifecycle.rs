//! Session finalization.
//!
//! Every session ends the same way: commit on success, roll back on failure,
//! roll back when the commit itself fails, and close exactly once afterwards.
//! The state machine is written against [`UnitOfWork`] so it can be driven by
//! a real [`Session`] or by a test double.

use crate::db::session::{Session, SessionHandle};
use crate::error::{DbError, DbResult};
use crate::models::EngineKey;
use std::future::Future;
use tracing::{error, warn};

/// Something that can be committed, rolled back and closed.
pub trait UnitOfWork: Send {
    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Release the underlying connection. Consumes the unit of work.
    fn close(self) -> impl Future<Output = ()> + Send;

    /// Whether anything was written (or could have been) through this unit of work.
    fn is_dirty(&self) -> bool;

    fn key(&self) -> &EngineKey;
}

/// How the scope that used a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// HTTP statuses below 400 are successes.
    pub fn from_status(status: u16) -> Self {
        if status < 400 {
            Self::Success
        } else {
            Self::Failure
        }
    }

    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// What finalization did to the transaction.
#[derive(Debug)]
pub enum Finalization {
    Committed,
    /// The scope failed; the transaction was rolled back without a commit attempt.
    RolledBackOnError,
    /// The commit failed; the transaction was rolled back afterwards.
    RolledBackAfterCommitFailure(DbError),
}

impl Finalization {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Commit or roll back according to `outcome`, then close.
///
/// Returns `Err(DbError::Rollback)` when a rollback fails. The unit of work is
/// closed on every path.
pub async fn finalize<U: UnitOfWork>(mut uow: U, outcome: Outcome) -> DbResult<Finalization> {
    let result = match outcome {
        Outcome::Success => match uow.commit().await {
            Ok(()) => Ok(Finalization::Committed),
            Err(commit_err) => {
                error!(
                    engine_key = %uow.key(),
                    error = %commit_err,
                    "commit failed, rolling back"
                );
                uow.rollback()
                    .await
                    .map(|()| Finalization::RolledBackAfterCommitFailure(commit_err))
            }
        },
        Outcome::Failure => uow
            .rollback()
            .await
            .map(|()| Finalization::RolledBackOnError),
    };
    uow.close().await;
    result
}

/// A session opened outside of any HTTP request.
///
/// Obtain one with [`crate::db::SessionFactories::open_session`], run work
/// through [`ScopedSession::handle`] and end it with [`ScopedSession::finish`].
/// Dropping it unfinished rolls the transaction back.
#[derive(Debug)]
pub struct ScopedSession {
    session: Session,
    handle: SessionHandle,
}

impl ScopedSession {
    pub(crate) async fn new(session: Session) -> Self {
        let handle = session.activate().await;
        Self { session, handle }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn key(&self) -> &EngineKey {
        self.handle.key()
    }

    /// Finalize from the result of the work done with this session.
    ///
    /// See [`finalize_result`].
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        finalize_result(self.session, result).await
    }
}

/// Finalize `uow` from the result of the work done with it.
///
/// `Ok` commits and returns the value; a failed commit is rolled back and
/// reported as `DbError::Commit`. `Err` rolls back and is returned unchanged,
/// even when that rollback fails too.
pub async fn finalize_result<U, T, E>(uow: U, result: Result<T, E>) -> Result<T, E>
where
    U: UnitOfWork,
    E: From<DbError>,
{
    let key = uow.key().clone();
    let outcome = Outcome::from_result(&result);
    if outcome == Outcome::Failure {
        warn!(engine_key = %key, "context failed, rolling back");
    }

    match (finalize(uow, outcome).await, result) {
        (Ok(Finalization::Committed), result) => result,
        (Ok(Finalization::RolledBackAfterCommitFailure(commit_err)), _) => Err(E::from(commit_err)),
        (Ok(Finalization::RolledBackOnError), result) => result,
        (Err(rollback_err), Ok(_)) => Err(E::from(rollback_err)),
        (Err(rollback_err), Err(business_err)) => {
            error!(
                engine_key = %key,
                error = %rollback_err,
                "rollback after failed context also failed"
            );
            Err(business_err)
        }
    }
}
