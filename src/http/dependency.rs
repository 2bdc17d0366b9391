//! Access to the request's sessions from handlers.

use crate::db::{SessionFactories, SessionHandle};
use crate::error::{DbError, DbResult};
use crate::http::middleware::RequestSessions;
use crate::models::EngineKey;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::Extensions;
use axum::http::request::Parts;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// Resolves the session of one engine key from a request.
#[derive(Debug, Clone, Default)]
pub struct SessionDependency {
    key: EngineKey,
}

impl SessionDependency {
    pub fn new(key: impl Into<EngineKey>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &EngineKey {
        &self.key
    }

    /// Look up the session published by the middleware of this key.
    ///
    /// Fails with `UnknownEngine` when no engine was started for the key and
    /// with `SessionNotFound` when the middleware for the key did not run.
    /// Never creates a session.
    pub async fn resolve(
        &self,
        extensions: &Extensions,
        factories: &SessionFactories,
    ) -> DbResult<SessionHandle> {
        if !factories.contains(&self.key).await {
            return Err(DbError::unknown_engine(self.key.as_str()));
        }
        extensions
            .get::<RequestSessions>()
            .and_then(|sessions| sessions.get(&self.key))
            .cloned()
            .ok_or_else(|| DbError::session_not_found(self.key.as_str()))
    }
}

/// Session of the default engine.
///
/// ```ignore
/// async fn create_note(DbSession(session): DbSession, Json(note): Json<NewNote>) -> DbResult<StatusCode> {
///     session.execute("INSERT INTO notes (body) VALUES (?)", &[note.body.into()]).await?;
///     Ok(StatusCode::CREATED)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DbSession(pub SessionHandle);

impl<S> FromRequestParts<S> for DbSession
where
    Arc<SessionFactories>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = DbError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let factories = Arc::<SessionFactories>::from_ref(state);
        SessionDependency::default()
            .resolve(&parts.extensions, &factories)
            .await
            .map(Self)
    }
}

impl Deref for DbSession {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Names an engine key at the type level, for [`KeyedSession`].
///
/// ```ignore
/// struct Reporting;
/// impl SessionKey for Reporting {
///     const KEY: &'static str = "reporting";
/// }
/// ```
pub trait SessionKey: Send + Sync + 'static {
    const KEY: &'static str;
}

/// Session of the engine named by `K`.
pub struct KeyedSession<K: SessionKey> {
    handle: SessionHandle,
    _key: PhantomData<fn() -> K>,
}

impl<K: SessionKey> KeyedSession<K> {
    pub fn into_inner(self) -> SessionHandle {
        self.handle
    }
}

impl<K: SessionKey> Deref for KeyedSession<K> {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<K: SessionKey> std::fmt::Debug for KeyedSession<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedSession")
            .field("key", &K::KEY)
            .field("handle", &self.handle)
            .finish()
    }
}

impl<S, K> FromRequestParts<S> for KeyedSession<K>
where
    Arc<SessionFactories>: FromRef<S>,
    S: Send + Sync,
    K: SessionKey,
{
    type Rejection = DbError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let factories = Arc::<SessionFactories>::from_ref(state);
        let handle = SessionDependency::new(K::KEY)
            .resolve(&parts.extensions, &factories)
            .await?;
        Ok(Self {
            handle,
            _key: PhantomData,
        })
    }
}
