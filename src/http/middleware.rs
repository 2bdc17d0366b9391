//! Per-request session middleware.
//!
//! One middleware layer is installed per engine key. Each layer opens a session
//! before the handler runs, publishes its handle in the request's
//! [`RequestSessions`] table and finalizes it from the response status.

use crate::db::lifecycle::{Finalization, Outcome, UnitOfWork, finalize};
use crate::db::{SessionFactories, SessionHandle};
use crate::error::internal_server_error;
use crate::models::EngineKey;
use axum::{
    Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Sessions opened for the current request, by engine key.
#[derive(Debug, Clone, Default)]
pub struct RequestSessions {
    sessions: HashMap<EngineKey, SessionHandle>,
}

impl RequestSessions {
    pub fn get(&self, key: &EngineKey) -> Option<&SessionHandle> {
        self.sessions.get(key)
    }

    pub fn contains(&self, key: &EngineKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Publish a session. Returns the handle it replaced, if any.
    pub fn insert(&mut self, handle: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(handle.key().clone(), handle)
    }
}

/// State of one session middleware layer.
#[derive(Debug, Clone)]
pub struct SessionLayerState {
    pub factories: Arc<SessionFactories>,
    pub key: EngineKey,
}

impl SessionLayerState {
    pub fn new(factories: Arc<SessionFactories>, key: EngineKey) -> Self {
        Self { factories, key }
    }
}

/// Open a session for the request, run the handler, then commit or roll back.
pub async fn add_session_to_request(
    State(layer): State<SessionLayerState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let session = match layer.factories.open(&layer.key).await {
        Ok(session) => session,
        Err(e) => {
            error!(engine_key = %layer.key, error = %e, "Failed to open session for request");
            return internal_server_error();
        }
    };

    let handle = session.activate().await;
    let extensions = request.extensions_mut();
    let previous = match extensions.get_mut::<RequestSessions>() {
        Some(sessions) => sessions.insert(handle),
        None => {
            let mut sessions = RequestSessions::default();
            sessions.insert(handle);
            extensions.insert(sessions);
            None
        }
    };
    if previous.is_some() {
        warn!(engine_key = %layer.key, "Session middleware installed twice for the same key");
    }

    let response = next.run(request).await;
    finalize_response(session, response).await
}

/// Commit or roll back `uow` according to the status of `response`, then close it.
///
/// A failed commit is rolled back and replaces the response with a generic 500.
pub async fn finalize_response<U: UnitOfWork>(uow: U, response: Response) -> Response {
    let key = uow.key().clone();
    let dirty = uow.is_dirty();
    let status_code = response.status().as_u16();

    let warn_rollback = |status_code: u16| {
        if dirty {
            warn!(
                engine_key = %key,
                status_code = status_code,
                "http error, rolling back possibly uncommitted changes"
            );
        }
    };

    match finalize(uow, Outcome::from_status(status_code)).await {
        Ok(Finalization::Committed) => response,
        Ok(Finalization::RolledBackOnError) => {
            warn_rollback(status_code);
            response
        }
        Ok(Finalization::RolledBackAfterCommitFailure(commit_err)) => {
            error!(
                engine_key = %key,
                error = %commit_err,
                "commit failed, returning http error"
            );
            let response = internal_server_error();
            warn_rollback(response.status().as_u16());
            response
        }
        Err(rollback_err) => {
            error!(
                engine_key = %key,
                status_code = status_code,
                error = %rollback_err,
                "rollback failed, returning http error"
            );
            internal_server_error()
        }
    }
}

/// Install one session middleware per engine key on `router`.
pub fn setup_middlewares<S>(
    router: Router<S>,
    factories: Arc<SessionFactories>,
    keys: impl IntoIterator<Item = EngineKey>,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    keys.into_iter().fold(router, |router, key| {
        router.layer(middleware::from_fn_with_state(
            SessionLayerState::new(Arc::clone(&factories), key),
            add_session_to_request,
        ))
    })
}
