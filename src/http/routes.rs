//! Router of the demo server.

use crate::db::SessionFactories;
use crate::error::DbResult;
use crate::http::dependency::DbSession;
use crate::http::middleware::setup_middlewares;
use crate::models::EngineKey;
use axum::extract::{FromRef, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Shared state of the demo router.
#[derive(Debug, Clone)]
pub struct AppState {
    pub factories: Arc<SessionFactories>,
}

impl AppState {
    pub fn new(factories: Arc<SessionFactories>) -> Self {
        Self { factories }
    }
}

impl FromRef<AppState> for Arc<SessionFactories> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.factories)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub engine_key: String,
}

#[derive(Debug, Serialize)]
pub struct EnginesResponse {
    pub engines: Vec<EngineKey>,
}

async fn health(DbSession(session): DbSession) -> DbResult<Json<HealthResponse>> {
    let answer: String = session.fetch_scalar("SELECT 'OK'", &[]).await?;
    Ok(Json(HealthResponse {
        status: if answer == "OK" { "ok" } else { "degraded" },
        engine_key: session.key().to_string(),
    }))
}

async fn engines(State(state): State<AppState>) -> Json<EnginesResponse> {
    Json(EnginesResponse {
        engines: state.factories.keys().await,
    })
}

/// Wrap every route of `router` in a session per engine key.
///
/// Panics in handlers are turned into 500 responses inside the session
/// layers, so a panicking handler rolls its sessions back.
pub fn with_session_layers<S>(
    router: Router<S>,
    factories: Arc<SessionFactories>,
    keys: impl IntoIterator<Item = EngineKey>,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    setup_middlewares(router.layer(CatchPanicLayer::new()), factories, keys)
}

/// Build the demo router with `/health` and `/engines`.
pub fn build_router(factories: Arc<SessionFactories>, keys: Vec<EngineKey>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/engines", get(engines));

    with_session_layers(router, Arc::clone(&factories), keys)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(factories))
}
