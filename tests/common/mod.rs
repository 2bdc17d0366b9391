//! Shared setup for integration tests: engines backed by temporary SQLite files.

#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use axum_db_session::db::{EngineRegistry, SessionFactories};
use axum_db_session::http::{AppState, with_session_layers};
use axum_db_session::{DbError, EngineKey};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestEngines {
    pub factories: Arc<SessionFactories>,
    pub keys: Vec<EngineKey>,
    // Keeps the database files alive for the duration of the test
    _dir: TempDir,
}

impl TestEngines {
    /// Start the default engine plus one engine per name in `extra`.
    pub async fn start(extra: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut vars = vec![(
            "database_url".to_string(),
            format!("sqlite:{}", dir.path().join("default.db").display()),
        )];
        for name in extra {
            vars.push((
                format!("app__{}__database_url", name),
                format!("sqlite:{}", dir.path().join(format!("{}.db", name)).display()),
            ));
        }

        let registry = EngineRegistry::from_vars(vars).unwrap();
        let factories = Arc::new(SessionFactories::new());
        let keys = factories.startup_all(&registry).await.unwrap();

        Self {
            factories,
            keys,
            _dir: dir,
        }
    }

    /// Run one statement in its own committed session.
    pub async fn exec(&self, key: &str, sql: &str) {
        self.factories
            .with_session(&EngineKey::new(key), |session| async move {
                session.execute(sql, &[]).await
            })
            .await
            .unwrap();
    }

    pub async fn count(&self, key: &str, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        self.factories
            .with_session(&EngineKey::new(key), |session| async move {
                session.fetch_scalar::<i64>(&sql, &[]).await
            })
            .await
            .unwrap()
    }

    /// Wrap `router` in the session layers of every started engine.
    pub fn app(&self, router: Router<AppState>) -> Router {
        with_session_layers(router, Arc::clone(&self.factories), self.keys.clone())
            .with_state(AppState::new(Arc::clone(&self.factories)))
    }
}

pub async fn send(app: &Router, method: &str, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Error type of a caller of the scoped session API.
#[derive(Debug)]
pub enum AppError {
    Db(DbError),
    NotAllowed(&'static str),
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        Self::Db(err)
    }
}
