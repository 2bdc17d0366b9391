//! Session factories, one per started engine.

use crate::db::engine::{EngineHandle, EngineRegistry};
use crate::db::lifecycle::ScopedSession;
use crate::db::pool::DbPool;
use crate::db::session::{Session, SessionHandle};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, EngineKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Callback run once per engine after the liveness probe and before the
/// engine accepts sessions (migrations, schema checks, warm-up queries).
#[async_trait]
pub trait StartupHook: Send + Sync {
    async fn on_startup(&self, engine: &EngineHandle) -> DbResult<()>;
}

/// Produces sessions bound to one engine's pool.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    key: EngineKey,
    pool: DbPool,
}

impl SessionFactory {
    pub fn new(key: EngineKey, pool: DbPool) -> Self {
        Self { key, pool }
    }

    pub fn key(&self) -> &EngineKey {
        &self.key
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Acquire a connection and begin a new session on it.
    pub async fn create(&self) -> DbResult<Session> {
        Session::begin(self.key.clone(), &self.pool).await
    }
}

/// The session factory map shared by every request.
#[derive(Clone, Default)]
pub struct SessionFactories {
    factories: Arc<RwLock<HashMap<EngineKey, SessionFactory>>>,
    hooks: Vec<Arc<dyn StartupHook>>,
}

impl SessionFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook run for every engine started afterwards.
    pub fn with_hook(mut self, hook: impl StartupHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Start the engine of `key`: probe it, run the startup hooks, register its factory.
    pub async fn startup(&self, registry: &EngineRegistry, key: &EngineKey) -> DbResult<()> {
        if self.contains(key).await {
            return Err(DbError::configuration(
                key.as_str(),
                "Engine already started",
            ));
        }

        let engine = registry.build_engine(key)?;

        if let Err(e) = engine.pool.probe().await {
            error!(
                engine_key = %key,
                url = %engine.config.masked_url(),
                error = %e,
                "Failed querying db"
            );
            engine.pool.close().await;
            return Err(DbError::startup(key.as_str(), e.to_string()));
        }

        if let Some(version) = engine.pool.server_version().await {
            debug!(engine_key = %key, version = %version, "Engine reachable");
        }

        for hook in &self.hooks {
            if let Err(e) = hook.on_startup(&engine).await {
                error!(engine_key = %key, error = %e, "Startup hook failed");
                engine.pool.close().await;
                return Err(DbError::startup(key.as_str(), e.to_string()));
            }
        }

        // Re-check after async work to prevent TOCTOU race
        let duplicate = {
            let mut factories = self.factories.write().await;
            if factories.contains_key(key) {
                true
            } else {
                factories.insert(
                    key.clone(),
                    SessionFactory::new(key.clone(), engine.pool.clone()),
                );
                false
            }
        };
        if duplicate {
            engine.pool.close().await;
            return Err(DbError::configuration(
                key.as_str(),
                "Engine already started",
            ));
        }

        info!(
            engine_key = %key,
            url = %engine.config.masked_url(),
            db_type = %engine.db_type(),
            lifecycle = %engine.lifecycle_strategy(),
            "Engine started"
        );
        Ok(())
    }

    /// Start every engine the registry knows about. The first failure aborts.
    pub async fn startup_all(&self, registry: &EngineRegistry) -> DbResult<Vec<EngineKey>> {
        let keys: Vec<EngineKey> = registry.discover_engine_keys().into_iter().collect();
        for key in &keys {
            self.startup(registry, key).await?;
        }
        Ok(keys)
    }

    /// Get the factory of a started engine.
    pub async fn get(&self, key: &EngineKey) -> DbResult<SessionFactory> {
        let factories = self.factories.read().await;
        factories
            .get(key)
            .cloned()
            .ok_or_else(|| DbError::unknown_engine(key.as_str()))
    }

    pub async fn contains(&self, key: &EngineKey) -> bool {
        self.factories.read().await.contains_key(key)
    }

    /// Keys of all started engines, sorted.
    pub async fn keys(&self) -> Vec<EngineKey> {
        let factories = self.factories.read().await;
        let mut keys: Vec<EngineKey> = factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Create a new session on the engine of `key`.
    pub async fn open(&self, key: &EngineKey) -> DbResult<Session> {
        self.get(key).await?.create().await
    }

    /// Open a session that is finalized by [`ScopedSession::finish`].
    pub async fn open_session(&self, key: &EngineKey) -> DbResult<ScopedSession> {
        let session = self.open(key).await?;
        Ok(ScopedSession::new(session).await)
    }

    /// Run `work` with a session, committing on `Ok` and rolling back on `Err`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let id: i64 = factories
    ///     .with_session(&EngineKey::default_key(), |session| async move {
    ///         session.execute("INSERT INTO notes (body) VALUES (?)", &["hi".into()]).await?;
    ///         session.fetch_scalar("SELECT last_insert_rowid()", &[]).await
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_session<F, Fut, T, E>(&self, key: &EngineKey, work: F) -> Result<T, E>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        let scoped = self.open_session(key).await.map_err(E::from)?;
        let result = work(scoped.handle().clone()).await;
        scoped.finish(result).await
    }

    /// Close every pool. Called on server shutdown.
    pub async fn close_all(&self) {
        let mut factories = self.factories.write().await;
        for (key, factory) in factories.drain() {
            info!(engine_key = %key, "Closing engine");
            factory.pool.close().await;
        }
        info!("All engines closed");
    }
}

impl std::fmt::Debug for SessionFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactories")
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}
