//! Engine registry.
//!
//! Resolves environment-style settings into named engine configurations.
//! The default engine reads `<prefix><setting>` (e.g. `database_url`), every
//! other engine reads `<namespace>__<key>__<prefix><setting>`
//! (e.g. `app__reporting__database_url`). Variable names are case-insensitive.
//!
//! Settings written with the `sqlalchemy_` prefix (`sqlalchemy_url`,
//! `app__reporting__sqlalchemy_url`) are read as well; when both spellings of
//! one setting are present the primary prefix wins.

use crate::config::{
    DEFAULT_ENV_NAMESPACE, DEFAULT_SETTING_PREFIX, FALLBACK_SETTING_PREFIX, PoolOptions,
};
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, EngineConfig, EngineKey, LifecycleStrategy};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::str::FromStr;
use tracing::debug;

/// Naming scheme of engine settings in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvLayout {
    pub namespace: String,
    pub setting_prefix: String,
    /// Read for settings missing under `setting_prefix`
    pub fallback_prefix: Option<String>,
}

impl EnvLayout {
    /// Layout with the `sqlalchemy_` fallback prefix enabled.
    pub fn new(namespace: impl Into<String>, setting_prefix: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into().to_lowercase(),
            setting_prefix: setting_prefix.into().to_lowercase(),
            fallback_prefix: Some(FALLBACK_SETTING_PREFIX.to_string()),
        }
    }

    /// Replace (or with `None`, disable) the fallback prefix.
    pub fn with_fallback_prefix(mut self, prefix: Option<&str>) -> Self {
        self.fallback_prefix = prefix.map(str::to_lowercase);
        self
    }

    fn scoped_prefix(&self, key: &EngineKey, prefix: &str) -> String {
        if key.is_default() {
            prefix.to_string()
        } else {
            format!("{}__{}__{}", self.namespace, key, prefix)
        }
    }

    fn key_pattern(&self) -> DbResult<Regex> {
        // Key must neither start nor end with '_' and the setting must not start with '_'.
        // The key group is greedy: `app__a__b__url` names key `a__b`.
        let pattern = format!(
            r"^{}__([^_](?:.*[^_])?)__([^_].*)$",
            regex::escape(&self.namespace)
        );
        Regex::new(&pattern).map_err(|e| {
            DbError::configuration(
                crate::models::DEFAULT_ENGINE_KEY,
                format!("Invalid environment namespace '{}': {}", self.namespace, e),
            )
        })
    }
}

impl Default for EnvLayout {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_NAMESPACE, DEFAULT_SETTING_PREFIX)
    }
}

/// Resolves engine keys and engine configurations from a set of variables.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    vars: BTreeMap<String, String>,
    layout: EnvLayout,
    key_pattern: Regex,
}

impl EngineRegistry {
    /// Snapshot the process environment with the default layout.
    pub fn from_env() -> DbResult<Self> {
        Self::from_env_with_layout(EnvLayout::default())
    }

    pub fn from_env_with_layout(layout: EnvLayout) -> DbResult<Self> {
        Self::with_layout(env_vars(), layout)
    }

    /// Use an explicit list of variables with the default layout.
    pub fn from_vars<I, K, V>(vars: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::with_layout(vars, EnvLayout::default())
    }

    pub fn with_layout<I, K, V>(vars: I, layout: EnvLayout) -> DbResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let key_pattern = layout.key_pattern()?;
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
            .collect();
        Ok(Self {
            vars,
            layout,
            key_pattern,
        })
    }

    pub fn layout(&self) -> &EnvLayout {
        &self.layout
    }

    /// Every engine key present in the variables. Always contains the default key.
    pub fn discover_engine_keys(&self) -> BTreeSet<EngineKey> {
        let mut keys: BTreeSet<EngineKey> = self
            .vars
            .keys()
            .filter_map(|name| self.key_pattern.captures(name))
            .filter_map(|caps| caps.get(1))
            .map(|key| EngineKey::new(key.as_str()))
            .collect();
        keys.insert(EngineKey::default_key());
        keys
    }

    /// Variable name prefix holding the settings of `key`.
    pub fn prefix_for(&self, key: &EngineKey) -> String {
        self.layout.scoped_prefix(key, &self.layout.setting_prefix)
    }

    /// Settings of `key` with the prefix stripped.
    pub fn settings_for(&self, key: &EngineKey) -> BTreeMap<String, String> {
        let mut settings = match &self.layout.fallback_prefix {
            Some(fallback) => self.stripped(&self.layout.scoped_prefix(key, fallback)),
            None => BTreeMap::new(),
        };
        settings.extend(self.stripped(&self.prefix_for(key)));
        settings
    }

    fn stripped(&self, prefix: &str) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .filter_map(|(name, value)| {
                name.strip_prefix(prefix)
                    .filter(|setting| !setting.is_empty())
                    .map(|setting| (setting.to_string(), value.clone()))
            })
            .collect()
    }

    /// Resolve the full configuration of one engine.
    pub fn engine_config(&self, key: &EngineKey) -> DbResult<EngineConfig> {
        let mut settings = self.settings_for(key);
        let prefix = self.prefix_for(key);

        let url = settings.remove("url").ok_or_else(|| {
            DbError::configuration(key.as_str(), format!("Missing required setting {}url", prefix))
        })?;
        let db_type = DatabaseType::from_connection_string(&url).ok_or_else(|| {
            DbError::configuration(
                key.as_str(),
                "Unsupported database URL scheme. Use postgres://, mysql://, mariadb:// or sqlite:",
            )
        })?;

        let pool_options = PoolOptions {
            pool_size: take_parsed(&mut settings, key, "pool_size")?,
            max_overflow: take_parsed(&mut settings, key, "max_overflow")?,
            min_connections: take_parsed(&mut settings, key, "min_connections")?,
            pool_timeout_secs: take_parsed(&mut settings, key, "pool_timeout")?,
            pool_recycle_secs: take_parsed(&mut settings, key, "pool_recycle")?,
            idle_timeout_secs: take_parsed(&mut settings, key, "idle_timeout")?,
            pool_pre_ping: settings
                .remove("pool_pre_ping")
                .map(|value| parse_flag(key, "pool_pre_ping", &value))
                .transpose()?,
        };
        pool_options
            .validate()
            .map_err(|message| DbError::configuration(key.as_str(), message))?;

        if !settings.is_empty() {
            debug!(
                engine_key = %key,
                options = ?settings.keys().collect::<Vec<_>>(),
                "Passing driver options through the connection URL"
            );
        }

        Ok(EngineConfig {
            key: key.clone(),
            db_type,
            url,
            pool_options,
            driver_options: settings,
        })
    }

    /// Resolve the configuration of `key` and build its (lazily connecting) pool.
    pub fn build_engine(&self, key: &EngineKey) -> DbResult<EngineHandle> {
        let config = self.engine_config(key)?;
        let pool = DbPool::connect_lazy(&config)?;
        Ok(EngineHandle { config, pool })
    }
}

fn env_vars() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}

fn take_parsed<T>(
    settings: &mut BTreeMap<String, String>,
    key: &EngineKey,
    name: &str,
) -> DbResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    settings
        .remove(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| {
                DbError::configuration(
                    key.as_str(),
                    format!("Invalid value '{}' for {}: {}", value, name, e),
                )
            })
        })
        .transpose()
}

fn parse_flag(key: &EngineKey, name: &str, value: &str) -> DbResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DbError::configuration(
            key.as_str(),
            format!("Invalid value '{}' for {}: expected true or false", value, name),
        )),
    }
}

/// A resolved engine: its configuration and connection pool.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    pub config: EngineConfig,
    pub pool: DbPool,
}

impl EngineHandle {
    pub fn key(&self) -> &EngineKey {
        &self.config.key
    }

    pub fn db_type(&self) -> DatabaseType {
        self.config.db_type
    }

    /// Whether the driver runs natively on the async runtime.
    pub fn is_async_capable(&self) -> bool {
        self.config.db_type.is_async_capable()
    }

    pub fn lifecycle_strategy(&self) -> LifecycleStrategy {
        self.config.db_type.lifecycle_strategy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(vars: &[(&str, &str)]) -> EngineRegistry {
        EngineRegistry::from_vars(vars.iter().copied()).unwrap()
    }

    #[test]
    fn test_prefix_for() {
        let reg = registry(&[]);
        assert_eq!(reg.prefix_for(&EngineKey::default_key()), "database_");
        assert_eq!(
            reg.prefix_for(&EngineKey::new("potato")),
            "app__potato__database_"
        );
    }

    #[test]
    fn test_custom_layout() {
        let reg = EngineRegistry::with_layout(
            [("SVC__reports__DB_URL", "sqlite:r.db")],
            EnvLayout::new("svc", "db_"),
        )
        .unwrap();
        let keys: Vec<_> = reg.discover_engine_keys().into_iter().collect();
        assert_eq!(keys, vec![EngineKey::default_key(), EngineKey::new("reports")]);
        let cfg = reg.engine_config(&EngineKey::new("reports")).unwrap();
        assert_eq!(cfg.url, "sqlite:r.db");
    }

    #[test]
    fn test_fallback_prefix() {
        let reg = registry(&[
            ("sqlalchemy_url", "sqlite:legacy.db"),
            ("sqlalchemy_pool_size", "3"),
            ("database_pool_size", "4"),
            ("app__potato__sqlalchemy_url", "sqlite:potato.db"),
        ]);
        let cfg = reg.engine_config(&EngineKey::default_key()).unwrap();
        assert_eq!(cfg.url, "sqlite:legacy.db");
        assert_eq!(cfg.pool_options.pool_size, Some(4));
        let cfg = reg.engine_config(&EngineKey::new("potato")).unwrap();
        assert_eq!(cfg.url, "sqlite:potato.db");

        let reg = EngineRegistry::with_layout(
            [("sqlalchemy_url", "sqlite:legacy.db")],
            EnvLayout::default().with_fallback_prefix(None),
        )
        .unwrap();
        assert!(reg.engine_config(&EngineKey::default_key()).is_err());
    }

    #[test]
    fn test_engine_config_pool_settings() {
        let reg = registry(&[
            ("DATABASE_URL", "postgres://u:p@localhost/db"),
            ("database_pool_size", "5"),
            ("database_max_overflow", "2"),
            ("database_pool_timeout", "3"),
            ("database_pool_recycle", "1800"),
            ("database_pool_pre_ping", "false"),
        ]);
        let cfg = reg.engine_config(&EngineKey::default_key()).unwrap();
        assert_eq!(cfg.db_type, DatabaseType::PostgreSQL);
        assert_eq!(cfg.pool_options.max_connections_or_default(false), 7);
        assert_eq!(cfg.pool_options.pool_timeout_secs, Some(3));
        assert_eq!(cfg.pool_options.pool_recycle_secs, Some(1800));
        assert!(!cfg.pool_options.pre_ping_or_default());
        assert!(cfg.driver_options.is_empty());
    }

    #[test]
    fn test_engine_config_driver_options() {
        let reg = registry(&[
            ("app__potato__database_url", "postgres://localhost/db"),
            ("app__potato__database_sslmode", "require"),
        ]);
        let cfg = reg.engine_config(&EngineKey::new("potato")).unwrap();
        assert_eq!(cfg.driver_options.get("sslmode").map(String::as_str), Some("require"));
        assert_eq!(cfg.connection_string(), "postgres://localhost/db?sslmode=require");
    }

    #[test]
    fn test_engine_config_errors() {
        let reg = registry(&[("database_url", "sqlite:a.db"), ("database_pool_size", "ten")]);
        let err = reg.engine_config(&EngineKey::default_key()).unwrap_err();
        assert!(err.to_string().contains("pool_size"));

        let reg = registry(&[("database_url", "oracle://localhost")]);
        assert!(matches!(
            reg.engine_config(&EngineKey::default_key()),
            Err(DbError::Configuration { .. })
        ));

        let reg = registry(&[("database_url", "sqlite:a.db"), ("database_pool_pre_ping", "maybe")]);
        assert!(reg.engine_config(&EngineKey::default_key()).is_err());
    }

    #[tokio::test]
    async fn test_build_engine_is_lazy() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("lazy.db").display());
        let reg = registry(&[("database_url", url.as_str())]);
        let engine = reg.build_engine(&EngineKey::default_key()).unwrap();
        assert!(!engine.is_async_capable());
        assert_eq!(engine.lifecycle_strategy(), LifecycleStrategy::WorkerThread);
        assert!(!dir.path().join("lazy.db").exists());
        engine.pool.probe().await.unwrap();
        assert!(dir.path().join("lazy.db").exists());
    }
}
