//! Demo server: starts every engine configured in the environment and serves
//! `/health` and `/engines` with one session per engine per request.

use axum_db_session::config::Config;
use axum_db_session::db::{EngineRegistry, EnvLayout, SessionFactories};
use axum_db_session::http::{HttpServer, build_router};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is not an error
    let dotenv = dotenvy::dotenv();

    let config = Config::parse();
    init_tracing(&config);

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    info!("Starting axum-db-session v{}", env!("CARGO_PKG_VERSION"));

    let layout = EnvLayout::new(&config.env_namespace, &config.setting_prefix);
    let factories = Arc::new(SessionFactories::new());

    let keys = match EngineRegistry::from_env_with_layout(layout) {
        Ok(registry) => factories.startup_all(&registry).await,
        Err(e) => Err(e),
    };
    let keys = match keys {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "Startup failed");
            factories.close_all().await;
            std::process::exit(1);
        }
    };
    info!(count = keys.len(), "Engines started");

    let app = build_router(Arc::clone(&factories), keys);
    let server = HttpServer::new(
        factories,
        &config.http_host,
        config.http_port,
        config.shutdown_timeout_duration(),
    );

    if let Err(e) = server.run(app).await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
