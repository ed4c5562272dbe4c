//! Biblion Server - lending library back end

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use biblion_server::{
    api,
    config::{AppConfig, LoggingConfig, StoreBackendKind},
    repository::Repository,
    services::{auth::Argon2Hasher, Services},
    store::{KvStore, PostgresBackend},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging);

    tracing::info!("Starting Biblion Server v{}", env!("CARGO_PKG_VERSION"));

    let store = match config.store.backend {
        StoreBackendKind::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on exit");
            KvStore::in_memory()
        }
        StoreBackendKind::Postgres => {
            let backend = PostgresBackend::connect(&config.store)
                .await
                .context("Failed to connect to the store")?;
            tracing::info!("Connected to database");
            KvStore::new(Arc::new(backend))
        }
    };

    let repository = Repository::with_defaults(store);

    if config.store.reconcile_on_startup {
        let report = repository
            .reconciler()
            .run()
            .await
            .context("Index reconciliation failed")?;
        tracing::info!(
            restored = report.restored,
            removed = report.removed,
            conflicts = report.conflicts,
            skipped = report.skipped,
            "Startup reconciliation finished"
        );
    }

    let services = Services::new(repository, &config, Arc::new(Argon2Hasher));

    let addr = SocketAddr::new(
        config.server.host.parse().context("Invalid host address")?,
        config.server.port,
    );

    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };
    let app = api::create_router(state);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Console output (pretty or JSON) plus an optional daily-rolling file.
/// The returned guard flushes the file writer on drop.
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("biblion_server={},tower_http=debug", logging.level).into());

    let console = if logging.format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let (file, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "biblion.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    guard
}
