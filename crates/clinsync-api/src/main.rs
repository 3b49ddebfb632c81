//! clinsync API server.
//!
//! Wires the Postgres-backed stores, the change-feed listener and the
//! socket hub into the axum router, then serves until ctrl-c. The
//! shutdown signal propagates through a watch channel so the listener
//! and cache sweeper stop alongside the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use clinsync_api::AppState;
use clinsync_core::defaults::{CACHE_SWEEP_INTERVAL_SECS, HUB_CAPACITY, SERVER_PORT};
use clinsync_core::{
    ChangeFeed, NotificationStore, PatientDirectory, ReportStore, RoleStore, SettingsStore,
    SocketHub, StorageUrls,
};
use clinsync_db::{
    log_pool_metrics, Database, PgNotificationRepository, PgPatientRepository,
    PgReportRepository, PgRoleRepository, PgSettingsRepository, PoolConfig,
};
use clinsync_realtime::{
    spawn_cache_sweeper, ChangeFeedListener, ConnectionRegistry, HttpReportProcessor,
    NotificationService, ReportProcessor, ReportSnapshotCache,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "clinsync_api=debug,clinsync_realtime=debug,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("clinsync-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/clinsync".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| SERVER_PORT.to_string())
        .parse()
        .unwrap_or(SERVER_PORT);

    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    let pool = db.pool().clone();
    let patients: Arc<dyn PatientDirectory> = Arc::new(PgPatientRepository::new(pool.clone()));
    let reports: Arc<dyn ReportStore> = Arc::new(PgReportRepository::new(pool.clone()));
    let roles: Arc<dyn RoleStore> = Arc::new(PgRoleRepository::new(pool.clone()));
    let settings: Arc<dyn SettingsStore> = Arc::new(PgSettingsRepository::new(pool.clone()));
    let notification_store: Arc<dyn NotificationStore> =
        Arc::new(PgNotificationRepository::new(pool.clone()));

    let hub = SocketHub::new(HUB_CAPACITY);
    let registry = Arc::new(ConnectionRegistry::new());
    let cache = Arc::new(ReportSnapshotCache::new());
    let notifications = Arc::new(NotificationService::new(
        notification_store,
        roles.clone(),
    ));
    let storage = StorageUrls::from_env();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let feed: Arc<dyn ChangeFeed> = Arc::new(db.feed());
    let listener = ChangeFeedListener::new(
        feed,
        cache.clone(),
        hub.clone(),
        patients.clone(),
        reports.clone(),
        notifications.clone(),
        storage,
    );
    let _listener_handle = listener.start(shutdown_rx.clone());

    let metrics_pool = pool.clone();
    let mut metrics_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = metrics_shutdown.changed() => break,
                _ = tick.tick() => log_pool_metrics(&metrics_pool),
            }
        }
    });

    let _sweeper_handle = spawn_cache_sweeper(
        cache,
        Duration::from_secs(CACHE_SWEEP_INTERVAL_SECS),
        shutdown_rx,
    );

    let processor: Option<Arc<dyn ReportProcessor>> = match HttpReportProcessor::from_env() {
        Some(p) => {
            info!("Report processing service configured");
            Some(Arc::new(p))
        }
        None => {
            warn!("PROCESSING_SERVICE_URL not set, uploads will not be processed");
            None
        }
    };

    let state = AppState {
        patients,
        reports,
        roles,
        settings,
        notifications,
        hub,
        registry,
        processor,
    };

    let app = clinsync_api::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on ctrl-c and flips the watch channel so the change-feed
/// listener and cache sweeper exit with the server.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping background tasks"),
        Err(e) => warn!(error = %e, "Failed to listen for ctrl-c, shutting down"),
    }
    let _ = shutdown_tx.send(true);
}
