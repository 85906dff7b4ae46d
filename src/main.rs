use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slotbook::api::{app, AppState};
use slotbook::config::Config;
use slotbook::engine::Engine;
use slotbook::model::BookingEvent;
use slotbook::notify::NotifyHub;
use slotbook::store::{MemoryStore, PgStore, Stores};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port)?;

    let stores = match config.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url, config.db_max_connections).await?;
            store.migrate().await?;
            Stores::from_backend(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, bookings are kept in memory only");
            Stores::from_backend(Arc::new(MemoryStore::new()))
        }
    };
    for workspace in &config.workspaces {
        stores.workspaces.upsert_workspace(workspace).await?;
        info!(workspace = %workspace.id, timezone = %workspace.timezone, "workspace provisioned");
    }

    let notify = Arc::new(NotifyHub::new());
    spawn_event_log(&notify);
    let engine = Arc::new(Engine::new(stores, notify));

    let state = AppState::new(engine, Arc::new(config.staff_tokens.clone()));
    let app = app(state, config.max_connections);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("slotbook listening on {addr}");
    info!("  store: {}", if config.database_url.is_some() { "postgres" } else { "memory" });
    info!("  workspaces: {}", config.workspaces.len());
    info!("  staff tokens: {}", config.staff_tokens.len());
    info!("  max_connections: {}", config.max_connections);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                stop_rx.await.ok();
            })
            .await
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining requests...");
    stop_tx.send(()).ok();

    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(Ok(result)) => {
            result?;
            info!("all requests drained");
        }
        Ok(Err(e)) => tracing::error!("server task failed: {e}"),
        Err(_) => warn!(
            "drain timeout after {}s, dropping open connections",
            config.shutdown_timeout.as_secs()
        ),
    }

    info!("slotbook stopped");
    Ok(())
}

/// Booking events go to the automation subsystem; here they are only logged.
fn spawn_event_log(notify: &NotifyHub) {
    let mut rx = notify.subscribe_all();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(BookingEvent::Created(booking)) => info!(
                    booking = %booking.id,
                    workspace = %booking.workspace_id,
                    reference = %booking.reference_code,
                    "event: booking created"
                ),
                Ok(BookingEvent::StatusChanged { booking, from }) => info!(
                    booking = %booking.id,
                    workspace = %booking.workspace_id,
                    %from,
                    to = %booking.status,
                    "event: booking status changed"
                ),
                Err(RecvError::Lagged(n)) => warn!("event log lagged, {n} events skipped"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
