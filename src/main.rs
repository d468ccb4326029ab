//! crudapi: serve a CRUD API generated from the configured Postgres schema.

use crudapi::{app, load_from_pool, AppState, ResolvedModel, Settings};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.default_log_filter())),
        )
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect(&settings.database_url)
        .await?;

    let catalog = load_from_pool(&pool, &settings).await?;
    let model = ResolvedModel::resolve(catalog);

    let addr = settings.bind_addr();
    let prefix = settings.normalized_prefix().to_string();
    let state = AppState::new(pool, model, settings);
    spawn_reload_on_hangup(state.clone());

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("crudapi listening on http://{}{}", listener.local_addr()?, prefix);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[cfg(unix)]
fn spawn_reload_on_hangup(state: AppState) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP reload unavailable");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received; reloading catalog");
            // Failure is logged inside reload and the current model stays.
            let _ = state.reload().await;
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_state: AppState) {}
