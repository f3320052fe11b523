/**
 * FLOWWATCH KERNEL - Entry point
 *
 * ROLE: Loads config, starts the sensor session (simulated data first, live
 * feed when the microcontroller answers) and serves the read API until
 * Ctrl-C, then tears the session down.
 */

use anyhow::Context;
use flowwatch_kernel::http::{build_router, AppState};
use flowwatch_kernel::{load_config, Session};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cfg = load_config().await;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.logging.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session = Session::from_config(&cfg);
    session.start();

    let app = build_router(AppState {
        store: session.store().clone(),
        health: session.health().clone(),
    });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("binding {}", cfg.http.bind))?;
    tracing::info!("[kernel] listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("[kernel] ctrl-c received, shutting down");
        })
        .await
        .context("http server")?;

    session.shutdown().await;
    Ok(())
}
