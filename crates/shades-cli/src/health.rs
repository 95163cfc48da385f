use std::net::SocketAddr;
use std::thread;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info};

/// Liveness routes. They report process-up only and see no pipeline state.
pub fn router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
}

/// Binds `port` on the caller's thread, so a taken port fails startup, then
/// serves the liveness routes from a dedicated thread with its own runtime.
pub fn spawn(port: u16) -> Result<thread::JoinHandle<()>> {
    let listener = bind(port)?;
    thread::Builder::new()
        .name("shades-health".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!(error = %err, "health runtime failed to start");
                    return;
                }
            };
            if let Err(err) = runtime.block_on(serve(listener)) {
                error!(error = %format!("{err:#}"), "health endpoint stopped");
            }
        })
        .context("failed to spawn health thread")
}

fn bind(port: u16) -> Result<std::net::TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = std::net::TcpListener::bind(addr)
        .with_context(|| format!("failed to bind health endpoint on {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make health listener non-blocking")?;
    info!(%addr, "health endpoint listening");
    Ok(listener)
}

async fn serve(listener: std::net::TcpListener) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)
        .context("failed to register health listener")?;
    axum::serve(listener, router())
        .await
        .context("health server error")
}

async fn root() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}
