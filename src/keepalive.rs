//! Liveness endpoint for platform keep-alive probes.

use axum::{Router, routing::get};
use tracing::{info, warn};

pub async fn serve(port: u16) {
    let app = Router::new().route("/healthz", get(healthz));
    let bind_addr = format!("0.0.0.0:{port}");

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("Failed to bind keep-alive endpoint on {bind_addr}: {e}");
            return;
        }
    };

    info!("Keep-alive endpoint on http://{bind_addr}/healthz");
    if let Err(e) = axum::serve(listener, app).await {
        warn!("Keep-alive server stopped: {e}");
    }
}

async fn healthz() -> &'static str {
    "OK"
}
