//! Image captioning gateway backed by Hugging Face inference endpoints
//!
//! Provides endpoints for:
//! - POST /api/:model/upload - caption an uploaded image (`joycaption`, `interrogator`, `blip`)
//! - GET  /api/proxy/image  - same-origin image proxy with type sniffing
//! - GET  /api/proxy/fetch  - stricter proxy that trusts the upstream header
//! - GET  /api/test/image   - diagnostics for a remote image URL
//! - GET  /api/health       - liveness and version

use std::sync::Arc;

use anyhow::Context;

mod config;
mod error;
mod gateway;
mod handlers;
mod normalize;
mod proxy;
mod retry;
mod router;
mod state;
mod translate;
mod types;

#[cfg(test)]
mod test_support;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "caption_gateway=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    if config.hf_token.is_none() {
        tracing::warn!("HUGGINGFACE_TOKEN is not set; inference and translation calls will be anonymous");
    }

    let port = config.port;
    tracing::info!(
        port,
        inference_base = %config.inference_base,
        max_attempts = config.retry.max_attempts,
        models = ?config.models.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        "Starting caption gateway"
    );

    let state = Arc::new(AppState::new(config).context("Failed to build application state")?);
    let app = router::build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    tracing::info!("HTTP server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
