use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Room for multipart boundaries and the non-file fields.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;
    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/api/health", get(handlers::health::health))
        // Image proxy
        .route("/api/proxy/image", get(handlers::proxy::proxy_image))
        .route("/api/proxy/fetch", get(handlers::proxy::fetch_image))
        .route("/api/test/image", get(handlers::proxy::probe_image))
        // Captioning
        .route(
            "/api/:model/upload",
            post(handlers::caption::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
