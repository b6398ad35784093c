use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ApiError;
use crate::proxy::{ProbeReport, ProxiedImage, CACHE_CONTROL_VALUE};
use crate::state::AppState;
use crate::types::ImageUrlQuery;

/// GET /api/proxy/image - sniffing proxy with the 10 MiB ceiling
pub async fn proxy_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageUrlQuery>,
) -> Result<Response, ApiError> {
    let image = state.proxy.fetch(&query.url, &state.direct_policy).await?;
    Ok(image_response(image))
}

/// GET /api/proxy/fetch - header-trusting proxy with the 4 MiB ceiling
pub async fn fetch_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageUrlQuery>,
) -> Result<Response, ApiError> {
    let image = state.proxy.fetch(&query.url, &state.strict_policy).await?;
    Ok(image_response(image))
}

/// GET /api/test/image
pub async fn probe_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageUrlQuery>,
) -> Json<ProbeReport> {
    Json(state.proxy.probe(&query.url, &state.direct_policy).await)
}

fn image_response(image: ProxiedImage) -> Response {
    tracing::debug!(
        content_type = %image.content_type,
        source = ?image.source,
        format = ?image.format,
        bytes = image.bytes.len(),
        "Serving proxied image"
    );
    (
        [
            (header::CONTENT_TYPE, image.content_type),
            (header::CACHE_CONTROL, CACHE_CONTROL_VALUE.to_string()),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
        ],
        image.bytes,
    )
        .into_response()
}
