//! HTTP request handlers.

use super::AppState;
use crate::metrics::TEXT_CONTENT_TYPE;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

/// GET /metrics. Always 200, with a placeholder body when metrics are off.
pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
        state.metrics.render(),
    )
}

pub async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}
