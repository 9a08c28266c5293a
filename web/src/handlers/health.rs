//! Liveness endpoint.

use axum::http::StatusCode;

/// `GET /health`: answers `200 ok` as long as the process serves requests.
///
/// Neither Postgres nor the broker is consulted; a stalled dependency shows
/// up in the gate and ingestion metrics instead.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
