//! Gate status endpoint.

use crate::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

/// Current gate position.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GateStatus {
    /// Whether booking requests are being processed.
    pub open: bool,
}

/// Report whether the booking gate is open.
///
/// # Endpoint
///
/// ```text
/// GET /api/gate
/// ```
///
/// # Response
///
/// ```json
/// { "open": false }
/// ```
#[allow(clippy::unused_async)]
pub async fn gate_status(State(state): State<AppState>) -> Json<GateStatus> {
    Json(GateStatus {
        open: state.gate.is_open(),
    })
}
