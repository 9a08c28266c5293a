//! Axum integration for the Ketuk booking gate.
//!
//! The HTTP layer never writes the gate; it only reads it:
//!
//! - [`gate::require_gate_open`] / [`gate::require_gate_closed`] guard
//!   routes that must only run inside or outside a booking window
//! - [`routes`] exposes liveness and the current gate position
//!
//! # Example
//!
//! ```ignore
//! use ketuk_core::gate::GateState;
//! use ketuk_web::{AppState, routes};
//!
//! let gate = GateState::new();
//! let app = routes(AppState::new(gate.clone()));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod gate;
pub mod handlers;
pub mod state;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use gate::{GateGuard, GateLayer, require_gate_closed, require_gate_open};
pub use state::AppState;

/// Router with the service's own endpoints.
///
/// | Route | Handler |
/// |---|---|
/// | `GET /health` | [`handlers::health::health_check`] |
/// | `GET /api/gate` | [`handlers::gate::gate_status`] |
#[must_use]
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/gate", get(handlers::gate::gate_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
