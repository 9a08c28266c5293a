//! Application state for Axum handlers.

use ketuk_core::gate::GateState;

/// Application state shared across all HTTP handlers.
///
/// The gate is the same handle the window evaluator writes, so handlers and
/// guards always see the current position.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Shared booking gate.
    pub gate: GateState,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(gate: GateState) -> Self {
        Self { gate }
    }
}
