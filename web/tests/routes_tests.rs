//! End-to-end tests for the service router.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use axum_test::TestServer;
use ketuk_core::gate::GateState;
use ketuk_web::{AppState, routes};
use serde_json::json;

fn server(gate: &GateState) -> TestServer {
    TestServer::new(routes(AppState::new(gate.clone()))).expect("Failed to start test server")
}

#[tokio::test]
async fn health_is_always_ok() {
    let gate = GateState::new();
    let response = server(&gate).get("/health").await;

    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn gate_endpoint_tracks_the_shared_gate() {
    let gate = GateState::new();
    let server = server(&gate);

    server.get("/api/gate").await.assert_json(&json!({ "open": false }));

    gate.open();
    server.get("/api/gate").await.assert_json(&json!({ "open": true }));

    gate.close();
    server.get("/api/gate").await.assert_json(&json!({ "open": false }));
}
