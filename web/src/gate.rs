//! Tower layers that guard routes on the booking gate.
//!
//! Two guard families share one [`GateState`]:
//!
//! - [`require_gate_open`] for request-creation routes; rejected while the
//!   gate is closed
//! - [`require_gate_closed`] for routes that must only run outside a
//!   booking window; rejected while the gate is open
//!
//! Rejected requests never reach the inner service and receive
//! `403 Forbidden` with the standard error envelope.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::post};
//! use ketuk_web::gate::require_gate_open;
//!
//! let app = Router::new()
//!     .route("/api/tickets", post(create_ticket))
//!     .layer(require_gate_open(gate.clone()));
//! ```

use crate::error::AppError;
use axum::{
    extract::Request,
    response::{IntoResponse, Response},
};
use ketuk_core::gate::GateState;
use std::task::{Context, Poll};
use tower::{Layer, Service};

const CONTACT_ADMINISTRATOR: &str = "Please contact the administrator";

/// Which gate position a guarded route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateGuard {
    /// Pass only while the gate is open.
    Allow,
    /// Pass only while the gate is closed.
    Deny,
}

impl GateGuard {
    /// Whether a request may pass given the current gate.
    #[must_use]
    pub fn permits(self, gate: &GateState) -> bool {
        match self {
            Self::Allow => allow(gate),
            Self::Deny => deny(gate),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    fn rejection(self) -> AppError {
        let message = match self {
            Self::Allow => "This feature is currently disabled",
            Self::Deny => "This feature is currently enabled",
        };
        AppError::forbidden(message).with_detail(CONTACT_ADMINISTRATOR)
    }
}

/// `true` while the gate is open.
#[must_use]
pub fn allow(gate: &GateState) -> bool {
    gate.is_open()
}

/// `true` while the gate is closed.
#[must_use]
pub fn deny(gate: &GateState) -> bool {
    !gate.is_open()
}

/// Guard a route so it only runs while the gate is open.
#[must_use]
pub const fn require_gate_open(gate: GateState) -> GateLayer {
    GateLayer {
        gate,
        guard: GateGuard::Allow,
    }
}

/// Guard a route so it only runs while the gate is closed.
#[must_use]
pub const fn require_gate_closed(gate: GateState) -> GateLayer {
    GateLayer {
        gate,
        guard: GateGuard::Deny,
    }
}

/// Layer produced by [`require_gate_open`] and [`require_gate_closed`].
#[derive(Clone, Debug)]
pub struct GateLayer {
    gate: GateState,
    guard: GateGuard,
}

impl<S> Layer<S> for GateLayer {
    type Service = GateMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GateMiddleware {
            inner,
            gate: self.gate.clone(),
            guard: self.guard,
        }
    }
}

/// Middleware service enforcing a [`GateGuard`].
#[derive(Clone, Debug)]
pub struct GateMiddleware<S> {
    inner: S,
    gate: GateState,
    guard: GateGuard,
}

impl<S> Service<Request> for GateMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        if self.guard.permits(&self.gate) {
            return Box::pin(self.inner.call(req));
        }

        tracing::debug!(
            guard = self.guard.label(),
            method = %req.method(),
            uri = %req.uri(),
            "Request rejected by booking gate"
        );
        metrics::counter!("web.gate.rejected", "guard" => self.guard.label()).increment(1);

        let response = self.guard.rejection().into_response();
        Box::pin(async move { Ok(response) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::StatusCode, routing::post};
    use tower::ServiceExt;

    fn app(gate: &GateState) -> Router {
        Router::new()
            .route(
                "/api/tickets",
                post(|| async { "created" }).layer(require_gate_open(gate.clone())),
            )
            .route(
                "/api/windows",
                post(|| async { "edited" }).layer(require_gate_closed(gate.clone())),
            )
    }

    fn post_to(uri: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn predicates_follow_the_gate() {
        let gate = GateState::new();
        assert!(!allow(&gate));
        assert!(deny(&gate));

        gate.open();
        assert!(allow(&gate));
        assert!(!deny(&gate));
    }

    #[tokio::test]
    async fn closed_gate_rejects_creation_routes() {
        let gate = GateState::new();
        let response = app(&gate).oneshot(post_to("/api/tickets")).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "success": false,
                "message": "This feature is currently disabled",
                "error": "Please contact the administrator",
            })
        );
    }

    #[tokio::test]
    async fn open_gate_forwards_creation_routes() {
        let gate = GateState::new();
        gate.open();
        let response = app(&gate).oneshot(post_to("/api/tickets")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reverse_guard_rejects_while_open() {
        let gate = GateState::new();
        gate.open();

        let response = app(&gate).oneshot(post_to("/api/windows")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["message"], "This feature is currently enabled");

        gate.close();
        let response = app(&gate).oneshot(post_to("/api/windows")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
