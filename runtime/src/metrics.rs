//! Prometheus metrics for the gate and the ingestion pipeline.
//!
//! Metric names (the Prometheus exporter renders `.` as `_`):
//!
//! | Name | Kind | Labels |
//! |---|---|---|
//! | `booking_gate.open` | gauge (0/1) | |
//! | `booking_gate.ticks` | counter | `outcome` |
//! | `ingestion.messages.received` | counter | |
//! | `ingestion.messages.acked` | counter | |
//! | `ingestion.messages.rejected` | counter | `reason` |
//! | `ingestion.messages.deferred` | counter | |
//! | `ingestion.schedules.orphaned` | counter | |
//! | `ingestion.notifications.failed` | counter | |
//! | `ingestion.reconnects` | counter | |
//! | `ingestion.processing.duration_seconds` | histogram | |
//!
//! # Example
//!
//! ```rust,no_run
//! use ketuk_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // The binary serves `server.render()` at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server for `addr` (e.g. `0.0.0.0:9090`).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint should bind to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder that is already installed (several servers in one test
    /// binary) is tolerated with a warning; [`Self::render`] then returns
    /// `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Handle for rendering, if this server installed the recorder.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_gauge!("booking_gate.open", "Whether ticket intake is open (1) or closed (0)");
    describe_counter!(
        "booking_gate.ticks",
        "Window evaluations by outcome (opened, closed, conflict, skipped)"
    );

    describe_counter!(
        "ingestion.messages.received",
        "Booking request deliveries received"
    );
    describe_counter!(
        "ingestion.messages.acked",
        "Booking requests turned into a schedule and a ticket"
    );
    describe_counter!(
        "ingestion.messages.rejected",
        "Booking requests discarded without requeue, by reason"
    );
    describe_counter!(
        "ingestion.messages.deferred",
        "Booking requests released unsettled because the gate was closed"
    );
    describe_counter!(
        "ingestion.schedules.orphaned",
        "Schedules created whose ticket could not be created"
    );
    describe_counter!(
        "ingestion.notifications.failed",
        "Ticket creation e-mails that could not be sent"
    );
    describe_counter!(
        "ingestion.reconnects",
        "Times the worker had to resubscribe to the queue"
    );
    describe_histogram!(
        "ingestion.processing.duration_seconds",
        "Time spent processing one delivery"
    );
}

/// Window evaluator metrics recorder.
pub struct GateMetrics;

impl GateMetrics {
    /// Record the current gate position.
    pub fn record_state(open: bool) {
        gauge!("booking_gate.open").set(if open { 1.0 } else { 0.0 });
    }

    /// Record one evaluation.
    pub fn record_tick(outcome: &'static str) {
        counter!("booking_gate.ticks", "outcome" => outcome).increment(1);
    }
}

/// Ingestion worker metrics recorder.
pub struct IngestionMetrics;

impl IngestionMetrics {
    /// Record a delivery pulled from the queue.
    pub fn record_received() {
        counter!("ingestion.messages.received").increment(1);
    }

    /// Record a fully processed delivery.
    pub fn record_acked(duration: Duration) {
        counter!("ingestion.messages.acked").increment(1);
        histogram!("ingestion.processing.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a discarded delivery.
    pub fn record_rejected(reason: &'static str) {
        counter!("ingestion.messages.rejected", "reason" => reason).increment(1);
    }

    /// Record a delivery released because the gate was closed.
    pub fn record_deferred() {
        counter!("ingestion.messages.deferred").increment(1);
    }

    /// Record a schedule left without its ticket.
    pub fn record_orphan() {
        counter!("ingestion.schedules.orphaned").increment(1);
    }

    /// Record a failed notification.
    pub fn record_notification_failure() {
        counter!("ingestion.notifications.failed").increment(1);
    }

    /// Record a resubscription.
    pub fn record_reconnect() {
        counter!("ingestion.reconnects").increment(1);
    }
}
