//! # Ketuk Runtime
//!
//! The two background loops of the booking gate.
//!
//! ## Core Components
//!
//! - **[`WindowEvaluator`]**: ticks on a fixed interval, counts the booking
//!   windows that contain "now", and opens or closes the [`GateState`]
//! - **[`IngestionWorker`]**: consumes booking requests, consults the gate,
//!   writes a schedule and its ticket, notifies the owner, and settles each
//!   delivery
//!
//! The two never call each other; the gate is the only state they share.
//!
//! ## Example
//!
//! ```ignore
//! use ketuk_runtime::{IngestionWorker, WindowEvaluator};
//!
//! let gate = GateState::new();
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//!
//! let evaluator = WindowEvaluator::new(gate.clone(), window_store, clock, tz)
//!     .spawn(shutdown_tx.subscribe());
//! let worker = IngestionWorker::new("schedule", queue, record_store, notifier, gate)
//!     .spawn(shutdown_tx.subscribe());
//!
//! // ... later
//! let _ = shutdown_tx.send(());
//! evaluator.await?;
//! worker.await?;
//! ```
//!
//! [`GateState`]: ketuk_core::gate::GateState

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Periodic booking-window evaluation
pub mod evaluator;

/// Booking request consumer
pub mod ingestion;

/// Prometheus metrics for observability
pub mod metrics;

/// Ticket creation notice
pub mod notification;

/// Backoff for queue resubscription
pub mod retry;

pub use evaluator::{TickOutcome, WindowEvaluator};
pub use ingestion::{Disposition, IngestionWorker, RejectReason};
pub use notification::TicketNotice;
pub use retry::RetryPolicy;
