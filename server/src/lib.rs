//! Ketuk booking gate service.
//!
//! Wires the Postgres stores, the Redpanda queue, the SMTP notifier and the
//! HTTP layer around one shared gate, then runs the window evaluator and
//! the ingestion worker until shutdown.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod email;

pub use app::Application;
pub use config::Config;
pub use email::SmtpNotifier;
