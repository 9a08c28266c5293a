//! # Ketuk Testing
//!
//! In-memory collaborators and helpers for testing the booking gate and the
//! ingestion pipeline without Postgres, a broker, or an SMTP relay.
//!
//! This crate provides:
//! - [`InMemoryWindowStore`] and [`InMemoryRecordStore`] with failure injection
//! - [`InMemoryQueue`], a manual-ack queue that redelivers released messages
//! - [`RecordingNotifier`], which captures outbound e-mail
//! - [`FixedClock`] and [`ManualClock`] for deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use ketuk_testing::{InMemoryQueue, InMemoryRecordStore, RecordingNotifier};
//!
//! #[tokio::test]
//! async fn accepted_request_is_acked() {
//!     let queue = InMemoryQueue::new();
//!     queue.declare("schedule").await?;
//!     queue.publish("schedule", body).await?;
//!     // run the worker...
//!     assert_eq!(queue.acked("schedule").len(), 1);
//! }
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks
#![allow(clippy::missing_panics_doc)] // Test utilities only panic on poisoned locks

pub mod notifier;
pub mod queue;
pub mod stores;

use chrono::{DateTime, Utc};
use ketuk_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Clock frozen at one instant.
    ///
    /// ```
    /// use ketuk_testing::mocks::FixedClock;
    /// use ketuk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Freeze at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same reading, so a test can keep one handle and give
    /// another to the component under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock reading `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap() = time;
        }

        /// Move forward by `delta`.
        pub fn advance(&self, delta: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += delta;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Clock frozen at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::default() + chrono::Duration::days(20_089))
    }
}

/// Install a compact tracing subscriber for test output.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use notifier::{RecordingNotifier, SentEmail};
pub use queue::InMemoryQueue;
pub use stores::{InMemoryRecordStore, InMemoryWindowStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_starts_at_new_year_2025() {
        assert_eq!(test_clock().now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_clock().now());
        let handle = clock.clone();
        handle.advance(chrono::Duration::hours(1));
        assert_eq!(clock.now(), test_clock().now() + chrono::Duration::hours(1));
    }
}
