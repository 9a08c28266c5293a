//! Periodic booking-window evaluation.
//!
//! Every tick the evaluator asks the [`WindowStore`] which windows contain
//! "now" (in the configured zone) and positions the gate by count:
//!
//! | Active windows | Gate | Outcome |
//! |---|---|---|
//! | 1 | open | [`TickOutcome::Opened`] |
//! | 0 | closed | [`TickOutcome::Closed`] |
//! | more than 1 | closed | [`TickOutcome::Conflict`] |
//! | query failed or timed out | unchanged | [`TickOutcome::Skipped`] |
//!
//! Overlapping windows fail closed: an administrator has to resolve the
//! overlap before intake reopens.
//!
//! # Example
//!
//! ```rust,ignore
//! let evaluator = WindowEvaluator::new(gate.clone(), store, Arc::new(SystemClock), tz)
//!     .with_tick_interval(Duration::from_secs(60));
//!
//! let handle = evaluator.spawn(shutdown_tx.subscribe());
//! ```

use crate::metrics::GateMetrics;
use chrono_tz::Tz;
use ketuk_core::environment::Clock;
use ketuk_core::gate::GateState;
use ketuk_core::record::StoreError;
use ketuk_core::window::WindowStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Result of a single evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Exactly one window is active; the gate is open
    Opened,
    /// No window is active; the gate is closed
    Closed,
    /// Several windows overlap now; the gate is closed
    Conflict {
        /// Number of active windows
        count: usize,
    },
    /// The store could not answer; the gate was left as it was
    Skipped {
        /// Why the tick was skipped
        reason: String,
    },
}

impl TickOutcome {
    /// Short label used for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::Conflict { .. } => "conflict",
            Self::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { count } => write!(f, "conflict ({count} windows)"),
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Scheduled task that keeps [`GateState`] in line with the window table.
///
/// The evaluator is the only component that writes the gate.
pub struct WindowEvaluator {
    gate: GateState,
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    timezone: Tz,
    tick_interval: Duration,
    query_timeout: Duration,
}

impl WindowEvaluator {
    /// Create an evaluator ticking every 60 seconds with a 10 second query
    /// timeout.
    #[must_use]
    pub fn new(
        gate: GateState,
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
        timezone: Tz,
    ) -> Self {
        Self {
            gate,
            store,
            clock,
            timezone,
            tick_interval: Duration::from_secs(60),
            query_timeout: Duration::from_secs(10),
        }
    }

    /// Set the tick interval, raised to at least one second.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(MIN_PERIOD);
        self
    }

    /// Set the deadline for one window store query, raised to at least one
    /// second.
    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout.max(MIN_PERIOD);
        self
    }

    /// Evaluate the windows once and move the gate accordingly.
    pub async fn evaluate_once(&self) -> TickOutcome {
        let now = self.clock.now().with_timezone(&self.timezone);

        let windows =
            match tokio::time::timeout(self.query_timeout, self.store.find_active_windows(now))
                .await
            {
                Ok(Ok(windows)) => windows,
                Ok(Err(e)) => return self.skip(&e),
                Err(_) => return self.skip(&StoreError::Timeout(self.query_timeout)),
            };

        let outcome = match windows.as_slice() {
            [window] => {
                if self.gate.open() {
                    debug!(window_id = %window.id, "Booking window still active");
                } else {
                    info!(
                        window_id = %window.id,
                        year = window.year,
                        semester = %window.semester,
                        "Booking window active, ticket intake opened"
                    );
                }
                TickOutcome::Opened
            },
            [] => {
                if self.gate.close() {
                    info!(%now, "No active booking window, ticket intake closed");
                } else {
                    debug!(%now, "No active booking window");
                }
                TickOutcome::Closed
            },
            overlapping => {
                self.gate.close();
                let count = overlapping.len();
                let window_ids: Vec<i64> = overlapping.iter().map(|w| w.id.get()).collect();
                warn!(
                    count,
                    ?window_ids,
                    %now,
                    "Overlapping booking windows, ticket intake closed until resolved"
                );
                TickOutcome::Conflict { count }
            },
        };

        GateMetrics::record_tick(outcome.label());
        GateMetrics::record_state(self.gate.is_open());
        outcome
    }

    fn skip(&self, error: &StoreError) -> TickOutcome {
        warn!(
            error = %error,
            gate_open = self.gate.is_open(),
            "Window query failed, leaving gate unchanged"
        );
        let outcome = TickOutcome::Skipped {
            reason: error.to_string(),
        };
        GateMetrics::record_tick(outcome.label());
        outcome
    }

    /// Spawn the evaluation loop as a background task.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Tick until a shutdown signal arrives.
    ///
    /// The first evaluation happens immediately. A tick that overruns the
    /// interval delays the next one rather than causing a burst.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            timezone = %self.timezone,
            tick_secs = self.tick_interval.as_secs(),
            "Window evaluator started"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Window evaluator received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.evaluate_once().await;
                }
            }
        }

        info!("Window evaluator stopped");
    }
}
