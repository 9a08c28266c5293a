//! # Ketuk Core
//!
//! Core types and collaborator traits for the booking-window gate and the
//! asynchronous ticket-ingestion pipeline.
//!
//! The pipeline has two moving parts that never talk to each other directly:
//!
//! ```text
//!  ┌──────────────────┐   open()/close()   ┌─────────────┐
//!  │ Window Evaluator │ ─────────────────► │  GateState  │
//!  │ (every tick)     │                    │ (AtomicBool)│
//!  └────────┬─────────┘                    └──────┬──────┘
//!           │ find_active_windows(now)            │ is_open()
//!           ▼                                     ▼
//!  ┌──────────────────┐                   ┌──────────────────┐
//!  │   WindowStore    │                   │ Ingestion Worker │◄── MessageQueue
//!  └──────────────────┘                   └────────┬─────────┘
//!                                                  │ create_schedule / create_ticket
//!                                                  ▼
//!                                         ┌──────────────────┐
//!                                         │   RecordStore    │──► Notifier
//!                                         └──────────────────┘
//! ```
//!
//! This crate only defines the shapes. Implementations live in
//! `ketuk-postgres` (stores), `ketuk-redpanda` (queue), `ketuk-testing`
//! (in-memory doubles) and `ketuk-server` (SMTP notifier). The loops
//! themselves live in `ketuk-runtime`.
//!
//! ## Modules
//!
//! - [`gate`]: the shared intake flag
//! - [`window`]: booking windows and the [`window::WindowStore`] query
//! - [`record`]: schedule/ticket records and the [`record::RecordStore`]
//! - [`message`]: inbound booking request decoding and validation
//! - [`queue`]: broker-neutral delivery and settlement types
//! - [`notify`]: best-effort e-mail notification
//! - [`environment`]: injected clock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod gate;
pub mod message;
pub mod notify;
pub mod queue;
pub mod record;
pub mod window;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDateTime, Utc};
pub use chrono_tz::Tz;
pub use gate::GateState;

/// Environment module - injected dependencies that are not collaborators
/// in their own right.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = FixedClock::new(t0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Identifier newtypes shared by every crate in the workspace.
pub mod ids {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    macro_rules! id_newtype {
        ($(#[$meta:meta])* $name:ident) => {
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub i64);

            impl $name {
                /// Create a new identifier from its raw database value.
                #[must_use]
                pub const fn new(raw: i64) -> Self {
                    Self(raw)
                }

                /// Raw database value.
                #[must_use]
                pub const fn get(self) -> i64 {
                    self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        };
    }

    id_newtype!(
        /// Owning user of a window, schedule or ticket.
        UserId
    );
    id_newtype!(
        /// Generated identifier of a [`crate::record::ScheduleRecord`].
        ScheduleId
    );
    id_newtype!(
        /// Generated identifier of a [`crate::record::TicketRecord`].
        TicketId
    );
    id_newtype!(
        /// Identifier of a [`crate::window::BookingWindow`] row.
        WindowId
    );
}
