//! Booking windows and the window store query.
//!
//! A booking window is an administrator-authored interval during which ticket
//! intake should be open. Windows are written by the CRUD layer; this
//! subsystem only reads them.
//!
//! Start and end are *civil* date-times, as authored in the gate's
//! configured time zone (for example `2024-08-01 08:00` in `Asia/Jakarta`).
//! The evaluator therefore hands the store a zoned `now`, and the store
//! compares against its local wall-clock reading. The zone travels with the
//! value; nothing in the process mutates a global time-zone setting.

use crate::ids::{UserId, WindowId};
use crate::record::StoreError;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

/// Semester classifier of a booking window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Semester {
    /// Odd (first) term of the academic year.
    #[serde(rename = "Ganjil")]
    FirstTerm,
    /// Even (second) term of the academic year.
    #[serde(rename = "Genap")]
    SecondTerm,
}

impl Semester {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FirstTerm => "Ganjil",
            Self::SecondTerm => "Genap",
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Semester {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Ganjil" => Ok(Self::FirstTerm),
            "Genap" => Ok(Self::SecondTerm),
            other => Err(StoreError::Database(format!("Invalid semester: {other}"))),
        }
    }
}

/// A persisted booking window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWindow {
    /// Row identifier
    pub id: WindowId,
    /// Academic year the window belongs to
    pub year: i32,
    /// Semester classifier
    pub semester: Semester,
    /// First civil instant at which intake is open (inclusive)
    pub start: NaiveDateTime,
    /// Last civil instant at which intake is open (inclusive)
    pub end: NaiveDateTime,
    /// Administrator who authored the window
    pub user_id: UserId,
    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl BookingWindow {
    /// Whether `now` lies in `[start, end]`, comparing wall-clock readings in
    /// `now`'s zone.
    #[must_use]
    pub fn contains(&self, now: &DateTime<Tz>) -> bool {
        let local = now.naive_local();
        self.start <= local && local <= self.end
    }
}

/// Read-only query interface over the booking window table.
///
/// Used only by the window evaluator.
pub trait WindowStore: Send + Sync {
    /// All windows whose `[start, end]` interval contains `now`.
    ///
    /// `now` carries the evaluation time zone; implementations compare the
    /// stored civil times against `now.naive_local()`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be queried. Callers treat
    /// this as transient.
    fn find_active_windows(
        &self,
        now: DateTime<Tz>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingWindow>, StoreError>> + Send + '_>>;
}
