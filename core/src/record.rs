//! Schedule and ticket records, and the store that persists them.
//!
//! The ingestion pipeline creates two linked rows per accepted request:
//!
//! 1. a [`ScheduleRecord`] that owns the booked time range, then
//! 2. a [`TicketRecord`] that references the schedule by its generated id.
//!
//! The second write needs the first write's id, so the two are strictly
//! ordered. Each create is individually transactional in the backing store;
//! the pair is not.

use crate::ids::{ScheduleId, TicketId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while reading or writing persisted records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, connection refused)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A query failed or returned malformed data
    #[error("Database error: {0}")]
    Database(String),

    /// A write violated a constraint (foreign key, not-null, enum type)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The operation did not finish within its deadline
    #[error("Store operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Kind of booking a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Category {
    /// Regular class session
    #[serde(rename = "Kelas")]
    Class,
    /// Laboratory practicum
    #[serde(rename = "Praktikum")]
    Practicum,
    /// Thesis defence or supervision
    #[serde(rename = "Skripsi")]
    Thesis,
    /// Anything else
    #[default]
    #[serde(rename = "Lainnya")]
    Other,
}

impl Category {
    /// Canonical storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "Kelas",
            Self::Practicum => "Praktikum",
            Self::Thesis => "Skripsi",
            Self::Other => "Lainnya",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts the canonical names, their English aliases, and an empty
    /// string (which maps to [`Category::Other`]). Matching is
    /// case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kelas" | "class" => Ok(Self::Class),
            "praktikum" | "practicum" => Ok(Self::Practicum),
            "skripsi" | "thesis" => Ok(Self::Thesis),
            "lainnya" | "other" | "" => Ok(Self::Other),
            _ => Err(format!("unknown category '{s}'")),
        }
    }
}

impl TryFrom<String> for Category {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Approval state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum TicketStatus {
    /// Awaiting review
    #[default]
    Pending,
    /// Approved by an administrator
    Accepted,
    /// Declined by an administrator
    Rejected,
}

impl TicketStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    /// An empty status means "not specified" and maps to
    /// [`TicketStatus::Pending`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("unknown ticket status '{s}'")),
        }
    }
}

impl TryFrom<String> for TicketStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Fields needed to create a schedule row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    /// Display title
    pub title: String,
    /// Booked range start
    pub start: DateTime<Utc>,
    /// Booked range end
    pub end: DateTime<Utc>,
    /// Requesting user
    pub user_id: UserId,
    /// Booking kind
    pub category: Category,
    /// Free-text description
    pub description: String,
}

/// A persisted schedule row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Generated identifier
    pub id: ScheduleId,
    /// Display title
    pub title: String,
    /// Booked range start
    pub start: DateTime<Utc>,
    /// Booked range end
    pub end: DateTime<Utc>,
    /// Requesting user
    pub user_id: UserId,
    /// Booking kind
    pub category: Category,
    /// Free-text description
    pub description: String,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a ticket row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    /// Requesting user
    pub user_id: UserId,
    /// Display title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// Initial status
    pub status: TicketStatus,
    /// Schedule this ticket books, if any
    pub schedule_id: Option<ScheduleId>,
}

/// A persisted ticket row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Generated identifier
    pub id: TicketId,
    /// Requesting user
    pub user_id: UserId,
    /// Display title
    pub title: String,
    /// Free-text description
    pub description: String,
    /// Approval state
    pub status: TicketStatus,
    /// Linked schedule
    pub schedule_id: Option<ScheduleId>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Write interface for the two records the pipeline creates.
///
/// Implementations must make each call atomic on its own. No cross-call
/// transaction is expected.
pub trait RecordStore: Send + Sync {
    /// Persist a schedule and return it with its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    fn create_schedule(
        &self,
        schedule: NewSchedule,
    ) -> Pin<Box<dyn Future<Output = Result<ScheduleRecord, StoreError>> + Send + '_>>;

    /// Persist a ticket and return it with its generated id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails (including a dangling
    /// schedule reference).
    fn create_ticket(
        &self,
        ticket: NewTicket,
    ) -> Pin<Box<dyn Future<Output = Result<TicketRecord, StoreError>> + Send + '_>>;

    /// E-mail address of a user, used to address the creation notice.
    ///
    /// Returns `Ok(None)` when the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    fn find_user_email(
        &self,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + '_>>;
}
