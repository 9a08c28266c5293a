//! Inbound booking request messages.
//!
//! Producers publish one JSON document per booking request:
//!
//! ```json
//! {
//!   "userId": 1,
//!   "title": "Lab A",
//!   "description": "Weekly practicum",
//!   "category": "Praktikum",
//!   "startDate": "2024-08-01T08:00:00+07:00",
//!   "endDate": "2024-08-01T10:00:00+07:00",
//!   "status": "pending"
//! }
//! ```
//!
//! [`decode`] turns a raw payload into a validated [`BookingRequestMessage`].
//! A payload that fails here can never succeed later, so the worker rejects
//! it without requeue. Because the message is gone once rejected,
//! [`MessageError::Decode`] carries the byte offset and offending character
//! for offline debugging.

use crate::ids::{ScheduleId, UserId};
use crate::record::{Category, NewSchedule, NewTicket, TicketStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Longest title a ticket can carry, in characters.
pub const MAX_TITLE_CHARS: usize = 100;

/// Errors produced while decoding or validating a message body.
#[derive(Error, Debug)]
pub enum MessageError {
    /// The body was empty
    #[error("empty message body")]
    Empty,

    /// The body was not a valid booking request document
    #[error("JSON error at offset {offset} (char: {found:?}): {source}")]
    Decode {
        /// Byte offset into the payload where decoding failed
        offset: usize,
        /// Byte at `offset`, if any, rendered as a character
        found: Option<char>,
        /// Underlying decoder error
        #[source]
        source: serde_json::Error,
    },

    /// The document decoded but its contents are unusable
    #[error("invalid booking request: {0}")]
    Invalid(String),
}

/// A decoded booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequestMessage {
    /// Requesting user
    pub user_id: UserId,
    /// Display title for both records
    pub title: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Booking kind
    #[serde(default)]
    pub category: Category,
    /// Requested range start
    pub start_date: DateTime<Utc>,
    /// Requested range end
    pub end_date: DateTime<Utc>,
    /// Initial ticket status (empty or absent means pending)
    #[serde(default)]
    pub status: TicketStatus,
}

impl BookingRequestMessage {
    /// The schedule row this request produces.
    #[must_use]
    pub fn to_new_schedule(&self) -> NewSchedule {
        NewSchedule {
            title: self.title.clone(),
            start: self.start_date,
            end: self.end_date,
            user_id: self.user_id,
            category: self.category,
            description: self.description.clone(),
        }
    }

    /// The ticket row this request produces, linked to `schedule_id`.
    #[must_use]
    pub fn to_new_ticket(&self, schedule_id: ScheduleId) -> NewTicket {
        NewTicket {
            user_id: self.user_id,
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status,
            schedule_id: Some(schedule_id),
        }
    }

    /// Stable key identifying "the same request" across redeliveries.
    ///
    /// SHA-256 over user, title and the requested range, hex encoded.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.user_id.get().to_be_bytes());
        hasher.update([0]);
        hasher.update(self.title.as_bytes());
        hasher.update([0]);
        hasher.update(self.start_date.to_rfc3339().as_bytes());
        hasher.update([0]);
        hasher.update(self.end_date.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn validate(self) -> Result<Self, MessageError> {
        if self.title.trim().is_empty() {
            return Err(MessageError::Invalid("title must not be blank".to_string()));
        }
        let title_chars = self.title.chars().count();
        if title_chars > MAX_TITLE_CHARS {
            return Err(MessageError::Invalid(format!(
                "title is {title_chars} characters, at most {MAX_TITLE_CHARS} allowed"
            )));
        }
        if self.end_date < self.start_date {
            return Err(MessageError::Invalid(format!(
                "endDate {} precedes startDate {}",
                self.end_date, self.start_date
            )));
        }
        Ok(self)
    }
}

/// Decode and validate a raw queue payload.
///
/// # Errors
///
/// - [`MessageError::Empty`] for a zero-length body
/// - [`MessageError::Decode`] for malformed JSON, missing required fields, or
///   unknown category/status values
/// - [`MessageError::Invalid`] for a blank or over-long title, or an
///   inverted range
pub fn decode(body: &[u8]) -> Result<BookingRequestMessage, MessageError> {
    if body.is_empty() {
        return Err(MessageError::Empty);
    }

    let message: BookingRequestMessage = serde_json::from_slice(body).map_err(|source| {
        let offset = byte_offset(body, source.line(), source.column());
        MessageError::Decode {
            offset,
            found: body.get(offset).map(|b| char::from(*b)),
            source,
        }
    })?;

    message.validate()
}

/// Convert serde_json's 1-based line/column into a byte offset into `body`.
fn byte_offset(body: &[u8], line: usize, column: usize) -> usize {
    let line_start = body
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'\n')
        .map(|(i, _)| i + 1)
        .nth(line.saturating_sub(2))
        .filter(|_| line > 1)
        .unwrap_or(0);

    (line_start + column.saturating_sub(1)).min(body.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LAB_A: &str = r#"{
        "userId": 1,
        "title": "Lab A",
        "description": "Weekly practicum",
        "category": "class",
        "startDate": "2024-08-01T08:00:00+07:00",
        "endDate": "2024-08-01T10:00:00+07:00",
        "status": "pending"
    }"#;

    #[test]
    fn decodes_a_well_formed_request() {
        let msg = decode(LAB_A.as_bytes()).unwrap();
        assert_eq!(msg.user_id, UserId::new(1));
        assert_eq!(msg.title, "Lab A");
        assert_eq!(msg.category, Category::Class);
        assert_eq!(msg.status, TicketStatus::Pending);
        assert_eq!(msg.start_date, Utc.with_ymd_and_hms(2024, 8, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn optional_fields_take_defaults() {
        let body = br#"{"userId":3,"title":"Defence","startDate":"2024-08-01T01:00:00Z","endDate":"2024-08-01T02:00:00Z","status":""}"#;
        let msg = decode(body).unwrap();
        assert_eq!(msg.status, TicketStatus::Pending);
        assert_eq!(msg.category, Category::Other);
        assert!(msg.description.is_empty());
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(matches!(decode(b""), Err(MessageError::Empty)));
    }

    #[test]
    fn syntax_error_reports_offset_and_char() {
        let body = br#"{"userId":1,"title":@}"#;
        match decode(body) {
            Err(MessageError::Decode { offset, found, .. }) => {
                assert_eq!(offset, 20);
                assert_eq!(found, Some('@'));
            },
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn offset_accounts_for_previous_lines() {
        let body = b"{\n\"userId\": 1,\n\"title\": #\n}";
        match decode(body) {
            Err(MessageError::Decode { found, offset, .. }) => {
                assert_eq!(found, Some('#'));
                assert_eq!(body[offset], b'#');
            },
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        let body = br#"{"userId":1,"title":"x","startDate":"2024-08-01T01:00:00Z","endDate":"2024-08-01T02:00:00Z","status":"approved"}"#;
        assert!(matches!(decode(body), Err(MessageError::Decode { .. })));
    }

    #[test]
    fn blank_title_and_inverted_range_are_invalid() {
        let blank = br#"{"userId":1,"title":"  ","startDate":"2024-08-01T01:00:00Z","endDate":"2024-08-01T02:00:00Z"}"#;
        assert!(matches!(decode(blank), Err(MessageError::Invalid(_))));

        let inverted = br#"{"userId":1,"title":"x","startDate":"2024-08-01T03:00:00Z","endDate":"2024-08-01T02:00:00Z"}"#;
        assert!(matches!(decode(inverted), Err(MessageError::Invalid(_))));
    }

    #[test]
    fn title_longer_than_a_ticket_column_is_invalid() {
        let with_title = |title: &str| {
            format!(
                r#"{{"userId":1,"title":"{title}","startDate":"2024-08-01T01:00:00Z","endDate":"2024-08-01T02:00:00Z"}}"#
            )
        };

        let longest = "é".repeat(MAX_TITLE_CHARS);
        assert!(decode(with_title(&longest).as_bytes()).is_ok());

        let too_long = "a".repeat(MAX_TITLE_CHARS + 1);
        assert!(matches!(
            decode(with_title(&too_long).as_bytes()),
            Err(MessageError::Invalid(_))
        ));
    }

    #[test]
    fn records_carry_message_fields() {
        let msg = decode(LAB_A.as_bytes()).unwrap();
        let schedule = msg.to_new_schedule();
        assert_eq!(schedule.title, "Lab A");
        assert_eq!(schedule.category, Category::Class);

        let ticket = msg.to_new_ticket(ScheduleId::new(9));
        assert_eq!(ticket.schedule_id, Some(ScheduleId::new(9)));
        assert_eq!(ticket.status, TicketStatus::Pending);
    }

    #[test]
    fn idempotency_key_is_stable_and_discriminating() {
        let a = decode(LAB_A.as_bytes()).unwrap();
        let b = decode(LAB_A.as_bytes()).unwrap();
        assert_eq!(a.idempotency_key(), b.idempotency_key());
        assert_eq!(a.idempotency_key().len(), 64);

        let mut c = a.clone();
        c.title = "Lab B".to_string();
        assert_ne!(a.idempotency_key(), c.idempotency_key());
    }
}
