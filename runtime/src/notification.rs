//! Ticket creation notice.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ketuk_core::record::{ScheduleRecord, TicketRecord};
use std::fmt::Write as _;

/// RFC 1123 layout with the zone abbreviation, e.g.
/// `Thu, 01 Aug 2024 08:00:00 WIB`.
const RFC1123: &str = "%a, %d %b %Y %H:%M:%S %Z";

/// Subject and plain-text body of the e-mail sent to a ticket's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketNotice {
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

impl TicketNotice {
    /// Compose the notice for a freshly created ticket and its schedule.
    ///
    /// Schedule times are rendered in `tz`.
    #[must_use]
    pub fn compose(ticket: &TicketRecord, schedule: &ScheduleRecord, tz: Tz) -> Self {
        let mut body = String::from("A new ticket has been created with the following details:\n\n");
        let _ = writeln!(body, "Title: {}", ticket.title);
        let _ = writeln!(body, "Description: {}", ticket.description);
        let _ = writeln!(body, "Status: {}", ticket.status);
        let _ = writeln!(body, "Schedule Start: {}", rfc1123(schedule.start, tz));
        let _ = writeln!(body, "Schedule End: {}", rfc1123(schedule.end, tz));

        Self {
            subject: format!("New Ticket Created: {}", ticket.title),
            body,
        }
    }
}

fn rfc1123(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format(RFC1123).to_string()
}
