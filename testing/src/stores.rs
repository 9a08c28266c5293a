//! In-memory window and record stores.
//!
//! Both stores are cheap to clone; clones share state so a test can keep a
//! handle for assertions while the component under test owns another.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use chrono_tz::Tz;
use ketuk_core::ids::{ScheduleId, TicketId, UserId, WindowId};
use ketuk_core::record::{
    NewSchedule, NewTicket, RecordStore, ScheduleRecord, StoreError, TicketRecord,
};
use ketuk_core::window::{BookingWindow, Semester, WindowStore};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Debug, Default)]
struct WindowState {
    windows: Vec<BookingWindow>,
    failure: Option<StoreError>,
    delay: Option<Duration>,
    next_id: i64,
}

/// In-memory booking window table.
///
/// # Example
///
/// ```
/// use ketuk_testing::InMemoryWindowStore;
/// use ketuk_core::record::StoreError;
///
/// let store = InMemoryWindowStore::new();
/// store.set_failure(Some(StoreError::Unavailable("down".into())));
/// assert_eq!(store.query_count(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryWindowStore {
    state: Arc<RwLock<WindowState>>,
    queries: Arc<AtomicUsize>,
}

impl InMemoryWindowStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `windows`.
    #[must_use]
    pub fn with_windows(windows: Vec<BookingWindow>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().unwrap();
            state.next_id = windows.iter().map(|w| w.id.get()).max().unwrap_or(0);
            state.windows = windows;
        }
        store
    }

    /// Add a window spanning `[start, end]` and return its id.
    pub fn insert(&self, start: NaiveDateTime, end: NaiveDateTime) -> WindowId {
        let mut state = self.state.write().unwrap();
        state.next_id += 1;
        let id = WindowId::new(state.next_id);
        state.windows.push(BookingWindow {
            id,
            year: start.year(),
            semester: Semester::FirstTerm,
            start,
            end,
            user_id: UserId::new(1),
            created_at: Utc::now(),
        });
        id
    }

    /// Remove a window.
    pub fn remove(&self, id: WindowId) {
        self.state.write().unwrap().windows.retain(|w| w.id != id);
    }

    /// Remove every window.
    pub fn clear(&self) {
        self.state.write().unwrap().windows.clear();
    }

    /// Make every subsequent query fail with `failure` (or succeed again
    /// with `None`).
    pub fn set_failure(&self, failure: Option<StoreError>) {
        self.state.write().unwrap().failure = failure;
    }

    /// Make every subsequent query take `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().delay = delay;
    }

    /// Number of queries served so far, failed ones included.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl WindowStore for InMemoryWindowStore {
    fn find_active_windows(
        &self,
        now: DateTime<Tz>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingWindow>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.queries.fetch_add(1, Ordering::SeqCst);

            let delay = self.state.read().unwrap().delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let state = self.state.read().unwrap();
            if let Some(failure) = &state.failure {
                return Err(failure.clone());
            }
            Ok(state
                .windows
                .iter()
                .filter(|w| w.contains(&now))
                .cloned()
                .collect())
        })
    }
}

#[derive(Debug, Default)]
struct RecordState {
    schedules: Vec<ScheduleRecord>,
    tickets: Vec<TicketRecord>,
    users: HashMap<UserId, String>,
    next_schedule_id: i64,
    next_ticket_id: i64,
    schedule_failure: Option<StoreError>,
    ticket_failure: Option<StoreError>,
    user_failure: Option<StoreError>,
}

/// In-memory schedule, ticket and user tables.
///
/// Tickets must reference an existing schedule, mirroring the foreign key
/// on the real table; a dangling reference fails with
/// [`StoreError::Constraint`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    state: Arc<RwLock<RecordState>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and their e-mail address.
    #[must_use]
    pub fn with_user(self, user_id: UserId, email: impl Into<String>) -> Self {
        self.add_user(user_id, email);
        self
    }

    /// Register a user on an existing handle.
    pub fn add_user(&self, user_id: UserId, email: impl Into<String>) {
        self.state
            .write()
            .unwrap()
            .users
            .insert(user_id, email.into());
    }

    /// Fail every `create_schedule` with `failure` (or stop failing).
    pub fn fail_schedules(&self, failure: Option<StoreError>) {
        self.state.write().unwrap().schedule_failure = failure;
    }

    /// Fail every `create_ticket` with `failure` (or stop failing).
    pub fn fail_tickets(&self, failure: Option<StoreError>) {
        self.state.write().unwrap().ticket_failure = failure;
    }

    /// Fail every `find_user_email` with `failure` (or stop failing).
    pub fn fail_user_lookups(&self, failure: Option<StoreError>) {
        self.state.write().unwrap().user_failure = failure;
    }

    /// Every schedule created so far, in creation order.
    #[must_use]
    pub fn schedules(&self) -> Vec<ScheduleRecord> {
        self.state.read().unwrap().schedules.clone()
    }

    /// Every ticket created so far, in creation order.
    #[must_use]
    pub fn tickets(&self) -> Vec<TicketRecord> {
        self.state.read().unwrap().tickets.clone()
    }

    /// Schedules no ticket points at.
    #[must_use]
    pub fn orphan_schedules(&self) -> Vec<ScheduleRecord> {
        let state = self.state.read().unwrap();
        state
            .schedules
            .iter()
            .filter(|s| !state.tickets.iter().any(|t| t.schedule_id == Some(s.id)))
            .cloned()
            .collect()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn create_schedule(
        &self,
        schedule: NewSchedule,
    ) -> Pin<Box<dyn Future<Output = Result<ScheduleRecord, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if let Some(failure) = &state.schedule_failure {
                return Err(failure.clone());
            }

            state.next_schedule_id += 1;
            let now = Utc::now();
            let record = ScheduleRecord {
                id: ScheduleId::new(state.next_schedule_id),
                title: schedule.title,
                start: schedule.start,
                end: schedule.end,
                user_id: schedule.user_id,
                category: schedule.category,
                description: schedule.description,
                created_at: now,
                updated_at: now,
            };
            state.schedules.push(record.clone());
            Ok(record)
        })
    }

    fn create_ticket(
        &self,
        ticket: NewTicket,
    ) -> Pin<Box<dyn Future<Output = Result<TicketRecord, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if let Some(failure) = &state.ticket_failure {
                return Err(failure.clone());
            }
            if let Some(schedule_id) = ticket.schedule_id {
                if !state.schedules.iter().any(|s| s.id == schedule_id) {
                    return Err(StoreError::Constraint(format!(
                        "schedule {schedule_id} does not exist"
                    )));
                }
            }

            state.next_ticket_id += 1;
            let now = Utc::now();
            let record = TicketRecord {
                id: TicketId::new(state.next_ticket_id),
                user_id: ticket.user_id,
                title: ticket.title,
                description: ticket.description,
                status: ticket.status,
                schedule_id: ticket.schedule_id,
                created_at: now,
                updated_at: now,
            };
            state.tickets.push(record.clone());
            Ok(record)
        })
    }

    fn find_user_email(
        &self,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            if let Some(failure) = &state.user_failure {
                return Err(failure.clone());
            }
            Ok(state.users.get(&user_id).cloned())
        })
    }
}
