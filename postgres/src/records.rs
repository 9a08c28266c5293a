//! `schedule_ticket`, `tickets` and `users` queries.

use crate::{PostgresBookingStore, store_error};
use ketuk_core::ids::{ScheduleId, TicketId, UserId};
use ketuk_core::record::{
    NewSchedule, NewTicket, RecordStore, ScheduleRecord, StoreError, TicketRecord,
};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

impl PostgresBookingStore {
    fn row_to_schedule(row: &sqlx::postgres::PgRow) -> Result<ScheduleRecord, StoreError> {
        let category: String = row.try_get("kategori").map_err(store_error)?;

        Ok(ScheduleRecord {
            id: ScheduleId::new(row.try_get("id_schedule").map_err(store_error)?),
            title: row.try_get("title").map_err(store_error)?,
            start: row.try_get("start_date").map_err(store_error)?,
            end: row.try_get("end_date").map_err(store_error)?,
            user_id: UserId::new(row.try_get("user_id").map_err(store_error)?),
            category: category.parse().map_err(StoreError::Database)?,
            description: row.try_get("description").map_err(store_error)?,
            created_at: row.try_get("created_at").map_err(store_error)?,
            updated_at: row.try_get("updated_at").map_err(store_error)?,
        })
    }

    fn row_to_ticket(row: &sqlx::postgres::PgRow) -> Result<TicketRecord, StoreError> {
        let status: String = row.try_get("status").map_err(store_error)?;
        let schedule_id: Option<i64> = row.try_get("id_schedule").map_err(store_error)?;

        Ok(TicketRecord {
            id: TicketId::new(row.try_get("id").map_err(store_error)?),
            user_id: UserId::new(row.try_get("user_id").map_err(store_error)?),
            title: row.try_get("title").map_err(store_error)?,
            description: row.try_get("description").map_err(store_error)?,
            status: status.parse().map_err(StoreError::Database)?,
            schedule_id: schedule_id.map(ScheduleId::new),
            created_at: row.try_get("created_at").map_err(store_error)?,
            updated_at: row.try_get("updated_at").map_err(store_error)?,
        })
    }
}

impl RecordStore for PostgresBookingStore {
    fn create_schedule(
        &self,
        schedule: NewSchedule,
    ) -> Pin<Box<dyn Future<Output = Result<ScheduleRecord, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                INSERT INTO schedule_ticket (title, start_date, end_date, user_id, kategori, description)
                VALUES ($1, $2, $3, $4, $5::ticket_category, $6)
                RETURNING id_schedule, title, start_date, end_date, user_id,
                          kategori::text AS kategori, description, created_at, updated_at
                ",
            )
            .bind(&schedule.title)
            .bind(schedule.start)
            .bind(schedule.end)
            .bind(schedule.user_id.get())
            .bind(schedule.category.as_str())
            .bind(&schedule.description)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;

            let record = Self::row_to_schedule(&row)?;
            tracing::debug!(schedule_id = %record.id, user_id = %record.user_id, "Schedule created");
            metrics::counter!("store.schedules.created").increment(1);
            Ok(record)
        })
    }

    fn create_ticket(
        &self,
        ticket: NewTicket,
    ) -> Pin<Box<dyn Future<Output = Result<TicketRecord, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                INSERT INTO tickets (user_id, title, description, status, id_schedule)
                VALUES ($1, $2, $3, $4::ticket_status, $5)
                RETURNING id, user_id, title, description, status::text AS status,
                          id_schedule, created_at, updated_at
                ",
            )
            .bind(ticket.user_id.get())
            .bind(&ticket.title)
            .bind(&ticket.description)
            .bind(ticket.status.as_str())
            .bind(ticket.schedule_id.map(ScheduleId::get))
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;

            let record = Self::row_to_ticket(&row)?;
            tracing::debug!(ticket_id = %record.id, schedule_id = ?record.schedule_id, "Ticket created");
            metrics::counter!("store.tickets.created").increment(1);
            Ok(record)
        })
    }

    fn find_user_email(
        &self,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let email: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
                .bind(user_id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(store_error)?;

            Ok(email.map(|(email,)| email))
        })
    }
}
