//! `unblocking` table queries.

use crate::{PostgresBookingStore, store_error};
use chrono::DateTime;
use chrono_tz::Tz;
use ketuk_core::ids::{UserId, WindowId};
use ketuk_core::record::StoreError;
use ketuk_core::window::{BookingWindow, WindowStore};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

impl PostgresBookingStore {
    fn row_to_window(row: &sqlx::postgres::PgRow) -> Result<BookingWindow, StoreError> {
        let semester: String = row.try_get("semester").map_err(store_error)?;

        Ok(BookingWindow {
            id: WindowId::new(row.try_get("id").map_err(store_error)?),
            year: row.try_get("tahun").map_err(store_error)?,
            semester: semester.parse()?,
            start: row.try_get("start_date").map_err(store_error)?,
            end: row.try_get("end_date").map_err(store_error)?,
            user_id: UserId::new(row.try_get("user_id").map_err(store_error)?),
            created_at: row.try_get("created_at").map_err(store_error)?,
        })
    }
}

impl WindowStore for PostgresBookingStore {
    fn find_active_windows(
        &self,
        now: DateTime<Tz>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<BookingWindow>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let civil_now = now.naive_local();

            let rows = sqlx::query(
                r"
                SELECT id, tahun, semester::text AS semester, start_date, end_date, user_id, created_at
                FROM unblocking
                WHERE start_date <= $1 AND end_date >= $1
                ORDER BY start_date ASC
                ",
            )
            .bind(civil_now)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

            tracing::debug!(%civil_now, timezone = %now.timezone(), active = rows.len(), "Queried booking windows");

            rows.iter().map(Self::row_to_window).collect()
        })
    }
}
