//! `PostgreSQL` stores for the Ketuk booking gate.
//!
//! [`PostgresBookingStore`] implements both collaborator traits from
//! `ketuk-core` over one connection pool:
//!
//! - [`WindowStore`](ketuk_core::window::WindowStore) reads the `unblocking`
//!   table
//! - [`RecordStore`](ketuk_core::record::RecordStore) writes
//!   `schedule_ticket` and `tickets` and reads `users.email`
//!
//! Every statement runs on its own; the schedule/ticket pair is not wrapped
//! in a transaction.
//!
//! # Example
//!
//! ```ignore
//! use ketuk_postgres::PostgresBookingStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresBookingStore::connect("postgres://localhost/ketuk", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod records;
mod windows;

use ketuk_core::record::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Window and record store backed by a `PostgreSQL` pool.
#[derive(Clone, Debug)]
pub struct PostgresBookingStore {
    pool: PgPool,
}

impl PostgresBookingStore {
    /// Connect a new pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

/// Classify a sqlx error for callers that treat some failures as transient.
pub(crate) fn store_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        },
        sqlx::Error::Database(db_err)
            if db_err.is_foreign_key_violation()
                || db_err.is_unique_violation()
                || db_err.is_check_violation() =>
        {
            StoreError::Constraint(db_err.message().to_string())
        },
        _ => StoreError::Database(e.to_string()),
    }
}
