//! `PostgreSQL` reservation store for Courtside.
//!
//! This crate implements the `ReservationStore` trait from `courtside-core`
//! on top of sqlx:
//!
//! - Event row locks via `SELECT ... FOR UPDATE`, bounded by a
//!   transaction-local `lock_timeout`
//! - Waitlist promotion with `FOR UPDATE SKIP LOCKED`
//! - Hold renewal through `ON CONFLICT ... DO UPDATE`
//! - A single delete-and-return statement for the expiry sweep
//! - Embedded migrations (`migrations/`)
//!
//! # Example
//!
//! ```ignore
//! use courtside_postgres::PostgresReservationStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresReservationStore::connect("postgres://localhost/courtside", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod transaction;

pub use transaction::PgEventTransaction;

use chrono::{DateTime, Utc};
use courtside_core::error::{ReservationError, Result};
use courtside_core::store::{EventSnapshot, ReservationStore};
use courtside_core::types::{EventId, EventRecord, SubjectId};
use error::{db_error, to_count};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};

/// Default wait for an event row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// `PostgreSQL`-backed reservation store.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone, Debug)]
pub struct PostgresReservationStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresReservationStore {
    /// Wrap an existing pool with the default lock timeout.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Connect with a fresh pool.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::ConnectionError`] if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| ReservationError::ConnectionError(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Set how long a transaction waits for a busy event row.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ReservationError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Create or update an event row.
    ///
    /// Events belong to the scheduling service; this is how it (and tests)
    /// publish capacity, cutoff and waitlist settings.
    ///
    /// # Errors
    ///
    /// Returns a database error, or `Corrupted` if the capacity does not fit
    /// the column.
    pub async fn upsert_event(&self, event: &EventRecord) -> Result<()> {
        let capacity = event
            .capacity
            .map(i32::try_from)
            .transpose()
            .map_err(|_| ReservationError::Corrupted {
                event_id: event.id,
                detail: format!("capacity {:?} out of range", event.capacity),
            })?;

        sqlx::query(
            r"
            INSERT INTO events (id, capacity, cutoff_at, waitlist_enabled)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET capacity = EXCLUDED.capacity,
                cutoff_at = EXCLUDED.cutoff_at,
                waitlist_enabled = EXCLUDED.waitlist_enabled
            ",
        )
        .bind(event.id.get())
        .bind(capacity)
        .bind(event.cutoff_at)
        .bind(event.waitlist_enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(e, "Failed to upsert event"))?;

        tracing::debug!(event_id = %event.id, ?capacity, "Event upserted");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    capacity: Option<i32>,
    cutoff_at: Option<DateTime<Utc>>,
    waitlist_enabled: bool,
    reservations: i64,
    live_holds: i64,
    joined: bool,
    held: bool,
    waitlist_length: i64,
    waitlist_position: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct ExpiredRow {
    event_id: i64,
    expired: i64,
}

impl ReservationStore for PostgresReservationStore {
    type Tx = PgEventTransaction;

    async fn lock_event(&self, event_id: EventId) -> Result<Option<Self::Tx>> {
        let started = Instant::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error(e, "Failed to begin transaction"))?;

        let timeout_ms = self.lock_timeout.as_millis().max(1);
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{timeout_ms}ms"))
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(e, "Failed to set lock timeout"))?;

        let row = sqlx::query_as::<_, transaction::EventRow>(
            r"
            SELECT id, capacity, cutoff_at, waitlist_enabled
            FROM events
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(event_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| error::event_error(e, event_id, "Failed to lock event"))?;

        metrics::histogram!("event_lock_wait_seconds").record(started.elapsed().as_secs_f64());

        match row {
            Some(row) => Ok(Some(PgEventTransaction::new(tx, row.into_record()?))),
            None => Ok(None),
        }
    }

    async fn purge_expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<(EventId, u32)>> {
        let rows = sqlx::query_as::<_, ExpiredRow>(
            r"
            WITH deleted AS (
                DELETE FROM holds
                WHERE expires_at <= $1
                RETURNING event_id
            )
            SELECT event_id, COUNT(*) AS expired
            FROM deleted
            GROUP BY event_id
            ORDER BY event_id
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(e, "Failed to purge expired holds"))?;

        Ok(rows
            .into_iter()
            .map(|row| (EventId::new(row.event_id), to_count(row.expired)))
            .collect())
    }

    async fn snapshot(
        &self,
        event_id: EventId,
        subject_id: Option<SubjectId>,
        now: DateTime<Utc>,
    ) -> Result<Option<EventSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r"
            SELECT e.id, e.capacity, e.cutoff_at, e.waitlist_enabled,
                (SELECT COUNT(*) FROM reservations r WHERE r.event_id = e.id) AS reservations,
                (SELECT COUNT(*) FROM holds h
                    WHERE h.event_id = e.id AND h.expires_at > $2) AS live_holds,
                EXISTS(SELECT 1 FROM reservations r
                    WHERE r.event_id = e.id AND r.subject_id = $3) AS joined,
                EXISTS(SELECT 1 FROM holds h
                    WHERE h.event_id = e.id AND h.subject_id = $3 AND h.expires_at > $2) AS held,
                (SELECT COUNT(*) FROM waitlist w WHERE w.event_id = e.id) AS waitlist_length,
                (SELECT q.position FROM (
                    SELECT w.subject_id,
                        ROW_NUMBER() OVER (ORDER BY w.enqueued_at, w.seq) AS position
                    FROM waitlist w
                    WHERE w.event_id = e.id
                ) q WHERE q.subject_id = $3) AS waitlist_position
            FROM events e
            WHERE e.id = $1
            ",
        )
        .bind(event_id.get())
        .bind(now)
        .bind(subject_id.map(SubjectId::get))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(e, "Failed to read event snapshot"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let event = transaction::EventRow {
            id: row.id,
            capacity: row.capacity,
            cutoff_at: row.cutoff_at,
            waitlist_enabled: row.waitlist_enabled,
        }
        .into_record()?;

        Ok(Some(EventSnapshot {
            event,
            reservations: to_count(row.reservations),
            live_holds: to_count(row.live_holds),
            joined: row.joined,
            held: row.held,
            waitlist_position: row.waitlist_position.map(to_count),
            waitlist_length: to_count(row.waitlist_length),
        }))
    }
}
