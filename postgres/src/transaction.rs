//! The locked-event transaction.

use crate::error::{event_error, to_count};
use chrono::{DateTime, Utc};
use courtside_core::error::{ReservationError, Result};
use courtside_core::store::EventTransaction;
use courtside_core::types::{
    EventId, EventRecord, Hold, HoldId, Reservation, SubjectId, WaitlistEntry,
};
use sqlx::{Postgres, Transaction};

#[derive(sqlx::FromRow)]
pub(crate) struct EventRow {
    pub(crate) id: i64,
    pub(crate) capacity: Option<i32>,
    pub(crate) cutoff_at: Option<DateTime<Utc>>,
    pub(crate) waitlist_enabled: bool,
}

impl EventRow {
    pub(crate) fn into_record(self) -> Result<EventRecord> {
        let event_id = EventId::new(self.id);
        let capacity = self
            .capacity
            .map(u32::try_from)
            .transpose()
            .map_err(|_| ReservationError::Corrupted {
                event_id,
                detail: format!("negative capacity {:?}", self.capacity),
            })?;
        Ok(EventRecord {
            id: event_id,
            capacity,
            cutoff_at: self.cutoff_at,
            waitlist_enabled: self.waitlist_enabled,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HoldRow {
    id: i64,
    event_id: i64,
    subject_id: i64,
    expires_at: DateTime<Utc>,
    payment_ref: Option<String>,
}

impl From<HoldRow> for Hold {
    fn from(row: HoldRow) -> Self {
        Self {
            id: HoldId::new(row.id),
            event_id: EventId::new(row.event_id),
            subject_id: SubjectId::new(row.subject_id),
            expires_at: row.expires_at,
            payment_ref: row.payment_ref,
        }
    }
}

#[derive(sqlx::FromRow)]
struct WaitlistRow {
    event_id: i64,
    subject_id: i64,
    enqueued_at: DateTime<Utc>,
    seq: i64,
}

impl From<WaitlistRow> for WaitlistEntry {
    fn from(row: WaitlistRow) -> Self {
        Self {
            event_id: EventId::new(row.event_id),
            subject_id: SubjectId::new(row.subject_id),
            enqueued_at: row.enqueued_at,
            seq: row.seq,
        }
    }
}

/// A `PostgreSQL` transaction holding `FOR UPDATE` on one event row.
///
/// Dropping it without [`EventTransaction::commit`] rolls back.
pub struct PgEventTransaction {
    tx: Transaction<'static, Postgres>,
    event: EventRecord,
}

impl PgEventTransaction {
    pub(crate) const fn new(tx: Transaction<'static, Postgres>, event: EventRecord) -> Self {
        Self { tx, event }
    }

    const fn event_id(&self) -> i64 {
        self.event.id.get()
    }
}

impl EventTransaction for PgEventTransaction {
    fn event(&self) -> &EventRecord {
        &self.event
    }

    async fn purge_expired_holds(&mut self, now: DateTime<Utc>) -> Result<u32> {
        let result = sqlx::query("DELETE FROM holds WHERE event_id = $1 AND expires_at <= $2")
            .bind(self.event_id())
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| event_error(e, self.event.id, "Failed to purge expired holds"))?;
        Ok(u32::try_from(result.rows_affected()).unwrap_or(u32::MAX))
    }

    async fn count_reservations(&mut self) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reservations WHERE event_id = $1")
            .bind(self.event_id())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| event_error(e, self.event.id, "Failed to count reservations"))?;
        Ok(to_count(count))
    }

    async fn count_live_holds(&mut self, now: DateTime<Utc>) -> Result<u32> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM holds WHERE event_id = $1 AND expires_at > $2")
                .bind(self.event_id())
                .bind(now)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| event_error(e, self.event.id, "Failed to count holds"))?;
        Ok(to_count(count))
    }

    async fn has_reservation(&mut self, subject_id: SubjectId) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM reservations WHERE event_id = $1 AND subject_id = $2)",
        )
        .bind(self.event_id())
        .bind(subject_id.get())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| event_error(e, self.event.id, "Failed to check reservation"))?;
        Ok(exists)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO reservations (event_id, subject_id, created_at, payment_ref)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id, subject_id) DO NOTHING
            ",
        )
        .bind(reservation.event_id.get())
        .bind(reservation.subject_id.get())
        .bind(reservation.created_at)
        .bind(reservation.payment_ref.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| event_error(e, self.event.id, "Failed to insert reservation"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_reservation(&mut self, subject_id: SubjectId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reservations WHERE event_id = $1 AND subject_id = $2")
            .bind(self.event_id())
            .bind(subject_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| event_error(e, self.event.id, "Failed to delete reservation"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn hold_for_subject(&mut self, subject_id: SubjectId) -> Result<Option<Hold>> {
        let row = sqlx::query_as::<_, HoldRow>(
            r"
            SELECT id, event_id, subject_id, expires_at, payment_ref
            FROM holds
            WHERE event_id = $1 AND subject_id = $2
            ",
        )
        .bind(self.event_id())
        .bind(subject_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| event_error(e, self.event.id, "Failed to read hold"))?;
        Ok(row.map(Hold::from))
    }

    async fn find_hold(&mut self, hold_id: HoldId, subject_id: SubjectId) -> Result<Option<Hold>> {
        let row = sqlx::query_as::<_, HoldRow>(
            r"
            SELECT id, event_id, subject_id, expires_at, payment_ref
            FROM holds
            WHERE id = $1 AND event_id = $2 AND subject_id = $3
            FOR UPDATE
            ",
        )
        .bind(hold_id.get())
        .bind(self.event_id())
        .bind(subject_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| event_error(e, self.event.id, "Failed to find hold"))?;
        Ok(row.map(Hold::from))
    }

    async fn upsert_hold(&mut self, subject_id: SubjectId, expires_at: DateTime<Utc>) -> Result<Hold> {
        let row = sqlx::query_as::<_, HoldRow>(
            r"
            INSERT INTO holds (event_id, subject_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, subject_id) DO UPDATE
            SET expires_at = EXCLUDED.expires_at
            RETURNING id, event_id, subject_id, expires_at, payment_ref
            ",
        )
        .bind(self.event_id())
        .bind(subject_id.get())
        .bind(expires_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| event_error(e, self.event.id, "Failed to upsert hold"))?;
        Ok(row.into())
    }

    async fn delete_hold(&mut self, hold_id: HoldId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM holds WHERE id = $1 AND event_id = $2")
            .bind(hold_id.get())
            .bind(self.event_id())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| event_error(e, self.event.id, "Failed to delete hold"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_hold_payment_ref(&mut self, hold_id: HoldId, payment_ref: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE holds SET payment_ref = $3 WHERE id = $1 AND event_id = $2")
                .bind(hold_id.get())
                .bind(self.event_id())
                .bind(payment_ref)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| event_error(e, self.event.id, "Failed to attach payment reference"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn enqueue_waitlist(
        &mut self,
        subject_id: SubjectId,
        enqueued_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO waitlist (event_id, subject_id, enqueued_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, subject_id) DO NOTHING
            ",
        )
        .bind(self.event_id())
        .bind(subject_id.get())
        .bind(enqueued_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| event_error(e, self.event.id, "Failed to enqueue"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_from_waitlist(&mut self, subject_id: SubjectId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM waitlist WHERE event_id = $1 AND subject_id = $2")
            .bind(self.event_id())
            .bind(subject_id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| event_error(e, self.event.id, "Failed to leave waitlist"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn take_waitlist_head(&mut self, limit: u32) -> Result<Vec<WaitlistEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, WaitlistRow>(
            r"
            WITH selected AS (
                SELECT event_id, subject_id
                FROM waitlist
                WHERE event_id = $1
                ORDER BY enqueued_at, seq
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            DELETE FROM waitlist w
            USING selected s
            WHERE w.event_id = s.event_id AND w.subject_id = s.subject_id
            RETURNING w.event_id, w.subject_id, w.enqueued_at, w.seq
            ",
        )
        .bind(self.event_id())
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| event_error(e, self.event.id, "Failed to promote from waitlist"))?;

        // RETURNING does not preserve the CTE order.
        let mut entries: Vec<WaitlistEntry> = rows.into_iter().map(Into::into).collect();
        entries.sort_by_key(WaitlistEntry::queue_key);
        Ok(entries)
    }

    async fn waitlist_position(&mut self, subject_id: SubjectId) -> Result<Option<u32>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r"
            SELECT q.position FROM (
                SELECT subject_id, ROW_NUMBER() OVER (ORDER BY enqueued_at, seq) AS position
                FROM waitlist
                WHERE event_id = $1
            ) q
            WHERE q.subject_id = $2
            ",
        )
        .bind(self.event_id())
        .bind(subject_id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| event_error(e, self.event.id, "Failed to read waitlist position"))?;
        Ok(row.map(|(position,)| to_count(position)))
    }

    async fn waitlist_len(&mut self) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM waitlist WHERE event_id = $1")
            .bind(self.event_id())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| event_error(e, self.event.id, "Failed to count waitlist"))?;
        Ok(to_count(count))
    }

    async fn commit(self) -> Result<()> {
        let event_id = self.event.id;
        self.tx
            .commit()
            .await
            .map_err(|e| event_error(e, event_id, "Failed to commit"))
    }
}
