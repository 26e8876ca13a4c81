//! Transactional store abstraction.
//!
//! All capacity decisions are serialized by the store, not by in-process
//! locks. [`ReservationStore::lock_event`] opens a transaction holding an
//! exclusive lock on one event row; every read-decide-write sequence for that
//! event runs on the returned [`EventTransaction`] and becomes visible only on
//! [`EventTransaction::commit`]. Dropping a transaction without committing
//! rolls it back and releases the lock.
//!
//! # Implementations
//!
//! - `PostgresReservationStore` (courtside-postgres) - `SELECT ... FOR UPDATE`
//!   with a bounded `lock_timeout`
//! - `InMemoryReservationStore` (courtside-testing) - one async mutex per event
//!
//! # Example
//!
//! ```ignore
//! let Some(mut tx) = store.lock_event(event_id).await? else {
//!     return Ok(Decision::rejected(Reason::NotFound));
//! };
//! tx.purge_expired_holds(now).await?;
//! let occupied = tx.count_reservations().await? + tx.count_live_holds(now).await?;
//! if tx.event().has_room(occupied) {
//!     tx.insert_reservation(&reservation).await?;
//! }
//! tx.commit().await?;
//! ```

use crate::error::Result;
use crate::types::{EventId, EventRecord, Hold, HoldId, Reservation, SubjectId, WaitlistEntry};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Entry point to the persisted reservation state.
pub trait ReservationStore: Send + Sync {
    /// Transaction type holding one event row lock.
    type Tx: EventTransaction;

    /// Lock the event row and open a transaction on it.
    ///
    /// Returns `Ok(None)` when the event does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::LockTimeout`](crate::error::ReservationError::LockTimeout)
    /// if the lock is not acquired within the configured lock timeout, or a
    /// database error.
    fn lock_event(
        &self,
        event_id: EventId,
    ) -> impl Future<Output = Result<Option<Self::Tx>>> + Send;

    /// Delete every hold with `expires_at <= now` in one atomic statement.
    ///
    /// Returns each distinct event that lost at least one hold, with how many
    /// it lost, ordered by event id.
    ///
    /// # Errors
    ///
    /// Returns a database error if the statement fails.
    fn purge_expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<(EventId, u32)>>> + Send;

    /// Read a consistent view of an event without taking the row lock.
    ///
    /// Subject-specific fields are `false`/`None` when `subject_id` is `None`.
    /// Returns `Ok(None)` when the event does not exist.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    fn snapshot(
        &self,
        event_id: EventId,
        subject_id: Option<SubjectId>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<EventSnapshot>>> + Send;
}

/// A transaction holding the exclusive lock on one event row.
///
/// Every method operates on the locked event only.
pub trait EventTransaction: Send {
    /// The locked event.
    fn event(&self) -> &EventRecord;

    /// Delete this event's holds with `expires_at <= now`; returns how many.
    ///
    /// # Errors
    ///
    /// Returns a database error if the statement fails.
    fn purge_expired_holds(&mut self, now: DateTime<Utc>)
    -> impl Future<Output = Result<u32>> + Send;

    /// Number of reservations.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    fn count_reservations(&mut self) -> impl Future<Output = Result<u32>> + Send;

    /// Number of holds with `expires_at > now`.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    fn count_live_holds(&mut self, now: DateTime<Utc>) -> impl Future<Output = Result<u32>> + Send;

    /// Whether the subject holds a reservation.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    fn has_reservation(&mut self, subject_id: SubjectId)
    -> impl Future<Output = Result<bool>> + Send;

    /// Insert a reservation; returns `false` if the pair already existed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    fn insert_reservation(
        &mut self,
        reservation: &Reservation,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete the subject's reservation; returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    fn delete_reservation(
        &mut self,
        subject_id: SubjectId,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// The subject's hold, expired or not.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    fn hold_for_subject(
        &mut self,
        subject_id: SubjectId,
    ) -> impl Future<Output = Result<Option<Hold>>> + Send;

    /// The hold matching `(hold_id, event, subject_id)`, locked for update.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    fn find_hold(
        &mut self,
        hold_id: HoldId,
        subject_id: SubjectId,
    ) -> impl Future<Output = Result<Option<Hold>>> + Send;

    /// Create the subject's hold, or move the expiry of the existing one.
    ///
    /// A renewed hold keeps its id and payment reference.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    fn upsert_hold(
        &mut self,
        subject_id: SubjectId,
        expires_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Hold>> + Send;

    /// Delete a hold; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    fn delete_hold(&mut self, hold_id: HoldId) -> impl Future<Output = Result<bool>> + Send;

    /// Record a payment reference on a hold; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    fn set_hold_payment_ref(
        &mut self,
        hold_id: HoldId,
        payment_ref: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Append the subject to the waitlist; returns `false` if already queued.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    fn enqueue_waitlist(
        &mut self,
        subject_id: SubjectId,
        enqueued_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Remove the subject from the waitlist; returns whether it was queued.
    ///
    /// # Errors
    ///
    /// Returns a database error if the write fails.
    fn remove_from_waitlist(
        &mut self,
        subject_id: SubjectId,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete and return up to `limit` entries, earliest first.
    ///
    /// Rows locked by another transaction are skipped, never waited on.
    ///
    /// # Errors
    ///
    /// Returns a database error if the statement fails.
    fn take_waitlist_head(
        &mut self,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<WaitlistEntry>>> + Send;

    /// 1-based position of the subject in the waitlist.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    fn waitlist_position(
        &mut self,
        subject_id: SubjectId,
    ) -> impl Future<Output = Result<Option<u32>>> + Send;

    /// Number of queued subjects.
    ///
    /// # Errors
    ///
    /// Returns a database error if the read fails.
    fn waitlist_len(&mut self) -> impl Future<Output = Result<u32>> + Send;

    /// Make every write visible and release the event lock.
    ///
    /// # Errors
    ///
    /// Returns a database error if the commit fails; nothing is applied then.
    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

/// Unlocked read of one event, optionally from one subject's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSnapshot {
    /// The event
    pub event: EventRecord,
    /// Number of reservations
    pub reservations: u32,
    /// Number of holds with `expires_at > now`
    pub live_holds: u32,
    /// The subject holds a reservation
    pub joined: bool,
    /// The subject owns a hold with `expires_at > now`
    pub held: bool,
    /// 1-based position of the subject in the waitlist
    pub waitlist_position: Option<u32>,
    /// Number of queued subjects
    pub waitlist_length: u32,
}

impl EventSnapshot {
    /// Occupied slots (reservations plus live holds).
    #[must_use]
    pub const fn occupied(&self) -> u32 {
        self.reservations.saturating_add(self.live_holds)
    }
}
