//! In-memory reservation store for fast, deterministic tests.
//!
//! Each event lives in its own partition behind a `tokio::sync::Mutex`,
//! standing in for the event row lock. A transaction owns the mutex guard
//! and works on a copy of the partition; `commit` writes the copy back and
//! dropping the transaction discards it, so a failed operation leaves no
//! partial writes behind.

#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use courtside_core::error::{ReservationError, Result};
use courtside_core::store::{EventSnapshot, EventTransaction, ReservationStore};
use courtside_core::types::{
    EventId, EventRecord, Hold, HoldId, Reservation, SubjectId, WaitlistEntry,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone, Debug)]
struct Partition {
    event: EventRecord,
    reservations: BTreeMap<SubjectId, Reservation>,
    holds: BTreeMap<SubjectId, Hold>,
    waitlist: BTreeMap<SubjectId, WaitlistEntry>,
}

impl Partition {
    fn new(event: EventRecord) -> Self {
        Self {
            event,
            reservations: BTreeMap::new(),
            holds: BTreeMap::new(),
            waitlist: BTreeMap::new(),
        }
    }

    fn live_holds(&self, now: DateTime<Utc>) -> u32 {
        count(self.holds.values().filter(|h| !h.is_expired(now)))
    }

    fn sorted_waitlist(&self) -> Vec<WaitlistEntry> {
        let mut entries: Vec<_> = self.waitlist.values().cloned().collect();
        entries.sort_by_key(WaitlistEntry::queue_key);
        entries
    }

    fn waitlist_position(&self, subject_id: SubjectId) -> Option<u32> {
        self.sorted_waitlist()
            .iter()
            .position(|e| e.subject_id == subject_id)
            .map(|idx| u32::try_from(idx + 1).unwrap_or(u32::MAX))
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> u32 {
        let before = self.holds.len();
        self.holds.retain(|_, hold| !hold.is_expired(now));
        u32::try_from(before - self.holds.len()).unwrap_or(u32::MAX)
    }
}

fn count<I: Iterator>(iter: I) -> u32 {
    u32::try_from(iter.count()).unwrap_or(u32::MAX)
}

type Partitions = HashMap<EventId, Arc<AsyncMutex<Partition>>>;

/// In-memory implementation of [`ReservationStore`].
///
/// Clones share the same data.
///
/// # Example
///
/// ```
/// use courtside_testing::InMemoryReservationStore;
/// use courtside_core::{EventId, EventRecord};
///
/// let store = InMemoryReservationStore::new();
/// store.insert_event(EventRecord::new(EventId::new(1), Some(10)).with_waitlist(true));
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryReservationStore {
    partitions: Arc<Mutex<Partitions>>,
    next_id: Arc<AtomicI64>,
    lock_timeout: Duration,
    injected_failure: Arc<Mutex<Option<ReservationError>>>,
}

impl Default for InMemoryReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryReservationStore {
    /// Create an empty store with a 5 second lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            lock_timeout: Duration::from_secs(5),
            injected_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Set how long [`ReservationStore::lock_event`] waits for a busy event.
    #[must_use]
    pub const fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Create or replace an event, dropping any rows it had.
    pub fn insert_event(&self, event: EventRecord) {
        self.partitions
            .lock()
            .insert(event.id, Arc::new(AsyncMutex::new(Partition::new(event))));
    }

    /// Make the next `lock_event` call fail with `error`.
    pub fn fail_next_lock(&self, error: ReservationError) {
        *self.injected_failure.lock() = Some(error);
    }

    /// Commit a reservation directly, bypassing every rule.
    pub async fn seed_reservation(&self, event_id: EventId, subject_id: SubjectId, at: DateTime<Utc>) {
        if let Some(partition) = self.partition(event_id) {
            partition.lock().await.reservations.insert(
                subject_id,
                Reservation {
                    event_id,
                    subject_id,
                    created_at: at,
                    payment_ref: None,
                },
            );
        }
    }

    /// Reservations of an event, ordered by subject.
    pub async fn reservations(&self, event_id: EventId) -> Vec<Reservation> {
        let Some(partition) = self.partition(event_id) else {
            return Vec::new();
        };
        let guard = partition.lock().await;
        guard.reservations.values().cloned().collect()
    }

    /// Holds of an event (expired ones included), ordered by subject.
    pub async fn holds(&self, event_id: EventId) -> Vec<Hold> {
        let Some(partition) = self.partition(event_id) else {
            return Vec::new();
        };
        let guard = partition.lock().await;
        guard.holds.values().cloned().collect()
    }

    /// Waitlist of an event in FIFO order.
    pub async fn waitlist(&self, event_id: EventId) -> Vec<WaitlistEntry> {
        let Some(partition) = self.partition(event_id) else {
            return Vec::new();
        };
        let guard = partition.lock().await;
        guard.sorted_waitlist()
    }

    fn partition(&self, event_id: EventId) -> Option<Arc<AsyncMutex<Partition>>> {
        self.partitions.lock().get(&event_id).cloned()
    }

    fn all_partitions(&self) -> Vec<(EventId, Arc<AsyncMutex<Partition>>)> {
        let mut all: Vec<_> = self
            .partitions
            .lock()
            .iter()
            .map(|(id, p)| (*id, Arc::clone(p)))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }
}

impl ReservationStore for InMemoryReservationStore {
    type Tx = InMemoryEventTransaction;

    async fn lock_event(&self, event_id: EventId) -> Result<Option<Self::Tx>> {
        let injected = self.injected_failure.lock().take();
        if let Some(error) = injected {
            return Err(error);
        }
        let Some(partition) = self.partition(event_id) else {
            return Ok(None);
        };
        let guard = tokio::time::timeout(self.lock_timeout, partition.lock_owned())
            .await
            .map_err(|_| ReservationError::LockTimeout(event_id))?;
        let working = (*guard).clone();
        Ok(Some(InMemoryEventTransaction {
            guard,
            working,
            next_id: Arc::clone(&self.next_id),
        }))
    }

    async fn purge_expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<(EventId, u32)>> {
        let mut affected = Vec::new();
        for (event_id, partition) in self.all_partitions() {
            let purged = partition.lock().await.purge_expired(now);
            if purged > 0 {
                affected.push((event_id, purged));
            }
        }
        Ok(affected)
    }

    async fn snapshot(
        &self,
        event_id: EventId,
        subject_id: Option<SubjectId>,
        now: DateTime<Utc>,
    ) -> Result<Option<EventSnapshot>> {
        let Some(partition) = self.partition(event_id) else {
            return Ok(None);
        };
        let p = partition.lock().await;
        Ok(Some(EventSnapshot {
            event: p.event.clone(),
            reservations: count(p.reservations.keys()),
            live_holds: p.live_holds(now),
            joined: subject_id.is_some_and(|s| p.reservations.contains_key(&s)),
            held: subject_id
                .and_then(|s| p.holds.get(&s))
                .is_some_and(|h| !h.is_expired(now)),
            waitlist_position: subject_id.and_then(|s| p.waitlist_position(s)),
            waitlist_length: count(p.waitlist.keys()),
        }))
    }
}

/// Transaction over one in-memory event partition.
#[derive(Debug)]
pub struct InMemoryEventTransaction {
    guard: OwnedMutexGuard<Partition>,
    working: Partition,
    next_id: Arc<AtomicI64>,
}

impl InMemoryEventTransaction {
    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl EventTransaction for InMemoryEventTransaction {
    fn event(&self) -> &EventRecord {
        &self.working.event
    }

    async fn purge_expired_holds(&mut self, now: DateTime<Utc>) -> Result<u32> {
        Ok(self.working.purge_expired(now))
    }

    async fn count_reservations(&mut self) -> Result<u32> {
        Ok(count(self.working.reservations.keys()))
    }

    async fn count_live_holds(&mut self, now: DateTime<Utc>) -> Result<u32> {
        Ok(self.working.live_holds(now))
    }

    async fn has_reservation(&mut self, subject_id: SubjectId) -> Result<bool> {
        Ok(self.working.reservations.contains_key(&subject_id))
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<bool> {
        if self.working.reservations.contains_key(&reservation.subject_id) {
            return Ok(false);
        }
        self.working
            .reservations
            .insert(reservation.subject_id, reservation.clone());
        Ok(true)
    }

    async fn delete_reservation(&mut self, subject_id: SubjectId) -> Result<bool> {
        Ok(self.working.reservations.remove(&subject_id).is_some())
    }

    async fn hold_for_subject(&mut self, subject_id: SubjectId) -> Result<Option<Hold>> {
        Ok(self.working.holds.get(&subject_id).cloned())
    }

    async fn find_hold(&mut self, hold_id: HoldId, subject_id: SubjectId) -> Result<Option<Hold>> {
        Ok(self
            .working
            .holds
            .get(&subject_id)
            .filter(|h| h.id == hold_id)
            .cloned())
    }

    async fn upsert_hold(&mut self, subject_id: SubjectId, expires_at: DateTime<Utc>) -> Result<Hold> {
        if let Some(existing) = self.working.holds.get_mut(&subject_id) {
            existing.expires_at = expires_at;
            return Ok(existing.clone());
        }
        let hold = Hold {
            id: HoldId::new(self.next_id()),
            event_id: self.working.event.id,
            subject_id,
            expires_at,
            payment_ref: None,
        };
        self.working.holds.insert(subject_id, hold.clone());
        Ok(hold)
    }

    async fn delete_hold(&mut self, hold_id: HoldId) -> Result<bool> {
        let before = self.working.holds.len();
        self.working.holds.retain(|_, h| h.id != hold_id);
        Ok(self.working.holds.len() < before)
    }

    async fn set_hold_payment_ref(&mut self, hold_id: HoldId, payment_ref: &str) -> Result<bool> {
        match self.working.holds.values_mut().find(|h| h.id == hold_id) {
            Some(hold) => {
                hold.payment_ref = Some(payment_ref.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn enqueue_waitlist(&mut self, subject_id: SubjectId, enqueued_at: DateTime<Utc>) -> Result<bool> {
        if self.working.waitlist.contains_key(&subject_id) {
            return Ok(false);
        }
        let entry = WaitlistEntry {
            event_id: self.working.event.id,
            subject_id,
            enqueued_at,
            seq: self.next_id(),
        };
        self.working.waitlist.insert(subject_id, entry);
        Ok(true)
    }

    async fn remove_from_waitlist(&mut self, subject_id: SubjectId) -> Result<bool> {
        Ok(self.working.waitlist.remove(&subject_id).is_some())
    }

    async fn take_waitlist_head(&mut self, limit: u32) -> Result<Vec<WaitlistEntry>> {
        let head: Vec<_> = self
            .working
            .sorted_waitlist()
            .into_iter()
            .take(limit as usize)
            .collect();
        for entry in &head {
            self.working.waitlist.remove(&entry.subject_id);
        }
        Ok(head)
    }

    async fn waitlist_position(&mut self, subject_id: SubjectId) -> Result<Option<u32>> {
        Ok(self.working.waitlist_position(subject_id))
    }

    async fn waitlist_len(&mut self) -> Result<u32> {
        Ok(count(self.working.waitlist.keys()))
    }

    async fn commit(self) -> Result<()> {
        let Self {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_clock;
    use chrono::Duration as ChronoDuration;
    use courtside_core::environment::Clock;

    fn event(id: i64, capacity: u32) -> EventRecord {
        EventRecord::new(EventId::new(id), Some(capacity)).with_waitlist(true)
    }

    #[tokio::test]
    async fn unknown_event_locks_to_none() {
        let store = InMemoryReservationStore::new();
        assert!(store.lock_event(EventId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = InMemoryReservationStore::new();
        store.insert_event(event(1, 2));
        let now = test_clock().now();

        let mut tx = store.lock_event(EventId::new(1)).await.unwrap().unwrap();
        tx.enqueue_waitlist(SubjectId::new(5), now).await.unwrap();
        drop(tx);
        assert!(store.waitlist(EventId::new(1)).await.is_empty());

        let mut tx = store.lock_event(EventId::new(1)).await.unwrap().unwrap();
        tx.enqueue_waitlist(SubjectId::new(5), now).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.waitlist(EventId::new(1)).await.len(), 1);
    }

    #[tokio::test]
    async fn busy_event_times_out() {
        let store = InMemoryReservationStore::new().with_lock_timeout(Duration::from_millis(20));
        store.insert_event(event(1, 2));
        let _held = store.lock_event(EventId::new(1)).await.unwrap().unwrap();

        let err = store.lock_event(EventId::new(1)).await.unwrap_err();
        assert_eq!(err, ReservationError::LockTimeout(EventId::new(1)));
    }

    #[tokio::test]
    async fn waitlist_head_is_fifo_with_seq_tiebreak() {
        let store = InMemoryReservationStore::new();
        store.insert_event(event(1, 2));
        let now = test_clock().now();

        let mut tx = store.lock_event(EventId::new(1)).await.unwrap().unwrap();
        tx.enqueue_waitlist(SubjectId::new(9), now).await.unwrap();
        tx.enqueue_waitlist(SubjectId::new(3), now).await.unwrap();
        tx.enqueue_waitlist(SubjectId::new(1), now + ChronoDuration::seconds(1))
            .await
            .unwrap();
        assert_eq!(tx.waitlist_position(SubjectId::new(3)).await.unwrap(), Some(2));

        let head = tx.take_waitlist_head(2).await.unwrap();
        let subjects: Vec<_> = head.iter().map(|e| e.subject_id.get()).collect();
        assert_eq!(subjects, vec![9, 3]);
        assert_eq!(tx.waitlist_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_hold_id() {
        let store = InMemoryReservationStore::new();
        store.insert_event(event(1, 2));
        let now = test_clock().now();

        let mut tx = store.lock_event(EventId::new(1)).await.unwrap().unwrap();
        let first = tx.upsert_hold(SubjectId::new(2), now).await.unwrap();
        let renewed = tx
            .upsert_hold(SubjectId::new(2), now + ChronoDuration::seconds(60))
            .await
            .unwrap();
        assert_eq!(first.id, renewed.id);
        assert_eq!(renewed.expires_at, now + ChronoDuration::seconds(60));
    }

    #[tokio::test]
    async fn sweep_reports_affected_events_once() {
        let store = InMemoryReservationStore::new();
        store.insert_event(event(1, 5));
        store.insert_event(event(2, 5));
        let now = test_clock().now();

        let mut tx = store.lock_event(EventId::new(1)).await.unwrap().unwrap();
        tx.upsert_hold(SubjectId::new(1), now).await.unwrap();
        tx.upsert_hold(SubjectId::new(2), now).await.unwrap();
        tx.commit().await.unwrap();
        let mut tx = store.lock_event(EventId::new(2)).await.unwrap().unwrap();
        tx.upsert_hold(SubjectId::new(1), now + ChronoDuration::seconds(10))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let affected = store.purge_expired_holds(now).await.unwrap();
        assert_eq!(affected, vec![(EventId::new(1), 2)]);
        assert!(store.holds(EventId::new(1)).await.is_empty());
        assert_eq!(store.holds(EventId::new(2)).await.len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = InMemoryReservationStore::new();
        store.insert_event(event(1, 1));
        store.fail_next_lock(ReservationError::ConnectionError("reset".into()));

        assert!(store.lock_event(EventId::new(1)).await.is_err());
        assert!(store.lock_event(EventId::new(1)).await.is_ok());
    }
}
