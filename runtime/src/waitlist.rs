//! FIFO waitlist operations.
//!
//! Every method runs inside a caller-owned [`EventTransaction`], so the
//! reservations a caller inserts for promoted subjects commit together with
//! the waitlist removal.

use chrono::{DateTime, Utc};
use courtside_core::error::Result;
use courtside_core::store::EventTransaction;
use courtside_core::types::SubjectId;

/// Ordered waitlist for one locked event.
#[derive(Clone, Copy, Debug, Default)]
pub struct WaitlistService;

impl WaitlistService {
    /// Create the service.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Append the subject; returns `false` if it was already queued.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn enqueue<T: EventTransaction>(
        &self,
        tx: &mut T,
        subject_id: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let added = tx.enqueue_waitlist(subject_id, now).await?;
        if added {
            tracing::info!(event_id = %tx.event().id, %subject_id, "Subject waitlisted");
        }
        Ok(added)
    }

    /// Remove and return up to `n` subjects, earliest `enqueued_at` first.
    ///
    /// `n <= 0` returns an empty list without touching the store.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn promote_up_to<T: EventTransaction>(
        &self,
        tx: &mut T,
        n: i64,
    ) -> Result<Vec<SubjectId>> {
        if n <= 0 {
            return Ok(Vec::new());
        }
        let limit = u32::try_from(n).unwrap_or(u32::MAX);
        let mut entries = tx.take_waitlist_head(limit).await?;
        entries.sort_by_key(|e| e.queue_key());
        Ok(entries.into_iter().map(|e| e.subject_id).collect())
    }

    /// Remove the subject; returns whether it was queued.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn remove<T: EventTransaction>(&self, tx: &mut T, subject_id: SubjectId) -> Result<bool> {
        tx.remove_from_waitlist(subject_id).await
    }

    /// 1-based position of the subject.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn position<T: EventTransaction>(
        &self,
        tx: &mut T,
        subject_id: SubjectId,
    ) -> Result<Option<u32>> {
        tx.waitlist_position(subject_id).await
    }

    /// Number of queued subjects.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn len<T: EventTransaction>(&self, tx: &mut T) -> Result<u32> {
        tx.waitlist_len().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use courtside_core::environment::Clock;
    use courtside_core::store::ReservationStore;
    use courtside_core::types::{EventId, EventRecord};
    use courtside_testing::store::InMemoryEventTransaction;
    use courtside_testing::{InMemoryReservationStore, test_clock};

    async fn locked() -> (InMemoryReservationStore, InMemoryEventTransaction) {
        let store = InMemoryReservationStore::new();
        store.insert_event(EventRecord::new(EventId::new(1), Some(1)).with_waitlist(true));
        let tx = store.lock_event(EventId::new(1)).await.unwrap().unwrap();
        (store, tx)
    }

    #[tokio::test]
    async fn enqueue_is_idempotent() {
        let (_store, mut tx) = locked().await;
        let waitlist = WaitlistService::new();
        let now = test_clock().now();

        assert!(waitlist.enqueue(&mut tx, SubjectId::new(2), now).await.unwrap());
        assert!(!waitlist.enqueue(&mut tx, SubjectId::new(2), now).await.unwrap());
        assert_eq!(waitlist.len(&mut tx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn promotes_earliest_first() {
        let (_store, mut tx) = locked().await;
        let waitlist = WaitlistService::new();
        let now = test_clock().now();

        waitlist
            .enqueue(&mut tx, SubjectId::new(30), now + Duration::seconds(2))
            .await
            .unwrap();
        waitlist.enqueue(&mut tx, SubjectId::new(10), now).await.unwrap();
        waitlist
            .enqueue(&mut tx, SubjectId::new(20), now + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(
            waitlist.position(&mut tx, SubjectId::new(30)).await.unwrap(),
            Some(3)
        );

        let promoted = waitlist.promote_up_to(&mut tx, 2).await.unwrap();
        assert_eq!(promoted, vec![SubjectId::new(10), SubjectId::new(20)]);
        assert_eq!(
            waitlist.position(&mut tx, SubjectId::new(30)).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn non_positive_promotion_is_empty() {
        let (_store, mut tx) = locked().await;
        let waitlist = WaitlistService::new();
        waitlist
            .enqueue(&mut tx, SubjectId::new(2), test_clock().now())
            .await
            .unwrap();

        assert!(waitlist.promote_up_to(&mut tx, 0).await.unwrap().is_empty());
        assert!(waitlist.promote_up_to(&mut tx, -3).await.unwrap().is_empty());
        assert_eq!(waitlist.len(&mut tx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn remove_reports_membership() {
        let (_store, mut tx) = locked().await;
        let waitlist = WaitlistService::new();
        waitlist
            .enqueue(&mut tx, SubjectId::new(2), test_clock().now())
            .await
            .unwrap();

        assert!(waitlist.remove(&mut tx, SubjectId::new(2)).await.unwrap());
        assert!(!waitlist.remove(&mut tx, SubjectId::new(2)).await.unwrap());
    }
}
