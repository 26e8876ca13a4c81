//! The reservation engine facade.
//!
//! [`ReservationEngine`] is what the HTTP layer and other callers talk to. It
//! wires the services together and adds the concerns that sit outside the
//! event lock:
//!
//! - replay of idempotent retries ([`IdempotencyGuard`])
//! - bounded retry of lock timeouts ([`RetryPolicy`])
//! - notifications, sent after commit and never able to undo it

use crate::capacity::CapacityManager;
use crate::holds::{HoldConfig, HoldService};
use crate::idempotency::{CachedOutcome, IdempotencyConfig, IdempotencyGuard, ScopedKey};
use crate::metrics::EngineMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use courtside_core::environment::Clock;
use courtside_core::error::{ReservationError, Result};
use courtside_core::notifier::{Notification, NotificationKind, Notifier};
use courtside_core::outcome::{
    ConfirmOutcome, EventStatus, HoldOutcome, JoinOutcome, JoinStatus, LeaveOutcome, Reason,
};
use courtside_core::store::ReservationStore;
use courtside_core::types::{EventId, HoldId, SubjectId};
use std::future::Future;
use std::sync::Arc;

/// Engine configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngineConfig {
    /// Hold TTL bounds
    pub holds: HoldConfig,
    /// Replay cache bounds
    pub idempotency: IdempotencyConfig,
    /// Retry policy for lock timeouts and dropped connections
    pub lock_retry: RetryPolicy,
}

/// Entry point for every reservation operation.
pub struct ReservationEngine<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    capacity: CapacityManager<S>,
    holds: HoldService<S>,
    idempotency: IdempotencyGuard,
    lock_retry: RetryPolicy,
}

impl<S: ReservationStore> ReservationEngine<S> {
    /// Assemble an engine.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            capacity: CapacityManager::new(Arc::clone(&store), Arc::clone(&clock)),
            holds: HoldService::new(Arc::clone(&store), Arc::clone(&clock), config.holds),
            idempotency: IdempotencyGuard::new(&config.idempotency, Arc::clone(&clock)),
            lock_retry: config.lock_retry,
            store,
            clock,
            notifier,
        }
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The injected clock.
    #[must_use]
    pub const fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The capacity manager.
    #[must_use]
    pub const fn capacity(&self) -> &CapacityManager<S> {
        &self.capacity
    }

    /// The hold service.
    #[must_use]
    pub const fn holds(&self) -> &HoldService<S> {
        &self.holds
    }

    /// Join an event directly, or its waitlist when full.
    ///
    /// With an idempotency key, a retry returns the first outcome unchanged.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` once retries are exhausted, or a database error.
    pub async fn join(
        &self,
        event_id: EventId,
        subject_id: SubjectId,
        idempotency_key: Option<&str>,
    ) -> Result<JoinOutcome> {
        let key = idempotency_key.map(|k| ScopedKey::join(event_id, k));
        if let Some(CachedOutcome::Join(outcome)) = self.replay(subject_id, key.as_ref()) {
            return Ok(outcome);
        }

        let decision = self
            .with_lock_retry(|| self.capacity.enforce_on_join(event_id, subject_id))
            .await?;
        let outcome = JoinOutcome::from(&decision);

        self.notify_promoted(event_id, &decision.promoted).await;
        if decision.reason == Reason::Ok && !decision.promoted.contains(&subject_id) {
            let kind = match outcome.status {
                JoinStatus::Joined => Some(NotificationKind::Joined),
                JoinStatus::Waitlisted => Some(NotificationKind::Waitlisted),
                JoinStatus::Rejected => None,
            };
            if let Some(kind) = kind {
                self.notify(Notification::to_subject(event_id, subject_id, kind))
                    .await;
            }
        }

        self.remember(subject_id, key, CachedOutcome::Join(outcome.clone()));
        Ok(outcome)
    }

    /// Take (or renew) a hold on one slot.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` once retries are exhausted, or a database error.
    pub async fn hold(
        &self,
        event_id: EventId,
        subject_id: SubjectId,
        ttl_seconds: Option<i64>,
        idempotency_key: Option<&str>,
    ) -> Result<HoldOutcome> {
        let key = idempotency_key.map(|k| ScopedKey::hold(event_id, k));
        if let Some(CachedOutcome::Hold(outcome)) = self.replay(subject_id, key.as_ref()) {
            return Ok(outcome);
        }

        let outcome = self
            .with_lock_retry(|| self.holds.create_hold(event_id, subject_id, ttl_seconds))
            .await?;

        self.notify_promoted(event_id, &outcome.promoted).await;
        if let Some(hold_id) = outcome.hold_id {
            self.notify(Notification::to_subject(
                event_id,
                subject_id,
                NotificationKind::HoldCreated { hold_id },
            ))
            .await;
        }

        self.remember(subject_id, key, CachedOutcome::Hold(outcome.clone()));
        Ok(outcome)
    }

    /// Confirm a hold into a reservation.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` once retries are exhausted, or a database error.
    pub async fn confirm(
        &self,
        event_id: EventId,
        hold_id: HoldId,
        subject_id: SubjectId,
        idempotency_key: Option<&str>,
    ) -> Result<ConfirmOutcome> {
        let key = idempotency_key.map(|k| ScopedKey::confirm(event_id, hold_id, k));
        if let Some(CachedOutcome::Confirm(outcome)) = self.replay(subject_id, key.as_ref()) {
            return Ok(outcome);
        }

        let outcome = self
            .with_lock_retry(|| self.holds.confirm_hold(event_id, hold_id, subject_id))
            .await?;

        self.notify_promoted(event_id, &outcome.promoted).await;
        if outcome.joined {
            self.notify(Notification::to_subject(
                event_id,
                subject_id,
                NotificationKind::HoldConfirmed { hold_id },
            ))
            .await;
        }

        self.remember(subject_id, key, CachedOutcome::Confirm(outcome.clone()));
        Ok(outcome)
    }

    /// Leave an event in whatever state the subject is in.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` once retries are exhausted, or a database error.
    pub async fn leave(
        &self,
        event_id: EventId,
        subject_id: SubjectId,
        idempotency_key: Option<&str>,
    ) -> Result<LeaveOutcome> {
        let key = idempotency_key.map(|k| ScopedKey::leave(event_id, k));
        if let Some(CachedOutcome::Leave(outcome)) = self.replay(subject_id, key.as_ref()) {
            return Ok(outcome);
        }

        let outcome = self
            .with_lock_retry(|| self.capacity.handle_on_leave(event_id, subject_id))
            .await?;

        if outcome.removed {
            self.notify(Notification::to_subject(event_id, subject_id, NotificationKind::Left))
                .await;
        }
        self.notify_promoted(event_id, &outcome.promoted_subject_ids)
            .await;

        self.remember(subject_id, key, CachedOutcome::Leave(outcome.clone()));
        Ok(outcome)
    }

    /// Cancel the subject's live hold.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` once retries are exhausted, or a database error.
    pub async fn release_hold(
        &self,
        event_id: EventId,
        hold_id: HoldId,
        subject_id: SubjectId,
    ) -> Result<LeaveOutcome> {
        let outcome = self
            .with_lock_retry(|| self.holds.release_hold(event_id, hold_id, subject_id))
            .await?;
        if outcome.removed {
            self.notify(Notification::to_subject(
                event_id,
                subject_id,
                NotificationKind::HoldReleased { hold_id },
            ))
            .await;
        }
        self.notify_promoted(event_id, &outcome.promoted_subject_ids)
            .await;
        Ok(outcome)
    }

    /// Withdraw the subject from the waitlist; returns whether it was queued.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` once retries are exhausted, or a database error.
    pub async fn leave_waitlist(&self, event_id: EventId, subject_id: SubjectId) -> Result<bool> {
        let removed = self
            .with_lock_retry(|| self.capacity.leave_waitlist(event_id, subject_id))
            .await?;
        if removed {
            self.notify(Notification::to_subject(event_id, subject_id, NotificationKind::Left))
                .await;
        }
        Ok(removed)
    }

    /// Record an external payment reference on the subject's live hold.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` once retries are exhausted, or a database error.
    pub async fn attach_payment_ref(
        &self,
        event_id: EventId,
        hold_id: HoldId,
        subject_id: SubjectId,
        payment_ref: &str,
    ) -> Result<bool> {
        self.with_lock_retry(|| {
            self.holds
                .attach_payment_ref(event_id, hold_id, subject_id, payment_ref)
        })
        .await
    }

    /// The subject's view of an event; `None` if the event does not exist.
    ///
    /// Reads without the event lock.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn status(&self, event_id: EventId, subject_id: SubjectId) -> Result<Option<EventStatus>> {
        let now = self.clock.now();
        let Some(snapshot) = self.store.snapshot(event_id, Some(subject_id), now).await? else {
            return Ok(None);
        };
        Ok(Some(EventStatus {
            joined: snapshot.joined,
            waitlisted: snapshot.waitlist_position.is_some(),
            held: snapshot.held,
            capacity: snapshot.event.capacity,
            open_slots: snapshot.event.open_slots(snapshot.occupied()),
            cutoff_passed: snapshot.event.cutoff_passed(now),
            waitlist_position: snapshot.waitlist_position,
            waitlist_length: snapshot.waitlist_length,
        }))
    }

    /// Deliver a notification; failures are logged and counted only.
    pub(crate) async fn notify(&self, notification: Notification) {
        let event_id = notification.event_id;
        let kind = notification.kind.label();
        if let Err(error) = self.notifier.notify(notification).await {
            EngineMetrics::record_notifier_failure();
            tracing::warn!(%event_id, kind, %error, "Notification failed");
        }
    }

    pub(crate) async fn notify_promoted(&self, event_id: EventId, promoted: &[SubjectId]) {
        for subject_id in promoted {
            self.notify(Notification::to_subject(
                event_id,
                *subject_id,
                NotificationKind::Promoted,
            ))
            .await;
        }
    }

    async fn with_lock_retry<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_predicate(&self.lock_retry, operation, |error: &ReservationError| {
            if matches!(error, ReservationError::LockTimeout(_)) {
                EngineMetrics::record_lock_timeout();
            }
            error.is_retryable()
        })
        .await
    }

    fn replay(&self, subject_id: SubjectId, key: Option<&ScopedKey>) -> Option<CachedOutcome> {
        let key = key?;
        let outcome = self.idempotency.get(subject_id, key)?;
        EngineMetrics::record_idempotency_hit();
        tracing::debug!(%subject_id, %key, "Replaying idempotent outcome");
        Some(outcome)
    }

    fn remember(&self, subject_id: SubjectId, key: Option<ScopedKey>, outcome: CachedOutcome) {
        if let Some(key) = key {
            self.idempotency.put(subject_id, key, outcome);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courtside_core::types::EventRecord;
    use courtside_core::NotifyError;
    use courtside_testing::{InMemoryReservationStore, MockClock, RecordingNotifier, test_clock};
    use std::time::Duration;

    const EVENT: EventId = EventId::new(1);

    fn s(id: i64) -> SubjectId {
        SubjectId::new(id)
    }

    struct Harness {
        store: Arc<InMemoryReservationStore>,
        notifier: RecordingNotifier,
        engine: ReservationEngine<InMemoryReservationStore>,
    }

    fn harness(event: EventRecord) -> Harness {
        let store = Arc::new(InMemoryReservationStore::new().with_lock_timeout(Duration::from_millis(20)));
        store.insert_event(event);
        let notifier = RecordingNotifier::new();
        let config = EngineConfig {
            lock_retry: RetryPolicy::builder()
                .max_retries(1)
                .initial_delay(Duration::from_millis(1))
                .build(),
            ..EngineConfig::default()
        };
        let engine = ReservationEngine::new(
            Arc::clone(&store),
            Arc::new(MockClock::from(test_clock())),
            Arc::new(notifier.clone()),
            config,
        );
        Harness {
            store,
            notifier,
            engine,
        }
    }

    #[tokio::test]
    async fn idempotent_join_replays_first_outcome() {
        let h = harness(EventRecord::new(EVENT, Some(1)));
        let first = h.engine.join(EVENT, s(1), Some("k1")).await.unwrap();
        let second = h.engine.join(EVENT, s(1), Some("k1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.reason, Reason::Ok);
        assert_eq!(h.store.reservations(EVENT).await.len(), 1);
        assert_eq!(h.notifier.kinds_for(s(1)), vec!["joined"]);

        let unkeyed = h.engine.join(EVENT, s(1), None).await.unwrap();
        assert_eq!(unkeyed.reason, Reason::AlreadyParticipant);
    }

    #[tokio::test]
    async fn infra_errors_are_not_cached() {
        let h = harness(EventRecord::new(EVENT, Some(1)));
        h.store
            .fail_next_lock(ReservationError::DatabaseError("boom".into()));

        assert!(h.engine.join(EVENT, s(1), Some("k")).await.is_err());
        let retried = h.engine.join(EVENT, s(1), Some("k")).await.unwrap();
        assert_eq!(retried.status, JoinStatus::Joined);
    }

    #[tokio::test]
    async fn lock_timeout_is_retried_then_surfaced() {
        let h = harness(EventRecord::new(EVENT, Some(1)));
        let _held = h.store.lock_event(EVENT).await.unwrap().unwrap();

        let err = h.engine.join(EVENT, s(1), None).await.unwrap_err();
        assert_eq!(err, ReservationError::LockTimeout(EVENT));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn transient_connection_error_is_retried() {
        let h = harness(EventRecord::new(EVENT, Some(1)));
        h.store
            .fail_next_lock(ReservationError::ConnectionError("reset".into()));

        let outcome = h.engine.join(EVENT, s(1), None).await.unwrap();
        assert_eq!(outcome.status, JoinStatus::Joined);
    }

    #[tokio::test]
    async fn notifier_failure_never_rolls_back() {
        let h = harness(EventRecord::new(EVENT, Some(1)));
        h.notifier.fail_with(Some(NotifyError::DeliveryFailed("push down".into())));

        let outcome = h.engine.join(EVENT, s(1), None).await.unwrap();
        assert_eq!(outcome.status, JoinStatus::Joined);
        assert_eq!(h.store.reservations(EVENT).await.len(), 1);
    }

    #[tokio::test]
    async fn leave_notifies_promoted_subjects() {
        let h = harness(EventRecord::new(EVENT, Some(1)).with_waitlist(true));
        h.engine.join(EVENT, s(1), None).await.unwrap();
        h.engine.join(EVENT, s(2), None).await.unwrap();

        let left = h.engine.leave(EVENT, s(1), None).await.unwrap();
        assert_eq!(left.promoted_subject_ids, vec![s(2)]);
        assert_eq!(h.notifier.kinds_for(s(2)), vec!["waitlisted", "promoted"]);
        assert_eq!(h.notifier.kinds_for(s(1)), vec!["joined", "left"]);
    }

    #[tokio::test]
    async fn join_with_live_hold_is_pending() {
        let h = harness(EventRecord::new(EVENT, Some(3)));
        let hold = h.engine.hold(EVENT, s(1), Some(60), None).await.unwrap();
        assert!(hold.created);

        let outcome = h.engine.join(EVENT, s(1), None).await.unwrap();
        assert_eq!(outcome.status, JoinStatus::Rejected);
        assert_eq!(outcome.reason, Reason::HoldPending);
    }

    #[tokio::test]
    async fn confirm_replay_returns_original_success() {
        let h = harness(EventRecord::new(EVENT, Some(1)));
        let hold_id = h
            .engine
            .hold(EVENT, s(1), None, None)
            .await
            .unwrap()
            .hold_id
            .unwrap();

        let first = h.engine.confirm(EVENT, hold_id, s(1), Some("c")).await.unwrap();
        let replay = h.engine.confirm(EVENT, hold_id, s(1), Some("c")).await.unwrap();
        let unkeyed = h.engine.confirm(EVENT, hold_id, s(1), None).await.unwrap();

        assert!(first.joined);
        assert_eq!(first, replay);
        assert_eq!(unkeyed.reason, Reason::InvalidHold);
    }

    #[tokio::test]
    async fn status_reports_subject_view() {
        let h = harness(EventRecord::new(EVENT, Some(2)).with_waitlist(true));
        h.engine.join(EVENT, s(1), None).await.unwrap();
        h.engine.hold(EVENT, s(2), None, None).await.unwrap();
        h.engine.join(EVENT, s(3), None).await.unwrap();

        let status = h.engine.status(EVENT, s(3)).await.unwrap().unwrap();
        assert!(status.waitlisted);
        assert_eq!(status.waitlist_position, Some(1));
        assert_eq!(status.open_slots, Some(0));

        let holder = h.engine.status(EVENT, s(2)).await.unwrap().unwrap();
        assert!(holder.held && !holder.joined);

        assert!(h.engine.status(EventId::new(42), s(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leave_waitlist_only_touches_queue() {
        let h = harness(EventRecord::new(EVENT, Some(1)).with_waitlist(true));
        h.engine.join(EVENT, s(1), None).await.unwrap();
        h.engine.join(EVENT, s(2), None).await.unwrap();

        assert!(!h.engine.leave_waitlist(EVENT, s(1)).await.unwrap());
        assert!(h.engine.leave_waitlist(EVENT, s(2)).await.unwrap());
        assert_eq!(h.store.reservations(EVENT).await.len(), 1);
    }
}
