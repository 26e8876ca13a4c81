//! Direct-join, leave and promotion decisions.
//!
//! Every operation is one read-decide-write unit on a transaction that holds
//! the event row lock, so two concurrent joiners can never both observe the
//! same free slot. Occupancy is `reservations + live holds`; expired holds of
//! the locked event are purged first.

use crate::metrics::ReservationMetrics;
use crate::waitlist::WaitlistService;
use chrono::{DateTime, Utc};
use courtside_core::environment::Clock;
use courtside_core::error::Result;
use courtside_core::outcome::{Decision, LeaveOutcome, Reason};
use courtside_core::store::{EventTransaction, ReservationStore};
use courtside_core::types::{EventId, Reservation, SubjectId};
use std::sync::Arc;

/// Occupied slots of the locked event.
pub(crate) async fn occupancy<T: EventTransaction>(tx: &mut T, now: DateTime<Utc>) -> Result<u32> {
    let reservations = tx.count_reservations().await?;
    let holds = tx.count_live_holds(now).await?;
    Ok(reservations.saturating_add(holds))
}

/// Promote waitlisted subjects into every free slot of the locked event.
///
/// Nothing is promoted once the cutoff has passed or when the waitlist is
/// disabled. Returns the promoted subjects in FIFO order; their reservations
/// are written to the same transaction.
pub(crate) async fn settle_waitlist<T: EventTransaction>(
    tx: &mut T,
    waitlist: &WaitlistService,
    now: DateTime<Utc>,
) -> Result<Vec<SubjectId>> {
    let event = tx.event().clone();
    if !event.waitlist_enabled || event.cutoff_passed(now) {
        return Ok(Vec::new());
    }

    let slots = match event.capacity {
        Some(capacity) => i64::from(capacity) - i64::from(occupancy(tx, now).await?),
        None => i64::from(waitlist.len(tx).await?),
    };
    let promoted = waitlist.promote_up_to(tx, slots).await?;

    for subject_id in &promoted {
        tx.insert_reservation(&Reservation {
            event_id: event.id,
            subject_id: *subject_id,
            created_at: now,
            payment_ref: None,
        })
        .await?;
        tracing::info!(event_id = %event.id, %subject_id, "Promoted from waitlist");
    }
    Ok(promoted)
}

/// Decides between direct join, waitlist and rejection.
pub struct CapacityManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    waitlist: WaitlistService,
}

impl<S> Clone for CapacityManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            waitlist: self.waitlist,
        }
    }
}

impl<S: ReservationStore> CapacityManager<S> {
    /// Create a manager over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            waitlist: WaitlistService::new(),
        }
    }

    /// Admit the subject if a slot is free, queue it if the event is full and
    /// has a waitlist, or reject it.
    ///
    /// Free slots are first offered to earlier waitlisted subjects; those
    /// promotions are reported on [`Decision::promoted`].
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the event lock is contended past the lock
    /// timeout, or a database error. Nothing is written in either case.
    pub async fn enforce_on_join(&self, event_id: EventId, subject_id: SubjectId) -> Result<Decision> {
        let now = self.clock.now();
        let Some(mut tx) = self.store.lock_event(event_id).await? else {
            ReservationMetrics::record_rejected(Reason::NotFound);
            return Ok(Decision::rejected(Reason::NotFound));
        };
        let event = tx.event().clone();

        if event.cutoff_passed(now) {
            tracing::debug!(%event_id, %subject_id, "Join rejected after cutoff");
            ReservationMetrics::record_rejected(Reason::Cutoff);
            return Ok(Decision::rejected(Reason::Cutoff));
        }

        tx.purge_expired_holds(now).await?;

        if tx.has_reservation(subject_id).await? {
            tx.commit().await?;
            return Ok(Decision::allowed(Reason::AlreadyParticipant));
        }
        if tx.hold_for_subject(subject_id).await?.is_some() {
            tx.commit().await?;
            tracing::debug!(%event_id, %subject_id, "Join rejected, hold pending");
            ReservationMetrics::record_rejected(Reason::HoldPending);
            return Ok(Decision::rejected(Reason::HoldPending));
        }

        let promoted = settle_waitlist(&mut tx, &self.waitlist, now).await?;
        if promoted.contains(&subject_id) {
            tx.commit().await?;
            ReservationMetrics::record_promoted(promoted.len());
            return Ok(Decision::allowed(Reason::Ok).with_promoted(promoted));
        }

        let occupied = occupancy(&mut tx, now).await?;
        let decision = if event.has_room(occupied) {
            self.waitlist.remove(&mut tx, subject_id).await?;
            tx.insert_reservation(&Reservation {
                event_id,
                subject_id,
                created_at: now,
                payment_ref: None,
            })
            .await?;
            Decision::allowed(Reason::Ok)
        } else if event.waitlist_enabled {
            if self.waitlist.enqueue(&mut tx, subject_id, now).await? {
                Decision::waitlisted(Reason::Ok)
            } else {
                Decision::waitlisted(Reason::WaitlistExists)
            }
        } else {
            Decision::rejected(Reason::Full)
        };
        tx.commit().await?;

        ReservationMetrics::record_promoted(promoted.len());
        match (decision.allowed, decision.waitlisted, decision.reason) {
            (true, _, _) => {
                ReservationMetrics::record_joined(1);
                tracing::info!(%event_id, %subject_id, occupied = occupied + 1, "Subject joined");
            }
            (false, true, Reason::Ok) => ReservationMetrics::record_waitlisted(),
            (false, true, _) => {}
            (false, false, reason) => {
                ReservationMetrics::record_rejected(reason);
                tracing::debug!(%event_id, %subject_id, %reason, "Join rejected");
            }
        }
        Ok(decision.with_promoted(promoted))
    }

    /// Remove the subject's reservation, hold or waitlist entry, then promote
    /// waitlisted subjects into the freed slots.
    ///
    /// An unknown event yields `removed = false` and no promotions.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or a database error; nothing is written then.
    pub async fn handle_on_leave(&self, event_id: EventId, subject_id: SubjectId) -> Result<LeaveOutcome> {
        let now = self.clock.now();
        let Some(mut tx) = self.store.lock_event(event_id).await? else {
            return Ok(LeaveOutcome::default());
        };
        tx.purge_expired_holds(now).await?;

        let mut removed = tx.delete_reservation(subject_id).await?;
        if !removed {
            if let Some(hold) = tx.hold_for_subject(subject_id).await? {
                removed = tx.delete_hold(hold.id).await?;
            }
        }
        if !removed {
            removed = self.waitlist.remove(&mut tx, subject_id).await?;
        }

        let promoted = settle_waitlist(&mut tx, &self.waitlist, now).await?;
        tx.commit().await?;

        ReservationMetrics::record_promoted(promoted.len());
        if removed {
            tracing::info!(%event_id, %subject_id, promoted = promoted.len(), "Subject left");
        }
        Ok(LeaveOutcome {
            removed,
            promoted_subject_ids: promoted,
        })
    }

    /// Withdraw the subject from the waitlist only; returns whether it was queued.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or a database error.
    pub async fn leave_waitlist(&self, event_id: EventId, subject_id: SubjectId) -> Result<bool> {
        let Some(mut tx) = self.store.lock_event(event_id).await? else {
            return Ok(false);
        };
        let removed = self.waitlist.remove(&mut tx, subject_id).await?;
        tx.commit().await?;
        if removed {
            tracing::info!(%event_id, %subject_id, "Subject left waitlist");
        }
        Ok(removed)
    }

    /// Promote waitlisted subjects into any free slots of the event.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or a database error.
    pub async fn rebalance(&self, event_id: EventId) -> Result<Vec<SubjectId>> {
        let now = self.clock.now();
        let Some(mut tx) = self.store.lock_event(event_id).await? else {
            return Ok(Vec::new());
        };
        tx.purge_expired_holds(now).await?;
        let promoted = settle_waitlist(&mut tx, &self.waitlist, now).await?;
        tx.commit().await?;
        ReservationMetrics::record_promoted(promoted.len());
        Ok(promoted)
    }
}
