//! Two-phase provisional reservations.
//!
//! A hold occupies a slot until it is confirmed into a reservation, released
//! by its owner, or deleted after `expires_at` (by the next locked operation
//! on the event or by the reconciler). An expired hold is never confirmable.

use crate::capacity::{occupancy, settle_waitlist};
use crate::metrics::HoldMetrics;
use crate::waitlist::WaitlistService;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courtside_core::environment::Clock;
use courtside_core::error::Result;
use courtside_core::outcome::{ConfirmOutcome, HoldOutcome, LeaveOutcome, Reason};
use courtside_core::store::{EventTransaction, ReservationStore};
use courtside_core::types::{EventId, HoldId, Reservation, SubjectId};
use std::sync::Arc;
use std::time::Duration;

/// Hold time-to-live bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoldConfig {
    /// TTL used when the caller gives none
    pub default_ttl: Duration,
    /// Upper bound for caller-supplied TTLs
    pub max_ttl: Duration,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(120),
            max_ttl: Duration::from_secs(15 * 60),
        }
    }
}

impl HoldConfig {
    /// Effective TTL in whole seconds, clamped to `[1, max_ttl]`.
    #[must_use]
    pub fn effective_ttl_secs(&self, requested: Option<i64>) -> i64 {
        let max = i64::try_from(self.max_ttl.as_secs()).unwrap_or(i64::MAX).max(1);
        let default = i64::try_from(self.default_ttl.as_secs()).unwrap_or(max);
        requested.unwrap_or(default).clamp(1, max)
    }

    /// Expiry of a hold taken at `now`; saturates at the latest representable
    /// instant instead of overflowing.
    #[must_use]
    pub fn expires_at(&self, now: DateTime<Utc>, requested: Option<i64>) -> DateTime<Utc> {
        ChronoDuration::try_seconds(self.effective_ttl_secs(requested))
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Creates, confirms and releases holds.
pub struct HoldService<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: HoldConfig,
    waitlist: WaitlistService,
}

impl<S> Clone for HoldService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            waitlist: self.waitlist,
        }
    }
}

impl<S: ReservationStore> HoldService<S> {
    /// Create a service over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: HoldConfig) -> Self {
        Self {
            store,
            clock,
            config,
            waitlist: WaitlistService::new(),
        }
    }

    /// The TTL bounds in use.
    #[must_use]
    pub const fn config(&self) -> &HoldConfig {
        &self.config
    }

    /// Take a hold on one slot, or renew the subject's existing hold.
    ///
    /// A renewal keeps the hold id and never counts the subject's own hold
    /// against it. A waitlisted subject that gets a hold leaves the waitlist.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or a database error; nothing is written then.
    pub async fn create_hold(
        &self,
        event_id: EventId,
        subject_id: SubjectId,
        ttl_seconds: Option<i64>,
    ) -> Result<HoldOutcome> {
        let now = self.clock.now();
        let expires_at = self.config.expires_at(now, ttl_seconds);
        let Some(mut tx) = self.store.lock_event(event_id).await? else {
            HoldMetrics::record_error("create", Reason::NotFound);
            return Ok(HoldOutcome::rejected(Reason::NotFound));
        };
        let event = tx.event().clone();

        if event.cutoff_passed(now) {
            HoldMetrics::record_error("create", Reason::Cutoff);
            return Ok(HoldOutcome::rejected(Reason::Cutoff));
        }

        tx.purge_expired_holds(now).await?;

        if tx.has_reservation(subject_id).await? {
            tx.commit().await?;
            HoldMetrics::record_error("create", Reason::AlreadyParticipant);
            return Ok(HoldOutcome::rejected(Reason::AlreadyParticipant));
        }

        let promoted = settle_waitlist(&mut tx, &self.waitlist, now).await?;
        if promoted.contains(&subject_id) {
            tx.commit().await?;
            return Ok(HoldOutcome::rejected(Reason::AlreadyParticipant).with_promoted(promoted));
        }

        let own_hold = u32::from(tx.hold_for_subject(subject_id).await?.is_some());
        let occupied = occupancy(&mut tx, now).await?.saturating_sub(own_hold);
        if !event.has_room(occupied) {
            tx.commit().await?;
            tracing::debug!(%event_id, %subject_id, occupied, "Hold rejected, event full");
            HoldMetrics::record_error("create", Reason::Full);
            return Ok(HoldOutcome::rejected(Reason::Full).with_promoted(promoted));
        }

        self.waitlist.remove(&mut tx, subject_id).await?;
        let hold = tx.upsert_hold(subject_id, expires_at).await?;
        tx.commit().await?;

        HoldMetrics::record_created();
        tracing::info!(
            %event_id,
            %subject_id,
            hold_id = %hold.id,
            expires_at = %hold.expires_at,
            "Hold created"
        );
        Ok(HoldOutcome::created(hold.id, hold.expires_at).with_promoted(promoted))
    }

    /// Convert a live hold into a reservation, carrying its payment reference.
    ///
    /// The cutoff is not re-checked: a hold taken before the cutoff stays
    /// confirmable until it expires.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or a database error; nothing is written then.
    pub async fn confirm_hold(
        &self,
        event_id: EventId,
        hold_id: HoldId,
        subject_id: SubjectId,
    ) -> Result<ConfirmOutcome> {
        let now = self.clock.now();
        let Some(mut tx) = self.store.lock_event(event_id).await? else {
            HoldMetrics::record_error("confirm", Reason::NotFound);
            return Ok(ConfirmOutcome::rejected(Reason::NotFound));
        };

        let Some(hold) = tx.find_hold(hold_id, subject_id).await? else {
            HoldMetrics::record_error("confirm", Reason::InvalidHold);
            return Ok(ConfirmOutcome::rejected(Reason::InvalidHold));
        };

        if hold.is_expired(now) {
            tx.delete_hold(hold.id).await?;
            let promoted = settle_waitlist(&mut tx, &self.waitlist, now).await?;
            tx.commit().await?;
            HoldMetrics::record_expired(1);
            HoldMetrics::record_error("confirm", Reason::Expired);
            tracing::debug!(%event_id, %subject_id, %hold_id, "Confirm rejected, hold expired");
            return Ok(ConfirmOutcome::rejected(Reason::Expired).with_promoted(promoted));
        }

        tx.purge_expired_holds(now).await?;
        let reservations = tx.count_reservations().await?;
        if tx.event().capacity.is_some_and(|capacity| reservations >= capacity) {
            tracing::warn!(
                %event_id,
                %hold_id,
                reservations,
                "Reservations already at capacity while a live hold exists"
            );
            HoldMetrics::record_error("confirm", Reason::Full);
            return Ok(ConfirmOutcome::rejected(Reason::Full));
        }

        tx.delete_hold(hold.id).await?;
        tx.insert_reservation(&Reservation {
            event_id,
            subject_id,
            created_at: now,
            payment_ref: hold.payment_ref,
        })
        .await?;
        tx.commit().await?;

        HoldMetrics::record_confirmed();
        tracing::info!(%event_id, %subject_id, %hold_id, "Hold confirmed");
        Ok(ConfirmOutcome::joined())
    }

    /// Cancel a live hold and promote waitlisted subjects into its slot.
    ///
    /// `removed` is false when no live hold matches.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or a database error.
    pub async fn release_hold(
        &self,
        event_id: EventId,
        hold_id: HoldId,
        subject_id: SubjectId,
    ) -> Result<LeaveOutcome> {
        let now = self.clock.now();
        let Some(mut tx) = self.store.lock_event(event_id).await? else {
            return Ok(LeaveOutcome::default());
        };
        let removed = match tx.find_hold(hold_id, subject_id).await? {
            Some(hold) => {
                tx.delete_hold(hold.id).await?;
                !hold.is_expired(now)
            }
            None => false,
        };
        let promoted = settle_waitlist(&mut tx, &self.waitlist, now).await?;
        tx.commit().await?;

        if removed {
            tracing::info!(%event_id, %subject_id, %hold_id, "Hold released");
        } else {
            HoldMetrics::record_error("release", Reason::InvalidHold);
        }
        Ok(LeaveOutcome {
            removed,
            promoted_subject_ids: promoted,
        })
    }

    /// Record an external payment reference on a live hold.
    ///
    /// Returns `false` for missing or expired holds.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` or a database error.
    pub async fn attach_payment_ref(
        &self,
        event_id: EventId,
        hold_id: HoldId,
        subject_id: SubjectId,
        payment_ref: &str,
    ) -> Result<bool> {
        let now = self.clock.now();
        let Some(mut tx) = self.store.lock_event(event_id).await? else {
            return Ok(false);
        };
        match tx.find_hold(hold_id, subject_id).await? {
            Some(hold) if !hold.is_expired(now) => {
                let attached = tx.set_hold_payment_ref(hold.id, payment_ref).await?;
                tx.commit().await?;
                Ok(attached)
            }
            _ => {
                HoldMetrics::record_error("payment", Reason::InvalidHold);
                Ok(false)
            }
        }
    }
}
