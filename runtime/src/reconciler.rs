//! Background reclamation of expired holds.
//!
//! Holds are time-bounded but nothing fires when one expires; a crashed
//! process would otherwise strand its slots. The reconciler polls: each sweep
//! deletes every hold with `expires_at <= now` in one statement and tells the
//! notifier which events regained capacity.
//!
//! By default a sweep does not promote waitlisted subjects; the next join,
//! hold, confirm or leave on the event settles promotion under its own lock.
//! With `promote_on_sweep` the reconciler rebalances each affected event
//! itself.

use crate::engine::ReservationEngine;
use crate::metrics::{HoldMetrics, ReconcilerMetrics};
use courtside_core::error::Result;
use courtside_core::notifier::{Notification, NotificationKind};
use courtside_core::store::ReservationStore;
use courtside_core::types::{EventId, SubjectId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Reconciler schedule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Delay before the first sweep
    pub initial_delay: Duration,
    /// Promote waitlisted subjects into reclaimed slots during the sweep
    pub promote_on_sweep: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(15),
            promote_on_sweep: false,
        }
    }
}

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Events that lost at least one hold, with how many
    pub expired: Vec<(EventId, u32)>,
    /// Subjects promoted per event (only with `promote_on_sweep`)
    pub promoted: Vec<(EventId, Vec<SubjectId>)>,
}

impl SweepReport {
    /// Whether the sweep found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
    }

    /// Total holds deleted.
    #[must_use]
    pub fn holds_expired(&self) -> u64 {
        self.expired.iter().map(|(_, n)| u64::from(*n)).sum()
    }
}

/// Periodic expired-hold sweeper.
pub struct HoldExpiryReconciler<S> {
    engine: Arc<ReservationEngine<S>>,
    config: ReconcilerConfig,
}

impl<S: ReservationStore + 'static> HoldExpiryReconciler<S> {
    /// Create a reconciler for `engine`.
    #[must_use]
    pub const fn new(engine: Arc<ReservationEngine<S>>, config: ReconcilerConfig) -> Self {
        Self { engine, config }
    }

    /// Run one sweep now.
    ///
    /// A failed rebalance of one event is logged and skipped; the expired holds
    /// are already gone and the next locked operation promotes instead.
    ///
    /// # Errors
    ///
    /// Returns a database error if the delete statement fails.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let now = self.engine.clock().now();
        let expired = self.engine.store().purge_expired_holds(now).await?;
        let mut report = SweepReport {
            expired,
            promoted: Vec::new(),
        };

        for (event_id, count) in &report.expired {
            let event_id = *event_id;
            HoldMetrics::record_expired(usize::try_from(*count).unwrap_or(usize::MAX));

            if self.config.promote_on_sweep {
                match self.engine.capacity().rebalance(event_id).await {
                    Ok(promoted) if !promoted.is_empty() => {
                        self.engine.notify_promoted(event_id, &promoted).await;
                        report.promoted.push((event_id, promoted));
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(%event_id, %error, "Rebalance after sweep failed");
                    }
                }
            }

            let remaining_slots = match self.engine.store().snapshot(event_id, None, now).await {
                Ok(Some(snapshot)) => snapshot.event.open_slots(snapshot.occupied()),
                Ok(None) => None,
                Err(error) => {
                    tracing::warn!(%event_id, %error, "Could not read capacity after sweep");
                    None
                }
            };
            self.engine
                .notify(Notification::broadcast(
                    event_id,
                    NotificationKind::CapacityChanged { remaining_slots },
                ))
                .await;
        }

        ReconcilerMetrics::record_sweep(started.elapsed());
        if !report.is_empty() {
            let promoted: usize = report.promoted.iter().map(|(_, p)| p.len()).sum();
            tracing::info!(
                events = report.expired.len(),
                holds = report.holds_expired(),
                promoted,
                "Expired holds reclaimed"
            );
        }
        Ok(report)
    }

    /// Run sweeps on the configured schedule until `shutdown` fires.
    ///
    /// Failed sweeps are logged and retried on the next tick.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = self.config.interval.as_secs(),
                initial_delay_secs = self.config.initial_delay.as_secs(),
                promote_on_sweep = self.config.promote_on_sweep,
                "Hold expiry reconciler started"
            );

            tokio::select! {
                () = tokio::time::sleep(self.config.initial_delay) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Hold expiry reconciler stopped");
                    return;
                }
            }

            let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = self.sweep_once().await {
                            tracing::error!(%error, "Hold expiry sweep failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Hold expiry reconciler stopped");
                        break;
                    }
                }
            }
        })
    }
}
