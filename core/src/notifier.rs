//! Outbound notifications.
//!
//! The engine tells a [`Notifier`] about every committed state change after
//! the transaction commits. Delivery (push, email, chat) belongs to an
//! external collaborator; a failed notification is logged and counted but
//! never rolls back the change it describes.

use crate::types::{EventId, HoldId, SubjectId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// What happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    /// The subject joined directly
    Joined,
    /// The subject was queued
    Waitlisted,
    /// The subject was moved from the waitlist into a reservation
    Promoted,
    /// A hold was created or renewed
    HoldCreated {
        /// Hold identifier
        hold_id: HoldId,
    },
    /// A hold became a reservation
    HoldConfirmed {
        /// Hold identifier
        hold_id: HoldId,
    },
    /// A hold was released by its owner
    HoldReleased {
        /// Hold identifier
        hold_id: HoldId,
    },
    /// The subject left (reservation, hold or waitlist entry removed)
    Left,
    /// Slots were freed without a subject-specific cause (expired holds)
    CapacityChanged {
        /// Free slots after the change, when known
        remaining_slots: Option<u32>,
    },
}

impl NotificationKind {
    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Waitlisted => "waitlisted",
            Self::Promoted => "promoted",
            Self::HoldCreated { .. } => "hold_created",
            Self::HoldConfirmed { .. } => "hold_confirmed",
            Self::HoldReleased { .. } => "hold_released",
            Self::Left => "left",
            Self::CapacityChanged { .. } => "capacity_changed",
        }
    }
}

/// A committed state change addressed to one subject, or to everyone
/// watching the event when `subject_id` is `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Event concerned
    pub event_id: EventId,
    /// Subject concerned, if any
    pub subject_id: Option<SubjectId>,
    /// What happened
    pub kind: NotificationKind,
}

impl Notification {
    /// A notification addressed to one subject.
    #[must_use]
    pub const fn to_subject(event_id: EventId, subject_id: SubjectId, kind: NotificationKind) -> Self {
        Self {
            event_id,
            subject_id: Some(subject_id),
            kind,
        }
    }

    /// A notification about the event as a whole.
    #[must_use]
    pub const fn broadcast(event_id: EventId, kind: NotificationKind) -> Self {
        Self {
            event_id,
            subject_id: None,
            kind,
        }
    }
}

/// Notification delivery failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The downstream channel is gone
    #[error("Notification channel closed")]
    ChannelClosed,

    /// The downstream rejected or failed the delivery
    #[error("Notification delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Receiver of committed state changes.
///
/// Object-safe so the engine can hold an `Arc<dyn Notifier>`.
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery fails. Callers log and drop it.
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}
