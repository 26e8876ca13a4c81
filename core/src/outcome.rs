//! Typed results of reservation operations.
//!
//! Business rejections (full, cutoff, expired, ...) are not errors: every
//! operation returns one of these outcomes carrying a [`Reason`]. Only
//! infrastructure failures surface as [`ReservationError`](crate::error::ReservationError).

use crate::types::{HoldId, SubjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an operation resolved the way it did.
///
/// The serialized form is the wire code returned to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// The operation did what was asked
    Ok,
    /// The subject already holds a reservation (idempotent no-op)
    AlreadyParticipant,
    /// The subject is already queued
    WaitlistExists,
    /// The subject owns a live hold that must be confirmed or released first
    HoldPending,
    /// The event does not exist
    NotFound,
    /// The event's cutoff time has passed
    Cutoff,
    /// No free slot and no waitlist
    Full,
    /// The hold expired before confirmation
    Expired,
    /// No hold matches the given id, event and subject
    InvalidHold,
}

impl Reason {
    /// Wire code for this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::AlreadyParticipant => "already_participant",
            Self::WaitlistExists => "waitlist_exists",
            Self::HoldPending => "hold_pending",
            Self::NotFound => "not_found",
            Self::Cutoff => "cutoff",
            Self::Full => "full",
            Self::Expired => "expired",
            Self::InvalidHold => "invalid_hold",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`CapacityManager::enforce_on_join`](../../courtside_runtime/capacity/struct.CapacityManager.html).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// The subject holds a reservation after the call
    pub allowed: bool,
    /// The subject is queued after the call
    pub waitlisted: bool,
    /// Why
    pub reason: Reason,
    /// Earlier waitlisted subjects promoted while settling free slots
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promoted: Vec<SubjectId>,
}

impl Decision {
    /// A committed (or pre-existing) reservation.
    #[must_use]
    pub const fn allowed(reason: Reason) -> Self {
        Self {
            allowed: true,
            waitlisted: false,
            reason,
            promoted: Vec::new(),
        }
    }

    /// A waitlist entry exists for the subject.
    #[must_use]
    pub const fn waitlisted(reason: Reason) -> Self {
        Self {
            allowed: false,
            waitlisted: true,
            reason,
            promoted: Vec::new(),
        }
    }

    /// Nothing was created.
    #[must_use]
    pub const fn rejected(reason: Reason) -> Self {
        Self {
            allowed: false,
            waitlisted: false,
            reason,
            promoted: Vec::new(),
        }
    }

    /// Attach the subjects promoted during the same transaction.
    #[must_use]
    pub fn with_promoted(mut self, promoted: Vec<SubjectId>) -> Self {
        self.promoted = promoted;
        self
    }
}

/// Coarse join status exposed to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStatus {
    /// The subject holds a reservation
    Joined,
    /// The subject is on the waitlist
    Waitlisted,
    /// Nothing was created
    Rejected,
}

/// Client-facing result of a join.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutcome {
    /// Coarse status
    pub status: JoinStatus,
    /// Why
    pub reason: Reason,
}

impl From<&Decision> for JoinOutcome {
    fn from(decision: &Decision) -> Self {
        let status = if decision.allowed {
            JoinStatus::Joined
        } else if decision.waitlisted {
            JoinStatus::Waitlisted
        } else {
            JoinStatus::Rejected
        };
        Self {
            status,
            reason: decision.reason,
        }
    }
}

/// Result of a hold request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldOutcome {
    /// A hold exists for the subject after the call
    pub created: bool,
    /// Identifier of the hold, when created or renewed
    pub hold_id: Option<HoldId>,
    /// Expiry of the hold, when created or renewed
    pub expires_at: Option<DateTime<Utc>>,
    /// Why
    pub reason: Reason,
    /// Earlier waitlisted subjects promoted while settling free slots
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promoted: Vec<SubjectId>,
}

impl HoldOutcome {
    /// A hold was created or renewed.
    #[must_use]
    pub const fn created(hold_id: HoldId, expires_at: DateTime<Utc>) -> Self {
        Self {
            created: true,
            hold_id: Some(hold_id),
            expires_at: Some(expires_at),
            reason: Reason::Ok,
            promoted: Vec::new(),
        }
    }

    /// No hold was created.
    #[must_use]
    pub const fn rejected(reason: Reason) -> Self {
        Self {
            created: false,
            hold_id: None,
            expires_at: None,
            reason,
            promoted: Vec::new(),
        }
    }

    /// Attach the subjects promoted during the same transaction.
    #[must_use]
    pub fn with_promoted(mut self, promoted: Vec<SubjectId>) -> Self {
        self.promoted = promoted;
        self
    }
}

/// Result of confirming a hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    /// The hold was converted into a reservation
    pub joined: bool,
    /// Why
    pub reason: Reason,
    /// Waitlisted subjects promoted into slots freed by this call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promoted: Vec<SubjectId>,
}

impl ConfirmOutcome {
    /// The hold became a reservation.
    #[must_use]
    pub const fn joined() -> Self {
        Self {
            joined: true,
            reason: Reason::Ok,
            promoted: Vec::new(),
        }
    }

    /// The hold was not converted.
    #[must_use]
    pub const fn rejected(reason: Reason) -> Self {
        Self {
            joined: false,
            reason,
            promoted: Vec::new(),
        }
    }

    /// Attach the subjects promoted during the same transaction.
    #[must_use]
    pub fn with_promoted(mut self, promoted: Vec<SubjectId>) -> Self {
        self.promoted = promoted;
        self
    }
}

/// Result of leaving an event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveOutcome {
    /// A reservation, hold or waitlist entry of the subject was deleted
    pub removed: bool,
    /// Waitlisted subjects promoted into the freed slots, in FIFO order
    pub promoted_subject_ids: Vec<SubjectId>,
}

/// Per-subject view of an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStatus {
    /// The subject holds a reservation
    pub joined: bool,
    /// The subject is on the waitlist
    pub waitlisted: bool,
    /// The subject owns a live hold
    pub held: bool,
    /// Event capacity (`None` means unlimited)
    pub capacity: Option<u32>,
    /// Free slots after reservations and live holds (`None` means unlimited)
    pub open_slots: Option<u32>,
    /// Whether the cutoff time has passed
    pub cutoff_passed: bool,
    /// 1-based position of the subject in the waitlist
    pub waitlist_position: Option<u32>,
    /// Number of queued subjects
    pub waitlist_length: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_wire_codes_match_serde() {
        for reason in [
            Reason::Ok,
            Reason::AlreadyParticipant,
            Reason::WaitlistExists,
            Reason::HoldPending,
            Reason::NotFound,
            Reason::Cutoff,
            Reason::Full,
            Reason::Expired,
            Reason::InvalidHold,
        ] {
            let json = serde_json::to_string(&reason).unwrap_or_default();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }

    #[test]
    fn join_outcome_from_decision() {
        assert_eq!(
            JoinOutcome::from(&Decision::allowed(Reason::Ok)).status,
            JoinStatus::Joined
        );
        assert_eq!(
            JoinOutcome::from(&Decision::waitlisted(Reason::WaitlistExists)).status,
            JoinStatus::Waitlisted
        );
        let rejected = JoinOutcome::from(&Decision::rejected(Reason::Full));
        assert_eq!(rejected.status, JoinStatus::Rejected);
        assert_eq!(rejected.reason, Reason::Full);
    }

    #[test]
    fn empty_promotions_are_not_serialized() {
        let json = serde_json::to_value(ConfirmOutcome::joined()).unwrap_or_default();
        assert!(json.get("promoted").is_none());
        assert_eq!(json["reason"], "ok");
    }
}
