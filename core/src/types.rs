//! Domain types for the reservation engine.
//!
//! Identifiers are thin newtypes over the `BIGINT` keys used by the backing
//! store. Rows ([`Reservation`], [`Hold`], [`WaitlistEntry`]) are plain owned
//! data; the rules that govern them live in the runtime services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a capacity-constrained event (a scheduled game).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Wrap a raw store key.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw store key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the actor requesting a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(i64);

impl SubjectId {
    /// Wrap a raw store key.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw store key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a provisional hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldId(i64);

impl HoldId {
    /// Wrap a raw store key.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw store key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for HoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Rows
// ============================================================================

/// The capacity policy of an event, as read under its row lock.
///
/// Events are owned by an external catalog; this engine only reads and locks them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event identifier
    pub id: EventId,
    /// Maximum number of occupied slots (`None` means unlimited)
    pub capacity: Option<u32>,
    /// Deadline after which nothing new may be created (`None` means never)
    pub cutoff_at: Option<DateTime<Utc>>,
    /// Whether a full event queues joiners instead of rejecting them
    pub waitlist_enabled: bool,
}

impl EventRecord {
    /// Create an event with the given capacity, no cutoff and the waitlist disabled.
    #[must_use]
    pub const fn new(id: EventId, capacity: Option<u32>) -> Self {
        Self {
            id,
            capacity,
            cutoff_at: None,
            waitlist_enabled: false,
        }
    }

    /// Set the cutoff time.
    #[must_use]
    pub const fn with_cutoff(mut self, cutoff_at: DateTime<Utc>) -> Self {
        self.cutoff_at = Some(cutoff_at);
        self
    }

    /// Enable or disable the waitlist.
    #[must_use]
    pub const fn with_waitlist(mut self, enabled: bool) -> Self {
        self.waitlist_enabled = enabled;
        self
    }

    /// Whether `now` is strictly after the cutoff.
    ///
    /// Requests made exactly at `cutoff_at` are still accepted.
    #[must_use]
    pub fn cutoff_passed(&self, now: DateTime<Utc>) -> bool {
        self.cutoff_at.is_some_and(|cutoff| now > cutoff)
    }

    /// Free slots given the current occupancy, or `None` for unlimited events.
    #[must_use]
    pub fn open_slots(&self, occupied: u32) -> Option<u32> {
        self.capacity.map(|capacity| capacity.saturating_sub(occupied))
    }

    /// Whether one more slot can be taken at the given occupancy.
    #[must_use]
    pub fn has_room(&self, occupied: u32) -> bool {
        self.capacity.is_none_or(|capacity| occupied < capacity)
    }
}

/// A committed slot held by a subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Event the slot belongs to
    pub event_id: EventId,
    /// Subject holding the slot
    pub subject_id: SubjectId,
    /// When the slot was committed
    pub created_at: DateTime<Utc>,
    /// Payment reference carried over from a confirmed hold
    pub payment_ref: Option<String>,
}

/// A time-limited provisional reservation pending confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Hold identifier
    pub id: HoldId,
    /// Event the hold counts against
    pub event_id: EventId,
    /// Subject owning the hold
    pub subject_id: SubjectId,
    /// Instant at which the hold stops being confirmable
    pub expires_at: DateTime<Utc>,
    /// External payment reference (e.g. a payment intent)
    pub payment_ref: Option<String>,
}

impl Hold {
    /// A hold is expired once `expires_at <= now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A subject queued for a slot on a full event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    /// Event the subject is queued for
    pub event_id: EventId,
    /// Queued subject
    pub subject_id: SubjectId,
    /// When the subject joined the queue
    pub enqueued_at: DateTime<Utc>,
    /// Insertion sequence, breaks ties between equal `enqueued_at` values
    pub seq: i64,
}

impl WaitlistEntry {
    /// FIFO ordering key.
    #[must_use]
    pub const fn queue_key(&self) -> (DateTime<Utc>, i64) {
        (self.enqueued_at, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600 + secs, 0).unwrap_or_default()
    }

    #[test]
    fn cutoff_is_inclusive() {
        let event = EventRecord::new(EventId::new(1), Some(2)).with_cutoff(at(10));
        assert!(!event.cutoff_passed(at(9)));
        assert!(!event.cutoff_passed(at(10)));
        assert!(event.cutoff_passed(at(11)));
    }

    #[test]
    fn unlimited_event_always_has_room() {
        let event = EventRecord::new(EventId::new(1), None);
        assert!(event.has_room(u32::MAX));
        assert_eq!(event.open_slots(1_000), None);
    }

    #[test]
    fn open_slots_saturates() {
        let event = EventRecord::new(EventId::new(1), Some(2));
        assert_eq!(event.open_slots(0), Some(2));
        assert_eq!(event.open_slots(5), Some(0));
        assert!(!event.has_room(2));
    }

    #[test]
    fn hold_expires_at_its_deadline() {
        let hold = Hold {
            id: HoldId::new(7),
            event_id: EventId::new(1),
            subject_id: SubjectId::new(2),
            expires_at: at(30),
            payment_ref: None,
        };
        assert!(!hold.is_expired(at(30) - Duration::milliseconds(1)));
        assert!(hold.is_expired(at(30)));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&SubjectId::new(42)).unwrap_or_default();
        assert_eq!(json, "42");
    }
}
