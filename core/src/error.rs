//! Infrastructure error taxonomy.

use crate::types::EventId;
use thiserror::Error;

/// Failures of the transactional store and its surroundings.
///
/// Business outcomes never appear here; see [`Reason`](crate::outcome::Reason).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// The event row lock could not be acquired within the lock timeout.
    ///
    /// Safe to retry: nothing was written.
    #[error("Timed out waiting for the lock on event {0}")]
    LockTimeout(EventId),

    /// Database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The database could not be reached (pool exhausted, connection reset).
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// Persisted state violates an invariant (e.g. more reservations than capacity).
    #[error("Corrupted state for event {event_id}: {detail}")]
    Corrupted {
        /// The event whose rows are inconsistent.
        event_id: EventId,
        /// What was found.
        detail: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ReservationError {
    /// Whether the caller may retry the whole operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_) | Self::ConnectionError(_))
    }
}

/// Convenience alias used across the store traits.
pub type Result<T> = std::result::Result<T, ReservationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ReservationError::LockTimeout(EventId::new(1)).is_retryable());
        assert!(ReservationError::ConnectionError("reset".into()).is_retryable());
        assert!(!ReservationError::DatabaseError("syntax".into()).is_retryable());
        assert!(
            !ReservationError::Corrupted {
                event_id: EventId::new(1),
                detail: "3 reservations, capacity 2".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn lock_timeout_names_the_event() {
        let err = ReservationError::LockTimeout(EventId::new(9));
        assert_eq!(err.to_string(), "Timed out waiting for the lock on event 9");
    }
}
