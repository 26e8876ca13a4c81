//! # Courtside Core
//!
//! Domain types and seams for the Courtside reservation engine.
//!
//! Courtside admits subjects into scheduled, limited-capacity events. A
//! subject joins directly while slots remain, queues on a FIFO waitlist when
//! the event is full, or takes a short-lived hold and confirms it later. This
//! crate holds what every other crate agrees on:
//!
//! - [`types`]: identifiers and persisted rows
//! - [`outcome`]: typed operation results and their [`Reason`](outcome::Reason) codes
//! - [`error`]: infrastructure failures
//! - [`store`]: the transactional store seam ([`ReservationStore`](store::ReservationStore))
//! - [`notifier`]: the outbound notification seam
//! - [`environment`]: injected time
//!
//! ## Invariants
//!
//! At every committed state, for every event:
//!
//! 1. `reservations + unexpired holds <= capacity` (finite capacity only)
//! 2. A subject has at most one of reservation, hold or waitlist entry
//! 3. Promotion takes waitlist entries in `enqueued_at` order
//! 4. Nothing is created after the event's cutoff
//! 5. An expired hold is never confirmable and is deleted before its slot is reused

pub mod error;
pub mod notifier;
pub mod outcome;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::ReservationError;
pub use notifier::{Notification, NotificationKind, Notifier, NotifyError};
pub use outcome::{
    ConfirmOutcome, Decision, EventStatus, HoldOutcome, JoinOutcome, JoinStatus, LeaveOutcome,
    Reason,
};
pub use store::{EventSnapshot, EventTransaction, ReservationStore};
pub use types::{EventId, EventRecord, Hold, HoldId, Reservation, SubjectId, WaitlistEntry};

/// Environment module - injected dependencies
///
/// Time is the only ambient dependency the engine reads directly; it is
/// abstracted so tests can pin or advance it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use environment::{Clock, SystemClock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
