//! # Courtside Testing
//!
//! Testing utilities for the Courtside reservation engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`MockClock`])
//! - [`InMemoryReservationStore`]: the store seam backed by per-event async mutexes
//! - [`RecordingNotifier`]: captures notifications for assertions
//! - proptest strategies for random operation sequences
//!
//! ## Example
//!
//! ```ignore
//! use courtside_testing::{InMemoryReservationStore, MockClock, RecordingNotifier, test_clock};
//!
//! #[tokio::test]
//! async fn joins_until_full() {
//!     let clock = MockClock::from(test_clock());
//!     let store = InMemoryReservationStore::new();
//!     store.insert_event(EventRecord::new(EventId::new(1), Some(1)));
//!
//!     let engine = ReservationEngine::new(store, Arc::new(clock), Arc::new(RecordingNotifier::new()));
//!     let outcome = engine.join(EventId::new(1), SubjectId::new(7), None).await?;
//!     assert_eq!(outcome.status, JoinStatus::Joined);
//! }
//! ```

use chrono::{DateTime, Utc};
use courtside_core::environment::Clock;

pub mod notifier;
pub mod store;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use courtside_testing::mocks::FixedClock;
    /// use courtside_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Manually advanced clock.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the engine.
    ///
    /// ```
    /// use courtside_testing::mocks::{MockClock, test_clock};
    /// use courtside_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = MockClock::from(test_clock());
    /// let start = clock.now();
    /// clock.advance(Duration::seconds(2));
    /// assert_eq!(clock.now() - start, Duration::seconds(2));
    /// ```
    #[derive(Debug, Clone)]
    pub struct MockClock {
        millis: Arc<AtomicI64>,
    }

    impl MockClock {
        /// Start at the given time (millisecond precision).
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
            }
        }

        /// Move time forward.
        pub fn advance(&self, by: Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        /// Jump to an absolute time.
        pub fn set(&self, time: DateTime<Utc>) {
            self.millis.store(time.timestamp_millis(), Ordering::SeqCst);
        }
    }

    impl From<FixedClock> for MockClock {
        fn from(clock: FixedClock) -> Self {
            Self::new(clock.now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
                .unwrap_or_default()
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a test-writer `tracing` subscriber once per process.
    ///
    /// Honors `RUST_LOG`; repeated calls are no-ops.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use courtside_core::SubjectId;
    use proptest::prelude::*;

    /// One client request against a single event.
    #[derive(Clone, Debug)]
    pub enum Op {
        /// Join directly
        Join(SubjectId),
        /// Take a hold with the given TTL in seconds
        Hold(SubjectId, i64),
        /// Confirm the subject's current hold, if any
        Confirm(SubjectId),
        /// Release the subject's current hold, if any
        Release(SubjectId),
        /// Leave in whatever state the subject is in
        Leave(SubjectId),
        /// Advance the clock by the given number of seconds
        Tick(i64),
        /// Run one expiry sweep
        Sweep,
    }

    /// Subjects drawn from a small pool so operations collide.
    pub fn subject() -> impl Strategy<Value = SubjectId> {
        (1_i64..=8).prop_map(SubjectId::new)
    }

    /// A single operation.
    pub fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => subject().prop_map(Op::Join),
            3 => (subject(), 1_i64..=5).prop_map(|(s, ttl)| Op::Hold(s, ttl)),
            2 => subject().prop_map(Op::Confirm),
            1 => subject().prop_map(Op::Release),
            2 => subject().prop_map(Op::Leave),
            2 => (1_i64..=3).prop_map(Op::Tick),
            1 => Just(Op::Sweep),
        ]
    }

    /// A sequence of operations.
    pub fn ops(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
        prop::collection::vec(op(), 1..max_len)
    }
}

// Re-export commonly used items
pub use helpers::init_test_tracing;
pub use mocks::{FixedClock, MockClock, test_clock};
pub use notifier::RecordingNotifier;
pub use store::InMemoryReservationStore;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn mock_clock_clones_share_time() {
        let clock = MockClock::from(test_clock());
        let handle = clock.clone();
        handle.advance(Duration::milliseconds(1_500));
        assert_eq!(clock.now(), test_clock().now() + Duration::milliseconds(1_500));
    }
}
