//! # Courtside Runtime
//!
//! Services that decide reservations for capacity-constrained events.
//!
//! Every decision runs inside one transaction holding the event's row lock
//! (see [`courtside_core::store`]). The services here only sequence reads and
//! writes on that transaction; they keep no shared state of their own apart
//! from the idempotency cache.
//!
//! ## Core Components
//!
//! - **[`ReservationEngine`]**: public entry point (join, hold, confirm, leave, status)
//! - **[`CapacityManager`]**: join and leave decisions, waitlist settlement
//! - **[`HoldService`]**: time-bounded holds and their confirmation
//! - **[`WaitlistService`]**: FIFO queue operations on a locked event
//! - **[`IdempotencyGuard`]**: replay cache for client retries
//! - **[`HoldExpiryReconciler`]**: periodic sweep of expired holds
//!
//! ## Example
//!
//! ```ignore
//! use courtside_runtime::{EngineConfig, ReservationEngine, TracingNotifier};
//! use courtside_core::SystemClock;
//!
//! let engine = ReservationEngine::new(
//!     Arc::new(store),
//!     Arc::new(SystemClock),
//!     Arc::new(TracingNotifier),
//!     EngineConfig::default(),
//! );
//!
//! let outcome = engine.join(event_id, subject_id, Some("retry-key")).await?;
//! ```

/// Join/leave decisions and waitlist settlement
pub mod capacity;

/// Public reservation API
pub mod engine;

/// Hold lifecycle
pub mod holds;

/// Replay cache for idempotency keys
pub mod idempotency;

/// Prometheus metrics for observability
pub mod metrics;

/// Built-in notifier implementations
pub mod notifiers;

/// Background sweep of expired holds
pub mod reconciler;

/// Retry logic with exponential backoff
pub mod retry;

/// FIFO waitlist operations
pub mod waitlist;

pub use capacity::CapacityManager;
pub use engine::{EngineConfig, ReservationEngine};
pub use holds::{HoldConfig, HoldService};
pub use idempotency::{CachedOutcome, IdempotencyConfig, IdempotencyGuard, ScopedKey};
pub use metrics::{MetricsError, MetricsServer};
pub use notifiers::{BroadcastNotifier, TracingNotifier};
pub use reconciler::{HoldExpiryReconciler, ReconcilerConfig, SweepReport};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use waitlist::WaitlistService;
