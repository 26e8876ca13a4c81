//! Replay cache for client retries.
//!
//! Maps `(subject, scoped key)` to the outcome first computed for it. The
//! cache is advisory: it keeps a retried request from observing a different
//! result, but correctness never depends on it (the event lock does that).
//! Entries expire after a TTL measured on the injected [`Clock`] and the
//! least recently used entry is evicted once the cache is full.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use courtside_core::environment::Clock;
use courtside_core::outcome::{ConfirmOutcome, HoldOutcome, JoinOutcome, LeaveOutcome};
use courtside_core::types::{EventId, HoldId, SubjectId};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// An outcome worth replaying.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "outcome", rename_all = "snake_case")]
pub enum CachedOutcome {
    /// Result of a join
    Join(JoinOutcome),
    /// Result of a hold request
    Hold(HoldOutcome),
    /// Result of a confirmation
    Confirm(ConfirmOutcome),
    /// Result of a leave
    Leave(LeaveOutcome),
}

/// A client key scoped to one operation on one event (and hold).
///
/// Scoping keeps one client key from replaying a different operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopedKey(String);

impl ScopedKey {
    /// `join:{event}:{key}`
    #[must_use]
    pub fn join(event_id: EventId, key: &str) -> Self {
        Self(format!("join:{event_id}:{key}"))
    }

    /// `hold:{event}:{key}`
    #[must_use]
    pub fn hold(event_id: EventId, key: &str) -> Self {
        Self(format!("hold:{event_id}:{key}"))
    }

    /// `confirm:{event}:{hold}:{key}`
    #[must_use]
    pub fn confirm(event_id: EventId, hold_id: HoldId, key: &str) -> Self {
        Self(format!("confirm:{event_id}:{hold_id}:{key}"))
    }

    /// `leave:{event}:{key}`
    #[must_use]
    pub fn leave(event_id: EventId, key: &str) -> Self {
        Self(format!("leave:{event_id}:{key}"))
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache bounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// How long an outcome is replayed
    pub ttl: Duration,
    /// Maximum number of cached outcomes
    pub capacity: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            capacity: 10_000,
        }
    }
}

struct Entry {
    outcome: CachedOutcome,
    expires_at: DateTime<Utc>,
}

/// Bounded TTL + LRU replay cache keyed by `(subject, scoped key)`.
pub struct IdempotencyGuard {
    entries: Mutex<LruCache<(SubjectId, ScopedKey), Entry>>,
    ttl: ChronoDuration,
    clock: Arc<dyn Clock>,
}

impl IdempotencyGuard {
    /// Create an empty cache.
    #[must_use]
    pub fn new(config: &IdempotencyConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: ChronoDuration::from_std(config.ttl).unwrap_or(ChronoDuration::days(1)),
            clock,
        }
    }

    /// The outcome recorded for this subject and key, unless it has expired.
    #[must_use]
    pub fn get(&self, subject_id: SubjectId, key: &ScopedKey) -> Option<CachedOutcome> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let cache_key = (subject_id, key.clone());
        let expired = match entries.get(&cache_key) {
            Some(entry) if entry.expires_at > now => return Some(entry.outcome.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&cache_key);
        }
        None
    }

    /// Record the outcome for this subject and key.
    pub fn put(&self, subject_id: SubjectId, key: ScopedKey, outcome: CachedOutcome) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries
            .lock()
            .put((subject_id, key), Entry { outcome, expires_at });
    }

    /// Number of cached outcomes, expired ones included until touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
