//! Notifier that records what it is told.

use courtside_core::notifier::{Notification, NotificationKind, Notifier, NotifyError};
use courtside_core::types::SubjectId;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Captures every notification in delivery order.
///
/// Clones share the same log. [`RecordingNotifier::fail_with`] makes every
/// delivery fail while still recording it, to check that failures never
/// affect committed state.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    log: Arc<Mutex<Vec<Notification>>>,
    failure: Arc<Mutex<Option<NotifyError>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail with `error` (`None` restores success).
    pub fn fail_with(&self, error: Option<NotifyError>) {
        *self.failure.lock() = error;
    }

    /// Everything delivered so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.log.lock().clone()
    }

    /// Labels of everything addressed to `subject_id`, in order.
    #[must_use]
    pub fn kinds_for(&self, subject_id: SubjectId) -> Vec<&'static str> {
        self.log
            .lock()
            .iter()
            .filter(|n| n.subject_id == Some(subject_id))
            .map(|n| n.kind.label())
            .collect()
    }

    /// Subjects that received a `promoted` notification, in order.
    #[must_use]
    pub fn promoted(&self) -> Vec<SubjectId> {
        self.log
            .lock()
            .iter()
            .filter(|n| n.kind == NotificationKind::Promoted)
            .filter_map(|n| n.subject_id)
            .collect()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            self.log.lock().push(notification);
            let failure = self.failure.lock().clone();
            match failure {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }
}
