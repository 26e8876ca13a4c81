//! Built-in [`Notifier`] implementations.
//!
//! - [`TracingNotifier`]: logs every notification (default for the server)
//! - [`BroadcastNotifier`]: fans notifications out over a tokio broadcast
//!   channel to in-process subscribers (push gateways, websockets, tests)

use courtside_core::notifier::{Notification, Notifier, NotifyError};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::broadcast;

/// Logs notifications at `info`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                event_id = %notification.event_id,
                subject_id = ?notification.subject_id.map(|s| s.get()),
                kind = notification.kind.label(),
                "Notification"
            );
            Ok(())
        })
    }
}

/// Publishes notifications on a broadcast channel.
///
/// Slow subscribers lag and drop old notifications instead of blocking the engine.
#[derive(Clone, Debug)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    /// Create a channel buffering up to `capacity` notifications per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every notification published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            self.sender
                .send(notification)
                .map(|_| ())
                .map_err(|_| NotifyError::ChannelClosed)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use courtside_core::notifier::NotificationKind;
    use courtside_core::types::{EventId, SubjectId};

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();
        let sent = Notification::to_subject(EventId::new(1), SubjectId::new(2), NotificationKind::Joined);

        notifier.notify(sent.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), sent);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_closed() {
        let notifier = BroadcastNotifier::new(8);
        let result = notifier
            .notify(Notification::broadcast(EventId::new(1), NotificationKind::Left))
            .await;
        assert_eq!(result, Err(NotifyError::ChannelClosed));
    }

    #[tokio::test]
    async fn tracing_notifier_never_fails() {
        let result = TracingNotifier
            .notify(Notification::broadcast(EventId::new(1), NotificationKind::Left))
            .await;
        assert!(result.is_ok());
    }
}
