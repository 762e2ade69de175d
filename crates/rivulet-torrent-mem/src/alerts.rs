//! Alert queue shared by the session and its handles.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rivulet_torrent_core::Alert;
use tokio::sync::Notify;

/// Alert queue shared by the session and its handles.
#[derive(Default)]
pub(crate) struct AlertQueue {
    pending: Mutex<VecDeque<Alert>>,
    notify: Notify,
}

impl AlertQueue {
    pub(crate) fn push(&self, alert: Alert) {
        self.lock().push_back(alert);
        self.notify.notify_one();
    }

    /// Wait up to `max_wait` for the first alert, then drain the queue.
    pub(crate) async fn wait(&self, max_wait: Duration) -> Vec<Alert> {
        if self.lock().is_empty() {
            let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
        }
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_torrent_core::{AlertCategory, AlertKind};

    #[tokio::test]
    async fn wait_returns_empty_after_timeout() {
        let queue = AlertQueue::default();
        let alerts = queue.wait(Duration::from_millis(10)).await;
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn wait_drains_everything_queued() {
        let queue = AlertQueue::default();
        for _ in 0..3 {
            queue.push(Alert::new(
                AlertCategory::STATUS,
                AlertKind::ExternalAddress,
                "external address",
            ));
        }
        let alerts = queue.wait(Duration::from_secs(1)).await;
        assert_eq!(alerts.len(), 3);
        assert!(queue.wait(Duration::from_millis(1)).await.is_empty());
    }
}
