//! Bounded in-process notification queue
//!
//! Producers enqueue with [`NotificationQueue::try_enqueue`], which never
//! waits: when the queue is full the alert is dropped from the queue (it is
//! already persisted) and a warning is logged. Consumers share a cloneable
//! [`NotificationReceiver`].

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{trace, warn};

use crate::storage::schema::Alert;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Producer side of the notification queue
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Alert>,
    receiver: NotificationReceiver,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        Self {
            sender,
            receiver: NotificationReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
        }
    }

    /// Enqueue without waiting; returns whether the alert was queued
    pub fn try_enqueue(&self, alert: Alert) -> bool {
        let id = alert.id;

        match self.sender.try_send(alert) {
            Ok(()) => {
                trace!("queued alert {} for notification", id);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("notification queue full, alert {} not queued", id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("notification queue closed, alert {} not queued", id);
                false
            }
        }
    }

    pub fn receiver(&self) -> NotificationReceiver {
        self.receiver.clone()
    }

    /// Number of alerts waiting to be drained
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Read-only consumer side; clones share the same queue
#[derive(Debug, Clone)]
pub struct NotificationReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Alert>>>,
}

impl NotificationReceiver {
    /// Wait for the next alert
    ///
    /// Returns `None` once every producer has been dropped and the queue is
    /// drained.
    pub async fn recv(&self) -> Option<Alert> {
        self.inner.lock().await.recv().await
    }

    /// Take the next alert if one is waiting
    pub async fn try_recv(&self) -> Option<Alert> {
        self.inner.lock().await.try_recv().ok()
    }
}
