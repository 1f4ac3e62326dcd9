//! Notification stage: post reports to the feedback channel.
//!
//! Delivery is best-effort. A failed post is logged and recorded on the
//! report; it never changes the outcome of the run.

use std::sync::Arc;

use pushgate_core::{emit_notification_failed, DeliveryStatus, Notifier, RunEventKind};
use tracing::info;

use crate::journal::Journal;

pub struct NotificationStage {
    notifier: Arc<dyn Notifier>,
    channel: String,
}

impl NotificationStage {
    pub fn new(notifier: Arc<dyn Notifier>, channel: impl Into<String>) -> Self {
        Self {
            notifier,
            channel: channel.into(),
        }
    }

    /// Post `message` and report what happened.
    pub async fn deliver(&self, message: &str, journal: &Journal) -> DeliveryStatus {
        match self.notifier.post(&self.channel, message).await {
            Ok(()) => {
                info!(event = "notification.delivered", channel = %self.channel);
                journal
                    .record(RunEventKind::NotificationDelivered {
                        channel: self.channel.clone(),
                    })
                    .await;
                DeliveryStatus::Delivered
            }
            Err(e) => {
                emit_notification_failed(&self.channel, &e);
                journal
                    .record(RunEventKind::NotificationFailed {
                        channel: self.channel.clone(),
                    })
                    .await;
                DeliveryStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
