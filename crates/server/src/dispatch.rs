//! Notification dispatch worker.
//!
//! Approval transitions never deliver notifications themselves; they enqueue
//! durable outbox rows inside the same transaction as the state change. This
//! worker drains PENDING rows on an interval and hands each to a
//! [`NotificationSender`]. A delivery failure marks that row FAILED with the
//! error recorded; it never touches the approval that enqueued it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use fileway_core::chrono::Utc;
use fileway_core::config::NotificationsConfig;
use fileway_core::domain::notification::Notification;
use fileway_db::repositories::NotificationRepository;

/// Transport seam. Email/SMS/push gateways live outside this service; the
/// default sender just records the hand-off in the log.
pub trait NotificationSender: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), String>;
}

/// Logs each notification instead of delivering it. Stands in for the real
/// gateway in development and in deployments where transport is external.
#[derive(Clone, Debug, Default)]
pub struct LogSender;

impl NotificationSender for LogSender {
    fn send(&self, notification: &Notification) -> Result<(), String> {
        info!(
            event_name = "notification.delivered",
            notification_id = %notification.id.0,
            user_id = %notification.user_id.0,
            kind = notification.kind.as_str(),
            reference_type = %notification.reference_type,
            reference_id = %notification.reference_id,
            subject = %notification.subject,
            "notification handed to transport"
        );
        Ok(())
    }
}

pub struct DispatchWorker {
    notifications: Arc<dyn NotificationRepository>,
    sender: Arc<dyn NotificationSender>,
    config: NotificationsConfig,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: usize,
    pub failed: usize,
}

impl DispatchWorker {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        sender: Arc<dyn NotificationSender>,
        config: NotificationsConfig,
    ) -> Self {
        Self { notifications, sender, config }
    }

    /// Drain one batch of pending notifications. Failures are recorded on
    /// the rows and counted; they never propagate.
    pub async fn run_once(&self) -> DispatchStats {
        let pending = match self.notifications.list_pending(self.config.batch_size).await {
            Ok(pending) => pending,
            Err(error) => {
                warn!(
                    event_name = "notification.poll_failed",
                    error = %error,
                    "could not read pending notifications; will retry next tick"
                );
                return DispatchStats::default();
            }
        };

        let mut stats = DispatchStats::default();
        for notification in pending {
            match self.sender.send(&notification) {
                Ok(()) => {
                    if let Err(error) =
                        self.notifications.mark_sent(&notification.id, Utc::now()).await
                    {
                        warn!(
                            event_name = "notification.mark_sent_failed",
                            notification_id = %notification.id.0,
                            error = %error,
                            "delivered notification could not be marked sent"
                        );
                    } else {
                        stats.sent += 1;
                    }
                }
                Err(send_error) => {
                    error!(
                        event_name = "notification.delivery_failed",
                        notification_id = %notification.id.0,
                        user_id = %notification.user_id.0,
                        error = %send_error,
                        "notification delivery failed; recorded on the outbox row"
                    );
                    if let Err(error) =
                        self.notifications.mark_failed(&notification.id, &send_error).await
                    {
                        warn!(
                            event_name = "notification.mark_failed_failed",
                            notification_id = %notification.id.0,
                            error = %error,
                            "failed notification could not be recorded"
                        );
                    }
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    /// Run the drain loop until the task is aborted at shutdown.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.dispatch_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let stats = self.run_once().await;
                if stats.sent > 0 || stats.failed > 0 {
                    info!(
                        event_name = "notification.batch_dispatched",
                        sent = stats.sent,
                        failed = stats.failed,
                        "notification batch drained"
                    );
                }
            }
        })
    }
}
