use std::sync::Arc;

use crate::{
    domain::RecipientId,
    fanout::{FanoutDispatcher, FanoutReport, NotificationPayload},
    Result,
};

/// Who subscribed to what.
pub trait SubscriberDirectory: Send + Sync {
    /// Subscribers of `notification_type`, in subscription order.
    ///
    /// Unknown types are [`Error::NotFound`](crate::Error::NotFound).
    fn subscribers(&self, notification_type: &str) -> Result<Vec<RecipientId>>;
}

/// Broadcasts a notification to everyone subscribed to its type.
pub struct NotificationService {
    directory: Arc<dyn SubscriberDirectory>,
    dispatcher: Arc<FanoutDispatcher>,
}

impl NotificationService {
    pub fn new(directory: Arc<dyn SubscriberDirectory>, dispatcher: Arc<FanoutDispatcher>) -> Self {
        Self {
            directory,
            dispatcher,
        }
    }

    pub async fn notify(&self, notification_type: &str, text: &str) -> Result<FanoutReport> {
        let notification_type = notification_type.trim().to_lowercase();
        let recipients = self.directory.subscribers(&notification_type)?;
        tracing::info!(
            notification_type = %notification_type,
            recipients = recipients.len(),
            "broadcasting notification"
        );

        let payload = NotificationPayload::text(text).with_type(notification_type);
        self.dispatcher.broadcast(&recipients, payload).await
    }
}
