//! Notification fan-out.
//!
//! One logical notification becomes one [`NotificationJob`] per recipient.
//! Jobs run concurrently and independently: a failing, slow or panicking
//! delivery only ever affects its own [`DeliveryOutcome`].

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::Semaphore,
    task::{Id, JoinError, JoinHandle, JoinSet},
};

use crate::{
    config::Config,
    domain::RecipientId,
    errors::Error,
    executor::PoolRegistry,
    formatting::{escape_html, split_text},
    messaging::{port::MessagingPort, types::InlineKeyboard},
    Result,
};

/// Why a single delivery failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The chat does not exist or the account is gone.
    Unreachable,
    /// The recipient blocked or removed the bot.
    Blocked,
    RateLimited,
    Timeout,
    Unknown(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unreachable => f.write_str("unreachable"),
            FailureReason::Blocked => f.write_str("blocked"),
            FailureReason::RateLimited => f.write_str("rate limited"),
            FailureReason::Timeout => f.write_str("timed out"),
            FailureReason::Unknown(detail) => write!(f, "unknown ({detail})"),
        }
    }
}

/// What the caller wants delivered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationPayload {
    /// Plain text; escaped when rendered.
    pub text: String,
    /// Shown in the banner when set.
    pub notification_type: Option<String>,
    /// Buttons attached to the last message.
    pub attachment: Option<InlineKeyboard>,
}

impl NotificationPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, notification_type: impl Into<String>) -> Self {
        self.notification_type = Some(notification_type.into());
        self
    }
}

/// Payload as it goes over the wire: HTML chunks that each fit one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPayload {
    pub chunks: Vec<String>,
    pub attachment: Option<InlineKeyboard>,
}

/// Banner plus escaped text, split at `chunk_limit` characters.
pub fn render_payload(payload: &NotificationPayload, chunk_limit: usize) -> RenderedPayload {
    let banner = match payload.notification_type.as_deref() {
        Some(kind) => format!("🔔 <b>New notification</b> ({})", escape_html(kind)),
        None => "🔔 <b>New notification</b>".to_string(),
    };
    let html = format!("{banner}\n\n{}", escape_html(payload.text.trim()));

    RenderedPayload {
        chunks: split_text(&html, chunk_limit),
        attachment: payload.attachment.clone(),
    }
}

/// One recipient's share of a broadcast.
#[derive(Clone, Debug)]
pub struct NotificationJob {
    pub recipient_id: RecipientId,
    pub payload: Arc<RenderedPayload>,
    pub notification_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(FailureReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub recipient_id: RecipientId,
    pub status: DeliveryStatus,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered_count: usize,
    /// In submission order.
    pub failed: Vec<(RecipientId, FailureReason)>,
}

impl FanoutReport {
    pub fn from_outcomes(outcomes: &[DeliveryOutcome]) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match &outcome.status {
                DeliveryStatus::Delivered => report.delivered_count += 1,
                DeliveryStatus::Failed(reason) => {
                    report.failed.push((outcome.recipient_id, reason.clone()))
                }
            }
        }
        report
    }

    pub fn attempted(&self) -> usize {
        self.delivered_count + self.failed.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Delivered to {}/{} recipients",
            self.delivered_count,
            self.attempted()
        )
    }
}

/// Sends one job to its recipient.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, job: &NotificationJob) -> std::result::Result<(), FailureReason>;
}

/// [`DeliveryTransport`] over the messaging port.
pub struct MessengerTransport {
    messenger: Arc<dyn MessagingPort>,
}

impl MessengerTransport {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }
}

fn failure_reason(err: Error) -> FailureReason {
    match err {
        Error::Delivery(reason) => reason,
        other => FailureReason::Unknown(other.to_string()),
    }
}

#[async_trait]
impl DeliveryTransport for MessengerTransport {
    async fn deliver(&self, job: &NotificationJob) -> std::result::Result<(), FailureReason> {
        let chunks = &job.payload.chunks;
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            match (&job.payload.attachment, i == last) {
                (Some(keyboard), true) if !keyboard.is_empty() => {
                    self.messenger
                        .send_inline_keyboard(job.recipient_id, chunk, keyboard.clone())
                        .await
                        .map_err(failure_reason)?;
                }
                _ => {
                    self.messenger
                        .send_html(job.recipient_id, chunk)
                        .await
                        .map_err(failure_reason)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FanoutSettings {
    pub delivery_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub max_recipients: usize,
    pub chunk_limit: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(15),
            broadcast_timeout: Duration::from_secs(120),
            max_recipients: 2_000,
            chunk_limit: 4000,
        }
    }
}

impl FanoutSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            delivery_timeout: cfg.delivery_timeout,
            broadcast_timeout: cfg.broadcast_timeout,
            max_recipients: cfg.broadcast_max_recipients,
            chunk_limit: cfg.telegram_safe_limit,
        }
    }

    /// How many single-message deliveries fit in the broadcast deadline when
    /// sends are spaced `min_interval` apart. A quarter of the deadline is
    /// kept in reserve for slow replies.
    pub fn sustainable_recipients(&self, min_interval: Duration) -> usize {
        if min_interval.is_zero() {
            return usize::MAX;
        }
        let budget = self.broadcast_timeout.as_nanos() * 3 / 4;
        usize::try_from(budget / min_interval.as_nanos())
            .unwrap_or(usize::MAX)
            .max(1)
    }

    /// Lower `max_recipients` to what the send rate can deliver before the
    /// broadcast deadline.
    pub fn fit_to_rate(mut self, min_interval: Duration) -> Self {
        let sustainable = self.sustainable_recipients(min_interval);
        if self.max_recipients > sustainable {
            tracing::warn!(
                configured = self.max_recipients,
                sustainable,
                broadcast_timeout_ms = self.broadcast_timeout.as_millis() as u64,
                min_interval_ms = min_interval.as_millis() as u64,
                "broadcast size bound exceeds what the send rate allows; lowering it"
            );
            self.max_recipients = sustainable;
        }
        self
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct FanoutDispatcher {
    pool: Arc<PoolRegistry>,
    transport: Arc<dyn DeliveryTransport>,
    settings: FanoutSettings,
}

impl FanoutDispatcher {
    pub fn new(
        pool: Arc<PoolRegistry>,
        transport: Arc<dyn DeliveryTransport>,
        settings: FanoutSettings,
    ) -> Self {
        Self {
            pool,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> FanoutSettings {
        self.settings
    }

    /// Deliver `payload` to every distinct recipient.
    ///
    /// Individual failures end up in the report; only an oversized recipient
    /// list or an unavailable worker pool fail the whole call.
    pub async fn broadcast(
        &self,
        recipients: &[RecipientId],
        payload: NotificationPayload,
    ) -> Result<FanoutReport> {
        let mut seen = HashSet::with_capacity(recipients.len());
        let recipients: Vec<RecipientId> = recipients
            .iter()
            .copied()
            .filter(|r| seen.insert(*r))
            .collect();

        if recipients.is_empty() {
            return Ok(FanoutReport::default());
        }
        if recipients.len() > self.settings.max_recipients {
            return Err(Error::BroadcastTooLarge {
                requested: recipients.len(),
                limit: self.settings.max_recipients,
            });
        }

        let notification_type = payload.notification_type.clone();
        let chunk_limit = self.settings.chunk_limit;
        let rendered = self
            .pool
            .submit(move || render_payload(&payload, chunk_limit))?
            .await?;
        let rendered = Arc::new(rendered);

        let outcomes = self
            .deliver_all(&recipients, rendered, notification_type.as_deref())
            .await;
        let report = FanoutReport::from_outcomes(&outcomes);

        tracing::info!(
            notification_type = notification_type.as_deref().unwrap_or("-"),
            delivered = report.delivered_count,
            failed = report.failed.len(),
            "{}",
            report.summary()
        );
        Ok(report)
    }

    async fn deliver_all(
        &self,
        recipients: &[RecipientId],
        payload: Arc<RenderedPayload>,
        notification_type: Option<&str>,
    ) -> Vec<DeliveryOutcome> {
        let in_flight = Arc::new(Semaphore::new(self.pool.settings().workers.max(1)));
        let per_recipient = self.settings.delivery_timeout;
        let mut tasks = JoinSet::new();
        let mut task_index: HashMap<Id, usize> = HashMap::with_capacity(recipients.len());

        for (index, recipient_id) in recipients.iter().copied().enumerate() {
            let job = NotificationJob {
                recipient_id,
                payload: payload.clone(),
                notification_type: notification_type.map(str::to_string),
            };
            let transport = self.transport.clone();
            let in_flight = in_flight.clone();

            let handle = tasks.spawn(async move {
                let Ok(_permit) = in_flight.acquire_owned().await else {
                    let reason = FailureReason::Unknown("delivery slots closed".to_string());
                    return (index, DeliveryStatus::Failed(reason));
                };

                let mut attempt = AbortOnDrop(tokio::spawn(async move {
                    transport.deliver(&job).await
                }));
                let status = match tokio::time::timeout(per_recipient, &mut attempt.0).await {
                    Ok(Ok(Ok(()))) => DeliveryStatus::Delivered,
                    Ok(Ok(Err(reason))) => DeliveryStatus::Failed(reason),
                    Ok(Err(e)) if e.is_panic() => DeliveryStatus::Failed(FailureReason::Unknown(
                        "delivery panicked".to_string(),
                    )),
                    Ok(Err(e)) => DeliveryStatus::Failed(FailureReason::Unknown(e.to_string())),
                    Err(_) => DeliveryStatus::Failed(FailureReason::Timeout),
                };
                (index, status)
            });
            task_index.insert(handle.id(), index);
        }

        let mut statuses: Vec<Option<DeliveryStatus>> = vec![None; recipients.len()];
        let deadline = tokio::time::Instant::now() + self.settings.broadcast_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, tasks.join_next()).await;
            match next {
                Ok(Some(joined)) => settle(&mut statuses, &task_index, joined),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        pending = tasks.len(),
                        timeout_ms = self.settings.broadcast_timeout.as_millis() as u64,
                        "broadcast deadline reached; aborting pending deliveries"
                    );
                    break;
                }
            }
        }
        tasks.shutdown().await;

        recipients
            .iter()
            .zip(statuses)
            .map(|(recipient_id, status)| {
                let status = status.unwrap_or(DeliveryStatus::Failed(FailureReason::Timeout));
                if let DeliveryStatus::Failed(reason) = &status {
                    tracing::warn!(recipient = recipient_id.0, %reason, "delivery failed");
                }
                DeliveryOutcome {
                    recipient_id: *recipient_id,
                    status,
                }
            })
            .collect()
    }
}

/// Record a finished delivery task. A task that died on its own is charged
/// to its recipient rather than left to look like a timeout.
fn settle(
    statuses: &mut [Option<DeliveryStatus>],
    task_index: &HashMap<Id, usize>,
    joined: std::result::Result<(usize, DeliveryStatus), JoinError>,
) {
    match joined {
        Ok((index, status)) => statuses[index] = Some(status),
        Err(e) => {
            tracing::error!(error = %e, "delivery task failed");
            if let Some(&index) = task_index.get(&e.id()) {
                let reason = FailureReason::Unknown(format!("delivery task failed: {e}"));
                statuses[index] = Some(DeliveryStatus::Failed(reason));
            }
        }
    }
}
