use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls to the same chat.
    pub per_chat_min_interval: Duration,
    /// Idle chats are forgotten once this many are tracked.
    pub max_tracked_chats: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
            max_tracked_chats: 4096,
        }
    }
}

/// Book the first slot at or after `now` and move `next` one interval past it.
/// Returns how long the caller has to wait for its slot.
fn reserve(next: &mut Instant, interval: Duration, now: Instant) -> Duration {
    let start = (*next).max(now);
    *next = start + interval;
    start.saturating_duration_since(now)
}

/// Next free slot per chat.
struct ChatSlots {
    next: HashMap<i64, Instant>,
    max_tracked: usize,
}

impl ChatSlots {
    fn reserve(&mut self, chat_id: i64, interval: Duration, now: Instant) -> Duration {
        if self.next.len() >= self.max_tracked && !self.next.contains_key(&chat_id) {
            // A broadcast touches every chat once; drop the ones whose slot has passed.
            self.next.retain(|_, slot| *slot > now);
        }
        let slot = self.next.entry(chat_id).or_insert(now);
        reserve(slot, interval, now)
    }
}

/// MessagingPort decorator that spaces outbound calls.
///
/// Broadcasts hit many chats at once; the global interval keeps the bot under
/// Telegram's overall flood limit while the per-chat interval covers multi-part
/// messages to the same chat. It reduces 429s, it does not rule them out.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<Instant>,
    per_chat: Mutex<ChatSlots>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(Instant::now()),
            per_chat: Mutex::new(ChatSlots {
                next: HashMap::new(),
                max_tracked: cfg.max_tracked_chats.max(1),
            }),
        }
    }

    pub fn tracked_chats(&self) -> usize {
        self.per_chat.lock().next.len()
    }

    async fn throttle_chat(&self, chat_id: i64) {
        let now = Instant::now();
        let global_wait = reserve(&mut self.global.lock(), self.cfg.global_min_interval, now);
        let chat_wait = self
            .per_chat
            .lock()
            .reserve(chat_id, self.cfg.per_chat_min_interval, now);

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = reserve(
            &mut self.global.lock(),
            self.cfg.global_min_interval,
            Instant::now(),
        );
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.throttle_chat(chat_id.0).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.throttle_chat(msg.chat_id.0).await;
        self.inner.edit_html(msg, html).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.throttle_chat(chat_id.0).await;
        self.inner.send_inline_keyboard(chat_id, html, keyboard).await
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.throttle_chat(msg.chat_id.0).await;
        self.inner.edit_inline_keyboard(msg, html, keyboard).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // Callback answers carry no chat id.
        self.throttle_global().await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
