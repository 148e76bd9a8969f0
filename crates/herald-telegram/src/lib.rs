//! Telegram adapter (teloxide).
//!
//! Implements the `herald-core` MessagingPort over the Telegram Bot API and
//! classifies delivery failures so fan-out reports say why a recipient missed
//! a notification.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
    ApiError, RequestError,
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use herald_core::{
    callback::MAX_CALLBACK_DATA_LEN,
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    fanout::FailureReason,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

/// Delivery failures Telegram tells us about explicitly.
pub fn classify(e: &RequestError) -> Option<FailureReason> {
    match e {
        RequestError::Api(api) => match api {
            ApiError::BotBlocked | ApiError::BotKicked => Some(FailureReason::Blocked),
            ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::CantInitiateConversation => Some(FailureReason::Unreachable),
            _ => None,
        },
        RequestError::RetryAfter(_) => Some(FailureReason::RateLimited),
        _ => None,
    }
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        match classify(&e) {
            Some(reason) => Error::Delivery(reason),
            None => Error::External(format!("telegram error: {e}")),
        }
    }

    fn markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
        let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|b| InlineKeyboardButton::callback(b.label, b.callback_data))
                    .collect()
            })
            .collect();
        InlineKeyboardMarkup::new(rows)
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::debug!(retry_after_ms = d.as_millis() as u64, "telegram rate limit");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
            max_callback_data_len: MAX_CALLBACK_DATA_LEN,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = Self::markup(keyboard);

        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(markup.clone())
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        let markup = Self::markup(keyboard);

        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
                .reply_markup(markup.clone())
        })
        .await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::messaging::types::InlineButton;
    use std::time::Duration;

    #[test]
    fn classifies_recipient_side_failures() {
        let blocked = RequestError::Api(ApiError::BotBlocked);
        assert_eq!(classify(&blocked), Some(FailureReason::Blocked));

        let kicked = RequestError::Api(ApiError::BotKicked);
        assert_eq!(classify(&kicked), Some(FailureReason::Blocked));

        let gone = RequestError::Api(ApiError::ChatNotFound);
        assert_eq!(classify(&gone), Some(FailureReason::Unreachable));

        let deactivated = RequestError::Api(ApiError::UserDeactivated);
        assert_eq!(classify(&deactivated), Some(FailureReason::Unreachable));

        let slow_down = RequestError::RetryAfter(Duration::from_secs(3));
        assert_eq!(classify(&slow_down), Some(FailureReason::RateLimited));
    }

    #[test]
    fn other_failures_stay_external() {
        let e = RequestError::Api(ApiError::MessageNotModified);
        assert_eq!(classify(&e), None);
        assert!(matches!(
            TelegramMessenger::map_err(e),
            Error::External(_)
        ));
        assert!(matches!(
            TelegramMessenger::map_err(RequestError::Api(ApiError::BotBlocked)),
            Error::Delivery(FailureReason::Blocked)
        ));
    }

    #[test]
    fn keyboard_rows_are_preserved() {
        let kb = InlineKeyboard::new(vec![
            vec![InlineButton::new("◀", "a"), InlineButton::new("▶", "b")],
            vec![InlineButton::new("x", "c")],
        ]);
        let markup = TelegramMessenger::markup(kb);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
    }
}
