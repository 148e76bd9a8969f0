use std::sync::Arc;

use teloxide::prelude::*;

use herald_core::{
    callback::CallbackAction,
    domain::{ChatId, EntityKind, MessageId, MessageRef},
    messaging::types::InlineKeyboard,
};

use crate::router::AppState;

use super::{render_error_text, render_token};

pub(crate) const STALE_BUTTON: &str = "This button is no longer valid.";

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });
    let data = q.data.clone().unwrap_or_default();
    let user_id = q.from.id.0 as i64;

    // Always answer, or the client keeps the button spinning.
    let answer = match (message, data.is_empty()) {
        (Some(message), false) => press(&state, user_id, &data, message).await,
        _ => None,
    };

    if let Err(e) = state
        .messenger
        .answer_callback_query(&q.id, answer.as_deref())
        .await
    {
        tracing::warn!(error = %e, "failed to answer callback query");
    }
    Ok(())
}

/// Act on a button press. Returns the text for the callback answer.
pub(crate) async fn press(
    state: &AppState,
    user_id: i64,
    data: &str,
    message: MessageRef,
) -> Option<String> {
    let token = match state.codec.decode(data) {
        Ok(token) => token,
        Err(e) => {
            tracing::info!(user = user_id, error = %e, "rejected callback data");
            if let Err(e) = state.messenger.edit_html(message, STALE_BUTTON).await {
                tracing::debug!(error = %e, "could not mark stale button");
            }
            return Some(STALE_BUTTON.to_string());
        }
    };

    if !state.is_admin(user_id) {
        tracing::warn!(user = user_id, action = ?token.action, "button press refused");
        return Some("Unauthorized".to_string());
    }

    match token.action {
        CallbackAction::View | CallbackAction::Find => match render_token(state, token).await {
            Ok(page) => {
                if let Err(e) = state
                    .messenger
                    .edit_inline_keyboard(message, &page.html, page.keyboard)
                    .await
                {
                    tracing::warn!(error = %e, "failed to update page");
                }
                None
            }
            Err(e) => Some(render_error_text(&e)),
        },

        CallbackAction::Delete => {
            // Only chats are ever offered for deletion.
            let (EntityKind::Chat, Ok(target)) = (token.entity, token.args.parse::<i64>()) else {
                tracing::info!(user = user_id, entity = ?token.entity, "rejected delete button");
                return Some(STALE_BUTTON.to_string());
            };
            let text = if state.roster.remove_chat(ChatId(target)) {
                tracing::info!(chat = target, admin = user_id, "chat deleted");
                format!("🗑 Chat <code>{target}</code> deleted.")
            } else {
                format!("Chat <code>{target}</code> was already gone.")
            };
            if let Err(e) = state
                .messenger
                .edit_inline_keyboard(message, &text, InlineKeyboard::default())
                .await
            {
                tracing::warn!(error = %e, "failed to confirm deletion");
            }
            Some("Done".to_string())
        }

        CallbackAction::Noop => None,
    }
}
