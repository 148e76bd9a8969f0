//! Telegram update handlers.
//!
//! Handlers stay thin: they pull ids and text out of the update and call into
//! `herald-core` through [`AppState`].

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use herald_core::{
    callback::CallbackToken,
    errors::Error,
    executor::PoolError,
    formatting::escape_html,
    paging::{render_on_pool, PagedQuery, RenderedPage},
    Result,
};

use crate::router::AppState;

mod callback;
mod commands;

/// Fetch and render the roster page `token` points at.
pub(crate) async fn render_token(state: &AppState, token: CallbackToken) -> Result<RenderedPage> {
    let query: Arc<dyn PagedQuery> = state.roster.clone();
    render_on_pool(
        &state.pool,
        query,
        state.codec,
        token,
        state.cfg.telegram_safe_limit,
    )
    .await
}

/// What to tell a user when rendering a page failed.
pub(crate) fn render_error_text(err: &Error) -> String {
    match err {
        Error::Pool(PoolError::ShutDown) => "⏳ The bot is busy, try again in a moment.".to_string(),
        Error::InvalidRequest(msg) | Error::NotFound(msg) => format!("❌ {}", escape_html(msg)),
        other => {
            tracing::error!(error = %other, "page rendering failed");
            "❌ Something went wrong.".to_string()
        }
    }
}

pub async fn handle_callback(
    _bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(q, state).await
}

pub async fn handle_message(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    match msg.text() {
        Some(text) if text.starts_with('/') => commands::handle_command(msg, state).await,
        // Plain chatter is not for us.
        _ => Ok(()),
    }
}
