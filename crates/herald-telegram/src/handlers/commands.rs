use std::sync::Arc;

use teloxide::prelude::*;

use herald_core::{
    callback::{CallbackAction, CallbackToken},
    domain::{ChatId, EntityKind, UserId},
    errors::Error,
    fanout::FanoutReport,
    formatting::{escape_html, normalize_whitespace, split_text},
    messaging::types::{InlineButton, InlineKeyboard},
    roster::{ChatKind, NewChat, Roster, Subscription, UserProfile},
};

use crate::router::AppState;

use super::{render_error_text, render_token};

/// Failed recipients listed in a broadcast summary.
const MAX_LISTED_FAILURES: usize = 20;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Who sent a command, and from where.
#[derive(Clone, Debug)]
pub(crate) struct Invocation {
    pub chat: NewChat,
    pub user_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    Html(String),
    Keyboard(String, InlineKeyboard),
}

fn invocation(msg: &Message) -> Option<Invocation> {
    let user = msg.from()?;
    let chat = &msg.chat;

    let kind = if chat.is_private() {
        ChatKind::Private
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else if chat.is_channel() {
        ChatKind::Channel
    } else {
        ChatKind::Group
    };

    let title = chat
        .title()
        .or_else(|| chat.username())
        .or_else(|| chat.first_name())
        .unwrap_or("")
        .to_string();

    let profile = (kind == ChatKind::Private).then(|| UserProfile {
        user_id: UserId(user.id.0 as i64),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    });

    Some(Invocation {
        chat: NewChat {
            id: ChatId(chat.id.0),
            kind,
            title,
            user: profile,
        },
        user_id: user.id.0 as i64,
    })
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(inv) = invocation(&msg) else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let (cmd, arg) = parse_command(text);
    tracing::debug!(command = %cmd, user = inv.user_id, chat = inv.chat.id.0, "command");

    let reply = run_command(&state, &inv, &cmd, &arg).await;
    send_reply(&state, inv.chat.id, reply).await;
    Ok(())
}

async fn send_reply(state: &AppState, chat_id: ChatId, reply: Reply) {
    let res = match reply {
        Reply::Html(html) => {
            let limit = state.cfg.telegram_safe_limit.max(200);
            let mut res = Ok(());
            for chunk in split_text(&html, limit) {
                if let Err(e) = state.messenger.send_html(chat_id, &chunk).await {
                    res = Err(e);
                    break;
                }
            }
            res
        }
        Reply::Keyboard(html, keyboard) if keyboard.is_empty() => {
            state.messenger.send_html(chat_id, &html).await.map(|_| ())
        }
        Reply::Keyboard(html, keyboard) => state
            .messenger
            .send_inline_keyboard(chat_id, &html, keyboard)
            .await
            .map(|_| ()),
    };
    if let Err(e) = res {
        tracing::warn!(chat = chat_id.0, error = %e, "failed to send reply");
    }
}

fn html(s: impl Into<String>) -> Reply {
    Reply::Html(s.into())
}

pub(crate) async fn run_command(state: &AppState, inv: &Invocation, cmd: &str, arg: &str) -> Reply {
    let chat_id = inv.chat.id;

    match cmd {
        "start" => {
            let greeting = if state.roster.register_chat(inv.chat.clone()) {
                tracing::info!(chat = chat_id.0, kind = inv.chat.kind.as_str(), "chat registered");
                "👋 <b>Welcome!</b> This chat is now registered for notifications."
            } else {
                "👋 This chat is already registered."
            };
            html(format!(
                "{greeting}\n\nUse /types to see what you can subscribe to, /help for everything else."
            ))
        }

        "help" => html(help_text(state.is_admin(inv.user_id))),

        "status" => html(status_text(&state.roster, chat_id)),

        "types" => html(types_text(&state.roster)),

        "notify_on" => {
            let kind = normalize_whitespace(arg).to_lowercase();
            if kind.is_empty() {
                return html("Usage: /notify_on &lt;type&gt;");
            }
            if state.roster.chat_status(chat_id).is_none() {
                return html(NOT_REGISTERED);
            }
            match state.roster.subscribe(chat_id, &kind, UserId(inv.user_id)) {
                Ok(Subscription::Added) => {
                    html(format!("🔔 Subscribed to <b>{}</b>.", escape_html(&kind)))
                }
                Ok(Subscription::AlreadyPresent) => html(format!(
                    "Already subscribed to <b>{}</b>.",
                    escape_html(&kind)
                )),
                Err(_) => html(unknown_type_text(&kind)),
            }
        }

        "notify_off" => {
            let kind = normalize_whitespace(arg).to_lowercase();
            if kind.is_empty() {
                return html("Usage: /notify_off &lt;type&gt;");
            }
            match state.roster.unsubscribe(chat_id, &kind) {
                Ok(true) => html(format!("🔕 Unsubscribed from <b>{}</b>.", escape_html(&kind))),
                Ok(false) => html(format!(
                    "This chat is not subscribed to <b>{}</b>.",
                    escape_html(&kind)
                )),
                Err(_) => html(unknown_type_text(&kind)),
            }
        }

        "stop" => {
            if state.roster.remove_chat(chat_id) {
                tracing::info!(chat = chat_id.0, "chat removed on request");
                html("👋 This chat was removed. Send /start to register again.")
            } else {
                html(NOT_REGISTERED)
            }
        }

        "get_data" | "find_data" | "del_chat" | "broadcast" | "add_admin" | "del_admin"
        | "add_notify_subscriber" | "del_notify_subscriber"
            if !state.is_admin(inv.user_id) =>
        {
            tracing::warn!(user = inv.user_id, command = cmd, "admin command refused");
            html("⛔ This command is for administrators only.")
        }

        "get_data" => {
            if arg.is_empty() || arg == "-list" {
                return html(tables_text());
            }
            let Some(kind) = EntityKind::from_table_name(arg) else {
                return html(format!(
                    "Unknown table <code>{}</code>. Use /get_data -list.",
                    escape_html(arg)
                ));
            };
            let token = CallbackToken::new(CallbackAction::View, kind, 0, "");
            page_reply(state, token).await
        }

        "find_data" => {
            let mut parts = arg.splitn(3, char::is_whitespace);
            let (Some(table), Some(field), Some(value)) = (parts.next(), parts.next(), parts.next())
            else {
                return html("Usage: /find_data &lt;table&gt; &lt;field&gt; &lt;value&gt;");
            };
            let Some(kind) = EntityKind::from_table_name(table) else {
                return html(format!(
                    "Unknown table <code>{}</code>. Use /get_data -list.",
                    escape_html(table)
                ));
            };
            let field = field.trim().to_lowercase();
            if field != "id" && !Roster::field_names(kind).contains(&field.as_str()) {
                return html(format!(
                    "Table <b>{}</b> has no field <code>{}</code>.\nFields: id, {}",
                    kind.table_name(),
                    escape_html(&field),
                    Roster::field_names(kind).join(", ")
                ));
            }

            let token = CallbackToken::new(
                CallbackAction::Find,
                kind,
                0,
                CallbackToken::find_args(&field, value.trim()),
            );
            if state.codec.encode(&token).is_err() {
                return html("❌ Search value is too long.");
            }
            page_reply(state, token).await
        }

        "del_chat" => {
            let Ok(target) = arg.trim().parse::<i64>() else {
                return html("Usage: /del_chat &lt;chat id&gt;");
            };
            let Some(status) = state.roster.chat_status(ChatId(target)) else {
                return html(format!("Chat <code>{target}</code> is not registered."));
            };

            let confirm = CallbackToken::new(
                CallbackAction::Delete,
                EntityKind::Chat,
                0,
                target.to_string(),
            );
            let cancel = CallbackToken::new(CallbackAction::Noop, EntityKind::Chat, 0, "");
            let (Ok(confirm), Ok(cancel)) = (state.codec.encode(&confirm), state.codec.encode(&cancel))
            else {
                return html("❌ Cannot build the confirmation button.");
            };

            Reply::Keyboard(
                format!(
                    "Delete chat <code>{target}</code> ({}, {})?\nIts subscriptions go with it.",
                    escape_html(&status.title),
                    status.kind
                ),
                InlineKeyboard::new(vec![vec![
                    InlineButton::new("🗑 Delete", confirm),
                    InlineButton::new("✖ Cancel", cancel),
                ]]),
            )
        }

        "broadcast" => {
            let mut parts = arg.splitn(2, char::is_whitespace);
            let (Some(kind), Some(text)) = (parts.next(), parts.next()) else {
                return html("Usage: /broadcast &lt;type&gt; &lt;text&gt;");
            };
            if text.trim().is_empty() {
                return html("Usage: /broadcast &lt;type&gt; &lt;text&gt;");
            }

            match state.notifier.notify(kind, text).await {
                Ok(report) => html(broadcast_text(&report)),
                Err(Error::NotFound(_)) => html(unknown_type_text(kind)),
                Err(e @ Error::BroadcastTooLarge { .. }) => {
                    html(format!("❌ {}", escape_html(&e.to_string())))
                }
                Err(e) => {
                    tracing::error!(error = %e, "broadcast failed");
                    html(format!("❌ Broadcast failed: {}", escape_html(&e.to_string())))
                }
            }
        }

        "add_admin" => {
            let Ok(target) = arg.trim().parse::<i64>() else {
                return html("Usage: /add_admin &lt;user id&gt;");
            };
            if state.is_configured_admin(target) {
                return html(format!(
                    "User <code>{target}</code> is already an administrator."
                ));
            }
            match state.roster.grant_admin(UserId(target), UserId(inv.user_id)) {
                Ok(true) => {
                    tracing::info!(user = target, admin = inv.user_id, "administrator granted");
                    html(format!("✅ User <code>{target}</code> is now an administrator."))
                }
                Ok(false) => html(format!(
                    "User <code>{target}</code> is already an administrator."
                )),
                Err(_) => html(format!(
                    "User <code>{target}</code> is not registered. They must send /start in a private chat first."
                )),
            }
        }

        "del_admin" => {
            let Ok(target) = arg.trim().parse::<i64>() else {
                return html("Usage: /del_admin &lt;user id&gt;");
            };
            if state.is_configured_admin(target) {
                return html(format!(
                    "⛔ User <code>{target}</code> is configured in HERALD_ADMIN_USERS and cannot be removed here."
                ));
            }
            if state.roster.revoke_admin(UserId(target)) {
                tracing::info!(user = target, admin = inv.user_id, "administrator revoked");
                html(format!("User <code>{target}</code> is no longer an administrator."))
            } else {
                html(format!("User <code>{target}</code> is not an administrator."))
            }
        }

        "add_notify_subscriber" | "del_notify_subscriber" => {
            let mut parts = arg.split_whitespace();
            let (Some(Ok(target)), Some(kind), None) = (
                parts.next().map(str::parse::<i64>),
                parts.next().map(str::to_lowercase),
                parts.next(),
            ) else {
                return html(format!("Usage: /{cmd} &lt;chat id&gt; &lt;type&gt;"));
            };
            let target = ChatId(target);
            if state.roster.chat_status(target).is_none() {
                return html(format!("Chat <code>{}</code> is not registered.", target.0));
            }

            if cmd == "add_notify_subscriber" {
                match state.roster.subscribe(target, &kind, UserId(inv.user_id)) {
                    Ok(Subscription::Added) => {
                        tracing::info!(chat = target.0, kind = %kind, admin = inv.user_id, "subscriber added");
                        html(format!(
                            "🔔 Chat <code>{}</code> subscribed to <b>{}</b>.",
                            target.0,
                            escape_html(&kind)
                        ))
                    }
                    Ok(Subscription::AlreadyPresent) => html(format!(
                        "Chat <code>{}</code> is already subscribed to <b>{}</b>.",
                        target.0,
                        escape_html(&kind)
                    )),
                    Err(_) => html(unknown_type_text(&kind)),
                }
            } else {
                match state.roster.unsubscribe(target, &kind) {
                    Ok(true) => {
                        tracing::info!(chat = target.0, kind = %kind, admin = inv.user_id, "subscriber removed");
                        html(format!(
                            "🔕 Chat <code>{}</code> unsubscribed from <b>{}</b>.",
                            target.0,
                            escape_html(&kind)
                        ))
                    }
                    Ok(false) => html(format!(
                        "Chat <code>{}</code> is not subscribed to <b>{}</b>.",
                        target.0,
                        escape_html(&kind)
                    )),
                    Err(_) => html(unknown_type_text(&kind)),
                }
            }
        }

        _ => html("Unknown command. Send /help for the list."),
    }
}

const NOT_REGISTERED: &str = "This chat is not registered. Send /start first.";

async fn page_reply(state: &AppState, token: CallbackToken) -> Reply {
    match render_token(state, token).await {
        Ok(page) => Reply::Keyboard(page.html, page.keyboard),
        Err(e) => html(render_error_text(&e)),
    }
}

fn help_text(is_admin: bool) -> String {
    let mut body = String::from(
        "📣 <b>Herald</b>\n\n\
<b>Commands:</b>\n\
/start - Register this chat\n\
/help - Show this message\n\
/status - Registration and subscriptions\n\
/types - Notification types\n\
/notify_on &lt;type&gt; - Subscribe this chat\n\
/notify_off &lt;type&gt; - Unsubscribe this chat\n\
/stop - Remove this chat",
    );
    if is_admin {
        body.push_str(
            "\n\n<b>Admin:</b>\n\
/get_data &lt;table&gt; | -list - Browse a table\n\
/find_data &lt;table&gt; &lt;field&gt; &lt;value&gt; - Search a table\n\
/del_chat &lt;chat id&gt; - Remove a chat\n\
/broadcast &lt;type&gt; &lt;text&gt; - Notify subscribers\n\
/add_notify_subscriber &lt;chat id&gt; &lt;type&gt; - Subscribe a chat\n\
/del_notify_subscriber &lt;chat id&gt; &lt;type&gt; - Unsubscribe a chat\n\
/add_admin &lt;user id&gt; - Grant admin rights\n\
/del_admin &lt;user id&gt; - Revoke admin rights",
        );
    }
    body
}

fn status_text(roster: &Roster, chat_id: ChatId) -> String {
    let Some(status) = roster.chat_status(chat_id) else {
        return NOT_REGISTERED.to_string();
    };
    let subscriptions = if status.subscriptions.is_empty() {
        "none".to_string()
    } else {
        status
            .subscriptions
            .iter()
            .map(|s| escape_html(s))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "📊 <b>Chat status</b>\n\nChat: <code>{}</code> ({})\nSubscriptions: {subscriptions}",
        status.id.0, status.kind
    )
}

fn types_text(roster: &Roster) -> String {
    let types = roster.notification_types();
    if types.is_empty() {
        return "No notification types yet.".to_string();
    }
    let mut lines = vec!["🔔 <b>Notification types</b>\n".to_string()];
    for (name, description) in types {
        if description.is_empty() {
            lines.push(format!("• <b>{}</b>", escape_html(&name)));
        } else {
            lines.push(format!(
                "• <b>{}</b> - {}",
                escape_html(&name),
                escape_html(&description)
            ));
        }
    }
    lines.join("\n")
}

fn unknown_type_text(kind: &str) -> String {
    format!(
        "Unknown notification type <b>{}</b>. See /types.",
        escape_html(kind)
    )
}

fn tables_text() -> String {
    let mut lines = vec!["🗂 <b>Tables</b>\n".to_string()];
    lines.extend(
        EntityKind::ALL
            .iter()
            .map(|k| format!("• <code>{}</code>", k.table_name())),
    );
    lines.join("\n")
}

fn broadcast_text(report: &FanoutReport) -> String {
    let mut lines = vec![format!("📣 {}", report.summary())];
    if !report.failed.is_empty() {
        lines.push(String::new());
        lines.push("<b>Failed:</b>".to_string());
        for (recipient, reason) in report.failed.iter().take(MAX_LISTED_FAILURES) {
            lines.push(format!(
                "• <code>{}</code>: {}",
                recipient.0,
                escape_html(&reason.to_string())
            ));
        }
        if report.failed.len() > MAX_LISTED_FAILURES {
            lines.push(format!(
                "… and {} more",
                report.failed.len() - MAX_LISTED_FAILURES
            ));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::testing::{self, Sent, ADMIN};
    use herald_core::{fanout::FailureReason, notify::SubscriberDirectory, paging::PagedQuery};

    fn private(id: i64) -> Invocation {
        Invocation {
            chat: NewChat {
                id: ChatId(id),
                kind: ChatKind::Private,
                title: format!("user{id}"),
                user: Some(UserProfile {
                    user_id: UserId(id),
                    first_name: format!("user{id}"),
                    last_name: None,
                }),
            },
            user_id: id,
        }
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Html(s) | Reply::Keyboard(s, _) => s,
        }
    }

    #[test]
    fn parses_commands_with_bot_suffix() {
        assert_eq!(
            parse_command("/get_data@herald_bot chats"),
            ("get_data".to_string(), "chats".to_string())
        );
        assert_eq!(
            parse_command("/FIND_DATA chats title ops team"),
            ("find_data".to_string(), "chats title ops team".to_string())
        );
        assert_eq!(parse_command("/start"), ("start".to_string(), String::new()));
    }

    #[tokio::test]
    async fn start_registers_once_and_subscriptions_follow() {
        let (state, _) = testing::state();
        let me = private(7);

        assert!(text(run_command(&state, &me, "start", "").await).contains("now registered"));
        assert!(text(run_command(&state, &me, "start", "").await).contains("already registered"));

        let on = text(run_command(&state, &me, "notify_on", "Alerts").await);
        assert!(on.contains("Subscribed to <b>alerts</b>"));
        let status = text(run_command(&state, &me, "status", "").await);
        assert!(status.contains("Subscriptions: alerts"));

        let unknown = text(run_command(&state, &me, "notify_on", "weather").await);
        assert!(unknown.contains("Unknown notification type"));

        let off = text(run_command(&state, &me, "notify_off", "alerts").await);
        assert!(off.contains("Unsubscribed"));

        let stop = text(run_command(&state, &me, "stop", "").await);
        assert!(stop.contains("removed"));
        assert_eq!(text(run_command(&state, &me, "status", "").await), NOT_REGISTERED);
        state.pool.shutdown();
    }

    #[tokio::test]
    async fn admin_commands_are_refused_to_others() {
        let (state, _) = testing::state();
        for cmd in [
            "get_data",
            "find_data",
            "del_chat",
            "broadcast",
            "add_admin",
            "del_admin",
            "add_notify_subscriber",
            "del_notify_subscriber",
        ] {
            let reply = text(run_command(&state, &private(7), cmd, "chats").await);
            assert!(reply.contains("administrators only"), "{cmd}");
        }
        assert!(!help_text(false).contains("/broadcast"));
        assert!(help_text(true).contains("/broadcast"));
    }

    #[tokio::test]
    async fn get_data_renders_the_first_page() {
        let (state, _) = testing::state();
        for id in 1..=25 {
            state.roster.register_chat(private(id).chat);
        }

        let admin = private(ADMIN);
        assert!(text(run_command(&state, &admin, "get_data", "-list").await).contains("notification_subscribers"));
        assert!(text(run_command(&state, &admin, "get_data", "nope").await).contains("Unknown table"));

        let Reply::Keyboard(body, keyboard) = run_command(&state, &admin, "get_data", "chats").await
        else {
            panic!("expected a keyboard reply");
        };
        assert!(body.contains("Records 1-20 of 25"));
        let next = keyboard.buttons().last().unwrap();
        assert_eq!(next.label, "▶");
        assert_eq!(next.callback_data, "h1|v|c|1|");
        state.pool.shutdown();
    }

    #[tokio::test]
    async fn find_data_checks_the_field() {
        let (state, _) = testing::state();
        state.roster.register_chat(private(1).chat);
        let admin = private(ADMIN);

        let bad = text(run_command(&state, &admin, "find_data", "chats color red").await);
        assert!(bad.contains("has no field"));

        let usage = text(run_command(&state, &admin, "find_data", "chats title").await);
        assert!(usage.starts_with("Usage"));

        let hit = text(run_command(&state, &admin, "find_data", "chats title USER1").await);
        assert!(hit.contains("Search in chats"));
        assert!(hit.contains("Records 1-1 of 1"));
        state.pool.shutdown();
    }

    #[tokio::test]
    async fn del_chat_asks_for_confirmation() {
        let (state, _) = testing::state();
        state.roster.register_chat(private(5).chat);
        let admin = private(ADMIN);

        let Reply::Keyboard(body, keyboard) = run_command(&state, &admin, "del_chat", "5").await
        else {
            panic!("expected a keyboard reply");
        };
        assert!(body.contains("Delete chat <code>5</code>"));
        assert_eq!(keyboard.rows[0][0].callback_data, "h1|d|c|0|5");
        // Nothing is removed until the button is pressed.
        assert!(state.roster.chat_status(ChatId(5)).is_some());

        let missing = text(run_command(&state, &admin, "del_chat", "6").await);
        assert!(missing.contains("not registered"));
    }

    #[tokio::test]
    async fn broadcast_reports_the_summary() {
        let (state, messenger) = testing::state();
        for id in [1, 2] {
            state.roster.register_chat(private(id).chat);
            state
                .roster
                .subscribe(ChatId(id), "alerts", UserId(id))
                .unwrap();
        }
        let admin = private(ADMIN);

        let reply = text(run_command(&state, &admin, "broadcast", "alerts disk is full").await);
        assert!(reply.contains("Delivered to 2/2 recipients"));

        let sent = messenger.take();
        let delivered: Vec<_> = sent
            .iter()
            .filter_map(|s| match s {
                Sent::Html(chat, body) if body.contains("disk is full") => Some(*chat),
                _ => None,
            })
            .collect();
        assert_eq!(delivered.len(), 2);

        let unknown = text(run_command(&state, &admin, "broadcast", "weather sunny").await);
        assert!(unknown.contains("Unknown notification type"));
        state.pool.shutdown();
    }

    #[tokio::test]
    async fn granted_admins_can_use_admin_commands() {
        let (state, _) = testing::state();
        let admin = private(ADMIN);
        let eve = private(7);

        let missing = text(run_command(&state, &admin, "add_admin", "7").await);
        assert!(missing.contains("not registered"));

        run_command(&state, &eve, "start", "").await;
        let granted = text(run_command(&state, &admin, "add_admin", "7").await);
        assert!(granted.contains("now an administrator"));
        assert!(text(run_command(&state, &admin, "add_admin", "7").await).contains("already"));

        let tables = text(run_command(&state, &eve, "get_data", "-list").await);
        assert!(tables.contains("administrators"));
        assert_eq!(
            state
                .roster
                .fetch_page(EntityKind::Administrator, 0, 15)
                .unwrap()
                .total,
            1
        );

        let revoked = text(run_command(&state, &admin, "del_admin", "7").await);
        assert!(revoked.contains("no longer an administrator"));
        let refused = text(run_command(&state, &eve, "get_data", "-list").await);
        assert!(refused.contains("administrators only"));
    }

    #[tokio::test]
    async fn configured_admins_cannot_be_revoked() {
        let (state, _) = testing::state();
        let admin = private(ADMIN);
        let reply = text(run_command(&state, &admin, "del_admin", &ADMIN.to_string()).await);
        assert!(reply.contains("cannot be removed"));
        assert!(state.is_admin(ADMIN));

        let usage = text(run_command(&state, &admin, "add_admin", "someone").await);
        assert!(usage.starts_with("Usage"));
    }

    #[tokio::test]
    async fn admins_manage_other_chats_subscriptions() {
        let (state, _) = testing::state();
        let admin = private(ADMIN);
        state.roster.register_chat(private(5).chat);

        let added = text(run_command(&state, &admin, "add_notify_subscriber", "5 Alerts").await);
        assert!(added.contains("subscribed to <b>alerts</b>"));
        assert_eq!(state.roster.subscribers("alerts").unwrap(), vec![ChatId(5)]);
        let again = text(run_command(&state, &admin, "add_notify_subscriber", "5 alerts").await);
        assert!(again.contains("already subscribed"));

        let unknown = text(run_command(&state, &admin, "add_notify_subscriber", "5 weather").await);
        assert!(unknown.contains("Unknown notification type"));
        let stranger = text(run_command(&state, &admin, "add_notify_subscriber", "6 alerts").await);
        assert!(stranger.contains("not registered"));
        let usage = text(run_command(&state, &admin, "del_notify_subscriber", "5").await);
        assert!(usage.starts_with("Usage: /del_notify_subscriber"));

        let removed = text(run_command(&state, &admin, "del_notify_subscriber", "5 alerts").await);
        assert!(removed.contains("unsubscribed"));
        assert!(state.roster.subscribers("alerts").unwrap().is_empty());
        let not_there = text(run_command(&state, &admin, "del_notify_subscriber", "5 alerts").await);
        assert!(not_there.contains("is not subscribed"));
    }

    #[test]
    fn broadcast_text_lists_failures() {
        let report = FanoutReport {
            delivered_count: 1,
            failed: vec![(ChatId(9), FailureReason::Blocked)],
        };
        let body = broadcast_text(&report);
        assert!(body.starts_with("📣 Delivered to 1/2 recipients"));
        assert!(body.contains("<code>9</code>: blocked"));
    }
}
