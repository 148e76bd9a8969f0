use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use herald_core::{
    callback::CallbackCodec,
    config::Config,
    domain::UserId,
    executor::PoolRegistry,
    fanout::{FanoutDispatcher, FanoutSettings, MessengerTransport},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    notify::NotificationService,
    roster::Roster,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub roster: Arc<Roster>,
    pub pool: Arc<PoolRegistry>,
    pub dispatcher: Arc<FanoutDispatcher>,
    pub notifier: Arc<NotificationService>,
    pub codec: CallbackCodec,
}

impl AppState {
    /// Wire the fan-out stack on top of `messenger`.
    pub fn new(
        cfg: Arc<Config>,
        messenger: Arc<dyn MessagingPort>,
        roster: Arc<Roster>,
        pool: Arc<PoolRegistry>,
        fanout: FanoutSettings,
    ) -> Self {
        let transport = Arc::new(MessengerTransport::new(messenger.clone()));
        let dispatcher = Arc::new(FanoutDispatcher::new(pool.clone(), transport, fanout));
        let notifier = Arc::new(NotificationService::new(
            roster.clone(),
            dispatcher.clone(),
        ));
        let codec = CallbackCodec::with_limit(messenger.capabilities().max_callback_data_len);

        Self {
            cfg,
            messenger,
            roster,
            pool,
            dispatcher,
            notifier,
            codec,
        }
    }

    /// Configured administrators can never be locked out; others are granted
    /// through the roster.
    pub fn is_configured_admin(&self, user_id: i64) -> bool {
        herald_core::security::is_authorized(Some(UserId(user_id)), &self.cfg.admin_users)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.is_configured_admin(user_id) || self.roster.is_admin(UserId(user_id))
    }
}

pub fn new_bot(cfg: &Config) -> Bot {
    Bot::new(cfg.telegram_bot_token.clone())
}

/// Telegram messenger behind the throttle, and the state built on it.
///
/// The broadcast size bound is lowered to what the throttle can send before
/// the broadcast deadline.
pub fn build_state(
    bot: Bot,
    cfg: Arc<Config>,
    roster: Arc<Roster>,
    pool: Arc<PoolRegistry>,
) -> Arc<AppState> {
    // Broadcasts hit many chats at once; spacing the calls keeps most of them
    // clear of 429s. The adapter still retries a single RetryAfter.
    let throttle = ThrottleConfig::default();
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot));
    let messenger: Arc<dyn MessagingPort> =
        Arc::new(ThrottledMessenger::new(raw_messenger, throttle));

    let fanout = FanoutSettings::from_config(&cfg).fit_to_rate(throttle.global_min_interval);
    Arc::new(AppState::new(cfg, messenger, roster, pool, fanout))
}

pub async fn run_polling(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!(bot = %me.username(), "herald started"),
        Err(e) => tracing::warn!(error = %e, "could not fetch bot identity"),
    }
    tracing::info!(
        admins = state.cfg.admin_users.len(),
        workers = state.pool.settings().workers,
        max_recipients = state.dispatcher.settings().max_recipients,
        "configuration loaded"
    );

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use herald_core::{
        config::ExecutorConfig,
        domain::ChatId,
        executor::PoolSettings,
        roster::{ChatKind, NewChat, UserProfile},
    };

    use super::*;
    use crate::router::testing::{self, ADMIN};

    #[tokio::test]
    async fn broadcast_bound_fits_the_throttle() {
        let cfg = Arc::new(Config {
            telegram_bot_token: "1:test".to_string(),
            admin_users: vec![ADMIN],
            executor: ExecutorConfig::default(),
            delivery_timeout: Duration::from_secs(15),
            broadcast_timeout: Duration::from_secs(120),
            broadcast_max_recipients: 10_000,
            telegram_safe_limit: 4000,
            notification_types: vec!["alerts".to_string()],
            webhook: None,
        });
        let pool = Arc::new(PoolRegistry::new(PoolSettings::new(
            2,
            Duration::from_secs(1),
        )));
        let state = build_state(Bot::new("1:test"), cfg, Arc::new(Roster::new()), pool);

        let settings = state.dispatcher.settings();
        let sustainable =
            settings.sustainable_recipients(ThrottleConfig::default().global_min_interval);
        assert_eq!(settings.max_recipients, sustainable);
        assert!(settings.max_recipients < 10_000);
    }

    #[test]
    fn granted_admins_pass_the_check() {
        let (state, _) = testing::state();
        assert!(state.is_admin(ADMIN));
        assert!(!state.is_admin(7));

        state.roster.register_chat(NewChat {
            id: ChatId(7),
            kind: ChatKind::Private,
            title: "seven".to_string(),
            user: Some(UserProfile {
                user_id: UserId(7),
                first_name: "seven".to_string(),
                last_name: None,
            }),
        });
        state.roster.grant_admin(UserId(7), UserId(ADMIN)).unwrap();
        assert!(state.is_admin(7));
        assert!(!state.is_configured_admin(7));
    }
}
