use std::sync::Arc;

use herald_core::{
    config::Config,
    executor::{PoolRegistry, PoolSettings},
    roster::Roster,
};
use herald_telegram::router;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<(), herald_core::Error> {
    herald_core::logging::init("herald")?;

    let cfg = Arc::new(Config::load()?);

    let settings = PoolSettings::from_config(&cfg.executor);
    tracing::info!(
        workers = settings.workers,
        drain_timeout_ms = settings.drain_timeout.as_millis() as u64,
        "worker pool sized"
    );
    let pool = Arc::new(PoolRegistry::new(settings));

    let roster = Arc::new(Roster::new());
    for kind in &cfg.notification_types {
        roster.add_notification_type(kind, "");
    }

    let bot = router::new_bot(&cfg);
    let state = router::build_state(bot.clone(), cfg.clone(), roster, pool.clone());

    let (stop_webhook, stopped) = oneshot::channel::<()>();
    let webhook = cfg.webhook.clone().map(|hook| {
        let notifier = state.notifier.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stopped.await;
            };
            if let Err(e) = herald_webhook::serve(&hook, notifier, shutdown).await {
                tracing::error!(error = %e, "webhook server failed");
            }
        })
    });

    let result = router::run_polling(bot, state).await;

    let _ = stop_webhook.send(());
    if let Some(task) = webhook {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "webhook task panicked");
        }
    }

    // Draining blocks on worker threads; keep it off the runtime.
    let drained = tokio::task::spawn_blocking(move || pool.shutdown()).await;
    if let Err(e) = drained {
        tracing::error!(error = %e, "worker pool shutdown panicked");
    }

    result.map_err(|e| herald_core::Error::External(format!("telegram bot failed: {e}")))
}
