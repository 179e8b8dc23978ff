//! Daemon command: restore countdown jobs and run the scheduler.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use tminus_countdown::{
    CountdownJob, CountdownLifecycle, JsonFileStore, LogNotifier, Notifier, OwnerId,
};
use tminus_scheduler::{Clock, Scheduler, SystemClock};
use tracing::{error, info, warn};

use crate::telegram::TelegramNotifier;

const STARTUP_NOTICE: &str = "Bot has started.";
const SHUTDOWN_NOTICE: &str = "Bot has stopped.";

/// Configuration for the daemon.
pub struct DaemonConfig {
    pub store_path: PathBuf,
    /// Without a token, notifications only go to the log.
    pub telegram_token: Option<String>,
    pub telegram_api_url: Option<String>,
    /// Chat that receives startup and shutdown notices.
    pub admin_chat: Option<i64>,
}

fn build_notifier(config: &DaemonConfig) -> Arc<dyn Notifier> {
    match &config.telegram_token {
        Some(token) => {
            let mut notifier = TelegramNotifier::new(token.clone());
            if let Some(api_url) = &config.telegram_api_url {
                notifier = notifier.with_api_url(api_url.clone());
            }
            Arc::new(notifier)
        }
        None => {
            warn!("no Telegram token configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}

async fn notify_admin(notifier: &dyn Notifier, admin_chat: Option<i64>, text: &str) {
    let Some(chat) = admin_chat else {
        return;
    };
    if let Err(e) = notifier.deliver(OwnerId(chat), text).await {
        warn!(admin = chat, error = %e, "failed to notify admin");
    }
}

/// Run until Ctrl-C.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let store = JsonFileStore::open(&config.store_path)
        .await
        .map_err(|e| {
            miette::miette!(
                "failed to open countdown store {}: {}",
                config.store_path.display(),
                e
            )
        })?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler: Arc<Scheduler<CountdownJob>> = Arc::new(Scheduler::new(clock.clone()));
    let notifier = build_notifier(&config);
    let lifecycle = CountdownLifecycle::new(
        Arc::new(store),
        scheduler.clone(),
        notifier.clone(),
        clock,
    );

    let report = lifecycle
        .recover_all()
        .await
        .map_err(|e| miette::miette!("failed to recover countdown jobs: {}", e))?;
    info!(
        countdowns = report.countdowns,
        jobs = scheduler.len(),
        "daemon starting"
    );

    let scheduler_handle = scheduler.start();
    notify_admin(notifier.as_ref(), config.admin_chat, STARTUP_NOTICE).await;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("failed to listen for shutdown signal: {}", e))?;
    info!("received shutdown signal");

    scheduler.shutdown().await;
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "scheduler task failed");
    }

    notify_admin(notifier.as_ref(), config.admin_chat, SHUTDOWN_NOTICE).await;
    drop(lifecycle);
    info!("daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(token: Option<&str>, api_url: Option<String>) -> DaemonConfig {
        DaemonConfig {
            store_path: PathBuf::from("countdowns.json"),
            telegram_token: token.map(str::to_string),
            telegram_api_url: api_url,
            admin_chat: Some(7),
        }
    }

    #[tokio::test]
    async fn test_admin_notice_goes_through_telegram() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottok/sendMessage"))
            .and(body_partial_json(json!({ "chat_id": 7, "text": STARTUP_NOTICE })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let config = config(Some("tok"), Some(server.uri()));
        let notifier = build_notifier(&config);
        notify_admin(notifier.as_ref(), config.admin_chat, STARTUP_NOTICE).await;
    }

    #[tokio::test]
    async fn test_no_admin_chat_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = build_notifier(&config(Some("tok"), Some(server.uri())));
        notify_admin(notifier.as_ref(), None, SHUTDOWN_NOTICE).await;
    }

    #[tokio::test]
    async fn test_missing_token_falls_back_to_log() {
        let notifier = build_notifier(&config(None, None));
        assert!(notifier.deliver(OwnerId(1), "hello").await.is_ok());
    }
}
