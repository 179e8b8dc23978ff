//! Telegram Bot API notifier.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tminus_countdown::{Notifier, NotifyError, OwnerId};
use tracing::{info, warn};

/// Public Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Total `sendMessage` attempts when rate limited.
const MAX_ATTEMPTS: u32 = 5;

/// Wait used when a 429 carries no `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Deserialize)]
struct ApiError {
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Sends notifications as HTML messages through a Telegram bot.
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: DEFAULT_API_URL.to_string(),
            token: token.into(),
        }
    }

    /// Point the notifier at another Bot API server.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.api_url.trim_end_matches('/'),
            self.token,
            method
        )
    }

    async fn send_once(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&SendMessage {
                chat_id,
                text,
                parse_mode: "HTML",
            })
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error: Option<ApiError> = response.json().await.ok();
        let retry_after_secs = error
            .as_ref()
            .and_then(|e| e.parameters.as_ref())
            .and_then(|p| p.retry_after);
        let description = error
            .and_then(|e| e.description)
            .unwrap_or_else(|| status.to_string());

        match status {
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Err(NotifyError::RateLimited { retry_after_secs })
            }
            reqwest::StatusCode::FORBIDDEN => Err(NotifyError::Rejected(description)),
            _ => Err(NotifyError::Transport(format!(
                "sendMessage failed ({}): {}",
                status, description
            ))),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, owner_id: OwnerId, text: &str) -> Result<(), NotifyError> {
        let mut attempt = 1;
        loop {
            match self.send_once(owner_id.0, text).await {
                Err(NotifyError::RateLimited { retry_after_secs }) if attempt < MAX_ATTEMPTS => {
                    let wait = retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    warn!(
                        owner = %owner_id,
                        attempt,
                        retry_after_secs = wait,
                        "rate limited by Telegram, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Err(NotifyError::Rejected(reason)) => {
                    // Blocked bot or deactivated account
                    info!(owner = %owner_id, reason = %reason, "recipient unreachable");
                    return Err(NotifyError::Rejected(reason));
                }
                result => return result,
            }
        }
    }
}
