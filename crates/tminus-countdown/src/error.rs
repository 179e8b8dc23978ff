//! Error types for countdown operations.

use thiserror::Error;

use crate::OwnerId;
use crate::render::UNEXPECTED_ERROR_TEXT;
use crate::validate::MAX_NAME_CHARS;

/// Errors from the countdown record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A countdown with this name already exists for the owner.
    #[error("countdown already exists: {owner_id}/{name}")]
    Conflict { owner_id: OwnerId, name: String },
}

/// Errors from the notification channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The channel asked us to slow down and retries ran out.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited { retry_after_secs: Option<u64> },

    /// The recipient can't be reached (blocked the bot, deactivated, ...).
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from countdown lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Record store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Scheduler error.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tminus_scheduler::SchedulerError),

    /// Owner already has a countdown with this name.
    #[error("countdown name already taken: {0}")]
    NameTaken(String),

    /// Name exceeds the length limit.
    #[error("countdown name is {len} characters, limit is {max}", max = MAX_NAME_CHARS)]
    NameTooLong { len: usize },

    /// Name contains characters outside the allowed set.
    #[error("countdown name contains invalid characters: {0}")]
    InvalidName(String),

    /// Target instant is malformed or not far enough in the future.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Timezone name is not a known IANA zone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No countdown with this name exists for the owner.
    #[error("countdown not found: {owner_id}/{name}")]
    NotFound { owner_id: OwnerId, name: String },

    /// A record that should exist was missing.
    #[error("record inconsistency during {operation}: {owner_id}/{name} missing")]
    RecordInconsistency {
        owner_id: OwnerId,
        name: String,
        operation: &'static str,
    },
}

impl LifecycleError {
    /// Text to show the user. Validation failures get a specific hint;
    /// everything else gets one generic apology.
    pub fn user_message(&self) -> String {
        match self {
            Self::NameTaken(_) => {
                "You already have a countdown with this name. Try another name.".to_string()
            }
            Self::NameTooLong { .. } => format!(
                "Sorry, your countdown name cannot be longer than {MAX_NAME_CHARS} characters. \
                 Please type another name."
            ),
            Self::InvalidName(_) => "Sorry, you can't have special symbols in the countdown name. \
                 Please type the countdown name again."
                .to_string(),
            Self::InvalidTimestamp(_) => "Um, are you sure you typed the date correctly? Please \
                 double check that you provided a future date and time in the correct format \
                 and try again."
                .to_string(),
            Self::InvalidTimezone(_) => {
                "Sorry, I don't recognize that time zone. Please try again.".to_string()
            }
            Self::NotFound { .. } => {
                "Sorry, I couldn't find that countdown. It may have already ended.".to_string()
            }
            Self::Store(_) | Self::Scheduler(_) | Self::RecordInconsistency { .. } => {
                UNEXPECTED_ERROR_TEXT.to_string()
            }
        }
    }
}
