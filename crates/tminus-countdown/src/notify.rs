//! Outbound notification channel.

use async_trait::async_trait;
use tracing::info;

use crate::{NotifyError, OwnerId};

/// Delivers text to a countdown owner.
///
/// Implementations own their retry policy; callers treat delivery as
/// fire-and-forget and only log failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to `owner_id`.
    async fn deliver(&self, owner_id: OwnerId, text: &str) -> Result<(), NotifyError>;
}

/// Notifier that writes every delivery to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, owner_id: OwnerId, text: &str) -> Result<(), NotifyError> {
        info!(owner = %owner_id, text, "notification");
        Ok(())
    }
}
