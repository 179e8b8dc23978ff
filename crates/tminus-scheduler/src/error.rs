//! Error types for the scheduler.

use thiserror::Error;

use crate::JobKey;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No job is registered under the key.
    #[error("job not found: {0}")]
    JobNotFound(JobKey),

    /// Trigger parameters are out of range.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}
