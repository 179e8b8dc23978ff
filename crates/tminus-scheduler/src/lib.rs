//! In-memory job scheduler for tminus.
//!
//! This crate provides a process-local scheduler that:
//! - Keys every job by a deterministic [`JobKey`], so callers can replace,
//!   modify, or cancel jobs without keeping a separate id table
//! - Supports daily (UTC hour:minute until an end instant) and one-shot triggers
//! - Skips daily occurrences that are more than an hour late, but always runs
//!   one-shot jobs, however late
//! - Holds no state across restarts; owners rebuild jobs from their own records

mod clock;
mod error;
mod scheduler;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SchedulerError;
pub use scheduler::{JobAction, Scheduler, job_action};
pub use types::{DAILY_MISFIRE_GRACE_SECS, JobKey, JobSnapshot, Trigger};
