//! Countdown lifecycle for tminus.
//!
//! This crate provides:
//! - The countdown record model and the store it lives in
//! - Time-remaining math and the reminder text built from it
//! - Name, timestamp, and timezone validation
//! - The lifecycle service that keeps reminder and expiry jobs in step with
//!   each record, and the startup recovery that rebuilds them

mod error;
mod lifecycle;
mod model;
mod notify;
mod recovery;
pub mod render;
mod store;
pub mod time_math;
pub mod validate;

pub use error::{LifecycleError, NotifyError, StoreError};
pub use lifecycle::{CountdownLifecycle, EXPIRE_BUFFER_SECS};
pub use model::{Countdown, CountdownJob, CountdownUpdate, DisplayFormat, JobKind, OwnerId};
pub use notify::{LogNotifier, Notifier};
pub use recovery::RecoveryReport;
pub use store::{CountdownStore, JsonFileStore, MemoryStore};
pub use time_math::{Remaining, TimeUnit, remaining, remaining_between};
