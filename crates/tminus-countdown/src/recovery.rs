//! Startup recovery: rebuild every job from the stored records.

use tracing::{info, warn};

use crate::{CountdownLifecycle, LifecycleError};

/// What [`CountdownLifecycle::recover_all`] registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records found in the store.
    pub countdowns: usize,
    /// Daily reminder jobs registered.
    pub reminders: usize,
    /// Expiry jobs registered.
    pub expiries: usize,
}

impl CountdownLifecycle {
    /// Register the jobs of every stored countdown.
    ///
    /// Runs once at startup before any user input. Reminders are only
    /// registered for targets still ahead; every record gets an expiry job,
    /// so countdowns that ended while the process was down expire on the
    /// first dispatch pass. Failing to list the records is fatal.
    #[tracing::instrument(skip_all)]
    pub async fn recover_all(&self) -> Result<RecoveryReport, LifecycleError> {
        let countdowns = self.store().list_all().await?;
        let now = self.now();

        let mut report = RecoveryReport {
            countdowns: countdowns.len(),
            ..RecoveryReport::default()
        };

        for countdown in &countdowns {
            if countdown.reminders && countdown.target > now {
                match self.register_reminder(countdown) {
                    Ok(true) => report.reminders += 1,
                    Ok(false) => {}
                    Err(e) => warn!(
                        owner = %countdown.owner_id,
                        name = %countdown.name,
                        error = %e,
                        "failed to restore reminder"
                    ),
                }
            }

            self.register_expire(countdown);
            report.expiries += 1;
        }

        info!(
            countdowns = report.countdowns,
            reminders = report.reminders,
            expiries = report.expiries,
            "recovered countdown jobs"
        );
        Ok(report)
    }
}
