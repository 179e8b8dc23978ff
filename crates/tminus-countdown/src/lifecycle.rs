//! Countdown lifecycle: keeps scheduled jobs in step with stored records.
//!
//! Every operation runs validate, then store, then scheduler. The store is
//! the truth; jobs are a derived cache that [`CountdownLifecycle::recover_all`]
//! can rebuild at any time.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use tminus_scheduler::{Clock, JobAction, Scheduler, SchedulerError, Trigger, job_action};
use tracing::{debug, error, info, warn};

use crate::render::{UNEXPECTED_ERROR_TEXT, render_deleted, render_details, render_expired};
use crate::validate::{validate_name, validate_target};
use crate::{
    Countdown, CountdownJob, CountdownStore, CountdownUpdate, DisplayFormat, JobKind,
    LifecycleError, Notifier, OwnerId, StoreError, remaining_between,
};

/// Seconds after the target at which the expiry job runs.
pub const EXPIRE_BUFFER_SECS: i64 = 10;

/// When the expiry job for `target` runs.
fn expire_at(target: DateTime<Utc>) -> DateTime<Utc> {
    target + Duration::seconds(EXPIRE_BUFFER_SECS)
}

/// Store conflicts surface to users as a taken name.
fn conflict_as_taken(err: StoreError) -> LifecycleError {
    match err {
        StoreError::Conflict { name, .. } => LifecycleError::NameTaken(name),
        other => other.into(),
    }
}

fn not_found(owner_id: OwnerId, name: &str) -> LifecycleError {
    LifecycleError::NotFound {
        owner_id,
        name: name.to_string(),
    }
}

/// Orchestrates countdown create/edit/delete and the jobs each one owns.
///
/// A countdown with reminders on owns a daily reminder job and a one-shot
/// expiry job; with reminders off, only the expiry job. Job actions hold a
/// weak reference back to the lifecycle, so dropping the last [`Arc`] stops
/// them from doing anything.
pub struct CountdownLifecycle {
    this: Weak<Self>,
    store: Arc<dyn CountdownStore>,
    scheduler: Arc<Scheduler<CountdownJob>>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl CountdownLifecycle {
    pub fn new(
        store: Arc<dyn CountdownStore>,
        scheduler: Arc<Scheduler<CountdownJob>>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            store,
            scheduler,
            notifier,
            clock,
        })
    }

    pub fn store(&self) -> &Arc<dyn CountdownStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler<CountdownJob>> {
        &self.scheduler
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a countdown and register its jobs.
    #[tracing::instrument(
        skip_all,
        err,
        fields(owner = %countdown.owner_id, name = %countdown.name)
    )]
    pub async fn create(&self, countdown: Countdown) -> Result<(), LifecycleError> {
        let existing = self.store.list_names(countdown.owner_id).await?;
        validate_name(&countdown.name, &existing)?;
        validate_target(countdown.target, self.now())?;

        self.store
            .insert(countdown.clone())
            .await
            .map_err(conflict_as_taken)?;
        self.register_jobs(&countdown)?;

        info!(
            at = %countdown.target,
            reminders = countdown.reminders,
            "created countdown"
        );
        Ok(())
    }

    /// Rename a countdown, moving its jobs to the new keys.
    #[tracing::instrument(skip_all, err, fields(owner = %owner_id, name = %old_name))]
    pub async fn rename(
        &self,
        owner_id: OwnerId,
        old_name: &str,
        new_name: &str,
    ) -> Result<Countdown, LifecycleError> {
        let existing = self.store.list_names(owner_id).await?;
        validate_name(new_name, &existing)?;

        let updated = self
            .store
            .update(owner_id, old_name, CountdownUpdate::rename(new_name))
            .await
            .map_err(conflict_as_taken)?
            .ok_or_else(|| not_found(owner_id, old_name))?;

        self.scheduler.cancel(JobKind::Reminder.key(owner_id, old_name));
        self.scheduler.cancel(JobKind::Expire.key(owner_id, old_name));
        self.register_jobs(&updated)?;

        info!(new_name, "renamed countdown");
        Ok(updated)
    }

    /// Move a countdown to a new target and retime its jobs.
    #[tracing::instrument(skip_all, err, fields(owner = %owner_id, name = %name))]
    pub async fn reschedule(
        &self,
        owner_id: OwnerId,
        name: &str,
        new_target: DateTime<Utc>,
    ) -> Result<Countdown, LifecycleError> {
        validate_target(new_target, self.now())?;

        let updated = self
            .store
            .update(owner_id, name, CountdownUpdate::target(new_target))
            .await?
            .ok_or_else(|| not_found(owner_id, name))?;

        if updated.reminders {
            let key = JobKind::Reminder.key(owner_id, name);
            let (hour, minute) = updated.reminder_time();
            let trigger = Trigger::daily(hour, minute, updated.target)?;

            // Payload first: a retimed trigger with no occurrence left removes the job.
            let retimed = self
                .scheduler
                .modify(key, updated.reminder_payload())
                .and_then(|()| self.scheduler.reschedule(key, trigger));
            match retimed {
                Ok(()) => {}
                Err(SchedulerError::JobNotFound(_)) => {
                    warn!("reminder job missing, registering from record");
                    self.register_reminder(&updated)?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let key = JobKind::Expire.key(owner_id, name);
        match self
            .scheduler
            .reschedule(key, Trigger::once(expire_at(updated.target)))
        {
            Ok(()) => {}
            Err(SchedulerError::JobNotFound(_)) => {
                warn!("expiry job missing, registering from record");
                self.register_expire(&updated);
            }
            Err(e) => return Err(e.into()),
        }

        info!(at = %updated.target, "rescheduled countdown");
        Ok(updated)
    }

    /// Switch how reminders lay out the remaining time.
    #[tracing::instrument(skip_all, err, fields(owner = %owner_id, name = %name))]
    pub async fn change_format(
        &self,
        owner_id: OwnerId,
        name: &str,
        format: DisplayFormat,
    ) -> Result<Countdown, LifecycleError> {
        let updated = self
            .store
            .update(owner_id, name, CountdownUpdate::format(format))
            .await?
            .ok_or_else(|| not_found(owner_id, name))?;

        if updated.reminders
            && let Err(e) = self.scheduler.modify(
                JobKind::Reminder.key(owner_id, name),
                updated.reminder_payload(),
            )
        {
            debug!(error = %e, "no reminder job to update");
        }

        info!(%format, "changed countdown format");
        Ok(updated)
    }

    /// Turn daily reminders on or off.
    #[tracing::instrument(skip_all, err, fields(owner = %owner_id, name = %name))]
    pub async fn set_reminders(
        &self,
        owner_id: OwnerId,
        name: &str,
        enabled: bool,
    ) -> Result<Countdown, LifecycleError> {
        let updated = self
            .store
            .update(owner_id, name, CountdownUpdate::reminders(enabled))
            .await?
            .ok_or_else(|| not_found(owner_id, name))?;

        if enabled {
            self.register_reminder(&updated)?;
        } else {
            self.scheduler.cancel(JobKind::Reminder.key(owner_id, name));
        }

        info!(enabled, "set countdown reminders");
        Ok(updated)
    }

    /// Delete a countdown at the owner's request.
    ///
    /// Both job keys are cancelled even when no record was found.
    #[tracing::instrument(skip_all, err, fields(owner = %owner_id, name = %name))]
    pub async fn delete(&self, owner_id: OwnerId, name: &str) -> Result<Countdown, LifecycleError> {
        let deleted = self.store.delete(owner_id, name).await?;

        self.scheduler.cancel(JobKind::Reminder.key(owner_id, name));
        self.scheduler.cancel(JobKind::Expire.key(owner_id, name));

        let countdown = deleted.ok_or_else(|| not_found(owner_id, name))?;
        self.notify(owner_id, &render_deleted(name)).await;

        info!("deleted countdown");
        Ok(countdown)
    }

    /// Retire a countdown whose target has passed.
    ///
    /// Runs from the expiry job. A missing record means the store and the
    /// jobs disagreed; the owner gets an apology instead of the usual notice.
    #[tracing::instrument(skip_all, err, fields(owner = %owner_id, name = %name))]
    pub async fn expire(&self, owner_id: OwnerId, name: &str) -> Result<(), LifecycleError> {
        self.scheduler.cancel(JobKind::Reminder.key(owner_id, name));
        self.scheduler.cancel(JobKind::Expire.key(owner_id, name));

        match self.store.delete(owner_id, name).await {
            Ok(Some(_)) => {
                self.notify(owner_id, &render_expired(name)).await;
                info!("countdown expired");
                Ok(())
            }
            Ok(None) => {
                let err = LifecycleError::RecordInconsistency {
                    owner_id,
                    name: name.to_string(),
                    operation: "expire",
                };
                error!(error = %err, "UNEXPECTED: expiring countdown has no record");
                self.notify(owner_id, UNEXPECTED_ERROR_TEXT).await;
                Err(err)
            }
            Err(e) => {
                error!(error = %e, "failed to delete expired countdown");
                self.notify(owner_id, UNEXPECTED_ERROR_TEXT).await;
                Err(e.into())
            }
        }
    }

    /// Render a countdown the way its reminder would.
    pub async fn details(&self, owner_id: OwnerId, name: &str) -> Result<String, LifecycleError> {
        let countdown = self
            .store
            .find(owner_id, name)
            .await?
            .ok_or_else(|| not_found(owner_id, name))?;

        Ok(render_details(
            &countdown.name,
            &remaining_between(countdown.target, self.now()),
            countdown.format,
        ))
    }

    /// Names of the owner's countdowns.
    pub async fn names(&self, owner_id: OwnerId) -> Result<Vec<String>, LifecycleError> {
        Ok(self.store.list_names(owner_id).await?)
    }

    /// Register both jobs for `countdown`. Returns whether a reminder was registered.
    fn register_jobs(&self, countdown: &Countdown) -> Result<bool, LifecycleError> {
        let reminder = countdown.reminders && self.register_reminder(countdown)?;
        self.register_expire(countdown);
        Ok(reminder)
    }

    /// Register the daily reminder. Returns `false` if no occurrence remains
    /// before the target.
    pub(crate) fn register_reminder(&self, countdown: &Countdown) -> Result<bool, LifecycleError> {
        let (hour, minute) = countdown.reminder_time();
        let first = self.scheduler.schedule_recurring(
            JobKind::Reminder.key(countdown.owner_id, &countdown.name),
            countdown.reminder_payload(),
            hour,
            minute,
            countdown.target,
            self.job_handler(),
        )?;
        Ok(first.is_some())
    }

    pub(crate) fn register_expire(&self, countdown: &Countdown) -> DateTime<Utc> {
        self.scheduler.schedule_once(
            JobKind::Expire.key(countdown.owner_id, &countdown.name),
            countdown.expire_payload(),
            expire_at(countdown.target),
            self.job_handler(),
        )
    }

    fn job_handler(&self) -> JobAction<CountdownJob> {
        let this = self.this.clone();
        job_action(move |job: CountdownJob| {
            let this = this.clone();
            async move {
                let Some(lifecycle) = this.upgrade() else {
                    return Err("countdown lifecycle is gone".to_string());
                };
                lifecycle.handle(job).await
            }
        })
    }

    async fn handle(&self, job: CountdownJob) -> Result<(), String> {
        match job {
            CountdownJob::Reminder {
                owner_id,
                name,
                target,
                format,
            } => {
                let text = render_details(&name, &remaining_between(target, self.now()), format);
                debug!(owner = %owner_id, name = %name, "sending reminder");
                self.notify(owner_id, &text).await;
                Ok(())
            }
            CountdownJob::Expire { owner_id, name } => self
                .expire(owner_id, &name)
                .await
                .map_err(|e| e.to_string()),
        }
    }

    async fn notify(&self, owner_id: OwnerId, text: &str) {
        if let Err(e) = self.notifier.deliver(owner_id, text).await {
            warn!(owner = %owner_id, error = %e, "failed to deliver notification");
        }
    }
}
