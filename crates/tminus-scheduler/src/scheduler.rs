//! Job scheduler implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{Clock, JobKey, JobSnapshot, SchedulerError, Trigger};

/// Minimum sleep duration between dispatch passes, in milliseconds.
const MIN_SLEEP_MILLIS: i64 = 100;

/// Maximum sleep duration between dispatch passes, in seconds.
const MAX_SLEEP_SECS: i64 = 60;

/// Callback run when a job fires.
pub type JobAction<P> =
    Arc<dyn Fn(P) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`JobAction`].
pub fn job_action<P, F, Fut>(f: F) -> JobAction<P>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}

struct ScheduledJob<P> {
    trigger: Trigger,
    payload: P,
    action: JobAction<P>,
    next_fire: DateTime<Utc>,
}

/// An occurrence taken off a job that was due.
struct Occurrence<P> {
    due_at: DateTime<Utc>,
    /// Payload and action to dispatch; `None` if the occurrence was too late.
    fire: Option<(P, JobAction<P>)>,
    /// The job has no occurrences left and must be removed.
    finished: bool,
}

impl<P: Clone> ScheduledJob<P> {
    fn take_due(&mut self, now: DateTime<Utc>) -> Option<Occurrence<P>> {
        if self.next_fire > now {
            return None;
        }

        let due_at = self.next_fire;
        let on_time = self
            .trigger
            .late_tolerance()
            .is_none_or(|grace| now - due_at <= grace);
        let next = self.trigger.next_fire_after(now);
        if let Some(next) = next {
            self.next_fire = next;
        }

        Some(Occurrence {
            due_at,
            fire: on_time.then(|| (self.payload.clone(), Arc::clone(&self.action))),
            finished: next.is_none(),
        })
    }

    fn snapshot(&self, key: JobKey) -> JobSnapshot<P> {
        JobSnapshot {
            key,
            trigger: self.trigger,
            payload: self.payload.clone(),
            next_fire: self.next_fire,
        }
    }
}

/// The job scheduler.
///
/// Jobs live in a [`DashMap`] keyed by [`JobKey`]: every operation on one key
/// runs under that key's shard lock, while different keys proceed
/// independently. Each due occurrence is dispatched as its own task.
pub struct Scheduler<P> {
    clock: Arc<dyn Clock>,
    jobs: DashMap<JobKey, ScheduledJob<P>>,
    in_flight: Mutex<JoinSet<()>>,
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
}

impl<P> Scheduler<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create a new scheduler reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            clock,
            jobs: DashMap::new(),
            in_flight: Mutex::new(JoinSet::new()),
            wake: Notify::new(),
            shutdown_tx,
        }
    }

    /// Register a daily job at `hour:minute` UTC until `end` (inclusive).
    ///
    /// Replaces any job under `key`. Returns the first fire time, or `None`
    /// when no occurrence remains before `end`; nothing is registered then.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub fn schedule_recurring(
        &self,
        key: JobKey,
        payload: P,
        hour: u32,
        minute: u32,
        end: DateTime<Utc>,
        on_fire: JobAction<P>,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        let trigger = Trigger::daily(hour, minute, end)?;
        Ok(self.upsert(key, trigger, payload, on_fire))
    }

    /// Register a one-shot job at `run_at`.
    ///
    /// Replaces any job under `key`. A `run_at` in the past fires on the next
    /// dispatch pass.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub fn schedule_once(
        &self,
        key: JobKey,
        payload: P,
        run_at: DateTime<Utc>,
        on_fire: JobAction<P>,
    ) -> DateTime<Utc> {
        let trigger = Trigger::once(run_at);
        // A one-shot trigger always has an occurrence.
        self.upsert(key, trigger, payload, on_fire).unwrap_or(run_at)
    }

    fn upsert(
        &self,
        key: JobKey,
        trigger: Trigger,
        payload: P,
        action: JobAction<P>,
    ) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        match trigger.first_fire(now) {
            Some(next_fire) => {
                let replaced = self
                    .jobs
                    .insert(
                        key,
                        ScheduledJob {
                            trigger,
                            payload,
                            action,
                            next_fire,
                        },
                    )
                    .is_some();
                debug!(%key, %trigger, %next_fire, replaced, "scheduled job");
                self.wake.notify_one();
                Some(next_fire)
            }
            None => {
                self.jobs.remove(&key);
                debug!(%key, %trigger, "trigger has no remaining occurrence, not scheduled");
                None
            }
        }
    }

    /// Replace the payload of a registered job without touching its trigger.
    pub fn modify(&self, key: JobKey, payload: P) -> Result<(), SchedulerError> {
        let mut job = self
            .jobs
            .get_mut(&key)
            .ok_or(SchedulerError::JobNotFound(key))?;
        job.payload = payload;
        debug!(%key, "modified job payload");
        Ok(())
    }

    /// Replace the trigger of a registered job.
    ///
    /// If the new trigger has no remaining occurrence the job is removed.
    pub fn reschedule(&self, key: JobKey, trigger: Trigger) -> Result<(), SchedulerError> {
        trigger.validate()?;
        let next = trigger.first_fire(self.clock.now());

        let mut found = false;
        self.jobs.remove_if_mut(&key, |_, job| {
            found = true;
            job.trigger = trigger;
            match next {
                Some(next_fire) => {
                    job.next_fire = next_fire;
                    false
                }
                None => true,
            }
        });

        if !found {
            return Err(SchedulerError::JobNotFound(key));
        }

        match next {
            Some(next_fire) => debug!(%key, %trigger, %next_fire, "rescheduled job"),
            None => debug!(%key, %trigger, "rescheduled job has no occurrence left, removed"),
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Remove a job. Returns whether one was registered; absent keys are fine.
    pub fn cancel(&self, key: JobKey) -> bool {
        let removed = self.jobs.remove(&key).is_some();
        if removed {
            debug!(%key, "cancelled job");
        }
        removed
    }

    /// Get a snapshot of the job under `key`.
    pub fn job(&self, key: JobKey) -> Option<JobSnapshot<P>> {
        self.jobs.get(&key).map(|job| job.snapshot(key))
    }

    /// Snapshot every registered job.
    pub fn jobs(&self) -> Vec<JobSnapshot<P>> {
        self.jobs
            .iter()
            .map(|entry| entry.value().snapshot(*entry.key()))
            .collect()
    }

    /// Whether a job is registered under `key`.
    pub fn contains(&self, key: JobKey) -> bool {
        self.jobs.contains_key(&key)
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are registered.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Earliest pending fire time across all jobs.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.jobs.iter().map(|entry| entry.next_fire).min()
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Dispatch every occurrence due as of the clock's current time.
    ///
    /// Returns the number of fires dispatched. Late daily occurrences that
    /// are skipped are not counted.
    pub async fn run_pending(&self) -> usize {
        if self.is_shut_down() {
            return 0;
        }

        let now = self.clock.now();
        let due: Vec<JobKey> = self
            .jobs
            .iter()
            .filter(|entry| entry.next_fire <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut in_flight = self.in_flight.lock().await;
        // shutdown() may have drained the set while we waited for the lock
        if self.is_shut_down() {
            return 0;
        }
        while let Some(result) = in_flight.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "job task panicked");
            }
        }

        let mut dispatched = 0;
        for key in due {
            let mut occurrence = None;
            // Taking the occurrence and removing a finished job happen under
            // the same shard lock, so a concurrent upsert is never dropped.
            self.jobs.remove_if_mut(&key, |_, job| {
                occurrence = job.take_due(now);
                occurrence.as_ref().is_some_and(|o| o.finished)
            });

            let Some(occurrence) = occurrence else {
                continue;
            };

            if occurrence.finished {
                debug!(%key, "job has no occurrences left, removed");
            }

            match occurrence.fire {
                Some((payload, action)) => {
                    let late_secs = (now - occurrence.due_at).num_seconds();
                    info!(%key, due_at = %occurrence.due_at, late_secs, "firing job");
                    in_flight.spawn(async move {
                        if let Err(e) = action(payload).await {
                            warn!(%key, error = %e, "job action failed");
                        }
                    });
                    dispatched += 1;
                }
                None => {
                    warn!(
                        %key,
                        due_at = %occurrence.due_at,
                        "occurrence missed by more than the grace period, skipped"
                    );
                }
            }
        }

        dispatched
    }

    /// How long the dispatch loop may sleep before the next pass.
    fn sleep_duration(&self) -> std::time::Duration {
        let max = Duration::seconds(MAX_SLEEP_SECS);
        let wait = match self.next_wakeup() {
            Some(next) => {
                (next - self.clock.now()).clamp(Duration::milliseconds(MIN_SLEEP_MILLIS), max)
            }
            None => max,
        };
        wait.to_std().unwrap_or(std::time::Duration::from_secs(MAX_SLEEP_SECS as u64))
    }

    /// Spawn the dispatch loop. It runs until [`Scheduler::shutdown`].
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    }

    async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(jobs = self.len(), "scheduler starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let fired = self.run_pending().await;
            if fired > 0 {
                debug!(fired, "dispatched due jobs");
            }

            let sleep_duration = self.sleep_duration();
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}
                _ = self.wake.notified() => {}
                _ = sleep(sleep_duration) => {}
            }
        }

        info!("scheduler shut down gracefully");
    }

    /// Wait for every dispatched fire to finish.
    pub async fn wait_idle(&self) {
        let mut in_flight = std::mem::take(&mut *self.in_flight.lock().await);
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "job task panicked");
            }
        }
    }

    /// Stop firing jobs. Fires already in flight run to completion.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        info!(jobs = self.len(), "scheduler shutting down");
        self.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 1, 8, 0, 0).unwrap()
    }

    fn setup() -> (Arc<ManualClock>, Arc<Scheduler<String>>) {
        let clock = Arc::new(ManualClock::new(start()));
        let scheduler = Arc::new(Scheduler::new(clock.clone() as Arc<dyn Clock>));
        (clock, scheduler)
    }

    fn counting_action(counter: Arc<AtomicUsize>) -> JobAction<String> {
        job_action(move |_payload: String| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), String>(())
            }
        })
    }

    fn recording_action(tx: mpsc::UnboundedSender<String>) -> JobAction<String> {
        job_action(move |payload: String| {
            let tx = tx.clone();
            async move {
                tx.send(payload).map_err(|e| e.to_string())
            }
        })
    }

    fn key(name: &str) -> JobKey {
        JobKey::derive("test", 1, name)
    }

    #[test]
    fn test_sleep_bounds() {
        assert_eq!(MIN_SLEEP_MILLIS, 100);
        assert_eq!(MAX_SLEEP_SECS, 60);
    }

    #[tokio::test]
    async fn test_schedule_once_fires_at_run_at() {
        let (clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(
            key("once"),
            "payload".to_string(),
            start() + Duration::minutes(5),
            counting_action(counter.clone()),
        );

        assert_eq!(scheduler.run_pending().await, 0);

        clock.advance(Duration::minutes(5));
        assert_eq!(scheduler.run_pending().await, 1);
        scheduler.wait_idle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.contains(key("once")), "one-shot job removes itself");
    }

    #[tokio::test]
    async fn test_schedule_once_in_past_fires_however_late() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(
            key("late"),
            "payload".to_string(),
            start() - Duration::days(30),
            counting_action(counter.clone()),
        );

        assert_eq!(scheduler.run_pending().await, 1);
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_recurring_fires_daily_until_end() {
        let (clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));
        let end = start() + Duration::days(2) + Duration::hours(1);

        let first = scheduler
            .schedule_recurring(
                key("daily"),
                "p".to_string(),
                9,
                0,
                end,
                counting_action(counter.clone()),
            )
            .unwrap();
        assert_eq!(first, Some(start() + Duration::hours(1)));

        for day in 0..3 {
            clock.set(start() + Duration::days(day) + Duration::hours(1));
            assert_eq!(scheduler.run_pending().await, 1, "day {day}");
        }
        scheduler.wait_idle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!scheduler.contains(key("daily")), "recurring job removes itself after end");
    }

    #[tokio::test]
    async fn test_recurring_late_beyond_grace_is_skipped_but_kept() {
        let (clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));
        let end = start() + Duration::days(5);

        scheduler
            .schedule_recurring(
                key("daily"),
                "p".to_string(),
                9,
                0,
                end,
                counting_action(counter.clone()),
            )
            .unwrap();

        // Due at 09:00, process comes back at 10:30
        clock.set(start() + Duration::hours(2) + Duration::minutes(30));
        assert_eq!(scheduler.run_pending().await, 0);

        let job = scheduler.job(key("daily")).expect("job stays registered");
        assert_eq!(job.next_fire, start() + Duration::days(1) + Duration::hours(1));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recurring_late_within_grace_still_fires() {
        let (clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule_recurring(
                key("daily"),
                "p".to_string(),
                9,
                0,
                start() + Duration::days(5),
                counting_action(counter.clone()),
            )
            .unwrap();

        clock.set(start() + Duration::hours(1) + Duration::minutes(59));
        assert_eq!(scheduler.run_pending().await, 1);
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recurring_with_no_occurrence_is_not_registered() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = scheduler
            .schedule_recurring(
                key("gone"),
                "p".to_string(),
                7,
                0,
                start() + Duration::minutes(30),
                counting_action(counter),
            )
            .unwrap();

        assert_eq!(first, None);
        assert!(!scheduler.contains(key("gone")));
    }

    #[tokio::test]
    async fn test_invalid_trigger_does_not_mutate() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(
            key("k"),
            "p".to_string(),
            start(),
            counting_action(counter.clone()),
        );
        let result = scheduler.schedule_recurring(
            key("k"),
            "q".to_string(),
            25,
            0,
            start(),
            counting_action(counter),
        );

        assert!(matches!(result, Err(SchedulerError::InvalidTrigger(_))));
        assert_eq!(scheduler.job(key("k")).unwrap().payload, "p");
    }

    #[tokio::test]
    async fn test_upsert_last_one_wins() {
        let (clock, scheduler) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let end = start() + Duration::days(3);

        scheduler
            .schedule_recurring(
                key("r"),
                "first".to_string(),
                9,
                0,
                end,
                recording_action(tx.clone()),
            )
            .unwrap();
        scheduler
            .schedule_recurring(key("r"), "second".to_string(), 9, 0, end, recording_action(tx))
            .unwrap();
        assert_eq!(scheduler.len(), 1);
        let jobs = scheduler.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].payload, "second");

        clock.advance(Duration::hours(1));
        assert_eq!(scheduler.run_pending().await, 1);
        scheduler.wait_idle().await;

        assert_eq!(rx.recv().await.as_deref(), Some("second"));
        assert!(rx.try_recv().is_err(), "no duplicate firing");
    }

    #[tokio::test]
    async fn test_modify_changes_payload_not_trigger() {
        let (clock, scheduler) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();

        scheduler.schedule_once(
            key("m"),
            "old".to_string(),
            start() + Duration::minutes(1),
            recording_action(tx),
        );
        let before = scheduler.job(key("m")).unwrap();

        scheduler.modify(key("m"), "new".to_string()).unwrap();
        let after = scheduler.job(key("m")).unwrap();
        assert_eq!(before.trigger, after.trigger);
        assert_eq!(before.next_fire, after.next_fire);

        clock.advance(Duration::minutes(1));
        scheduler.run_pending().await;
        scheduler.wait_idle().await;
        assert_eq!(rx.recv().await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_modify_and_reschedule_missing_job() {
        let (_clock, scheduler) = setup();

        assert!(matches!(
            scheduler.modify(key("missing"), "p".to_string()),
            Err(SchedulerError::JobNotFound(_))
        ));
        assert!(matches!(
            scheduler.reschedule(key("missing"), Trigger::once(start())),
            Err(SchedulerError::JobNotFound(_))
        ));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_replaces_trigger() {
        let (clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(
            key("x"),
            "p".to_string(),
            start() + Duration::minutes(1),
            counting_action(counter.clone()),
        );
        scheduler
            .reschedule(key("x"), Trigger::once(start() + Duration::hours(2)))
            .unwrap();

        clock.advance(Duration::minutes(1));
        assert_eq!(scheduler.run_pending().await, 0);

        clock.advance(Duration::hours(2));
        assert_eq!(scheduler.run_pending().await, 1);
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reschedule_to_exhausted_trigger_removes_job() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule_recurring(
                key("r"),
                "p".to_string(),
                9,
                0,
                start() + Duration::days(1),
                counting_action(counter),
            )
            .unwrap();
        scheduler
            .reschedule(key("r"), Trigger::daily(7, 0, start()).unwrap())
            .unwrap();

        assert!(!scheduler.contains(key("r")));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(key("c"), "p".to_string(), start(), counting_action(counter));
        assert!(scheduler.cancel(key("c")));
        assert!(!scheduler.cancel(key("c")));
        assert!(!scheduler.cancel(key("never")));
    }

    #[tokio::test]
    async fn test_cancel_during_fire_is_safe() {
        let (_clock, scheduler) = setup();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));
        let counter = Arc::new(AtomicUsize::new(0));

        let action = {
            let counter = Arc::clone(&counter);
            job_action(move |_payload: String| {
                let release_rx = Arc::clone(&release_rx);
                let counter = Arc::clone(&counter);
                async move {
                    if let Some(rx) = release_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), String>(())
                }
            })
        };

        scheduler.schedule_once(key("slow"), "p".to_string(), start(), action);
        assert_eq!(scheduler.run_pending().await, 1);

        assert!(!scheduler.cancel(key("slow")), "one-shot already taken off the registry");
        let _ = release_tx.send(());
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_action_does_not_stop_other_jobs() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule_once(
            key("bad"),
            "p".to_string(),
            start(),
            job_action(|_payload: String| async { Err::<(), String>("boom".to_string()) }),
        );
        scheduler.schedule_once(
            key("good"),
            "p".to_string(),
            start(),
            counting_action(counter.clone()),
        );

        assert_eq!(scheduler.run_pending().await, 2);
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_wakeup_is_earliest_job() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        assert_eq!(scheduler.next_wakeup(), None);
        scheduler.schedule_once(
            key("a"),
            "p".to_string(),
            start() + Duration::hours(3),
            counting_action(counter.clone()),
        );
        scheduler.schedule_once(
            key("b"),
            "p".to_string(),
            start() + Duration::hours(1),
            counting_action(counter),
        );
        assert_eq!(scheduler.next_wakeup(), Some(start() + Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.shutdown().await;
        scheduler.schedule_once(
            key("after"),
            "p".to_string(),
            start(),
            counting_action(counter.clone()),
        );

        assert!(scheduler.is_shut_down());
        assert_eq!(scheduler.run_pending().await, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_for_in_flight_lock() {
        let (_clock, scheduler) = setup();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.schedule_once(
            key("due"),
            "p".to_string(),
            start(),
            counting_action(counter.clone()),
        );

        // Park a dispatch pass on the in-flight lock, then shut down under it
        let guard = scheduler.in_flight.lock().await;
        let pending = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.run_pending().await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        scheduler.shutdown_tx.send_replace(true);
        drop(guard);

        assert_eq!(pending.await.unwrap(), 0);
        scheduler.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(scheduler.contains(key("due")));
    }

    #[tokio::test]
    async fn test_dispatch_loop_fires_and_shuts_down() {
        let (_clock, scheduler) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = scheduler.start();
        scheduler.schedule_once(key("loop"), "hello".to_string(), start(), recording_action(tx));

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("loop should dispatch the due job");
        assert_eq!(received.as_deref(), Some("hello"));

        scheduler.shutdown().await;
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("loop should exit after shutdown")
            .unwrap();
    }
}
