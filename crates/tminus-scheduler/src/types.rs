//! Scheduler types.

use std::fmt;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SchedulerError;

/// How late (in seconds) a daily occurrence may still fire before it is skipped.
pub const DAILY_MISFIRE_GRACE_SECS: i64 = 3600;

/// Deterministic identifier for a scheduled job.
///
/// Derived from a namespace tag, an owner, and a name. The same inputs always
/// give the same key, across calls and across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(Uuid);

impl JobKey {
    /// Derive the key for `(namespace, owner, name)`.
    ///
    /// The owner is rendered before the name, so owners must not contain `:`
    /// for distinct triples to stay distinct.
    pub fn derive(namespace: &str, owner: impl fmt::Display, name: &str) -> Self {
        let seed = format!("{namespace}:{owner}:{name}");
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, seed.as_bytes()))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire every day at `hour:minute` UTC, up to and including `end`.
    Daily {
        hour: u32,
        minute: u32,
        end: DateTime<Utc>,
    },
    /// Fire once at `at`, however late.
    Once { at: DateTime<Utc> },
}

impl Trigger {
    /// Build a daily trigger, rejecting out-of-range clock times.
    pub fn daily(hour: u32, minute: u32, end: DateTime<Utc>) -> Result<Self, SchedulerError> {
        let trigger = Self::Daily { hour, minute, end };
        trigger.validate()?;
        Ok(trigger)
    }

    /// Build a one-shot trigger.
    pub fn once(at: DateTime<Utc>) -> Self {
        Self::Once { at }
    }

    /// Check that the trigger describes a real clock time.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Self::Daily { hour, minute, .. } if *hour > 23 || *minute > 59 => {
                Err(SchedulerError::InvalidTrigger(format!(
                    "{hour:02}:{minute:02} is not a valid UTC time"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Maximum lateness before an occurrence is skipped. `None` means unbounded.
    pub fn late_tolerance(&self) -> Option<Duration> {
        match self {
            Self::Daily { .. } => Some(Duration::seconds(DAILY_MISFIRE_GRACE_SECS)),
            Self::Once { .. } => None,
        }
    }

    /// First fire time at or after `from`, or `None` if the trigger has no
    /// occurrence left.
    ///
    /// A one-shot trigger whose time already passed is due immediately.
    pub fn first_fire(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::Daily { hour, minute, end } => daily_occurrence(hour, minute, end, from, true),
            Self::Once { at } => Some(at),
        }
    }

    /// Fire time strictly after `after`, once an occurrence has been consumed.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::Daily { hour, minute, end } => daily_occurrence(hour, minute, end, after, false),
            Self::Once { .. } => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily { hour, minute, end } => {
                write!(f, "daily at {hour:02}:{minute:02} UTC until {end}")
            }
            Self::Once { at } => write!(f, "once at {at}"),
        }
    }
}

fn daily_occurrence(
    hour: u32,
    minute: u32,
    end: DateTime<Utc>,
    from: DateTime<Utc>,
    inclusive: bool,
) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let mut candidate = from.date_naive().and_time(time).and_utc();
    if candidate < from || (!inclusive && candidate == from) {
        candidate += Duration::days(1);
    }
    (candidate <= end).then_some(candidate)
}

/// Read-only view of a registered job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot<P> {
    pub key: JobKey,
    pub trigger: Trigger,
    pub payload: P,
    /// When the job is next due.
    pub next_fire: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_case::test_case;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_job_key_is_deterministic() {
        let a = JobKey::derive("reminder", 42, "Launch");
        let b = JobKey::derive("reminder", 42, "Launch");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_job_key_namespaces_differ() {
        let reminder = JobKey::derive("reminder", 42, "Launch");
        let expire = JobKey::derive("expire", 42, "Launch");
        assert_ne!(reminder, expire);
    }

    #[test]
    fn test_job_key_is_uuid_v5() {
        let key = JobKey::derive("expire", 7, "Trip");
        assert_eq!(key.as_uuid().get_version_num(), 5);
    }

    #[test]
    fn test_daily_rejects_bad_clock_time() {
        assert!(matches!(
            Trigger::daily(24, 0, at(12, 0, 0)),
            Err(SchedulerError::InvalidTrigger(_))
        ));
        assert!(matches!(
            Trigger::daily(0, 60, at(12, 0, 0)),
            Err(SchedulerError::InvalidTrigger(_))
        ));
        assert!(Trigger::daily(23, 59, at(12, 0, 0)).is_ok());
    }

    // from, expected first fire for a 09:30 trigger ending two days later
    #[test_case(at(8, 0, 0), Some(at(9, 30, 0)) ; "later today")]
    #[test_case(at(9, 30, 0), Some(at(9, 30, 0)) ; "exactly now")]
    #[test_case(at(9, 30, 1), Some(at(9, 30, 0) + Duration::days(1)) ; "tomorrow")]
    fn test_daily_first_fire(from: DateTime<Utc>, expected: Option<DateTime<Utc>>) {
        let trigger = Trigger::daily(9, 30, at(9, 30, 0) + Duration::days(2)).unwrap();
        assert_eq!(trigger.first_fire(from), expected);
    }

    #[test]
    fn test_daily_next_fire_is_strictly_after() {
        let trigger = Trigger::daily(9, 30, at(9, 30, 0) + Duration::days(2)).unwrap();
        assert_eq!(
            trigger.next_fire_after(at(9, 30, 0)),
            Some(at(9, 30, 0) + Duration::days(1))
        );
    }

    #[test]
    fn test_daily_end_is_inclusive() {
        let end = at(9, 30, 0);
        let trigger = Trigger::daily(9, 30, end).unwrap();
        assert_eq!(trigger.first_fire(at(9, 0, 0)), Some(end));
        assert_eq!(trigger.next_fire_after(end), None);
    }

    #[test]
    fn test_daily_past_end_has_no_occurrence() {
        let trigger = Trigger::daily(9, 30, at(9, 45, 0)).unwrap();
        assert_eq!(trigger.first_fire(at(10, 0, 0)), None);
    }

    #[test]
    fn test_once_in_past_is_due_immediately() {
        let trigger = Trigger::once(at(1, 0, 0));
        assert_eq!(trigger.first_fire(at(12, 0, 0)), Some(at(1, 0, 0)));
        assert_eq!(trigger.next_fire_after(at(12, 0, 0)), None);
        assert_eq!(trigger.late_tolerance(), None);
    }

    #[test]
    fn test_daily_tolerance_is_one_hour() {
        let trigger = Trigger::daily(0, 0, at(12, 0, 0)).unwrap();
        assert_eq!(trigger.late_tolerance(), Some(Duration::hours(1)));
    }

    proptest! {
        // Distinct names under the same owner and namespace never collide
        #[test]
        fn job_keys_distinct_for_distinct_names(
            owner in any::<i64>(),
            a in "[a-zA-Z0-9 _]{1,40}",
            b in "[a-zA-Z0-9 _]{1,40}",
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(
                JobKey::derive("reminder", owner, &a),
                JobKey::derive("reminder", owner, &b)
            );
        }

        // A daily occurrence always lands on the configured clock time
        #[test]
        fn daily_fire_lands_on_clock_time(
            hour in 0u32..24,
            minute in 0u32..60,
            offset_secs in 0i64..(86_400 * 30),
        ) {
            let from = at(0, 0, 0) + Duration::seconds(offset_secs);
            let trigger = Trigger::daily(hour, minute, from + Duration::days(3)).unwrap();
            let fire = trigger.first_fire(from).unwrap();
            prop_assert!(fire >= from);
            prop_assert!(fire - from < Duration::days(1));
            prop_assert_eq!(fire.time(), NaiveTime::from_hms_opt(hour, minute, 0).unwrap());
        }
    }
}
