//! Countdown record and job payload types.

use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tminus_scheduler::JobKey;

/// Opaque identifier of the user who owns a countdown (a chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for OwnerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// How remaining time is laid out in a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayFormat {
    /// One line: "1 day, 2 hours and 3 minutes left".
    #[default]
    Inline,
    /// Heading followed by one component per line.
    Itemized,
}

impl fmt::Display for DisplayFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::Itemized => f.write_str("itemized"),
        }
    }
}

/// A user-owned named target instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    pub owner_id: OwnerId,
    /// Unique per owner.
    pub name: String,
    /// When the countdown expires.
    pub target: DateTime<Utc>,
    pub format: DisplayFormat,
    /// Whether daily reminders are sent.
    pub reminders: bool,
}

impl Countdown {
    /// Create a countdown record.
    pub fn new(
        owner_id: impl Into<OwnerId>,
        name: impl Into<String>,
        target: DateTime<Utc>,
        format: DisplayFormat,
        reminders: bool,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            name: name.into(),
            target,
            format,
            reminders,
        }
    }

    /// UTC clock time (hour, minute) at which daily reminders fire.
    pub fn reminder_time(&self) -> (u32, u32) {
        (self.target.hour(), self.target.minute())
    }

    /// Payload for this countdown's reminder job.
    pub fn reminder_payload(&self) -> CountdownJob {
        CountdownJob::Reminder {
            owner_id: self.owner_id,
            name: self.name.clone(),
            target: self.target,
            format: self.format,
        }
    }

    /// Payload for this countdown's expiry job.
    pub fn expire_payload(&self) -> CountdownJob {
        CountdownJob::Expire {
            owner_id: self.owner_id,
            name: self.name.clone(),
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &CountdownUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(target) = update.target {
            self.target = target;
        }
        if let Some(format) = update.format {
            self.format = format;
        }
        if let Some(reminders) = update.reminders {
            self.reminders = reminders;
        }
    }
}

/// Fields to change on a stored countdown. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountdownUpdate {
    pub name: Option<String>,
    pub target: Option<DateTime<Utc>>,
    pub format: Option<DisplayFormat>,
    pub reminders: Option<bool>,
}

impl CountdownUpdate {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn target(target: DateTime<Utc>) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    pub fn format(format: DisplayFormat) -> Self {
        Self {
            format: Some(format),
            ..Self::default()
        }
    }

    pub fn reminders(enabled: bool) -> Self {
        Self {
            reminders: Some(enabled),
            ..Self::default()
        }
    }
}

/// Purpose of a countdown's scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Daily time-remaining notification.
    Reminder,
    /// One-shot cleanup after the target instant.
    Expire,
}

impl JobKind {
    /// Namespace tag mixed into the job key.
    pub fn namespace(self) -> &'static str {
        match self {
            Self::Reminder => "reminder",
            Self::Expire => "expire",
        }
    }

    /// Key of this kind of job for `(owner, name)`.
    pub fn key(self, owner_id: OwnerId, name: &str) -> JobKey {
        JobKey::derive(self.namespace(), owner_id, name)
    }
}

/// Arguments carried by a countdown job until it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountdownJob {
    Reminder {
        owner_id: OwnerId,
        name: String,
        target: DateTime<Utc>,
        format: DisplayFormat,
    },
    Expire {
        owner_id: OwnerId,
        name: String,
    },
}
