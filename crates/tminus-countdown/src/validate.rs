//! Validation of user-supplied countdown names, instants, and timezones.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::LifecycleError;

/// Maximum countdown name length, in characters.
pub const MAX_NAME_CHARS: usize = 40;

/// A target must lie at least this many seconds in the future.
pub const MIN_LEAD_SECS: i64 = 15;

/// Format users type dates in, interpreted in their own timezone.
pub const LOCAL_INPUT_FORMAT: &str = "%Y-%m-%d %H:%M";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w\s]+$").unwrap());

/// Check a new countdown name against the owner's existing names.
pub fn validate_name(name: &str, existing: &[String]) -> Result<(), LifecycleError> {
    if existing.iter().any(|n| n == name) {
        return Err(LifecycleError::NameTaken(name.to_string()));
    }

    let len = name.chars().count();
    if len > MAX_NAME_CHARS {
        return Err(LifecycleError::NameTooLong { len });
    }

    if !NAME_RE.is_match(name) {
        return Err(LifecycleError::InvalidName(name.to_string()));
    }

    Ok(())
}

/// Check that `target` is more than [`MIN_LEAD_SECS`] after `now`.
pub fn validate_target(target: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    if target - now > Duration::seconds(MIN_LEAD_SECS) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTimestamp(format!(
            "{target} is not at least {MIN_LEAD_SECS}s after {now}"
        )))
    }
}

/// Resolve an IANA timezone name such as `"Asia/Tashkent"`.
pub fn parse_timezone(name: &str) -> Result<Tz, LifecycleError> {
    name.parse::<Tz>()
        .map_err(|_| LifecycleError::InvalidTimezone(name.to_string()))
}

/// Interpret `YYYY-MM-DD HH:MM` in the user's timezone and convert to UTC.
///
/// Local times skipped by a DST transition are rejected; repeated ones take
/// the earlier instant.
pub fn parse_local_datetime(input: &str, timezone: &str) -> Result<DateTime<Utc>, LifecycleError> {
    let tz = parse_timezone(timezone)?;
    let naive = NaiveDateTime::parse_from_str(input.trim(), LOCAL_INPUT_FORMAT).map_err(|e| {
        LifecycleError::InvalidTimestamp(format!("{input:?} is not {LOCAL_INPUT_FORMAT}: {e}"))
    })?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(LifecycleError::InvalidTimestamp(format!(
            "{input} does not exist in {timezone}"
        ))),
    }
}

/// Render a UTC instant in the user's timezone as `YYYY-MM-DD HH:MM`.
pub fn to_local(target: DateTime<Utc>, timezone: &str) -> Result<String, LifecycleError> {
    let tz = parse_timezone(timezone)?;
    Ok(target.with_timezone(&tz).format(LOCAL_INPUT_FORMAT).to_string())
}
