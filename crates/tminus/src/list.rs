//! List command: print stored countdowns.

use std::path::Path;

use chrono::{DateTime, Utc};
use miette::Result;
use tminus_countdown::validate::{parse_timezone, to_local};
use tminus_countdown::{Countdown, CountdownStore, JsonFileStore, OwnerId, remaining_between};

/// One tab-separated line: owner, name, local target time, time left.
pub fn format_line(countdown: &Countdown, timezone: &str, now: DateTime<Utc>) -> Result<String> {
    let local = to_local(countdown.target, timezone).map_err(|e| miette::miette!("{}", e))?;
    let remaining = remaining_between(countdown.target, now);
    let left = if remaining.is_past() || remaining.is_zero() {
        "ended".to_string()
    } else {
        format!("{remaining} left")
    };
    Ok(format!(
        "{}\t{}\t{}\t{}",
        countdown.owner_id, countdown.name, local, left
    ))
}

pub async fn run(store_path: &Path, owner: Option<i64>, timezone: &str) -> Result<()> {
    parse_timezone(timezone).map_err(|e| miette::miette!("{}", e))?;

    let store = JsonFileStore::open(store_path).await.map_err(|e| {
        miette::miette!(
            "failed to open countdown store {}: {}",
            store_path.display(),
            e
        )
    })?;
    let countdowns = store
        .list_all()
        .await
        .map_err(|e| miette::miette!("failed to list countdowns: {}", e))?;

    let now = Utc::now();
    let owner = owner.map(OwnerId);
    let mut shown = 0;
    for countdown in countdowns
        .iter()
        .filter(|c| owner.is_none_or(|o| c.owner_id == o))
    {
        println!("{}", format_line(countdown, timezone, now)?);
        shown += 1;
    }

    if shown == 0 {
        println!("no countdowns");
    }
    Ok(())
}
