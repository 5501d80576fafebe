//! Pruning of stored records by count or by age.
//!
//! Both operations are idempotent and report whether they removed anything.
//! Store failures are logged and reported as `false`; nothing is retried.
//!
//! Count-based pruning is a select followed by a delete and is not atomic:
//! a record inserted between the two calls is not in the keep set and will
//! be deleted along with the old ones.

use crate::error::CutoffError;
use crate::store::{pluck_ids, LogStore};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use tracing::{debug, warn};

/// Keep only the `max` newest records (by `unix_time`).
///
/// Returns `false` without touching the store when it holds `max` records or
/// fewer, and `true` when at least one record was deleted.
pub async fn prune_to_max(store: &dyn LogStore, max: u64) -> bool {
    let current = match store.count().await {
        Ok(current) => current,
        Err(e) => {
            warn!(target: "log_to_db::retention", error = %e, "count failed");
            return false;
        }
    };
    if current <= max {
        return false;
    }

    let keepers = match store.latest(max).await {
        Ok(rows) => pluck_ids(&rows),
        Err(e) => {
            warn!(target: "log_to_db::retention", error = %e, "selecting newest records failed");
            return false;
        }
    };

    match store.delete_where_id_not_in(&keepers).await {
        Ok(deleted) => {
            debug!(target: "log_to_db::retention", deleted, max, "pruned to max records");
            deleted > 0
        }
        Err(e) => {
            warn!(target: "log_to_db::retention", error = %e, "deleting old records failed");
            false
        }
    }
}

/// Delete every record with `unix_time` at or before `cutoff`, a date or
/// relative expression understood by [`parse_cutoff`].
///
/// An unparseable cutoff is logged and treated as "nothing to do".
pub async fn prune_older_than(store: &dyn LogStore, cutoff: &str) -> bool {
    match parse_cutoff(cutoff, Utc::now()) {
        Ok(unix_time) => prune_at_or_before(store, unix_time).await,
        Err(e) => {
            warn!(target: "log_to_db::retention", error = %e, "ignoring retention cutoff");
            false
        }
    }
}

/// Delete every record with `unix_time <= cutoff`.
///
/// Returns `false` when nothing matched or the delete failed.
pub async fn prune_at_or_before(store: &dyn LogStore, cutoff: i64) -> bool {
    let doomed = match store.select_unix_time_at_most(cutoff).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(target: "log_to_db::retention", error = %e, "selecting expired records failed");
            return false;
        }
    };
    if doomed.is_empty() {
        return false;
    }

    match store.delete_all(&pluck_ids(&doomed)).await {
        Ok(deleted) => {
            debug!(target: "log_to_db::retention", deleted, cutoff, "pruned expired records");
            true
        }
        Err(e) => {
            warn!(target: "log_to_db::retention", error = %e, "deleting expired records failed");
            false
        }
    }
}

/// Parse a retention cutoff into epoch seconds, relative to `now`.
///
/// Accepted forms:
/// - `now`, `today`, `midnight`, `yesterday`, `tomorrow` (days start at
///   00:00 UTC)
/// - `@1700000000` (epoch seconds)
/// - RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD`
///   (naive values are UTC)
/// - `-7 days`, `+2h`, `1 week ago`: a humantime duration with an optional
///   sign or `ago` suffix. Without either the offset points into the future.
pub fn parse_cutoff(input: &str, now: DateTime<Utc>) -> Result<i64, CutoffError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(CutoffError::Empty);
    }
    let lower = text.to_ascii_lowercase();
    let out_of_range = || CutoffError::OutOfRange(text.to_string());

    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(out_of_range)?;
    match lower.as_str() {
        "now" => return Ok(now.timestamp()),
        "today" | "midnight" => return Ok(midnight),
        "yesterday" => return Ok(midnight - 86_400),
        "tomorrow" => return Ok(midnight + 86_400),
        _ => {}
    }

    if let Some(epoch) = lower.strip_prefix('@') {
        return epoch
            .trim()
            .parse::<i64>()
            .map_err(|_| CutoffError::Unrecognised(text.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt.and_utc().timestamp());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .ok_or_else(out_of_range);
    }

    parse_relative(&lower, now).ok_or_else(|| CutoffError::Unrecognised(text.to_string()))?
}

fn parse_relative(lower: &str, now: DateTime<Utc>) -> Option<Result<i64, CutoffError>> {
    let (body, mut past) = match lower.strip_suffix("ago") {
        Some(rest) => (rest.trim(), true),
        None => (lower, false),
    };
    let body = if let Some(rest) = body.strip_prefix('-') {
        past = !past;
        rest.trim()
    } else {
        body.strip_prefix('+').map(str::trim).unwrap_or(body)
    };

    let offset = humantime::parse_duration(body).ok()?;
    let shifted = Duration::from_std(offset).ok().and_then(|offset| {
        if past {
            now.checked_sub_signed(offset)
        } else {
            now.checked_add_signed(offset)
        }
    });

    Some(
        shifted
            .map(|dt| dt.timestamp())
            .ok_or_else(|| CutoffError::OutOfRange(lower.to_string())),
    )
}
