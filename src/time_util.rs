//! Small helpers for the two clock conventions the system mixes deliberately:
//! UTC day boundaries for context rollover, local hour-of-day for trigger
//! windows. See SPEC_FULL.md §9 for why this asymmetry is kept.

use crate::model::Epoch;
use chrono::{DateTime, Local, TimeZone, Timelike};

fn to_local(epoch: Epoch) -> DateTime<Local> {
    let secs = epoch.floor() as i64;
    let nanos = ((epoch - epoch.floor()) * 1_000_000_000.0).round() as u32;
    Local
        .timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(|| Local.timestamp_opt(secs, 0).single().expect("valid unix timestamp"))
}

/// UTC day index, used for the context store's daily counter rollover.
pub fn utc_day(epoch: Epoch) -> i64 {
    (epoch / 86_400.0).floor() as i64
}

/// Local hour of day, 0..23.
pub fn local_hour(epoch: Epoch) -> u32 {
    to_local(epoch).hour()
}

/// Local hour of day including the fractional minute, e.g. 14.5 for 14:30.
pub fn local_hour_fraction(epoch: Epoch) -> f64 {
    let dt = to_local(epoch);
    dt.hour() as f64 + dt.minute() as f64 / 60.0 + dt.second() as f64 / 3600.0
}

/// Day of week in the 0=Sunday..6=Saturday convention the spec uses,
/// computed against local time (matches the hour-of-day windows it's
/// paired with in every trigger predicate).
pub fn local_day_of_week(epoch: Epoch) -> u32 {
    to_local(epoch).weekday().num_days_from_sunday()
}

/// Formats a local hour-of-day as "HH:MM".
pub fn format_hh_mm(hour_fraction: f64) -> String {
    let mut hours = hour_fraction.floor() as i64;
    let mut minutes = ((hour_fraction - hour_fraction.floor()) * 60.0).round() as i64;
    if minutes == 60 {
        minutes = 0;
        hours += 1;
    }
    let hours = hours.rem_euclid(24);
    format!("{hours:02}:{minutes:02}")
}

/// Current time as seconds-since-epoch, matching the event wire format.
pub fn now_epoch() -> Epoch {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Median of a list of hour-fractions, or `None` if empty.
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
