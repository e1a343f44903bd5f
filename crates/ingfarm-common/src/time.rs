//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Shared primitives and utilities for the telemetry runtime."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn epoch_seconds_now() -> f64 {
    to_epoch_seconds(Utc::now())
}

/// Fractional epoch seconds with microsecond precision.
pub fn to_epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / MICROS_PER_SECOND
}

/// Inverse of [`to_epoch_seconds`]. Returns `None` outside chrono's range.
pub fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let micros = (seconds * MICROS_PER_SECOND).round() as i64;
    Utc.timestamp_micros(micros).single()
}

/// Fixed-width RFC 3339 rendering; lexical order equals chronological order.
pub fn sortable_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Inclusive start and exclusive end of a UTC calendar day, in [`sortable_timestamp`] form.
pub fn day_bounds(date: NaiveDate) -> (String, String) {
    let start = date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    let end = date
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc());
    match (start, end) {
        (Some(start), Some(end)) => (sortable_timestamp(start), sortable_timestamp(end)),
        (Some(start), None) => (sortable_timestamp(start), "9999-12-31T23:59:59.999999Z".to_owned()),
        _ => (String::new(), String::new()),
    }
}
