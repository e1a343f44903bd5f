//! ---
//! farm_section: "03-persistence-logging"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Aggregate milk and weight reports over stored measurements."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::time::Instant;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use ingfarm_common::time::{day_bounds, sortable_timestamp};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::{parse_timestamp, MeasurementStore};
use crate::Result;

/// Unit label of milk-yield sensors.
pub const MILK_UNIT: &str = "L";
/// Unit label of weight sensors.
pub const WEIGHT_UNIT: &str = "kg";

const UNKNOWN_COW_NAME: &str = "Unknown";
const WEIGHT_WINDOW_DAYS: i64 = 30;
/// Relative drop below the window average that flags a cow as ill.
const ILLNESS_DROP_RATIO: f64 = 0.05;

/// One stored milk reading inside a daily report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementDetail {
    /// Cow the reading belongs to.
    pub cow_id: String,
    /// Cow name at emission time, `"Unknown"` when absent.
    pub cow_name: String,
    /// Litres.
    pub value: f64,
    /// Emission instant.
    pub measured_at: DateTime<Utc>,
    /// Sensor that produced the reading.
    pub sensor_id: String,
}

/// Milk produced by one cow on one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMilkReport {
    /// Reported day.
    pub date: NaiveDate,
    /// Sum of all readings, rounded to two decimals.
    pub total_liters: f64,
    /// Number of readings.
    pub measurement_count: usize,
    /// Readings, newest first.
    pub measurements: Vec<MeasurementDetail>,
}

/// Lifetime milk statistics for one cow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilkSummaryReport {
    /// Sum of all readings, rounded to two decimals.
    pub total_liters: f64,
    /// Number of readings.
    pub total_measurements: u64,
    /// Mean reading, rounded to two decimals.
    pub avg_per_measurement: f64,
    /// Oldest reading.
    pub first_measurement: Option<DateTime<Utc>>,
    /// Newest reading.
    pub last_measurement: Option<DateTime<Utc>>,
}

/// Latest weight against the trailing 30-day average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CowWeightReport {
    /// Reported cow.
    pub cow_id: String,
    /// Cow name on the latest reading, `"Unknown"` when absent.
    pub cow_name: String,
    /// Latest weight, rounded to two decimals.
    pub current_weight: f64,
    /// Instant of the latest weight.
    pub current_weight_date: DateTime<Utc>,
    /// Mean weight over the window, rounded to two decimals.
    pub avg_weight_30_days: Option<f64>,
    /// Readings inside the window.
    pub measurements_30_days: u64,
    /// Latest weight is more than 5% below the window average.
    pub ill: bool,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// More than [`ILLNESS_DROP_RATIO`] below a non-zero average.
pub(crate) fn is_ill(current: f64, average: Option<f64>) -> bool {
    match average {
        Some(avg) if avg != 0.0 => current - avg < -ILLNESS_DROP_RATIO * avg,
        _ => false,
    }
}

impl MeasurementStore {
    /// Milk readings of `cow_id` on `date` (UTC). `None` when there are none.
    pub fn daily_milk_report(&self, cow_id: &str, date: NaiveDate) -> Result<Option<DailyMilkReport>> {
        let started = Instant::now();
        let (start, end) = day_bounds(date);
        let measurements = {
            let conn = self.connection();
            let mut stmt = conn.prepare_cached(
                "SELECT cow_id, name, value, measured_at, sensor_id FROM measurements
                 WHERE unit = ?1 AND cow_id = ?2 AND measured_at >= ?3 AND measured_at < ?4
                 ORDER BY measured_at DESC, id DESC",
            )?;
            let rows = stmt.query_map(params![MILK_UNIT, cow_id, start, end], |row| {
                Ok(MeasurementDetail {
                    cow_id: row.get(0)?,
                    cow_name: row
                        .get::<_, Option<String>>(1)?
                        .unwrap_or_else(|| UNKNOWN_COW_NAME.to_owned()),
                    value: row.get(2)?,
                    measured_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
                    sensor_id: row.get(4)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        self.observe_report("milk_daily", started);

        if measurements.is_empty() {
            return Ok(None);
        }
        let total: f64 = measurements.iter().map(|m| m.value).sum();
        info!(cow_id, %date, count = measurements.len(), "daily milk report generated");
        Ok(Some(DailyMilkReport {
            date,
            total_liters: round2(total),
            measurement_count: measurements.len(),
            measurements,
        }))
    }

    /// Lifetime milk totals for `cow_id`; zeros when nothing is stored.
    pub fn milk_summary(&self, cow_id: &str) -> Result<MilkSummaryReport> {
        let started = Instant::now();
        let (total, count, average, first, last) = {
            let conn = self.connection();
            conn.query_row(
                "SELECT SUM(value), COUNT(id), AVG(value), MIN(measured_at), MAX(measured_at)
                 FROM measurements WHERE unit = ?1 AND cow_id = ?2",
                params![MILK_UNIT, cow_id],
                |row| {
                    Ok((
                        row.get::<_, Option<f64>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )?
        };
        self.observe_report("milk_summary", started);

        let first_measurement = first.map(|text| parse_timestamp(3, &text)).transpose()?;
        let last_measurement = last.map(|text| parse_timestamp(4, &text)).transpose()?;
        info!(cow_id, count, "milk summary generated");
        Ok(MilkSummaryReport {
            total_liters: total.map(round2).unwrap_or_default(),
            total_measurements: count.max(0) as u64,
            avg_per_measurement: average.map(round2).unwrap_or_default(),
            first_measurement,
            last_measurement,
        })
    }

    /// Latest weight of `cow_id` compared with the 30 days before `now`.
    /// `None` when no weight was ever stored.
    pub fn weight_report(&self, cow_id: &str, now: DateTime<Utc>) -> Result<Option<CowWeightReport>> {
        let started = Instant::now();
        let window_start = sortable_timestamp(now - Duration::days(WEIGHT_WINDOW_DAYS));
        let (latest, window) = {
            let conn = self.connection();
            let latest = conn
                .query_row(
                    "SELECT value, measured_at, name FROM measurements
                     WHERE unit = ?1 AND cow_id = ?2
                     ORDER BY measured_at DESC, id DESC LIMIT 1",
                    params![WEIGHT_UNIT, cow_id],
                    |row| {
                        Ok((
                            row.get::<_, f64>(0)?,
                            parse_timestamp(1, &row.get::<_, String>(1)?)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()?;
            let window = conn.query_row(
                "SELECT AVG(value), COUNT(id) FROM measurements
                 WHERE unit = ?1 AND cow_id = ?2 AND measured_at >= ?3",
                params![WEIGHT_UNIT, cow_id, window_start],
                |row| Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, i64>(1)?)),
            )?;
            (latest, window)
        };
        self.observe_report("weight", started);

        let Some((current, current_at, name)) = latest else {
            return Ok(None);
        };
        let (average, count) = window;
        let avg_weight = average.map(round2);
        let ill = is_ill(current, avg_weight);
        info!(cow_id, ill, "weight report generated");
        Ok(Some(CowWeightReport {
            cow_id: cow_id.to_owned(),
            cow_name: name.unwrap_or_else(|| UNKNOWN_COW_NAME.to_owned()),
            current_weight: round2(current),
            current_weight_date: current_at,
            avg_weight_30_days: avg_weight,
            measurements_30_days: if avg_weight.is_some() { count.max(0) as u64 } else { 0 },
            ill,
        }))
    }

    fn observe_report(&self, report: &str, started: Instant) {
        if let Some(metrics) = self.metrics() {
            metrics.observe_report(report, started.elapsed().as_secs_f64());
        }
    }
}
