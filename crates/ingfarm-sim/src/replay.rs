//! ---
//! farm_section: "11-simulation"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Cyclic per-cow measurement replay with unit-scoped gap repair."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ingfarm_common::time::to_epoch_seconds;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace};

use crate::dataset::{HistoricalRecord, ReferenceDataset};
use crate::frames::{EmittedMeasurement, ValueSource};

/// Value substituted when a missing reading has nothing to be repaired from.
pub const MISSING_VALUE_DEFAULT: f64 = 0.0;

/// Source of emission timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by [`Utc::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("No measurements found for cow_id: {cow_id}")]
    NotFound { cow_id: String },
}

/// Replay state owned by a single cow.
#[derive(Debug)]
struct CowCursor {
    records: Arc<[HistoricalRecord]>,
    position: usize,
    /// Last resolved value per unit; an unknown sensor unit is its own key.
    last_by_unit: HashMap<Option<String>, f64>,
    emitted: u64,
    last_emitted_at: Option<DateTime<Utc>>,
}

impl CowCursor {
    fn new(records: Arc<[HistoricalRecord]>) -> Self {
        Self {
            records,
            position: 0,
            last_by_unit: HashMap::new(),
            emitted: 0,
            last_emitted_at: None,
        }
    }

    fn resolve_value(&self, raw: Option<f64>, unit: &Option<String>) -> (f64, ValueSource) {
        match raw.filter(|value| !value.is_nan()) {
            Some(value) => (value, ValueSource::Observed),
            None if self.position == 0 => {
                (MISSING_VALUE_DEFAULT, ValueSource::FirstPositionDefault)
            }
            None => match self.last_by_unit.get(unit) {
                Some(&value) => (value, ValueSource::Carried),
                None => (MISSING_VALUE_DEFAULT, ValueSource::NoHistoryDefault),
            },
        }
    }

    /// Emission instants for one cow never repeat or go backwards.
    fn stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_emitted_at {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        }
    }

    fn advance(&mut self) {
        self.position = (self.position + 1) % self.records.len();
    }
}

/// Replays each cow's historical measurements in file order, forever.
///
/// Every cow gets its own cursor behind its own lock, created on the first
/// request for that cow. One call to [`ReplayEngine::next_measurement`]
/// reads, repairs, records, and advances under that lock, so the periodic
/// batch and ad-hoc requests can share an engine without losing or
/// duplicating positions.
pub struct ReplayEngine {
    dataset: Arc<ReferenceDataset>,
    clock: Arc<dyn Clock>,
    cursors: RwLock<HashMap<String, Arc<Mutex<CowCursor>>>>,
}

impl ReplayEngine {
    pub fn new(dataset: Arc<ReferenceDataset>) -> Self {
        Self::with_clock(dataset, Arc::new(SystemClock))
    }

    pub fn with_clock(dataset: Arc<ReferenceDataset>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dataset,
            clock,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn dataset(&self) -> &ReferenceDataset {
        &self.dataset
    }

    /// Produce the next enriched, repaired, freshly stamped reading for `cow_id`.
    pub fn next_measurement(&self, cow_id: &str) -> Result<EmittedMeasurement, ReplayError> {
        let cursor = self.cursor_for(cow_id)?;
        let mut cursor = cursor.lock();

        let index = cursor.position;
        let record = cursor.records[index].clone();

        let unit = self
            .dataset
            .sensor(&record.sensor_id)
            .map(|sensor| sensor.unit.clone());
        let cow = self.dataset.cow(cow_id);

        let (value, value_source) = cursor.resolve_value(record.value, &unit);

        let measured_at = cursor.stamp(self.clock.now());

        cursor.last_by_unit.insert(unit.clone(), value);
        cursor.emitted += 1;
        cursor.last_emitted_at = Some(measured_at);
        cursor.advance();

        trace!(
            cow_id,
            index,
            sensor_id = %record.sensor_id,
            value,
            source = value_source.as_str(),
            "measurement replayed"
        );

        Ok(EmittedMeasurement {
            cow_id: record.cow_id,
            sensor_id: record.sensor_id,
            timestamp: to_epoch_seconds(measured_at),
            measured_at,
            value,
            unit,
            cow_name: cow.map(|cow| cow.name.clone()),
            cow_birthdate: cow.map(|cow| cow.birthdate),
            value_source,
        })
    }

    /// Rewind one cow's cursor, or every cursor when `cow_id` is `None`.
    ///
    /// Repair history is kept. Resetting a cow without a cursor does nothing.
    pub fn reset_index(&self, cow_id: Option<&str>) {
        let cursors = self.cursors.read();
        match cow_id {
            Some(cow_id) => {
                if let Some(cursor) = cursors.get(cow_id) {
                    cursor.lock().position = 0;
                    debug!(cow_id, "replay cursor reset");
                }
            }
            None => {
                for cursor in cursors.values() {
                    cursor.lock().position = 0;
                }
                info!(cursors = cursors.len(), "all replay cursors reset");
            }
        }
    }

    /// Every cow id that has at least one historical row.
    pub fn known_cow_ids(&self) -> BTreeSet<String> {
        self.dataset
            .records()
            .iter()
            .map(|record| record.cow_id.clone())
            .collect()
    }

    /// Emit once for each of `cow_ids`, skipping cows without history.
    pub fn emit_for_registered<I, S>(&self, cow_ids: I) -> Vec<EmittedMeasurement>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut emitted = Vec::new();
        for cow_id in cow_ids {
            let cow_id = cow_id.as_ref();
            match self.next_measurement(cow_id) {
                Ok(measurement) => emitted.push(measurement),
                Err(ReplayError::NotFound { .. }) => {
                    debug!(cow_id, "no replay history for registered cow; skipping");
                }
            }
        }
        emitted
    }

    /// Position the next emission for `cow_id` will read, if a cursor exists.
    pub fn cursor_position(&self, cow_id: &str) -> Option<usize> {
        self.cursors
            .read()
            .get(cow_id)
            .map(|cursor| cursor.lock().position)
    }

    /// Number of emissions produced for `cow_id` since the engine was built.
    pub fn emission_count(&self, cow_id: &str) -> Option<u64> {
        self.cursors
            .read()
            .get(cow_id)
            .map(|cursor| cursor.lock().emitted)
    }

    fn cursor_for(&self, cow_id: &str) -> Result<Arc<Mutex<CowCursor>>, ReplayError> {
        if let Some(cursor) = self.cursors.read().get(cow_id) {
            return Ok(Arc::clone(cursor));
        }

        let records = self.dataset.records_for(cow_id);
        if records.is_empty() {
            return Err(ReplayError::NotFound {
                cow_id: cow_id.to_owned(),
            });
        }

        let mut cursors = self.cursors.write();
        let cursor = cursors.entry(cow_id.to_owned()).or_insert_with(|| {
            debug!(cow_id, records = records.len(), "replay cursor created");
            Arc::new(Mutex::new(CowCursor::new(records.into())))
        });
        Ok(Arc::clone(cursor))
    }
}

impl fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("records", &self.dataset.records().len())
            .field("cursors", &self.cursors.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ReferenceCow, ReferenceSensor};
    use chrono::{NaiveDate, TimeZone};

    /// Clock frozen at a single instant.
    #[derive(Debug)]
    struct FrozenClock(DateTime<Utc>);

    impl Clock for FrozenClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn record(cow_id: &str, sensor_id: &str, value: Option<f64>) -> HistoricalRecord {
        HistoricalRecord {
            cow_id: cow_id.into(),
            sensor_id: sensor_id.into(),
            timestamp: 1_704_067_200.0,
            value,
        }
    }

    fn farm_dataset() -> Arc<ReferenceDataset> {
        Arc::new(ReferenceDataset::from_parts(
            vec![
                ReferenceCow {
                    id: "cow-1".into(),
                    name: "Bessie".into(),
                    birthdate: NaiveDate::from_ymd_opt(2020, 1, 15).unwrap(),
                },
                ReferenceCow {
                    id: "cow-2".into(),
                    name: "Daisy".into(),
                    birthdate: NaiveDate::from_ymd_opt(2021, 3, 20).unwrap(),
                },
            ],
            vec![
                ReferenceSensor {
                    id: "sensor-1".into(),
                    unit: "L".into(),
                },
                ReferenceSensor {
                    id: "sensor-2".into(),
                    unit: "L".into(),
                },
                ReferenceSensor {
                    id: "sensor-3".into(),
                    unit: "kg".into(),
                },
            ],
            vec![
                record("cow-1", "sensor-1", Some(10.5)),
                record("cow-2", "sensor-2", None),
                record("cow-1", "sensor-1", None),
                record("cow-2", "sensor-2", Some(15.2)),
                record("cow-1", "sensor-3", Some(600.8)),
            ],
        ))
    }

    #[test]
    fn replays_in_order_and_wraps() {
        let engine = ReplayEngine::new(farm_dataset());
        let mut values = Vec::new();
        let mut positions = Vec::new();
        for _ in 0..4 {
            values.push(engine.next_measurement("cow-1").unwrap().value);
            positions.push(engine.cursor_position("cow-1").unwrap());
        }
        assert_eq!(values, vec![10.5, 10.5, 600.8, 10.5]);
        assert_eq!(positions, vec![1, 2, 0, 1]);
    }

    #[test]
    fn enrichment_attaches_unit_and_cow_details() {
        let engine = ReplayEngine::new(farm_dataset());
        let first = engine.next_measurement("cow-1").unwrap();
        assert_eq!(first.unit.as_deref(), Some("L"));
        assert_eq!(first.cow_name.as_deref(), Some("Bessie"));
        assert_eq!(first.cow_birthdate, NaiveDate::from_ymd_opt(2020, 1, 15));
        assert_eq!(first.value_source, ValueSource::Observed);
    }

    #[test]
    fn first_position_null_defaults_to_zero() {
        let engine = ReplayEngine::new(farm_dataset());
        let first = engine.next_measurement("cow-2").unwrap();
        assert_eq!(first.value, MISSING_VALUE_DEFAULT);
        assert_eq!(first.value_source, ValueSource::FirstPositionDefault);
        assert_eq!(engine.next_measurement("cow-2").unwrap().value, 15.2);
    }

    #[test]
    fn first_position_null_stays_zero_after_wraparound() {
        let engine = ReplayEngine::new(farm_dataset());
        for _ in 0..2 {
            engine.next_measurement("cow-2").unwrap();
        }
        // Back at position 0 with 15.2 recorded for `L`; position 0 still defaults.
        let wrapped = engine.next_measurement("cow-2").unwrap();
        assert_eq!(wrapped.value, 0.0);
        assert_eq!(wrapped.value_source, ValueSource::FirstPositionDefault);
    }

    #[test]
    fn repair_never_crosses_units() {
        let dataset = Arc::new(ReferenceDataset::from_parts(
            vec![],
            vec![
                ReferenceSensor {
                    id: "milk".into(),
                    unit: "L".into(),
                },
                ReferenceSensor {
                    id: "scale".into(),
                    unit: "kg".into(),
                },
            ],
            vec![
                record("cow-9", "scale", Some(612.0)),
                record("cow-9", "scale", Some(615.0)),
                record("cow-9", "milk", None),
                record("cow-9", "milk", Some(12.0)),
                record("cow-9", "scale", Some(611.0)),
                record("cow-9", "milk", None),
            ],
        ));
        let engine = ReplayEngine::new(dataset);
        let values: Vec<(f64, ValueSource)> = (0..6)
            .map(|_| {
                let m = engine.next_measurement("cow-9").unwrap();
                (m.value, m.value_source)
            })
            .collect();
        assert_eq!(values[2], (0.0, ValueSource::NoHistoryDefault));
        assert_eq!(values[5], (12.0, ValueSource::Carried));
    }

    #[test]
    fn unknown_sensor_and_cow_degrade_to_absent_fields() {
        let dataset = Arc::new(ReferenceDataset::from_parts(
            vec![],
            vec![],
            vec![
                record("stray", "ghost", Some(3.0)),
                record("stray", "ghost", None),
            ],
        ));
        let engine = ReplayEngine::new(dataset);
        let first = engine.next_measurement("stray").unwrap();
        assert!(first.unit.is_none());
        assert!(first.cow_name.is_none());
        assert!(first.cow_birthdate.is_none());
        // Absent unit repairs from absent unit.
        let second = engine.next_measurement("stray").unwrap();
        assert_eq!(second.value, 3.0);
        assert!(second.unit.is_none());
    }

    #[test]
    fn unknown_cow_is_not_found_and_creates_no_cursor() {
        let engine = ReplayEngine::new(farm_dataset());
        let err = engine.next_measurement("invalid-cow").unwrap_err();
        assert!(err.to_string().contains("No measurements found for cow_id"));
        assert!(engine.cursor_position("invalid-cow").is_none());
        assert!(engine.next_measurement("cow-1").is_ok());
    }

    #[test]
    fn frozen_clock_still_yields_increasing_timestamps() {
        let instant = Utc.timestamp_opt(1_704_067_200, 0).unwrap();
        let engine = ReplayEngine::with_clock(farm_dataset(), Arc::new(FrozenClock(instant)));
        let first = engine.next_measurement("cow-1").unwrap();
        let mut last = first.timestamp;
        for _ in 0..3 {
            let next = engine.next_measurement("cow-1").unwrap();
            assert!(next.timestamp > last);
            assert_eq!(ingfarm_common::time::to_epoch_seconds(next.measured_at), next.timestamp);
            last = next.timestamp;
        }
        assert_eq!(first.measured_at, instant);
    }

    #[test]
    fn reset_rewinds_without_clearing_history() {
        let engine = ReplayEngine::new(farm_dataset());
        engine.next_measurement("cow-1").unwrap();
        engine.next_measurement("cow-1").unwrap();
        engine.reset_index(Some("cow-1"));
        assert_eq!(engine.cursor_position("cow-1"), Some(0));
        assert_eq!(engine.emission_count("cow-1"), Some(2));

        engine.reset_index(Some("never-seen"));
        assert!(engine.cursor_position("never-seen").is_none());
    }

    #[test]
    fn reset_all_rewinds_every_cursor() {
        let engine = ReplayEngine::new(farm_dataset());
        engine.next_measurement("cow-1").unwrap();
        engine.next_measurement("cow-2").unwrap();
        engine.reset_index(None);
        assert_eq!(engine.cursor_position("cow-1"), Some(0));
        assert_eq!(engine.cursor_position("cow-2"), Some(0));
        assert_eq!(engine.next_measurement("cow-1").unwrap().value, 10.5);
    }

    #[test]
    fn bulk_emit_skips_cows_without_history() {
        let engine = ReplayEngine::new(farm_dataset());
        let emitted = engine.emit_for_registered(["cow-1", "newborn", "cow-2"]);
        let ids: Vec<&str> = emitted.iter().map(|m| m.cow_id.as_str()).collect();
        assert_eq!(ids, vec!["cow-1", "cow-2"]);
        assert!(engine.cursor_position("newborn").is_none());
    }

    #[test]
    fn known_cow_ids_come_from_history() {
        let engine = ReplayEngine::new(farm_dataset());
        let ids: Vec<String> = engine.known_cow_ids().into_iter().collect();
        assert_eq!(ids, vec!["cow-1".to_owned(), "cow-2".to_owned()]);
    }
}
