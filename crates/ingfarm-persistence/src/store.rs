//! ---
//! farm_section: "03-persistence-logging"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Persistence abstractions and storage bindings."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use ingfarm_common::time::sortable_timestamp;
use ingfarm_sim::{EmittedMeasurement, ReferenceDataset};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::PersistenceMetrics;
use crate::{PersistenceError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cows (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    birthdate TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sensors (
    id TEXT PRIMARY KEY,
    unit TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS measurements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cow_id TEXT NOT NULL,
    sensor_id TEXT NOT NULL,
    timestamp REAL NOT NULL,
    measured_at TEXT NOT NULL,
    value REAL NOT NULL,
    unit TEXT,
    name TEXT,
    birthdate TEXT,
    value_source TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_measurements_cow_unit_time
    ON measurements(cow_id, unit, measured_at);
";

const INSERT_MEASUREMENT: &str = "INSERT INTO measurements
    (cow_id, sensor_id, timestamp, measured_at, value, unit, name, birthdate, value_source, recorded_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

/// Payload for registering a cow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCow {
    /// Display name.
    pub name: String,
    /// Date of birth.
    pub birthdate: NaiveDate,
}

/// A registered cow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CowRecord {
    /// Opaque identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Date of birth.
    pub birthdate: NaiveDate,
}

/// Rows inserted by [`MeasurementStore::seed_reference_data`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Cows inserted; zero when the table already had rows.
    pub cows: usize,
    /// Sensors inserted; zero when the table already had rows.
    pub sensors: usize,
}

/// Shared SQLite handle. Built once at startup and passed to every collaborator.
pub struct MeasurementStore {
    conn: Mutex<Connection>,
    location: Option<PathBuf>,
    metrics: Option<Arc<PersistenceMetrics>>,
}

impl MeasurementStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(path = %path.display(), error = %err, "unable to enable WAL journal");
        }
        let store = Self::with_connection(conn, Some(path.to_path_buf()))?;
        info!(path = %path.display(), "measurement store opened");
        Ok(store)
    }

    /// Private in-memory database, used by tests and one-shot tooling.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, location: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location,
            metrics: None,
        })
    }

    /// Attach metrics recorded on every save and report.
    pub fn with_metrics(mut self, metrics: Arc<PersistenceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Database file, or `None` for in-memory stores.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub(crate) fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub(crate) fn metrics(&self) -> Option<&PersistenceMetrics> {
        self.metrics.as_deref()
    }

    /// Copy the reference cows and sensors into empty tables.
    ///
    /// Each table is seeded only if it has no rows, so restarts keep cows
    /// registered through the API.
    pub fn seed_reference_data(&self, dataset: &ReferenceDataset) -> Result<SeedSummary> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut summary = SeedSummary::default();

        let has_cows: bool = tx.query_row("SELECT EXISTS(SELECT 1 FROM cows)", [], |row| row.get(0))?;
        if !has_cows {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO cows (id, name, birthdate) VALUES (?1, ?2, ?3)")?;
            for cow in dataset.cows() {
                summary.cows += stmt.execute(params![cow.id, cow.name, cow.birthdate.to_string()])?;
            }
        }

        let has_sensors: bool =
            tx.query_row("SELECT EXISTS(SELECT 1 FROM sensors)", [], |row| row.get(0))?;
        if !has_sensors {
            let mut stmt =
                tx.prepare_cached("INSERT OR IGNORE INTO sensors (id, unit) VALUES (?1, ?2)")?;
            for sensor in dataset.sensors() {
                summary.sensors += stmt.execute(params![sensor.id, sensor.unit])?;
            }
        }

        tx.commit()?;
        info!(cows = summary.cows, sensors = summary.sensors, "reference data seeded");
        Ok(summary)
    }

    /// Register a cow under a UUID identifier.
    pub fn create_cow(&self, id: &str, cow: &NewCow) -> Result<CowRecord> {
        if Uuid::parse_str(id).is_err() {
            return Err(PersistenceError::InvalidCowId(id.to_owned()));
        }
        let conn = self.connection();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO cows (id, name, birthdate) VALUES (?1, ?2, ?3)",
            params![id, cow.name, cow.birthdate.to_string()],
        )?;
        if inserted == 0 {
            return Err(PersistenceError::CowExists(id.to_owned()));
        }
        debug!(cow_id = id, "cow registered");
        Ok(CowRecord {
            id: id.to_owned(),
            name: cow.name.clone(),
            birthdate: cow.birthdate,
        })
    }

    /// Look up a registered cow.
    pub fn cow(&self, id: &str) -> Result<Option<CowRecord>> {
        let conn = self.connection();
        let cow = conn
            .query_row(
                "SELECT id, name, birthdate FROM cows WHERE id = ?1",
                params![id],
                cow_from_row,
            )
            .optional()?;
        Ok(cow)
    }

    /// All registered cows in registration order.
    pub fn list_cows(&self) -> Result<Vec<CowRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare_cached("SELECT id, name, birthdate FROM cows ORDER BY rowid")?;
        let cows = stmt
            .query_map([], cow_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cows)
    }

    /// Identifiers of all registered cows in registration order.
    pub fn registered_cow_ids(&self) -> Result<Vec<String>> {
        let conn = self.connection();
        let mut stmt = conn.prepare_cached("SELECT id FROM cows ORDER BY rowid")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Persist one emission.
    pub fn save_measurement(&self, measurement: &EmittedMeasurement) -> Result<()> {
        self.save_measurements(std::slice::from_ref(measurement))
            .map(|_| ())
    }

    /// Persist a batch of emissions in a single transaction.
    pub fn save_measurements(&self, measurements: &[EmittedMeasurement]) -> Result<usize> {
        if measurements.is_empty() {
            return Ok(0);
        }
        let result = self.insert_batch(measurements);
        match (&result, self.metrics()) {
            (Ok(count), Some(metrics)) => metrics.record_saved(*count),
            (Err(_), Some(metrics)) => metrics.record_save_failure(),
            _ => {}
        }
        if let Ok(count) = &result {
            debug!(count, "measurements saved");
        }
        result
    }

    fn insert_batch(&self, measurements: &[EmittedMeasurement]) -> Result<usize> {
        let recorded_at = sortable_timestamp(Utc::now());
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_MEASUREMENT)?;
            for m in measurements {
                stmt.execute(params![
                    m.cow_id,
                    m.sensor_id,
                    m.timestamp,
                    sortable_timestamp(m.measured_at),
                    m.value,
                    m.unit,
                    m.cow_name,
                    m.cow_birthdate.map(|date| date.to_string()),
                    m.value_source.as_str(),
                    recorded_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(measurements.len())
    }

    /// Number of stored measurements for a cow.
    pub fn measurement_count(&self, cow_id: &str) -> Result<u64> {
        let conn = self.connection();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM measurements WHERE cow_id = ?1",
            params![cow_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

impl std::fmt::Debug for MeasurementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

fn cow_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CowRecord> {
    Ok(CowRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        birthdate: parse_date(2, &row.get::<_, String>(2)?)?,
    })
}

pub(crate) fn parse_date(column: usize, text: &str) -> rusqlite::Result<NaiveDate> {
    text.parse::<NaiveDate>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

pub(crate) fn parse_timestamp(column: usize, text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}
