//! ---
//! farm_section: "11-simulation"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Reference dataset loading for the replay engine."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::ReaderBuilder;
use ingfarm_common::config::DataConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Failures raised while loading the reference tables. All of them are fatal
/// for engine construction.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("unable to read dataset file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid dataset JSON {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid dataset row in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("unsupported dataset format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
}

/// A monitored animal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCow {
    pub id: String,
    pub name: String,
    pub birthdate: NaiveDate,
}

/// A measuring device and the unit it reports in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSensor {
    pub id: String,
    pub unit: String,
}

/// One row of the historical per-cow, per-sensor series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub cow_id: String,
    pub sensor_id: String,
    pub timestamp: f64,
    #[serde(default)]
    pub value: Option<f64>,
}

/// File locations of the three reference tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub cows: PathBuf,
    pub sensors: PathBuf,
    pub measurements: PathBuf,
}

impl From<&DataConfig> for DatasetPaths {
    fn from(config: &DataConfig) -> Self {
        Self {
            cows: config.cows.clone(),
            sensors: config.sensors.clone(),
            measurements: config.measurements.clone(),
        }
    }
}

/// Read-only tables shared by every replay cursor.
#[derive(Debug, Clone, Default)]
pub struct ReferenceDataset {
    cows: Vec<ReferenceCow>,
    sensors: Vec<ReferenceSensor>,
    records: Vec<HistoricalRecord>,
    cow_index: HashMap<String, usize>,
    sensor_index: HashMap<String, usize>,
}

impl ReferenceDataset {
    /// Load all three tables. Row order of the measurement table is kept.
    pub fn load(paths: &DatasetPaths) -> Result<Self, DatasetError> {
        let cows = load_table::<ReferenceCow>(&paths.cows)?;
        let sensors = load_table::<ReferenceSensor>(&paths.sensors)?;
        let records = load_table::<HistoricalRecord>(&paths.measurements)?;
        let dataset = Self::from_parts(cows, sensors, records);
        info!(
            cows = dataset.cows.len(),
            sensors = dataset.sensors.len(),
            records = dataset.records.len(),
            measurements = %paths.measurements.display(),
            "reference dataset loaded"
        );
        Ok(dataset)
    }

    /// Build a dataset from in-memory tables. For duplicate cow or sensor ids
    /// the first row wins.
    pub fn from_parts(
        cows: Vec<ReferenceCow>,
        sensors: Vec<ReferenceSensor>,
        records: Vec<HistoricalRecord>,
    ) -> Self {
        let mut cow_index = HashMap::with_capacity(cows.len());
        for (position, cow) in cows.iter().enumerate() {
            cow_index.entry(cow.id.clone()).or_insert(position);
        }
        let mut sensor_index = HashMap::with_capacity(sensors.len());
        for (position, sensor) in sensors.iter().enumerate() {
            sensor_index.entry(sensor.id.clone()).or_insert(position);
        }
        Self {
            cows,
            sensors,
            records,
            cow_index,
            sensor_index,
        }
    }

    pub fn cow(&self, id: &str) -> Option<&ReferenceCow> {
        self.cow_index.get(id).map(|&position| &self.cows[position])
    }

    pub fn sensor(&self, id: &str) -> Option<&ReferenceSensor> {
        self.sensor_index
            .get(id)
            .map(|&position| &self.sensors[position])
    }

    pub fn cows(&self) -> &[ReferenceCow] {
        &self.cows
    }

    pub fn sensors(&self) -> &[ReferenceSensor] {
        &self.sensors
    }

    pub fn records(&self) -> &[HistoricalRecord] {
        &self.records
    }

    /// The cow's subsequence of the historical table, in file row order.
    pub fn records_for(&self, cow_id: &str) -> Vec<HistoricalRecord> {
        self.records
            .iter()
            .filter(|record| record.cow_id == cow_id)
            .cloned()
            .collect()
    }
}

fn load_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DatasetError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => load_json(path),
        Some("csv") => load_csv(path),
        _ => Err(DatasetError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DatasetError> {
    let contents = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn load_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, DatasetError> {
    let file = fs::File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);
    let mut rows = Vec::new();
    for row in reader.deserialize::<T>() {
        rows.push(row.map_err(|source| DatasetError::Csv {
            path: path.to_path_buf(),
            source,
        })?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::Builder;

    fn write_fixture(suffix: &str, body: &str) -> Result<tempfile::TempPath> {
        let mut file = Builder::new().suffix(suffix).tempfile()?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        Ok(file.into_temp_path())
    }

    #[test]
    fn csv_empty_value_cells_are_absent() -> Result<()> {
        let path = write_fixture(
            ".csv",
            "cow_id,sensor_id,timestamp,value\ncow-1,sensor-1,1704067200.0,10.5\ncow-1,sensor-1,1704074400.0,\n",
        )?;
        let rows = load_table::<HistoricalRecord>(path.as_ref())?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, Some(10.5));
        assert_eq!(rows[1].value, None);
        Ok(())
    }

    #[test]
    fn json_null_values_are_absent() -> Result<()> {
        let path = write_fixture(
            ".json",
            r#"[{"cow_id":"cow-2","sensor_id":"sensor-2","timestamp":1704070800.0,"value":null},
                {"cow_id":"cow-2","sensor_id":"sensor-2","timestamp":1704078000.0}]"#,
        )?;
        let rows = load_table::<HistoricalRecord>(path.as_ref())?;
        assert!(rows.iter().all(|row| row.value.is_none()));
        Ok(())
    }

    #[test]
    fn cows_parse_birthdates() -> Result<()> {
        let path = write_fixture(".csv", "id,name,birthdate\ncow-1,Bessie,2020-01-15\n")?;
        let cows = load_table::<ReferenceCow>(path.as_ref())?;
        assert_eq!(cows[0].birthdate, NaiveDate::from_ymd_opt(2020, 1, 15).unwrap());
        Ok(())
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_table::<ReferenceSensor>(Path::new("sensors.parquet")).unwrap_err();
        assert!(matches!(err, DatasetError::UnsupportedFormat(_)));
    }

    #[test]
    fn malformed_rows_name_the_file() -> Result<()> {
        let path = write_fixture(".csv", "id,unit\nsensor-1\n")?;
        let err = load_table::<ReferenceSensor>(path.as_ref()).unwrap_err();
        assert!(matches!(err, DatasetError::Csv { .. }));
        assert!(err.to_string().contains(&path.display().to_string()));
        Ok(())
    }

    #[test]
    fn records_for_keeps_file_order_and_first_lookup_wins() {
        let dataset = ReferenceDataset::from_parts(
            vec![],
            vec![
                ReferenceSensor {
                    id: "s".into(),
                    unit: "L".into(),
                },
                ReferenceSensor {
                    id: "s".into(),
                    unit: "kg".into(),
                },
            ],
            vec![
                HistoricalRecord {
                    cow_id: "a".into(),
                    sensor_id: "s".into(),
                    timestamp: 3.0,
                    value: Some(1.0),
                },
                HistoricalRecord {
                    cow_id: "b".into(),
                    sensor_id: "s".into(),
                    timestamp: 2.0,
                    value: Some(2.0),
                },
                HistoricalRecord {
                    cow_id: "a".into(),
                    sensor_id: "s".into(),
                    timestamp: 1.0,
                    value: Some(3.0),
                },
            ],
        );
        let timestamps: Vec<f64> = dataset
            .records_for("a")
            .iter()
            .map(|record| record.timestamp)
            .collect();
        assert_eq!(timestamps, vec![3.0, 1.0]);
        assert_eq!(dataset.sensor("s").map(|s| s.unit.as_str()), Some("L"));
        assert!(dataset.records_for("missing").is_empty());
    }
}
