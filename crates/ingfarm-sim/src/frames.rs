//! ---
//! farm_section: "11-simulation"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Replay engine output types."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How the `value` of an emission was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// The historical row carried a value.
    #[default]
    Observed,
    /// Missing value carried over from the last emission with the same unit.
    Carried,
    /// Missing value at the first position of the cow's sequence.
    FirstPositionDefault,
    /// Missing value with no earlier emission of the same unit.
    NoHistoryDefault,
}

impl ValueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueSource::Observed => "observed",
            ValueSource::Carried => "carried",
            ValueSource::FirstPositionDefault => "first_position_default",
            ValueSource::NoHistoryDefault => "no_history_default",
        }
    }

    /// True when the value is the fallback rather than a measured number.
    pub fn is_default(&self) -> bool {
        matches!(
            self,
            ValueSource::FirstPositionDefault | ValueSource::NoHistoryDefault
        )
    }
}

/// Fully resolved measurement handed to callers of the replay engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedMeasurement {
    pub cow_id: String,
    pub sensor_id: String,
    /// Wall-clock emission time in fractional epoch seconds.
    pub timestamp: f64,
    /// Same instant as `timestamp`.
    pub measured_at: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, rename = "name")]
    pub cow_name: Option<String>,
    #[serde(default, rename = "birthdate")]
    pub cow_birthdate: Option<NaiveDate>,
    #[serde(default)]
    pub value_source: ValueSource,
}
