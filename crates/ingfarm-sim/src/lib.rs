//! ---
//! farm_section: "11-simulation"
//! farm_subsection: "01-bootstrap"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Replay engine module exports and shared types."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
//! Measurement replay for the IngFarm simulator.
//!
//! [`ReferenceDataset`] holds the static cow, sensor, and historical
//! measurement tables. [`ReplayEngine`] walks each cow's slice of the
//! historical table cyclically, repairs missing values, and stamps every
//! emission with the current wall-clock time.

pub mod dataset;
pub mod frames;
pub mod replay;

pub use dataset::{
    DatasetError, DatasetPaths, HistoricalRecord, ReferenceCow, ReferenceDataset, ReferenceSensor,
};
pub use frames::{EmittedMeasurement, ValueSource};
pub use replay::{Clock, ReplayEngine, ReplayError, SystemClock, MISSING_VALUE_DEFAULT};
