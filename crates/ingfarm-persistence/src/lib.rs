//! ---
//! farm_section: "03-persistence-logging"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Persistence abstractions and storage bindings."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable storage for replayed measurements and the reports built on it.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for SQLite failures.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Wrapper for IO errors encountered while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Cow ids created through the registry must be UUIDs.
    #[error("Invalid UUID format: {0}")]
    InvalidCowId(String),
    /// A cow with the requested id is already registered.
    #[error("Cow with id {0} already exists")]
    CowExists(String),
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod metrics;
pub mod reports;
pub mod store;

pub use metrics::PersistenceMetrics;
pub use reports::{
    CowWeightReport, DailyMilkReport, MeasurementDetail, MilkSummaryReport, MILK_UNIT, WEIGHT_UNIT,
};
pub use store::{CowRecord, MeasurementStore, NewCow, SeedSummary};
