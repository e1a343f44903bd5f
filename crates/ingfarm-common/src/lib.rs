//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Shared primitives and utilities for the telemetry runtime."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
//! Core shared primitives for the IngFarm workspace.
//! This crate exposes configuration loading, logging, and time conversion
//! utilities consumed by the replay engine, persistence, and daemon crates.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, AppConfig, DataConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    SchedulerConfig, StorageConfig,
};
pub use logging::{init_tracing, LogFormat};
