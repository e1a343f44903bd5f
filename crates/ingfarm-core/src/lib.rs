//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Measurement service and scheduling lifecycle."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
//! Emission service tying the replay engine to the measurement store, plus the
//! periodic scheduler that drives it.

pub mod scheduler;
pub mod service;

pub use scheduler::{Scheduler, SchedulerHandle};
pub use service::{MeasurementService, ServiceError};
