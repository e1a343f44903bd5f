//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Emit replayed measurements and hand them to the store."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ingfarm_metrics::ReplayMetrics;
use ingfarm_persistence::{MeasurementStore, PersistenceError};
use ingfarm_sim::{EmittedMeasurement, ReplayEngine, ReplayError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures surfaced by [`MeasurementService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ServiceError {
    /// True when the cow has no historical rows to replay.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Replay(ReplayError::NotFound { .. }))
    }
}

/// Replay engine plus the store its emissions are written to.
#[derive(Clone)]
pub struct MeasurementService {
    engine: Arc<ReplayEngine>,
    store: Arc<MeasurementStore>,
    metrics: Option<ReplayMetrics>,
}

impl MeasurementService {
    pub fn new(engine: Arc<ReplayEngine>, store: Arc<MeasurementStore>) -> Self {
        Self {
            engine,
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ReplayMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn engine(&self) -> &Arc<ReplayEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<MeasurementStore> {
        &self.store
    }

    /// Emit the next measurement for `cow_id` and persist it.
    pub fn next_measurement(&self, cow_id: &str) -> Result<EmittedMeasurement, ServiceError> {
        let measurement = match self.engine.next_measurement(cow_id) {
            Ok(measurement) => measurement,
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_not_found();
                }
                return Err(err.into());
            }
        };
        self.record(std::slice::from_ref(&measurement));
        self.store.save_measurement(&measurement)?;
        debug!(
            cow_id,
            sensor_id = %measurement.sensor_id,
            value = measurement.value,
            source = measurement.value_source.as_str(),
            "measurement emitted"
        );
        Ok(measurement)
    }

    /// Emit one measurement per registered cow and persist the batch.
    ///
    /// Registered cows without historical rows are skipped. Returns the number of
    /// measurements written.
    pub fn emit_all(&self) -> Result<usize, ServiceError> {
        let registered = self.store.registered_cow_ids()?;
        let batch = self.engine.emit_for_registered(&registered);
        self.record(&batch);
        if let Some(metrics) = &self.metrics {
            metrics.set_last_batch(batch.len());
        }
        if batch.is_empty() {
            if !registered.is_empty() {
                warn!(
                    registered = registered.len(),
                    "no registered cow has historical measurements"
                );
            }
            return Ok(0);
        }
        let saved = self.store.save_measurements(&batch)?;
        info!(registered = registered.len(), saved, "measurement batch persisted");
        Ok(saved)
    }

    /// Rewind one cow, or every cow when `cow_id` is `None`.
    pub fn reset(&self, cow_id: Option<&str>) {
        self.engine.reset_index(cow_id);
    }

    pub fn known_cow_ids(&self) -> BTreeSet<String> {
        self.engine.known_cow_ids()
    }

    fn record(&self, batch: &[EmittedMeasurement]) {
        if let Some(metrics) = &self.metrics {
            for measurement in batch {
                metrics.record_emission(measurement.value_source.as_str());
            }
        }
    }
}

impl fmt::Debug for MeasurementService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeasurementService")
            .field("engine", &self.engine)
            .field("store", &self.store.location())
            .finish_non_exhaustive()
    }
}
