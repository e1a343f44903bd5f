//! ---
//! farm_section: "03-persistence-logging"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Persistence abstractions and storage bindings."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{self, HistogramOpts, HistogramVec, IntCounter, Opts, Registry};

use crate::Result;

/// Metrics published by the persistence subsystem.
#[derive(Clone)]
pub struct PersistenceMetrics {
    measurements_saved: IntCounter,
    save_failures: IntCounter,
    report_duration: HistogramVec,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let measurements_saved = IntCounter::with_opts(Opts::new(
            "ingfarm_measurements_saved_total",
            "Total number of replayed measurements written to the store",
        ))?;
        registry.register(Box::new(measurements_saved.clone()))?;

        let save_failures = IntCounter::with_opts(Opts::new(
            "ingfarm_measurement_save_failures_total",
            "Total number of measurement batches that failed to persist",
        ))?;
        registry.register(Box::new(save_failures.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "ingfarm_report_duration_seconds",
            "Time spent querying the store for an aggregate report",
        )
        .buckets(prometheus::exponential_buckets(0.0005, 2.0, 12)?);
        let report_duration = HistogramVec::new(histogram_opts, &["report"])?;
        registry.register(Box::new(report_duration.clone()))?;

        Ok(Self {
            measurements_saved,
            save_failures,
            report_duration,
        })
    }

    /// Count measurements persisted by a successful batch.
    pub fn record_saved(&self, count: usize) {
        self.measurements_saved.inc_by(count as u64);
    }

    /// Count a failed batch.
    pub fn record_save_failure(&self) {
        self.save_failures.inc();
    }

    /// Observe how long a report query took.
    pub fn observe_report(&self, report: &str, seconds: f64) {
        self.report_duration
            .with_label_values(&[report])
            .observe(seconds);
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
