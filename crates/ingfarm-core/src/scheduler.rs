//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Periodic bulk emission for registered cows."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::service::MeasurementService;

/// Drives [`MeasurementService::emit_all`] on a fixed interval.
///
/// The first batch is emitted immediately. A failed tick is logged and the next
/// tick retries.
#[derive(Debug)]
pub struct Scheduler;

impl Scheduler {
    pub fn spawn(service: MeasurementService, interval: Duration) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(run(service, interval, shutdown_rx));
        info!(interval_secs = interval.as_secs_f64(), "measurement scheduler started");
        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Lifecycle handle for a running [`Scheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<u64>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for the in-flight tick to finish.
    /// Returns the number of ticks that ran.
    pub async fn shutdown(self) -> Result<u64> {
        let _ = self.shutdown.send(());
        let ticks = self.task.await.context("scheduler task panicked")?;
        info!(ticks, "measurement scheduler stopped");
        Ok(ticks)
    }
}

async fn run(
    service: MeasurementService,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = 0u64;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("scheduler shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                ticks += 1;
                let worker = service.clone();
                match tokio::task::spawn_blocking(move || worker.emit_all()).await {
                    Ok(Ok(saved)) => debug!(tick = ticks, saved, "scheduled emission complete"),
                    Ok(Err(err)) => warn!(tick = ticks, error = %err, "scheduled emission failed"),
                    Err(err) => warn!(tick = ticks, error = %err, "scheduled emission task aborted"),
                }
            }
        }
    }
    ticks
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use ingfarm_persistence::{MeasurementStore, NewCow};
    use ingfarm_sim::{HistoricalRecord, ReferenceCow, ReferenceDataset, ReferenceSensor, ReplayEngine};

    use super::*;

    const COW: &str = "6b1f0c7e-9a3d-4f52-8c11-0d2e4b7a9f30";

    fn registered_service() -> MeasurementService {
        let dataset = ReferenceDataset::from_parts(
            vec![ReferenceCow {
                id: COW.into(),
                name: "Clover".into(),
                birthdate: NaiveDate::from_ymd_opt(2019, 6, 2).unwrap(),
            }],
            vec![ReferenceSensor {
                id: "sensor-w".into(),
                unit: "kg".into(),
            }],
            vec![HistoricalRecord {
                cow_id: COW.into(),
                sensor_id: "sensor-w".into(),
                timestamp: 0.0,
                value: Some(612.4),
            }],
        );
        let store = MeasurementStore::in_memory().unwrap();
        store
            .create_cow(
                COW,
                &NewCow {
                    name: "Clover".into(),
                    birthdate: NaiveDate::from_ymd_opt(2019, 6, 2).unwrap(),
                },
            )
            .unwrap();
        MeasurementService::new(
            Arc::new(ReplayEngine::new(Arc::new(dataset))),
            Arc::new(store),
        )
    }

    #[tokio::test]
    async fn first_tick_runs_immediately() {
        let service = registered_service();
        let handle = Scheduler::spawn(service.clone(), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let ticks = handle.shutdown().await.unwrap();
        assert_eq!(ticks, 1);
        assert_eq!(service.store().measurement_count(COW).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn keeps_emitting_until_shutdown() {
        let service = registered_service();
        let handle = Scheduler::spawn(service.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        let ticks = handle.shutdown().await.unwrap();
        assert!(ticks >= 2);
        assert_eq!(service.store().measurement_count(COW).unwrap(), ticks);
    }
}
