//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "tests"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Dataset files through the service into a file-backed store."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use ingfarm_core::{MeasurementService, Scheduler};
use ingfarm_persistence::{MeasurementStore, NewCow};
use ingfarm_sim::{DatasetPaths, ReferenceDataset, ReplayEngine};
use tempfile::tempdir;

const ROSIE: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";
const MABEL: &str = "b2c3d4e5-f6a7-4b8c-9d0e-1f2a3b4c5d6e";

fn write_dataset(dir: &std::path::Path) -> Result<DatasetPaths> {
    let paths = DatasetPaths {
        cows: dir.join("cows.csv"),
        sensors: dir.join("sensors.csv"),
        measurements: dir.join("measurements.csv"),
    };
    fs::write(
        &paths.cows,
        format!("id,name,birthdate\n{ROSIE},Rosie,2018-04-12\n{MABEL},Mabel,2020-09-30\n"),
    )?;
    fs::write(&paths.sensors, "id,unit\nmilk-1,L\nscale-1,kg\n")?;
    fs::write(
        &paths.measurements,
        format!(
            "cow_id,sensor_id,timestamp,value\n\
             {ROSIE},milk-1,1700000000.0,\n\
             {ROSIE},milk-1,1700000060.0,11.75\n\
             {ROSIE},scale-1,1700000120.0,702.5\n\
             {MABEL},scale-1,1700000000.0,540.0\n"
        ),
    )?;
    Ok(paths)
}

#[test]
fn registered_cows_flow_into_the_store() -> Result<()> {
    let dir = tempdir()?;
    let paths = write_dataset(dir.path())?;
    let dataset = Arc::new(ReferenceDataset::load(&paths)?);

    let store = MeasurementStore::open(&dir.path().join("farm.db"))?;
    let seeded = store.seed_reference_data(&dataset)?;
    assert_eq!(seeded.cows, 2);
    assert_eq!(seeded.sensors, 2);

    let service = MeasurementService::new(Arc::new(ReplayEngine::new(dataset)), Arc::new(store));
    assert_eq!(service.emit_all()?, 2);

    let rosie = service.next_measurement(ROSIE)?;
    assert_eq!(rosie.value, 11.75);
    assert_eq!(service.store().measurement_count(ROSIE)?, 2);
    assert_eq!(service.store().measurement_count(MABEL)?, 1);

    let summary = service.store().milk_summary(ROSIE)?;
    assert_eq!(summary.total_measurements, 2);
    assert_eq!(summary.total_liters, 11.75);
    Ok(())
}

#[test]
fn cow_registered_after_startup_joins_the_batch() -> Result<()> {
    let dir = tempdir()?;
    let paths = write_dataset(dir.path())?;
    let dataset = Arc::new(ReferenceDataset::load(&paths)?);
    let service = MeasurementService::new(
        Arc::new(ReplayEngine::new(dataset)),
        Arc::new(MeasurementStore::in_memory()?),
    );
    assert_eq!(service.emit_all()?, 0);

    service.store().create_cow(
        MABEL,
        &NewCow {
            name: "Mabel".into(),
            birthdate: NaiveDate::from_ymd_opt(2020, 9, 30).unwrap(),
        },
    )?;
    assert_eq!(service.emit_all()?, 1);
    assert_eq!(service.known_cow_ids().len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_persists_batches_from_files() -> Result<()> {
    let dir = tempdir()?;
    let paths = write_dataset(dir.path())?;
    let dataset = Arc::new(ReferenceDataset::load(&paths)?);
    let store = MeasurementStore::in_memory()?;
    store.seed_reference_data(&dataset)?;
    let service = MeasurementService::new(Arc::new(ReplayEngine::new(dataset)), Arc::new(store));

    let handle = Scheduler::spawn(service.clone(), Duration::from_millis(25));
    tokio::time::sleep(Duration::from_millis(120)).await;
    let ticks = handle.shutdown().await?;

    assert!(ticks >= 2);
    assert_eq!(service.store().measurement_count(MABEL)?, ticks);
    assert_eq!(service.engine().cursor_position(ROSIE), Some((ticks % 3) as usize));
    Ok(())
}
