//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "binary"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Binary entrypoint for the IngFarm daemon."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ingfarm_api::{spawn_api_server, ApiServer, ApiState};
use ingfarm_common::config::AppConfig;
use ingfarm_common::logging::init_tracing;
use ingfarm_core::{MeasurementService, Scheduler, SchedulerHandle};
use ingfarm_metrics::{new_registry, spawn_http_server, DaemonMetrics, ReplayMetrics, SharedRegistry};
use ingfarm_persistence::{MeasurementStore, PersistenceMetrics};
use ingfarm_sim::{DatasetPaths, ReferenceDataset, ReplayEngine};
use tokio::signal;
use tracing::{info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("IngFarm ", env!("CARGO_PKG_VERSION")),
    about = "IngFarm measurement replay daemon",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to configuration file; takes precedence over INGFARM_CONFIG"
    )]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the API listen address")]
    listen: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the API and run the emission scheduler")]
    Run,
    #[command(about = "Print replayed measurements for one cow as JSON lines without storing them")]
    Emit {
        cow_id: String,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    #[command(about = "List cow ids that have replayable history")]
    Cows,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let candidates = [
        PathBuf::from("configs/ingfarm.toml"),
        PathBuf::from("configs/ingfarm.example.toml"),
    ];

    let load_started = Instant::now();
    let loaded = AppConfig::load_from(cli.config.as_deref(), &candidates)?;
    let load_duration = load_started.elapsed();
    let mut config = loaded.config;
    if let Some(listen) = cli.listen {
        config.api.listen = listen;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("ingfarmd", &config.logging)?;
            match &loaded.source {
                Some(path) => info!(config_path = %path.display(), "configuration loaded"),
                None => info!("no configuration file found; running with defaults"),
            }
            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(VERSION, build_profile());
            run_daemon(config, registry).await?
        }
        Commands::Emit { cow_id, count } => {
            let dataset = load_dataset(&config)?;
            let engine = ReplayEngine::new(dataset);
            for _ in 0..count {
                let measurement = engine.next_measurement(&cow_id)?;
                println!("{}", serde_json::to_string(&measurement)?);
            }
        }
        Commands::Cows => {
            let dataset = load_dataset(&config)?;
            for cow_id in ReplayEngine::new(dataset).known_cow_ids() {
                println!("{cow_id}");
            }
        }
    }

    Ok(())
}

fn load_dataset(config: &AppConfig) -> Result<Arc<ReferenceDataset>> {
    let paths = DatasetPaths::from(&config.data);
    let dataset = ReferenceDataset::load(&paths).context("failed to load reference dataset")?;
    Ok(Arc::new(dataset))
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let dataset = load_dataset(&config)?;
    info!(
        cows = dataset.cows().len(),
        sensors = dataset.sensors().len(),
        records = dataset.records().len(),
        "reference dataset loaded"
    );

    let persistence_metrics = Arc::new(PersistenceMetrics::new(registry.clone())?);
    let store = MeasurementStore::open(&config.storage.database)
        .with_context(|| {
            format!(
                "failed to open measurement store {}",
                config.storage.database.display()
            )
        })?
        .with_metrics(persistence_metrics);
    let seeded = store.seed_reference_data(&dataset)?;
    info!(cows = seeded.cows, sensors = seeded.sensors, "reference data seeded");

    let service = MeasurementService::new(Arc::new(ReplayEngine::new(dataset)), Arc::new(store))
        .with_metrics(ReplayMetrics::new(registry.clone())?);

    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let scheduler: Option<SchedulerHandle> = if config.scheduler.enabled {
        Some(Scheduler::spawn(service.clone(), config.scheduler.interval))
    } else {
        info!("emission scheduler disabled by configuration");
        None
    };

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let state = Arc::new(ApiState::new(service, VERSION));
        match spawn_api_server(state, config.api.listen) {
            Ok(server) => {
                info!(address = %server.addr(), "api server listening");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    if let Some(handle) = scheduler {
        handle.shutdown().await?;
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}
