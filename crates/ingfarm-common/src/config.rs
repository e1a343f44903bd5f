//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Shared primitives and utilities for the telemetry runtime."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_cows_path() -> PathBuf {
    PathBuf::from("data/cows.csv")
}

fn default_sensors_path() -> PathBuf {
    PathBuf::from("data/sensors.csv")
}

fn default_measurements_path() -> PathBuf {
    PathBuf::from("data/measurements.csv")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/ingfarm.db")
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Primary configuration object for the IngFarm runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "INGFARM_CONFIG";

    /// Load configuration from disk, respecting the `INGFARM_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// When neither the environment override nor a candidate exists the
    /// built-in defaults are returned with `source: None`.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        Self::load_from(None, candidates)
    }

    /// Load configuration, letting an explicit path beat `INGFARM_CONFIG`.
    ///
    /// An explicit path or environment override must exist; only the
    /// candidates are checked for existence.
    pub fn load_from<P: AsRef<Path>>(
        explicit: Option<&Path>,
        candidates: &[P],
    ) -> Result<LoadedAppConfig> {
        let env_path = std::env::var(Self::ENV_CONFIG_PATH).ok();
        if let Some(path) = resolve_source(explicit, env_path.as_deref(), candidates) {
            let config = Self::from_path(&path)?;
            return Ok(LoadedAppConfig {
                config,
                source: Some(path),
            });
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = AppConfig::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.data.validate()?;
        self.scheduler.validate()?;
        if self.storage.database.as_os_str().is_empty() {
            return Err(anyhow!("storage.database must not be empty"));
        }
        Ok(())
    }
}

/// Explicit path, then a non-blank environment override, then the first existing candidate.
fn resolve_source<P: AsRef<Path>>(
    explicit: Option<&Path>,
    env_path: Option<&str>,
    candidates: &[P],
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_path.map(str::trim).filter(|path| !path.is_empty()) {
        return Some(PathBuf::from(path));
    }
    candidates
        .iter()
        .find(|candidate| candidate.as_ref().exists())
        .map(|candidate| candidate.as_ref().to_path_buf())
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Locations of the three reference tables replayed by the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_cows_path")]
    pub cows: PathBuf,
    #[serde(default = "default_sensors_path")]
    pub sensors: PathBuf,
    #[serde(default = "default_measurements_path")]
    pub measurements: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            cows: default_cows_path(),
            sensors: default_sensors_path(),
            measurements: default_measurements_path(),
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("cows", &self.cows),
            ("sensors", &self.sensors),
            ("measurements", &self.measurements),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("data.{} path must not be empty", name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_scheduler_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval: default_scheduler_interval(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("scheduler.interval must be at least one second"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

impl LoggingConfig {
    pub const DEFAULT_FILE_PREFIX: &str = "ingfarm";

    /// Base name of the rolling log file for `service`; the appender adds the date suffix.
    pub fn file_name(&self, service: &str) -> String {
        let prefix = self
            .file_prefix
            .as_deref()
            .unwrap_or(Self::DEFAULT_FILE_PREFIX);
        format!("{prefix}-{service}.log")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.scheduler.interval, Duration::from_secs(60));
        assert!(config.scheduler.enabled);
        assert_eq!(config.data.measurements, PathBuf::from("data/measurements.csv"));
        assert_eq!(config.api.listen.port(), 8000);
    }

    #[test]
    fn parses_sections_and_durations() {
        let config: AppConfig = r#"
            [data]
            cows = "fixtures/cows.json"

            [scheduler]
            enabled = false
            interval = 5

            [logging]
            format = "pretty"
        "#
        .parse()
        .unwrap();
        assert_eq!(config.data.cows, PathBuf::from("fixtures/cows.json"));
        assert_eq!(config.data.sensors, PathBuf::from("data/sensors.csv"));
        assert!(!config.scheduler.enabled);
        assert_eq!(config.scheduler.interval, Duration::from_secs(5));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn shipped_example_config_parses() {
        let config: AppConfig = include_str!("../../../configs/ingfarm.example.toml")
            .parse()
            .unwrap();
        assert_eq!(config.logging.file_prefix.as_deref(), Some("ingfarmd"));
        assert_eq!(config.metrics.listen.port(), 9898);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = "[scheduler]\ninterval = 0\n".parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("scheduler.interval"));
    }

    #[test]
    fn load_prefers_first_existing_candidate() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "[storage]\ndatabase = \"custom.db\"")?;
        file.flush()?;

        let missing = PathBuf::from("does/not/exist.toml");
        let loaded = AppConfig::load_with_source(&[missing, file.path().to_path_buf()])?;
        assert_eq!(loaded.config.storage.database, PathBuf::from("custom.db"));
        assert_eq!(loaded.source.as_deref(), Some(file.path()));
        Ok(())
    }

    #[test]
    fn explicit_path_beats_environment_override() -> Result<()> {
        let file = NamedTempFile::new()?;
        let explicit = Path::new("cli/ingfarm.toml");

        let resolved = resolve_source(Some(explicit), Some("env/ingfarm.toml"), &[file.path()]);
        assert_eq!(resolved.as_deref(), Some(explicit));

        let resolved = resolve_source(None, Some("env/ingfarm.toml"), &[file.path()]);
        assert_eq!(resolved, Some(PathBuf::from("env/ingfarm.toml")));

        let resolved = resolve_source(None, Some("  "), &[file.path()]);
        assert_eq!(resolved.as_deref(), Some(file.path()));

        let none: [&Path; 1] = [Path::new("does/not/exist.toml")];
        assert_eq!(resolve_source(None, None, &none), None);
        Ok(())
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let none: [&Path; 0] = [];
        let err = AppConfig::load_from(Some(Path::new("does/not/exist.toml")), &none).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.toml"));
    }
}
