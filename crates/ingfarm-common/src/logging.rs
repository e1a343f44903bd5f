//! ---
//! farm_section: "01-core-functionality"
//! farm_subsection: "module"
//! farm_type: "source"
//! farm_scope: "code"
//! farm_description: "Tracing setup for the replay daemon: filter precedence and rolling log files."
//! farm_version: "v0.1.0"
//! farm_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "INGFARM_LOG";
const RUST_LOG_ENV: &str = "RUST_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// * `INGFARM_LOG` overrides the filter (e.g. `info`, `debug,ingfarm_sim=trace`).
///   When unset `RUST_LOG` is honoured, finally defaulting to `info`.
/// * Stdout receives either structured JSON or pretty output; a daily rolling
///   JSON file is always written to `config.directory`.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;

    let file_appender = daily(&config.directory, config.file_name(service_name));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let ingfarm_log = std::env::var(LOG_ENV).ok();
    let rust_log = std::env::var(RUST_LOG_ENV).ok();
    let filter = match filter_directive(ingfarm_log.as_deref(), rust_log.as_deref()) {
        Ok(directive) => EnvFilter::new(directive),
        Err(err) => {
            eprintln!(
                "invalid {} directive ({}); defaulting to {} logging",
                LOG_ENV, err, DEFAULT_DIRECTIVE
            );
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

/// Resolve the filter directive from `INGFARM_LOG` and `RUST_LOG`.
///
/// A non-blank `INGFARM_LOG` wins and is reported when it does not parse.
/// A malformed `RUST_LOG` is ignored silently, as are blank values.
fn filter_directive(ingfarm_log: Option<&str>, rust_log: Option<&str>) -> Result<String, String> {
    fn non_blank(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|value| !value.is_empty())
    }

    if let Some(directive) = non_blank(ingfarm_log) {
        return EnvFilter::try_new(directive)
            .map(|_| directive.to_owned())
            .map_err(|err| err.to_string());
    }
    Ok(non_blank(rust_log)
        .filter(|directive| EnvFilter::try_new(directive).is_ok())
        .unwrap_or(DEFAULT_DIRECTIVE)
        .to_owned())
}
