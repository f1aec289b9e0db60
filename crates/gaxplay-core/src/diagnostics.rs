use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, info_span, span::EnteredSpan, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

pub const DEFAULT_FILE_PREFIX: &str = "gaxplay";
pub const DEFAULT_LOG_FILTER: &str = "info,gaxplay_core=debug";
/// Overrides `rust_log_filter` without editing the config file.
pub const LOG_FILTER_ENV: &str = "GAXPLAY_LOG";

/// Holds the session span and the JSON log writer. Drop it last so buffered
/// codec and render events reach the file.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    log_file: PathBuf,
    _session: EnteredSpan,
    _file_guard: WorkerGuard,
}

impl TelemetryGuard {
    #[must_use]
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Installs stdout and JSON-file logging for one CLI or test session.
///
/// Every event is recorded under a `gaxplay_session` span carrying the
/// session id, so a log file that collects several runs can be split again.
pub fn init_tracing(
    log_dir: impl AsRef<Path>,
    config: &DiagnosticsConfig,
) -> anyhow::Result<TelemetryGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    let file_name = format!("{}-{timestamp}.log", config.trace_file_prefix);
    let log_file = log_dir.join(&file_name);
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(&config.rust_log_filter));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    let session = info_span!(
        "gaxplay_session",
        %session_id,
        version = env!("CARGO_PKG_VERSION")
    )
    .entered();
    match installed {
        Ok(()) => info!(log_file = %log_file.display(), "tracing initialized"),
        Err(error) => warn!(?error, "global tracing subscriber already initialized"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_file,
        _session: session,
        _file_guard: file_guard,
    })
}
