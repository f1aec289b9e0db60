use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    diagnostics::{DEFAULT_FILE_PREFIX, DEFAULT_LOG_FILTER},
    export::RenderLimits,
    sequencer::PlaybackOptions,
    timing::FRAME_RATE,
};

pub const CONFIG_FILE_NAME: &str = "gaxplay.config.toml";
pub const CONFIG_PATH_ENV: &str = "GAXPLAY_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub render: RenderConfig,
    pub diagnostics: DiagnosticsConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub frame_rate: f64,
    pub max_loops: u32,
    pub max_seconds: f64,
    pub gain: f64,
    pub apply_master_volume: bool,
    pub mixing_rate_override: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub logs_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        let limits = RenderLimits::default();
        Self {
            frame_rate: FRAME_RATE,
            max_loops: limits.max_loops,
            max_seconds: limits.max_seconds,
            gain: 1.0,
            apply_master_volume: true,
            mixing_rate_override: None,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: DEFAULT_LOG_FILTER.to_string(),
            trace_file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("logs"),
            export_dir: PathBuf::from("data/exports"),
        }
    }
}

impl RenderConfig {
    #[must_use]
    pub fn playback_options(&self) -> PlaybackOptions {
        PlaybackOptions {
            frame_rate: self.frame_rate,
            gain: self.gain,
            apply_master_volume: self.apply_master_volume,
            mixing_rate_override: self.mixing_rate_override,
        }
    }

    #[must_use]
    pub fn limits(&self) -> RenderLimits {
        RenderLimits {
            max_loops: self.max_loops,
            max_seconds: self.max_seconds,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path()?.with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::from_path(&config_path)
    }

    /// Like [`Self::load`], but a missing file yields the defaults.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path()? {
            Some(path) => Self::from_path(&path),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_path(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file {}", config_path.display()))?;

        let config: AppConfig = toml::from_str(&content).with_context(|| {
            format!("failed to parse config TOML from {}", config_path.display())
        })?;

        Ok(config)
    }
}

fn discover_config_path() -> Result<Option<PathBuf>> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    Ok(candidates.into_iter().find(|path| path.is_file()))
}
