use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "DAILYDOCO_CONFIG";
pub const DATA_DIR_ENV: &str = "DAILYDOCO_DATA_DIR";
pub const DEBUG_ENV: &str = "DAILYDOCO_DEBUG";

const APP_DIR_NAME: &str = "dailydoco-pro";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    /// Where assembled videos land; `<data_dir>/videos` when unset.
    pub output_dir: Option<PathBuf>,
    /// Delay before the recorder is asked to confirm a new session.
    pub start_delay_ms: u64,
    /// Delay between a stop and the start of artifact assembly.
    pub processing_delay_ms: u64,
    /// How long the simulated recorder spends assembling an artifact.
    pub assembly_time_ms: u64,
    pub tick_interval_ms: u64,
    pub heartbeat_every_ticks: u32,
    pub job_batch_size: usize,
    pub max_assembly_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub processing_deadline_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: "dailydoco.sqlite3".into(),
            output_dir: None,
            start_delay_ms: 2_000,
            processing_delay_ms: 1_000,
            assembly_time_ms: 5_000,
            tick_interval_ms: 250,
            heartbeat_every_ticks: 40,
            job_batch_size: 32,
            max_assembly_attempts: 3,
            retry_backoff_base_ms: 2_000,
            retry_backoff_max_ms: 60_000,
            processing_deadline_secs: 15 * 60,
        }
    }
}

impl CaptureConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("videos"))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(10))
    }

    pub fn assembly_time(&self) -> Duration {
        Duration::from_millis(self.assembly_time_ms)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }

        let debug_mode = env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.heartbeat_every_ticks = 1;
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Resolves the config path from `DAILYDOCO_CONFIG`, falling back to the default data dir.
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir().join(CONFIG_FILE_NAME))
}

/// Reads the config at `path`, writing the defaults there on first run.
pub fn load_config(path: &Path) -> Result<CaptureConfig> {
    let mut config = if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                warn!("Ignoring malformed config {}: {err}", path.display());
                CaptureConfig::default()
            }
        }
    } else {
        let config = CaptureConfig::default();
        persist(path, &config)?;
        info!("Wrote default config to {}", path.display());
        config
    };

    config.apply_env_overrides();
    Ok(config)
}

fn persist(path: &Path, config: &CaptureConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(config)?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write config to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = load_config(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.max_assembly_attempts, 3);
        assert_eq!(config.processing_deadline_secs, 900);
    }

    #[test]
    fn partial_files_fall_back_to_defaults_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "startDelayMs": 10, "dataDir": "/srv/dailydoco" }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.start_delay_ms, 10);
        assert_eq!(config.processing_delay_ms, 1_000);
        assert_eq!(
            config.output_dir(),
            PathBuf::from("/srv/dailydoco").join("videos")
        );
        assert_eq!(
            config.database_path(),
            PathBuf::from("/srv/dailydoco/dailydoco.sqlite3")
        );
    }
}
