//! On-disk configuration and data locations.
//!
//! Configuration lives in `<data_dir>/config.toml`. Every section is
//! optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sift_index::SearchSettings;
use sift_remote::{DEFAULT_BASE_URL, DEFAULT_BODY_TYPE};
use sift_vector::{EmbedderConfig, EmbeddingBackend};

use crate::scheduler::SchedulerConfig;
use crate::sync::{SyncOptions, DEFAULT_MAX_POLL_ATTEMPTS, DEFAULT_WINDOW_DAYS};

pub const DATA_DIR_ENV: &str = "SIFT_DATA_DIR";
pub const EMBED_BACKEND_ENV: &str = "SIFT_EMBED_BACKEND";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub remote: RemoteConfig,
    pub embedding: EmbedderConfig,
    pub search: SearchSettings,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub window_days: u32,
    pub body_type: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            window_days: DEFAULT_WINDOW_DAYS,
            body_type: DEFAULT_BODY_TYPE.to_string(),
            poll_interval_ms: 1000,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            window_days: self.window_days,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_attempts: self.max_poll_attempts,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SiftConfig {
    /// Load from a TOML file, falling back to defaults when it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load and apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        if let Ok(backend) = std::env::var(EMBED_BACKEND_ENV) {
            config.embedding.backend = parse_backend(&backend)?;
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

fn parse_backend(value: &str) -> Result<EmbeddingBackend> {
    match value.trim().to_ascii_lowercase().as_str() {
        "openai" => Ok(EmbeddingBackend::OpenAi),
        "hash" => Ok(EmbeddingBackend::Hash),
        other => anyhow::bail!("{} must be `openai` or `hash`, got `{}`", EMBED_BACKEND_ENV, other),
    }
}

/// Files under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiftPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl SiftPaths {
    /// `SIFT_DATA_DIR`, else the platform data directory, else `.sift`.
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            return Self::from_base(PathBuf::from(dir));
        }
        if let Some(dirs) = directories::ProjectDirs::from("dev", "sift", "sift") {
            return Self::from_base(dirs.data_dir().to_path_buf());
        }
        Self::from_base(PathBuf::from(".sift"))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let db_path = base_dir.join("sift.db");
        let config_path = base_dir.join("config.toml");
        Self {
            base_dir,
            db_path,
            config_path,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SiftConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, SiftConfig::default());
        assert_eq!(config.remote.window_days, 3);
        assert_eq!(config.search.similarity, 0.80);
        assert_eq!(config.search.default_limit, 10);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[remote]\nwindow_days = 14\n\n[embedding]\nbackend = \"hash\"\n\n[scheduler]\ninterval_secs = 60\n",
        )
        .unwrap();

        let config = SiftConfig::load(&path).unwrap();
        assert_eq!(config.remote.window_days, 14);
        assert_eq!(config.remote.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Hash);
        assert_eq!(config.scheduler.interval_secs, 60);
        assert_eq!(config.remote.sync_options().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = SiftConfig::default();
        config.search.default_limit = 25;
        config.save(&path).unwrap();
        assert_eq!(SiftConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[remote\n").unwrap();
        let err = SiftConfig::load(&path).unwrap_err();
        assert!(format!("{err}").contains("config.toml"));
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!(parse_backend("OpenAI").unwrap(), EmbeddingBackend::OpenAi);
        assert_eq!(parse_backend(" hash ").unwrap(), EmbeddingBackend::Hash);
        assert!(parse_backend("bert").is_err());
    }

    #[test]
    fn test_paths_from_base() {
        let paths = SiftPaths::from_base(PathBuf::from("/tmp/sift-test"));
        assert_eq!(paths.db_path, PathBuf::from("/tmp/sift-test/sift.db"));
        assert_eq!(paths.config_path, PathBuf::from("/tmp/sift-test/config.toml"));
    }
}
