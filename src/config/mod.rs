//! Configuration for the world-state engine.
//!
//! Configuration lives in a TOML file with two sections:
//!
//! ```toml
//! [storage]
//! data_dir = "data"
//! snapshot_file = "game_store.json"
//!
//! [game]
//! default_episode_quota = 3
//! default_claim_cooldown_seconds = 3600
//! max_episode_extension = 3
//! ```
//!
//! Every field has a default so a missing file or an empty table still yields
//! a usable configuration.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub game: GameConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the snapshot and its lock file.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Snapshot file name inside `data_dir`.
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Episode quota granted when a registration carries no purchase count.
    #[serde(default = "default_episode_quota")]
    pub default_episode_quota: u32,
    /// Cooldown applied to quests created without an explicit window.
    #[serde(default = "default_claim_cooldown_seconds")]
    pub default_claim_cooldown_seconds: i64,
    /// Upper bound on a single GM episode extension.
    #[serde(default = "default_max_episode_extension")]
    pub max_episode_extension: i64,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_snapshot_file() -> String {
    "game_store.json".to_string()
}

fn default_episode_quota() -> u32 {
    3
}

fn default_claim_cooldown_seconds() -> i64 {
    3600
}

fn default_max_episode_extension() -> i64 {
    3
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            default_episode_quota: default_episode_quota(),
            default_claim_cooldown_seconds: default_claim_cooldown_seconds(),
            max_episode_extension: default_max_episode_extension(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file.
    pub fn create_default(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;
        std::fs::write(path, content)
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path.display(), e))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.snapshot_file.trim().is_empty() {
            return Err(anyhow!("storage.snapshot_file must not be empty"));
        }
        if self.game.default_claim_cooldown_seconds < 0 {
            return Err(anyhow!("game.default_claim_cooldown_seconds must be >= 0"));
        }
        if self.game.max_episode_extension < 0 {
            return Err(anyhow!("game.max_episode_extension must be >= 0"));
        }
        Ok(())
    }

    /// Full path of the world snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        Path::new(&self.storage.data_dir).join(&self.storage.snapshot_file)
    }
}
