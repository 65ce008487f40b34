//! CLI configuration management.
//!
//! Persists the data directory, key backing and active contact to
//! `~/.sebo/config.json`. Command-line flags (and their `SEBO_*` env
//! equivalents) win over the file.

use std::path::{Path, PathBuf};

use sebo_crypto::{ContextConfig, StoragePreference};
use serde::{Deserialize, Serialize};

/// Where long-term keys live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackingChoice {
    /// OS credential store, falling back to files.
    Platform,
    /// Owner-only files in the data directory.
    File,
}

impl From<BackingChoice> for StoragePreference {
    fn from(choice: BackingChoice) -> Self {
        match choice {
            BackingChoice::Platform => Self::Platform,
            BackingChoice::File => Self::File,
        }
    }
}

/// Persistent CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CliConfig {
    /// Directory for keys and the contact store (default `~/.sebo`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing: Option<BackingChoice>,
    /// Id of the contact used by `encrypt`/`decrypt` when none is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_contact: Option<String>,
}

impl CliConfig {
    /// Path to the config directory: `~/.sebo/`.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".sebo"))
    }

    /// Path to the config file: `~/.sebo/config.json`.
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.json"))
    }

    /// Load config from disk. Returns default if file doesn't exist or is invalid.
    pub fn load() -> Self {
        Self::config_path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let path =
            Self::config_path().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Merge command-line overrides into a context configuration.
    pub fn resolve(
        &self,
        data_dir: Option<PathBuf>,
        backing: Option<BackingChoice>,
    ) -> anyhow::Result<ContextConfig> {
        let data_dir = data_dir
            .or_else(|| self.data_dir.clone())
            .or_else(Self::config_dir)
            .ok_or_else(|| {
                anyhow::anyhow!("Cannot determine home directory. Use --data-dir <path>")
            })?;
        let backing = backing.or(self.backing).unwrap_or(BackingChoice::Platform);
        Ok(ContextConfig::new(data_dir, backing.into()))
    }
}
