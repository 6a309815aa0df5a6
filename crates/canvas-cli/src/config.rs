use std::{
    fs,
    path::{Path, PathBuf},
};

use canvas_core::storage::ReadPolicy;
use canvas_registry::DEFAULT_EXTENSION;
use canvas_storage::key_provider::{DEFAULT_ACCOUNT, DEFAULT_SERVICE};
use canvas_train::DEFAULT_MIN_DATA_POINTS;
use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/canvas/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the data directory holding the log and the models.
    pub data_dir: Option<PathBuf>,
    /// What to do with a store file that exists but cannot be read.
    pub read_policy: Option<ReadPolicy>,
    /// Extension of model artifact files.
    pub model_extension: Option<String>,
    /// Readings required before `canvas train` runs.
    pub min_training_points: Option<usize>,
    pub keyring: Option<KeyringConfig>,
}

/// Keychain entry holding the encryption key.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct KeyringConfig {
    pub service: Option<String>,
    pub account: Option<String>,
}

impl Config {
    pub fn read_policy(&self) -> ReadPolicy {
        self.read_policy.unwrap_or_default()
    }

    pub fn model_extension(&self) -> &str {
        self.model_extension.as_deref().unwrap_or(DEFAULT_EXTENSION)
    }

    pub fn min_training_points(&self) -> usize {
        self.min_training_points.unwrap_or(DEFAULT_MIN_DATA_POINTS)
    }

    /// Every setting spelled out, falling back to the built-in defaults.
    pub fn resolved(&self, default_data_dir: PathBuf) -> Config {
        Config {
            data_dir: Some(self.data_dir.clone().unwrap_or(default_data_dir)),
            read_policy: Some(self.read_policy()),
            model_extension: Some(self.model_extension().to_string()),
            min_training_points: Some(self.min_training_points()),
            keyring: Some(KeyringConfig {
                service: Some(self.keyring_service().to_string()),
                account: Some(self.keyring_account().to_string()),
            }),
        }
    }

    pub fn keyring_service(&self) -> &str {
        self.keyring
            .as_ref()
            .and_then(|k| k.service.as_deref())
            .unwrap_or(DEFAULT_SERVICE)
    }

    pub fn keyring_account(&self) -> &str {
        self.keyring
            .as_ref()
            .and_then(|k| k.account.as_deref())
            .unwrap_or(DEFAULT_ACCOUNT)
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("canvas").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    let path = default_path()?;
    write_to_path_if_missing(config, &path)?;
    Ok(path)
}

/// Returns whether a file was written; never clobbers user edits.
pub fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(true)
}
