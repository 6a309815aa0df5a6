use std::{path::PathBuf, sync::Arc};

use crate::config::Config;
use canvas_core::storage::ReadPolicy;
use canvas_log::EncryptedSensorLog;
use canvas_registry::{EncryptedModelRegistry, RegistryOptions};
use canvas_storage::{
    envelope::EnvelopeCodec,
    key_provider::{CachedKeyProvider, KeyProvider, KeyringProvider},
};
use color_eyre::Result;
use dirs::data_dir;
use tokio::sync::OnceCell;
use tracing::debug;

/// Directory (under the data root) holding the sensor log.
pub const SENSOR_DIR: &str = "CanvasData";
/// Directory (under the data root) holding the model registry.
pub const MODELS_DIR: &str = "CanvasModels";

pub type ProductionKeys = CachedKeyProvider<KeyringProvider>;

/// The process-wide store instances, shared by handle.
///
/// Each store is opened on first use, so a damaged registry never keeps the
/// sensor log from working and vice versa.
pub struct Services<P: KeyProvider> {
    pub codec: Arc<EnvelopeCodec<P>>,
    pub min_training_points: usize,
    root: PathBuf,
    policy: ReadPolicy,
    extension: String,
    sensors: OnceCell<Arc<EncryptedSensorLog<P>>>,
    models: OnceCell<Arc<EncryptedModelRegistry<P>>>,
}

impl<P: KeyProvider> Services<P> {
    pub async fn sensors(&self) -> Result<Arc<EncryptedSensorLog<P>>> {
        let log = self
            .sensors
            .get_or_try_init(|| async {
                let log = EncryptedSensorLog::new(self.root.join(SENSOR_DIR), self.codec.clone())
                    .with_policy(self.policy);
                let swept = log.recover()?;
                if swept > 0 {
                    debug!(swept, "removed interrupted sensor log writes");
                }
                Ok::<_, color_eyre::Report>(Arc::new(log))
            })
            .await?;
        Ok(log.clone())
    }

    pub async fn models(&self) -> Result<Arc<EncryptedModelRegistry<P>>> {
        let registry = self
            .models
            .get_or_try_init(|| async {
                let registry = EncryptedModelRegistry::open_with(
                    self.root.join(MODELS_DIR),
                    self.codec.clone(),
                    RegistryOptions {
                        extension: self.extension.clone(),
                        policy: self.policy,
                    },
                )?;
                Ok::<_, color_eyre::Report>(Arc::new(registry))
            })
            .await?;
        Ok(registry.clone())
    }
}

/// Resolve the default data directory for Canvas.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("canvas"))
}

/// Build services backed by the OS keychain, honoring config overrides.
pub fn services_from_config(config: &Config) -> Result<Services<ProductionKeys>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    debug!(?root, "using data root");
    let keys = CachedKeyProvider::new(KeyringProvider::new(
        config.keyring_service(),
        config.keyring_account(),
    ));
    Ok(build_services(root, keys, config))
}

pub fn build_services<P: KeyProvider>(root: PathBuf, keys: P, config: &Config) -> Services<P> {
    Services {
        codec: Arc::new(EnvelopeCodec::new(keys)),
        min_training_points: config.min_training_points(),
        root,
        policy: config.read_policy(),
        extension: config.model_extension().to_string(),
        sensors: OnceCell::new(),
        models: OnceCell::new(),
    }
}

/// Helper for tests to construct services rooted at a temp dir with an in-memory key.
#[cfg(test)]
pub fn test_services(
    root: impl Into<PathBuf>,
) -> Services<canvas_storage::key_provider::InMemoryKeyProvider> {
    build_services(
        root.into(),
        canvas_storage::key_provider::InMemoryKeyProvider::default(),
        &Config::default(),
    )
}
