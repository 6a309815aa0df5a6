//! Versioned registry of encrypted model artifacts.
//!
//! Layout under the registry root:
//! - `metadata.json`: plaintext index of every surviving version.
//! - `model_v<version>.<ext>`: one envelope per version holding the raw artifact.
//!
//! A save stages the artifact and the new index, then renames both in that
//! order. Crashing between the renames can only leave an artifact that no
//! index entry references, which [`EncryptedModelRegistry::open`] removes.

mod index;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use canvas_core::{
    models::{ModelMetadata, ModelRegistry},
    storage::{ReadPolicy, StorageError},
};
use canvas_storage::{
    atomic::{self, Transaction},
    envelope::EnvelopeCodec,
    key_provider::KeyProvider,
};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::index::RegistryIndex;

/// File name of the plaintext index inside the registry root.
pub const INDEX_FILE_NAME: &str = "metadata.json";
/// Artifact file extension used unless configured otherwise.
pub const DEFAULT_EXTENSION: &str = "mlmodelc";

const ARTIFACT_PREFIX: &str = "model_v";

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub extension: String,
    /// Applies to an index file that exists but cannot be parsed.
    pub policy: ReadPolicy,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            policy: ReadPolicy::default(),
        }
    }
}

/// File-backed [`ModelRegistry`]. Artifacts are encrypted; the index is not.
///
/// The index lives in memory behind a lock; saves and deletes hold the write
/// side for their whole stage-and-commit cycle.
pub struct EncryptedModelRegistry<P: KeyProvider> {
    root: PathBuf,
    extension: String,
    codec: Arc<EnvelopeCodec<P>>,
    index: RwLock<RegistryIndex>,
    /// Set when the index on disk could not be parsed at open. The registry
    /// then serves reads but refuses to rewrite the index.
    damaged_index: Option<String>,
}

impl<P: KeyProvider> EncryptedModelRegistry<P> {
    pub fn open(
        root: impl Into<PathBuf>,
        codec: Arc<EnvelopeCodec<P>>,
    ) -> Result<Self, StorageError> {
        Self::open_with(root, codec, RegistryOptions::default())
    }

    /// Load the index and clean up after any interrupted save.
    pub fn open_with(
        root: impl Into<PathBuf>,
        codec: Arc<EnvelopeCodec<P>>,
        options: RegistryOptions,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        atomic::sweep_staging(&root)?;

        let index_path = root.join(INDEX_FILE_NAME);
        let (index, damaged_index) = match atomic::read_if_exists(&index_path)? {
            None => (RegistryIndex::default(), None),
            Some(bytes) => match RegistryIndex::from_json(&bytes) {
                Ok(index) => (index, None),
                Err(err) => match options.policy {
                    ReadPolicy::Strict => {
                        return Err(StorageError::Corrupted {
                            path: index_path,
                            source: Box::new(err.into()),
                        })
                    }
                    ReadPolicy::Lenient => {
                        warn!(
                            path = %index_path.display(),
                            error = %err,
                            "model index unreadable; starting empty, saves and deletes disabled"
                        );
                        (RegistryIndex::default(), Some(err.to_string()))
                    }
                },
            },
        };

        let mut registry = Self {
            root,
            extension: options.extension,
            codec,
            index: RwLock::new(index),
            damaged_index,
        };
        registry.reconcile()?;
        Ok(registry)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    fn artifact_file_name(&self, version: u32) -> String {
        format!("{ARTIFACT_PREFIX}{version}.{}", self.extension)
    }

    fn artifact_version(&self, file_name: &str) -> Option<u32> {
        file_name
            .strip_prefix(ARTIFACT_PREFIX)?
            .strip_suffix(&format!(".{}", self.extension))?
            .parse()
            .ok()
    }

    fn resolve_artifact(&self, metadata: &ModelMetadata) -> PathBuf {
        match metadata.artifact_path.as_deref() {
            Some(path) if Path::new(path).is_absolute() => PathBuf::from(path),
            Some(path) => self.root.join(path),
            None => self.root.join(self.artifact_file_name(metadata.version)),
        }
    }

    /// Align artifact files with the index. With a readable index, unreferenced
    /// artifacts are deleted; otherwise they only raise the version mark so
    /// new saves cannot overwrite them.
    fn reconcile(&mut self) -> Result<(), StorageError> {
        let trusted = self.damaged_index.is_none();
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(version) = self.artifact_version(&entry.file_name().to_string_lossy()) {
                artifacts.push((version, entry.path()));
            }
        }

        let index = self.index.get_mut();
        for (version, path) in artifacts {
            if !trusted {
                index.reserve_through(version);
            } else if index.get(version).is_none() {
                warn!(version, "removing artifact with no index entry");
                atomic::remove_if_exists(&path)?;
            }
        }
        Ok(())
    }

    /// An index that failed to parse is never overwritten.
    fn ensure_index_writable(&self) -> Result<(), StorageError> {
        match &self.damaged_index {
            None => Ok(()),
            Some(reason) => Err(StorageError::Corrupted {
                path: self.index_path(),
                source: Box::new(StorageError::InvalidMetadata(reason.clone())),
            }),
        }
    }
}

#[async_trait]
impl<P: KeyProvider> ModelRegistry for EncryptedModelRegistry<P> {
    #[instrument(skip_all, fields(version = metadata.version, bytes = artifact.len()))]
    async fn save_model(
        &self,
        artifact: &[u8],
        metadata: ModelMetadata,
    ) -> Result<ModelMetadata, StorageError> {
        if metadata.version == 0 {
            return Err(StorageError::InvalidMetadata(
                "version must be positive".to_string(),
            ));
        }

        self.ensure_index_writable()?;
        let mut index = self.index.write().await;
        if metadata.version < index.next_version() {
            return Err(StorageError::VersionConflict {
                version: metadata.version,
            });
        }

        let file_name = self.artifact_file_name(metadata.version);
        let stored = metadata.with_artifact_path(file_name.clone());
        let envelope = self.codec.encrypt(artifact).await?;

        let mut updated = index.clone();
        updated.insert(stored.clone());
        let index_bytes = updated.to_json()?;

        let mut tx = Transaction::new();
        tx.stage(&self.root.join(&file_name), &envelope)?;
        tx.stage(&self.index_path(), &index_bytes)?;
        tx.commit()?;

        *index = updated;
        info!(version = stored.version, "saved model");
        Ok(stored)
    }

    async fn next_version(&self) -> u32 {
        self.index.read().await.next_version()
    }

    #[instrument(skip_all, fields(version = version))]
    async fn load_model(&self, version: u32) -> Result<Option<Vec<u8>>, StorageError> {
        let path = {
            let index = self.index.read().await;
            match index.get(version) {
                Some(metadata) => self.resolve_artifact(metadata),
                None => return Ok(None),
            }
        };

        let Some(envelope) = atomic::read_if_exists(&path)? else {
            warn!(path = %path.display(), "indexed artifact is missing");
            return Ok(None);
        };
        let artifact = self.codec.decrypt(&envelope).await?;
        debug!(bytes = artifact.len(), "loaded model");
        Ok(Some(artifact))
    }

    #[instrument(skip_all, fields(version = version))]
    async fn delete_model(&self, version: u32) -> Result<(), StorageError> {
        self.ensure_index_writable()?;
        let mut index = self.index.write().await;
        let Some(existing) = index.get(version).cloned() else {
            debug!("unknown version; nothing to delete");
            return Ok(());
        };

        // Index first: a crash afterwards leaves an orphan that `open` sweeps.
        let mut updated = index.clone();
        updated.remove(version);
        atomic::write_atomic(&self.index_path(), &updated.to_json()?)?;
        *index = updated;

        atomic::remove_if_exists(&self.resolve_artifact(&existing))?;
        info!(
            current = ?index.current().map(|m| m.version),
            "deleted model"
        );
        Ok(())
    }

    async fn list(&self) -> Vec<ModelMetadata> {
        self.index.read().await.models().to_vec()
    }

    async fn current(&self) -> Option<ModelMetadata> {
        self.index.read().await.current().cloned()
    }
}
