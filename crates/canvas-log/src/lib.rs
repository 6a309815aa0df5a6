//! Encrypted, append-only sensor reading log.
//!
//! The whole log is one envelope whose plaintext is the JSON array of every
//! reading appended so far. Each append decrypts, extends, re-encrypts and
//! atomically replaces the file: O(n) per append, which is fine for the
//! on-device volumes this log holds.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use canvas_core::{
    sensors::{SensorLog, SensorReading},
    storage::{ReadPolicy, StorageError},
};
use canvas_storage::{atomic, envelope::EnvelopeCodec, key_provider::KeyProvider};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// File name of the log inside its directory.
pub const LOG_FILE_NAME: &str = "sensor_data.encrypted";

/// Sensor log persisted as a single encrypted file.
///
/// Mutations hold `state` for their whole load-mutate-persist cycle, so
/// concurrent appends on one instance never lose updates. Readers go straight
/// to disk; commits are atomic renames, so they always see a complete file.
pub struct EncryptedSensorLog<P: KeyProvider> {
    path: PathBuf,
    codec: Arc<EnvelopeCodec<P>>,
    policy: ReadPolicy,
    state: Mutex<LogState>,
}

#[derive(Debug, Default)]
struct LogState {
    /// Count as of the last load or commit made through this instance.
    cached_count: Option<usize>,
}

impl<P: KeyProvider> EncryptedSensorLog<P> {
    /// Log stored at `<dir>/sensor_data.encrypted`.
    pub fn new(dir: impl AsRef<Path>, codec: Arc<EnvelopeCodec<P>>) -> Self {
        Self {
            path: dir.as_ref().join(LOG_FILE_NAME),
            codec,
            policy: ReadPolicy::default(),
            state: Mutex::new(LogState::default()),
        }
    }

    pub fn with_policy(mut self, policy: ReadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove staging files left behind by an interrupted append.
    pub fn recover(&self) -> Result<usize, StorageError> {
        match self.path.parent() {
            Some(dir) => Ok(atomic::sweep_staging(dir)?),
            None => Ok(0),
        }
    }

    /// One decrypt, one rewrite, however many readings are added.
    async fn extend(&self, batch: Vec<SensorReading>) -> Result<usize, StorageError> {
        let mut state = self.state.lock().await;
        // Never rewrite over a log we could not read, whatever the read policy.
        let mut readings = self.read(ReadPolicy::Strict).await?;
        let added = batch.len();
        readings.extend(batch);

        let envelope = self.codec.encrypt_json(&readings).await?;
        atomic::write_atomic(&self.path, &envelope)?;

        state.cached_count = Some(readings.len());
        debug!(added, count = readings.len(), "appended readings");
        Ok(readings.len())
    }

    async fn read(&self, policy: ReadPolicy) -> Result<Vec<SensorReading>, StorageError> {
        let Some(envelope) = atomic::read_if_exists(&self.path)? else {
            return Ok(Vec::new());
        };

        match self.codec.decrypt_json(&envelope).await {
            Ok(readings) => Ok(readings),
            Err(err) if err.is_corruption() => match policy {
                ReadPolicy::Strict => Err(StorageError::Corrupted {
                    path: self.path.clone(),
                    source: Box::new(err),
                }),
                ReadPolicy::Lenient => {
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "sensor log unreadable; treating as empty"
                    );
                    Ok(Vec::new())
                }
            },
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl<P: KeyProvider> SensorLog for EncryptedSensorLog<P> {
    #[instrument(skip_all, fields(reading = %reading.id))]
    async fn append(&self, reading: SensorReading) -> Result<usize, StorageError> {
        self.extend(vec![reading]).await
    }

    #[instrument(skip_all, fields(readings = readings.len()))]
    async fn append_all(&self, readings: Vec<SensorReading>) -> Result<usize, StorageError> {
        self.extend(readings).await
    }

    #[instrument(skip_all)]
    async fn load_all(&self) -> Result<Vec<SensorReading>, StorageError> {
        self.read(self.policy).await
    }

    #[instrument(skip_all)]
    async fn clear_all(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if atomic::remove_if_exists(&self.path)? {
            debug!(path = %self.path.display(), "cleared sensor log");
        }
        state.cached_count = Some(0);
        Ok(())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let mut state = self.state.lock().await;
        if let Some(count) = state.cached_count {
            return Ok(count);
        }
        let count = self.read(self.policy).await?.len();
        state.cached_count = Some(count);
        Ok(count)
    }
}
