//! Training orchestration on top of the sensor log and the model registry.
//!
//! The pipeline owns everything around a training run (data gate, progress,
//! version allocation, persistence); the math itself lives behind the
//! [`Trainer`] trait.

mod baseline;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use canvas_core::{
    models::{Accuracy, ModelMetadata, ModelRegistry},
    sensors::SensorLog,
    storage::StorageError,
    training::{ProgressSink, Trainer},
};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, instrument};

pub use baseline::{MagnitudeBaseline, MagnitudeBaselineTrainer};

/// Readings required before a model may be trained.
pub const DEFAULT_MIN_DATA_POINTS: usize = 100;

// Fixed progress checkpoints; the trainer's own reports fill the span between.
const PROGRESS_DATA_LOADED: f64 = 0.2;
const PROGRESS_TRAINED: f64 = 0.9;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("not enough data points: have {have}, need at least {need}")]
    InsufficientData { have: usize, need: usize },
    #[error("a training run is already in progress")]
    AlreadyTraining,
    #[error("no valid sensor data found for training")]
    NoValidData,
    #[error("trainer failed: {0}")]
    Trainer(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Runs one training at a time against a shared log and registry.
pub struct TrainingPipeline<L: SensorLog, R: ModelRegistry> {
    log: Arc<L>,
    registry: Arc<R>,
    min_data_points: usize,
    running: AtomicBool,
    progress: watch::Sender<f64>,
}

impl<L: SensorLog, R: ModelRegistry> TrainingPipeline<L, R> {
    pub fn new(log: Arc<L>, registry: Arc<R>) -> Self {
        let (progress, _) = watch::channel(0.0);
        Self {
            log,
            registry,
            min_data_points: DEFAULT_MIN_DATA_POINTS,
            running: AtomicBool::new(false),
            progress,
        }
    }

    pub fn with_min_data_points(mut self, min_data_points: usize) -> Self {
        self.min_data_points = min_data_points;
        self
    }

    pub fn min_data_points(&self) -> usize {
        self.min_data_points
    }

    /// Progress of the current (or last) run, from 0.0 to 1.0.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }

    pub fn is_training(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn can_train(&self) -> Result<bool, StorageError> {
        Ok(self.log.count().await? >= self.min_data_points)
    }

    /// Train on the full log and save the result as the next version.
    #[instrument(skip_all, fields(trainer = trainer.name()))]
    pub async fn train(&self, trainer: &dyn Trainer) -> Result<ModelMetadata, TrainingError> {
        let _run = RunGuard::acquire(&self.running).ok_or(TrainingError::AlreadyTraining)?;
        self.progress.send_replace(0.0);

        let started = Instant::now();
        let readings = self.log.training_data(None).await?;
        if readings.len() < self.min_data_points {
            return Err(TrainingError::InsufficientData {
                have: readings.len(),
                need: self.min_data_points,
            });
        }
        let trained_on = Utc::now();
        self.progress.send_replace(PROGRESS_DATA_LOADED);

        let sink = ScaledProgress {
            tx: &self.progress,
            start: PROGRESS_DATA_LOADED,
            end: PROGRESS_TRAINED,
        };
        let artifact = trainer
            .train(&readings, &sink)
            .await
            .map_err(|err| match err.downcast::<TrainingError>() {
                Ok(known) => known,
                Err(other) => TrainingError::Trainer(format!("{other:#}")),
            })?;
        self.progress.send_replace(PROGRESS_TRAINED);

        let metadata = ModelMetadata::new(
            self.registry.next_version().await,
            trained_on,
            readings.len() as u64,
            artifact.accuracy.and_then(Accuracy::clamped),
            started.elapsed(),
        );
        let saved = self.registry.save_model(&artifact.bytes, metadata).await?;
        self.progress.send_replace(1.0);

        info!(
            version = saved.version,
            data_points = saved.data_point_count,
            accuracy = ?saved.accuracy.map(Accuracy::value),
            "model trained"
        );
        Ok(saved)
    }
}

/// Maps a trainer's own 0..1 progress onto a slice of the pipeline's range.
struct ScaledProgress<'a> {
    tx: &'a watch::Sender<f64>,
    start: f64,
    end: f64,
}

impl ProgressSink for ScaledProgress<'_> {
    fn report(&self, fraction: f64) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.tx
            .send_replace(self.start + (self.end - self.start) * fraction);
    }
}

/// Holds the single-run flag for the duration of a training.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
