use anyhow::Result;
use async_trait::async_trait;

use crate::sensors::SensorReading;

/// Output of a training run: opaque artifact bytes plus an optional raw score.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedArtifact {
    pub bytes: Vec<u8>,
    /// Unclamped score; the pipeline clamps it into `[0, 1]`.
    pub accuracy: Option<f64>,
}

/// Receives fractional progress (`0.0..=1.0`) from a running trainer.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64);
}

/// Contract for anything that turns sensor readings into a model artifact.
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Short name used for logging.
    fn name(&self) -> &'static str;

    async fn train(
        &self,
        readings: &[SensorReading],
        progress: &dyn ProgressSink,
    ) -> Result<TrainedArtifact>;
}
