use anyhow::Result;
use async_trait::async_trait;
use canvas_core::{
    sensors::SensorReading,
    training::{ProgressSink, TrainedArtifact, Trainer},
};
use serde::{Deserialize, Serialize};

use crate::TrainingError;

/// Mean and spread of accelerometer magnitude over the training readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagnitudeBaseline {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
}

impl MagnitudeBaseline {
    /// `None` when no reading carries an accelerometer sample.
    pub fn fit(readings: &[SensorReading]) -> Option<Self> {
        let magnitudes: Vec<f64> = readings
            .iter()
            .filter_map(|r| r.accelerometer.map(|a| a.magnitude()))
            .collect();
        if magnitudes.is_empty() {
            return None;
        }

        let n = magnitudes.len() as f64;
        let mean = magnitudes.iter().sum::<f64>() / n;
        let variance = magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            samples: magnitudes.len(),
        })
    }

    /// Whether `magnitude` lies within two standard deviations of the mean.
    pub fn is_typical(&self, magnitude: f64) -> bool {
        (magnitude - self.mean).abs() <= 2.0 * self.std_dev
    }

    pub fn from_artifact(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Reference trainer producing a [`MagnitudeBaseline`] artifact.
///
/// Accuracy is the share of training samples the baseline deems typical.
#[derive(Debug, Default, Clone, Copy)]
pub struct MagnitudeBaselineTrainer;

#[async_trait]
impl Trainer for MagnitudeBaselineTrainer {
    fn name(&self) -> &'static str {
        "magnitude-baseline"
    }

    async fn train(
        &self,
        readings: &[SensorReading],
        progress: &dyn ProgressSink,
    ) -> Result<TrainedArtifact> {
        let baseline = MagnitudeBaseline::fit(readings).ok_or(TrainingError::NoValidData)?;
        progress.report(0.5);

        let typical = readings
            .iter()
            .filter_map(|r| r.accelerometer)
            .filter(|a| baseline.is_typical(a.magnitude()))
            .count();
        let accuracy = typical as f64 / baseline.samples as f64;
        progress.report(1.0);

        Ok(TrainedArtifact {
            bytes: serde_json::to_vec(&baseline)?,
            accuracy: Some(accuracy),
        })
    }
}
