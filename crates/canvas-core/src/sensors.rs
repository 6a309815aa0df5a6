use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::StorageError;

/// Three-axis motion sample: m/s² for the accelerometer, rad/s for the gyroscope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MotionVector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm of the sample.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Geographic fix. Accuracy is the horizontal radius in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub accuracy: f64,
}

/// A single sensor reading. Any sensor may be absent from a given sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerometer: Option<MotionVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gyroscope: Option<MotionVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl SensorReading {
    /// Empty reading stamped at `timestamp`; attach sensors with the `with_*` builders.
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            accelerometer: None,
            gyroscope: None,
            location: None,
        }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn with_accelerometer(mut self, sample: MotionVector) -> Self {
        self.accelerometer = Some(sample);
        self
    }

    pub fn with_gyroscope(mut self, sample: MotionVector) -> Self {
        self.gyroscope = Some(sample);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

/// Summary of the stored log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStatistics {
    pub total_count: usize,
    /// Timestamp of the first appended reading.
    pub oldest: Option<DateTime<Utc>>,
    /// Timestamp of the last appended reading.
    pub newest: Option<DateTime<Utc>>,
}

impl LogStatistics {
    pub fn from_readings(readings: &[SensorReading]) -> Self {
        Self {
            total_count: readings.len(),
            oldest: readings.first().map(|r| r.timestamp),
            newest: readings.last().map(|r| r.timestamp),
        }
    }
}

/// Last `n` readings of `readings`, in append order.
pub fn tail(mut readings: Vec<SensorReading>, n: usize) -> Vec<SensorReading> {
    let skip = readings.len().saturating_sub(n);
    readings.drain(..skip);
    readings
}

/// Append-only, encrypted-at-rest log of sensor readings.
///
/// Readings are kept in append order; there is no reordering, deduplication,
/// or per-reading deletion. Implementations serialize their own writers.
#[async_trait]
pub trait SensorLog: Send + Sync {
    /// Persist `reading` after every previously appended one. Returns the new count.
    async fn append(&self, reading: SensorReading) -> Result<usize, StorageError>;

    /// Persist `readings` in order after every stored one. Returns the new count.
    ///
    /// Implementations that rewrite the whole log should override this so a
    /// batch costs one rewrite and lands all-or-nothing.
    async fn append_all(&self, readings: Vec<SensorReading>) -> Result<usize, StorageError> {
        let mut count = self.count().await?;
        for reading in readings {
            count = self.append(reading).await?;
        }
        Ok(count)
    }

    /// Every stored reading in append order; empty when nothing was ever written.
    async fn load_all(&self) -> Result<Vec<SensorReading>, StorageError>;

    /// Remove the whole log (idempotent).
    async fn clear_all(&self) -> Result<(), StorageError>;

    /// Number of stored readings.
    async fn count(&self) -> Result<usize, StorageError>;

    /// The last `n` readings (fewer when the log is shorter).
    async fn load_recent(&self, n: usize) -> Result<Vec<SensorReading>, StorageError> {
        Ok(tail(self.load_all().await?, n))
    }

    async fn statistics(&self) -> Result<LogStatistics, StorageError> {
        let readings = self.load_all().await?;
        Ok(LogStatistics::from_readings(&readings))
    }

    /// Readings handed to a trainer: everything, or the most recent `limit`.
    async fn training_data(&self, limit: Option<usize>) -> Result<Vec<SensorReading>, StorageError> {
        match limit {
            Some(limit) => self.load_recent(limit).await,
            None => self.load_all().await,
        }
    }
}
