use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::StorageError;

/// Model quality score, guaranteed to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Accuracy(f64);

impl Accuracy {
    pub fn new(value: f64) -> Option<Self> {
        (0.0..=1.0).contains(&value).then_some(Self(value))
    }

    /// Clamp an arbitrary score into range. `NaN` has no meaningful clamp and yields `None`.
    pub fn clamped(value: f64) -> Option<Self> {
        if value.is_nan() {
            return None;
        }
        Some(Self(value.clamp(0.0, 1.0)))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Accuracy {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("accuracy {value} outside [0, 1]"))
    }
}

impl From<Accuracy> for f64 {
    fn from(accuracy: Accuracy) -> Self {
        accuracy.0
    }
}

/// Metadata describing one trained model artifact.
///
/// Everything but `artifact_path` is fixed by the trainer; the registry fills
/// the path in once the encrypted artifact has been written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub id: Uuid,
    /// Positive, never reused.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// When the training data snapshot was taken.
    pub trained_on: DateTime<Utc>,
    pub data_point_count: u64,
    /// Artifact location, relative to the registry root unless absolute.
    #[serde(default, alias = "modelPath", skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<Accuracy>,
    #[serde(with = "duration_secs")]
    pub training_duration: Duration,
}

impl ModelMetadata {
    pub fn new(
        version: u32,
        trained_on: DateTime<Utc>,
        data_point_count: u64,
        accuracy: Option<Accuracy>,
        training_duration: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            version,
            created_at: Utc::now(),
            trained_on,
            data_point_count,
            artifact_path: None,
            accuracy,
            training_duration,
        }
    }

    pub fn with_artifact_path(mut self, path: impl Into<String>) -> Self {
        self.artifact_path = Some(path.into());
        self
    }
}

/// Durations are stored as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

/// Versioned collection of encrypted model artifacts plus a metadata index.
///
/// The current model is the entry with the highest surviving version.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Persist `artifact` and `metadata` together. Returns the stored
    /// metadata, with its artifact path filled in.
    async fn save_model(
        &self,
        artifact: &[u8],
        metadata: ModelMetadata,
    ) -> Result<ModelMetadata, StorageError>;

    /// Version to assign to the next save. Never returns a deleted version.
    async fn next_version(&self) -> u32;

    /// Decrypted artifact bytes; `None` for an unknown version or a missing file.
    async fn load_model(&self, version: u32) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove a version's artifact and metadata. Unknown versions are a no-op.
    async fn delete_model(&self, version: u32) -> Result<(), StorageError>;

    /// All metadata, sorted by version descending.
    async fn list(&self) -> Vec<ModelMetadata>;

    async fn current(&self) -> Option<ModelMetadata> {
        self.list().await.into_iter().next()
    }

    async fn load_latest(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match self.current().await {
            Some(current) => self.load_model(current.version).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_rejects_out_of_range() {
        assert!(Accuracy::new(0.5).is_some());
        assert!(Accuracy::new(1.0).is_some());
        assert!(Accuracy::new(1.01).is_none());
        assert!(Accuracy::new(-0.1).is_none());
        assert_eq!(Accuracy::clamped(3.0).map(Accuracy::value), Some(1.0));
        assert_eq!(Accuracy::clamped(-2.0).map(Accuracy::value), Some(0.0));
        assert!(Accuracy::clamped(f64::NAN).is_none());
    }

    #[test]
    fn metadata_serializes_camel_case_with_rfc3339_dates() {
        let meta = ModelMetadata::new(
            3,
            Utc::now(),
            120,
            Accuracy::new(0.75),
            Duration::from_millis(1500),
        )
        .with_artifact_path("model_v3.mlmodelc");
        let json = serde_json::to_value(&meta).expect("serialize");

        assert_eq!(json["version"], 3);
        assert_eq!(json["dataPointCount"], 120);
        assert_eq!(json["artifactPath"], "model_v3.mlmodelc");
        assert_eq!(json["trainingDuration"], 1.5);
        assert!(json["createdAt"].as_str().expect("string").contains('T'));

        let back: ModelMetadata = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, meta);
    }

    #[test]
    fn metadata_accepts_legacy_field_names() {
        let json = r#"{
            "id": "6F9619FF-8B86-D011-B42D-00C04FC964FF",
            "version": 1,
            "createdAt": "2025-12-11T10:00:00Z",
            "trainedOn": "2025-12-11T09:59:00Z",
            "dataPointCount": 240,
            "modelPath": "/var/mobile/Documents/CanvasModels/model_v1.mlmodelc",
            "trainingDuration": 4.25
        }"#;
        let meta: ModelMetadata = serde_json::from_str(json).expect("parse legacy entry");
        assert_eq!(meta.version, 1);
        assert_eq!(
            meta.artifact_path.as_deref(),
            Some("/var/mobile/Documents/CanvasModels/model_v1.mlmodelc")
        );
        assert_eq!(meta.accuracy, None);
        assert_eq!(meta.training_duration, Duration::from_secs_f64(4.25));
    }

    #[test]
    fn metadata_rejects_invalid_accuracy_and_negative_duration() {
        let base = serde_json::json!({
            "id": Uuid::new_v4(),
            "version": 1,
            "createdAt": "2025-12-11T10:00:00Z",
            "trainedOn": "2025-12-11T10:00:00Z",
            "dataPointCount": 0,
            "trainingDuration": 1.0,
        });

        let mut bad_accuracy = base.clone();
        bad_accuracy["accuracy"] = serde_json::json!(1.5);
        assert!(serde_json::from_value::<ModelMetadata>(bad_accuracy).is_err());

        let mut bad_duration = base;
        bad_duration["trainingDuration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<ModelMetadata>(bad_duration).is_err());
    }
}
