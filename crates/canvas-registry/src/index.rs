use canvas_core::models::ModelMetadata;
use serde::{Deserialize, Serialize};

/// Plaintext metadata index, kept sorted by version descending.
///
/// `last_version` is the highest version ever assigned. It survives deletion
/// so a deleted version number is never handed out again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegistryIndex {
    last_version: u32,
    models: Vec<ModelMetadata>,
}

/// On-disk shapes we accept. Older files are a bare array of entries.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredIndex {
    Versioned(RegistryIndex),
    Legacy(Vec<ModelMetadata>),
}

impl RegistryIndex {
    pub(crate) fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut index = match serde_json::from_slice(bytes)? {
            StoredIndex::Versioned(index) => index,
            StoredIndex::Legacy(models) => Self {
                last_version: 0,
                models,
            },
        };
        index.normalize();
        Ok(index)
    }

    pub(crate) fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub(crate) fn models(&self) -> &[ModelMetadata] {
        &self.models
    }

    pub(crate) fn get(&self, version: u32) -> Option<&ModelMetadata> {
        self.models.iter().find(|m| m.version == version)
    }

    /// Highest surviving version.
    pub(crate) fn current(&self) -> Option<&ModelMetadata> {
        self.models.first()
    }

    pub(crate) fn next_version(&self) -> u32 {
        self.last_version.saturating_add(1)
    }

    /// Raise the high-water mark without adding an entry.
    pub(crate) fn reserve_through(&mut self, version: u32) {
        self.last_version = self.last_version.max(version);
    }

    pub(crate) fn insert(&mut self, metadata: ModelMetadata) {
        self.models.push(metadata);
        self.normalize();
    }

    pub(crate) fn remove(&mut self, version: u32) -> Option<ModelMetadata> {
        let position = self.models.iter().position(|m| m.version == version)?;
        Some(self.models.remove(position))
    }

    fn normalize(&mut self) {
        self.models.sort_by(|a, b| b.version.cmp(&a.version));
        if let Some(top) = self.models.first() {
            self.last_version = self.last_version.max(top.version);
        }
    }
}
