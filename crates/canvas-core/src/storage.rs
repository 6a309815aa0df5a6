use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the encrypted stores and the envelope codec.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The OS credential store is unreachable or rejected a write.
    #[error("key store error: {0}")]
    KeyStore(String),
    /// Buffer too short to hold a nonce and an authentication tag.
    #[error("invalid envelope: {len} bytes is below the {min} byte minimum", min = MIN_ENVELOPE_LEN)]
    InvalidEnvelope { len: usize },
    /// Tag verification failed (tampering, wrong key, or corruption).
    #[error("decryption failed: authentication tag did not verify")]
    DecryptionFailed,
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A file exists but its content could not be decrypted or decoded.
    #[error("{} is present but unreadable: {source}", .path.display())]
    Corrupted {
        path: PathBuf,
        #[source]
        source: Box<StorageError>,
    },
    #[error("model version {version} is already taken")]
    VersionConflict { version: u32 },
    #[error("invalid model metadata: {0}")]
    InvalidMetadata(String),
}

impl StorageError {
    /// True when the stored bytes themselves are at fault, as opposed to the
    /// key store or the file system.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidEnvelope { .. }
                | Self::DecryptionFailed
                | Self::Serialization(_)
                | Self::Corrupted { .. }
        )
    }
}

/// Nonce length of an envelope, in bytes.
pub const NONCE_LEN: usize = 12;
/// Authentication tag length of an envelope, in bytes.
pub const TAG_LEN: usize = 16;
/// Smallest well-formed envelope: a nonce and a tag around an empty ciphertext.
pub const MIN_ENVELOPE_LEN: usize = NONCE_LEN + TAG_LEN;

/// What a store does with a file that exists but cannot be decrypted or decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    /// Surface `StorageError::Corrupted` to the caller.
    #[default]
    Strict,
    /// Treat the file as empty and log a warning.
    Lenient,
}
