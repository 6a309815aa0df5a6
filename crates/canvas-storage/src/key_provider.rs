use std::{
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// Keychain service the production key lives under.
pub const DEFAULT_SERVICE: &str = "com.canvas.encryption";
/// Keychain account the production key lives under.
pub const DEFAULT_ACCOUNT: &str = "encryptionKey";

// Padded base64 of 32 bytes.
const BASE64_KEY_LEN: usize = 44;

/// The installation's 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    bytes: [u8; 32],
}

impl KeyMaterial {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides the encryption key (OS keychain in production; memory in tests).
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Return the stored key, creating and storing one on first use.
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// OS keyring-backed provider. The entry holds the 32 raw key bytes.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl Default for KeyringProvider {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE, DEFAULT_ACCOUNT)
    }
}

#[async_trait]
impl KeyProvider for KeyringProvider {
    #[instrument(skip_all, fields(service = %self.service))]
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        // Keyring operations are synchronous and bounded; called inline.
        let entry = keyring::Entry::new(&self.service, &self.account).map_err(keyring_err)?;
        match entry.get_secret() {
            Ok(secret) => return key_from_secret(&secret),
            Err(keyring::Error::NoEntry) => {}
            Err(err) => return Err(keyring_err(err)),
        }

        info!("no encryption key in keyring; generating one");
        let material = generate_key();
        entry.set_secret(material.as_bytes()).map_err(keyring_err)?;

        // A concurrent first use may have stored a different key; the keyring wins.
        let stored = entry.get_secret().map_err(keyring_err)?;
        key_from_secret(&stored)
    }
}

/// Memoizes the first key an inner provider returns.
///
/// Creation runs at most once at a time; later calls never touch the inner
/// provider again.
pub struct CachedKeyProvider<P: KeyProvider> {
    inner: P,
    cached: OnceCell<KeyMaterial>,
}

impl<P: KeyProvider> CachedKeyProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            cached: OnceCell::new(),
        }
    }
}

#[async_trait]
impl<P: KeyProvider> KeyProvider for CachedKeyProvider<P> {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let material = self
            .cached
            .get_or_try_init(|| async {
                debug!("loading encryption key");
                self.inner.get_or_create().await
            })
            .await?;
        Ok(material.clone())
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl InMemoryKeyProvider {
    /// Provider pre-seeded with a fixed key.
    pub fn with_key(material: KeyMaterial) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(material))),
        }
    }
}

#[async_trait]
impl KeyProvider for InMemoryKeyProvider {
    async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        Ok(guard.get_or_insert_with(generate_key).clone())
    }
}

fn generate_key() -> KeyMaterial {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    KeyMaterial { bytes }
}

/// Decode a keyring secret: the raw key, or the base64 text written by
/// releases that stored the key as a password.
fn key_from_secret(secret: &[u8]) -> Result<KeyMaterial, KeyError> {
    if let Ok(bytes) = <[u8; 32]>::try_from(secret) {
        return Ok(KeyMaterial { bytes });
    }
    if secret.len() == BASE64_KEY_LEN {
        let decoded = general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| KeyError::Decode(e.to_string()))?;
        if let Ok(bytes) = <[u8; 32]>::try_from(decoded.as_slice()) {
            return Ok(KeyMaterial { bytes });
        }
    }
    Err(KeyError::Decode(format!(
        "expected a 32-byte key, got {} bytes",
        secret.len()
    )))
}

fn keyring_err(err: keyring::Error) -> KeyError {
    KeyError::Keyring(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        inner: InMemoryKeyProvider,
    }

    #[async_trait]
    impl KeyProvider for CountingProvider {
        async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_or_create().await
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl KeyProvider for FailingProvider {
        async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
            Err(KeyError::Keyring("platform secure storage failure".into()))
        }
    }

    #[tokio::test]
    async fn memory_provider_returns_same_key() {
        let provider = InMemoryKeyProvider::default();
        let first = provider.get_or_create().await.unwrap();
        let second = provider.get_or_create().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cached_provider_hits_inner_once() {
        let provider = Arc::new(CachedKeyProvider::new(CountingProvider::default()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.get_or_create().await })
            })
            .collect();
        let mut keys = Vec::new();
        for handle in handles {
            keys.push(handle.await.expect("join").expect("key"));
        }

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(provider.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_provider_propagates_failure_and_retries() {
        let provider = CachedKeyProvider::new(FailingProvider);
        let err = provider.get_or_create().await.expect_err("should fail");
        assert!(matches!(err, KeyError::Keyring(_)));
        // Failures are not cached.
        assert!(provider.get_or_create().await.is_err());
    }

    #[test]
    fn raw_secret_is_the_key() {
        let material = generate_key();
        let decoded = key_from_secret(material.as_bytes()).expect("decode");
        assert_eq!(decoded, material);
    }

    #[test]
    fn secret_of_wrong_length_is_rejected() {
        for secret in [&b"abcd"[..], &[0u8; 31][..], &[0u8; 33][..], &[0u8; 64][..]] {
            let err = key_from_secret(secret).expect_err("wrong length");
            assert!(matches!(err, KeyError::Decode(_)));
        }
    }

    #[test]
    fn base64_secret_from_password_entries_is_accepted() {
        let material = KeyMaterial::from_bytes([9u8; 32]);
        let text = general_purpose::STANDARD.encode(material.as_bytes());
        assert_eq!(text.len(), BASE64_KEY_LEN);
        assert_eq!(key_from_secret(text.as_bytes()).expect("decode"), material);

        let garbage = [b'!'; BASE64_KEY_LEN];
        assert!(matches!(
            key_from_secret(&garbage),
            Err(KeyError::Decode(_))
        ));
    }

    #[test]
    fn debug_output_redacts_key_bytes() {
        let material = KeyMaterial::from_bytes([7u8; 32]);
        assert_eq!(format!("{material:?}"), "KeyMaterial(<redacted>)");
    }
}
