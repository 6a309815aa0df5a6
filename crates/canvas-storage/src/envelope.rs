use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use canvas_core::storage::{StorageError, MIN_ENVELOPE_LEN, NONCE_LEN};
use serde::{de::DeserializeOwned, Serialize};

use crate::key_provider::{KeyMaterial, KeyProvider};

/// AES-256-GCM envelope codec.
///
/// An envelope is `nonce (12) || ciphertext || tag (16)`. Every call to
/// [`EnvelopeCodec::encrypt`] draws a fresh random nonce, and the nonce only
/// ever lives inside the envelope that uses it.
pub struct EnvelopeCodec<P: KeyProvider> {
    key_provider: P,
}

impl<P: KeyProvider> EnvelopeCodec<P> {
    pub fn new(key_provider: P) -> Self {
        Self { key_provider }
    }

    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let cipher = self.cipher().await?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        // aes-gcm appends the tag to the ciphertext, which matches the envelope layout.
        let sealed = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + sealed.len());
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(&sealed);
        Ok(envelope)
    }

    pub async fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, StorageError> {
        if envelope.len() < MIN_ENVELOPE_LEN {
            return Err(StorageError::InvalidEnvelope {
                len: envelope.len(),
            });
        }

        let cipher = self.cipher().await?;
        let (nonce, sealed) = envelope.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| StorageError::DecryptionFailed)
    }

    /// Encode `value` as JSON and seal it.
    pub async fn encrypt_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, StorageError> {
        let plaintext = serde_json::to_vec(value)?;
        self.encrypt(&plaintext).await
    }

    /// Open an envelope and decode its JSON payload.
    pub async fn decrypt_json<T: DeserializeOwned>(
        &self,
        envelope: &[u8],
    ) -> Result<T, StorageError> {
        let plaintext = self.decrypt(envelope).await?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    async fn cipher(&self) -> Result<Aes256Gcm, StorageError> {
        let material = self
            .key_provider
            .get_or_create()
            .await
            .map_err(|e| StorageError::KeyStore(e.to_string()))?;
        build_cipher(&material)
    }
}

fn build_cipher(material: &KeyMaterial) -> Result<Aes256Gcm, StorageError> {
    Aes256Gcm::new_from_slice(material.as_bytes())
        .map_err(|e| StorageError::Encryption(format!("cipher init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use canvas_core::storage::TAG_LEN;

    use super::*;
    use crate::key_provider::{InMemoryKeyProvider, KeyError};

    fn codec() -> EnvelopeCodec<InMemoryKeyProvider> {
        EnvelopeCodec::new(InMemoryKeyProvider::default())
    }

    #[tokio::test]
    async fn round_trip_for_various_payloads() {
        let codec = codec();
        for payload in [&b""[..], &b"x"[..], &b"hello-canvas"[..], &[0u8; 4096][..]] {
            let envelope = codec.encrypt(payload).await.expect("encrypt");
            assert_eq!(envelope.len(), NONCE_LEN + payload.len() + TAG_LEN);
            let opened = codec.decrypt(&envelope).await.expect("decrypt");
            assert_eq!(opened, payload);
        }
    }

    #[tokio::test]
    async fn each_encryption_uses_a_fresh_nonce() {
        let codec = codec();
        let a = codec.encrypt(b"same").await.expect("encrypt");
        let b = codec.encrypt(b"same").await.expect("encrypt");
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn flipping_any_bit_fails_authentication() {
        let codec = codec();
        let envelope = codec.encrypt(b"sensor").await.expect("encrypt");

        for byte in 0..envelope.len() {
            for bit in 0..8 {
                let mut tampered = envelope.clone();
                tampered[byte] ^= 1 << bit;
                let err = codec.decrypt(&tampered).await.expect_err("tamper must fail");
                assert!(
                    matches!(err, StorageError::DecryptionFailed),
                    "byte {byte} bit {bit}: {err}"
                );
            }
        }
    }

    #[tokio::test]
    async fn short_envelope_is_rejected_before_key_lookup() {
        struct NoKey;

        #[async_trait]
        impl KeyProvider for NoKey {
            async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
                panic!("key must not be fetched for a malformed envelope");
            }
        }

        let codec = EnvelopeCodec::new(NoKey);
        for len in [0, 1, 12, 27] {
            let err = codec.decrypt(&vec![0u8; len]).await.expect_err("too short");
            assert!(matches!(err, StorageError::InvalidEnvelope { len: l } if l == len));
        }
    }

    #[tokio::test]
    async fn wrong_key_fails_authentication() {
        let writer = codec();
        let reader = EnvelopeCodec::new(InMemoryKeyProvider::with_key(KeyMaterial::from_bytes(
            [9u8; 32],
        )));
        let envelope = writer.encrypt(b"private").await.expect("encrypt");
        let err = reader.decrypt(&envelope).await.expect_err("wrong key");
        assert!(matches!(err, StorageError::DecryptionFailed));
    }

    #[tokio::test]
    async fn key_store_failure_propagates() {
        struct Locked;

        #[async_trait]
        impl KeyProvider for Locked {
            async fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
                Err(KeyError::Keyring("device locked".into()))
            }
        }

        let err = EnvelopeCodec::new(Locked)
            .encrypt(b"data")
            .await
            .expect_err("no key");
        assert!(matches!(err, StorageError::KeyStore(_)));
    }

    #[tokio::test]
    async fn json_helpers_round_trip_typed_values() {
        let codec = codec();
        let values = vec![1u32, 2, 3];
        let envelope = codec.encrypt_json(&values).await.expect("encrypt");
        let back: Vec<u32> = codec.decrypt_json(&envelope).await.expect("decrypt");
        assert_eq!(back, values);

        let garbage = codec.encrypt(b"not json").await.expect("encrypt");
        let err = codec
            .decrypt_json::<Vec<u32>>(&garbage)
            .await
            .expect_err("decode should fail");
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
