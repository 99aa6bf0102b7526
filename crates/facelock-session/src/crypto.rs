//! Descriptor encryption at rest.
//!
//! Descriptors are serialised to JSON and sealed with AES-256-GCM under a key
//! derived from caller-supplied key material. Each ciphertext carries its own
//! random 96-bit nonce as a prefix.

use crate::collaborators::DescriptorCipher;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use facelock_core::Descriptor;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("descriptor serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or corrupted data)")]
    Decrypt,
    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),
    #[error("descriptor value {index} is not finite")]
    NonFinite { index: usize },
}

/// Opaque sealed descriptor. The orchestrator never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedDescriptor {
    pub bytes: Vec<u8>,
}

pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Derive a 256-bit key from arbitrary key material via SHA-256.
    pub fn new(key_material: &[u8]) -> Self {
        let digest = Sha256::digest(key_material);
        let key = Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl DescriptorCipher for AesGcmCipher {
    fn encrypt(&self, descriptor: &Descriptor) -> Result<EncryptedDescriptor, CipherError> {
        // JSON has no encoding for NaN or infinity; such a ciphertext would never open.
        if let Some(index) = descriptor.values.iter().position(|v| !v.is_finite()) {
            return Err(CipherError::NonFinite { index });
        }
        let plaintext = serde_json::to_vec(descriptor)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|_| CipherError::Encrypt)?;

        let mut bytes = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        bytes.extend_from_slice(&nonce_bytes);
        bytes.extend_from_slice(&ciphertext);
        Ok(EncryptedDescriptor { bytes })
    }

    fn decrypt(&self, encrypted: &EncryptedDescriptor) -> Result<Descriptor, CipherError> {
        if encrypted.bytes.len() <= NONCE_LEN {
            return Err(CipherError::Truncated(encrypted.bytes.len()));
        }
        let (nonce, ciphertext) = encrypted.bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
