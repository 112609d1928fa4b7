//! Per-file encryption transforms
//!
//! Artifact format (binary):
//! ```text
//! AEAD: [12 bytes: random nonce][N bytes: ciphertext][16 bytes: tag]
//! CTR:  [16 bytes: random IV][ceil(N/16)*16 bytes: ciphertext]
//! ```
//!
//! The CTR variant zero-pads the final chunk to the AES block size and stores
//! no length, so decryption returns the padded plaintext. It has no tamper
//! detection and is kept for comparison with the AEAD suites only.

use aes::Aes256;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Nonce};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use zeroize::Zeroizing;

use keyfan_core::config::CipherSuite;
use keyfan_core::{KeyfanError, KeyfanResult, KEY_SIZE};

use crate::{BLOCK_SIZE, IV_SIZE, NONCE_SIZE, TAG_SIZE};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Output of one encryption call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Option<Vec<u8>>,
}

impl Sealed {
    /// Serialized artifact: `nonce || ciphertext [|| tag]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        if let Some(tag) = &self.tag {
            out.extend_from_slice(tag);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.nonce.len() + self.ciphertext.len() + self.tag.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A confidentiality (and, for AEAD, integrity) transform keyed by one
/// 32-byte unit key.
pub trait FileCipher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `decrypt` detects tampering
    fn is_authenticated(&self) -> bool;

    /// Encrypt `plaintext` under a fresh random nonce/IV.
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> KeyfanResult<Sealed>;

    /// Decrypt a serialized artifact (`nonce || ciphertext [|| tag]`).
    fn decrypt(&self, key: &[u8], blob: &[u8]) -> KeyfanResult<Zeroizing<Vec<u8>>>;
}

fn check_key(key: &[u8]) -> KeyfanResult<()> {
    if key.len() != KEY_SIZE {
        return Err(KeyfanError::InvalidKey {
            expected: KEY_SIZE,
            actual: key.len(),
        });
    }
    Ok(())
}

fn aead_encrypt<A: Aead + AeadCore + KeyInit>(
    key: &[u8],
    plaintext: &[u8],
) -> KeyfanResult<Sealed> {
    check_key(key)?;
    let cipher = A::new_from_slice(key).map_err(|_| KeyfanError::InvalidKey {
        expected: KEY_SIZE,
        actual: key.len(),
    })?;

    let mut nonce = Nonce::<A>::default();
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| KeyfanError::Other(anyhow::anyhow!("encryption failed: {e}")))?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);

    Ok(Sealed {
        nonce: nonce.to_vec(),
        ciphertext,
        tag: Some(tag),
    })
}

fn aead_decrypt<A: Aead + AeadCore + KeyInit>(
    key: &[u8],
    blob: &[u8],
) -> KeyfanResult<Zeroizing<Vec<u8>>> {
    check_key(key)?;
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(KeyfanError::InvalidInput(format!(
            "artifact too short: {} bytes (minimum {})",
            blob.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }
    let cipher = A::new_from_slice(key).map_err(|_| KeyfanError::InvalidKey {
        expected: KEY_SIZE,
        actual: key.len(),
    })?;

    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::<A>::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| KeyfanError::Authentication)
}

/// AES-256-GCM, 96-bit random nonce.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmCipher;

impl FileCipher for Aes256GcmCipher {
    fn name(&self) -> &'static str {
        "aes256-gcm"
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> KeyfanResult<Sealed> {
        aead_encrypt::<Aes256Gcm>(key, plaintext)
    }

    fn decrypt(&self, key: &[u8], blob: &[u8]) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        aead_decrypt::<Aes256Gcm>(key, blob)
    }
}

/// ChaCha20-Poly1305 (IETF), 96-bit random nonce.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChaCha20Poly1305Cipher;

impl FileCipher for ChaCha20Poly1305Cipher {
    fn name(&self) -> &'static str {
        "chacha20-poly1305"
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> KeyfanResult<Sealed> {
        aead_encrypt::<ChaCha20Poly1305>(key, plaintext)
    }

    fn decrypt(&self, key: &[u8], blob: &[u8]) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        aead_decrypt::<ChaCha20Poly1305>(key, blob)
    }
}

/// AES-256-CTR with a random 128-bit IV, processed in fixed-size chunks.
#[derive(Debug, Clone, Copy)]
pub struct Aes256CtrCipher {
    chunk_size: usize,
}

impl Aes256CtrCipher {
    /// Default chunk size: 256 KiB
    pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

    /// `chunk_size` is rounded up to a whole number of AES blocks.
    pub fn new(chunk_size: usize) -> Self {
        let blocks = chunk_size.div_ceil(BLOCK_SIZE).max(1);
        Self {
            chunk_size: blocks * BLOCK_SIZE,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for Aes256CtrCipher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHUNK_SIZE)
    }
}

impl FileCipher for Aes256CtrCipher {
    fn name(&self) -> &'static str {
        "aes256-ctr"
    }

    fn is_authenticated(&self) -> bool {
        false
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> KeyfanResult<Sealed> {
        check_key(key)?;
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        let mut cipher = Aes256Ctr::new_from_slices(key, &iv).map_err(|_| {
            KeyfanError::InvalidKey {
                expected: KEY_SIZE,
                actual: key.len(),
            }
        })?;

        let padded_len = plaintext.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let mut ciphertext = Vec::with_capacity(padded_len);
        for chunk in plaintext.chunks(self.chunk_size) {
            let start = ciphertext.len();
            ciphertext.extend_from_slice(chunk);
            let remainder = chunk.len() % BLOCK_SIZE;
            if remainder != 0 {
                // only the final chunk can be short
                ciphertext.resize(ciphertext.len() + BLOCK_SIZE - remainder, 0);
            }
            cipher.apply_keystream(&mut ciphertext[start..]);
        }

        Ok(Sealed {
            nonce: iv.to_vec(),
            ciphertext,
            tag: None,
        })
    }

    /// Returns the zero-padded plaintext; the original length is not stored.
    fn decrypt(&self, key: &[u8], blob: &[u8]) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        check_key(key)?;
        if blob.len() < IV_SIZE {
            return Err(KeyfanError::InvalidInput(format!(
                "artifact too short: {} bytes (minimum {IV_SIZE})",
                blob.len()
            )));
        }
        let (iv, ciphertext) = blob.split_at(IV_SIZE);
        let mut cipher = Aes256Ctr::new_from_slices(key, iv).map_err(|_| {
            KeyfanError::InvalidKey {
                expected: KEY_SIZE,
                actual: key.len(),
            }
        })?;

        let mut plaintext = Zeroizing::new(ciphertext.to_vec());
        for chunk in plaintext.chunks_mut(self.chunk_size) {
            cipher.apply_keystream(chunk);
        }
        Ok(plaintext)
    }
}

impl FileCipher for CipherSuite {
    fn name(&self) -> &'static str {
        match self {
            CipherSuite::Aes256Gcm => Aes256GcmCipher.name(),
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305Cipher.name(),
            CipherSuite::Aes256Ctr => Aes256CtrCipher::default().name(),
        }
    }

    fn is_authenticated(&self) -> bool {
        !matches!(self, CipherSuite::Aes256Ctr)
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> KeyfanResult<Sealed> {
        match self {
            CipherSuite::Aes256Gcm => Aes256GcmCipher.encrypt(key, plaintext),
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305Cipher.encrypt(key, plaintext),
            CipherSuite::Aes256Ctr => Aes256CtrCipher::default().encrypt(key, plaintext),
        }
    }

    fn decrypt(&self, key: &[u8], blob: &[u8]) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        match self {
            CipherSuite::Aes256Gcm => Aes256GcmCipher.decrypt(key, blob),
            CipherSuite::ChaCha20Poly1305 => ChaCha20Poly1305Cipher.decrypt(key, blob),
            CipherSuite::Aes256Ctr => Aes256CtrCipher::default().decrypt(key, blob),
        }
    }
}
