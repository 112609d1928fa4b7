//! keyfan-crypto: key hierarchy derivation and single-use file encryption
//!
//! Key hierarchy:
//! ```text
//! Root Secret (one per company, supplied externally)
//!   └── Department Key = KDF(root, department_label, department_context)   (never used to encrypt)
//!       └── Unit Key   = KDF(department_key, unit_label, unit_context)     (encrypts exactly one file)
//! ```
//!
//! KDF: NIST SP 800-108 counter mode over HMAC-SHA256 or CMAC-AES256.
//! Ciphers: AES-256-GCM and ChaCha20-Poly1305 (AEAD, 12-byte nonce), or
//! unauthenticated AES-256-CTR.

pub mod cipher;
pub mod kdf;
pub mod keys;
pub mod tree;

pub use cipher::{Aes256CtrCipher, Aes256GcmCipher, ChaCha20Poly1305Cipher, FileCipher, Sealed};
pub use kdf::{CmacAes256, CounterModeKdf, HmacSha256, KeyedPrf};
pub use keys::DerivedKey;
pub use tree::KeyTree;

pub use keyfan_core::KEY_SIZE;

/// Size of an AEAD nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM / Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the AES-CTR initial counter block
pub const IV_SIZE: usize = 16;

/// AES block size; the CTR variant pads its final chunk to this
pub const BLOCK_SIZE: usize = 16;
