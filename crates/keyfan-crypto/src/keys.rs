//! Derived key material: department keys and unit (leaf) keys

use zeroize::Zeroize;

use keyfan_core::{KeyfanError, KeyfanResult, KEY_SIZE};

/// A 256-bit key derived from the hierarchy. Zeroized on drop.
///
/// Deliberately not `Clone`: a unit key backs exactly one encryption task and
/// is moved into it.
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copy KDF output into a key, rejecting any length other than 32 bytes.
    ///
    /// `index` is the flattened leaf position, reported on mismatch.
    pub fn from_slice(index: usize, slice: &[u8]) -> KeyfanResult<Self> {
        if slice.len() != KEY_SIZE {
            return Err(KeyfanError::KeyLengthMismatch {
                index,
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
