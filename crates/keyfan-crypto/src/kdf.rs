//! Counter-mode key derivation (NIST SP 800-108) over a pluggable keyed PRF
//!
//! Each PRF invocation is keyed by the secret and fed:
//! ```text
//! before-fixed: [i]_32 || label || 0x00 || context || [L]_32
//! after-fixed:  label || 0x00 || context || [L]_32 || [i]_32
//! ```
//! where `i` counts from 1 and `L` is the requested output length in bits,
//! both big-endian. Blocks are concatenated and truncated to the output
//! length.

use aes::Aes256;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use keyfan_core::config::{CounterLocation, PrfAlgorithm};
use keyfan_core::{KeyfanError, KeyfanResult, NodeParameters, KEY_SIZE};

/// A pseudo-random function keyed by a secret.
pub trait KeyedPrf: Send + Sync {
    /// Algorithm name, for logs
    fn name(&self) -> &'static str;

    /// Bytes produced per invocation
    fn output_len(&self) -> usize;

    /// Compute `PRF(key, parts[0] || parts[1] || ...)`.
    fn compute(&self, key: &[u8], parts: &[&[u8]]) -> KeyfanResult<Zeroizing<Vec<u8>>>;
}

/// HMAC-SHA256 (32-byte output, any key length).
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256;

impl KeyedPrf for HmacSha256 {
    fn name(&self) -> &'static str {
        "hmac-sha256"
    }

    fn output_len(&self) -> usize {
        32
    }

    fn compute(&self, key: &[u8], parts: &[&[u8]]) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|e| KeyfanError::InvalidInput(format!("HMAC key rejected: {e}")))?;
        for part in parts {
            mac.update(part);
        }
        Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
    }
}

/// CMAC-AES256 (16-byte output, key must be exactly 32 bytes).
#[derive(Debug, Clone, Copy, Default)]
pub struct CmacAes256;

impl KeyedPrf for CmacAes256 {
    fn name(&self) -> &'static str {
        "cmac-aes256"
    }

    fn output_len(&self) -> usize {
        16
    }

    fn compute(&self, key: &[u8], parts: &[&[u8]]) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        let mut mac = <Cmac<Aes256> as Mac>::new_from_slice(key).map_err(|_| {
            KeyfanError::InvalidInput(format!(
                "CMAC-AES256 needs a {KEY_SIZE}-byte secret, got {} bytes",
                key.len()
            ))
        })?;
        for part in parts {
            mac.update(part);
        }
        Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
    }
}

impl KeyedPrf for PrfAlgorithm {
    fn name(&self) -> &'static str {
        match self {
            PrfAlgorithm::HmacSha256 => HmacSha256.name(),
            PrfAlgorithm::CmacAes256 => CmacAes256.name(),
        }
    }

    fn output_len(&self) -> usize {
        match self {
            PrfAlgorithm::HmacSha256 => HmacSha256.output_len(),
            PrfAlgorithm::CmacAes256 => CmacAes256.output_len(),
        }
    }

    fn compute(&self, key: &[u8], parts: &[&[u8]]) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        match self {
            PrfAlgorithm::HmacSha256 => HmacSha256.compute(key, parts),
            PrfAlgorithm::CmacAes256 => CmacAes256.compute(key, parts),
        }
    }
}

/// SP 800-108 counter-mode KDF with a 32-bit counter and 32-bit length field.
#[derive(Debug, Clone)]
pub struct CounterModeKdf<P> {
    prf: P,
    location: CounterLocation,
}

impl<P: KeyedPrf> CounterModeKdf<P> {
    pub fn new(prf: P, location: CounterLocation) -> Self {
        Self { prf, location }
    }

    pub fn prf(&self) -> &P {
        &self.prf
    }

    pub fn location(&self) -> CounterLocation {
        self.location
    }

    /// Derive `out_len` bytes from `secret`, `label` and `context`.
    ///
    /// Fails with `InvalidInput` on an empty secret or a zero output length.
    pub fn derive(
        &self,
        secret: &[u8],
        label: &[u8],
        context: &[u8],
        out_len: u32,
    ) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        if secret.is_empty() {
            return Err(KeyfanError::InvalidInput("secret is empty".into()));
        }
        if out_len == 0 {
            return Err(KeyfanError::InvalidInput("output length is zero".into()));
        }
        let length_bits = u32::try_from(u64::from(out_len) * 8).map_err(|_| {
            KeyfanError::InvalidInput(format!("output length {out_len} overflows the length field"))
        })?;

        let out_len = out_len as usize;
        let block_len = self.prf.output_len();
        if block_len == 0 {
            return Err(KeyfanError::InvalidInput(format!(
                "{} reports a zero-length output block",
                self.prf.name()
            )));
        }
        let rounds = out_len.div_ceil(block_len);
        let length_field = length_bits.to_be_bytes();

        let mut output = Zeroizing::new(Vec::with_capacity(rounds * block_len));
        for i in 1..=rounds {
            // rounds <= out_len < 2^29, the counter cannot wrap
            let counter = (i as u32).to_be_bytes();
            let block = match self.location {
                CounterLocation::BeforeFixed => self.prf.compute(
                    secret,
                    &[&counter, label, &[0x00u8], context, &length_field],
                )?,
                CounterLocation::AfterFixed => self.prf.compute(
                    secret,
                    &[label, &[0x00u8], context, &length_field, &counter],
                )?,
            };
            output.extend_from_slice(&block);
        }
        output.truncate(out_len);
        Ok(output)
    }

    /// Derive a 32-byte key for one node of the hierarchy.
    pub fn derive_node(
        &self,
        secret: &[u8],
        params: &NodeParameters,
    ) -> KeyfanResult<Zeroizing<Vec<u8>>> {
        self.derive(secret, &params.label, &params.context, KEY_SIZE as u32)
    }
}
