//! RandomX engine abstraction.
//!
//! Mining and validation share one hashing seam, [`RandomxEngine`]. A
//! production node links the native RandomX library behind it; the
//! [`SoftwareEngine`] is a BLAKE3-backed implementation that keeps
//! development networks and tests running without the native dataset.
//!
//! The engine distinguishes a full in-memory dataset ([`RandomxMode::Fast`])
//! from the verification-only cache ([`RandomxMode::Light`]); mining must
//! not start against a light-mode engine.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use alloy_primitives::B256;

/// Initialisation state of the engine's dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomxMode {
    /// Full dataset in memory; bulk hashing is available.
    Fast,
    /// Verification-only cache; hashing works but mining must not start.
    Light,
}

/// Engine tuning flags, mirrored from the native library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomxFlags {
    pub jit: bool,
    pub large_pages: bool,
    pub hw_aes: bool,
}

impl Default for RandomxFlags {
    fn default() -> Self {
        Self {
            jit: true,
            large_pages: false,
            hw_aes: true,
        }
    }
}

/// One `(nonce, H0)` pair produced by bulk hashing.
pub type BulkHash = (B256, B256);

/// Hashing seam shared by the mining pipeline and the validator.
pub trait RandomxEngine: Send + Sync {
    /// Current dataset mode.
    fn mode(&self) -> RandomxMode;

    /// Hash `input` with the engine's dataset.
    fn hash(&self, input: &[u8]) -> B256;

    /// Produce `iterations` nonces against `bds`.
    ///
    /// The nonce chain is seeded from two 32-byte nonces; each returned
    /// pair is `(nonce, hash(nonce ‖ bds))`, the same preimage layout the
    /// validator re-derives `H0` from.
    fn bulk_hash(
        &self,
        seed_a: &B256,
        seed_b: &B256,
        bds: &[u8],
        iterations: usize,
    ) -> Vec<BulkHash> {
        let mut joined = [0u8; 64];
        joined[..32].copy_from_slice(seed_a.as_slice());
        joined[32..].copy_from_slice(seed_b.as_slice());
        let mut nonce = self.hash(&joined);

        let mut out = Vec::with_capacity(iterations);
        let mut preimage = Vec::with_capacity(32 + bds.len());
        for _ in 0..iterations {
            preimage.clear();
            preimage.extend_from_slice(nonce.as_slice());
            preimage.extend_from_slice(bds);
            out.push((nonce, self.hash(&preimage)));
            nonce = self.hash(nonce.as_slice());
        }
        out
    }
}

/// BLAKE3-backed engine.
///
/// Stands in for the native RandomX library on development networks. The
/// dataset mode is chosen at construction so callers exercise the same
/// fast/light gating as production.
#[derive(Debug, Clone)]
pub struct SoftwareEngine {
    mode: RandomxMode,
    flags: RandomxFlags,
}

impl SoftwareEngine {
    /// Engine with a (pretend) full dataset; mining may start.
    pub fn fast() -> Self {
        Self::with_flags(RandomxMode::Fast, RandomxFlags::default())
    }

    /// Verification-only engine; mining against it is refused.
    pub fn light() -> Self {
        Self::with_flags(RandomxMode::Light, RandomxFlags::default())
    }

    pub fn with_flags(mode: RandomxMode, flags: RandomxFlags) -> Self {
        Self { mode, flags }
    }

    pub fn flags(&self) -> RandomxFlags {
        self.flags
    }
}

impl RandomxEngine for SoftwareEngine {
    fn mode(&self) -> RandomxMode {
        self.mode
    }

    fn hash(&self, input: &[u8]) -> B256 {
        B256::from(*blake3::hash(input).as_bytes())
    }
}
