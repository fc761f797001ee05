// src/key.rs
//! The persisted identity of one pipeline: five shader keys, the full state
//! vector and the render-pass format.

use std::fmt;
use std::hash::{Hash, Hasher};

use bytemuck::{Pod, Zeroable};
use sha2::{Digest, Sha256};
use xxhash_rust::xxh3::xxh3_64;

use crate::shader::{ShaderKey, ShaderKeys, ShaderStage};
use crate::state::{RenderPassFormat, StateVector};

/// Size of a record digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// SHA-256 over the raw bytes of a [`PipelineStateKey`].
pub type KeyDigest = [u8; DIGEST_SIZE];

/// The atomic unit of persistence.
///
/// Its in-memory layout *is* the on-disk layout for the current build; any
/// change to this struct or anything it contains changes
/// `size_of::<PipelineStateKey>()` and invalidates existing cache files.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct PipelineStateKey {
    shaders: [ShaderKey; 5],
    state: StateVector,
    format: RenderPassFormat,
}

impl PipelineStateKey {
    /// Serialized size, also stored in the cache file header.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(shaders: [ShaderKey; 5], state: StateVector, format: RenderPassFormat) -> Self {
        Self {
            shaders,
            state,
            format,
        }
    }

    #[inline]
    pub fn shader_key(&self, stage: ShaderStage) -> ShaderKey {
        self.shaders[stage as usize - 1]
    }

    /// All five slots, undefined ones included.
    #[inline]
    pub fn shader_keys(&self) -> &[ShaderKey; 5] {
        &self.shaders
    }

    pub fn vs_key(&self) -> ShaderKey {
        self.shader_key(ShaderStage::Vertex)
    }

    pub fn tcs_key(&self) -> ShaderKey {
        self.shader_key(ShaderStage::TessControl)
    }

    pub fn tes_key(&self) -> ShaderKey {
        self.shader_key(ShaderStage::TessEval)
    }

    pub fn gs_key(&self) -> ShaderKey {
        self.shader_key(ShaderStage::Geometry)
    }

    pub fn ps_key(&self) -> ShaderKey {
        self.shader_key(ShaderStage::Fragment)
    }

    #[inline]
    pub fn state_vector(&self) -> &StateVector {
        &self.state
    }

    #[inline]
    pub fn render_pass_format(&self) -> &RenderPassFormat {
        &self.format
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Rebuilds a key from exactly [`Self::SIZE`] bytes. Every bit pattern is
    /// a valid key, so the only failure is a length mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Digest stored in front of each cache file record.
    pub fn digest(&self) -> KeyDigest {
        Sha256::digest(self.as_bytes()).into()
    }
}

impl Hash for PipelineStateKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(xxh3_64(self.as_bytes()));
    }
}

impl fmt::Display for PipelineStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} state={:016x}", ShaderKeys(&self.shaders), self.state.hash64())
    }
}
