// src/shader.rs
//! Shader objects as handed over by the shader front-end.
//!
//! The front-end has already decoded and analysed the bytecode; this crate only
//! needs the content hash (to identify the stage program across runs) and the
//! small amount of interface information the pipeline layout and state
//! validation consume.

use std::fmt;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use sha2::{Digest, Sha256};

// ----------------------------------------------------------------------------
// Stages
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ShaderStage {
    Vertex = 1,
    TessControl = 2,
    TessEval = 3,
    Geometry = 4,
    Fragment = 5,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 5] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
    ];

    /// Single-bit mask used in [`StageFlags`].
    #[inline]
    pub const fn flag(self) -> StageFlags {
        StageFlags(1 << (self as u32 - 1))
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| *stage as u32 == raw)
    }
}

/// Set of shader stages, one bit per [`ShaderStage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct StageFlags(pub u32);

impl StageFlags {
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for StageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for StageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ----------------------------------------------------------------------------
// Shader key
// ----------------------------------------------------------------------------

/// Content hash of one stage's program.
///
/// An all-zero key is "undefined": the stage is unused and resolves without a
/// lookup. Part of the persisted key layout, hence `Pod`.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct ShaderKey {
    stage: u32,
    defined: u32,
    sha256: [u8; 32],
}

impl ShaderKey {
    #[inline]
    pub const fn undefined() -> Self {
        Self {
            stage: 0,
            defined: 0,
            sha256: [0; 32],
        }
    }

    pub fn new(stage: ShaderStage, sha256: [u8; 32]) -> Self {
        Self {
            stage: stage as u32,
            defined: 1,
            sha256,
        }
    }

    /// Hashes `code` and tags it with `stage`.
    pub fn from_code(stage: ShaderStage, code: &[u8]) -> Self {
        Self::new(stage, Sha256::digest(code).into())
    }

    #[inline]
    pub const fn is_defined(&self) -> bool {
        self.defined != 0
    }

    pub fn stage(&self) -> Option<ShaderStage> {
        if self.is_defined() {
            ShaderStage::from_raw(self.stage)
        } else {
            None
        }
    }

    pub fn sha256(&self) -> &[u8; 32] {
        &self.sha256
    }
}

impl fmt::Debug for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// `VS:1a2b3c4d...`, or `undefined`.
impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.stage() {
            None if !self.is_defined() => return f.write_str("undefined"),
            None => "??",
            Some(ShaderStage::Vertex) => "VS",
            Some(ShaderStage::TessControl) => "HS",
            Some(ShaderStage::TessEval) => "DS",
            Some(ShaderStage::Geometry) => "GS",
            Some(ShaderStage::Fragment) => "PS",
        };
        write!(f, "{prefix}:")?;
        for byte in &self.sha256[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The defined keys of a five-slot shader tuple, space separated.
pub struct ShaderKeys<'a>(pub &'a [ShaderKey; 5]);

impl fmt::Display for ShaderKeys<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for key in self.0.iter().filter(|k| k.is_defined()) {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{key}")?;
            first = false;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Shader interface
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    StorageImage,
    Sampler,
}

/// One binding slot a shader reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceSlot {
    pub slot: u32,
    pub kind: ResourceKind,
}

/// What the front-end's static analysis tells us about a shader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderInterface {
    /// Bit `i` set if input location `i` is read.
    pub input_mask: u32,
    /// Bit `i` set if output location `i` is written.
    pub output_mask: u32,
    pub resource_slots: Vec<ResourceSlot>,
}

// ----------------------------------------------------------------------------
// Shader object
// ----------------------------------------------------------------------------

/// A compiled shader stage program. Immutable and shared by `Arc`.
pub struct Shader {
    key: ShaderKey,
    code: Arc<[u8]>,
    interface: ShaderInterface,
}

impl Shader {
    pub fn new(stage: ShaderStage, code: impl Into<Arc<[u8]>>, interface: ShaderInterface) -> Self {
        let code = code.into();
        Self {
            key: ShaderKey::from_code(stage, &code),
            code,
            interface,
        }
    }

    /// Use a key the front-end already computed.
    pub fn with_key(key: ShaderKey, code: impl Into<Arc<[u8]>>, interface: ShaderInterface) -> Self {
        Self {
            key,
            code: code.into(),
            interface,
        }
    }

    #[inline]
    pub fn key(&self) -> ShaderKey {
        self.key
    }

    pub fn stage(&self) -> Option<ShaderStage> {
        self.key.stage()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn interface(&self) -> &ShaderInterface {
        &self.interface
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("key", &self.key)
            .field("code_len", &self.code.len())
            .field("interface", &self.interface)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Shader set
// ----------------------------------------------------------------------------

/// The five stage slots of a graphics pipeline. Any slot may be empty.
#[derive(Debug, Clone, Default)]
pub struct ShaderSet {
    pub vs: Option<Arc<Shader>>,
    pub tcs: Option<Arc<Shader>>,
    pub tes: Option<Arc<Shader>>,
    pub gs: Option<Arc<Shader>>,
    pub fs: Option<Arc<Shader>>,
}

impl ShaderSet {
    pub fn new(vs: Option<Arc<Shader>>, fs: Option<Arc<Shader>>) -> Self {
        Self {
            vs,
            fs,
            ..Self::default()
        }
    }

    pub fn get(&self, stage: ShaderStage) -> Option<&Arc<Shader>> {
        match stage {
            ShaderStage::Vertex => self.vs.as_ref(),
            ShaderStage::TessControl => self.tcs.as_ref(),
            ShaderStage::TessEval => self.tes.as_ref(),
            ShaderStage::Geometry => self.gs.as_ref(),
            ShaderStage::Fragment => self.fs.as_ref(),
        }
    }

    /// Present stages with their shaders, in pipeline order.
    pub fn iter(&self) -> impl Iterator<Item = (ShaderStage, &Arc<Shader>)> + '_ {
        ShaderStage::ALL
            .into_iter()
            .filter_map(move |stage| self.get(stage).map(|shader| (stage, shader)))
    }

    /// Keys in slot order; empty slots yield [`ShaderKey::undefined`].
    pub fn keys(&self) -> [ShaderKey; 5] {
        ShaderStage::ALL.map(|stage| {
            self.get(stage)
                .map_or_else(ShaderKey::undefined, |shader| shader.key())
        })
    }

    pub fn has_tessellation(&self) -> bool {
        self.tcs.is_some() && self.tes.is_some()
    }
}
