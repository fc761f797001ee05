// src/backend.rs
//! Boundary to the collaborators this crate does not implement itself:
//! the driver, render-pass creation, pipeline construction and the background
//! compiler. Defaults for the last three live in [`crate::manager`] and
//! [`crate::compiler`].

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::error::Result;
use crate::layout::PipelineLayout;
use crate::pipeline::{GraphicsPipeline, PipelineInstance};
use crate::shader::ShaderSet;
use crate::state::{RenderPassFormat, StateVector};

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Driver pipeline object. Never null; "no pipeline" is `Option::None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(NonZeroU64);

impl PipelineHandle {
    #[inline]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipelineHandle({:#x})", self.raw())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassHandle(pub u64);

/// A driver render pass together with the format it was created for.
#[derive(Debug)]
pub struct RenderPass {
    handle: RenderPassHandle,
    format: RenderPassFormat,
}

impl RenderPass {
    pub fn new(handle: RenderPassHandle, format: RenderPassFormat) -> Self {
        Self { handle, format }
    }

    #[inline]
    pub fn handle(&self) -> RenderPassHandle {
        self.handle
    }

    #[inline]
    pub fn format(&self) -> &RenderPassFormat {
        &self.format
    }
}

// ----------------------------------------------------------------------------
// Driver
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileMode {
    /// Minimal optimization, used on render threads.
    Fast,
    /// Full optimization, used by the background compiler.
    Optimized,
}

/// Everything the driver needs to build one pipeline object.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub shaders: &'a ShaderSet,
    pub layout: &'a PipelineLayout,
    pub state: &'a StateVector,
    pub render_pass: &'a RenderPass,
    pub mode: CompileMode,
    /// Earlier pipeline of the same shader set to derive from, if any.
    pub parent: Option<PipelineHandle>,
}

/// The GPU driver. Implementations must be callable from any thread.
pub trait PipelineBackend: Send + Sync + 'static {
    fn compile_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<PipelineHandle>;

    fn destroy_pipeline(&self, handle: PipelineHandle);

    fn create_render_pass(&self, format: &RenderPassFormat) -> Result<RenderPassHandle>;
}

// ----------------------------------------------------------------------------
// Collaborators used by the state cache
// ----------------------------------------------------------------------------

/// Get-or-create render passes by format.
pub trait RenderPassFactory: Send + Sync + 'static {
    fn render_pass(&self, format: &RenderPassFormat) -> Result<Arc<RenderPass>>;
}

/// Get-or-create pipelines by shader set.
pub trait PipelineManager: Send + Sync + 'static {
    fn create_graphics_pipeline(&self, shaders: ShaderSet) -> Arc<GraphicsPipeline>;
}

/// Accepts instances for a background, fully optimized compile. Must not block.
pub trait PipelineCompiler: Send + Sync + 'static {
    fn queue_compilation(&self, pipeline: Arc<GraphicsPipeline>, instance: Arc<PipelineInstance>);
}
