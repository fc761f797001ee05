// src/lib.rs
//! Graphics pipeline state cache.
//!
//! Pipelines are compiled lazily per `(shader set, state vector, render pass)`
//! combination with a fast path, upgraded to an optimized handle in the
//! background, and remembered on disk so the next run can compile them before
//! the first draw needs them.

pub mod backend;
pub mod cache_file;
pub mod compiler;
pub mod error;
pub mod key;
pub mod layout;
pub mod manager;
pub mod pipeline;
mod queue;
pub mod shader;
pub mod state;
pub mod state_cache;

#[cfg(test)]
mod test_util;

pub use backend::{
    CompileMode, PipelineBackend, PipelineCompiler, PipelineDesc, PipelineHandle, PipelineManager, RenderPass,
    RenderPassFactory, RenderPassHandle,
};
pub use compiler::{BackgroundCompiler, CompilerConfig};
pub use error::{Error, Result};
pub use key::PipelineStateKey;
pub use layout::PipelineLayout;
pub use manager::{DefaultPipelineManager, RenderPassCache};
pub use pipeline::{GraphicsPipeline, PipelineInstance, PipelineStats};
pub use shader::{Shader, ShaderInterface, ShaderKey, ShaderSet, ShaderStage};
pub use state::{RenderPassFormat, StateVector};
pub use state_cache::{StateCache, StateCacheConfig, StateCacheStats};
