// src/manager.rs
//! Default pipeline manager and render-pass cache.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use log::debug;
use parking_lot::Mutex;

use crate::backend::{PipelineBackend, PipelineCompiler, PipelineManager, RenderPass, RenderPassFactory};
use crate::error::Result;
use crate::pipeline::GraphicsPipeline;
use crate::shader::{ShaderKey, ShaderSet};
use crate::state::RenderPassFormat;
use crate::state_cache::StateCache;

/// One [`GraphicsPipeline`] per distinct combination of five shader keys.
///
/// Live draws and state-cache pre-warms go through the same manager, so both
/// land on the same pipeline object and share its instance list.
pub struct DefaultPipelineManager {
    backend: Arc<dyn PipelineBackend>,
    compiler: Option<Arc<dyn PipelineCompiler>>,
    state_cache: OnceLock<Weak<StateCache>>,
    pipelines: Mutex<HashMap<[ShaderKey; 5], Arc<GraphicsPipeline>>>,
}

impl DefaultPipelineManager {
    pub fn new(backend: Arc<dyn PipelineBackend>) -> Self {
        Self {
            backend,
            compiler: None,
            state_cache: OnceLock::new(),
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn PipelineCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Pipelines created from now on report new instances to `cache`.
    /// Only the first call has an effect.
    pub fn attach_state_cache(&self, cache: &Arc<StateCache>) -> bool {
        self.state_cache.set(Arc::downgrade(cache)).is_ok()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.lock().len()
    }
}

impl PipelineManager for DefaultPipelineManager {
    fn create_graphics_pipeline(&self, shaders: ShaderSet) -> Arc<GraphicsPipeline> {
        let keys = shaders.keys();
        let mut pipelines = self.pipelines.lock();

        pipelines
            .entry(keys)
            .or_insert_with(|| {
                debug!("pipeline manager: creating pipeline for {:?}", keys);
                let mut pipeline = GraphicsPipeline::new(self.backend.clone(), shaders);
                if let Some(compiler) = &self.compiler {
                    pipeline = pipeline.with_compiler(compiler.clone());
                }
                if let Some(cache) = self.state_cache.get() {
                    pipeline = pipeline.with_state_cache(cache.clone());
                }
                Arc::new(pipeline)
            })
            .clone()
    }
}

/// Render passes created on first use of a format and shared afterwards.
pub struct RenderPassCache {
    backend: Arc<dyn PipelineBackend>,
    passes: Mutex<HashMap<RenderPassFormat, Arc<RenderPass>>>,
}

impl RenderPassCache {
    pub fn new(backend: Arc<dyn PipelineBackend>) -> Self {
        Self {
            backend,
            passes: Mutex::new(HashMap::new()),
        }
    }
}

impl RenderPassFactory for RenderPassCache {
    fn render_pass(&self, format: &RenderPassFormat) -> Result<Arc<RenderPass>> {
        let mut passes = self.passes.lock();
        if let Some(pass) = passes.get(format) {
            return Ok(pass.clone());
        }

        let handle = self.backend.create_render_pass(format)?;
        let pass = Arc::new(RenderPass::new(handle, *format));
        passes.insert(*format, pass.clone());
        Ok(pass)
    }
}
