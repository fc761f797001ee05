// src/pipeline.rs
//! Graphics pipelines and their per-state instances.
//!
//! A [`GraphicsPipeline`] is one shader set. Each distinct
//! `(state vector, render pass)` pair it is drawn with becomes one
//! [`PipelineInstance`], compiled twice: synchronously with fast flags on the
//! render thread that first needs it, then again fully optimized in the
//! background. Render threads never wait for the second compile.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::backend::{CompileMode, PipelineBackend, PipelineCompiler, PipelineDesc, PipelineHandle, RenderPass};
use crate::error::{Error, Result};
use crate::key::PipelineStateKey;
use crate::layout::PipelineLayout;
use crate::shader::{ShaderKey, ShaderKeys, ShaderSet};
use crate::state::{PrimitiveTopology, StateVector, MAX_VERTEX_ATTRIBUTES, MAX_VERTEX_BINDINGS};
use crate::state_cache::StateCache;

// ----------------------------------------------------------------------------
// Instance
// ----------------------------------------------------------------------------

/// One compiled realization of a pipeline for one exact state and render pass.
///
/// The base handle is fixed at construction (and absent for pre-warmed
/// instances). The fast handle is installed at most once; whoever loses the
/// race must destroy their own handle.
pub struct PipelineInstance {
    backend: Arc<dyn PipelineBackend>,
    state: StateVector,
    render_pass: Arc<RenderPass>,
    base: Option<PipelineHandle>,
    fast: AtomicU64,
}

impl PipelineInstance {
    pub fn new(
        backend: Arc<dyn PipelineBackend>,
        state: StateVector,
        render_pass: Arc<RenderPass>,
        base: Option<PipelineHandle>,
    ) -> Self {
        Self {
            backend,
            state,
            render_pass,
            base,
            fast: AtomicU64::new(0),
        }
    }

    /// Render passes with the same attachment formats are interchangeable.
    #[inline]
    pub fn is_compatible(&self, state: &StateVector, render_pass: &RenderPass) -> bool {
        self.render_pass.format() == render_pass.format() && self.state == *state
    }

    /// Installs the optimized handle. Returns `false` if one is already set,
    /// in which case `handle` was not taken and belongs to the caller.
    pub fn set_fast_pipeline(&self, handle: PipelineHandle) -> bool {
        self.fast
            .compare_exchange(0, handle.raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The optimized handle if there is one, otherwise the base handle.
    #[inline]
    pub fn pipeline(&self) -> Option<PipelineHandle> {
        self.fast_pipeline().or(self.base)
    }

    #[inline]
    pub fn base_pipeline(&self) -> Option<PipelineHandle> {
        self.base
    }

    #[inline]
    pub fn fast_pipeline(&self) -> Option<PipelineHandle> {
        PipelineHandle::from_raw(self.fast.load(Ordering::Acquire))
    }

    pub fn state_vector(&self) -> &StateVector {
        &self.state
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }
}

impl Drop for PipelineInstance {
    fn drop(&mut self) {
        if let Some(handle) = self.base {
            self.backend.destroy_pipeline(handle);
        }
        if let Some(handle) = PipelineHandle::from_raw(*self.fast.get_mut()) {
            self.backend.destroy_pipeline(handle);
        }
    }
}

impl fmt::Debug for PipelineInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineInstance")
            .field("render_pass", &self.render_pass.handle())
            .field("state_hash", &format_args!("{:016x}", self.state.hash64()))
            .field("base", &self.base)
            .field("fast", &self.fast_pipeline())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Counters
// ----------------------------------------------------------------------------

#[derive(Default)]
struct PipelineCounters {
    instances_created: AtomicU64,
    instances_adopted: AtomicU64,
    fast_installed: AtomicU64,
    fast_discarded: AtomicU64,
    compile_failures: AtomicU64,
}

/// Snapshot of a pipeline's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Instances created on the render path.
    pub instances_created: u64,
    /// Pre-warmed instances that became the pipeline's instance for their state.
    pub instances_adopted: u64,
    pub fast_installed: u64,
    /// Optimized handles destroyed because the instance already had one.
    pub fast_discarded: u64,
    pub compile_failures: u64,
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

pub struct GraphicsPipeline {
    backend: Arc<dyn PipelineBackend>,
    compiler: Option<Arc<dyn PipelineCompiler>>,
    state_cache: Option<Weak<StateCache>>,

    shaders: ShaderSet,
    keys: [ShaderKey; 5],
    layout: PipelineLayout,
    vs_in: u32,
    fs_out: u32,

    // Append-only. Scans dominate, so contention stays low.
    instances: Mutex<Vec<Arc<PipelineInstance>>>,

    // First handle of each mode, used as derivative parent for later compiles.
    base_parent: AtomicU64,
    fast_parent: AtomicU64,

    counters: PipelineCounters,
}

impl GraphicsPipeline {
    pub fn new(backend: Arc<dyn PipelineBackend>, shaders: ShaderSet) -> Self {
        let keys = shaders.keys();
        let layout = PipelineLayout::from_shaders(&shaders);
        let vs_in = shaders.vs.as_ref().map_or(0, |vs| vs.interface().input_mask);
        let fs_out = shaders.fs.as_ref().map_or(0, |fs| fs.interface().output_mask);

        Self {
            backend,
            compiler: None,
            state_cache: None,
            shaders,
            keys,
            layout,
            vs_in,
            fs_out,
            instances: Mutex::new(Vec::new()),
            base_parent: AtomicU64::new(0),
            fast_parent: AtomicU64::new(0),
            counters: PipelineCounters::default(),
        }
    }

    /// Background compiler that receives every new instance.
    pub fn with_compiler(mut self, compiler: Arc<dyn PipelineCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// State cache notified of every new instance. Held weakly so the cache
    /// and the pipelines it pre-warms do not keep each other alive.
    pub fn with_state_cache(mut self, state_cache: Weak<StateCache>) -> Self {
        self.state_cache = Some(state_cache);
        self
    }

    pub fn shaders(&self) -> &ShaderSet {
        &self.shaders
    }

    /// Shader keys in slot order (VS, TCS, TES, GS, PS).
    pub fn shader_keys(&self) -> &[ShaderKey; 5] {
        &self.keys
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.layout
    }

    pub fn backend(&self) -> &Arc<dyn PipelineBackend> {
        &self.backend
    }

    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn instances(&self) -> Vec<Arc<PipelineInstance>> {
        self.instances.lock().clone()
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            instances_created: c.instances_created.load(Ordering::Relaxed),
            instances_adopted: c.instances_adopted.load(Ordering::Relaxed),
            fast_installed: c.fast_installed.load(Ordering::Relaxed),
            fast_discarded: c.fast_discarded.load(Ordering::Relaxed),
            compile_failures: c.compile_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns a pipeline handle for `state` and `render_pass`, compiling one
    /// with fast flags if this combination has not been seen before.
    ///
    /// Returns `None` only if the state is invalid for this shader set or the
    /// driver failed to compile it.
    pub fn get_pipeline_handle(
        self: &Arc<Self>,
        state: &StateVector,
        render_pass: &Arc<RenderPass>,
    ) -> Option<PipelineHandle> {
        if let Some(instance) = self.find_instance(state, render_pass) {
            return instance.pipeline();
        }

        if let Err(e) = self.validate_state(state, render_pass) {
            warn!("graphics pipeline {}: {}", self.describe(), e);
            return None;
        }

        // Compile outside the lock; two threads may both get here, the
        // second re-check below keeps only one result.
        let handle = match self.compile(state, render_pass, CompileMode::Fast) {
            Ok(handle) => handle,
            Err(e) => {
                self.counters.compile_failures.fetch_add(1, Ordering::Relaxed);
                warn!("graphics pipeline {}: {}", self.describe(), e);
                return None;
            }
        };

        let instance = {
            let mut instances = self.instances.lock();

            let existing = instances
                .iter()
                .find(|i| i.is_compatible(state, render_pass))
                .cloned();

            if let Some(existing) = existing {
                drop(instances);
                self.backend.destroy_pipeline(handle);
                return existing.pipeline();
            }

            let instance = Arc::new(PipelineInstance::new(
                self.backend.clone(),
                *state,
                render_pass.clone(),
                Some(handle),
            ));
            instances.push(instance.clone());
            instance
        };

        self.counters.instances_created.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .base_parent
            .compare_exchange(0, handle.raw(), Ordering::AcqRel, Ordering::Relaxed);

        if let Some(cache) = self.state_cache.as_ref().and_then(Weak::upgrade) {
            cache.cache_pipeline_instance(self.clone(), instance.clone());
        }

        if let Some(compiler) = &self.compiler {
            compiler.queue_compilation(self.clone(), instance);
        }

        Some(handle)
    }

    /// Compiles the optimized handle for `instance`.
    ///
    /// Returns `false` if the instance was already optimized, compilation
    /// failed, or another thread installed its handle first. A pre-warmed
    /// instance that wins becomes this pipeline's instance for its state,
    /// unless a live draw already created one.
    pub fn compile_instance(&self, instance: &Arc<PipelineInstance>) -> bool {
        if instance.fast_pipeline().is_some() {
            return false;
        }

        if let Err(e) = self.validate_state(instance.state_vector(), instance.render_pass()) {
            warn!("graphics pipeline {}: {}", self.describe(), e);
            return false;
        }

        let handle = match self.compile(instance.state_vector(), instance.render_pass(), CompileMode::Optimized) {
            Ok(handle) => handle,
            Err(e) => {
                self.counters.compile_failures.fetch_add(1, Ordering::Relaxed);
                warn!("graphics pipeline {}: {}", self.describe(), e);
                return false;
            }
        };

        if !instance.set_fast_pipeline(handle) {
            self.backend.destroy_pipeline(handle);
            self.counters.fast_discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.counters.fast_installed.fetch_add(1, Ordering::Relaxed);

        let owned = instance.base_pipeline().is_some() || self.adopt_instance(instance);
        if owned {
            let _ = self
                .fast_parent
                .compare_exchange(0, handle.raw(), Ordering::AcqRel, Ordering::Relaxed);
        }
        true
    }

    /// Persisted identity of `instance` within this pipeline.
    pub fn instance_key(&self, instance: &PipelineInstance) -> PipelineStateKey {
        PipelineStateKey::new(self.keys, *instance.state_vector(), *instance.render_pass().format())
    }

    fn find_instance(&self, state: &StateVector, render_pass: &RenderPass) -> Option<Arc<PipelineInstance>> {
        self.instances
            .lock()
            .iter()
            .find(|i| i.is_compatible(state, render_pass))
            .cloned()
    }

    fn adopt_instance(&self, instance: &Arc<PipelineInstance>) -> bool {
        let mut instances = self.instances.lock();

        if let Some(existing) = instances
            .iter()
            .find(|i| i.is_compatible(instance.state_vector(), instance.render_pass()))
        {
            return Arc::ptr_eq(existing, instance);
        }

        instances.push(instance.clone());
        self.counters.instances_adopted.fetch_add(1, Ordering::Relaxed);
        debug!("graphics pipeline {}: adopted pre-warmed instance", self.describe());
        true
    }

    fn compile(&self, state: &StateVector, render_pass: &RenderPass, mode: CompileMode) -> Result<PipelineHandle> {
        let parent = match mode {
            CompileMode::Fast => &self.base_parent,
            CompileMode::Optimized => &self.fast_parent,
        };

        self.backend.compile_pipeline(&PipelineDesc {
            shaders: &self.shaders,
            layout: &self.layout,
            state,
            render_pass,
            mode,
            parent: PipelineHandle::from_raw(parent.load(Ordering::Acquire)),
        })
    }

    fn validate_state(&self, state: &StateVector, render_pass: &RenderPass) -> Result<()> {
        let input = &state.vertex_input;

        if input.attribute_count as usize > MAX_VERTEX_ATTRIBUTES || input.binding_count as usize > MAX_VERTEX_BINDINGS {
            return Err(Error::InvalidState(format!(
                "{} attributes / {} bindings exceed the vertex input limits",
                input.attribute_count, input.binding_count
            )));
        }

        let mut provided = 0u32;
        for attribute in input.attributes() {
            if !input.bindings().iter().any(|b| b.binding == attribute.binding) {
                return Err(Error::InvalidState(format!(
                    "attribute {} references undeclared binding {}",
                    attribute.location, attribute.binding
                )));
            }
            provided |= 1u32.checked_shl(attribute.location).unwrap_or(0);
        }

        if provided & self.vs_in != self.vs_in {
            return Err(Error::InvalidState(format!(
                "input layout provides {provided:#x}, vertex shader reads {:#x}",
                self.vs_in
            )));
        }

        let patches = state.input_assembly.topology == PrimitiveTopology::PATCH_LIST
            || state.input_assembly.patch_vertex_count != 0;
        if patches && !self.shaders.has_tessellation() {
            return Err(Error::InvalidState(
                "tessellation patches without tessellation shaders".into(),
            ));
        }

        let colors = render_pass.format().color_mask();
        if self.fs_out & colors != self.fs_out {
            return Err(Error::InvalidState(format!(
                "fragment shader writes {:#x}, render pass has targets {colors:#x}",
                self.fs_out
            )));
        }

        Ok(())
    }

    fn describe(&self) -> ShaderKeys<'_> {
        ShaderKeys(&self.keys)
    }
}

impl fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("shaders", &self.keys)
            .field("instances", &self.instance_count())
            .finish()
    }
}
