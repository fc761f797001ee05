// src/test_util.rs
//! Mocks and fixtures shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{
    CompileMode, PipelineBackend, PipelineCompiler, PipelineDesc, PipelineHandle, RenderPass, RenderPassHandle,
};
use crate::error::{Error, Result};
use crate::key::PipelineStateKey;
use crate::pipeline::{GraphicsPipeline, PipelineInstance};
use crate::shader::{Shader, ShaderInterface, ShaderStage};
use crate::state::{Format, RenderPassFormat};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, Copy)]
pub struct CompileRecord {
    pub mode: CompileMode,
    pub parent: Option<PipelineHandle>,
    pub handle: PipelineHandle,
}

/// Driver stand-in that hands out sequential handles and records every call.
#[derive(Default)]
pub struct MockBackend {
    next_handle: AtomicU64,
    delay: Duration,
    fail: AtomicBool,
    compiles: Mutex<Vec<CompileRecord>>,
    destroyed: Mutex<Vec<PipelineHandle>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every compile sleeps for `delay`, widening race windows.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn fail_compiles(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn compiles(&self) -> Vec<CompileRecord> {
        self.compiles.lock().clone()
    }

    pub fn compile_count(&self, mode: CompileMode) -> usize {
        self.compiles.lock().iter().filter(|c| c.mode == mode).count()
    }

    pub fn destroyed(&self) -> Vec<PipelineHandle> {
        self.destroyed.lock().clone()
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl PipelineBackend for MockBackend {
    fn compile_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<PipelineHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::compile("mock driver refused"));
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let handle = PipelineHandle::from_raw(self.next()).ok_or_else(|| Error::compile("handle overflow"))?;
        self.compiles.lock().push(CompileRecord {
            mode: desc.mode,
            parent: desc.parent,
            handle,
        });
        Ok(handle)
    }

    fn destroy_pipeline(&self, handle: PipelineHandle) {
        self.destroyed.lock().push(handle);
    }

    fn create_render_pass(&self, _format: &RenderPassFormat) -> Result<RenderPassHandle> {
        Ok(RenderPassHandle(self.next()))
    }
}

/// Compiler stand-in that only records what it was given.
#[derive(Default)]
pub struct RecordingCompiler {
    queued: Mutex<Vec<(Arc<GraphicsPipeline>, Arc<PipelineInstance>)>>,
}

impl RecordingCompiler {
    pub fn len(&self) -> usize {
        self.queued.lock().len()
    }

    pub fn take(&self) -> Vec<(Arc<GraphicsPipeline>, Arc<PipelineInstance>)> {
        std::mem::take(&mut *self.queued.lock())
    }

    pub fn queued_keys(&self) -> Vec<PipelineStateKey> {
        self.queued
            .lock()
            .iter()
            .map(|(pipeline, instance)| pipeline.instance_key(instance))
            .collect()
    }
}

impl PipelineCompiler for RecordingCompiler {
    fn queue_compilation(&self, pipeline: Arc<GraphicsPipeline>, instance: Arc<PipelineInstance>) {
        self.queued.lock().push((pipeline, instance));
    }
}

pub fn shader(stage: ShaderStage, name: &str) -> Arc<Shader> {
    Arc::new(Shader::new(stage, name.as_bytes(), ShaderInterface::default()))
}

pub fn shader_with_inputs(stage: ShaderStage, name: &str, input_mask: u32) -> Arc<Shader> {
    let interface = ShaderInterface {
        input_mask,
        ..Default::default()
    };
    Arc::new(Shader::new(stage, name.as_bytes(), interface))
}

pub fn render_pass(handle: u64) -> Arc<RenderPass> {
    Arc::new(RenderPass::new(
        RenderPassHandle(handle),
        RenderPassFormat::single(Format::B8G8R8A8_UNORM, Format::D24_UNORM_S8_UINT),
    ))
}
