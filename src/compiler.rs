// src/compiler.rs
//! Background compiler: a fixed pool of worker threads producing the
//! optimized handle of every instance handed to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::backend::PipelineCompiler;
use crate::error::Result;
use crate::pipeline::{GraphicsPipeline, PipelineInstance};

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub worker_threads: usize,
    pub thread_name: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        // Leave cores for the render threads.
        let worker_threads = thread::available_parallelism()
            .map(|n| (n.get() / 2).max(1))
            .unwrap_or(1);
        Self {
            worker_threads,
            thread_name: "scache-compiler".to_string(),
        }
    }
}

type Job = (Arc<GraphicsPipeline>, Arc<PipelineInstance>);

/// Jobs queued or running; `wait_idle` sleeps on it.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    done: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.done.notify_all();
        }
    }
}

pub struct BackgroundCompiler {
    sender: Mutex<Option<Sender<Job>>>,
    stop: Arc<AtomicBool>,
    pending: Arc<Pending>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundCompiler {
    pub fn new(config: CompilerConfig) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let stop = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(Pending::default());

        let mut workers = Vec::with_capacity(config.worker_threads.max(1));
        for index in 0..config.worker_threads.max(1) {
            let receiver = receiver.clone();
            let stop = stop.clone();
            let pending = pending.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, index))
                .spawn(move || run_worker(receiver, stop, pending))?;
            workers.push(handle);
        }

        debug!("background compiler: started {} workers", workers.len());

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            stop,
            pending,
            workers: Mutex::new(workers),
        })
    }

    /// Blocks until every queued job has been compiled or dropped.
    pub fn wait_idle(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.done.wait(&mut count);
        }
    }

    /// Hard stop: jobs still queued are dropped without compiling.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        self.sender.lock().take();

        let current = thread::current().id();
        for handle in self.workers.lock().drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("background compiler: worker panicked");
            }
        }
    }
}

impl PipelineCompiler for BackgroundCompiler {
    fn queue_compilation(&self, pipeline: Arc<GraphicsPipeline>, instance: Arc<PipelineInstance>) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        self.pending.add();
        if sender.send((pipeline, instance)).is_err() {
            self.pending.finish();
        }
    }
}

impl Drop for BackgroundCompiler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<Job>, stop: Arc<AtomicBool>, pending: Arc<Pending>) {
    for (pipeline, instance) in receiver.iter() {
        if !stop.load(Ordering::Acquire) {
            pipeline.compile_instance(&instance);
        }
        drop((pipeline, instance));
        pending.finish();
    }
}
