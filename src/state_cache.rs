// src/state_cache.rs
//! Persistent pipeline state cache.
//!
//! Remembers every `(shader set, state vector, render-pass format)` combination
//! the application has drawn with, and on later runs pre-compiles each of them
//! in the background as soon as all of its shaders have been created.
//!
//! Two worker threads, each with its own queue:
//!
//! * **writer**: owns the canonical key set and the file. Turns newly realized
//!   instances into keys, drops keys it already knows, appends the rest.
//! * **lookup**: owns the shader-key -> key back-references and the
//!   shader-key -> shader map. Each arriving shader may complete one or more
//!   stored keys, which are then handed to the compiler.
//!
//! No index is touched by both threads. The writer forwards each new key to
//! the lookup queue instead of writing into the lookup thread's index.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::backend::{PipelineCompiler, PipelineManager, RenderPassFactory};
use crate::cache_file;
use crate::error::Result;
use crate::key::PipelineStateKey;
use crate::pipeline::{GraphicsPipeline, PipelineInstance};
use crate::queue::WorkQueue;
use crate::shader::{Shader, ShaderKey, ShaderSet, ShaderStage};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StateCacheConfig {
    /// Cache file. `None` keeps the cache in memory only.
    pub file_path: Option<PathBuf>,
    /// Record newly realized instances.
    pub enable_writer: bool,
    /// Pre-compile stored pipelines as their shaders arrive.
    pub enable_prewarm: bool,
}

impl Default for StateCacheConfig {
    fn default() -> Self {
        Self {
            file_path: cache_file::default_cache_path(),
            enable_writer: true,
            enable_prewarm: true,
        }
    }
}

impl StateCacheConfig {
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn without_file(mut self) -> Self {
        self.file_path = None;
        self
    }

    pub fn writer(mut self, enabled: bool) -> Self {
        self.enable_writer = enabled;
        self
    }

    pub fn prewarm(mut self, enabled: bool) -> Self {
        self.enable_prewarm = enabled;
        self
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

#[derive(Default)]
struct StatCounters {
    entries_loaded: AtomicU64,
    records_skipped: AtomicU64,
    entries_added: AtomicU64,
    records_written: AtomicU64,
    duplicates_dropped: AtomicU64,
    shaders_registered: AtomicU64,
    duplicate_shaders: AtomicU64,
    prewarms_submitted: AtomicU64,
}

impl StatCounters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StateCacheStats {
    /// Distinct keys read from the cache file.
    pub entries_loaded: u64,
    /// Records dropped on load because their digest did not match.
    pub records_skipped: u64,
    /// Keys the writer saw for the first time this run.
    pub entries_added: u64,
    /// Records actually appended to the file.
    pub records_written: u64,
    /// Submissions whose key was already known.
    pub duplicates_dropped: u64,
    pub shaders_registered: u64,
    /// `provide_shader` calls for a key that was already registered.
    pub duplicate_shaders: u64,
    pub prewarms_submitted: u64,
}

// ----------------------------------------------------------------------------
// Queues
// ----------------------------------------------------------------------------

struct WriterEntry {
    pipeline: Arc<GraphicsPipeline>,
    instance: Arc<PipelineInstance>,
}

enum LookupEntry {
    Shader(Arc<Shader>),
    /// Key added by the writer; only extends the back-reference index.
    Key(Arc<PipelineStateKey>),
}

struct Shared {
    writer: WorkQueue<WriterEntry>,
    lookup: WorkQueue<LookupEntry>,
    stop: AtomicBool,
    stats: StatCounters,
}

// ----------------------------------------------------------------------------
// State cache
// ----------------------------------------------------------------------------

pub struct StateCache {
    config: StateCacheConfig,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl StateCache {
    /// Loads the cache file (or initializes a fresh one) and starts the
    /// worker threads. Only thread creation can fail; cache-file problems
    /// are logged and leave an empty cache.
    pub fn new(
        config: StateCacheConfig,
        pipe_manager: Arc<dyn PipelineManager>,
        render_passes: Arc<dyn RenderPassFactory>,
        compiler: Arc<dyn PipelineCompiler>,
    ) -> Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            writer: WorkQueue::new(),
            lookup: WorkQueue::new(),
            stop: AtomicBool::new(false),
            stats: StatCounters::default(),
        });

        let contents = config
            .file_path
            .as_deref()
            .map(cache_file::load_or_init)
            .unwrap_or_default();

        shared
            .stats
            .records_skipped
            .store(contents.skipped as u64, Ordering::Relaxed);

        let mut entries: HashSet<Arc<PipelineStateKey>> = HashSet::with_capacity(contents.keys.len());
        let mut shader_entries: HashMap<ShaderKey, Vec<Arc<PipelineStateKey>>> = HashMap::new();

        for key in contents.keys {
            if entries.contains(&key) {
                continue;
            }
            let key = Arc::new(key);
            insert_shader_entries(&mut shader_entries, &key);
            entries.insert(key);
        }

        shared
            .stats
            .entries_loaded
            .store(entries.len() as u64, Ordering::Relaxed);

        let mut workers = Vec::with_capacity(2);

        if config.enable_writer {
            let writer = Writer {
                shared: shared.clone(),
                file: config.file_path.as_deref().and_then(open_writer_file),
                entries,
                forward_keys: config.enable_prewarm,
            };
            workers.push(
                thread::Builder::new()
                    .name("scache-writer".into())
                    .spawn(move || writer.run())?,
            );
        }

        if config.enable_prewarm {
            let lookup = Lookup {
                shared: shared.clone(),
                shader_entries,
                shader_objects: HashMap::new(),
                pipe_manager,
                render_passes,
                compiler,
            };
            workers.push(
                thread::Builder::new()
                    .name("scache-lookup".into())
                    .spawn(move || lookup.run())?,
            );
        }

        Ok(Arc::new(Self {
            config,
            shared,
            workers: Mutex::new(workers),
        }))
    }

    /// Queues a freshly realized instance for persistence. Never blocks on I/O.
    pub fn cache_pipeline_instance(&self, pipeline: Arc<GraphicsPipeline>, instance: Arc<PipelineInstance>) {
        if !self.config.enable_writer || self.is_stopped() {
            return;
        }
        self.shared.writer.push(WriterEntry { pipeline, instance });
    }

    /// Makes a shader available for pre-warming. Never blocks.
    pub fn provide_shader(&self, shader: Arc<Shader>) {
        if !self.config.enable_prewarm || self.is_stopped() {
            return;
        }
        self.shared.lookup.push(LookupEntry::Shader(shader));
    }

    /// Blocks until both workers have drained their queues. Not meant for
    /// render threads.
    pub fn wait_idle(&self) {
        // The writer feeds the lookup queue, never the other way round.
        self.shared.writer.wait_idle(&self.shared.stop);
        self.shared.lookup.wait_idle(&self.shared.stop);
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.config.file_path.as_deref()
    }

    pub fn stats(&self) -> StateCacheStats {
        let s = &self.shared.stats;
        StateCacheStats {
            entries_loaded: s.entries_loaded.load(Ordering::Relaxed),
            records_skipped: s.records_skipped.load(Ordering::Relaxed),
            entries_added: s.entries_added.load(Ordering::Relaxed),
            records_written: s.records_written.load(Ordering::Relaxed),
            duplicates_dropped: s.duplicates_dropped.load(Ordering::Relaxed),
            shaders_registered: s.shaders_registered.load(Ordering::Relaxed),
            duplicate_shaders: s.duplicate_shaders.load(Ordering::Relaxed),
            prewarms_submitted: s.prewarms_submitted.load(Ordering::Relaxed),
        }
    }

    /// Stops both workers and joins them. Queued work is dropped.
    pub fn shutdown(&self) {
        {
            let _writer = self.shared.writer.lock();
            let _lookup = self.shared.lookup.lock();
            self.shared.stop.store(true, Ordering::Release);
            self.shared.writer.wake_all();
            self.shared.lookup.wake_all();
        }

        let current = thread::current().id();
        for handle in self.workers.lock().drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("state cache: worker thread panicked");
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }
}

impl Drop for StateCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn insert_shader_entries(index: &mut HashMap<ShaderKey, Vec<Arc<PipelineStateKey>>>, key: &Arc<PipelineStateKey>) {
    for shader_key in key.shader_keys() {
        if shader_key.is_defined() {
            index.entry(*shader_key).or_default().push(key.clone());
        }
    }
}

fn open_writer_file(path: &Path) -> Option<File> {
    match cache_file::open_for_append(path) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!("state cache: new entries will not be persisted: {}", e);
            None
        }
    }
}

// ----------------------------------------------------------------------------
// Writer thread
// ----------------------------------------------------------------------------

struct Writer {
    shared: Arc<Shared>,
    file: Option<File>,
    entries: HashSet<Arc<PipelineStateKey>>,
    forward_keys: bool,
}

impl Writer {
    fn run(mut self) {
        while let Some(entry) = self.shared.writer.pop(&self.shared.stop) {
            let key = entry.pipeline.instance_key(&entry.instance);
            drop(entry);
            self.write(key);
        }
    }

    fn write(&mut self, key: PipelineStateKey) {
        let stats = &self.shared.stats;

        if self.entries.contains(&key) {
            StatCounters::bump(&stats.duplicates_dropped);
            return;
        }

        if let Some(file) = self.file.as_mut() {
            match cache_file::write_record(file, &key) {
                Ok(()) => StatCounters::bump(&stats.records_written),
                Err(e) => {
                    warn!("state cache: write failed, disabling persistence: {}", e);
                    self.file = None;
                }
            }
        }

        let key = Arc::new(key);
        self.entries.insert(key.clone());
        StatCounters::bump(&stats.entries_added);

        if self.forward_keys {
            self.shared.lookup.push(LookupEntry::Key(key));
        }
    }
}

// ----------------------------------------------------------------------------
// Lookup thread
// ----------------------------------------------------------------------------

struct Lookup {
    shared: Arc<Shared>,
    shader_entries: HashMap<ShaderKey, Vec<Arc<PipelineStateKey>>>,
    shader_objects: HashMap<ShaderKey, Arc<Shader>>,
    pipe_manager: Arc<dyn PipelineManager>,
    render_passes: Arc<dyn RenderPassFactory>,
    compiler: Arc<dyn PipelineCompiler>,
}

impl Lookup {
    fn run(mut self) {
        while let Some(entry) = self.shared.lookup.pop(&self.shared.stop) {
            match entry {
                LookupEntry::Shader(shader) => self.register_shader(shader),
                LookupEntry::Key(key) => insert_shader_entries(&mut self.shader_entries, &key),
            }
        }
    }

    fn register_shader(&mut self, shader: Arc<Shader>) {
        let key = shader.key();
        if !key.is_defined() {
            return;
        }

        match self.shader_objects.entry(key) {
            Entry::Occupied(_) => {
                debug!("state cache: shader {} already provided", key);
                StatCounters::bump(&self.shared.stats.duplicate_shaders);
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(shader);
                StatCounters::bump(&self.shared.stats.shaders_registered);
            }
        }

        let Some(candidates) = self.shader_entries.get(&key) else {
            return;
        };

        for candidate in candidates {
            if let Some(shaders) = self.resolve(candidate) {
                self.prewarm(candidate, shaders);
            }
        }
    }

    /// All five slots of `key`, or `None` if a defined stage is still missing.
    fn resolve(&self, key: &PipelineStateKey) -> Option<ShaderSet> {
        let slot = |stage: ShaderStage| -> Option<Option<Arc<Shader>>> {
            let shader_key = key.shader_key(stage);
            if !shader_key.is_defined() {
                return Some(None);
            }
            self.shader_objects.get(&shader_key).cloned().map(Some)
        };

        Some(ShaderSet {
            vs: slot(ShaderStage::Vertex)?,
            tcs: slot(ShaderStage::TessControl)?,
            tes: slot(ShaderStage::TessEval)?,
            gs: slot(ShaderStage::Geometry)?,
            fs: slot(ShaderStage::Fragment)?,
        })
    }

    fn prewarm(&self, key: &PipelineStateKey, shaders: ShaderSet) {
        let pipeline = self.pipe_manager.create_graphics_pipeline(shaders);

        let render_pass = match self.render_passes.render_pass(key.render_pass_format()) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                warn!("state cache: cannot create render pass for cached pipeline: {}", e);
                return;
            }
        };

        let instance = Arc::new(PipelineInstance::new(
            pipeline.backend().clone(),
            *key.state_vector(),
            render_pass,
            None,
        ));

        info!("state cache: compiling cached pipeline {}", key.vs_key());
        self.compiler.queue_compilation(pipeline, instance);
        StatCounters::bump(&self.shared.stats.prewarms_submitted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CompileMode, PipelineBackend, RenderPass};
    use crate::cache_file::{init_cache_file, read_cache_file, write_record};
    use crate::compiler::{BackgroundCompiler, CompilerConfig};
    use crate::manager::{DefaultPipelineManager, RenderPassCache};
    use crate::state::{CullMode, Format, RenderPassFormat, StateVector};
    use crate::test_util::{init_logger, shader, MockBackend, RecordingCompiler};
    use std::fs::OpenOptions;
    use std::io::Write;

    struct Fixture {
        backend: Arc<MockBackend>,
        manager: Arc<DefaultPipelineManager>,
        passes: Arc<RenderPassCache>,
        compiler: Arc<RecordingCompiler>,
        cache: Arc<StateCache>,
    }

    fn fixture(path: &Path) -> Fixture {
        init_logger();
        let backend = MockBackend::new();
        let manager = Arc::new(DefaultPipelineManager::new(backend.clone()));
        let passes = Arc::new(RenderPassCache::new(backend.clone()));
        let compiler = Arc::new(RecordingCompiler::default());
        let cache = StateCache::new(
            StateCacheConfig::default().with_file_path(path),
            manager.clone(),
            passes.clone(),
            compiler.clone(),
        )
        .unwrap();
        manager.attach_state_cache(&cache);
        Fixture {
            backend,
            manager,
            passes,
            compiler,
            cache,
        }
    }

    fn format() -> RenderPassFormat {
        RenderPassFormat::single(Format::B8G8R8A8_UNORM, Format::D24_UNORM_S8_UINT)
    }

    /// Writes a cache file holding `keys`, as a previous run would have.
    fn seed(path: &Path, keys: &[PipelineStateKey]) {
        init_cache_file(path).unwrap();
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        for key in keys {
            write_record(&mut file, key).unwrap();
        }
    }

    fn vs_ps_key(vs: &Shader, ps: &Shader) -> PipelineStateKey {
        let mut shaders = [ShaderKey::undefined(); 5];
        shaders[0] = vs.key();
        shaders[4] = ps.key();
        PipelineStateKey::new(shaders, StateVector::default(), format())
    }

    #[test]
    fn repeated_submissions_append_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dedup.scache");
        let f = fixture(&path);

        let pipeline = f.manager.create_graphics_pipeline(ShaderSet::new(
            Some(shader(ShaderStage::Vertex, "vs")),
            Some(shader(ShaderStage::Fragment, "ps")),
        ));
        let pass = f.passes.render_pass(&format()).unwrap();
        pipeline.get_pipeline_handle(&StateVector::default(), &pass).unwrap();
        let instance = pipeline.instances()[0].clone();

        for _ in 0..10 {
            f.cache.cache_pipeline_instance(pipeline.clone(), instance.clone());
        }
        f.cache.wait_idle();

        let stats = f.cache.stats();
        assert_eq!(stats.records_written, 1);
        assert_eq!(stats.duplicates_dropped, 10);

        let contents = read_cache_file(&path).unwrap();
        assert_eq!(contents.keys, vec![pipeline.instance_key(&instance)]);
    }

    #[test]
    fn records_are_appended_in_realization_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.scache");
        let f = fixture(&path);

        let pipeline = f.manager.create_graphics_pipeline(ShaderSet::new(
            Some(shader(ShaderStage::Vertex, "vs")),
            None,
        ));
        let pass = f.passes.render_pass(&format()).unwrap();
        let mut expected = Vec::new();
        for cull in [CullMode::BACK, CullMode::NONE, CullMode::FRONT] {
            let mut state = StateVector::default();
            state.rasterizer.cull_mode = cull;
            pipeline.get_pipeline_handle(&state, &pass).unwrap();
            expected.push(PipelineStateKey::new(*pipeline.shader_keys(), state, format()));
        }
        f.cache.wait_idle();

        assert_eq!(read_cache_file(&path).unwrap().keys, expected);
    }

    #[test]
    fn loads_previous_run_and_skips_known_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reload.scache");
        let vs = shader(ShaderStage::Vertex, "vs");
        let ps = shader(ShaderStage::Fragment, "ps");
        seed(&path, &[vs_ps_key(&vs, &ps), vs_ps_key(&vs, &ps)]);

        let f = fixture(&path);
        assert_eq!(f.cache.stats().entries_loaded, 1);

        let pipeline = f.manager.create_graphics_pipeline(ShaderSet::new(Some(vs), Some(ps)));
        let pass = f.passes.render_pass(&format()).unwrap();
        pipeline.get_pipeline_handle(&StateVector::default(), &pass).unwrap();
        f.cache.wait_idle();

        assert_eq!(f.cache.stats().records_written, 0);
        assert_eq!(read_cache_file(&path).unwrap().keys.len(), 2);
    }

    #[test]
    fn prewarm_waits_for_all_shaders_in_either_order() {
        for vs_first in [true, false] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("prewarm.scache");
            let vs = shader(ShaderStage::Vertex, "vs");
            let ps = shader(ShaderStage::Fragment, "ps");
            let key = vs_ps_key(&vs, &ps);
            seed(&path, &[key]);

            let f = fixture(&path);
            let (first, second) = if vs_first { (vs, ps) } else { (ps, vs) };

            f.cache.provide_shader(first);
            f.cache.wait_idle();
            assert_eq!(f.compiler.len(), 0);

            f.cache.provide_shader(second);
            f.cache.wait_idle();
            assert_eq!(f.compiler.queued_keys(), vec![key]);

            let (pipeline, instance) = f.compiler.take().pop().unwrap();
            assert!(instance.base_pipeline().is_none());
            assert_eq!(instance.render_pass().format(), &format());
            assert_eq!(pipeline.shader_keys(), key.shader_keys());
        }
    }

    #[test]
    fn duplicate_shader_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.scache");
        let vs = shader(ShaderStage::Vertex, "vs");
        let ps = shader(ShaderStage::Fragment, "ps");
        seed(&path, &[vs_ps_key(&vs, &ps)]);

        let f = fixture(&path);
        f.cache.provide_shader(vs.clone());
        f.cache.provide_shader(ps.clone());
        f.cache.provide_shader(ps);
        f.cache.provide_shader(vs);
        f.cache.wait_idle();

        assert_eq!(f.compiler.len(), 1);
        let stats = f.cache.stats();
        assert_eq!(stats.shaders_registered, 2);
        assert_eq!(stats.duplicate_shaders, 2);
        assert_eq!(stats.prewarms_submitted, 1);
    }

    #[test]
    fn one_shader_completes_several_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fanout.scache");
        let vs = shader(ShaderStage::Vertex, "vs");
        let ps_a = shader(ShaderStage::Fragment, "ps_a");
        let ps_b = shader(ShaderStage::Fragment, "ps_b");
        let unrelated = shader(ShaderStage::Fragment, "never_provided");
        seed(
            &path,
            &[vs_ps_key(&vs, &ps_a), vs_ps_key(&vs, &ps_b), vs_ps_key(&vs, &unrelated)],
        );

        let f = fixture(&path);
        f.cache.provide_shader(ps_a);
        f.cache.provide_shader(ps_b);
        f.cache.provide_shader(vs);
        f.cache.wait_idle();

        assert_eq!(f.compiler.len(), 2);
        assert_eq!(f.manager.pipeline_count(), 2);
    }

    #[test]
    fn corrupted_and_truncated_records_degrade_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("damaged.scache");
        let shaders: Vec<_> = (0..4)
            .map(|i| shader(ShaderStage::Vertex, &format!("vs{i}")))
            .collect();
        let keys: Vec<_> = shaders
            .iter()
            .map(|vs| {
                let mut slots = [ShaderKey::undefined(); 5];
                slots[0] = vs.key();
                PipelineStateKey::new(slots, StateVector::default(), format())
            })
            .collect();
        seed(&path, &keys);

        let mut bytes = std::fs::read(&path).unwrap();
        let record = crate::key::DIGEST_SIZE + PipelineStateKey::SIZE;
        bytes[cache_file::CacheHeader::SIZE + record + record - 1] ^= 0x80;
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, bytes).unwrap();

        let f = fixture(&path);
        let stats = f.cache.stats();
        assert_eq!(stats.entries_loaded, 2);
        assert_eq!(stats.records_skipped, 1);

        for vs in &shaders {
            f.cache.provide_shader(vs.clone());
        }
        f.cache.wait_idle();
        assert_eq!(f.compiler.queued_keys(), vec![keys[0], keys[2]]);
    }

    #[test]
    fn run_after_torn_append_keeps_new_records_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.scache");
        let vs = shader(ShaderStage::Vertex, "vs");
        let ps_a = shader(ShaderStage::Fragment, "ps_a");
        let ps_b = shader(ShaderStage::Fragment, "ps_b");
        seed(&path, &[vs_ps_key(&vs, &ps_a), vs_ps_key(&vs, &ps_b)]);
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0x5a; 10]).unwrap();
        }

        let mut culled = StateVector::default();
        culled.rasterizer.cull_mode = CullMode::NONE;
        let draw = |f: &Fixture| {
            let pipeline = f
                .manager
                .create_graphics_pipeline(ShaderSet::new(Some(vs.clone()), Some(ps_a.clone())));
            let pass = f.passes.render_pass(&format()).unwrap();
            pipeline.get_pipeline_handle(&culled, &pass).unwrap();
            f.cache.wait_idle();
            pipeline.instance_key(&pipeline.instances()[0])
        };

        let new_key = {
            let f = fixture(&path);
            assert_eq!(f.cache.stats().entries_loaded, 2);
            let new_key = draw(&f);
            assert_eq!(f.cache.stats().records_written, 1);
            new_key
        };

        let reloaded = read_cache_file(&path).unwrap();
        assert_eq!(
            reloaded.keys,
            vec![vs_ps_key(&vs, &ps_a), vs_ps_key(&vs, &ps_b), new_key]
        );
        assert_eq!(reloaded.skipped, 0);

        // the key survives, so the next run does not append it again
        let f = fixture(&path);
        assert_eq!(f.cache.stats().entries_loaded, 3);
        draw(&f);
        assert_eq!(f.cache.stats().records_written, 0);
        assert_eq!(f.cache.stats().records_skipped, 0);
    }

    #[test]
    fn in_memory_cache_still_deduplicates() {
        init_logger();
        let backend = MockBackend::new();
        let manager = Arc::new(DefaultPipelineManager::new(backend.clone()));
        let cache = StateCache::new(
            StateCacheConfig::default().without_file(),
            manager.clone(),
            Arc::new(RenderPassCache::new(backend.clone())),
            Arc::new(RecordingCompiler::default()),
        )
        .unwrap();
        manager.attach_state_cache(&cache);
        assert!(cache.file_path().is_none());

        let pipeline = manager.create_graphics_pipeline(ShaderSet::new(Some(shader(ShaderStage::Vertex, "vs")), None));
        let pass = Arc::new(RenderPass::new(
            backend.create_render_pass(&format()).unwrap(),
            format(),
        ));
        pipeline.get_pipeline_handle(&StateVector::default(), &pass).unwrap();
        let instance = pipeline.instances()[0].clone();
        cache.cache_pipeline_instance(pipeline, instance);
        cache.wait_idle();

        let stats = cache.stats();
        assert_eq!(stats.entries_added, 1);
        assert_eq!(stats.records_written, 0);
        assert_eq!(stats.duplicates_dropped, 1);
    }

    #[test]
    fn shutdown_is_idempotent_and_stops_intake() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutdown.scache");
        let f = fixture(&path);

        f.cache.shutdown();
        f.cache.shutdown();
        f.cache.provide_shader(shader(ShaderStage::Vertex, "late"));
        f.cache.wait_idle();
        assert_eq!(f.cache.stats().shaders_registered, 0);
    }

    #[test]
    fn second_run_draw_uses_prewarmed_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("second_run.scache");
        let vs = shader(ShaderStage::Vertex, "vs");
        let ps = shader(ShaderStage::Fragment, "ps");
        let mut state = StateVector::default();
        state.rasterizer.cull_mode = CullMode::FRONT;

        // first run: a live draw gets recorded
        {
            let f = fixture(&path);
            let pipeline = f
                .manager
                .create_graphics_pipeline(ShaderSet::new(Some(vs.clone()), Some(ps.clone())));
            let pass = f.passes.render_pass(&format()).unwrap();
            pipeline.get_pipeline_handle(&state, &pass).unwrap();
            f.cache.wait_idle();
        }

        // second run: shaders arrive, the stored pipeline is compiled before the draw
        init_logger();
        let backend = MockBackend::new();
        let compiler = Arc::new(
            BackgroundCompiler::new(CompilerConfig {
                worker_threads: 1,
                thread_name: "test-compiler".into(),
            })
            .unwrap(),
        );
        let manager = Arc::new(DefaultPipelineManager::new(backend.clone()).with_compiler(compiler.clone()));
        let passes = Arc::new(RenderPassCache::new(backend.clone()));
        let cache = StateCache::new(
            StateCacheConfig::default().with_file_path(&path),
            manager.clone(),
            passes.clone(),
            compiler.clone(),
        )
        .unwrap();
        manager.attach_state_cache(&cache);
        assert_eq!(cache.stats().entries_loaded, 1);

        cache.provide_shader(vs.clone());
        cache.provide_shader(ps.clone());
        cache.wait_idle();
        compiler.wait_idle();
        assert_eq!(backend.compile_count(CompileMode::Optimized), 1);

        let pipeline = manager.create_graphics_pipeline(ShaderSet::new(Some(vs), Some(ps)));
        let pass = passes.render_pass(&format()).unwrap();
        let handle = pipeline.get_pipeline_handle(&state, &pass);

        assert!(handle.is_some());
        assert_eq!(handle, pipeline.instances()[0].fast_pipeline());
        assert_eq!(backend.compile_count(CompileMode::Fast), 0);

        cache.shutdown();
        compiler.shutdown();
    }
}
