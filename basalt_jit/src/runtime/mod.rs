//! JIT Runtime Integration Module
//!
//! The layer the interpreter talks to: it owns the code cache, the OSR
//! registry and (optionally) a background compiler thread.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           JitRuntime                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌────────────────┐  ┌──────────────┐            │
//! │  │  CodeCache   │  │ CompilerThread │  │ OsrRegistry  │            │
//! │  │              │  │                │  │              │            │
//! │  │ LRU store of │  │ Background     │  │ Per-function │            │
//! │  │ compiled     │  │ compilation    │  │ OSR entries  │            │
//! │  │ functions    │  │ of hot code    │  │              │            │
//! │  └──────────────┘  └────────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let runtime = JitRuntime::new(RuntimeConfig::default());
//!
//! // On every interpreted call
//! if let Some(code) = runtime.on_call(id, &program, calls)? {
//!     // hand `code.code()` to the executable-memory mapper
//! }
//!
//! // At a hot loop back-edge
//! if let Some(transfer) = runtime.on_back_edge(id, bc_offset, &state)? {
//!     // materialize `transfer.slots` and jump to `transfer.resume_offset`
//! }
//! ```

pub mod code_cache;
pub mod compiler_thread;

pub use code_cache::{CodeCache, CodeCacheStats, EvictedIds};
pub use compiler_thread::{
    CompilationQueue, CompilationRequest, CompilationResult, CompilerStats, CompilerThread,
    MAX_RETAINED_RESULTS,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use basalt_core::{BytecodeProgram, FunctionId, InterpreterState};
use tracing::{debug, warn};

use crate::codegen::{CompiledCode, DEFAULT_FRAME_SIZE};
use crate::compiler::{BaselineCompiler, CompilerConfig, DEFAULT_MAX_CODE_SIZE, TIER_UP_THRESHOLD};
use crate::error::{JitResult, OsrError};
use crate::osr::{OsrRegistry, OsrTransfer};

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Configuration for the JIT runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Call count at which a function is compiled.
    pub tier_up_threshold: u64,
    /// Maximum size of the code cache in bytes.
    pub max_code_size: usize,
    /// Largest code a single compile may produce.
    pub max_function_size: usize,
    /// Stack frame size of generated code.
    pub frame_size: u32,
    /// Enable OSR for hot loops.
    pub enable_osr: bool,
    /// Compile on a background thread instead of the calling thread.
    pub background_compilation: bool,
    /// Refuse programs with opcodes that have no lowering.
    pub strict_coverage: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tier_up_threshold: TIER_UP_THRESHOLD,
            max_code_size: DEFAULT_MAX_CODE_SIZE,
            max_function_size: DEFAULT_MAX_CODE_SIZE,
            frame_size: DEFAULT_FRAME_SIZE,
            enable_osr: true,
            background_compilation: false,
            strict_coverage: false,
        }
    }
}

impl RuntimeConfig {
    /// Create a config for testing (low threshold, small cache, synchronous).
    pub fn for_testing() -> Self {
        Self {
            tier_up_threshold: 10,
            max_code_size: 1024,
            ..Self::default()
        }
    }

    /// Compiler settings derived from this configuration.
    pub fn compiler_config(&self) -> CompilerConfig {
        CompilerConfig::default()
            .with_threshold(self.tier_up_threshold)
            .with_frame_size(self.frame_size)
            .with_strict_coverage(self.strict_coverage)
            .with_max_code_size(self.max_function_size)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Runtime statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitStats {
    /// `on_call` found compiled code.
    pub cache_hits: u64,
    /// `on_call` found no compiled code.
    pub cache_misses: u64,
    /// Successful synchronous compilations.
    pub compilations: u64,
    /// Requests handed to the background compiler.
    pub queued: u64,
    /// Failed synchronous compilations.
    pub failures: u64,
    /// OSR entries created.
    pub osr_entries: u64,
}

impl JitStats {
    /// Cache hit rate of `on_call`.
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct AtomicJitStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    compilations: AtomicU64,
    queued: AtomicU64,
    failures: AtomicU64,
    osr_entries: AtomicU64,
}

impl AtomicJitStats {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> JitStats {
        JitStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            compilations: self.compilations.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            osr_entries: self.osr_entries.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Code Installation
// =============================================================================

/// Insert compiled code and invalidate OSR state of replaced or evicted
/// functions.
pub(crate) fn install_code(
    cache: &CodeCache,
    osr: &OsrRegistry,
    id: FunctionId,
    code: CompiledCode,
) -> (Arc<CompiledCode>, EvictedIds) {
    let code = Arc::new(code);
    let evicted = cache.insert(id, Arc::clone(&code));
    osr.invalidate(id);
    for victim in &evicted {
        osr.invalidate(*victim);
    }
    (code, evicted)
}

// =============================================================================
// JIT Runtime
// =============================================================================

struct BackgroundWorker {
    thread: Arc<CompilerThread>,
    handle: Option<JoinHandle<()>>,
}

/// Glue between the interpreter and the baseline JIT.
pub struct JitRuntime {
    config: RuntimeConfig,
    compiler: BaselineCompiler,
    cache: Arc<CodeCache>,
    osr: Arc<OsrRegistry>,
    queue: Arc<CompilationQueue>,
    worker: Option<BackgroundWorker>,
    stats: AtomicJitStats,
}

impl JitRuntime {
    /// Create a runtime.
    ///
    /// If background compilation is requested but the worker thread cannot
    /// be spawned, the runtime compiles synchronously instead.
    pub fn new(config: RuntimeConfig) -> Self {
        let compiler = BaselineCompiler::with_config(config.compiler_config());
        let cache = Arc::new(CodeCache::new(config.max_code_size));
        let osr = Arc::new(OsrRegistry::new());
        let queue = Arc::new(CompilationQueue::new());

        let worker = if config.background_compilation {
            let thread = Arc::new(CompilerThread::new(
                Arc::clone(&queue),
                compiler.clone(),
                Arc::clone(&cache),
                Arc::clone(&osr),
            ));
            match Arc::clone(&thread).spawn() {
                Ok(handle) => Some(BackgroundWorker {
                    thread,
                    handle: Some(handle),
                }),
                Err(err) => {
                    warn!(
                        target: "basalt::jit::runtime",
                        error = %err,
                        "failed to spawn compiler thread, compiling synchronously"
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            config,
            compiler,
            cache,
            osr,
            queue,
            worker,
            stats: AtomicJitStats::default(),
        }
    }

    /// Get the configuration.
    #[inline]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The compiler used for synchronous compiles.
    #[inline]
    pub fn compiler(&self) -> &BaselineCompiler {
        &self.compiler
    }

    /// The shared code cache.
    #[inline]
    pub fn cache(&self) -> &Arc<CodeCache> {
        &self.cache
    }

    /// The OSR registry.
    #[inline]
    pub fn osr_registry(&self) -> &Arc<OsrRegistry> {
        &self.osr
    }

    /// Check if a background compiler thread is running.
    #[inline]
    pub fn is_background(&self) -> bool {
        self.worker.is_some()
    }

    /// Statistics of the background compiler, if running.
    pub fn compiler_stats(&self) -> Option<CompilerStats> {
        self.worker.as_ref().map(|w| w.thread.stats())
    }

    /// Drain the results of finished background compiles, oldest first.
    ///
    /// At most `MAX_RETAINED_RESULTS` are kept between calls. Always empty
    /// when compiling synchronously.
    pub fn take_compilation_results(&self) -> Vec<CompilationResult> {
        self.worker
            .as_ref()
            .map_or_else(Vec::new, |w| w.thread.take_results())
    }

    /// Record an interpreted call.
    ///
    /// Returns the compiled code for `id` when it is (or just became)
    /// available. With background compilation a newly hot function is
    /// queued and `None` is returned until the worker installs it.
    pub fn on_call(
        &self,
        id: FunctionId,
        program: &Arc<BytecodeProgram>,
        call_count: u64,
    ) -> JitResult<Option<Arc<CompiledCode>>> {
        if let Some(code) = self.cache.lookup(id) {
            AtomicJitStats::bump(&self.stats.cache_hits);
            return Ok(Some(code));
        }
        AtomicJitStats::bump(&self.stats.cache_misses);

        if !self.compiler.should_compile(id, call_count) {
            return Ok(None);
        }

        debug!(
            target: "basalt::jit::runtime",
            function = %id,
            calls = call_count,
            background = self.worker.is_some(),
            "tier-up"
        );

        if self.worker.is_some() {
            if self.queue.submit(CompilationRequest::new(id, Arc::clone(program))) {
                AtomicJitStats::bump(&self.stats.queued);
            }
            return Ok(None);
        }

        let code = match self.compiler.compile_function(program, None) {
            Ok(code) => code,
            Err(err) => {
                AtomicJitStats::bump(&self.stats.failures);
                return Err(err);
            }
        };
        AtomicJitStats::bump(&self.stats.compilations);

        let (code, _) = install_code(&self.cache, &self.osr, id, code);
        Ok(Some(code))
    }

    /// Record a hot loop back-edge.
    ///
    /// If `id` has compiled code and OSR is enabled, captures `state` and
    /// returns the transfer plan into compiled code. Returns `None` when the
    /// code is evicted or replaced while the entry is being created.
    pub fn on_back_edge(
        &self,
        id: FunctionId,
        bc_offset: u32,
        state: &InterpreterState,
    ) -> JitResult<Option<OsrTransfer>> {
        if !self.config.enable_osr {
            return Ok(None);
        }
        // Back-edges do not count as cache traffic.
        let Some(code) = self.cache.peek(id) else {
            return Ok(None);
        };
        let Some(manager) = self
            .osr
            .manager_for(id, &code, || self.cache.is_installed(id, &code))
        else {
            return Ok(None);
        };

        let entry = match manager.create_osr_entry(bc_offset, state) {
            Ok(entry) => entry,
            Err(OsrError::Retired { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        AtomicJitStats::bump(&self.stats.osr_entries);

        match manager.perform_osr(&entry) {
            Ok(transfer) => Ok(Some(transfer)),
            Err(OsrError::StaleEntry { .. }) => {
                debug!(
                    target: "basalt::jit::runtime",
                    function = %id,
                    bc_offset,
                    "code replaced during OSR, staying in the interpreter"
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drop compiled code and OSR entries for `id`.
    pub fn invalidate(&self, id: FunctionId) -> bool {
        let removed = self.cache.remove(id).is_some();
        self.osr.invalidate(id);
        removed
    }

    /// Block until queued background compilations have been installed.
    pub fn wait_for_background(&self) {
        if self.worker.is_some() {
            self.queue.wait_idle();
        }
    }

    /// Get a statistics snapshot.
    pub fn stats(&self) -> JitStats {
        self.stats.snapshot()
    }

    /// Stop the background compiler, if any.
    pub fn shutdown(&mut self) {
        self.queue.shutdown();
        if let Some(worker) = self.worker.as_mut() {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!(target: "basalt::jit::runtime", "compiler thread panicked");
                }
            }
        }
    }
}

impl Drop for JitRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for JitRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitRuntime")
            .field("config", &self.config)
            .field("cached", &self.cache.count())
            .field("cache_bytes", &self.cache.size())
            .field("background", &self.worker.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
