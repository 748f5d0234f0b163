//! Background compilation thread.
//!
//! Compilation requests are queued and processed by a dedicated worker so
//! the interpreter never blocks on the compiler. The queue keeps at most
//! one pending or in-flight request per function, which also guarantees a
//! function is never compiled twice concurrently.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use basalt_core::{BytecodeProgram, FunctionId, ProfilingData};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use super::code_cache::{CodeCache, EvictedIds};
use super::install_code;
use crate::compiler::BaselineCompiler;
use crate::error::JitError;
use crate::osr::OsrRegistry;

/// Finished results kept until drained; older ones are dropped first.
pub const MAX_RETAINED_RESULTS: usize = 256;

// =============================================================================
// Compilation Request
// =============================================================================

/// A request to compile a function.
#[derive(Debug, Clone)]
pub struct CompilationRequest {
    /// Function to compile.
    pub id: FunctionId,
    /// Its bytecode.
    pub program: Arc<BytecodeProgram>,
    /// Priority (higher = more urgent).
    pub priority: u32,
    /// Profile gathered by the interpreter.
    pub profile: Option<ProfilingData>,
}

impl CompilationRequest {
    /// Create a new compilation request.
    pub fn new(id: FunctionId, program: Arc<BytecodeProgram>) -> Self {
        Self {
            id,
            program,
            priority: 0,
            profile: None,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach profile data.
    pub fn with_profile(mut self, profile: ProfilingData) -> Self {
        self.profile = Some(profile);
        self
    }
}

// =============================================================================
// Compilation Result
// =============================================================================

/// Result of a compilation attempt.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    /// Function that was compiled.
    pub id: FunctionId,
    /// Size of compiled code (0 on failure).
    pub code_size: usize,
    /// Functions evicted from the cache to make room.
    pub evicted: EvictedIds,
    /// Error (if failed).
    pub error: Option<JitError>,
    /// Compilation time in microseconds.
    pub compile_time_us: u64,
}

impl CompilationResult {
    /// Check if compilation succeeded.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// =============================================================================
// Compilation Queue
// =============================================================================

#[derive(Debug, Default)]
struct QueueState {
    /// Pending requests, highest priority first.
    pending: VecDeque<CompilationRequest>,
    /// Functions with a pending or in-flight request.
    busy: FxHashSet<FunctionId>,
    /// Number of requests taken but not completed.
    in_flight: usize,
    shutdown: bool,
}

/// A thread-safe queue for compilation requests.
#[derive(Debug, Default)]
pub struct CompilationQueue {
    state: Mutex<QueueState>,
    /// Signals new work or shutdown.
    work: Condvar,
    /// Signals that the queue drained.
    idle: Condvar,
}

impl CompilationQueue {
    /// Create a new compilation queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a compilation request.
    ///
    /// Returns `false` if the function already has a pending or in-flight
    /// request, or the queue is shut down.
    pub fn submit(&self, request: CompilationRequest) -> bool {
        let mut state = self.state.lock();
        if state.shutdown || !state.busy.insert(request.id) {
            return false;
        }

        // Insert by priority (higher priority at front)
        let insert_idx = state
            .pending
            .iter()
            .position(|r| r.priority < request.priority)
            .unwrap_or(state.pending.len());
        state.pending.insert(insert_idx, request);

        self.work.notify_one();
        true
    }

    /// Wait for and retrieve the next request.
    ///
    /// Returns `None` once the queue is shutting down.
    pub fn wait_for_request(&self) -> Option<CompilationRequest> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(request) = state.pending.pop_front() {
                state.in_flight += 1;
                return Some(request);
            }
            self.work.wait(&mut state);
        }
    }

    /// Try to get a request without blocking.
    pub fn try_get(&self) -> Option<CompilationRequest> {
        let mut state = self.state.lock();
        let request = state.pending.pop_front()?;
        state.in_flight += 1;
        Some(request)
    }

    /// Mark a taken request as finished, allowing resubmission for `id`.
    pub fn complete(&self, id: FunctionId) {
        let mut state = self.state.lock();
        state.busy.remove(&id);
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.pending.is_empty() && state.in_flight == 0 {
            self.idle.notify_all();
        }
    }

    /// Block until every submitted request has completed, or shutdown.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while !state.shutdown && (!state.pending.is_empty() || state.in_flight > 0) {
            self.idle.wait(&mut state);
        }
    }

    /// Check if a function has a pending or in-flight request.
    pub fn is_busy(&self, id: FunctionId) -> bool {
        self.state.lock().busy.contains(&id)
    }

    /// Get the number of pending requests.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Signal shutdown to all waiting threads.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.work.notify_all();
        self.idle.notify_all();
    }

    /// Check if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

// =============================================================================
// Compiler Thread
// =============================================================================

/// A background compilation worker.
///
/// Pulls requests from a queue, compiles them, and installs the results
/// straight into the shared code cache.
#[derive(Debug)]
pub struct CompilerThread {
    /// Shared compilation queue.
    queue: Arc<CompilationQueue>,
    compiler: BaselineCompiler,
    cache: Arc<CodeCache>,
    osr: Arc<OsrRegistry>,
    /// Most recent results, drained by `take_results`.
    results: Mutex<VecDeque<CompilationResult>>,
    /// Statistics.
    stats: Mutex<CompilerStats>,
}

impl CompilerThread {
    /// Create a new compiler worker.
    pub fn new(
        queue: Arc<CompilationQueue>,
        compiler: BaselineCompiler,
        cache: Arc<CodeCache>,
        osr: Arc<OsrRegistry>,
    ) -> Self {
        Self {
            queue,
            compiler,
            cache,
            osr,
            results: Mutex::new(VecDeque::new()),
            stats: Mutex::new(CompilerStats::default()),
        }
    }

    /// Start the compilation loop on a new named thread.
    pub fn spawn(self: Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("basalt-jit-compiler".into())
            .spawn(move || self.run())
    }

    /// Run the compilation loop (blocking).
    ///
    /// Returns once shutdown is signaled.
    pub fn run(&self) {
        while let Some(request) = self.queue.wait_for_request() {
            let id = request.id;
            let result = self.compile(request);
            self.retain(result);
            self.queue.complete(id);
        }
    }

    /// Compile and install a single request (synchronous).
    pub fn compile(&self, request: CompilationRequest) -> CompilationResult {
        let start = Instant::now();
        let outcome = self
            .compiler
            .compile_function(&request.program, request.profile.as_ref());
        let compile_time_us = start.elapsed().as_micros() as u64;

        let mut stats = self.stats.lock();
        stats.total_compile_time_us += compile_time_us;

        match outcome {
            Ok(code) => {
                let code_size = code.size();
                let (_, evicted) = install_code(&self.cache, &self.osr, request.id, code);
                stats.compilations += 1;
                stats.bytes_compiled += code_size as u64;
                debug!(
                    target: "basalt::jit::compiler_thread",
                    function = %request.id,
                    bytes = code_size,
                    time_us = compile_time_us,
                    "background compile installed"
                );
                CompilationResult {
                    id: request.id,
                    code_size,
                    evicted,
                    error: None,
                    compile_time_us,
                }
            }
            Err(err) => {
                stats.failures += 1;
                warn!(
                    target: "basalt::jit::compiler_thread",
                    function = %request.id,
                    error = %err,
                    "background compile failed"
                );
                CompilationResult {
                    id: request.id,
                    code_size: 0,
                    evicted: EvictedIds::new(),
                    error: Some(err),
                    compile_time_us,
                }
            }
        }
    }

    fn retain(&self, result: CompilationResult) {
        let mut results = self.results.lock();
        if results.len() == MAX_RETAINED_RESULTS {
            results.pop_front();
            self.stats.lock().results_dropped += 1;
        }
        results.push_back(result);
    }

    /// Take the retained results, oldest first.
    pub fn take_results(&self) -> Vec<CompilationResult> {
        self.results.lock().drain(..).collect()
    }

    /// Number of results waiting to be taken.
    pub fn pending_results(&self) -> usize {
        self.results.lock().len()
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> CompilerStats {
        *self.stats.lock()
    }

    /// The queue this worker drains.
    pub fn queue(&self) -> &Arc<CompilationQueue> {
        &self.queue
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for the compiler thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompilerStats {
    /// Number of successful compilations.
    pub compilations: u64,
    /// Number of failed compilations.
    pub failures: u64,
    /// Total compilation time in microseconds.
    pub total_compile_time_us: u64,
    /// Total bytes of code produced.
    pub bytes_compiled: u64,
    /// Results discarded because nobody drained them.
    pub results_dropped: u64,
}

impl CompilerStats {
    /// Average compilation time in microseconds.
    pub fn avg_compile_time_us(&self) -> u64 {
        let attempts = self.compilations + self.failures;
        if attempts == 0 {
            0
        } else {
            self.total_compile_time_us / attempts
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
