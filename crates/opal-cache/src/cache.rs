//! The kernel compilation cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::CompilationContext;
use crate::driver::{CompilerDriver, Task, TaskExecutor};
use crate::error::CacheError;
use crate::kernel::{BatchProgram, CompiledKernel, KernelCode, KernelId, KernelSource};

/// Upper bound on kernels compiled in one driver invocation.
pub const MAX_KERNELS_PER_BATCH: usize = 8;

/// Content-addressed kernel compilation cache.
///
/// Submissions are deduplicated by source hash; pending sources are
/// grouped into batches (one bucket per distinct option string, batches
/// capped at [`MAX_KERNELS_PER_BATCH`]) and handed to the driver, either
/// sequentially or across an injected [`TaskExecutor`]. The driver is
/// assumed non-reentrant, so every invocation runs under `driver_lock`
/// no matter how many tasks are in flight.
pub struct KernelsCache {
    driver: Arc<dyn CompilerDriver>,
    /// Serializes driver invocations across compile tasks.
    driver_lock: Mutex<()>,
    context: Arc<CompilationContext>,
    /// Pending submissions keyed by content hash. Sorted so batching is
    /// deterministic for a given submission set.
    pending: BTreeMap<[u8; 32], KernelCode>,
    kernels: Mutex<HashMap<KernelId, (CompiledKernel, [u8; 32])>>,
    kernel_idx: u64,
    pending_compilation: AtomicBool,
}

impl KernelsCache {
    pub fn new(driver: Arc<dyn CompilerDriver>) -> Self {
        Self {
            driver,
            driver_lock: Mutex::new(()),
            context: Arc::new(CompilationContext::new()),
            pending: BTreeMap::new(),
            kernels: Mutex::new(HashMap::new()),
            kernel_idx: 0,
            pending_compilation: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> Arc<CompilationContext> {
        self.context.clone()
    }

    /// Submits one kernel source. A source whose content hash is already
    /// known (pending or compiled) returns the existing id without
    /// scheduling anything new.
    pub fn set_kernel_source(
        &mut self,
        source: Arc<KernelSource>,
        dump_custom: bool,
    ) -> KernelId {
        let hash = source.content_hash();
        if let Some(code) = self.pending.get(&hash) {
            return code.id.clone();
        }
        if let Some(id) = self.compiled_id_for(&hash) {
            return id;
        }
        let id = KernelId::new(&source.entry_point, self.kernel_idx);
        self.kernel_idx += 1;
        self.pending
            .insert(hash, KernelCode::new(source, id.clone(), dump_custom));
        self.pending_compilation.store(true, Ordering::Release);
        id
    }

    /// Batch form of [`set_kernel_source`](Self::set_kernel_source).
    pub fn add_kernels_source(
        &mut self,
        sources: Vec<Arc<KernelSource>>,
        dump_custom: bool,
    ) -> Vec<KernelId> {
        sources
            .into_iter()
            .map(|s| self.set_kernel_source(s, dump_custom))
            .collect()
    }

    fn compiled_id_for(&self, hash: &[u8; 32]) -> Option<KernelId> {
        let kernels = self.kernels.lock().unwrap();
        kernels
            .iter()
            .find(|(_, (_, h))| h == hash)
            .map(|(id, _)| id.clone())
    }

    /// Partitions pending submissions into batch programs.
    ///
    /// A batch never holds two kernels with the same entry point, since
    /// the driver's results are mapped back by entry point; a colliding
    /// submission overflows into the next batch of its bucket.
    fn batch_pending(&self) -> Vec<BatchProgram> {
        let mut buckets: BTreeMap<&str, Vec<&KernelCode>> = BTreeMap::new();
        for code in self.pending.values() {
            buckets
                .entry(code.source.build_options.as_str())
                .or_default()
                .push(code);
        }
        let mut batches = Vec::new();
        for (bucket_id, (options, codes)) in buckets.into_iter().enumerate() {
            let mut batch_id = 0u32;
            let mut batch = BatchProgram::new(bucket_id as u32, batch_id, options.to_owned());
            for code in codes {
                if batch.kernel_count() == MAX_KERNELS_PER_BATCH
                    || batch.has_entry_point(&code.source.entry_point)
                {
                    batches.push(batch);
                    batch_id += 1;
                    batch = BatchProgram::new(bucket_id as u32, batch_id, options.to_owned());
                }
                batch.push(code);
            }
            if batch.kernel_count() > 0 {
                batches.push(batch);
            }
        }
        batches
    }

    fn build_batch(
        driver: &dyn CompilerDriver,
        driver_lock: &Mutex<()>,
        context: &CompilationContext,
        kernels: &Mutex<HashMap<KernelId, (CompiledKernel, [u8; 32])>>,
        pending: &BTreeMap<[u8; 32], KernelCode>,
        batch: &BatchProgram,
    ) -> Result<(), CacheError> {
        if context.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let built = {
            let _guard = driver_lock.lock().unwrap();
            driver.build(&batch.options, &batch.sources)
        }
        .map_err(|source| CacheError::BatchFailed {
            bucket_id: batch.bucket_id,
            batch_id: batch.batch_id,
            source,
        })?;

        let mut map = kernels.lock().unwrap();
        for kernel in built {
            let Some(id) = batch.entry_point_to_id.get(&kernel.entry_point) else {
                return Err(CacheError::CorruptStore(format!(
                    "driver returned unknown entry point `{}`",
                    kernel.entry_point
                )));
            };
            let hash = pending
                .values()
                .find(|c| c.id == *id)
                .map(|c| c.hash)
                .unwrap_or_default();
            map.insert(id.clone(), (kernel, hash));
        }
        log::debug!(
            "compiled batch {}/{} ({} kernel(s))",
            batch.bucket_id,
            batch.batch_id,
            batch.kernel_count()
        );
        Ok(())
    }

    fn finish_compilation(
        &mut self,
        results: Vec<Result<(), CacheError>>,
    ) -> Result<(), CacheError> {
        // Pending entries are consumed whether their batch succeeded or
        // not; a failed batch's kernels simply never appear in the map.
        self.pending.clear();
        self.pending_compilation.store(false, Ordering::Release);
        results.into_iter().collect()
    }

    /// Compiles all pending batches across the given executor. The first
    /// batch failure is returned after every batch has been attempted;
    /// kernels from successful batches stay available.
    pub fn compile_parallel(&mut self, executor: &dyn TaskExecutor) -> Result<(), CacheError> {
        let batches = self.batch_pending();
        let results: Mutex<Vec<Result<(), CacheError>>> = Mutex::new(Vec::new());
        {
            let tasks: Vec<Task<'_>> = batches
                .iter()
                .map(|batch| {
                    let driver = &*self.driver;
                    let driver_lock = &self.driver_lock;
                    let context = &*self.context;
                    let kernels = &self.kernels;
                    let pending = &self.pending;
                    let results = &results;
                    Box::new(move || {
                        let r = Self::build_batch(
                            driver, driver_lock, context, kernels, pending, batch,
                        );
                        results.lock().unwrap().push(r);
                    }) as Task<'_>
                })
                .collect();
            executor.run_all(tasks);
        }
        self.finish_compilation(results.into_inner().unwrap())
    }

    /// Compiles all pending batches inline, in deterministic order.
    pub fn compile_sequential(&mut self) -> Result<(), CacheError> {
        let batches = self.batch_pending();
        let results: Vec<Result<(), CacheError>> = batches
            .iter()
            .map(|batch| {
                Self::build_batch(
                    &*self.driver,
                    &self.driver_lock,
                    &self.context,
                    &self.kernels,
                    &self.pending,
                    batch,
                )
            })
            .collect();
        self.finish_compilation(results)
    }

    /// The compiled kernel for an id. Fails for unknown ids and for ids
    /// whose compilation has not run or did not succeed.
    pub fn get_kernel(&self, id: &KernelId) -> Result<CompiledKernel, CacheError> {
        self.kernels
            .lock()
            .unwrap()
            .get(id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| CacheError::KernelNotFound(id.to_string()))
    }

    pub fn has_pending(&self) -> bool {
        self.pending_compilation.load(Ordering::Acquire)
    }

    pub fn compiled_count(&self) -> usize {
        self.kernels.lock().unwrap().len()
    }

    /// Drops every submission and compiled kernel.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.kernels.lock().unwrap().clear();
        self.kernel_idx = 0;
        self.pending_compilation.store(false, Ordering::Release);
        self.context.reset();
    }

    pub(crate) fn compiled_entries(&self) -> Vec<(KernelId, CompiledKernel, [u8; 32])> {
        let mut entries: Vec<_> = self
            .kernels
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (k, h))| (id.clone(), k.clone(), *h))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub(crate) fn restore_entry(&mut self, id: KernelId, kernel: CompiledKernel, hash: [u8; 32]) {
        self.kernels.lock().unwrap().insert(id, (kernel, hash));
    }

    pub(crate) fn bump_kernel_idx(&mut self, floor: u64) {
        self.kernel_idx = self.kernel_idx.max(floor);
    }
}
