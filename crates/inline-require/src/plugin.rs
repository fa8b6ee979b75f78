//! Engine instance tying the transform to a host build session
//!
//! One [`InlineRequirePlugin`] lives as long as the host's build session and
//! owns the classification registry, the result cache and the executor. Each
//! build runs in two ordered phases:
//!
//! 1. [`InlineRequirePlugin::after_optimize_module_ids`] classifies the build's
//!    modules once their ids are final;
//! 2. [`InlineRequirePlugin::process_assets`] freezes the classification and
//!    rewrites the output files.
//!
//! The registry and cache survive watch rebuilds; [`InlineRequirePlugin::reset`]
//! clears them between unrelated sessions.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    cache::TransformCache,
    config::{InlineRequireOptions, ResolvedOptions},
    dispatcher::{DispatchJob, DispatchSummary, Executor, InProcess, TransformBackend},
    host::{Compilation, HostCapabilities},
    side_effects::SideEffectRegistry,
    worker::WorkerPool,
};

/// The inline-require transform as a host plugin
#[derive(Debug)]
pub struct InlineRequirePlugin {
    options: InlineRequireOptions,
    capabilities: HostCapabilities,
    registry: SideEffectRegistry,
    cache: Option<TransformCache>,
    executor: Option<Executor>,
    /// Backend override; chosen from the options when unset
    backend: Option<Arc<dyn TransformBackend>>,
    abort: Arc<AtomicBool>,
}

impl InlineRequirePlugin {
    pub fn new(options: InlineRequireOptions, capabilities: HostCapabilities) -> Self {
        Self {
            options,
            capabilities,
            registry: SideEffectRegistry::new(),
            cache: None,
            executor: None,
            backend: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run transforms on `backend` instead of the configured one
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn TransformBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn options(&self) -> &InlineRequireOptions {
        &self.options
    }

    pub fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    pub fn registry(&self) -> &SideEffectRegistry {
        &self.registry
    }

    /// The result cache, once a build with caching enabled has run
    pub fn cache(&self) -> Option<&TransformCache> {
        self.cache.as_ref()
    }

    /// Flag the host sets to abandon the build in flight
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Phase 1: classify the build's modules
    ///
    /// Returns the number of newly classified modules.
    pub fn after_optimize_module_ids(&mut self, compilation: &dyn Compilation) -> Result<usize> {
        self.abort.store(false, Ordering::Release);
        self.registry
            .collect(compilation.context(), compilation.modules())
    }

    /// Phase 2: rewrite the build's output files and install the results
    pub fn process_assets(&mut self, compilation: &mut dyn Compilation) -> Result<DispatchSummary> {
        let resolved = self
            .options
            .resolve(compilation.flags())
            .context("invalid inline-require options")?;

        let classification = self.registry.snapshot();
        debug!(
            "Frozen classification {} ({} modules)",
            classification.fingerprint(),
            classification.len()
        );

        if resolved.cache && self.cache.is_none() {
            self.cache = Some(TransformCache::new(
                resolved.cache_capacity,
                resolved.cache_ttl,
            ));
        }
        let executor = match self.executor.take() {
            Some(executor) => executor,
            None => build_executor(self.backend.as_ref(), &resolved)?,
        };
        let executor = self.executor.insert(executor);

        let files = self.capabilities.output_files(compilation);
        let job = DispatchJob {
            classification: &classification,
            cache: self.cache.as_ref().filter(|_| resolved.cache),
            source_map: resolved.source_map,
            abort: &self.abort,
        };
        let summary = executor.dispatch(compilation, &files, job)?;

        info!(
            "Inlined requires in {} files ({} unchanged, {} skipped)",
            summary.transformed, summary.unchanged, summary.skipped
        );
        Ok(summary)
    }

    /// Run both phases for one build
    pub fn run(&mut self, compilation: &mut dyn Compilation) -> Result<DispatchSummary> {
        self.after_optimize_module_ids(compilation)?;
        self.process_assets(compilation)
    }

    /// Forget all classification and cached results
    pub fn reset(&mut self) {
        self.registry.reset();
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Tear down the executor and its workers
    pub fn shutdown(&mut self) {
        if let Some(executor) = self.executor.take() {
            executor.shutdown();
        }
    }
}

fn build_executor(
    backend: Option<&Arc<dyn TransformBackend>>,
    resolved: &ResolvedOptions,
) -> Result<Executor> {
    let backend: Arc<dyn TransformBackend> = match (backend, &resolved.worker) {
        (Some(backend), _) => Arc::clone(backend),
        (None, Some(worker)) => Arc::new(WorkerPool::new(worker.clone(), resolved.concurrency)),
        (None, None) => Arc::new(InProcess),
    };
    Executor::new(resolved.concurrency, backend)
}

impl Drop for InlineRequirePlugin {
    fn drop(&mut self) {
        self.shutdown();
    }
}
