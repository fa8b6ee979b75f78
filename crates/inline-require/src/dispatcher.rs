//! Fan-out of the transform over a build's output files
//!
//! Classification is complete before the dispatcher runs; every file of the
//! build is then rewritten against the same immutable snapshot on a bounded
//! thread pool. The rewrite itself is delegated to a [`TransformBackend`],
//! either in-process or through worker processes.
//!
//! Results are collected for all files before anything is installed. A single
//! failure fails the whole step and leaves the asset store untouched.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};

use crate::{
    cache::TransformCache,
    grammar,
    host::{Asset, Compilation},
    rewriter::{self, TransformResult},
    side_effects::ClassificationSnapshot,
    source_map,
};

/// One file handed to a backend
#[derive(Debug, Clone, Copy)]
pub struct TransformRequest<'a> {
    pub file: &'a str,
    pub code: &'a str,
    pub classification: &'a ClassificationSnapshot,
    /// Produce an intermediate source map named after `file`
    pub source_map: bool,
}

/// Something that can run the rewriter on one file
pub trait TransformBackend: fmt::Debug + Send + Sync {
    fn transform(&self, request: &TransformRequest<'_>) -> Result<TransformResult>;

    /// Release any resources held by the backend
    fn shutdown(&self) {}
}

/// Runs the rewriter on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcess;

impl TransformBackend for InProcess {
    fn transform(&self, request: &TransformRequest<'_>) -> Result<TransformResult> {
        let map_file = request.source_map.then_some(request.file);
        Ok(rewriter::transform_file(
            request.code,
            request.classification,
            map_file,
        ))
    }
}

/// Inputs shared by every file of one dispatch
#[derive(Debug, Clone, Copy)]
pub struct DispatchJob<'a> {
    pub classification: &'a ClassificationSnapshot,
    pub cache: Option<&'a TransformCache>,
    /// Whether source maps are produced and chained
    pub source_map: bool,
    /// Set by the host to abandon the build
    pub abort: &'a AtomicBool,
}

/// What one dispatch did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Files replaced in the asset store
    pub transformed: usize,
    /// Script files left as they were
    pub unchanged: usize,
    /// Non-script or missing files
    pub skipped: usize,
    /// The build was abandoned and nothing was installed
    pub aborted: bool,
}

/// Bounded-parallelism executor over a transform backend
#[derive(Debug)]
pub struct Executor {
    pool: ThreadPool,
    backend: Arc<dyn TransformBackend>,
}

impl Executor {
    pub fn new(concurrency: usize, backend: Arc<dyn TransformBackend>) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|index| format!("inline-require-{index}"))
            .build()
            .context("failed to build transform thread pool")?;

        debug!("Created transform pool with {concurrency} threads, backend {backend:?}");
        Ok(Self { pool, backend })
    }

    pub fn concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn backend(&self) -> &Arc<dyn TransformBackend> {
        &self.backend
    }

    /// Transform `files` of `compilation` and install the changed ones
    pub fn dispatch(
        &self,
        compilation: &mut dyn Compilation,
        files: &[String],
        job: DispatchJob<'_>,
    ) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();

        let mut inputs = Vec::with_capacity(files.len());
        for file in files {
            if !grammar::is_script_output(file) {
                trace!("Passing through {file}");
                summary.skipped += 1;
                continue;
            }
            match compilation.asset(file) {
                Some(asset) => inputs.push((file.as_str(), asset)),
                None => {
                    warn!("Output file {file} is not in the asset store, skipping");
                    summary.skipped += 1;
                }
            }
        }

        if inputs.is_empty() {
            return Ok(summary);
        }
        debug!("Transforming {} output files", inputs.len());

        let outcomes = self.pool.install(|| {
            inputs
                .par_iter()
                .map(|(file, asset)| {
                    self.process(file, asset, job)
                        .with_context(|| format!("failed to inline requires in {file}"))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        if job.abort.load(Ordering::Acquire) {
            info!("Build aborted, discarding transformed output");
            summary.aborted = true;
            return Ok(summary);
        }

        for ((file, _), outcome) in inputs.iter().zip(outcomes) {
            match outcome {
                Some(asset) => {
                    compilation
                        .update_asset(file, asset)
                        .with_context(|| format!("failed to install {file}"))?;
                    summary.transformed += 1;
                }
                None => summary.unchanged += 1,
            }
        }

        Ok(summary)
    }

    /// Rewrite one asset, returning its replacement if anything changed
    fn process(&self, file: &str, asset: &Asset, job: DispatchJob<'_>) -> Result<Option<Asset>> {
        if job.abort.load(Ordering::Acquire) {
            return Ok(None);
        }

        // Maps are only produced when there is a host map to chain onto
        let upstream = asset.map.as_deref().filter(|_| job.source_map);
        let request = TransformRequest {
            file,
            code: &asset.code,
            classification: job.classification,
            source_map: upstream.is_some(),
        };

        let result = match job.cache {
            Some(cache) => {
                let key = TransformCache::fingerprint(
                    &asset.code,
                    job.classification.fingerprint(),
                    request.source_map,
                );
                cache.get_or_compute(&key, || self.backend.transform(&request))?
            }
            None => Arc::new(self.backend.transform(&request)?),
        };

        let TransformResult::Changed(changed) = result.as_ref() else {
            trace!("No change in {file}");
            return Ok(None);
        };

        let map = match (&changed.map, upstream) {
            (Some(intermediate), Some(upstream)) => {
                let upstream = source_map::parse(upstream)?;
                let chained = source_map::chain(intermediate, &upstream, file);
                Some(source_map::to_json(&chained)?)
            }
            _ => None,
        };

        Ok(Some(Asset {
            code: changed.code.clone(),
            map,
        }))
    }

    /// Release the backend's resources
    pub fn shutdown(&self) {
        self.backend.shutdown();
    }
}
