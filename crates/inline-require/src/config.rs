//! Configuration handling for the inline-require transform
//!
//! Options are read from an `inline-require.toml` file (or built in code) and
//! resolved against the host compilation's flags before each build.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::host::HostFlags;

/// File name options are conventionally loaded from
pub const CONFIG_FILE_NAME: &str = "inline-require.toml";

/// User-facing options; unset values follow the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineRequireOptions {
    /// Produce and chain source maps (default: host's source map setting)
    #[serde(default)]
    pub source_map: Option<bool>,

    /// Memoize transform results (default: host watch mode)
    #[serde(default)]
    pub cache: Option<bool>,

    /// Parallel file transforms (default: cores minus one, at least one)
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Maximum number of cached results
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// Expire cached results after this many seconds
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Run transforms in worker processes instead of in-process threads
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
}

/// Worker process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Worker executable
    pub program: PathBuf,

    /// Extra arguments passed to every worker
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_cache_capacity() -> u64 {
    1024
}

impl Default for InlineRequireOptions {
    fn default() -> Self {
        Self {
            source_map: None,
            cache: None,
            concurrency: None,
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: None,
            worker: None,
        }
    }
}

/// Options with every host-dependent default filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub source_map: bool,
    pub cache: bool,
    pub concurrency: usize,
    pub cache_capacity: u64,
    pub cache_ttl: Option<Duration>,
    pub worker: Option<WorkerConfig>,
}

/// Default parallelism: leave one core to the host
pub fn default_concurrency() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

impl InlineRequireOptions {
    /// Parse options from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid inline-require options")
    }

    /// Load options from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Load `inline-require.toml` from `dir` if present, defaults otherwise
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Fill in host-dependent defaults and validate
    pub fn resolve(&self, flags: HostFlags) -> Result<ResolvedOptions> {
        let concurrency = match self.concurrency {
            Some(0) => bail!("concurrency must be at least 1"),
            Some(n) => n,
            None => default_concurrency(),
        };
        if self.cache_capacity == 0 {
            bail!("cache_capacity must be at least 1");
        }
        if let Some(worker) = &self.worker
            && worker.program.as_os_str().is_empty()
        {
            bail!("worker program must not be empty");
        }

        Ok(ResolvedOptions {
            source_map: self.source_map.unwrap_or(flags.source_maps_enabled),
            cache: self.cache.unwrap_or(flags.watch),
            concurrency,
            cache_capacity: self.cache_capacity,
            cache_ttl: self.cache_ttl_secs.map(Duration::from_secs),
            worker: self.worker.clone(),
        })
    }
}
