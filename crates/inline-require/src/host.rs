//! Interface to the host bundler
//!
//! The host owns the build graph, module ids and the output asset set. This
//! module describes the small surface the transform needs from it.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use indexmap::IndexMap;

use crate::types::ModuleIdentifier;

/// Per-module metadata supplied once module ids are final
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleMetadata {
    /// Id assigned by the host; `None` for modules that never got one
    pub id: Option<ModuleIdentifier>,
    /// Explicit side-effect-free declaration from package metadata
    pub side_effect_free: Option<bool>,
    /// Absolute resource path, absent for synthetic modules
    pub resource: Option<PathBuf>,
}

/// One output file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    pub code: String,
    /// Source map JSON, when the host produced one
    pub map: Option<String>,
}

impl Asset {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }

    #[must_use]
    pub fn with_map(mut self, map: impl Into<String>) -> Self {
        self.map = Some(map.into());
        self
    }
}

/// Build-wide flags read from the host compilation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostFlags {
    /// Whether the host generates source maps for this compilation
    pub source_maps_enabled: bool,
    /// Whether this is a watch/incremental rebuild
    pub watch: bool,
}

/// A single compilation of the host bundler
pub trait Compilation {
    /// Base directory module identities are computed against
    fn context(&self) -> Option<&Path>;

    /// Metadata for every module of the build graph
    fn modules(&self) -> &[ModuleMetadata];

    fn flags(&self) -> HostFlags;

    /// Names of every asset in the output set
    fn asset_names(&self) -> Vec<String>;

    /// Names of the files belonging to chunks
    fn chunk_files(&self) -> Vec<String>;

    fn asset(&self, name: &str) -> Option<Asset>;

    /// Replace an existing asset
    fn update_asset(&mut self, name: &str, asset: Asset) -> Result<()>;
}

/// Asset hook set the host exposes, selected once at setup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostCapabilities {
    /// Newer hosts: one hook over the full asset map, chunk and non-chunk
    #[default]
    ProcessAssets,
    /// Older hosts: per-chunk hook over chunk files only
    OptimizeChunkAssets,
}

impl HostCapabilities {
    /// Output files this hook set hands to the transform
    pub fn output_files(self, compilation: &dyn Compilation) -> Vec<String> {
        match self {
            Self::ProcessAssets => compilation.asset_names(),
            Self::OptimizeChunkAssets => compilation.chunk_files(),
        }
    }
}

/// Compilation held entirely in memory
///
/// Useful for embedding the engine in hosts that hand over their output as a
/// plain file map, and for exercising the engine without a bundler.
#[derive(Debug, Clone, Default)]
pub struct MemoryCompilation {
    pub context: Option<PathBuf>,
    pub modules: Vec<ModuleMetadata>,
    pub flags: HostFlags,
    pub assets: IndexMap<String, Asset>,
    /// Subset of `assets` that belong to chunks
    pub chunk_files: Vec<String>,
    /// Number of `update_asset` calls received
    pub updates: usize,
}

impl MemoryCompilation {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: Some(context.into()),
            ..Self::default()
        }
    }

    /// Register a module of the build graph
    pub fn add_module(
        &mut self,
        id: impl Into<ModuleIdentifier>,
        resource: impl Into<PathBuf>,
        side_effect_free: Option<bool>,
    ) {
        self.modules.push(ModuleMetadata {
            id: Some(id.into()),
            side_effect_free,
            resource: Some(resource.into()),
        });
    }

    /// Add an asset that belongs to a chunk
    pub fn add_chunk_file(&mut self, name: impl Into<String>, asset: Asset) {
        let name = name.into();
        self.chunk_files.push(name.clone());
        self.assets.insert(name, asset);
    }

    /// Add an asset that does not belong to any chunk
    pub fn add_asset(&mut self, name: impl Into<String>, asset: Asset) {
        self.assets.insert(name.into(), asset);
    }
}

impl Compilation for MemoryCompilation {
    fn context(&self) -> Option<&Path> {
        self.context.as_deref()
    }

    fn modules(&self) -> &[ModuleMetadata] {
        &self.modules
    }

    fn flags(&self) -> HostFlags {
        self.flags
    }

    fn asset_names(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    fn chunk_files(&self) -> Vec<String> {
        self.chunk_files.clone()
    }

    fn asset(&self, name: &str) -> Option<Asset> {
        self.assets.get(name).cloned()
    }

    fn update_asset(&mut self, name: &str, asset: Asset) -> Result<()> {
        let slot = self
            .assets
            .get_mut(name)
            .ok_or_else(|| anyhow!("cannot update missing asset {name}"))?;
        *slot = asset;
        self.updates += 1;
        Ok(())
    }
}
