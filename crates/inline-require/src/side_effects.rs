//! Centralized side effect classification for bundled modules
//!
//! This module provides a single source of truth for deciding whether a
//! module's top-level evaluation may be deferred to its use sites. The
//! registry is filled once per build from host module metadata and frozen
//! into a [`ClassificationSnapshot`] before any output file is rewritten.

use std::{path::Path, sync::Arc};

use anyhow::{Result, bail};
use indexmap::IndexMap;
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHasher};
use sha2::{Digest, Sha256};

use crate::{grammar, host::ModuleMetadata, types::ModuleIdentifier};

/// Type alias for FxHasher-based IndexMap
type FxIndexMap<K, V> = IndexMap<K, V, std::hash::BuildHasherDefault<FxHasher>>;

/// Default classification for a module without an explicit declaration
///
/// Only local script sources are assumed free of side effects. Anything from
/// a dependency tree, and any non-script resource, is treated conservatively.
pub fn default_side_effect_free(identity: &str) -> bool {
    grammar::is_local_script(identity)
}

/// Compute a module's identity string relative to the build context
///
/// The identity is a `./`-prefixed, forward-slash path relative to `context`.
/// Resources outside the context keep their full path.
pub fn lib_ident(context: &Path, resource: &Path) -> String {
    match resource.strip_prefix(context) {
        Ok(relative) => {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            format!("./{}", parts.join("/"))
        }
        Err(_) => resource.to_string_lossy().replace('\\', "/"),
    }
}

/// Memoized module classification for one engine instance
#[derive(Debug, Clone, Default)]
pub struct SideEffectRegistry {
    /// Map from module key to "free of side effects"
    entries: FxIndexMap<String, bool>,
}

impl SideEffectRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a module and remember the result
    ///
    /// An explicit declaration wins; otherwise the default policy applies to
    /// `identity`. Once a module is classified, later calls return the stored
    /// value no matter what they pass. Modules without an id are skipped and
    /// yield `None`.
    pub fn classify(
        &mut self,
        id: Option<&ModuleIdentifier>,
        explicit: Option<bool>,
        identity: &str,
    ) -> Option<bool> {
        let key = id?.as_key();

        if let Some(&stored) = self.entries.get(key.as_ref()) {
            return Some(stored);
        }

        let is_free = explicit.unwrap_or_else(|| default_side_effect_free(identity));
        trace!("Classified {key} ({identity}) as side effect free: {is_free}");
        self.entries.insert(key.into_owned(), is_free);
        Some(is_free)
    }

    /// Classify every module of a build
    ///
    /// Modules without an id or without a resource path are skipped, as are
    /// modules that are already classified. Returns the number of new entries.
    pub fn collect(&mut self, context: Option<&Path>, modules: &[ModuleMetadata]) -> Result<usize> {
        let Some(context) = context else {
            bail!("build context directory is not set; cannot compute module identities");
        };

        let before = self.entries.len();
        for module in modules {
            let Some(id) = module.id.as_ref() else {
                continue;
            };
            if self.entries.contains_key(id.as_key().as_ref()) {
                continue;
            }
            let Some(resource) = module.resource.as_deref() else {
                continue;
            };

            let identity = lib_ident(context, resource);
            self.classify(Some(id), module.side_effect_free, &identity);
        }

        let added = self.entries.len() - before;
        debug!(
            "Classified {added} new modules ({} total, {} side effect free)",
            self.entries.len(),
            self.entries.values().filter(|free| **free).count()
        );
        Ok(added)
    }

    /// Look up a module key, failing closed for unknown modules
    pub fn is_side_effect_free(&self, key: &str) -> bool {
        self.entries.get(key).copied().unwrap_or(false)
    }

    /// Freeze the current classification
    pub fn snapshot(&self) -> ClassificationSnapshot {
        ClassificationSnapshot::from_entries(
            self.entries
                .iter()
                .map(|(key, free)| (key.clone(), *free))
                .collect(),
        )
    }

    /// Forget every classification
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Number of classified modules
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is classified yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immutable classification shared by every rewrite of one build
#[derive(Debug, Clone)]
pub struct ClassificationSnapshot {
    entries: Arc<FxHashMap<String, bool>>,
    /// SHA-256 over the sorted entries (hex-encoded)
    fingerprint: Arc<str>,
}

impl Default for ClassificationSnapshot {
    fn default() -> Self {
        Self::from_entries(FxHashMap::default())
    }
}

impl ClassificationSnapshot {
    /// Build a snapshot from raw entries, computing its fingerprint
    pub fn from_entries(entries: FxHashMap<String, bool>) -> Self {
        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort();

        let mut hasher = Sha256::new();
        for key in keys {
            hasher.update(key.as_bytes());
            hasher.update(if entries[key] { b"=1\n" } else { b"=0\n" });
        }
        let fingerprint = format!("{:x}", hasher.finalize());

        Self {
            entries: Arc::new(entries),
            fingerprint: fingerprint.into(),
        }
    }

    /// Look up a module key, failing closed for unknown modules
    pub fn is_side_effect_free(&self, key: &str) -> bool {
        self.entries.get(key).copied().unwrap_or(false)
    }

    /// Stable fingerprint of the classification state
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Raw entries, for shipping the snapshot to a worker process
    pub fn entries(&self) -> &FxHashMap<String, bool> {
        &self.entries
    }

    /// Number of classified modules
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn module(id: &str, resource: &str, explicit: Option<bool>) -> ModuleMetadata {
        ModuleMetadata {
            id: Some(ModuleIdentifier::from(id)),
            side_effect_free: explicit,
            resource: Some(PathBuf::from(resource)),
        }
    }

    #[test]
    fn test_explicit_flag_wins() {
        let mut registry = SideEffectRegistry::new();
        let id = ModuleIdentifier::from("./node_modules/pkg/index.js");
        assert_eq!(
            registry.classify(Some(&id), Some(true), "./node_modules/pkg/index.js"),
            Some(true)
        );

        let id = ModuleIdentifier::from("./src/polyfill.js");
        assert_eq!(
            registry.classify(Some(&id), Some(false), "./src/polyfill.js"),
            Some(false)
        );
    }

    #[test]
    fn test_classification_is_memoized() {
        let mut registry = SideEffectRegistry::new();
        let id = ModuleIdentifier::from(7);

        assert_eq!(registry.classify(Some(&id), None, "./src/a.js"), Some(true));
        // Different inputs for the same id must not change the stored value
        assert_eq!(registry.classify(Some(&id), Some(false), "./src/a.css"), Some(true));
        assert!(registry.is_side_effect_free("7"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_id_is_skipped() {
        let mut registry = SideEffectRegistry::new();
        assert_eq!(registry.classify(None, Some(true), "./src/a.js"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_modules_fail_closed() {
        let registry = SideEffectRegistry::new();
        assert!(!registry.is_side_effect_free("./src/never-seen.js"));
        assert!(!registry.snapshot().is_side_effect_free("./src/never-seen.js"));
    }

    #[test]
    fn test_collect_uses_identity_relative_to_context() {
        let mut registry = SideEffectRegistry::new();
        let modules = vec![
            module("a", "/project/src/a.js", None),
            module("b", "/project/node_modules/b/index.js", None),
            module("c", "/project/node_modules/c/index.js", Some(true)),
            module("d", "/project/src/d.scss", None),
            ModuleMetadata {
                id: None,
                side_effect_free: Some(true),
                resource: Some(PathBuf::from("/project/src/e.js")),
            },
            ModuleMetadata {
                id: Some(ModuleIdentifier::from("runtime")),
                side_effect_free: None,
                resource: None,
            },
        ];

        let added = registry
            .collect(Some(Path::new("/project")), &modules)
            .unwrap();
        assert_eq!(added, 4);
        assert!(registry.is_side_effect_free("a"));
        assert!(!registry.is_side_effect_free("b"));
        assert!(registry.is_side_effect_free("c"));
        assert!(!registry.is_side_effect_free("d"));
        assert!(!registry.is_side_effect_free("runtime"));

        // A second pass adds nothing
        assert_eq!(
            registry
                .collect(Some(Path::new("/project")), &modules)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_collect_requires_context() {
        let mut registry = SideEffectRegistry::new();
        let err = registry
            .collect(None, &[module("a", "/project/src/a.js", None)])
            .unwrap_err();
        assert!(err.to_string().contains("context"));
    }

    #[test]
    fn test_lib_ident() {
        assert_eq!(
            lib_ident(Path::new("/project"), Path::new("/project/src/foo.js")),
            "./src/foo.js"
        );
        assert_eq!(
            lib_ident(Path::new("/project"), Path::new("/elsewhere/foo.js")),
            "/elsewhere/foo.js"
        );
    }

    #[test]
    fn test_snapshot_fingerprint_tracks_contents() {
        let mut registry = SideEffectRegistry::new();
        let empty = registry.snapshot();

        registry.classify(Some(&ModuleIdentifier::from("x")), Some(true), "");
        let one = registry.snapshot();
        assert_ne!(empty.fingerprint(), one.fingerprint());
        assert_eq!(one.fingerprint(), registry.snapshot().fingerprint());

        // Insertion order does not matter
        let mut forward = FxHashMap::default();
        forward.insert("a".to_string(), true);
        forward.insert("b".to_string(), false);
        let mut backward = FxHashMap::default();
        backward.insert("b".to_string(), false);
        backward.insert("a".to_string(), true);
        assert_eq!(
            ClassificationSnapshot::from_entries(forward).fingerprint(),
            ClassificationSnapshot::from_entries(backward).fingerprint()
        );
    }
}
