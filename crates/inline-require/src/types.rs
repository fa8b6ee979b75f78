//! Shared type definitions for the inline-require crate
//!
//! This module contains common types that are used across multiple components
//! of the transform, ensuring consistency and avoiding circular dependencies.

use std::{borrow::Cow, fmt};

/// Identifier the host bundler assigned to a module
///
/// Hosts hand out either numeric ids (`12`) or named ids (`"./src/foo.js"`,
/// or content-hash ids such as `"ZieR"`). Ids are stable within one build
/// but may be reassigned between builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleIdentifier {
    /// Named or hashed id, emitted quoted in generated code
    Name(String),
    /// Numeric id
    Index(u64),
}

impl ModuleIdentifier {
    /// Textual form of the id, as it appears inside a quoted literal in
    /// generated code
    ///
    /// Classification lookups are keyed by this form so that numeric id `12`
    /// and the literal `"12"` resolve to the same entry.
    pub fn as_key(&self) -> Cow<'_, str> {
        match self {
            Self::Name(name) => Cow::Borrowed(name.as_str()),
            Self::Index(index) => Cow::Owned(index.to_string()),
        }
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for ModuleIdentifier {
    fn from(value: &str) -> Self {
        Self::Name(value.to_owned())
    }
}

impl From<String> for ModuleIdentifier {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<u64> for ModuleIdentifier {
    fn from(value: u64) -> Self {
        Self::Index(value)
    }
}

/// Kind of edit applied to a unit while inlining
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKind {
    /// A binding declaration was replaced by an `(inlined)` marker comment
    DeclarationRemoved { binding: String },
    /// A use-site of a binding was replaced by its require expression
    UseSiteInlined { binding: String },
}

impl EditKind {
    /// Name of the binding this edit belongs to
    pub fn binding(&self) -> &str {
        match self {
            Self::DeclarationRemoved { binding } | Self::UseSiteInlined { binding } => binding,
        }
    }
}
