//! Post-compilation transform that inlines side-effect-free `require`
//! bindings at their use sites in bundled JavaScript output.
//!
//! A bundler following the webpack code-generation convention hoists every
//! import of a module into a top-level variable:
//!
//! ```text
//! var foo__WEBPACK_IMPORTED_MODULE_0__ = __webpack_require__("./foo.js");
//! foo__WEBPACK_IMPORTED_MODULE_0__();
//! ```
//!
//! When `./foo.js` is known to have no side effects, the load can be deferred
//! to the point of use:
//!
//! ```text
//! // (inlined) ./foo.js
//! (__webpack_require__("./foo.js"))();
//! ```
//!
//! [`plugin::InlineRequirePlugin`] is the entry point for hosts.

pub mod alias_resolver;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod grammar;
pub mod host;
pub mod plugin;
pub mod rewriter;
pub mod side_effects;
pub mod source_map;
pub mod transformation_context;
pub mod types;
pub mod worker;

pub use config::InlineRequireOptions;
pub use host::{Asset, Compilation, HostCapabilities, MemoryCompilation};
pub use plugin::InlineRequirePlugin;
pub use rewriter::TransformResult;
