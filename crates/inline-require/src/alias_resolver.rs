//! Extraction of generated require bindings from one unit
//!
//! Bindings are collected in order of appearance. A binding whose require
//! expression mentions an earlier binding gets that name replaced by the
//! earlier binding's resolved expression, so that
//!
//! ```text
//! var a__WEBPACK_IMPORTED_MODULE_0__ = __webpack_require__("./a.js");
//! var a_default__WEBPACK_MODULE_DEFAULT_1__ = __webpack_require__.n(a__WEBPACK_IMPORTED_MODULE_0__);
//! ```
//!
//! resolves the second binding to `__webpack_require__.n(__webpack_require__("./a.js"))`.
//!
//! Only the first generated name of an expression is substituted, mirroring the
//! code generator, which emits at most one alias hop per binding. Because the
//! substituted text is already resolved, chains declared in order expand fully.
//! A second reference in the same expression, or a reference to a binding
//! declared later, stays unexpanded.

use indexmap::IndexMap;
use log::trace;
use rustc_hash::FxHasher;

use crate::{grammar, side_effects::ClassificationSnapshot};

/// Type alias for FxHasher-based IndexMap
pub type FxIndexMap<K, V> = IndexMap<K, V, std::hash::BuildHasherDefault<FxHasher>>;

/// Ordered map of binding name to binding, in order of first appearance
pub type BindingMap = FxIndexMap<String, RequireBinding>;

/// One generated `var <binding> = __webpack_require__(...)` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireBinding {
    pub name: String,
    /// Require expression exactly as declared
    pub raw_expression: String,
    /// Require expression after alias substitution
    pub require_expression: String,
    /// Module identifier from the first quoted literal, if any
    pub module_id: Option<String>,
    pub side_effect_free: bool,
}

/// Collect the require bindings of a unit
///
/// Never fails: text that does not follow the generated shape simply
/// produces no bindings.
pub fn extract_bindings(text: &str, classification: &ClassificationSnapshot) -> BindingMap {
    let mut bindings = BindingMap::default();

    for caps in grammar::BINDING_DECLARATION.captures_iter(text) {
        let (Some(name), Some(expression)) = (caps.get(1), caps.get(3)) else {
            continue;
        };

        let raw_expression = expression.as_str();
        let require_expression = substitute_alias(raw_expression, &bindings);
        let module_id = grammar::module_identifier(&require_expression).map(str::to_owned);
        let side_effect_free = module_id
            .as_deref()
            .is_some_and(|id| classification.is_side_effect_free(id));

        trace!(
            "Found binding {} -> {} (side effect free: {side_effect_free})",
            name.as_str(),
            require_expression
        );

        bindings.insert(
            name.as_str().to_owned(),
            RequireBinding {
                name: name.as_str().to_owned(),
                raw_expression: raw_expression.to_owned(),
                require_expression,
                module_id,
                side_effect_free,
            },
        );
    }

    bindings
}

/// Replace the first generated name in `expression` with the resolved
/// expression of an earlier binding of that name
fn substitute_alias(expression: &str, earlier: &BindingMap) -> String {
    let Some(found) = grammar::GENERATED_NAME.find(expression) else {
        return expression.to_owned();
    };
    let Some(target) = earlier.get(found.as_str()) else {
        return expression.to_owned();
    };

    let mut resolved = String::with_capacity(
        expression.len() - found.len() + target.require_expression.len(),
    );
    resolved.push_str(&expression[..found.start()]);
    resolved.push_str(&target.require_expression);
    resolved.push_str(&expression[found.end()..]);
    resolved
}
