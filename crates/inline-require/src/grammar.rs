//! Micro-grammar of the generated module-loading code
//!
//! The transform never parses JavaScript. It recognises a handful of shapes the
//! bundler's code generator emits verbatim:
//!
//! ```text
//! unit        := UNIT_BOUNDARY? body
//! declaration := "var " binding " = " annotation? require ";"
//! binding     := \w+ "_WEBPACK_" [A-Z]+ "_MODULE_" \w+
//! annotation  := [/*#\w]*              (e.g. /*#__PURE__*/)
//! require     := "__webpack_require__" [^;,]+
//! module-id   := first quoted literal inside `require`
//! ```
//!
//! Anything that does not match these productions is left alone.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

/// Header the bundler emits in front of every module wrapper
///
/// Output files are split on this marker and every piece is rewritten
/// independently.
pub const UNIT_BOUNDARY: &str = "(function(module, __webpack_exports__, __webpack_require__) {";

/// Path segment marking a third-party dependency tree
pub const DEPENDENCY_ROOT_MARKER: &str = "node_modules";

/// Top-level generated binding declaration
///
/// Group 1 is the binding name, group 2 an optional annotation comment and
/// group 3 the require expression.
pub static BINDING_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"var (\w+_WEBPACK_[A-Z]+_MODULE_\w+) = ([/*#\w]*)(__webpack_require__[^;,]+);")
        .expect("binding declaration pattern is valid")
});

/// Any generated binding name
pub static GENERATED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\w+_WEBPACK_[A-Z]+_MODULE_\w+").expect("generated name pattern is valid")
});

/// First quoted literal of a require expression
static MODULE_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"["']([^"']+)["']"#).expect("module literal pattern is valid")
});

/// Source files classified by the default policy as local scripts
static SCRIPT_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[jt]sx?$").expect("script extension pattern is valid"));

/// Output files the transform is applied to
static SCRIPT_OUTPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.[cm]?js$").expect("script output pattern is valid"));

/// Extract the module identifier from a require expression
pub fn module_identifier(require_expression: &str) -> Option<&str> {
    MODULE_LITERAL
        .captures(require_expression)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether a module identity path names a local source script
pub fn is_local_script(identity: &str) -> bool {
    !identity.contains(DEPENDENCY_ROOT_MARKER) && SCRIPT_EXTENSION.is_match(identity)
}

/// Whether an output file is a script the transform should look at
pub fn is_script_output(file: &str) -> bool {
    SCRIPT_OUTPUT.is_match(file)
}

/// Byte range of the first declaration statement of `binding` in `text`
pub fn declaration_range(text: &str, binding: &str) -> Option<Range<usize>> {
    BINDING_DECLARATION
        .captures_iter(text)
        .find(|caps| caps.get(1).is_some_and(|name| name.as_str() == binding))
        .and_then(|caps| caps.get(0))
        .map(|declaration| declaration.range())
}

/// Characters that continue a JavaScript identifier
pub fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Find every token-delimited occurrence of `name` in `text`
///
/// An occurrence preceded or followed by an identifier character belongs to a
/// longer identifier and is skipped.
pub fn find_use_sites(text: &str, name: &str) -> Vec<Range<usize>> {
    if name.is_empty() {
        return Vec::new();
    }

    text.match_indices(name)
        .filter(|(start, _)| {
            let end = start + name.len();
            let before = text[..*start].chars().next_back();
            let after = text[end..].chars().next();
            !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
        })
        .map(|(start, _)| start..start + name.len())
        .collect()
}

/// Split text into unit ranges on [`UNIT_BOUNDARY`]
///
/// The boundary markers themselves are not part of any unit. There is always
/// at least one unit, possibly empty.
pub fn unit_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for (index, marker) in text.match_indices(UNIT_BOUNDARY) {
        ranges.push(start..index);
        start = index + marker.len();
    }
    ranges.push(start..text.len());
    ranges
}
