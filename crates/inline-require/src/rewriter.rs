//! Inlining of side-effect-free require bindings
//!
//! For every eligible binding of a unit, in discovery order:
//!
//! 1. the declaration is replaced by an `(inlined) <module>` marker comment,
//! 2. every token-delimited use of the binding is replaced by the
//!    parenthesized require expression,
//! 3. if there is no use at all, the binding is left as it is.
//!
//! Bindings of modules with side effects are never touched. Files are split
//! into units on the module wrapper header and each unit is rewritten on its
//! own, so a binding never leaks into another module's scope.

use std::{cmp::Reverse, ops::Range};

use log::{debug, trace};
use sourcemap::SourceMap;

use crate::{
    alias_resolver::{self, BindingMap},
    grammar,
    side_effects::ClassificationSnapshot,
    source_map,
    transformation_context::TransformationContext,
    types::EditKind,
};

/// Outcome of rewriting one file or unit
#[derive(Debug, Clone)]
pub enum TransformResult {
    /// Output is byte-identical to the input
    Unchanged,
    Changed(TransformedSource),
}

impl TransformResult {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// New code, if anything changed
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Unchanged => None,
            Self::Changed(source) => Some(&source.code),
        }
    }
}

/// Rewritten code with its intermediate source map
#[derive(Debug, Clone)]
pub struct TransformedSource {
    pub code: String,
    /// Map from `code` back to the rewriter's input
    pub map: Option<SourceMap>,
}

/// Rewrite a single unit with already-extracted bindings
pub fn transform(original: &str, bindings: &BindingMap) -> TransformResult {
    let mut ctx = TransformationContext::new(original);
    inline_unit(&mut ctx, bindings, "");
    finish(ctx, None)
}

/// Rewrite a whole output file
///
/// The file is split into units; each unit's bindings are extracted and
/// inlined in a context of its own, and the rewritten units are joined back
/// into the file. When `map_file` is given, an intermediate source map for that
/// file name is produced alongside the new code.
pub fn transform_file(
    source: &str,
    classification: &ClassificationSnapshot,
    map_file: Option<&str>,
) -> TransformResult {
    let mut parts = Vec::new();
    let mut inlined = 0;
    for unit in grammar::unit_ranges(source) {
        let text = &source[unit.clone()];
        let bindings = alias_resolver::extract_bindings(text, classification);
        if !bindings.values().any(|binding| binding.side_effect_free) {
            continue;
        }

        let mut ctx = TransformationContext::new(text);
        inlined += inline_unit(&mut ctx, &bindings, &source[unit.end..]);
        if ctx.is_modified() {
            parts.push((unit.start, ctx));
        }
    }

    if parts.is_empty() {
        return TransformResult::Unchanged;
    }

    let ctx = TransformationContext::join(source, parts);
    debug!(
        "Inlined {inlined} require bindings with {} edits",
        ctx.transformations.len()
    );
    finish(ctx, map_file)
}

fn finish(ctx: TransformationContext<'_>, map_file: Option<&str>) -> TransformResult {
    if !ctx.is_modified() {
        return TransformResult::Unchanged;
    }

    let map = map_file.map(|file| source_map::intermediate_map(&ctx, file));
    TransformResult::Changed(TransformedSource {
        code: ctx.into_text(),
        map,
    })
}

/// Inline the eligible bindings of the unit held by `ctx`
///
/// `following` is the input after the unit. Returns the number of bindings
/// that were inlined.
fn inline_unit(
    ctx: &mut TransformationContext<'_>,
    bindings: &BindingMap,
    following: &str,
) -> usize {
    let mut inlined = 0;

    for binding in bindings.values().filter(|binding| binding.side_effect_free) {
        let text = ctx.text();
        let declaration = grammar::declaration_range(text, &binding.name);
        let uses: Vec<Range<usize>> = grammar::find_use_sites(text, &binding.name)
            .into_iter()
            .filter(|site| {
                declaration.as_ref().is_none_or(|declaration| {
                    site.end <= declaration.start || site.start >= declaration.end
                })
            })
            .collect();
        if uses.is_empty() {
            trace!("Binding {} has no use sites, leaving it", binding.name);
            continue;
        }

        let replacement = format!("({})", binding.require_expression);
        let mut edits: Vec<(Range<usize>, String, EditKind)> = uses
            .into_iter()
            .map(|site| {
                let kind = EditKind::UseSiteInlined {
                    binding: binding.name.clone(),
                };
                (site, replacement.clone(), kind)
            })
            .collect();
        if let Some(declaration) = declaration {
            let module = binding.module_id.as_deref().unwrap_or_default();
            let marker = marker_comment(module, &text[declaration.end..], following);
            let kind = EditKind::DeclarationRemoved {
                binding: binding.name.clone(),
            };
            edits.push((declaration, marker, kind));
        }

        // Back to front, so pending ranges stay valid
        edits.sort_by_key(|(range, ..)| Reverse(range.start));
        for (range, text, kind) in edits {
            ctx.replace(range, &text, kind);
        }

        trace!(
            "Inlined {} with {} edits as {}",
            binding.name,
            ctx.edits_of(&binding.name),
            replacement
        );
        inlined += 1;
    }

    inlined
}

/// Comment replacing a removed declaration
///
/// A line comment would swallow whatever follows on the same line, including
/// the header of the next unit, so a block comment is used unless the
/// declaration ends its line.
fn marker_comment(module: &str, rest_of_unit: &str, following: &str) -> String {
    let continues_line = match rest_of_unit.split_once('\n') {
        Some((rest_of_line, _)) => !rest_of_line.trim().is_empty(),
        None => {
            !rest_of_unit.trim().is_empty()
                || !following.split('\n').next().unwrap_or_default().trim().is_empty()
        }
    };

    if continues_line {
        format!("/* (inlined) {} */", module.replace("*/", "* /"))
    } else {
        format!("// (inlined) {module}")
    }
}
