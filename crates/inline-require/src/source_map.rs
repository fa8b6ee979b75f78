//! Source map generation and chaining
//!
//! The rewriter produces an intermediate map from its output back to its
//! input. When the host already had a map for the input (input -> original
//! sources), the two are chained so the installed map points straight at the
//! original sources.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use sourcemap::{SourceMap, SourceMapBuilder};

use crate::transformation_context::{Origin, TransformationContext};

/// Byte offset to line/column conversion for one text
///
/// Columns are counted in UTF-16 code units, as source map consumers expect.
#[derive(Debug)]
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(index, _)| index + 1))
            .collect();
        Self { text, line_starts }
    }

    /// Zero-based line and column of a byte offset
    pub fn position(&self, offset: usize) -> (u32, u32) {
        let offset = offset.min(self.text.len());
        let line = self
            .line_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts[line];
        let column = self
            .text
            .get(line_start..offset)
            .map_or(offset - line_start, |prefix| prefix.encode_utf16().count());
        (line as u32, column as u32)
    }
}

/// Running position in generated output
#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    line: u32,
    column: u32,
}

impl Cursor {
    fn advance(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += c.len_utf16() as u32;
            }
        }
    }
}

/// Build the map from the rewritten text back to the rewriter's input
///
/// Every span of copied input gets a mapping at its start and at the start of
/// each line it contains. Inserted text maps to the input position it
/// replaced.
pub fn intermediate_map(ctx: &TransformationContext<'_>, file: &str) -> SourceMap {
    let original = ctx.original();
    let index = LineIndex::new(original);

    let mut builder = SourceMapBuilder::new(Some(file));
    let source = builder.add_source(file);
    builder.set_source_contents(source, Some(original));

    let text = ctx.text();
    let mut offset = 0;
    let mut cursor = Cursor::default();
    for span in ctx.spans() {
        let piece = &text[offset..offset + span.len];
        match span.origin {
            Origin::Original { start } => {
                let mut consumed = 0;
                for segment in piece.split_inclusive('\n') {
                    let (line, column) = index.position(start + consumed);
                    builder.add_raw(
                        cursor.line,
                        cursor.column,
                        line,
                        column,
                        Some(source),
                        None,
                        false,
                    );
                    cursor.advance(segment);
                    consumed += segment.len();
                }
            }
            Origin::Inserted { anchor } => {
                let (line, column) = index.position(anchor);
                builder.add_raw(
                    cursor.line,
                    cursor.column,
                    line,
                    column,
                    Some(source),
                    None,
                    false,
                );
                cursor.advance(piece);
            }
        }
        offset += span.len;
    }

    builder.into_sourcemap()
}

/// Chain `intermediate` (output -> input) onto `upstream` (input -> sources)
///
/// Output positions whose input position has no upstream mapping on the same
/// line are dropped.
pub fn chain(intermediate: &SourceMap, upstream: &SourceMap, file: &str) -> SourceMap {
    let mut builder = SourceMapBuilder::new(Some(file));
    let mut sources: FxHashMap<u32, u32> = FxHashMap::default();
    let mut names: FxHashMap<String, u32> = FxHashMap::default();

    for token in intermediate.tokens() {
        let Some(upstream_token) = upstream.lookup_token(token.get_src_line(), token.get_src_col())
        else {
            continue;
        };
        if upstream_token.get_dst_line() != token.get_src_line() {
            continue;
        }
        let Some(source_name) = upstream_token.get_source() else {
            continue;
        };

        let upstream_id = upstream_token.get_src_id();
        let source = match sources.get(&upstream_id) {
            Some(id) => *id,
            None => {
                let id = builder.add_source(source_name);
                builder.set_source_contents(id, upstream.get_source_contents(upstream_id));
                sources.insert(upstream_id, id);
                id
            }
        };

        let name = upstream_token.get_name().map(|name| match names.get(name) {
            Some(id) => *id,
            None => {
                let id = builder.add_name(name);
                names.insert(name.to_owned(), id);
                id
            }
        });

        builder.add_raw(
            token.get_dst_line(),
            token.get_dst_col(),
            upstream_token.get_src_line(),
            upstream_token.get_src_col(),
            Some(source),
            name,
            false,
        );
    }

    builder.into_sourcemap()
}

/// Parse source map JSON
pub fn parse(json: &str) -> Result<SourceMap> {
    SourceMap::from_slice(json.as_bytes()).context("invalid source map")
}

/// Serialize a source map to JSON
pub fn to_json(map: &SourceMap) -> Result<String> {
    let mut bytes = Vec::new();
    map.to_writer(&mut bytes)
        .context("failed to serialize source map")?;
    String::from_utf8(bytes).context("source map is not valid UTF-8")
}
