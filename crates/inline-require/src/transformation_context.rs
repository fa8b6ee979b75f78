//! Transformation context for tracking text edits and their origins.
//!
//! The rewriter edits a working copy of each unit of an output file. The
//! context keeps, for every byte of the working copy, a record of where it came
//! from in the input, so that an intermediate source map can be generated
//! afterwards. Unit contexts are joined back into one context per file.

use std::ops::Range;

use crate::types::EditKind;

/// Where a span of the working text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Copied verbatim from the input, starting at this input offset
    Original { start: usize },
    /// Inserted by an edit that replaced input starting at `anchor`
    Inserted { anchor: usize },
}

impl Origin {
    /// Input offset a position inside this span maps back to
    fn input_offset(self, delta: usize) -> usize {
        match self {
            Self::Original { start } => start + delta,
            Self::Inserted { anchor } => anchor,
        }
    }

    /// Same origin in an input that starts `base` bytes earlier
    fn shifted(self, base: usize) -> Self {
        match self {
            Self::Original { start } => Self::Original {
                start: start + base,
            },
            Self::Inserted { anchor } => Self::Inserted {
                anchor: anchor + base,
            },
        }
    }
}

/// Contiguous piece of the working text sharing one origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub len: usize,
    pub origin: Origin,
}

/// Record of an edit applied to the working text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformationRecord {
    /// Input offset the edit is attributed to
    pub anchor: usize,
    /// Type of edit applied
    pub kind: EditKind,
}

/// Context for tracking edits during rewriting
#[derive(Debug)]
pub struct TransformationContext<'a> {
    original: &'a str,
    text: String,
    spans: Vec<Span>,
    /// Track which edits were applied
    pub transformations: Vec<TransformationRecord>,
}

impl<'a> TransformationContext<'a> {
    /// Create a new context over an unmodified input
    pub fn new(original: &'a str) -> Self {
        let spans = if original.is_empty() {
            Vec::new()
        } else {
            vec![Span {
                len: original.len(),
                origin: Origin::Original { start: 0 },
            }]
        };

        Self {
            original,
            text: original.to_owned(),
            spans,
            transformations: Vec::new(),
        }
    }

    /// Assemble the context of a whole input from contexts over pieces of it
    ///
    /// Every part comes with the offset its input starts at in `original`.
    /// Parts are in input order and do not overlap; input not covered by any
    /// part is copied unchanged.
    pub fn join(original: &'a str, parts: Vec<(usize, TransformationContext<'_>)>) -> Self {
        let mut joined = Self {
            original,
            text: String::with_capacity(original.len()),
            spans: Vec::new(),
            transformations: Vec::new(),
        };

        let mut cursor = 0;
        for (base, part) in parts {
            debug_assert!(cursor <= base && base + part.original.len() <= original.len());
            joined.copy_original(cursor..base);
            joined.text.push_str(&part.text);
            joined.spans.extend(part.spans.into_iter().map(|span| Span {
                len: span.len,
                origin: span.origin.shifted(base),
            }));
            joined
                .transformations
                .extend(part.transformations.into_iter().map(|record| {
                    TransformationRecord {
                        anchor: record.anchor + base,
                        kind: record.kind,
                    }
                }));
            cursor = base + part.original.len();
        }
        joined.copy_original(cursor..original.len());

        joined
    }

    /// The unmodified input
    pub fn original(&self) -> &'a str {
        self.original
    }

    /// The current working text
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Check if the working text differs from the input
    pub fn is_modified(&self) -> bool {
        self.text != self.original
    }

    /// Spans of the working text, in order
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Replace `range` of the working text with `replacement`
    ///
    /// The inserted text is attributed to the input position the replaced
    /// range started at.
    pub fn replace(&mut self, range: Range<usize>, replacement: &str, kind: EditKind) {
        debug_assert!(range.start <= range.end && range.end <= self.text.len());

        let anchor = self.input_offset_at(range.start);
        let first = self.split_at(range.start);
        let last = self.split_at(range.end);

        let inserted = (!replacement.is_empty()).then_some(Span {
            len: replacement.len(),
            origin: Origin::Inserted { anchor },
        });
        self.spans.splice(first..last, inserted);
        self.text.replace_range(range, replacement);

        self.transformations
            .push(TransformationRecord { anchor, kind });
    }

    /// Number of recorded edits belonging to `binding`
    pub fn edits_of(&self, binding: &str) -> usize {
        self.transformations
            .iter()
            .filter(|record| record.kind.binding() == binding)
            .count()
    }

    /// Consume the context, returning the working text
    pub fn into_text(self) -> String {
        self.text
    }

    /// Append an untouched stretch of the input
    fn copy_original(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        self.text.push_str(&self.original[range.clone()]);
        self.spans.push(Span {
            len: range.len(),
            origin: Origin::Original { start: range.start },
        });
    }

    /// Input offset the working-text position `offset` maps back to
    fn input_offset_at(&self, offset: usize) -> usize {
        let mut position = 0;
        for span in &self.spans {
            if offset < position + span.len {
                return span.origin.input_offset(offset - position);
            }
            position += span.len;
        }
        self.original.len()
    }

    /// Make sure a span boundary exists at `offset` and return the index of
    /// the span starting there
    fn split_at(&mut self, offset: usize) -> usize {
        let mut position = 0;
        for index in 0..self.spans.len() {
            let span = self.spans[index];
            if offset == position {
                return index;
            }
            if offset < position + span.len {
                let head = offset - position;
                let tail_origin = match span.origin {
                    Origin::Original { start } => Origin::Original { start: start + head },
                    inserted @ Origin::Inserted { .. } => inserted,
                };
                self.spans[index].len = head;
                self.spans.insert(
                    index + 1,
                    Span {
                        len: span.len - head,
                        origin: tail_origin,
                    },
                );
                return index + 1;
            }
            position += span.len;
        }
        self.spans.len()
    }
}
