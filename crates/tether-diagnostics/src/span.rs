//! Source span and label types for locating verifier diagnostics.
//!
//! Spans use byte offsets into a named source unit. Line/column resolution
//! happens only at render time, against a `SourceCache`.

/// A contiguous byte range in a named source unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    /// The source unit this span points into (file path or unit name).
    pub source: String,
    /// Starting byte offset (inclusive).
    pub start: usize,
    /// Ending byte offset (exclusive).
    pub end: usize,
}

impl SourceSpan {
    /// Creates a new source span.
    pub fn new(source: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            source: source.into(),
            start,
            end,
        }
    }

    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Returns true if the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns true if both spans name the same source and share bytes.
    pub fn overlaps(&self, other: &SourceSpan) -> bool {
        self.source == other.source && self.start < other.end && other.start < self.end
    }
}

/// The visual role of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelStyle {
    /// Where the problem is - rendered with `^^^`.
    #[default]
    Primary,
    /// Related context - rendered with `---`.
    Secondary,
}

/// A span plus the message to print under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub span: SourceSpan,
    pub message: String,
    pub style: LabelStyle,
}

impl Label {
    pub fn primary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            style: LabelStyle::Primary,
        }
    }

    pub fn secondary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            style: LabelStyle::Secondary,
        }
    }
}

/// The set of locations one diagnostic talks about.
///
/// Borrow conflicts always involve at least two places (the new borrow and
/// the one it collides with), so every diagnostic carries a multi-span
/// rather than a single location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiSpan {
    primary: Option<SourceSpan>,
    labels: Vec<Label>,
}

impl MultiSpan {
    pub fn new() -> Self {
        Self::default()
    }

    /// A multi-span with just a primary location and no labels.
    pub fn from_span(span: SourceSpan) -> Self {
        Self {
            primary: Some(span),
            labels: Vec::new(),
        }
    }

    /// The primary location, if set.
    pub fn primary_span(&self) -> Option<&SourceSpan> {
        self.primary.as_ref()
    }

    /// Adds a primary label; the first primary also becomes the primary span.
    pub fn push_primary(&mut self, span: SourceSpan, message: impl Into<String>) {
        if self.primary.is_none() {
            self.primary = Some(span.clone());
        }
        self.labels.push(Label::primary(span, message));
    }

    /// Adds a secondary label.
    pub fn push_secondary(&mut self, span: SourceSpan, message: impl Into<String>) {
        self.labels.push(Label::secondary(span, message));
    }

    /// All labels, in insertion order.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Returns true if no location has been attached.
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.labels.is_empty()
    }
}

/// 1-indexed line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

impl LineColumn {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A span resolved against source text, ready to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpan {
    pub span: SourceSpan,
    pub start: LineColumn,
    pub end: LineColumn,
    /// The source lines the span touches.
    pub source_lines: Vec<String>,
}

impl ResolvedSpan {
    pub fn is_multiline(&self) -> bool {
        self.start.line != self.end.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_span_len_and_overlap() {
        let a = SourceSpan::new("main.tet", 10, 20);
        let b = SourceSpan::new("main.tet", 15, 25);
        let c = SourceSpan::new("other.tet", 15, 25);
        assert_eq!(a.len(), 10);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_multi_span_primary_is_first_primary() {
        let mut spans = MultiSpan::new();
        spans.push_secondary(SourceSpan::new("main.tet", 0, 4), "earlier borrow");
        spans.push_primary(SourceSpan::new("main.tet", 8, 12), "conflict here");

        assert_eq!(spans.labels().len(), 2);
        assert_eq!(spans.primary_span().unwrap().start, 8);
    }
}
