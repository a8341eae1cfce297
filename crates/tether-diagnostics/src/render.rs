//! Terminal rendering for verifier diagnostics.
//!
//! The renderer writes to any `termcolor::WriteColor` sink, so the same code
//! path serves colored stderr output and plain buffers in tests.

use crate::span::{Label, LabelStyle, LineColumn, ResolvedSpan, SourceSpan};
use crate::suggestion::Suggestion;
use crate::{Diagnostic, DiagnosticSeverity};
use std::collections::HashMap;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use unicode_width::UnicodeWidthStr;

/// Configuration for the diagnostic renderer.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Whether to use colors.
    pub use_color: bool,
    /// Whether to de-emphasize cascade errors with a note.
    pub mark_cascades: bool,
    /// Whether to show documentation links.
    pub show_docs_links: bool,
    /// Base URL for documentation links.
    pub docs_base_url: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            use_color: true,
            mark_cascades: true,
            show_docs_links: false,
            docs_base_url: "https://tether-lang.org/errors".to_string(),
        }
    }
}

/// A cache of source unit contents, used to show code in messages.
#[derive(Debug, Default)]
pub struct SourceCache {
    sources: HashMap<String, String>,
}

impl SourceCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a source unit to the cache.
    pub fn add_source(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.sources.insert(name.into(), text.into());
    }

    /// Gets a source unit's text, if cached.
    pub fn get_source(&self, name: &str) -> Option<&str> {
        self.sources.get(name).map(String::as_str)
    }

    /// Resolves a span to line/column positions and source lines.
    pub fn resolve_span(&self, span: &SourceSpan) -> Option<ResolvedSpan> {
        let source = self.get_source(&span.source)?;

        let (start_line, start_col) = offset_to_line_col(source, span.start);
        let (end_line, end_col) = offset_to_line_col(source, span.end);

        let source_lines: Vec<String> = source
            .lines()
            .skip(start_line.saturating_sub(1))
            .take(end_line - start_line + 1)
            .map(String::from)
            .collect();

        Some(ResolvedSpan {
            span: span.clone(),
            start: LineColumn::new(start_line, start_col),
            end: LineColumn::new(end_line, end_col),
            source_lines,
        })
    }
}

/// Converts a byte offset to 1-indexed line and column numbers.
fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let mut line = 1;
    let mut col = 1;
    let mut current = 0;

    for ch in source.chars() {
        if current >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
        current += ch.len_utf8();
    }

    (line, col)
}

/// Renders diagnostics to a `WriteColor` sink.
pub struct Renderer<W> {
    config: RenderConfig,
    sink: W,
}

impl Renderer<StandardStream> {
    /// A renderer writing to stderr, honoring the config's color choice.
    pub fn stderr(config: RenderConfig) -> Self {
        let choice = if config.use_color {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        Self {
            config,
            sink: StandardStream::stderr(choice),
        }
    }
}

impl<W: WriteColor> Renderer<W> {
    /// Creates a renderer over an arbitrary sink.
    pub fn new(config: RenderConfig, sink: W) -> Self {
        Self { config, sink }
    }

    /// Consumes the renderer, returning the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Renders one diagnostic with its source context and children.
    pub fn render(&mut self, diagnostic: &Diagnostic, sources: &SourceCache) -> io::Result<()> {
        self.write_header(diagnostic)?;

        if let Some(primary) = diagnostic.spans.primary_span() {
            if let Some(resolved) = sources.resolve_span(primary) {
                self.write_location(&resolved)?;
                let gutter = resolved.end.line.to_string().len().max(2);
                writeln!(self.sink, "{:>gutter$} |", "")?;

                for (i, line) in resolved.source_lines.iter().enumerate() {
                    self.write_source_line(resolved.start.line + i, line, gutter)?;
                }
                for label in diagnostic.spans.labels() {
                    if let Some(label_resolved) = sources.resolve_span(&label.span) {
                        if !label_resolved.is_multiline() {
                            self.write_underline(label, &label_resolved, diagnostic.severity, gutter)?;
                        }
                    }
                }
            }
        }

        for child in &diagnostic.children {
            self.write_child(child)?;
        }
        for suggestion in &diagnostic.suggestions {
            self.write_suggestion(suggestion)?;
        }
        if self.config.mark_cascades && !diagnostic.is_root_cause {
            self.write_child(&Diagnostic::note(
                "this error may be a consequence of the previous one",
            ))?;
        }
        if self.config.show_docs_links {
            if let Some(code) = &diagnostic.code {
                let url = format!("{}/{}", self.config.docs_base_url, code);
                self.write_child(&Diagnostic::note(format!("for more information, see {url}")))?;
            }
        }

        writeln!(self.sink)?;
        Ok(())
    }

    /// Renders all diagnostics followed by a summary line.
    pub fn render_all(
        &mut self,
        diagnostics: &[Diagnostic],
        sources: &SourceCache,
    ) -> io::Result<()> {
        for diagnostic in diagnostics {
            self.render(diagnostic, sources)?;
        }
        self.write_summary(diagnostics)
    }

    fn severity_color(severity: DiagnosticSeverity) -> Color {
        match severity {
            DiagnosticSeverity::Error => Color::Red,
            DiagnosticSeverity::Note => Color::Cyan,
            DiagnosticSeverity::Help => Color::Green,
        }
    }

    fn write_colored(&mut self, text: &str, color: Color, bold: bool) -> io::Result<()> {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(color));
        spec.set_bold(bold);
        self.sink.set_color(&spec)?;
        write!(self.sink, "{text}")?;
        self.sink.reset()
    }

    /// `error[R0002]: cannot borrow ...`
    fn write_header(&mut self, diagnostic: &Diagnostic) -> io::Result<()> {
        let color = Self::severity_color(diagnostic.severity);
        self.write_colored(diagnostic.severity.prefix(), color, true)?;
        if let Some(code) = &diagnostic.code {
            self.write_colored(&format!("[{code}]"), color, true)?;
        }
        write!(self.sink, ": ")?;
        self.write_colored(&diagnostic.message, color, true)?;
        writeln!(self.sink)
    }

    /// ` --> main.tet:10:5`
    fn write_location(&mut self, resolved: &ResolvedSpan) -> io::Result<()> {
        writeln!(
            self.sink,
            " --> {}:{}:{}",
            resolved.span.source, resolved.start.line, resolved.start.column
        )
    }

    fn write_source_line(&mut self, line_num: usize, line: &str, gutter: usize) -> io::Result<()> {
        self.write_colored(&format!("{line_num:>gutter$}"), Color::Blue, false)?;
        writeln!(self.sink, " | {line}")
    }

    fn write_underline(
        &mut self,
        label: &Label,
        resolved: &ResolvedSpan,
        severity: DiagnosticSeverity,
        gutter: usize,
    ) -> io::Result<()> {
        let (marker, color) = match label.style {
            LabelStyle::Primary => ('^', Self::severity_color(severity)),
            LabelStyle::Secondary => ('-', Self::severity_color(DiagnosticSeverity::Note)),
        };

        write!(self.sink, "{:>gutter$} | ", "")?;

        // Column offsets count display width so wide characters line up.
        let line = resolved.source_lines.first().map(String::as_str).unwrap_or("");
        let byte_start = resolved.start.column.saturating_sub(1);
        let pad = line
            .get(..byte_start.min(line.len()))
            .map_or(byte_start, UnicodeWidthStr::width);
        write!(self.sink, "{:>pad$}", "")?;

        let len = (resolved.end.column.saturating_sub(resolved.start.column)).max(1);
        let underline: String = std::iter::repeat(marker).take(len).collect();
        self.write_colored(&underline, color, false)?;

        if !label.message.is_empty() {
            write!(self.sink, " ")?;
            self.write_colored(&label.message, color, false)?;
        }
        writeln!(self.sink)
    }

    fn write_child(&mut self, child: &Diagnostic) -> io::Result<()> {
        let color = Self::severity_color(child.severity);
        write!(self.sink, "  ")?;
        self.write_colored(child.severity.prefix(), color, false)?;
        writeln!(self.sink, ": {}", child.message)
    }

    fn write_suggestion(&mut self, suggestion: &Suggestion) -> io::Result<()> {
        let color = Self::severity_color(DiagnosticSeverity::Help);
        write!(self.sink, "  ")?;
        self.write_colored("help", color, false)?;
        writeln!(self.sink, ": {}", suggestion.full_message())?;
        for edit in &suggestion.edits {
            writeln!(self.sink, "        {}", edit.new_text)?;
        }
        Ok(())
    }

    fn write_summary(&mut self, diagnostics: &[Diagnostic]) -> io::Result<()> {
        let errors = diagnostics
            .iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .count();
        if errors > 0 {
            let color = Self::severity_color(DiagnosticSeverity::Error);
            self.write_colored("error", color, true)?;
            if errors == 1 {
                writeln!(self.sink, ": verification failed with 1 error")?;
            } else {
                writeln!(self.sink, ": verification failed with {errors} errors")?;
            }
        }
        Ok(())
    }
}

/// Renders diagnostics to a plain string, without colors.
///
/// Convenience for tests and non-terminal consumers.
pub fn render_to_string(diagnostics: &[Diagnostic], sources: &SourceCache) -> String {
    let sink = termcolor::NoColor::new(Vec::new());
    let config = RenderConfig {
        use_color: false,
        ..RenderConfig::default()
    };
    let mut renderer = Renderer::new(config, sink);
    // Writing to a Vec cannot fail.
    let _ = renderer.render_all(diagnostics, sources);
    String::from_utf8_lossy(&renderer.into_sink().into_inner()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestion::Suggestion;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_offset_to_line_col() {
        let source = "let a = 1\nlet b = 2\nlet c = 3";
        assert_eq!(offset_to_line_col(source, 0), (1, 1));
        assert_eq!(offset_to_line_col(source, 4), (1, 5));
        assert_eq!(offset_to_line_col(source, 10), (2, 1));
        assert_eq!(offset_to_line_col(source, 20), (3, 1));
    }

    #[test]
    fn test_resolve_span() {
        let mut cache = SourceCache::new();
        cache.add_source("main.tet", "let x = 42\nlet r = &x");

        let resolved = cache.resolve_span(&SourceSpan::new("main.tet", 19, 21)).unwrap();
        assert_eq!(resolved.start.line, 2);
        assert_eq!(resolved.start.column, 9);
        assert_eq!(resolved.source_lines.len(), 1);
    }

    #[test]
    fn test_render_plain_text() {
        let mut cache = SourceCache::new();
        cache.add_source("main.tet", "let x = 42\nlet r = &x");

        let diag = Diagnostic::error("R0002", "cannot borrow `x` as exclusive")
            .with_primary_span(SourceSpan::new("main.tet", 19, 21), "second borrow here")
            .with_suggestion(Suggestion::maybe_incorrect(
                "ending the first borrow before this point",
            ));

        let text = render_to_string(&[diag], &cache);
        assert!(text.contains("error[R0002]: cannot borrow `x` as exclusive"));
        assert!(text.contains(" --> main.tet:2:9"));
        assert!(text.contains("^^ second borrow here"));
        assert!(text.contains("help: consider ending the first borrow"));
        assert!(text.contains("verification failed with 1 error"));
    }

    #[test]
    fn test_snapshot_rendered_diagnostic() {
        let mut cache = SourceCache::new();
        cache.add_source(
            "main.tet",
            "fn select(a, b) {\n    let r = &a\n    return r\n}",
        );

        let diag = Diagnostic::error("R0003", "cannot infer a region for the return position")
            .with_primary_span(SourceSpan::new("main.tet", 30, 32), "region is ambiguous")
            .with_child(Diagnostic::note(
                "elision assigned distinct regions to `a` and `b`",
            ))
            .with_suggestion(Suggestion::machine_applicable(
                "annotate as `<'r>(a: &'r T, b: &'r T) -> &'r T`",
            ));

        insta::assert_snapshot!(render_to_string(&[diag], &cache));
    }
}
