//! Tether Diagnostics - diagnostic model and rendering for the verifier.
//!
//! The verifier never aborts on the first problem: every independent error
//! in a function is collected and reported in one run. This crate provides
//! the accumulated form:
//!
//! - `Diagnostic` - severity, R-code, message, spans, suggestions
//! - `DiagnosticSeverity` - Error, Note, and Help levels
//! - `CodeRegistry` - the registry of verifier error codes
//! - Source spans and labels (`span` module)
//! - Fix suggestions with applicability levels (`suggestion` module)
//! - Terminal rendering with color support (`render` module)
//!
//! # Example
//!
//! ```rust
//! use tether_diagnostics::{Diagnostic, DiagnosticSeverity};
//! use tether_diagnostics::span::SourceSpan;
//!
//! let span = SourceSpan::new("main.tet", 42, 48);
//! let diagnostic = Diagnostic::error("R0002", "cannot borrow `x` as exclusive")
//!     .with_primary_span(span, "second borrow of `x` while the first is live");
//!
//! assert_eq!(diagnostic.severity, DiagnosticSeverity::Error);
//! assert_eq!(diagnostic.code.as_deref(), Some("R0002"));
//! ```

pub mod render;
pub mod span;
pub mod suggestion;

use span::{MultiSpan, SourceSpan};
use std::collections::HashMap;
use suggestion::Suggestion;
use thiserror::Error;

/// The severity level of a diagnostic.
///
/// Every problem the verifier finds is fatal to its function, so the only
/// top-level severity is `Error`; notes and helps appear as children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DiagnosticSeverity {
    /// A verification failure. The function is rejected.
    #[default]
    Error,
    /// Informational note attached to an error.
    Note,
    /// A suggestion for fixing the error.
    Help,
}

impl DiagnosticSeverity {
    /// Text prefix for this severity level.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Note => "note",
            DiagnosticSeverity::Help => "help",
        }
    }

    /// Returns true if this severity rejects the function.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiagnosticSeverity::Error)
    }
}

/// A verifier diagnostic.
///
/// Carries the diagnostic kind as an R-code, the source locations and
/// binding/reference names involved, and - for ambiguous-region errors -
/// the explicit annotation that would resolve the ambiguity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The error code (e.g. "R0001").
    pub code: Option<String>,
    /// The severity level.
    pub severity: DiagnosticSeverity,
    /// The main message.
    pub message: String,
    /// Source locations related to this diagnostic.
    pub spans: MultiSpan,
    /// Suggested fixes.
    pub suggestions: Vec<Suggestion>,
    /// Attached notes and helps.
    pub children: Vec<Diagnostic>,
    /// False when this error is a cascade of an earlier one on the same
    /// root cause; renderers may de-emphasize cascades.
    pub is_root_cause: bool,
}

impl Diagnostic {
    /// Creates a new diagnostic.
    pub fn new(
        severity: DiagnosticSeverity,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            spans: MultiSpan::new(),
            suggestions: Vec::new(),
            children: Vec::new(),
            is_root_cause: true,
        }
    }

    /// Creates an error diagnostic.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, Some(code.into()), message)
    }

    /// Creates a note (usually attached as a child).
    pub fn note(message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Note, None, message)
    }

    /// Creates a help message (usually attached as a child).
    pub fn help(message: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Help, None, message)
    }

    /// Adds a primary span with a label message.
    pub fn with_primary_span(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.spans.push_primary(span, message);
        self
    }

    /// Adds a secondary span with a label message.
    pub fn with_secondary_span(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.spans.push_secondary(span, message);
        self
    }

    /// Adds a suggestion.
    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// Adds a child note or help.
    pub fn with_child(mut self, child: Diagnostic) -> Self {
        self.children.push(child);
        self
    }

    /// Marks this as a cascading error on an already-reported root cause.
    pub fn as_cascade(mut self) -> Self {
        self.is_root_cause = false;
        self
    }

    /// Returns true if this diagnostic has any spans.
    pub fn has_spans(&self) -> bool {
        !self.spans.is_empty()
    }

    /// Returns true if this diagnostic has any suggestions.
    pub fn has_suggestions(&self) -> bool {
        !self.suggestions.is_empty()
    }
}

/// Information about a registered error code.
#[derive(Debug, Clone)]
pub struct CodeInfo {
    /// The error code (e.g. "R0001").
    pub code: String,
    /// A brief description of the error.
    pub description: String,
}

/// Registry of the verifier's error codes.
///
/// The verifier's taxonomy is small and closed; the registry exists so
/// tooling (docs links, `--explain`) can enumerate it.
#[derive(Debug, Default)]
pub struct CodeRegistry {
    codes: HashMap<String, CodeInfo>,
}

impl CodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of standard verifier codes.
    pub fn with_standard_codes() -> Self {
        let mut registry = Self::new();
        registry.register("R0001", "dangling reference: region outlives its target binding");
        registry.register("R0002", "borrow conflict: overlapping exclusive borrow intervals");
        registry.register("R0003", "ambiguous region: elision cannot determine a return region");
        registry.register("R0004", "unresolved field region: composite stores an unannotated reference");
        registry
    }

    /// Registers a code.
    pub fn register(&mut self, code: impl Into<String>, description: impl Into<String>) {
        let code = code.into();
        self.codes.insert(
            code.clone(),
            CodeInfo {
                code,
                description: description.into(),
            },
        );
    }

    /// Looks up a code.
    pub fn get(&self, code: &str) -> Option<&CodeInfo> {
        self.codes.get(code)
    }

    /// All registered codes.
    pub fn all_codes(&self) -> impl Iterator<Item = &CodeInfo> {
        self.codes.values()
    }
}

/// Result type for diagnostic operations.
pub type DiagnosticResult<T> = Result<T, DiagnosticError>;

/// Errors that can occur while handling diagnostics themselves.
#[derive(Debug, Error)]
pub enum DiagnosticError {
    /// An I/O error occurred while rendering.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A source unit referenced by a span is not in the cache.
    #[error("source not found: {0}")]
    SourceNotFound(String),
}
