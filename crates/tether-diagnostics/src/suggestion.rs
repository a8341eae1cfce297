//! Fix suggestions attached to verifier diagnostics.
//!
//! The main producer is the `AmbiguousRegion` diagnostic, which suggests the
//! explicit region annotation that would have satisfied the elision rules.

use crate::span::SourceSpan;

/// How confident the verifier is in a suggested fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Applicability {
    /// The fix is definitely correct and may be applied automatically.
    /// Used for the unified-annotation suggestion, which mirrors the exact
    /// elision rule that failed.
    MachineApplicable,

    /// Likely correct but contains `<...>` placeholders the user must fill.
    HasPlaceholders,

    /// Plausible but possibly wrong; phrased as "consider ...".
    #[default]
    MaybeIncorrect,
}

impl Applicability {
    /// Returns true if the fix can be applied without user judgement.
    pub fn is_machine_applicable(&self) -> bool {
        matches!(self, Applicability::MachineApplicable)
    }

    /// Prefix used when printing the help message.
    pub fn help_prefix(&self) -> &'static str {
        match self {
            Applicability::MachineApplicable | Applicability::HasPlaceholders => "",
            Applicability::MaybeIncorrect => "consider ",
        }
    }
}

/// A concrete text edit: replace the span's bytes with `new_text`.
///
/// An empty span inserts; an empty replacement deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionEdit {
    pub source: String,
    pub start: usize,
    pub end: usize,
    pub new_text: String,
}

impl SuggestionEdit {
    pub fn new(
        source: impl Into<String>,
        start: usize,
        end: usize,
        new_text: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            start,
            end,
            new_text: new_text.into(),
        }
    }

    /// Builds an edit replacing exactly the given span.
    pub fn from_span(span: &SourceSpan, new_text: impl Into<String>) -> Self {
        Self::new(span.source.clone(), span.start, span.end, new_text)
    }

    /// Returns true if this edit inserts without replacing.
    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }

    /// Returns true if this edit deletes without inserting.
    pub fn is_deletion(&self) -> bool {
        self.new_text.is_empty()
    }

    /// Number of bytes the edit replaces.
    pub fn replaced_len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }
}

/// A suggested fix: a message, a confidence level, and zero or more edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub message: String,
    pub applicability: Applicability,
    pub edits: Vec<SuggestionEdit>,
}

impl Suggestion {
    pub fn new(message: impl Into<String>, applicability: Applicability) -> Self {
        Self {
            message: message.into(),
            applicability,
            edits: Vec::new(),
        }
    }

    /// A suggestion safe to apply automatically.
    pub fn machine_applicable(message: impl Into<String>) -> Self {
        Self::new(message, Applicability::MachineApplicable)
    }

    /// A softer "consider ..." suggestion.
    pub fn maybe_incorrect(message: impl Into<String>) -> Self {
        Self::new(message, Applicability::MaybeIncorrect)
    }

    /// Attaches a text edit.
    pub fn with_edit(mut self, edit: SuggestionEdit) -> Self {
        self.edits.push(edit);
        self
    }

    /// Returns true if the fix can be applied without user judgement.
    pub fn can_auto_apply(&self) -> bool {
        self.applicability.is_machine_applicable() && !self.edits.is_empty()
    }

    /// The message with its applicability prefix.
    pub fn full_message(&self) -> String {
        format!("{}{}", self.applicability.help_prefix(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_edit_kinds() {
        let insert = SuggestionEdit::new("main.tet", 5, 5, "'r ");
        let delete = SuggestionEdit::new("main.tet", 5, 8, "");
        let replace = SuggestionEdit::new("main.tet", 5, 8, "'r");
        assert!(insert.is_insertion());
        assert!(delete.is_deletion());
        assert!(!replace.is_insertion());
        assert_eq!(replace.replaced_len(), 3);
    }

    #[test]
    fn test_full_message_prefix() {
        let fix = Suggestion::maybe_incorrect("introducing a scope around the second borrow");
        assert_eq!(
            fix.full_message(),
            "consider introducing a scope around the second borrow"
        );

        let fix = Suggestion::machine_applicable("annotate as `<'r>(a: &'r T) -> &'r T`");
        assert_eq!(fix.full_message(), "annotate as `<'r>(a: &'r T) -> &'r T`");
    }

    #[test]
    fn test_can_auto_apply_needs_edit() {
        let bare = Suggestion::machine_applicable("add annotation");
        assert!(!bare.can_auto_apply());

        let with_edit =
            bare.with_edit(SuggestionEdit::new("main.tet", 0, 0, "<'r>"));
        assert!(with_edit.can_auto_apply());
    }
}
