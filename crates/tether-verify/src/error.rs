//! The verifier's error taxonomy.
//!
//! Every kind here is fatal to the function it was found in. Errors are
//! accumulated across the whole analysis - a failing function still
//! completes its pass so each independent problem is reported in one run.

use smol_str::SmolStr;
use tether_diagnostics::span::SourceSpan;
use tether_diagnostics::suggestion::Suggestion;
use tether_diagnostics::Diagnostic;
use tether_ir::{Extent, RefKind, RegionExtent, SignaturePosition, Span};
use thiserror::Error;

/// A single verification failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    /// A region's minimal required extent exceeds the live extent of the
    /// binding it refers to. Reported at the point the reference is
    /// returned or stored.
    #[error("reference to `{name}` does not live long enough")]
    DanglingReference {
        /// Name of the target binding.
        name: SmolStr,
        /// Where the requirement arose (the return or store, or the borrow
        /// itself when the borrow alone is too long-lived).
        span: Span,
        /// Where the target binding was declared.
        target_span: Span,
        /// The extent the region is required to cover.
        required: RegionExtent,
        /// The target binding's live extent.
        live: Extent,
    },

    /// An exclusive borrow interval overlaps another borrow interval on
    /// the same binding.
    #[error("cannot borrow `{name}` as {second_kind} because it is already borrowed as {first_kind}")]
    BorrowConflict {
        /// Name of the binding borrowed twice.
        name: SmolStr,
        first_kind: RefKind,
        /// Where the earlier borrow was created.
        first_span: Span,
        second_kind: RefKind,
        /// Where the later borrow was created.
        span: Span,
    },

    /// Elision rules 1-3 under-determine a return region. Carries the
    /// explicit annotation that would resolve the ambiguity.
    #[error("cannot infer a region for the {position} of `{func}`")]
    AmbiguousRegion {
        func: SmolStr,
        position: SignaturePosition,
        span: Span,
        /// Human-readable unified annotation, e.g.
        /// ``annotate as `<'r>(a: &'r T, b: &'r T) -> &'r T` ``.
        suggestion: String,
    },

    /// A composite type stores a reference field with no region parameter.
    #[error("composite `{shape}` stores a reference in field `{field}` without a region parameter")]
    UnresolvedFieldRegion {
        shape: SmolStr,
        field: SmolStr,
        span: Span,
    },
}

impl VerifyError {
    /// The registry code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            VerifyError::DanglingReference { .. } => "R0001",
            VerifyError::BorrowConflict { .. } => "R0002",
            VerifyError::AmbiguousRegion { .. } => "R0003",
            VerifyError::UnresolvedFieldRegion { .. } => "R0004",
        }
    }

    /// The span the error is primarily reported at.
    pub fn span(&self) -> Span {
        match self {
            VerifyError::DanglingReference { span, .. }
            | VerifyError::BorrowConflict { span, .. }
            | VerifyError::AmbiguousRegion { span, .. }
            | VerifyError::UnresolvedFieldRegion { span, .. } => *span,
        }
    }

    /// Lowers this error to a renderable diagnostic.
    ///
    /// `unit` names the source unit the function's spans point into.
    pub fn to_diagnostic(&self, unit: &str) -> Diagnostic {
        let primary = |span: &Span| SourceSpan::new(unit, span.start, span.end);

        match self {
            VerifyError::DanglingReference {
                name,
                span,
                target_span,
                required,
                live,
            } => Diagnostic::error(self.code(), self.to_string())
                .with_primary_span(primary(span), format!("requires `{name}` to be valid for {required}"))
                .with_secondary_span(
                    primary(target_span),
                    format!("`{name}` is only valid for {live}"),
                )
                .with_child(Diagnostic::note(format!(
                    "`{name}` is freed at the end of its scope while the reference is still reachable"
                ))),

            VerifyError::BorrowConflict {
                name,
                first_kind,
                first_span,
                second_kind,
                span,
            } => Diagnostic::error(self.code(), self.to_string())
                .with_primary_span(primary(span), format!("{second_kind} borrow of `{name}` here"))
                .with_secondary_span(
                    primary(first_span),
                    format!("earlier {first_kind} borrow is still live"),
                )
                .with_suggestion(Suggestion::maybe_incorrect(
                    "ending the earlier borrow before this point, for example with an inner scope",
                )),

            VerifyError::AmbiguousRegion {
                position,
                span,
                suggestion,
                ..
            } => Diagnostic::error(self.code(), self.to_string())
                .with_primary_span(primary(span), format!("region of the {position} is ambiguous"))
                .with_child(Diagnostic::note(
                    "elision assigned distinct regions to the reference-typed parameters",
                ))
                .with_suggestion(Suggestion::machine_applicable(suggestion.clone())),

            VerifyError::UnresolvedFieldRegion { shape, field, span } => {
                Diagnostic::error(self.code(), self.to_string())
                    .with_primary_span(
                        primary(span),
                        format!("field `{field}` of `{shape}` holds a reference"),
                    )
                    .with_child(Diagnostic::help(
                        "add a region parameter to the composite and annotate the field with it",
                    ))
            }
        }
    }
}
