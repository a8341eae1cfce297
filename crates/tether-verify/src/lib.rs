//! Static lifetime-and-borrow verification for Tether function IR.
//!
//! A function is checked in four passes, each feeding the next:
//!
//! 1. [`scope::ScopeBuilder`] assigns program points and builds the scope
//!    tree and binding table;
//! 2. [`borrows::BorrowGraphBuilder`] replays the body into a reference
//!    graph with an ordered borrow-event log;
//! 3. [`regions::RegionInference`] assigns region variables from
//!    annotations and the elision rules, and collects constraints;
//! 4. [`solver::ConstraintSolver`] solves the constraints by fixed-point
//!    widening and runs the dangling and conflict checks.
//!
//! Errors accumulate across all four passes. A pass that finds problems
//! still produces its output so the later passes can report their own,
//! and a function is only accepted when the combined list is empty.
//!
//! ```
//! use tether_ir::{Block, FuncIr, Signature, Span};
//! use tether_verify::{verify_func, Verdict};
//!
//! let func = FuncIr {
//!     name: "empty".into(),
//!     unit: "main.tet".into(),
//!     signature: Signature { params: vec![], ret: None, span: Span::dummy() },
//!     body: Block::new(vec![], Span::dummy()),
//!     span: Span::dummy(),
//! };
//! assert!(matches!(verify_func(&func), Verdict::Verified(_)));
//! ```

pub mod borrows;
pub mod error;
pub mod regions;
pub mod scope;
pub mod solver;

pub use error::VerifyError;

use crate::borrows::BorrowGraphBuilder;
use crate::regions::RegionInference;
use crate::scope::ScopeBuilder;
use crate::solver::ConstraintSolver;
use tether_ir::{AnnotatedFunc, FuncIr};

/// The outcome of verifying one function.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The function is sound; every region is solved to a concrete extent.
    Verified(AnnotatedFunc),
    /// The function is rejected, with every error found in one pass.
    Rejected(Vec<VerifyError>),
}

impl Verdict {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verdict::Verified(_))
    }

    /// The errors of a rejection, empty for a verified function.
    pub fn errors(&self) -> &[VerifyError] {
        match self {
            Verdict::Verified(_) => &[],
            Verdict::Rejected(errors) => errors,
        }
    }
}

/// Runs the full pipeline over one function.
pub fn verify_func(func: &FuncIr) -> Verdict {
    let (tree, mut errors) = ScopeBuilder::build(func);
    let (graph, graph_errors) = BorrowGraphBuilder::build(func, &tree);
    errors.extend(graph_errors);

    let mut inference = RegionInference::infer(func, &tree, &graph);
    errors.append(&mut inference.errors);

    let (annotated, solve_errors) = ConstraintSolver::solve(func, &tree, &graph, inference);
    errors.extend(solve_errors);

    if errors.is_empty() {
        Verdict::Verified(annotated)
    } else {
        Verdict::Rejected(errors)
    }
}
