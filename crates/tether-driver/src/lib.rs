//! Whole-program driver for the Tether verifier.
//!
//! Functions are independent analysis units, so the driver fans them out
//! over a pool of std threads pulling from a shared work queue. Each
//! worker appends `(index, verdict)` pairs to a shared collector; the
//! driver sorts by index after joining, so the report is deterministic
//! regardless of which worker finished first.

use std::sync::{Arc, Mutex};
use std::thread;

use tether_diagnostics::render::{render_to_string, SourceCache};
use tether_diagnostics::Diagnostic;
use tether_ir::{AnnotatedFunc, FuncIr};
use tether_verify::{verify_func, Verdict};

// ============================================================================
// Configuration
// ============================================================================

/// How the driver schedules and reports.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Number of worker threads (0 = auto-detect).
    pub threads: usize,
    /// Report only the first error of each rejected function.
    pub first_error_only: bool,
    /// Mark every error after a function's first as a cascade, so the
    /// renderer can de-emphasize likely follow-on failures.
    pub mark_cascades: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            first_error_only: false,
            mark_cascades: false,
        }
    }
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn first_error_only(mut self, enabled: bool) -> Self {
        self.first_error_only = enabled;
        self
    }

    pub fn mark_cascades(mut self, enabled: bool) -> Self {
        self.mark_cascades = enabled;
        self
    }

    /// The worker count actually used.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.threads
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// The outcome of checking a whole program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgramReport {
    /// Annotated output of every accepted function, in input order.
    pub verified: Vec<AnnotatedFunc>,
    /// Diagnostics of every rejected function, in input order.
    pub diagnostics: Vec<Diagnostic>,
    /// Per-function verdicts, in input order.
    pub verdicts: Vec<Verdict>,
}

impl ProgramReport {
    /// Whether every function was accepted.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }

    /// Renders the report's diagnostics against the given sources.
    pub fn render(&self, sources: &SourceCache) -> String {
        render_to_string(&self.diagnostics, sources)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Verifies whole programs, one independent function at a time.
pub struct Driver {
    config: DriverConfig,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(DriverConfig::default())
    }

    /// Checks every function of `program` and assembles the report.
    pub fn check_program(&self, program: Vec<FuncIr>) -> ProgramReport {
        let threads = self.config.effective_threads();
        let verdicts = if threads <= 1 || program.len() <= 1 {
            program.iter().map(verify_func).collect()
        } else {
            run_parallel(&program, threads)
        };

        let mut report = ProgramReport::default();
        for (func, verdict) in program.iter().zip(&verdicts) {
            match verdict {
                Verdict::Verified(annotated) => report.verified.push(annotated.clone()),
                Verdict::Rejected(errors) => {
                    for (nth, error) in errors.iter().enumerate() {
                        if nth > 0 && self.config.first_error_only {
                            break;
                        }
                        let mut diag = error.to_diagnostic(&func.unit);
                        if nth > 0 && self.config.mark_cascades {
                            diag = diag.as_cascade();
                        }
                        report.diagnostics.push(diag);
                    }
                }
            }
        }
        report.verdicts = verdicts;
        report
    }
}

/// Fans functions out over a shared work queue and reassembles the
/// verdicts in input order.
fn run_parallel(program: &[FuncIr], threads: usize) -> Vec<Verdict> {
    let total = program.len();
    let queue = Arc::new(Mutex::new(
        program.iter().cloned().enumerate().collect::<Vec<_>>(),
    ));
    let results = Arc::new(Mutex::new(Vec::with_capacity(total)));

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let queue = Arc::clone(&queue);
        let results = Arc::clone(&results);
        let handle = thread::spawn(move || loop {
            let item = {
                let mut queue = queue.lock().unwrap();
                queue.pop()
            };
            let (idx, func) = match item {
                Some(item) => item,
                None => break,
            };
            let verdict = verify_func(&func);
            let mut results = results.lock().unwrap();
            results.push((idx, verdict));
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.join();
    }

    let mut results = match Arc::try_unwrap(results) {
        Ok(mutex) => mutex.into_inner().unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, verdict)| verdict).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tether_ir::{
        Block, Expr, Ident, LetStmt, Param, RefKind, ReturnStmt, Signature, Span, Spanned,
        Stmt, TypeShape,
    };

    fn ident(name: &str) -> Ident {
        Spanned::dummy(name.into())
    }

    fn named_func(name: &str, params: Vec<Param>, ret: Option<TypeShape>, stmts: Vec<Stmt>) -> FuncIr {
        FuncIr {
            name: name.into(),
            unit: "main.tet".into(),
            signature: Signature {
                params,
                ret,
                span: Span::dummy(),
            },
            body: Block::new(stmts, Span::dummy()),
            span: Span::dummy(),
        }
    }

    fn sound_func(name: &str) -> FuncIr {
        let shape = TypeShape::reference(RefKind::Shared, TypeShape::value("T"));
        named_func(
            name,
            vec![Param::new(ident("a"), shape.clone())],
            Some(shape),
            vec![Stmt::Return(ReturnStmt {
                value: Some(Expr::Use(ident("a"))),
                span: Span::dummy(),
            })],
        )
    }

    fn dangling_func(name: &str) -> FuncIr {
        named_func(
            name,
            vec![],
            None,
            vec![
                Stmt::Let(LetStmt {
                    name: ident("x"),
                    shape: None,
                    init: Expr::Lit(Span::dummy()),
                    span: Span::dummy(),
                }),
                Stmt::Let(LetStmt {
                    name: ident("r"),
                    shape: None,
                    init: Expr::Borrow {
                        target: ident("x"),
                        annotation: None,
                        span: Span::dummy(),
                    },
                    span: Span::dummy(),
                }),
                Stmt::Return(ReturnStmt {
                    value: Some(Expr::Use(ident("r"))),
                    span: Span::dummy(),
                }),
            ],
        )
    }

    #[test]
    fn test_report_preserves_input_order() {
        let program = vec![
            sound_func("alpha"),
            dangling_func("beta"),
            sound_func("gamma"),
        ];
        let driver = Driver::new(DriverConfig::new().with_threads(4));
        let report = driver.check_program(program);

        assert_eq!(report.verified.len(), 2);
        assert_eq!(report.verified[0].name, "alpha");
        assert_eq!(report.verified[1].name, "gamma");
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.verdicts.len(), 3);
        assert!(!report.verdicts[1].is_verified());
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let program: Vec<_> = (0..16)
            .map(|i| {
                if i % 3 == 0 {
                    dangling_func(&format!("f{i}"))
                } else {
                    sound_func(&format!("f{i}"))
                }
            })
            .collect();

        let sequential = Driver::new(DriverConfig::new().with_threads(1))
            .check_program(program.clone());
        let parallel = Driver::new(DriverConfig::new().with_threads(8)).check_program(program);
        assert_eq!(sequential.verdicts, parallel.verdicts);
        assert_eq!(sequential.diagnostics, parallel.diagnostics);
    }

    #[test]
    fn test_first_error_only_keeps_one_diagnostic_per_function() {
        // Two independent problems in one function.
        let ir = named_func(
            "messy",
            vec![],
            None,
            vec![
                Stmt::Let(LetStmt {
                    name: ident("x"),
                    shape: None,
                    init: Expr::Lit(Span::dummy()),
                    span: Span::dummy(),
                }),
                Stmt::Let(LetStmt {
                    name: ident("a"),
                    shape: None,
                    init: Expr::Borrow {
                        target: ident("x"),
                        annotation: None,
                        span: Span::dummy(),
                    },
                    span: Span::dummy(),
                }),
                Stmt::Let(LetStmt {
                    name: ident("b"),
                    shape: None,
                    init: Expr::Borrow {
                        target: ident("x"),
                        annotation: None,
                        span: Span::dummy(),
                    },
                    span: Span::dummy(),
                }),
                Stmt::Assign(tether_ir::AssignStmt {
                    target: ident("a"),
                    value: Expr::Lit(Span::dummy()),
                    span: Span::dummy(),
                }),
                Stmt::Return(ReturnStmt {
                    value: Some(Expr::Use(ident("b"))),
                    span: Span::dummy(),
                }),
            ],
        );

        let all = Driver::with_defaults().check_program(vec![ir.clone()]);
        assert!(all.error_count() > 1);

        let first_only = Driver::new(DriverConfig::new().first_error_only(true))
            .check_program(vec![ir]);
        assert_eq!(first_only.error_count(), 1);
    }

    #[test]
    fn test_mark_cascades_demotes_later_errors_within_a_function() {
        // Returning borrows of two different locals: two independent
        // dangling errors in one function.
        let ir = named_func(
            "leaky",
            vec![],
            None,
            vec![
                Stmt::Let(LetStmt {
                    name: ident("x"),
                    shape: None,
                    init: Expr::Lit(Span::dummy()),
                    span: Span::dummy(),
                }),
                Stmt::Let(LetStmt {
                    name: ident("y"),
                    shape: None,
                    init: Expr::Lit(Span::dummy()),
                    span: Span::dummy(),
                }),
                Stmt::Let(LetStmt {
                    name: ident("r"),
                    shape: None,
                    init: Expr::Borrow {
                        target: ident("x"),
                        annotation: None,
                        span: Span::dummy(),
                    },
                    span: Span::dummy(),
                }),
                Stmt::Let(LetStmt {
                    name: ident("s"),
                    shape: None,
                    init: Expr::Borrow {
                        target: ident("y"),
                        annotation: None,
                        span: Span::dummy(),
                    },
                    span: Span::dummy(),
                }),
                Stmt::Return(ReturnStmt {
                    value: Some(Expr::Use(ident("r"))),
                    span: Span::dummy(),
                }),
                Stmt::Return(ReturnStmt {
                    value: Some(Expr::Use(ident("s"))),
                    span: Span::dummy(),
                }),
            ],
        );
        let report = Driver::new(DriverConfig::new().mark_cascades(true))
            .check_program(vec![ir]);
        assert_eq!(report.error_count(), 2);
        assert!(report.diagnostics[0].is_root_cause);
        assert!(!report.diagnostics[1].is_root_cause);
    }

    #[test]
    fn test_empty_program_is_clean() {
        let report = Driver::with_defaults().check_program(vec![]);
        assert!(report.is_clean());
        assert!(report.verified.is_empty());
    }
}
