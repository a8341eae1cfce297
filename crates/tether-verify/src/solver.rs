//! Constraint Solver & Conflict Checker.
//!
//! Takes the constraints and requirements inference produced and computes
//! the minimal extent of every region class by fixed-point widening: each
//! region starts at the hull of its direct requirements, and every
//! `longer ⊇ shorter` edge widens `longer` until nothing changes. Extents
//! only ever grow and the static region is the top element, so the loop
//! terminates.
//!
//! Two checks run against the solved extents:
//!
//! - a reference into owned storage whose required extent escapes the
//!   storage's live extent is dangling;
//! - two overlapping borrows of the same binding where either is
//!   exclusive are a conflict, unless one is derived from the other.
//!
//! Both checks always run, so a function with several independent
//! problems reports all of them in one pass.

use crate::borrows::{BorrowGraph, RefId, RefOrigin};
use crate::error::VerifyError;
use crate::regions::{InferenceResult, RegionVid, STATIC_REGION};
use crate::scope::{BindingId, OwnershipKind, ScopeTree};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use tether_ir::{
    AnnotatedFunc, Extent, FuncIr, ProgramPoint, RegionExtent, SignaturePosition,
    SignatureRegion, ReferenceRegion, Span,
};

/// Solves a function's region constraints and checks the result.
pub struct ConstraintSolver<'a> {
    func: &'a FuncIr,
    tree: &'a ScopeTree,
    graph: &'a BorrowGraph,
    inference: InferenceResult,
    /// Solved extent per region class representative.
    extents: FxHashMap<u32, RegionExtent>,
    /// The span that last widened each class, for blame.
    blame: FxHashMap<u32, Span>,
    errors: Vec<VerifyError>,
}

impl<'a> ConstraintSolver<'a> {
    /// Solves and checks, returning the fully annotated function together
    /// with every error found. The annotation is meaningful only when the
    /// error list (including errors from earlier passes) is empty.
    pub fn solve(
        func: &'a FuncIr,
        tree: &'a ScopeTree,
        graph: &'a BorrowGraph,
        inference: InferenceResult,
    ) -> (AnnotatedFunc, Vec<VerifyError>) {
        let mut solver = Self {
            func,
            tree,
            graph,
            inference,
            extents: FxHashMap::default(),
            blame: FxHashMap::default(),
            errors: Vec::new(),
        };
        solver.seed();
        solver.propagate();
        solver.check_dangling();
        solver.check_conflicts();
        let annotated = solver.annotate();
        (annotated, solver.errors)
    }

    /// Seeds every class with the hull of its direct requirements.
    fn seed(&mut self) {
        self.extents.insert(STATIC_REGION.0, RegionExtent::Static);
        let requirements = std::mem::take(&mut self.inference.requirements);
        for req in &requirements {
            let root = self.inference.table.find(req.region).0;
            self.widen(root, RegionExtent::Points(req.extent), req.span);
        }
        self.inference.requirements = requirements;
    }

    /// Fixed-point pass over the outlives constraints.
    fn propagate(&mut self) {
        let constraints = std::mem::take(&mut self.inference.constraints);
        let edges: Vec<(u32, u32, Span)> = constraints
            .iter()
            .map(|c| {
                let longer = self.inference.table.find(c.longer).0;
                let shorter = self.inference.table.find(c.shorter).0;
                (longer, shorter, c.span)
            })
            .collect();
        self.inference.constraints = constraints;

        // Constraints to revisit when a given class widens.
        let mut dependents: FxHashMap<u32, Vec<usize>> = FxHashMap::default();
        for (idx, &(_, shorter, _)) in edges.iter().enumerate() {
            dependents.entry(shorter).or_default().push(idx);
        }

        let mut queue: VecDeque<usize> = (0..edges.len()).collect();
        while let Some(idx) = queue.pop_front() {
            let (longer, shorter, span) = edges[idx];
            let Some(&required) = self.extents.get(&shorter) else {
                continue;
            };
            if self.widen(longer, required, span) {
                if let Some(deps) = dependents.get(&longer) {
                    queue.extend(deps.iter().copied());
                }
            }
        }
    }

    /// Grows `root`'s extent to cover `extent`. Returns whether it changed.
    fn widen(&mut self, root: u32, extent: RegionExtent, span: Span) -> bool {
        let current = self.extents.get(&root).copied();
        let next = match (current, extent) {
            (Some(RegionExtent::Static), _) => return false,
            (_, RegionExtent::Static) => RegionExtent::Static,
            (None, points) => points,
            (Some(RegionExtent::Points(a)), RegionExtent::Points(b)) => {
                if a.covers(&b) {
                    return false;
                }
                RegionExtent::Points(a.hull(&b))
            }
        };
        self.extents.insert(root, next);
        self.blame.insert(root, span);
        true
    }

    fn solved(&mut self, vid: RegionVid) -> RegionExtent {
        let root = self.inference.table.find(vid).0;
        match self.extents.get(&root) {
            Some(&extent) => extent,
            // A region with no requirement at all never surfaced in the
            // body; give it an empty extent.
            None => RegionExtent::Points(Extent::new(ProgramPoint(0), ProgramPoint(0))),
        }
    }

    /// Every reference into owned storage must have its solved extent
    /// covered by the storage's live extent.
    fn check_dangling(&mut self) {
        for (idx, data) in self.graph.references().iter().enumerate() {
            if data.origin != RefOrigin::Local {
                continue;
            }
            let binding = self.tree.binding(data.target);
            // Reborrows of caller storage are bounded by the parameter's
            // region instead, through the derived-from constraint.
            if binding.ownership != OwnershipKind::Owned {
                continue;
            }
            let required = self.solved(self.inference.ref_regions[idx]);
            let live = self.live_extent(data.target);
            let covered = match required {
                RegionExtent::Static => false,
                RegionExtent::Points(req) => live.covers(&req),
            };
            if !covered {
                let root = self.inference.table.find(self.inference.ref_regions[idx]).0;
                let span = self.blame.get(&root).copied().unwrap_or(data.span);
                self.errors.push(VerifyError::DanglingReference {
                    name: binding.name.clone(),
                    span,
                    target_span: binding.span,
                    required,
                    live,
                });
            }
        }
    }

    /// A binding's live extent, truncated at the point after its earliest
    /// ownership transfer.
    fn live_extent(&self, binding: BindingId) -> Extent {
        let mut live = self.tree.live_extent(binding);
        for &(moved, point, _) in self.graph.moves() {
            if moved == binding {
                live.end = live.end.min(ProgramPoint(point.0 + 1));
            }
        }
        live
    }

    /// Pairwise overlap check over borrows of the same binding.
    fn check_conflicts(&mut self) {
        let mut by_target: FxHashMap<BindingId, Vec<RefId>> = FxHashMap::default();
        for (idx, data) in self.graph.references().iter().enumerate() {
            if data.origin == RefOrigin::Local {
                by_target
                    .entry(data.target)
                    .or_default()
                    .push(RefId(idx as u32));
            }
        }

        // References are in creation order, so within each group the
        // earlier borrow is always first.
        let mut groups: Vec<(BindingId, Vec<RefId>)> = by_target.into_iter().collect();
        groups.sort_by_key(|(bid, _)| bid.0);
        for (bid, refs) in groups {
            let name = self.tree.binding(bid).name.clone();
            for (i, &first) in refs.iter().enumerate() {
                for &second in &refs[i + 1..] {
                    let a = self.graph.reference(first);
                    let b = self.graph.reference(second);
                    if a.kind.is_shared() && b.kind.is_shared() {
                        continue;
                    }
                    // A reborrow may coexist with its own source, but only
                    // at the access level the source granted: an exclusive
                    // reborrow of a shared reference is a write the shared
                    // borrow never permitted.
                    let exempt = if self.is_derived(second, first) {
                        !(b.kind.is_exclusive() && a.kind.is_shared())
                    } else if self.is_derived(first, second) {
                        !(a.kind.is_exclusive() && b.kind.is_shared())
                    } else {
                        false
                    };
                    if exempt {
                        continue;
                    }
                    if self.graph.interval(first).overlaps(&self.graph.interval(second)) {
                        self.errors.push(VerifyError::BorrowConflict {
                            name: name.clone(),
                            first_kind: a.kind,
                            first_span: a.span,
                            second_kind: b.kind,
                            span: b.span,
                        });
                    }
                }
            }
        }
    }

    /// Whether `child` reborrows `ancestor`, transitively.
    fn is_derived(&self, child: RefId, ancestor: RefId) -> bool {
        let mut current = self.graph.reference(child).derived_from;
        while let Some(rid) = current {
            if rid == ancestor {
                return true;
            }
            current = self.graph.reference(rid).derived_from;
        }
        false
    }

    /// Substitutes every region variable with its solved extent.
    fn annotate(&mut self) -> AnnotatedFunc {
        let mut signature_regions = Vec::new();
        let param_regions = self.inference.param_regions.clone();
        for (name, vid) in param_regions {
            signature_regions.push(SignatureRegion {
                position: SignaturePosition::Param(name),
                extent: self.solved(vid),
            });
        }
        if let Some(vid) = self.inference.return_region {
            signature_regions.push(SignatureRegion {
                position: SignaturePosition::Return,
                extent: self.solved(vid),
            });
        }

        let mut reference_regions = Vec::new();
        for (idx, data) in self.graph.references().iter().enumerate() {
            if data.origin != RefOrigin::Local {
                continue;
            }
            reference_regions.push(ReferenceRegion {
                target: self.tree.binding(data.target).name.clone(),
                kind: data.kind,
                created: data.created,
                extent: self.solved(self.inference.ref_regions[idx]),
                span: data.span,
            });
        }

        AnnotatedFunc {
            name: self.func.name.clone(),
            signature_regions,
            reference_regions,
            span: self.func.span,
        }
    }
}
