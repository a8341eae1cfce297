//! Reference Graph Builder.
//!
//! Replays the function body over the scope tree and records every
//! reference together with the ordered borrow events it produces. The
//! walk visits statements at exactly the program points the scope pass
//! assigned them, so event ordering and scope extents agree by
//! construction.
//!
//! Borrow expressions carry no shared/exclusive kind in the IR; a
//! reference is classified after the walk from how it was used. A single
//! write through it, or an exclusive capture or call argument, makes it
//! exclusive. Parameters keep the kind their shape declares.

use crate::error::VerifyError;
use crate::scope::{BindingId, OwnershipKind, ScopeBuilder, ScopeId, ScopeTree};
use rustc_hash::FxHashMap;
use tether_ir::{
    AccessMode, Block, CaptureMode, Expr, Extent, FuncIr, ProgramPoint, RefKind,
    RegionAnnotation, Span, Stmt, TypeShape,
};

/// Index of a reference in the graph, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId(pub u32);

/// Where a reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefOrigin {
    /// Created by a borrow expression (or closure capture) in the body.
    Local,
    /// Flowed in through a reference-typed parameter.
    Param,
}

/// What happened to a reference at a program point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Read,
    Written,
    Expired,
}

/// One entry in a function's ordered event log.
#[derive(Debug, Clone, PartialEq)]
pub struct BorrowEvent {
    pub reference: RefId,
    pub point: ProgramPoint,
    pub kind: EventKind,
    pub span: Span,
}

/// Everything the builder learned about one reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceData {
    /// The binding whose storage this reference points into.
    pub target: BindingId,
    pub kind: RefKind,
    pub origin: RefOrigin,
    pub created: ProgramPoint,
    /// The point at which the reference expires: the close point of the
    /// innermost scope that can still reach it.
    pub expired: ProgramPoint,
    pub last_use: Option<ProgramPoint>,
    /// Explicit region annotations attached to this reference, from the
    /// borrow expression and/or a declared let shape. Multiple
    /// annotations are unified during inference.
    pub annotations: Vec<RegionAnnotation>,
    pub span: Span,
    /// The innermost scope that can reach the reference. Storing it into
    /// an outer binding widens this.
    pub scope: ScopeId,
    /// For a reborrow, the reference it was derived from.
    pub derived_from: Option<RefId>,
    /// Where the reference escapes through `return`, if it does.
    pub returned_at: Option<Span>,
    /// Bindings the reference was stored into by assignment, with the
    /// point and span of each store.
    pub stored_into: Vec<(BindingId, ProgramPoint, Span)>,
    /// Whether the reference was ever used exclusively.
    pub exclusive_use: bool,
}

/// The reference graph for one function: all references, the ordered
/// event log, and the ownership transfers observed along the way.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BorrowGraph {
    references: Vec<ReferenceData>,
    events: Vec<BorrowEvent>,
    /// Bindings whose ownership was transferred away, with where.
    moves: Vec<(BindingId, ProgramPoint, Span)>,
}

impl BorrowGraph {
    pub fn reference(&self, id: RefId) -> &ReferenceData {
        &self.references[id.0 as usize]
    }

    pub fn references(&self) -> &[ReferenceData] {
        &self.references
    }

    pub fn events(&self) -> &[BorrowEvent] {
        &self.events
    }

    pub fn moves(&self) -> &[(BindingId, ProgramPoint, Span)] {
        &self.moves
    }

    /// The half-open interval over which a reference is outstanding.
    pub fn interval(&self, id: RefId) -> Extent {
        let data = self.reference(id);
        Extent::new(data.created, data.expired)
    }
}

/// Builds the reference graph for one function over its scope tree.
pub struct BorrowGraphBuilder<'a> {
    func: &'a FuncIr,
    tree: &'a ScopeTree,
    graph: BorrowGraph,
    errors: Vec<VerifyError>,
    /// Which reference each binding currently holds, if any.
    held: FxHashMap<BindingId, RefId>,
    next_point: u32,
}

impl<'a> BorrowGraphBuilder<'a> {
    /// Replays `func` over `tree`, which must come from
    /// [`ScopeBuilder::build`] on the same function.
    pub fn build(func: &'a FuncIr, tree: &'a ScopeTree) -> (BorrowGraph, Vec<VerifyError>) {
        let mut builder = Self {
            func,
            tree,
            graph: BorrowGraph::default(),
            errors: Vec::new(),
            held: FxHashMap::default(),
            next_point: 0,
        };
        builder.run();
        (builder.graph, builder.errors)
    }

    fn run(&mut self) {
        let func = self.func;
        let root = ScopeTree::root();
        let root_close = self.tree.scope(root).close_point();

        // Reference parameters materialize at the signature point.
        let sig_point = self.alloc_point();
        for param in &func.signature.params {
            let Some(bid) = self.tree.resolve(root, &param.name.node, sig_point) else {
                continue;
            };
            if let TypeShape::Ref(node) = &param.shape {
                let rid = self.new_reference(ReferenceData {
                    target: bid,
                    kind: node.kind,
                    origin: RefOrigin::Param,
                    created: sig_point,
                    expired: root_close,
                    last_use: None,
                    annotations: node.annotation.iter().cloned().collect(),
                    span: param.name.span,
                    scope: root,
                    derived_from: None,
                    returned_at: None,
                    stored_into: Vec::new(),
                    exclusive_use: false,
                });
                self.emit(rid, sig_point, EventKind::Created, param.name.span);
                self.held.insert(bid, rid);
            }
        }

        self.walk_block(root, &func.body);
    }

    fn walk_block(&mut self, scope: ScopeId, block: &'a Block) {
        // Scope ids are assigned in pre-order, so a scope's first nested
        // block is always the very next id.
        let mut next_child = ScopeId(scope.0 + 1);
        for stmt in &block.stmts {
            let point = self.alloc_point();
            match stmt {
                Stmt::Let(stmt) => {
                    let rid = self.eval_expr(scope, &stmt.init, point);
                    let Some(bid) = self.tree.resolve(scope, &stmt.name.node, point) else {
                        continue;
                    };
                    if let Some(rid) = rid {
                        self.held.insert(bid, rid);
                        if let Some(TypeShape::Ref(node)) = &stmt.shape {
                            if let Some(annotation) = &node.annotation {
                                self.graph.references[rid.0 as usize]
                                    .annotations
                                    .push(annotation.clone());
                            }
                        }
                    }
                }
                Stmt::Assign(stmt) => {
                    let rid = self.eval_expr(scope, &stmt.value, point);
                    let Some(bid) = self.tree.resolve(scope, &stmt.target.node, point) else {
                        continue;
                    };
                    if let Some(rid) = rid {
                        // Storing a reference into a binding widens the
                        // reference's reach to that binding's scope.
                        self.held.insert(bid, rid);
                        let target_scope = self.tree.binding(bid).scope;
                        let target_close = self.tree.scope(target_scope).close_point();
                        let data = &mut self.graph.references[rid.0 as usize];
                        data.stored_into.push((bid, point, stmt.span));
                        if target_close > data.expired {
                            data.expired = target_close;
                            data.scope = target_scope;
                        }
                    } else if let Some(&held) = self.held.get(&bid) {
                        // A write through the reference the target holds.
                        self.mark_exclusive(held);
                        self.emit(held, point, EventKind::Written, stmt.span);
                        self.touch(held, point);
                    }
                }
                Stmt::Expr(expr) => {
                    self.eval_expr(scope, expr, point);
                }
                Stmt::Block(inner) => {
                    let child = next_child;
                    self.walk_block(child, inner);
                    next_child = ScopeId(child.0 + 1 + self.count_scopes_below(child));
                }
                Stmt::Return(stmt) => {
                    if let Some(value) = &stmt.value {
                        if let Some(rid) = self.eval_expr(scope, value, point) {
                            self.graph.references[rid.0 as usize].returned_at = Some(stmt.span);
                        }
                    }
                }
            }
        }
        self.close_scope(scope, block.span);
    }

    fn close_scope(&mut self, scope: ScopeId, span: Span) {
        let close = self.alloc_point();
        for rid in 0..self.graph.references.len() {
            let data = &self.graph.references[rid];
            if data.scope == scope && data.origin == RefOrigin::Local {
                self.emit(RefId(rid as u32), close, EventKind::Expired, span);
            }
        }
        // Parameter references expire with the root scope too.
        if scope == ScopeTree::root() {
            for rid in 0..self.graph.references.len() {
                if self.graph.references[rid].origin == RefOrigin::Param {
                    self.emit(RefId(rid as u32), close, EventKind::Expired, span);
                }
            }
        }
        let tree = self.tree;
        self.held.retain(|&bid, _| tree.binding(bid).scope != scope);
    }

    /// Evaluates an expression at `point`, returning the reference it
    /// yields if it yields one.
    fn eval_expr(&mut self, scope: ScopeId, expr: &'a Expr, point: ProgramPoint) -> Option<RefId> {
        match expr {
            Expr::Lit(_) => None,
            Expr::Use(name) => {
                let bid = self.tree.resolve_before(scope, &name.node, point)?;
                if let Some(&rid) = self.held.get(&bid) {
                    self.emit(rid, point, EventKind::Read, name.span);
                    self.touch(rid, point);
                    Some(rid)
                } else {
                    None
                }
            }
            Expr::Borrow {
                target,
                annotation,
                span,
            } => {
                let bid = self.tree.resolve_before(scope, &target.node, point)?;
                let derived_from = self.held.get(&bid).copied();
                // A borrow of a reference-holding binding reborrows the
                // underlying storage, not the binding itself.
                let (target_bid, derived) = match derived_from {
                    Some(src) => (self.graph.reference(src).target, Some(src)),
                    None => (bid, None),
                };
                let rid = self.new_reference(ReferenceData {
                    target: target_bid,
                    // Classified from use after the walk.
                    kind: RefKind::Shared,
                    origin: RefOrigin::Local,
                    created: point,
                    expired: self.tree.scope(scope).close_point(),
                    last_use: None,
                    annotations: annotation.iter().cloned().collect(),
                    span: *span,
                    scope,
                    derived_from: derived,
                    returned_at: None,
                    stored_into: Vec::new(),
                    exclusive_use: false,
                });
                self.emit(rid, point, EventKind::Created, *span);
                Some(rid)
            }
            Expr::Closure { captures, span } => {
                for capture in captures {
                    let Some(bid) = self.tree.resolve_before(scope, &capture.name.node, point)
                    else {
                        continue;
                    };
                    match capture.mode {
                        CaptureMode::Move => {
                            self.graph.moves.push((bid, point, capture.name.span));
                        }
                        CaptureMode::Shared | CaptureMode::Exclusive => {
                            let exclusive = capture.mode == CaptureMode::Exclusive;
                            let rid = self.new_reference(ReferenceData {
                                target: bid,
                                kind: if exclusive {
                                    RefKind::Exclusive
                                } else {
                                    RefKind::Shared
                                },
                                origin: RefOrigin::Local,
                                created: point,
                                expired: self.tree.scope(scope).close_point(),
                                last_use: None,
                                annotations: Vec::new(),
                                span: capture.name.span,
                                scope,
                                derived_from: None,
                                returned_at: None,
                                stored_into: Vec::new(),
                                exclusive_use: exclusive,
                            });
                            self.emit(rid, point, EventKind::Created, *span);
                        }
                    }
                }
                None
            }
            Expr::Call(call) => {
                for arg in &call.args {
                    let rid = self.eval_expr(scope, &arg.expr, point);
                    match (arg.access, rid) {
                        (AccessMode::ByValue, None) => {
                            // Passing an owned binding by value transfers
                            // ownership out of the function's hands.
                            if let Expr::Use(name) = &arg.expr {
                                if let Some(bid) =
                                    self.tree.resolve_before(scope, &name.node, point)
                                {
                                    if self.tree.binding(bid).ownership == OwnershipKind::Owned {
                                        self.graph.moves.push((bid, point, name.span));
                                    }
                                }
                            }
                        }
                        (AccessMode::Exclusive, Some(rid)) => {
                            self.mark_exclusive(rid);
                            self.emit(rid, point, EventKind::Written, call.span);
                            self.touch(rid, point);
                        }
                        _ => {}
                    }
                }
                None
            }
        }
    }

    /// A single exclusive use makes the whole reference exclusive.
    fn mark_exclusive(&mut self, rid: RefId) {
        let data = &mut self.graph.references[rid.0 as usize];
        if data.origin == RefOrigin::Local {
            data.kind = RefKind::Exclusive;
        }
        data.exclusive_use = true;
    }

    fn touch(&mut self, rid: RefId, point: ProgramPoint) {
        let data = &mut self.graph.references[rid.0 as usize];
        match data.last_use {
            Some(last) if last >= point => {}
            _ => data.last_use = Some(point),
        }
    }

    fn new_reference(&mut self, data: ReferenceData) -> RefId {
        let id = RefId(self.graph.references.len() as u32);
        self.graph.references.push(data);
        id
    }

    fn emit(&mut self, reference: RefId, point: ProgramPoint, kind: EventKind, span: Span) {
        self.graph.events.push(BorrowEvent {
            reference,
            point,
            kind,
            span,
        });
    }

    fn alloc_point(&mut self) -> ProgramPoint {
        let point = ProgramPoint(self.next_point);
        self.next_point += 1;
        point
    }

    /// Number of scopes whose parent chain passes through `scope`.
    fn count_scopes_below(&self, scope: ScopeId) -> u32 {
        let mut count = 0;
        for (idx, _) in self.tree.scopes().iter().enumerate() {
            let mut current = self.tree.scope(ScopeId(idx as u32)).parent;
            while let Some(parent) = current {
                if parent == scope {
                    count += 1;
                    break;
                }
                current = self.tree.scope(parent).parent;
            }
        }
        count
    }
}

/// Builds the scope tree and reference graph for a function in one call.
pub fn build_graph(func: &FuncIr) -> (ScopeTree, BorrowGraph, Vec<VerifyError>) {
    let (tree, mut errors) = ScopeBuilder::build(func);
    let (graph, graph_errors) = BorrowGraphBuilder::build(func, &tree);
    errors.extend(graph_errors);
    (tree, graph, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tether_ir::{
        AssignStmt, Capture, Ident, LetStmt, Param, ReturnStmt, Signature, Spanned,
    };

    fn ident(name: &str) -> Ident {
        Spanned::dummy(name.into())
    }

    fn func(params: Vec<Param>, stmts: Vec<Stmt>) -> FuncIr {
        FuncIr {
            name: "test_fn".into(),
            unit: "main.tet".into(),
            signature: Signature {
                params,
                ret: None,
                span: Span::dummy(),
            },
            body: Block::new(stmts, Span::dummy()),
            span: Span::dummy(),
        }
    }

    fn let_stmt(name: &str, init: Expr) -> Stmt {
        Stmt::Let(LetStmt {
            name: ident(name),
            shape: None,
            init,
            span: Span::dummy(),
        })
    }

    fn borrow(target: &str) -> Expr {
        Expr::Borrow {
            target: ident(target),
            annotation: None,
            span: Span::dummy(),
        }
    }

    #[test]
    fn test_borrow_creates_reference_with_scoped_interval() {
        // p0 sig; p1 let x; p2 let r = &x; p3 close
        let ir = func(
            vec![],
            vec![
                let_stmt("x", Expr::Lit(Span::dummy())),
                let_stmt("r", borrow("x")),
            ],
        );
        let (tree, graph, errors) = build_graph(&ir);
        assert!(errors.is_empty());
        assert_eq!(graph.references().len(), 1);

        let data = graph.reference(RefId(0));
        assert_eq!(data.origin, RefOrigin::Local);
        assert_eq!(data.kind, RefKind::Shared);
        assert_eq!(
            graph.interval(RefId(0)),
            Extent::new(ProgramPoint(2), ProgramPoint(3))
        );
        let target = tree.binding(data.target);
        assert_eq!(target.name, "x");
    }

    #[test]
    fn test_event_log_is_ordered_and_complete() {
        // p0 sig; p1 let x; p2 let r = &x; p3 return r; p4 close
        let ir = func(
            vec![],
            vec![
                let_stmt("x", Expr::Lit(Span::dummy())),
                let_stmt("r", borrow("x")),
                Stmt::Return(ReturnStmt {
                    value: Some(Expr::Use(ident("r"))),
                    span: Span::dummy(),
                }),
            ],
        );
        let (_, graph, _) = build_graph(&ir);
        let kinds: Vec<_> = graph.events().iter().map(|e| (e.point, e.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (ProgramPoint(2), EventKind::Created),
                (ProgramPoint(3), EventKind::Read),
                (ProgramPoint(4), EventKind::Expired),
            ]
        );
        assert!(graph.reference(RefId(0)).returned_at.is_some());
    }

    #[test]
    fn test_write_through_reference_classifies_exclusive() {
        // p0 sig; p1 let x; p2 let r = &x; p3 r = write; p4 close
        let ir = func(
            vec![],
            vec![
                let_stmt("x", Expr::Lit(Span::dummy())),
                let_stmt("r", borrow("x")),
                Stmt::Assign(AssignStmt {
                    target: ident("r"),
                    value: Expr::Lit(Span::dummy()),
                    span: Span::dummy(),
                }),
            ],
        );
        let (_, graph, _) = build_graph(&ir);
        let data = graph.reference(RefId(0));
        assert_eq!(data.kind, RefKind::Exclusive);
        assert!(graph
            .events()
            .iter()
            .any(|e| e.kind == EventKind::Written && e.point == ProgramPoint(3)));
    }

    #[test]
    fn test_param_reference_keeps_declared_kind() {
        let ir = func(
            vec![Param::new(
                ident("a"),
                TypeShape::reference(RefKind::Shared, TypeShape::value("T")),
            )],
            vec![Stmt::Expr(Expr::Use(ident("a")))],
        );
        let (_, graph, _) = build_graph(&ir);
        let data = graph.reference(RefId(0));
        assert_eq!(data.origin, RefOrigin::Param);
        assert_eq!(data.kind, RefKind::Shared);
        assert_eq!(data.created, ProgramPoint(0));
    }

    #[test]
    fn test_store_to_outer_binding_widens_expiry() {
        // p0 sig; p1 let holder; p2 block; p3 let x; p4 holder = &x;
        // p5 inner close; p6 root close
        let ir = func(
            vec![],
            vec![
                let_stmt("holder", Expr::Lit(Span::dummy())),
                Stmt::Block(Block::new(
                    vec![
                        let_stmt("x", Expr::Lit(Span::dummy())),
                        Stmt::Assign(AssignStmt {
                            target: ident("holder"),
                            value: borrow("x"),
                            span: Span::dummy(),
                        }),
                    ],
                    Span::dummy(),
                )),
            ],
        );
        let (_, graph, _) = build_graph(&ir);
        let data = graph.reference(RefId(0));
        // The store into `holder` keeps the reference reachable until the
        // root scope closes, past its creation scope.
        assert_eq!(data.expired, ProgramPoint(6));
        assert_eq!(data.stored_into.len(), 1);
        assert!(graph
            .events()
            .iter()
            .any(|e| e.kind == EventKind::Expired && e.point == ProgramPoint(6)));
    }

    #[test]
    fn test_move_capture_records_ownership_transfer() {
        let ir = func(
            vec![],
            vec![
                let_stmt("x", Expr::Lit(Span::dummy())),
                Stmt::Expr(Expr::Closure {
                    captures: vec![Capture {
                        name: ident("x"),
                        mode: CaptureMode::Move,
                    }],
                    span: Span::dummy(),
                }),
            ],
        );
        let (tree, graph, _) = build_graph(&ir);
        assert_eq!(graph.moves().len(), 1);
        let (bid, point, _) = graph.moves()[0];
        assert_eq!(tree.binding(bid).name, "x");
        assert_eq!(point, ProgramPoint(2));
    }

    #[test]
    fn test_exclusive_capture_creates_exclusive_reference() {
        let ir = func(
            vec![],
            vec![
                let_stmt("x", Expr::Lit(Span::dummy())),
                Stmt::Expr(Expr::Closure {
                    captures: vec![Capture {
                        name: ident("x"),
                        mode: CaptureMode::Exclusive,
                    }],
                    span: Span::dummy(),
                }),
            ],
        );
        let (_, graph, _) = build_graph(&ir);
        assert_eq!(graph.references().len(), 1);
        assert!(graph.reference(RefId(0)).exclusive_use);
    }

    #[test]
    fn test_reborrow_tracks_underlying_target() {
        // A borrow of a binding holding a reference points at the original
        // storage, not the holder.
        let ir = func(
            vec![],
            vec![
                let_stmt("x", Expr::Lit(Span::dummy())),
                let_stmt("r", borrow("x")),
                let_stmt("s", borrow("r")),
            ],
        );
        let (tree, graph, _) = build_graph(&ir);
        assert_eq!(graph.references().len(), 2);
        let reborrow = graph.reference(RefId(1));
        assert_eq!(reborrow.derived_from, Some(RefId(0)));
        assert_eq!(tree.binding(reborrow.target).name, "x");
    }

    #[test]
    fn test_let_of_outer_name_sees_outer_binding() {
        // `let x = &x` borrows the outer x, not the new binding.
        let ir = func(
            vec![],
            vec![
                let_stmt("x", Expr::Lit(Span::dummy())),
                let_stmt("x", borrow("x")),
            ],
        );
        let (tree, graph, errors) = build_graph(&ir);
        assert!(errors.is_empty());
        assert_eq!(graph.references().len(), 1);
        let target = tree.binding(graph.reference(RefId(0)).target);
        assert_eq!(target.decl_point, ProgramPoint(1));
    }

    #[test]
    fn test_by_value_call_arg_moves_owned_binding() {
        let ir = func(
            vec![],
            vec![
                let_stmt("x", Expr::Lit(Span::dummy())),
                Stmt::Expr(Expr::Call(tether_ir::CallExpr {
                    callee: ident("consume"),
                    args: vec![tether_ir::CallArg {
                        expr: Expr::Use(ident("x")),
                        access: AccessMode::ByValue,
                    }],
                    span: Span::dummy(),
                })),
            ],
        );
        let (tree, graph, _) = build_graph(&ir);
        assert_eq!(graph.moves().len(), 1);
        assert_eq!(tree.binding(graph.moves()[0].0).name, "x");
    }
}
