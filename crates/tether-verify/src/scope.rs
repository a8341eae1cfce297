//! Binding & Scope Builder.
//!
//! Walks a function's body into a scope tree and a binding table, assigning
//! dense program points in a single pre-order pass. Every scope's extent is
//! a contiguous sub-range of its parent's by construction: a block consumes
//! one entry point in its parent, its statements consume the following
//! points, and a dedicated close point ends the scope (borrow expiry lands
//! there under the lexical-scope-end model).
//!
//! Composite type shapes are validated here: a composite may never store a
//! reference field without a region parameter. Each shape is checked once
//! per function and the result cached by composite name.

use crate::error::VerifyError;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tether_ir::{
    Block, Extent, FieldShape, FuncIr, ProgramPoint, RefKind, Span, Stmt, TypeShape,
};

/// Index of a scope in the tree, in pre-order creation order.
///
/// `ScopeId(0)` is always the function body's root scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// Index of a binding in the binding table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub u32);

/// How a binding relates to the storage it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipKind {
    /// The binding owns its storage; it is freed at scope end.
    Owned,
    /// A parameter that is itself a reference into caller storage.
    ByReference(RefKind),
}

/// One lexical scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeData {
    pub parent: Option<ScopeId>,
    /// The contiguous range of program points this scope covers. The last
    /// point of the range is the scope's close point.
    pub extent: Extent,
    /// Bindings declared directly in this scope, in declaration order.
    pub bindings: Vec<BindingId>,
}

impl ScopeData {
    /// The point where this scope closes; Expired events land here.
    pub fn close_point(&self) -> ProgramPoint {
        ProgramPoint(self.extent.end.0.saturating_sub(1))
    }
}

/// One named storage location.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingData {
    pub name: SmolStr,
    pub scope: ScopeId,
    pub ownership: OwnershipKind,
    /// Declared type shape, if the source wrote one.
    pub shape: Option<TypeShape>,
    /// The point at which the binding comes into existence.
    pub decl_point: ProgramPoint,
    pub span: Span,
}

/// The scope tree and binding table for one function.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTree {
    scopes: Vec<ScopeData>,
    bindings: Vec<BindingData>,
}

impl ScopeTree {
    /// The function body's root scope.
    pub fn root() -> ScopeId {
        ScopeId(0)
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.0 as usize]
    }

    pub fn binding(&self, id: BindingId) -> &BindingData {
        &self.bindings[id.0 as usize]
    }

    pub fn scopes(&self) -> &[ScopeData] {
        &self.scopes
    }

    pub fn bindings(&self) -> &[BindingData] {
        &self.bindings
    }

    /// Resolves `name` as seen from `scope` at point `at`, including a
    /// binding declared exactly at `at`. Later declarations shadow earlier
    /// ones within a scope.
    pub fn resolve(&self, scope: ScopeId, name: &str, at: ProgramPoint) -> Option<BindingId> {
        self.resolve_at(scope, name, at, true)
    }

    /// Resolves `name` as seen from `scope` strictly before point `at`.
    /// Used for initializer expressions, so `let x = &x` sees the outer `x`.
    pub fn resolve_before(&self, scope: ScopeId, name: &str, at: ProgramPoint) -> Option<BindingId> {
        self.resolve_at(scope, name, at, false)
    }

    fn resolve_at(
        &self,
        scope: ScopeId,
        name: &str,
        at: ProgramPoint,
        inclusive: bool,
    ) -> Option<BindingId> {
        let mut current = Some(scope);
        while let Some(sid) = current {
            let data = self.scope(sid);
            for &bid in data.bindings.iter().rev() {
                let binding = self.binding(bid);
                let visible = if inclusive {
                    binding.decl_point <= at
                } else {
                    binding.decl_point < at
                };
                if visible && binding.name == name {
                    return Some(bid);
                }
            }
            current = data.parent;
        }
        None
    }

    /// The interval over which a binding's storage is live: from its
    /// declaration to the end of its declaring scope. Ownership transfers
    /// (moves) truncate this further; see the solver.
    pub fn live_extent(&self, id: BindingId) -> Extent {
        let binding = self.binding(id);
        Extent::new(binding.decl_point, self.scope(binding.scope).extent.end)
    }
}

/// Builds the scope tree and binding table for one function.
pub struct ScopeBuilder<'ir> {
    func: &'ir FuncIr,
    scopes: Vec<ScopeData>,
    bindings: Vec<BindingData>,
    errors: Vec<VerifyError>,
    /// Composite shapes already validated, by name.
    checked_shapes: FxHashMap<SmolStr, ()>,
    next_point: u32,
}

impl<'ir> ScopeBuilder<'ir> {
    /// Builds the scope tree for `func`, returning it together with any
    /// shape-validation errors. Errors never abort the build.
    pub fn build(func: &'ir FuncIr) -> (ScopeTree, Vec<VerifyError>) {
        let mut builder = Self {
            func,
            scopes: Vec::new(),
            bindings: Vec::new(),
            errors: Vec::new(),
            checked_shapes: FxHashMap::default(),
            next_point: 0,
        };
        builder.run();
        (
            ScopeTree {
                scopes: builder.scopes,
                bindings: builder.bindings,
            },
            builder.errors,
        )
    }

    fn run(&mut self) {
        let func = self.func;
        self.scopes.push(ScopeData {
            parent: None,
            extent: Extent::new(ProgramPoint(0), ProgramPoint(0)),
            bindings: Vec::new(),
        });

        // All parameters come into existence at the signature point.
        let sig_point = self.alloc_point();
        for param in &func.signature.params {
            self.check_shape(&param.shape, param.name.span);
            let ownership = match &param.shape {
                TypeShape::Ref(node) => OwnershipKind::ByReference(node.kind),
                _ => OwnershipKind::Owned,
            };
            self.declare(
                ScopeTree::root(),
                param.name.node.clone(),
                ownership,
                Some(param.shape.clone()),
                sig_point,
                param.name.span,
            );
        }
        if let Some(ret) = &func.signature.ret {
            self.check_shape(ret, func.signature.span);
        }

        self.walk_block(ScopeTree::root(), &func.body);
    }

    /// Visits a block's statements and closes the scope. The scope's start
    /// point must already be set by the caller.
    fn walk_block(&mut self, scope: ScopeId, block: &'ir Block) {
        for stmt in &block.stmts {
            let point = self.alloc_point();
            match stmt {
                Stmt::Let(stmt) => {
                    if let Some(shape) = &stmt.shape {
                        self.check_shape(shape, stmt.span);
                    }
                    self.declare(
                        scope,
                        stmt.name.node.clone(),
                        OwnershipKind::Owned,
                        stmt.shape.clone(),
                        point,
                        stmt.name.span,
                    );
                }
                Stmt::Block(inner) => {
                    let child = self.push_scope(scope);
                    self.walk_block(child, inner);
                }
                Stmt::Assign(_) | Stmt::Expr(_) | Stmt::Return(_) => {}
            }
        }
        let close = self.alloc_point();
        self.scopes[scope.0 as usize].extent.end = ProgramPoint(close.0 + 1);
    }

    fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeData {
            parent: Some(parent),
            extent: Extent::new(ProgramPoint(self.next_point), ProgramPoint(self.next_point)),
            bindings: Vec::new(),
        });
        id
    }

    fn declare(
        &mut self,
        scope: ScopeId,
        name: SmolStr,
        ownership: OwnershipKind,
        shape: Option<TypeShape>,
        decl_point: ProgramPoint,
        span: Span,
    ) -> BindingId {
        let id = BindingId(self.bindings.len() as u32);
        self.bindings.push(BindingData {
            name,
            scope,
            ownership,
            shape,
            decl_point,
            span,
        });
        self.scopes[scope.0 as usize].bindings.push(id);
        id
    }

    fn alloc_point(&mut self) -> ProgramPoint {
        let point = ProgramPoint(self.next_point);
        self.next_point += 1;
        point
    }

    /// It is never legal to store a reference in a reusable structure
    /// without stating how long it may remain valid. Composites are found
    /// wherever they appear in a shape, including behind references and
    /// inside other composites' fields.
    fn check_shape(&mut self, shape: &TypeShape, span: Span) {
        match shape {
            TypeShape::Value(_) => {}
            TypeShape::Ref(node) => self.check_shape(&node.target, span),
            TypeShape::Composite { name, fields } => {
                if self.checked_shapes.contains_key(name) {
                    return;
                }
                self.checked_shapes.insert(name.clone(), ());
                for field in fields {
                    self.check_field(name, field, span);
                    self.check_shape(&field.shape, span);
                }
            }
        }
    }

    /// Checks the field's direct reference chain. A nested composite is
    /// checked under its own name by `check_shape`.
    fn check_field(&mut self, composite: &SmolStr, field: &FieldShape, span: Span) {
        let mut shape = &field.shape;
        while let TypeShape::Ref(node) = shape {
            if node.annotation.is_none() {
                self.errors.push(VerifyError::UnresolvedFieldRegion {
                    shape: composite.clone(),
                    field: field.name.clone(),
                    span,
                });
            }
            shape = &node.target;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tether_ir::{
        Expr, Ident, LetStmt, Param, RegionAnnotation, Signature, Spanned,
    };

    fn ident(name: &str) -> Ident {
        Spanned::dummy(name.into())
    }

    fn lit() -> Expr {
        Expr::Lit(Span::dummy())
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

    #[test]
    fn test_nested_scope_extents_are_contiguous() {
        // p0 signature; p1 let x; p2 block entry; p3 let y; p4 inner close;
        // p5 root close
        let ir = func(
            vec![],
            vec![
                let_stmt("x", lit()),
                Stmt::Block(Block::new(vec![let_stmt("y", lit())], Span::dummy())),
            ],
        );
        let (tree, errors) = ScopeBuilder::build(&ir);
        assert!(errors.is_empty());
        assert_eq!(tree.scopes().len(), 2);

        let root = tree.scope(ScopeTree::root());
        let inner = tree.scope(ScopeId(1));
        assert_eq!(root.extent, Extent::new(ProgramPoint(0), ProgramPoint(6)));
        assert_eq!(inner.extent, Extent::new(ProgramPoint(3), ProgramPoint(5)));
        assert!(root.extent.covers(&inner.extent));
        assert_eq!(inner.parent, Some(ScopeTree::root()));
    }

    #[test]
    fn test_resolution_walks_outward_and_respects_shadowing() {
        let ir = func(
            vec![],
            vec![
                let_stmt("x", lit()),
                Stmt::Block(Block::new(vec![let_stmt("x", lit())], Span::dummy())),
            ],
        );
        let (tree, _) = ScopeBuilder::build(&ir);

        let outer_x = tree.resolve(ScopeTree::root(), "x", ProgramPoint(1)).unwrap();
        let inner_x = tree.resolve(ScopeId(1), "x", ProgramPoint(3)).unwrap();
        assert_ne!(outer_x, inner_x);

        // Before the inner declaration, the inner scope still sees the outer.
        assert_eq!(
            tree.resolve_before(ScopeId(1), "x", ProgramPoint(3)),
            Some(outer_x)
        );
        // The inner binding never leaks outward.
        assert_eq!(
            tree.resolve(ScopeTree::root(), "x", ProgramPoint(5)),
            Some(outer_x)
        );
    }

    #[test]
    fn test_reference_param_ownership() {
        let ir = func(
            vec![
                Param::new(ident("a"), TypeShape::reference(RefKind::Shared, TypeShape::value("T"))),
                Param::new(ident("n"), TypeShape::value("Int")),
            ],
            vec![],
        );
        let (tree, errors) = ScopeBuilder::build(&ir);
        assert!(errors.is_empty());

        let a = tree.resolve(ScopeTree::root(), "a", ProgramPoint(0)).unwrap();
        let n = tree.resolve(ScopeTree::root(), "n", ProgramPoint(0)).unwrap();
        assert_eq!(
            tree.binding(a).ownership,
            OwnershipKind::ByReference(RefKind::Shared)
        );
        assert_eq!(tree.binding(n).ownership, OwnershipKind::Owned);
    }

    #[test]
    fn test_composite_without_region_parameter_is_rejected() {
        let bad = TypeShape::Composite {
            name: "Holder".into(),
            fields: vec![FieldShape {
                name: "inner".into(),
                shape: TypeShape::reference(RefKind::Shared, TypeShape::value("T")),
            }],
        };
        let ir = func(vec![Param::new(ident("h"), bad)], vec![]);
        let (_, errors) = ScopeBuilder::build(&ir);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            VerifyError::UnresolvedFieldRegion { shape, field, .. }
                if shape == "Holder" && field == "inner"
        ));
    }

    #[test]
    fn test_composite_check_is_cached_per_shape() {
        let bad = TypeShape::Composite {
            name: "Holder".into(),
            fields: vec![FieldShape {
                name: "inner".into(),
                shape: TypeShape::reference(RefKind::Shared, TypeShape::value("T")),
            }],
        };
        // The same shape appears twice; the error is reported once.
        let ir = func(
            vec![
                Param::new(ident("a"), bad.clone()),
                Param::new(ident("b"), bad),
            ],
            vec![],
        );
        let (_, errors) = ScopeBuilder::build(&ir);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_composite_behind_reference_is_still_checked() {
        let bad = TypeShape::Composite {
            name: "Holder".into(),
            fields: vec![FieldShape {
                name: "inner".into(),
                shape: TypeShape::reference(RefKind::Shared, TypeShape::value("T")),
            }],
        };
        // The parameter is `&Holder`, not `Holder`.
        let ir = func(
            vec![Param::new(
                ident("h"),
                TypeShape::reference(RefKind::Shared, bad),
            )],
            vec![],
        );
        let (_, errors) = ScopeBuilder::build(&ir);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            VerifyError::UnresolvedFieldRegion { shape, .. } if shape == "Holder"
        ));
    }

    #[test]
    fn test_nested_composite_field_is_checked_under_its_own_name() {
        let inner = TypeShape::Composite {
            name: "Inner".into(),
            fields: vec![FieldShape {
                name: "leaked".into(),
                shape: TypeShape::reference(RefKind::Shared, TypeShape::value("T")),
            }],
        };
        let outer = TypeShape::Composite {
            name: "Outer".into(),
            fields: vec![FieldShape {
                name: "wrapped".into(),
                shape: inner,
            }],
        };
        let ir = func(vec![Param::new(ident("o"), outer)], vec![]);
        let (_, errors) = ScopeBuilder::build(&ir);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            VerifyError::UnresolvedFieldRegion { shape, field, .. }
                if shape == "Inner" && field == "leaked"
        ));
    }

    #[test]
    fn test_annotated_composite_field_is_accepted() {
        let good = TypeShape::Composite {
            name: "Holder".into(),
            fields: vec![FieldShape {
                name: "inner".into(),
                shape: TypeShape::annotated_reference(
                    RefKind::Shared,
                    RegionAnnotation::Named("a".into()),
                    TypeShape::value("T"),
                ),
            }],
        };
        let ir = func(vec![Param::new(ident("h"), good)], vec![]);
        let (_, errors) = ScopeBuilder::build(&ir);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_live_extent_spans_decl_to_scope_end() {
        let ir = func(
            vec![],
            vec![
                let_stmt("x", lit()),
                Stmt::Block(Block::new(vec![let_stmt("y", lit())], Span::dummy())),
            ],
        );
        let (tree, _) = ScopeBuilder::build(&ir);
        let x = tree.resolve(ScopeTree::root(), "x", ProgramPoint(1)).unwrap();
        let y = tree.resolve(ScopeId(1), "y", ProgramPoint(3)).unwrap();
        assert_eq!(tree.live_extent(x), Extent::new(ProgramPoint(1), ProgramPoint(6)));
        assert_eq!(tree.live_extent(y), Extent::new(ProgramPoint(3), ProgramPoint(5)));
    }
}
