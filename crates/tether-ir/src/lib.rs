//! Tether Verifier IR
//!
//! Defines the function-level representation handed to the verifier by the
//! upstream parser/type-checker, and the region-annotated representation the
//! verifier hands back to code generation.
//!
//! The IR deliberately carries only what the verifier needs: binding
//! declarations with their declared type shapes, the expressions that create
//! and use references, capture-mode tags for closure-like units, and optional
//! explicit region annotations. Types, trait resolution, and evaluation
//! semantics are upstream concerns and never appear here.

// Re-export the identifier type for use by other crates
pub use smol_str::SmolStr;

use std::fmt;
use std::ops::Range;

/// Source span representing a range in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

impl From<Span> for Range<usize> {
    fn from(span: Span) -> Self {
        span.start..span.end
    }
}

/// A spanned value - wraps any value with source location info
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn dummy(node: T) -> Self {
        Self {
            node,
            span: Span::dummy(),
        }
    }
}

/// Identifier (binding names, function names)
pub type Ident = Spanned<SmolStr>;

// ============================================================================
// Program Points & Extents
// ============================================================================

/// A position in the linearized function body.
///
/// Points are dense indices assigned in a single pre-order walk of the
/// body, so every lexical scope covers a contiguous range of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProgramPoint(pub u32);

impl fmt::Display for ProgramPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A half-open interval `[start, end)` of program points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    pub start: ProgramPoint,
    pub end: ProgramPoint,
}

impl Extent {
    pub fn new(start: ProgramPoint, end: ProgramPoint) -> Self {
        Self { start, end }
    }

    /// Returns true if the interval contains no points.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns true if `point` falls inside this interval.
    pub fn contains(&self, point: ProgramPoint) -> bool {
        point >= self.start && point < self.end
    }

    /// Returns true if the two intervals share at least one point.
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if this interval contains the whole of `other`.
    pub fn covers(&self, other: &Extent) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// The smallest interval containing both inputs.
    pub fn hull(&self, other: &Extent) -> Extent {
        Extent {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A solved validity region: either the whole-program static region or a
/// concrete interval of program points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionExtent {
    /// Valid for the entire program. The unique top element.
    Static,
    /// Valid for a concrete interval inside one function body.
    Points(Extent),
}

impl RegionExtent {
    /// Returns true if this extent contains the whole of `other`.
    pub fn covers(&self, other: &RegionExtent) -> bool {
        match (self, other) {
            (RegionExtent::Static, _) => true,
            (RegionExtent::Points(_), RegionExtent::Static) => false,
            (RegionExtent::Points(a), RegionExtent::Points(b)) => a.covers(b),
        }
    }
}

impl fmt::Display for RegionExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionExtent::Static => write!(f, "'static"),
            RegionExtent::Points(extent) => write!(f, "{extent}"),
        }
    }
}

// ============================================================================
// References & Regions (declared forms)
// ============================================================================

/// Whether a reference permits mutation of its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Read-only access. Many may be live at once.
    Shared,
    /// Read-write access. At most one may be live at a time per binding.
    Exclusive,
}

impl RefKind {
    pub fn is_shared(&self) -> bool {
        matches!(self, RefKind::Shared)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, RefKind::Exclusive)
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Shared => write!(f, "shared"),
            RefKind::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// An explicit region annotation written in the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegionAnnotation {
    /// The `'static` region.
    Static,
    /// A named region parameter, e.g. `'a`.
    Named(SmolStr),
}

impl fmt::Display for RegionAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionAnnotation::Static => write!(f, "'static"),
            RegionAnnotation::Named(name) => write!(f, "'{name}"),
        }
    }
}

// ============================================================================
// Type Shapes
// ============================================================================

/// The shape of a declared type, as far as the verifier cares.
///
/// Only the reference structure matters here: every `Ref` node is a place
/// that needs a region, and composite shapes may bury references inside
/// fields, each needing its own region parameter slot.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeShape {
    /// An owned, opaque value type (`Int`, `String`, ...).
    Value(SmolStr),
    /// A reference to another shape.
    Ref(RefShape),
    /// A named composite with fields, any of which may hold references.
    Composite {
        name: SmolStr,
        fields: Vec<FieldShape>,
    },
}

/// A reference node inside a type shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RefShape {
    pub kind: RefKind,
    /// Explicit region annotation, if the source wrote one.
    pub annotation: Option<RegionAnnotation>,
    pub target: Box<TypeShape>,
}

/// A named field of a composite shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldShape {
    pub name: SmolStr,
    pub shape: TypeShape,
}

impl TypeShape {
    /// Convenience constructor for an opaque value shape.
    pub fn value(name: impl Into<SmolStr>) -> Self {
        TypeShape::Value(name.into())
    }

    /// Convenience constructor for an unannotated reference shape.
    pub fn reference(kind: RefKind, target: TypeShape) -> Self {
        TypeShape::Ref(RefShape {
            kind,
            annotation: None,
            target: Box::new(target),
        })
    }

    /// Convenience constructor for an annotated reference shape.
    pub fn annotated_reference(
        kind: RefKind,
        annotation: RegionAnnotation,
        target: TypeShape,
    ) -> Self {
        TypeShape::Ref(RefShape {
            kind,
            annotation: Some(annotation),
            target: Box::new(target),
        })
    }

    /// Returns true if the top of this shape is a reference.
    pub fn is_ref(&self) -> bool {
        matches!(self, TypeShape::Ref(_))
    }

    /// Collects every reference node in this shape, outermost first.
    pub fn ref_nodes(&self) -> Vec<&RefShape> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'shape>(&'shape self, out: &mut Vec<&'shape RefShape>) {
        match self {
            TypeShape::Value(_) => {}
            TypeShape::Ref(node) => {
                out.push(node);
                node.target.collect_refs(out);
            }
            TypeShape::Composite { fields, .. } => {
                for field in fields {
                    field.shape.collect_refs(out);
                }
            }
        }
    }
}

// ============================================================================
// Closure Captures
// ============================================================================

/// How a closure-like unit captures a binding.
///
/// This tag is the entire interface to the (excluded) closure runtime: the
/// verifier maps each mode to an ordinary borrow event or to an ownership
/// transfer, and never looks at how the closure executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureMode {
    /// Captured for reading - behaves as a shared reference.
    Shared,
    /// Captured for mutation - behaves as an exclusive reference.
    Exclusive,
    /// Ownership moves into the closure - the binding's life ends here.
    Move,
}

/// One captured binding of a closure-like unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: Ident,
    pub mode: CaptureMode,
}

// ============================================================================
// Expressions
// ============================================================================

/// How a call consumes one of its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// The callee takes ownership of the argument.
    ByValue,
    /// The callee's parameter is a shared reference.
    Shared,
    /// The callee's parameter requires exclusive access.
    Exclusive,
}

/// An expression, reduced to the events the verifier can observe.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal or other reference-free value.
    Lit(Span),
    /// A read of a binding (or of the reference stored in one).
    Use(Ident),
    /// Creation of a reference to a binding. If the target binding itself
    /// holds a reference, this is a derived (re)borrow of that reference.
    ///
    /// The borrow carries no shared/exclusive kind: the Reference Graph
    /// Builder classifies it from how the result is used.
    Borrow {
        target: Ident,
        annotation: Option<RegionAnnotation>,
        span: Span,
    },
    /// A closure-like unit with its capture list.
    Closure { captures: Vec<Capture>, span: Span },
    /// A call to an out-of-scope function.
    Call(CallExpr),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Lit(span) => *span,
            Expr::Use(ident) => ident.span,
            Expr::Borrow { span, .. } => *span,
            Expr::Closure { span, .. } => *span,
            Expr::Call(call) => call.span,
        }
    }
}

/// A call with per-argument access requirements.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Ident,
    pub args: Vec<CallArg>,
    pub span: Span,
}

/// One call argument together with how the callee consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    pub expr: Expr,
    pub access: AccessMode,
}

// ============================================================================
// Statements
// ============================================================================

/// A statement in the function body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let(LetStmt),
    Assign(AssignStmt),
    Expr(Expr),
    Block(Block),
    Return(ReturnStmt),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let(stmt) => stmt.span,
            Stmt::Assign(stmt) => stmt.span,
            Stmt::Expr(expr) => expr.span(),
            Stmt::Block(block) => block.span,
            Stmt::Return(stmt) => stmt.span,
        }
    }
}

/// `let name[: shape] = init` - declares a binding.
#[derive(Debug, Clone, PartialEq)]
pub struct LetStmt {
    pub name: Ident,
    /// Declared shape, if the source wrote one. A reference shape here may
    /// carry an explicit region annotation.
    pub shape: Option<TypeShape>,
    pub init: Expr,
    pub span: Span,
}

/// `target = value` - a write to a binding, or through the reference a
/// binding holds.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    pub target: Ident,
    pub value: Expr,
    pub span: Span,
}

/// `return [value]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

/// A braced lexical scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Self { stmts, span }
    }
}

// ============================================================================
// Functions
// ============================================================================

/// A function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub shape: TypeShape,
    /// True for a method's implicit receiver (elision rule 3).
    pub is_receiver: bool,
}

impl Param {
    pub fn new(name: Ident, shape: TypeShape) -> Self {
        Self {
            name,
            shape,
            is_receiver: false,
        }
    }

    pub fn receiver(name: Ident, shape: TypeShape) -> Self {
        Self {
            name,
            shape,
            is_receiver: true,
        }
    }
}

/// A function signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<Param>,
    pub ret: Option<TypeShape>,
    pub span: Span,
}

/// One independent analysis unit: a function with its signature and body.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncIr {
    pub name: SmolStr,
    /// Name of the source unit the function's spans point into.
    pub unit: SmolStr,
    pub signature: Signature,
    pub body: Block,
    pub span: Span,
}

// ============================================================================
// Annotated Output
// ============================================================================

/// Where in a signature a solved region lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignaturePosition {
    /// A reference-typed parameter, by name.
    Param(SmolStr),
    /// A reference in the return shape.
    Return,
}

impl fmt::Display for SignaturePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignaturePosition::Param(name) => write!(f, "parameter `{name}`"),
            SignaturePosition::Return => write!(f, "return position"),
        }
    }
}

/// A solved region for one signature position.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureRegion {
    pub position: SignaturePosition,
    pub extent: RegionExtent,
}

/// A solved region for one reference created in the body, in creation order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceRegion {
    /// Name of the binding the reference targets.
    pub target: SmolStr,
    pub kind: RefKind,
    pub created: ProgramPoint,
    pub extent: RegionExtent,
    pub span: Span,
}

/// The verifier's accepting output: the input function with every region
/// variable replaced by its solved concrete extent.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedFunc {
    pub name: SmolStr,
    pub signature_regions: Vec<SignatureRegion>,
    pub reference_regions: Vec<ReferenceRegion>,
    pub span: Span,
}
