//! Region Inference Engine.
//!
//! Assigns a region variable to every reference in a function - signature
//! references from their annotations or the elision rules, body references
//! from the borrow that created them - and collects the outlives
//! constraints and extent requirements the solver will discharge.
//!
//! Elision follows three rules, tried in order for an unannotated return
//! reference:
//!
//! 1. every unannotated input reference gets its own fresh region;
//! 2. if the inputs collapse to exactly one distinct region, the return
//!    reference shares it;
//! 3. otherwise, if the function has a receiver parameter, the return
//!    reference shares the receiver's region.
//!
//! When all three fail the return region is ambiguous. The error carries a
//! ready-to-apply annotation that unifies every signature reference under
//! one named region, and inference continues with a fresh variable so the
//! rest of the function is still checked.

use crate::borrows::{BorrowGraph, RefOrigin};
use crate::error::VerifyError;
use crate::scope::ScopeTree;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tether_ir::{
    Extent, FuncIr, RefKind, RegionAnnotation, Signature, SignaturePosition, Span, TypeShape,
};

/// A region variable. `RegionVid(0)` is always the static region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionVid(pub u32);

/// The static region's variable, allocated before all others.
pub const STATIC_REGION: RegionVid = RegionVid(0);

/// A union-find arena of region variables.
///
/// Unification is how explicit annotations take effect: two references
/// annotated with the same name end up in one equivalence class, and the
/// solver computes a single extent for the class.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegionTable {
    parent: Vec<u32>,
}

impl RegionTable {
    /// A table with only the static region.
    pub fn new() -> Self {
        let mut table = Self { parent: Vec::new() };
        table.fresh();
        table
    }

    pub fn fresh(&mut self) -> RegionVid {
        let vid = RegionVid(self.parent.len() as u32);
        self.parent.push(vid.0);
        vid
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// The representative of `vid`'s equivalence class, with path
    /// compression.
    pub fn find(&mut self, vid: RegionVid) -> RegionVid {
        let mut root = vid.0;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut current = vid.0;
        while self.parent[current as usize] != root {
            let next = self.parent[current as usize];
            self.parent[current as usize] = root;
            current = next;
        }
        RegionVid(root)
    }

    /// Merges two classes. The static region always stays the
    /// representative of any class it joins.
    pub fn unify(&mut self, a: RegionVid, b: RegionVid) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        if rb == STATIC_REGION {
            self.parent[ra.0 as usize] = rb.0;
        } else {
            self.parent[rb.0 as usize] = ra.0;
        }
    }
}

/// `extent(longer)` must cover `extent(shorter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constraint {
    pub longer: RegionVid,
    pub shorter: RegionVid,
    /// Where the constraint arose, for blame in diagnostics.
    pub span: Span,
}

/// A lower bound on a region's extent, established directly by a use.
#[derive(Debug, Clone, PartialEq)]
pub struct Requirement {
    pub region: RegionVid,
    pub extent: Extent,
    pub span: Span,
}

/// Everything inference produced for one function.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub table: RegionTable,
    /// Region variable of each reference, indexed by `RefId`.
    pub ref_regions: Vec<RegionVid>,
    /// Primary region of each reference-typed parameter, in signature
    /// order.
    pub param_regions: Vec<(SmolStr, RegionVid)>,
    /// Region of the return reference, if the function returns one.
    pub return_region: Option<RegionVid>,
    pub constraints: Vec<Constraint>,
    pub requirements: Vec<Requirement>,
    pub errors: Vec<VerifyError>,
}

/// Runs region inference for one function.
pub struct RegionInference<'a> {
    func: &'a FuncIr,
    tree: &'a ScopeTree,
    graph: &'a BorrowGraph,
    table: RegionTable,
    /// Named annotations seen so far, in first-use order.
    annotations: IndexMap<SmolStr, RegionVid>,
    constraints: Vec<Constraint>,
    requirements: Vec<Requirement>,
    errors: Vec<VerifyError>,
}

impl<'a> RegionInference<'a> {
    pub fn infer(func: &'a FuncIr, tree: &'a ScopeTree, graph: &'a BorrowGraph) -> InferenceResult {
        let mut engine = Self {
            func,
            tree,
            graph,
            table: RegionTable::new(),
            annotations: IndexMap::new(),
            constraints: Vec::new(),
            requirements: Vec::new(),
            errors: Vec::new(),
        };
        engine.run()
    }

    fn run(&mut self) -> InferenceResult {
        let root_extent = self.tree.scope(ScopeTree::root()).extent;

        // Signature references first: annotations bind names, elision
        // fills the gaps.
        let mut param_regions = Vec::new();
        let mut param_primary: FxHashMap<SmolStr, RegionVid> = FxHashMap::default();
        let mut receiver_region = None;
        for param in &self.func.signature.params {
            let mut primary = None;
            for node in param.shape.ref_nodes() {
                let vid = self.region_for(node.annotation.as_ref());
                if primary.is_none() {
                    primary = Some(vid);
                }
                self.requirements.push(Requirement {
                    region: vid,
                    extent: root_extent,
                    span: param.name.span,
                });
            }
            if let Some(vid) = primary {
                if param.is_receiver {
                    receiver_region = Some(vid);
                }
                param_primary.insert(param.name.node.clone(), vid);
                param_regions.push((param.name.node.clone(), vid));
            }
        }

        let return_region = self.infer_return(&param_regions, receiver_region, root_extent);

        // Body references: annotation if present, fresh otherwise. A
        // parameter's synthesized reference shares the parameter's region.
        let mut ref_regions = Vec::with_capacity(self.graph.references().len());
        for data in self.graph.references() {
            let vid = match data.origin {
                RefOrigin::Param => {
                    let name = &self.tree.binding(data.target).name;
                    match param_primary.get(name) {
                        Some(&vid) => vid,
                        None => self.table.fresh(),
                    }
                }
                RefOrigin::Local => {
                    let vid = self.region_for(data.annotations.first());
                    for extra in data.annotations.iter().skip(1) {
                        let other = self.region_for(Some(extra));
                        self.table.unify(vid, other);
                    }
                    vid
                }
            };
            ref_regions.push(vid);
        }

        for (idx, data) in self.graph.references().iter().enumerate() {
            let vid = ref_regions[idx];

            // A reference must at least span its own outstanding interval.
            if data.origin == RefOrigin::Local {
                self.requirements.push(Requirement {
                    region: vid,
                    extent: Extent::new(data.created, data.expired),
                    span: data.span,
                });
            }

            // A reborrow cannot outlive what it was derived from.
            if let Some(src) = data.derived_from {
                self.constraints.push(Constraint {
                    longer: ref_regions[src.0 as usize],
                    shorter: vid,
                    span: data.span,
                });
            }

            // Returning ties the reference to the return region; without a
            // declared return reference it must cover the whole body.
            if let Some(span) = data.returned_at {
                match return_region {
                    Some(ret) => self.constraints.push(Constraint {
                        longer: vid,
                        shorter: ret,
                        span,
                    }),
                    None => self.requirements.push(Requirement {
                        region: vid,
                        extent: root_extent,
                        span,
                    }),
                }
            }

            // A store into a binding keeps the reference live until that
            // binding's scope ends.
            for &(bid, point, span) in &data.stored_into {
                let scope = self.tree.binding(bid).scope;
                self.requirements.push(Requirement {
                    region: vid,
                    extent: Extent::new(point, self.tree.scope(scope).extent.end),
                    span,
                });
            }
        }

        InferenceResult {
            table: std::mem::take(&mut self.table),
            ref_regions,
            param_regions,
            return_region,
            constraints: std::mem::take(&mut self.constraints),
            requirements: std::mem::take(&mut self.requirements),
            errors: std::mem::take(&mut self.errors),
        }
    }

    /// Resolves a region for every reference node of the return shape.
    /// Unannotated nodes share a single elided region; the primary
    /// (outermost) node's region is the function's return region.
    fn infer_return(
        &mut self,
        param_regions: &[(SmolStr, RegionVid)],
        receiver_region: Option<RegionVid>,
        root_extent: Extent,
    ) -> Option<RegionVid> {
        let ret = self.func.signature.ret.as_ref()?;
        let nodes = ret.ref_nodes();

        let mut elided = None;
        let mut primary = None;
        for node in &nodes {
            let vid = match &node.annotation {
                Some(annotation) => self.region_for(Some(annotation)),
                None => match elided {
                    Some(vid) => vid,
                    None => {
                        let vid = self.elide_return(param_regions, receiver_region);
                        elided = Some(vid);
                        vid
                    }
                },
            };
            self.requirements.push(Requirement {
                region: vid,
                extent: root_extent,
                span: self.func.signature.span,
            });
            if primary.is_none() {
                primary = Some(vid);
            }
        }
        primary
    }

    /// Elision rules 2 and 3 for an unannotated return reference.
    fn elide_return(
        &mut self,
        param_regions: &[(SmolStr, RegionVid)],
        receiver_region: Option<RegionVid>,
    ) -> RegionVid {
        let mut roots: Vec<RegionVid> = Vec::new();
        for &(_, vid) in param_regions {
            let root = self.table.find(vid);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        if roots.len() == 1 {
            roots[0]
        } else if let Some(receiver) = receiver_region {
            receiver
        } else {
            self.errors.push(VerifyError::AmbiguousRegion {
                func: self.func.name.clone(),
                position: SignaturePosition::Return,
                span: self.func.signature.span,
                suggestion: unified_annotation(&self.func.signature),
            });
            self.table.fresh()
        }
    }

    fn region_for(&mut self, annotation: Option<&RegionAnnotation>) -> RegionVid {
        match annotation {
            Some(RegionAnnotation::Static) => STATIC_REGION,
            Some(RegionAnnotation::Named(name)) => match self.annotations.get(name) {
                Some(&vid) => vid,
                None => {
                    let vid = self.table.fresh();
                    self.annotations.insert(name.clone(), vid);
                    vid
                }
            },
            None => self.table.fresh(),
        }
    }
}

/// Renders the signature with every reference annotated under one fresh
/// region name, as a machine-applicable fix for an ambiguous elision.
pub fn unified_annotation(signature: &Signature) -> String {
    let mut out = String::from("annotate as `<'r>(");
    for (idx, param) in signature.params.iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        out.push_str(&param.name.node);
        out.push_str(": ");
        out.push_str(&render_shape(&param.shape));
    }
    out.push(')');
    if let Some(ret) = &signature.ret {
        out.push_str(" -> ");
        out.push_str(&render_shape(ret));
    }
    out.push('`');
    out
}

fn render_shape(shape: &TypeShape) -> String {
    match shape {
        TypeShape::Value(name) => name.to_string(),
        TypeShape::Ref(node) => {
            let mutability = match node.kind {
                RefKind::Shared => "",
                RefKind::Exclusive => "mut ",
            };
            format!("&'r {mutability}{}", render_shape(&node.target))
        }
        TypeShape::Composite { name, .. } => name.to_string(),
    }
}
