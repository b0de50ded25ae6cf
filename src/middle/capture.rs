//! Lambda capture analysis
//!
//! A scope-aware walk over a lambda body. Parameters and every local declared
//! inside the body are "own" names; an identifier that refers to a local of
//! an enclosing function and is not shadowed by an own name is captured.
//! Results are cached per lambda node so deferred lowering of the body sees
//! the same capture list as the closure construction site.

use std::collections::{HashMap, HashSet};

use crate::frontend::ast::{
    ArmBody, Binding, Block, DestructureTarget, Expr, ExprKind, NodeId, Param, Pattern, Stmt, VariantPayload,
};
use crate::types::TypeNode;

/// One captured outer variable
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: String,
    /// Type at the first use, when annotated
    pub ty: Option<TypeNode>,
}

/// Side table of computed capture lists keyed by lambda node
#[derive(Debug, Default)]
pub struct CaptureAnalyzer {
    cache: HashMap<NodeId, Vec<Capture>>,
}

impl CaptureAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures of a previously analyzed lambda
    pub fn cached(&self, lambda: NodeId) -> Option<&[Capture]> {
        self.cache.get(&lambda).map(|c| c.as_slice())
    }

    /// Ordered, duplicate-free capture list of `lambda`
    ///
    /// `is_outer` tells whether a name is a local of the enclosing function.
    pub fn analyze(&mut self, lambda: &Expr, is_outer: &dyn Fn(&str) -> bool) -> Vec<Capture> {
        if let Some(found) = self.cache.get(&lambda.id) {
            return found.clone();
        }
        let ExprKind::Lambda { params, body, .. } = &lambda.kind else {
            return Vec::new();
        };
        let captures = self.walk_lambda(params, body, is_outer);
        self.cache.insert(lambda.id, captures.clone());
        captures
    }

    fn walk_lambda(&mut self, params: &[Param], body: &Block, is_outer: &dyn Fn(&str) -> bool) -> Vec<Capture> {
        let mut walker = Walker {
            analyzer: self,
            scopes: vec![params.iter().map(|p| p.name.clone()).collect()],
            captures: Vec::new(),
            seen: HashSet::new(),
            is_outer,
        };
        walker.block(body);
        walker.captures
    }
}

struct Walker<'w> {
    analyzer: &'w mut CaptureAnalyzer,
    scopes: Vec<HashSet<String>>,
    captures: Vec<Capture>,
    seen: HashSet<String>,
    is_outer: &'w dyn Fn(&str) -> bool,
}

impl<'w> Walker<'w> {
    fn is_own(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn reference(&mut self, name: &str, ty: Option<&TypeNode>) {
        if self.is_own(name) || !(self.is_outer)(name) {
            return;
        }
        if self.seen.insert(name.to_string()) {
            self.captures.push(Capture { name: name.to_string(), ty: ty.cloned() });
        }
    }

    fn block(&mut self, block: &Block) {
        self.scopes.push(HashSet::new());
        for stmt in &block.stmts {
            self.stmt(stmt);
        }
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl { name, init, .. } => {
                // initializer first: `x = x` reads the outer `x`
                if let Some(init) = init {
                    self.expr(init);
                }
                self.declare(name);
            }
            Stmt::Destructure { targets, init, .. } => {
                self.expr(init);
                self.destructure(targets);
            }
            Stmt::Expr { expr } => self.expr(expr),
            Stmt::Return { value, .. } => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::If { cond, then_branch, else_branch, .. } => {
                self.expr(cond);
                self.block(then_branch);
                if let Some(e) = else_branch {
                    self.block(e);
                }
            }
            Stmt::Loop { cond, body, .. } => {
                if let Some(c) = cond {
                    self.expr(c);
                }
                self.block(body);
            }
            Stmt::Break { .. } | Stmt::Continue { .. } => {}
            Stmt::Switch { value, cases, default, .. } => {
                self.expr(value);
                for case in cases {
                    self.expr(&case.value);
                    self.block(&case.body);
                }
                if let Some(d) = default {
                    self.block(d);
                }
            }
            Stmt::Try { body, catches, catch_other, .. } => {
                self.block(body);
                for clause in catches {
                    self.scopes.push(HashSet::from([clause.name.clone()]));
                    self.block(&clause.body);
                    self.scopes.pop();
                }
                if let Some(other) = catch_other {
                    self.block(other);
                }
            }
            Stmt::Throw { value, .. } => self.expr(value),
            Stmt::Block(b) => self.block(b),
        }
    }

    fn destructure(&mut self, targets: &[DestructureTarget]) {
        for target in targets {
            match target {
                DestructureTarget::Name { name, .. } => self.declare(name),
                DestructureTarget::Nested { targets } => self.destructure(targets),
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal { .. } | ExprKind::SizeOf { .. } => {}
            ExprKind::Identifier { name, binding } => match binding {
                Some(Binding::Local { .. }) | None => self.reference(name, expr.ty.as_ref()),
                Some(Binding::Global { .. } | Binding::Function { .. } | Binding::Extern { .. } | Binding::Type { .. }) => {}
            },
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            ExprKind::Call { callee, args, .. } => {
                self.expr(callee);
                for a in args {
                    self.expr(a);
                }
            }
            ExprKind::Member { object, .. } => self.expr(object),
            ExprKind::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            ExprKind::Cast { expr: inner, .. } => self.expr(inner),
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                self.expr(cond);
                self.expr(then_expr);
                self.expr(else_expr);
            }
            ExprKind::Lambda { .. } => {
                // the nested lambda sees our own names as outer locals too
                let nested = {
                    let own: HashSet<String> = self.scopes.iter().flatten().cloned().collect();
                    let is_outer = self.is_outer;
                    let visible = move |name: &str| own.contains(name) || is_outer(name);
                    self.analyzer.analyze(expr, &visible)
                };
                for capture in nested {
                    self.reference(&capture.name, capture.ty.as_ref());
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                self.expr(scrutinee);
                for arm in arms {
                    let mut bound = HashSet::new();
                    match &arm.pattern {
                        Pattern::Identifier { name, .. } => {
                            bound.insert(name.clone());
                        }
                        Pattern::EnumTuple { bindings, .. } => bound.extend(bindings.iter().cloned()),
                        Pattern::EnumStruct { fields, .. } => bound.extend(fields.iter().map(|f| f.binding.clone())),
                        Pattern::Wildcard | Pattern::Enum { .. } => {}
                    }
                    self.scopes.push(bound);
                    if let Some(guard) = &arm.guard {
                        self.expr(guard);
                    }
                    match &arm.body {
                        ArmBody::Expr { expr } => self.expr(expr),
                        ArmBody::Block { block } => self.block(block),
                    }
                    self.scopes.pop();
                }
            }
            ExprKind::StructLiteral { fields } => {
                for f in fields {
                    self.expr(&f.value);
                }
            }
            ExprKind::EnumVariant { payload, .. } => match payload {
                VariantPayload::Unit => {}
                VariantPayload::Tuple { values } => {
                    for v in values {
                        self.expr(v);
                    }
                }
                VariantPayload::Struct { fields } => {
                    for f in fields {
                        self.expr(&f.value);
                    }
                }
            },
            ExprKind::ArrayLiteral { elements } | ExprKind::TupleLiteral { elements } => {
                for e in elements {
                    self.expr(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{build, BinaryOp, DeclId};
    use pretty_assertions::assert_eq;

    fn lambda(params: Vec<Param>, body: Vec<Stmt>) -> Expr {
        build::expr(
            ExprKind::Lambda { params, return_type: TypeNode::i32(), body: build::block(body) },
            TypeNode::function(TypeNode::i32(), vec![]),
        )
    }

    fn names(captures: &[Capture]) -> Vec<&str> {
        captures.iter().map(|c| c.name.as_str()).collect()
    }

    fn outer(names: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |n: &str| names.contains(&n)
    }

    fn local(name: &str) -> Expr {
        build::local(name, build::next_id(), TypeNode::i32())
    }

    #[test]
    fn no_free_references_means_no_captures() {
        let p = build::param("a", TypeNode::i32());
        let body = vec![build::ret(Some(build::binary(BinaryOp::Add, local("a"), build::int(1), TypeNode::i32())))];
        let mut analyzer = CaptureAnalyzer::new();
        assert!(analyzer.analyze(&lambda(vec![p], body), &outer(&["x"])).is_empty());
    }

    #[test]
    fn first_use_order_without_duplicates() {
        let body = vec![
            build::stmt(build::binary(BinaryOp::Add, local("y"), local("x"), TypeNode::i32())),
            build::ret(Some(local("y"))),
        ];
        let mut analyzer = CaptureAnalyzer::new();
        let captures = analyzer.analyze(&lambda(vec![], body), &outer(&["x", "y"]));
        assert_eq!(names(&captures), vec!["y", "x"]);
    }

    #[test]
    fn initializer_reads_outer_binding() {
        let body = vec![
            build::var(build::next_id(), "x", TypeNode::i32(), Some(local("x"))),
            build::ret(Some(local("x"))),
        ];
        let mut analyzer = CaptureAnalyzer::new();
        let captures = analyzer.analyze(&lambda(vec![], body), &outer(&["x"]));
        assert_eq!(names(&captures), vec!["x"]);
    }

    #[test]
    fn globals_and_functions_are_not_captured() {
        let g = build::global("counter", DeclId(0), TypeNode::i32());
        let f = build::expr(
            ExprKind::Identifier { name: "helper".to_string(), binding: Some(Binding::Function { decl: DeclId(1) }) },
            TypeNode::function(TypeNode::void(), vec![]),
        );
        let body = vec![build::stmt(g), build::stmt(f)];
        let mut analyzer = CaptureAnalyzer::new();
        assert!(analyzer.analyze(&lambda(vec![], body), &outer(&["counter", "helper"])).is_empty());
    }

    #[test]
    fn nested_lambda_captures_propagate() {
        let inner = lambda(vec![], vec![build::ret(Some(build::binary(BinaryOp::Add, local("a"), local("z"), TypeNode::i32())))]);
        let inner_id = inner.id;
        let body = vec![
            build::var(build::next_id(), "a", TypeNode::i32(), Some(build::int(1))),
            build::stmt(inner),
        ];
        let mut analyzer = CaptureAnalyzer::new();
        let captures = analyzer.analyze(&lambda(vec![], body), &outer(&["z"]));
        // `a` is our own local, only `z` comes from outside
        assert_eq!(names(&captures), vec!["z"]);
        assert_eq!(names(analyzer.cached(inner_id).unwrap()), vec!["a", "z"]);
    }
}
