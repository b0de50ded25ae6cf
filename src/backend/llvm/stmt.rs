//! Statement lowering

use crate::frontend::ast::{Block, DestructureTarget, Expr, ExprKind, Literal, NodeId, Stmt, SwitchCase};
use crate::middle::ir::IrType;
use crate::types::TypeNode;
use crate::utils::{Error, Result, Span};

use super::codegen::ModuleGenerator;
use super::context::{Local, LoopTargets};

impl<'p> ModuleGenerator<'p> {
    pub(super) fn function_body(&mut self, body: &'p Block) -> Result<()> {
        self.block(body)
    }

    /// Statements of a block in the current scope
    ///
    /// Nothing after a terminator is generated. In collect-all mode a failing
    /// statement is reported and skipped.
    pub(super) fn block(&mut self, block: &'p Block) -> Result<()> {
        for stmt in &block.stmts {
            if self.ctx.is_terminated() {
                break;
            }
            if let Err(err) = self.stmt(stmt) {
                self.report(err)?;
            }
        }
        Ok(())
    }

    /// A block whose declarations go out of scope at its end
    pub(super) fn scoped_block(&mut self, block: &'p Block) -> Result<()> {
        let snapshot = self.ctx.snapshot();
        let result = self.block(block);
        self.ctx.restore(snapshot);
        result
    }

    fn stmt(&mut self, stmt: &'p Stmt) -> Result<()> {
        self.set_location(stmt.span());
        match stmt {
            Stmt::VarDecl { id, name, ty, init, span } => self.var_decl(*id, name, ty, init.as_ref(), *span),
            Stmt::Destructure { targets, init, span } => {
                let value = self.expr(init)?;
                let ty = self.expr_type(init)?;
                self.destructure(targets, &value, &ty, *span)
            }
            Stmt::Expr { expr } => self.expr(expr).map(|_| ()),
            Stmt::Return { value, span } => self.return_stmt(value.as_ref(), *span),
            Stmt::If { cond, then_branch, else_branch, .. } => self.if_stmt(cond, then_branch, else_branch.as_ref()),
            Stmt::Loop { cond, body, .. } => self.loop_stmt(cond.as_ref(), body),
            Stmt::Break { span } => {
                let target = self.ctx.loops.last().cloned().ok_or(Error::BreakOutsideLoop { span: *span })?;
                self.unlink_frames(target.try_depth);
                self.ctx.branch(&target.break_label);
                Ok(())
            }
            Stmt::Continue { span } => {
                let target = self.ctx.loops.last().cloned().ok_or(Error::ContinueOutsideLoop { span: *span })?;
                self.unlink_frames(target.try_depth);
                self.ctx.branch(&target.continue_label);
                Ok(())
            }
            Stmt::Switch { value, cases, default, span } => self.switch_stmt(value, cases, default.as_ref(), *span),
            Stmt::Try { body, catches, catch_other, span } => self.try_stmt(body, catches, catch_other.as_ref(), *span),
            Stmt::Throw { value, .. } => {
                let v = self.expr(value)?;
                let ir = self.expr_ir(value)?;
                self.emit_throw(&v, &ir)
            }
            Stmt::Block(block) => self.scoped_block(block),
        }
    }

    // ==================== Declarations ====================

    fn var_decl(&mut self, id: NodeId, name: &str, ty: &TypeNode, init: Option<&'p Expr>, span: Span) -> Result<()> {
        let ty = self.resolve(ty);
        let ir = self.lower_resolved(&ty)?;
        if ir.is_void() {
            return Err(Error::TypeMismatch { expected: "a value type".to_string(), got: ty.to_string(), span });
        }

        // the initializer still sees any shadowed binding of `name`
        let (value, flag) = match init {
            None => (self.default_value(&ir)?, "1".to_string()),
            Some(e) if e.is_null_literal() => (self.null_of(&ir), "0".to_string()),
            Some(e) => {
                let source_flag = self.local_of(e).and_then(|l| l.null_flag);
                let value = self.coerce(e, &ty)?;
                let flag = match source_flag {
                    Some(source) if matches!(ir, IrType::Struct(_)) => {
                        let reg = self.ctx.reg();
                        self.ctx.emit(format!("{} = load i1, i1* {}", reg, source));
                        reg
                    }
                    _ => "1".to_string(),
                };
                (value, flag)
            }
        };

        let slot = self.ctx.slot(&format!("{}_ptr", name), &ir);
        self.ctx.emit(format!("store {} {}, {}* {}", ir, value, ir, slot));
        let null_flag = match &ir {
            IrType::Struct(_) => {
                let flag_slot = self.ctx.slot(&format!("{}_null", name), &IrType::i1());
                self.ctx.emit(format!("store i1 {}, i1* {}", flag, flag_slot));
                Some(flag_slot)
            }
            _ => None,
        };
        match init {
            Some(e) => self.track_pointer(name, e),
            None => {
                self.ctx.pointer_to_local.remove(name);
            }
        }
        self.ctx.declare(Some(id), name, Local { ptr: slot, ty, ir, null_flag });
        Ok(())
    }

    /// Bind tuple elements to fresh locals, recursing into nested targets
    fn destructure(&mut self, targets: &'p [DestructureTarget], value: &str, ty: &TypeNode, span: Span) -> Result<()> {
        let TypeNode::Tuple { elements } = ty else {
            return Err(Error::TypeMismatch { expected: "tuple".to_string(), got: ty.to_string(), span });
        };
        if elements.len() != targets.len() {
            return Err(Error::TypeMismatch {
                expected: format!("tuple of {} elements", targets.len()),
                got: ty.to_string(),
                span,
            });
        }
        let ir = self.lower_resolved(ty)?;
        for (i, (target, elem_ty)) in targets.iter().zip(elements).enumerate() {
            let part = self.ctx.reg();
            self.ctx.emit(format!("{} = extractvalue {} {}, {}", part, ir, value, i));
            match target {
                DestructureTarget::Name { name, .. } if name == "_" => {}
                DestructureTarget::Name { id, name, ty: declared } => {
                    let local_ty = declared.as_ref().map(|t| self.resolve(t)).unwrap_or_else(|| elem_ty.clone());
                    let converted = self.cast(&part, elem_ty, &local_ty, span)?;
                    let local_ir = self.lower_resolved(&local_ty)?;
                    self.bind_parameter(Some(*id), name, &converted, local_ty, local_ir)?;
                }
                DestructureTarget::Nested { targets } => self.destructure(targets, &part, elem_ty, span)?,
            }
        }
        Ok(())
    }

    // ==================== Control flow ====================

    fn if_stmt(&mut self, cond: &'p Expr, then_branch: &'p Block, else_branch: Option<&'p Block>) -> Result<()> {
        let test = self.condition(cond)?;
        let then_label = self.ctx.label("if.then");
        let else_label = else_branch.map(|_| self.ctx.label("if.else"));
        let end = self.ctx.label("if.end");
        self.ctx.cond_branch(&test, &then_label, else_label.as_deref().unwrap_or(&end));

        self.ctx.start_block(&then_label);
        self.scoped_block(then_branch)?;
        self.ctx.branch(&end);

        if let (Some(label), Some(block)) = (else_label, else_branch) {
            self.ctx.start_block(&label);
            self.scoped_block(block)?;
            self.ctx.branch(&end);
        }
        self.ctx.start_block(&end);
        Ok(())
    }

    fn loop_stmt(&mut self, cond: Option<&'p Expr>, body: &'p Block) -> Result<()> {
        let cond_label = self.ctx.label("loop.cond");
        let body_label = self.ctx.label("loop.body");
        let end = self.ctx.label("loop.end");

        self.ctx.start_block(&cond_label);
        match cond {
            Some(cond) => {
                let test = self.condition(cond)?;
                self.ctx.cond_branch(&test, &body_label, &end);
            }
            None => self.ctx.branch(&body_label),
        }

        self.ctx.start_block(&body_label);
        self.ctx.loops.push(LoopTargets {
            continue_label: cond_label.clone(),
            break_label: end.clone(),
            try_depth: self.ctx.try_frames.len(),
        });
        let result = self.scoped_block(body);
        self.ctx.loops.pop();
        result?;
        self.ctx.branch(&cond_label);

        self.ctx.start_block(&end);
        Ok(())
    }

    /// `switch` on an integer; every case ends by jumping to the end
    fn switch_stmt(&mut self, value: &'p Expr, cases: &'p [SwitchCase], default: Option<&'p Block>, span: Span) -> Result<()> {
        let ty = self.expr_type(value)?;
        let ir = self.lower_resolved(&ty)?;
        if !ir.is_int() {
            return Err(Error::InvalidOperands {
                op: "switch".to_string(),
                left: ty.to_string(),
                right: String::new(),
                span,
            });
        }
        let mut constants = Vec::with_capacity(cases.len());
        for case in cases {
            constants.push(case_constant(&case.value)?);
        }
        let scrutinee = self.expr(value)?;

        let labels: Vec<String> = cases.iter().map(|_| self.ctx.label("switch.case")).collect();
        let default_label = default.map(|_| self.ctx.label("switch.default"));
        let end = self.ctx.label("switch.end");

        let mut term = format!("switch {} {}, label %{} [", ir, scrutinee, default_label.as_deref().unwrap_or(&end));
        for (constant, label) in constants.iter().zip(&labels) {
            term.push_str(&format!("\n  {} {}, label %{}", ir, constant, label));
        }
        term.push_str("\n]");
        self.ctx.terminate(term);

        for (case, label) in cases.iter().zip(&labels) {
            self.ctx.start_block(label);
            self.scoped_block(&case.body)?;
            self.ctx.branch(&end);
        }
        if let (Some(label), Some(block)) = (default_label, default) {
            self.ctx.start_block(&label);
            self.scoped_block(block)?;
            self.ctx.branch(&end);
        }
        self.ctx.start_block(&end);
        Ok(())
    }

    fn return_stmt(&mut self, value: Option<&'p Expr>, span: Span) -> Result<()> {
        // inside a match arm the value becomes the arm's result
        if let Some(frame) = self.ctx.matches.last() {
            let merge = frame.merge.clone();
            let result = frame.result.clone();
            let incoming = match value {
                Some(v) if !result.is_void() => {
                    let ty = self.expr_type(v)?;
                    let raw = self.expr(v)?;
                    let from = self.lower_resolved(&ty)?;
                    self.cast_ir(&raw, &from, &result, ty.is_signed(), false, span)?
                }
                Some(v) => {
                    self.expr(v)?;
                    String::new()
                }
                None => "undef".to_string(),
            };
            let from_label = self.ctx.current_label();
            if let Some(frame) = self.ctx.matches.last_mut() {
                if !frame.result.is_void() {
                    frame.incoming.push((incoming, from_label));
                }
            }
            self.ctx.branch(&merge);
            return Ok(());
        }

        let ret_ty = self.ctx.return_type.clone();
        let value = match value {
            Some(v) if !ret_ty.is_void() => Some(self.return_value(v, &ret_ty)?),
            Some(v) => {
                self.expr(v)?;
                None
            }
            None => None,
        };
        self.unlink_frames(0);
        self.emit_stack_release();

        let ret = self.ctx.function.ret.clone();
        if self.ctx.is_main_void {
            self.ctx.terminate("ret i32 0");
        } else {
            match value {
                Some(v) => self.ctx.terminate(format!("ret {} {}", ret, v)),
                None if ret.is_void() => self.ctx.terminate("ret void"),
                None => self.ctx.terminate(format!("ret {} {}", ret, ret.zero())),
            }
        }
        Ok(())
    }

    /// Returned value; a struct local carries its shadow flag into the null bit
    fn return_value(&mut self, v: &'p Expr, ret_ty: &TypeNode) -> Result<String> {
        let flag = self.local_of(v).and_then(|l| l.null_flag);
        let value = self.coerce(v, ret_ty)?;
        let ir = self.lower_resolved(ret_ty)?;
        match (flag, &ir) {
            (Some(flag), IrType::Struct(name)) => {
                let index = self.struct_layout(name)?.null_bit_index();
                let bit = self.ctx.reg();
                self.ctx.emit(format!("{} = load i1, i1* {}", bit, flag));
                let reg = self.ctx.reg();
                self.ctx.emit(format!("{} = insertvalue {} {}, i1 {}, {}", reg, ir, value, bit, index));
                Ok(reg)
            }
            _ => Ok(value),
        }
    }
}

/// Integer spelling of a `case` label
fn case_constant(e: &Expr) -> Result<String> {
    match &e.kind {
        ExprKind::Literal { value: Literal::Int(n) } => Ok(n.to_string()),
        ExprKind::Literal { value: Literal::Char(c) } => Ok((*c as u32).to_string()),
        ExprKind::Literal { value: Literal::Bool(b) } => Ok(if *b { "1" } else { "0" }.to_string()),
        _ => Err(Error::NonLiteralCase { span: e.span }),
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::llvm::test_support::*;
    use crate::config::{CodegenConfig, DiagnosticMode};
    use crate::frontend::ast::{build, BinaryOp, Decl, DestructureTarget, ExprKind, Program, Stmt, SwitchCase};
    use crate::types::TypeNode;
    use crate::utils::{Error, Span};
    use pretty_assertions::assert_eq;

    fn collect_all() -> CodegenConfig {
        CodegenConfig { diagnostics: DiagnosticMode::CollectAll, ..CodegenConfig::default() }
    }

    #[test]
    fn if_else_forms_a_diamond() {
        let x = build::param("x", TypeNode::i32());
        let cond = build::binary(BinaryOp::Gt, build::local("x", x.id, TypeNode::i32()), build::int(0), TypeNode::bool());
        let stmt = Stmt::If {
            cond,
            then_branch: build::block(vec![build::ret(Some(build::int(1)))]),
            else_branch: Some(build::block(vec![build::ret(Some(build::int(2)))])),
            span: Span::dummy(),
        };
        let mut program = Program::default();
        push_fn(&mut program, build::func("f", vec![x], TypeNode::i32(), vec![stmt]));
        let ir = compile(&program);
        let f = function(&ir, "f_i32");
        assert!(f.contains("icmp sgt i32"), "{}", f);
        assert!(f.contains("label %if.then."));
        assert!(f.contains("label %if.else."));
        assert!(f.contains("ret i32 1"));
        assert!(f.contains("ret i32 2"));
        // both arms return, so the join block falls to the implicit return
        assert!(f.contains("if.end."));
    }

    #[test]
    fn loop_break_and_continue_target_the_loop() {
        let i = build::next_id();
        let i_ref = || build::local("i", i, TypeNode::i32());
        let cond = build::binary(BinaryOp::Lt, i_ref(), build::int(10), TypeNode::bool());
        let step = build::stmt(build::unary(crate::frontend::ast::UnaryOp::PreInc, i_ref(), TypeNode::i32()));
        let body = build::block(vec![
            step,
            Stmt::If {
                cond: build::binary(BinaryOp::Eq, i_ref(), build::int(5), TypeNode::bool()),
                then_branch: build::block(vec![Stmt::Break { span: Span::dummy() }]),
                else_branch: Some(build::block(vec![Stmt::Continue { span: Span::dummy() }])),
                span: Span::dummy(),
            },
        ]);
        let ir = compile(&single(
            TypeNode::void(),
            vec![
                build::var(i, "i", TypeNode::i32(), Some(build::int(0))),
                Stmt::Loop { cond: Some(cond), body, span: Span::dummy() },
            ],
        ));
        let f = function(&ir, "f_");
        let cond_label = f.lines().find(|l| l.starts_with("loop.cond.")).unwrap().trim_end_matches(':').to_string();
        let end_label = f.lines().find(|l| l.starts_with("loop.end.")).unwrap().trim_end_matches(':').to_string();
        assert!(f.contains(&format!("br label %{}", cond_label)), "{}", f);
        assert!(f.contains(&format!("br label %{}", end_label)));
        assert!(f.contains("icmp slt i32"));
    }

    #[test]
    fn break_outside_a_loop_is_reported() {
        let program = single(TypeNode::void(), vec![Stmt::Break { span: Span::dummy() }]);
        let module = compile_with(&program, collect_all()).unwrap();
        assert_eq!(module.diagnostics, vec![Error::BreakOutsideLoop { span: Span::dummy() }]);

        let err = compile_with(&program, CodegenConfig::default()).unwrap_err();
        assert_eq!(err, Error::BreakOutsideLoop { span: Span::dummy() });
    }

    #[test]
    fn switch_lists_literal_cases() {
        let x = build::param("x", TypeNode::i32());
        let stmt = Stmt::Switch {
            value: build::local("x", x.id, TypeNode::i32()),
            cases: vec![
                SwitchCase { value: build::int(1), body: build::block(vec![build::ret(Some(build::int(10)))]) },
                SwitchCase { value: build::int(2), body: build::block(vec![build::ret(Some(build::int(20)))]) },
            ],
            default: Some(build::block(vec![build::ret(Some(build::int(0)))])),
            span: Span::dummy(),
        };
        let mut program = Program::default();
        push_fn(&mut program, build::func("f", vec![x], TypeNode::i32(), vec![stmt]));
        let ir = compile(&program);
        let f = function(&ir, "f_i32");
        assert!(f.contains("switch i32 %r."), "{}", f);
        assert!(f.contains(", label %switch.default."));
        assert!(f.contains("\n    i32 1, label %switch.case."));
        assert!(f.contains("\n    i32 2, label %switch.case."));
    }

    #[test]
    fn non_literal_case_is_rejected() {
        let x = build::param("x", TypeNode::i32());
        let stmt = Stmt::Switch {
            value: build::local("x", x.id, TypeNode::i32()),
            cases: vec![SwitchCase { value: build::local("x", x.id, TypeNode::i32()), body: build::block(vec![]) }],
            default: None,
            span: Span::dummy(),
        };
        let mut program = Program::default();
        push_fn(&mut program, build::func("f", vec![x], TypeNode::void(), vec![stmt]));
        let module = compile_with(&program, collect_all()).unwrap();
        assert_eq!(module.diagnostics, vec![Error::NonLiteralCase { span: Span::dummy() }]);
    }

    #[test]
    fn struct_without_initializer_is_present() {
        let mut program = Program::default();
        program.push(Decl::Struct(build::struct_decl("Cell", vec![build::field("v", TypeNode::i32())])));
        let c = build::next_id();
        push_fn(
            &mut program,
            build::func("f", vec![], TypeNode::void(), vec![build::var(c, "c", TypeNode::basic("Cell"), None)]),
        );
        let ir = compile(&program);
        let f = function(&ir, "f_");
        assert!(f.contains("insertvalue %struct.Cell undef, i32 0, 0"), "{}", f);
        assert!(f.contains(", i1 1, 1"));
        assert!(f.contains("store i1 1, i1* %c_null."));
    }

    #[test]
    fn nested_destructuring_binds_every_name() {
        let inner = TypeNode::tuple(vec![TypeNode::bool(), TypeNode::double()]);
        let outer = TypeNode::tuple(vec![TypeNode::i32(), inner.clone()]);
        let lit = build::expr(
            ExprKind::TupleLiteral {
                elements: vec![
                    build::int(1),
                    build::expr(ExprKind::TupleLiteral { elements: vec![build::boolean(true), build::float(0.5)] }, inner),
                ],
            },
            outer,
        );
        let name = |n: &str| DestructureTarget::Name { id: build::next_id(), name: n.to_string(), ty: None };
        let stmt = Stmt::Destructure {
            targets: vec![name("a"), DestructureTarget::Nested { targets: vec![name("b"), name("c")] }],
            init: lit,
            span: Span::dummy(),
        };
        let ir = compile(&single(TypeNode::void(), vec![stmt]));
        let f = function(&ir, "f_");
        for slot in ["%a_ptr.", "%b_ptr.", "%c_ptr."] {
            assert!(f.contains(slot), "missing {} in\n{}", slot, f);
        }
        assert!(f.contains("extractvalue { i1, double } %r."));
    }

    #[test]
    fn returning_a_struct_local_carries_its_flag() {
        let mut program = Program::default();
        program.push(Decl::Struct(build::struct_decl("Cell", vec![build::field("v", TypeNode::i32())])));
        let cell = TypeNode::basic("Cell");
        let c = build::next_id();
        push_fn(
            &mut program,
            build::func(
                "f",
                vec![],
                cell.clone(),
                vec![build::var(c, "c", cell.clone(), Some(build::null())), build::ret(Some(build::local("c", c, cell)))],
            ),
        );
        let ir = compile(&program);
        let f = function(&ir, "f_");
        assert!(f.contains("load i1, i1* %c_null."), "{}", f);
        assert!(f.contains(", 1\n"));
        assert!(f.contains("ret %struct.Cell %r."));
    }
}
