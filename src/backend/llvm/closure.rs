//! Lambda lowering
//!
//! A lambda literal becomes an internal function `__lambda_N` plus, when it
//! captures anything, a heap record `%struct.__lambda_N_ctx` holding the
//! captured values in capture order. The closure value pairs the function
//! pointer with that record. Bodies are generated later from the worklist,
//! after the enclosing function is finished.

use log::debug;

use crate::frontend::ast::{Block, Expr, ExprKind, Param};
use crate::middle::ir::{IrType, TypeDef};
use crate::middle::type_resolver::{substitute_type, TypeMap};
use crate::types::TypeNode;
use crate::utils::{Error, Result, Span};

use super::codegen::ModuleGenerator;
use super::context::FunctionContext;

/// Captured local as seen at the construction site
#[derive(Debug, Clone)]
pub struct CapturedLocal {
    pub name: String,
    pub ty: TypeNode,
    pub ir: IrType,
}

/// A lambda whose body is still to be generated
#[derive(Debug)]
pub struct PendingLambda<'p> {
    pub name: String,
    params: &'p [Param],
    return_type: &'p TypeNode,
    body: &'p Block,
    captures: Vec<CapturedLocal>,
    /// `%struct.__lambda_N_ctx`, absent when nothing is captured
    context: Option<IrType>,
    type_map: TypeMap,
    span: Span,
}

impl<'p> ModuleGenerator<'p> {
    pub(super) fn lambda(&mut self, e: &'p Expr) -> Result<String> {
        let ExprKind::Lambda { params, return_type, body } = &e.kind else {
            return Err(Error::Internal(format!("{} lowered as a lambda", e.kind_name())));
        };
        let ctx = &self.ctx;
        let found = self.captures.analyze(e, &|name| ctx.has_name(name));

        let name = format!("__lambda_{}", self.lambda_count);
        self.lambda_count += 1;

        let mut captures = Vec::with_capacity(found.len());
        for capture in &found {
            let local = self
                .ctx
                .lookup_name(&capture.name)
                .cloned()
                .ok_or_else(|| Error::Internal(format!("captured '{}' is not a local", capture.name)))?;
            captures.push(CapturedLocal { name: capture.name.clone(), ty: local.ty, ir: local.ir });
        }
        debug!("lambda {} captures [{}]", name, found.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", "));

        let ret = self.lower_type(return_type)?;
        let param_irs = params.iter().map(|p| self.lower_type(&p.ty)).collect::<Result<Vec<_>>>()?;
        let closure = IrType::closure(ret.clone(), param_irs.clone());
        let mut all = vec![IrType::i8_ptr()];
        all.extend(param_irs);
        let fn_type = IrType::Func { ret: Box::new(ret), params: all, variadic: false };

        let (env, context) = if captures.is_empty() {
            ("null".to_string(), None)
        } else {
            let record = IrType::Struct(format!("{}_ctx", name));
            self.module.type_defs.push(TypeDef {
                name: format!("struct.{}_ctx", name),
                fields: captures.iter().map(|c| c.ir.clone()).collect(),
            });
            let env = self.pack_captures(&record, &captures)?;
            (env, Some(record))
        };

        let with_fn = self.ctx.reg();
        self.ctx.emit(format!("{} = insertvalue {} undef, {}* @{}, 0", with_fn, closure, fn_type, name));
        let value = self.ctx.reg();
        self.ctx.emit(format!("{} = insertvalue {} {}, i8* {}, 1", value, closure, with_fn, env));

        self.lambdas.push_back(PendingLambda {
            name,
            params,
            return_type,
            body,
            captures,
            context,
            type_map: self.ctx.type_map.clone(),
            span: e.span,
        });
        Ok(value)
    }

    /// Heap-allocate the capture record and copy the current values in
    fn pack_captures(&mut self, record: &IrType, captures: &[CapturedLocal]) -> Result<String> {
        let size = self.size_expr(record);
        let raw = self.ctx.reg();
        self.ctx.emit(format!("{} = call i8* @malloc(i64 {})", raw, size));
        let typed = self.ctx.reg();
        self.ctx.emit(format!("{} = bitcast i8* {} to {}*", typed, raw, record));
        for (i, capture) in captures.iter().enumerate() {
            let local = self
                .ctx
                .lookup_name(&capture.name)
                .cloned()
                .ok_or_else(|| Error::Internal(format!("captured '{}' is not a local", capture.name)))?;
            let mut value = self.ctx.reg();
            self.ctx.emit(format!("{} = load {}, {}* {}", value, local.ir, local.ir, local.ptr));
            // the record carries the shadow flag in the null bit
            if let (Some(flag), IrType::Struct(layout)) = (&local.null_flag, &local.ir) {
                let index = self.struct_layout(layout)?.null_bit_index();
                let bit = self.ctx.reg();
                self.ctx.emit(format!("{} = load i1, i1* {}", bit, flag));
                let with_bit = self.ctx.reg();
                self.ctx.emit(format!("{} = insertvalue {} {}, i1 {}, {}", with_bit, local.ir, value, bit, index));
                value = with_bit;
            }
            let field = self.ctx.reg();
            self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 {}", field, record, record, typed, i));
            self.ctx.emit(format!("store {} {}, {}* {}", local.ir, value, local.ir, field));
        }
        Ok(raw)
    }

    pub(super) fn emit_lambda(&mut self, pending: PendingLambda<'p>) -> Result<()> {
        debug!("generating lambda {}", pending.name);
        self.ctx = FunctionContext::new(&pending.name, &pending.name, pending.type_map.clone());
        let ret_ty = self.types.normalize(&substitute_type(pending.return_type, &pending.type_map));
        let ret = self.lower_resolved(&ret_ty)?;
        self.ctx.return_type = ret_ty;
        self.ctx.function.ret = ret;
        self.ctx.function.linkage = "internal ".to_string();

        let mut params = Vec::with_capacity(pending.params.len());
        for p in pending.params {
            let ty = self.resolve(&p.ty);
            let ir = self.lower_resolved(&ty)?;
            params.push((p, ty, ir));
        }
        self.ctx.function.params.push((IrType::i8_ptr(), "%__closure_ctx".to_string()));
        for (p, _, ir) in &params {
            self.ctx.function.params.push((ir.clone(), format!("%{}", p.name)));
        }
        let param_types: Vec<TypeNode> = params.iter().map(|(_, ty, _)| ty.clone()).collect();
        let ret_ty = self.ctx.return_type.clone();
        self.begin_subprogram(&pending.name, pending.span, &ret_ty, &param_types);

        self.emit_stack_check()?;

        if let Some(record) = &pending.context {
            let env = self.ctx.reg();
            self.ctx.emit(format!("{} = bitcast i8* %__closure_ctx to {}*", env, record));
            for (i, capture) in pending.captures.iter().enumerate() {
                let field = self.ctx.reg();
                self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 {}", field, record, record, env, i));
                let value = self.ctx.reg();
                self.ctx.emit(format!("{} = load {}, {}* {}", value, capture.ir, capture.ir, field));
                self.bind_parameter(None, &capture.name, &value, capture.ty.clone(), capture.ir.clone())?;
            }
        }
        for (p, ty, ir) in params {
            self.bind_parameter(Some(p.id), &p.name, &format!("%{}", p.name), ty, ir)?;
        }

        self.function_body(pending.body)?;
        self.implicit_return()?;

        let func = std::mem::take(&mut self.ctx).finish();
        self.module.functions.push(func);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::llvm::test_support::*;
    use crate::frontend::ast::{build, BinaryOp, ExprKind, Program};
    use crate::types::TypeNode;

    fn adder_type() -> TypeNode {
        TypeNode::function(TypeNode::i32(), vec![TypeNode::i32()])
    }

    #[test]
    fn capturing_lambda_allocates_a_context_record() {
        let mut program = Program::default();
        let base = build::next_id();
        let x = build::param("x", TypeNode::i32());
        let body = build::block(vec![build::ret(Some(build::binary(
            BinaryOp::Add,
            build::local("x", x.id, TypeNode::i32()),
            build::local("base", base, TypeNode::i32()),
            TypeNode::i32(),
        )))]);
        let lambda = build::expr(
            ExprKind::Lambda { params: vec![x], return_type: TypeNode::i32(), body },
            adder_type(),
        );
        push_fn(
            &mut program,
            build::func(
                "make",
                vec![],
                adder_type(),
                vec![build::var(base, "base", TypeNode::i32(), Some(build::int(10))), build::ret(Some(lambda))],
            ),
        );
        let ir = compile(&program);
        assert!(ir.contains("%struct.__lambda_0_ctx = type { i32 }"), "{}", ir);
        let make = function(&ir, "make_");
        assert!(make.contains("call i8* @malloc(i64 %r."));
        assert!(make.contains("bitcast i8* %r."));
        assert!(make.contains("to %struct.__lambda_0_ctx*"));
        assert!(make.contains("i32 (i8*, i32)* @__lambda_0, 0"));

        let lambda = function(&ir, "__lambda_0");
        assert!(lambda.contains("define internal i32 @__lambda_0(i8* %__closure_ctx, i32 %x)"), "{}", lambda);
        assert!(lambda.contains("bitcast i8* %__closure_ctx to %struct.__lambda_0_ctx*"));
        assert!(lambda.contains("%base_ptr."));
    }

    #[test]
    fn lambda_without_captures_has_a_null_context() {
        let mut program = Program::default();
        let x = build::param("x", TypeNode::i32());
        let body = build::block(vec![build::ret(Some(build::local("x", x.id, TypeNode::i32())))]);
        let lambda = build::expr(
            ExprKind::Lambda { params: vec![x], return_type: TypeNode::i32(), body },
            adder_type(),
        );
        push_fn(&mut program, build::func("make", vec![], adder_type(), vec![build::ret(Some(lambda))]));
        let ir = compile(&program);
        assert!(!ir.contains("__lambda_0_ctx"), "{}", ir);
        assert!(function(&ir, "make_").contains(", i8* null, 1"));
    }
}
