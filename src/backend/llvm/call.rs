//! Calls
//!
//! Every generated function takes a leading `i8*` closure context, so direct
//! calls pass `null` there and closure calls pass the captured environment.
//! Methods receive `this` right after it. Externs are called with their C
//! signature unchanged.

use log::trace;

use crate::frontend::ast::{CallTarget, DeclId, Expr, ExprKind};
use crate::middle::ir::IrType;
use crate::middle::overload::OverloadResolver;
use crate::middle::type_resolver::substitute_type;
use crate::types::TypeNode;
use crate::utils::{Error, Result, Span};

use super::codegen::ModuleGenerator;
use super::expr::is_lvalue;
use super::layout::VTABLE;

const METHOD_ON_NULL: &str = "Attempted to access member of null object";

impl<'p> ModuleGenerator<'p> {
    pub(super) fn call(
        &mut self,
        e: &'p Expr,
        callee: &'p Expr,
        args: &'p [Expr],
        generic_args: &[TypeNode],
        target: Option<&CallTarget>,
    ) -> Result<String> {
        let explicit: Vec<TypeNode> = generic_args.iter().map(|t| self.resolve(t)).collect();
        let target = match target {
            Some(t) => t.clone(),
            None => self.infer_call_target(callee, args, &explicit)?,
        };
        let arg_refs: Vec<&'p Expr> = args.iter().collect();
        match target {
            CallTarget::Function { decl, generic_args } => {
                let generic_args = if generic_args.is_empty() {
                    explicit
                } else {
                    generic_args.iter().map(|t| self.resolve(t)).collect()
                };
                self.direct_call(decl, callee, &arg_refs, &generic_args, e.span)
            }
            CallTarget::Method { decl, generic_args } => {
                let ExprKind::Member { object, .. } = &callee.kind else {
                    return Err(Error::Internal(format!("method call through {}", callee.kind_name())));
                };
                let generic_args: Vec<TypeNode> = if generic_args.is_empty() {
                    explicit
                } else {
                    generic_args.iter().map(|t| self.resolve(t)).collect()
                };
                self.invoke_method(decl, object, &arg_refs, &generic_args, None, e.span)
            }
            CallTarget::Extern { decl } => self.extern_call(decl, &arg_refs, e.span),
            CallTarget::Closure => self.closure_call(callee, &arg_refs, e.span),
        }
    }

    /// Recover the call target the checker did not annotate
    fn infer_call_target(&self, callee: &'p Expr, args: &'p [Expr], explicit: &[TypeNode]) -> Result<CallTarget> {
        match &callee.kind {
            ExprKind::Identifier { name, binding } => {
                use crate::frontend::ast::Binding;
                match binding {
                    Some(Binding::Function { decl }) => {
                        return Ok(CallTarget::Function { decl: *decl, generic_args: explicit.to_vec() })
                    }
                    Some(Binding::Extern { decl }) => return Ok(CallTarget::Extern { decl: *decl }),
                    Some(Binding::Local { .. }) => return Ok(CallTarget::Closure),
                    _ => {}
                }
                if self.ctx.has_name(name) {
                    return Ok(CallTarget::Closure);
                }
                let candidates = self.types.symbols().overloads(name);
                if candidates.is_empty() {
                    return Err(self.types.symbols().undefined(name, callee.span));
                }
                let arg_types = args.iter().map(|a| self.expr_type(a)).collect::<Result<Vec<_>>>()?;
                let resolution = OverloadResolver::new(&self.types).resolve_overload(
                    name,
                    candidates,
                    &arg_types,
                    explicit,
                    callee.span,
                )?;
                trace!("call to {} resolved to declaration {}", name, resolution.decl.0);
                if self.program.extern_decl(resolution.decl).is_some() {
                    Ok(CallTarget::Extern { decl: resolution.decl })
                } else {
                    Ok(CallTarget::Function { decl: resolution.decl, generic_args: resolution.generic_args })
                }
            }
            ExprKind::Member { object, property } => {
                let object_ty = self.expr_type(object)?;
                if let TypeNode::Meta { inner } = &object_ty {
                    let owner = self
                        .types
                        .declaration_of(inner)
                        .ok_or_else(|| Error::UnknownType { name: inner.to_string(), span: object.span })?;
                    let method = self.types.methods_named(owner, property).into_iter().next().ok_or_else(|| {
                        Error::UnknownField { owner: inner.to_string(), field: property.clone(), span: callee.span }
                    })?;
                    return Ok(CallTarget::Function { decl: method, generic_args: explicit.to_vec() });
                }
                let value = match object_ty.pointer_depth() {
                    0 => Some(object_ty.clone()),
                    1 => object_ty.dereferenced(),
                    _ => None,
                };
                let method = value.as_ref().and_then(|v| match self.types.struct_of(v) {
                    Some((_, decl)) => self.types.find_method(&decl.name, property),
                    None => {
                        let owner = self.types.enum_of(v)?.0;
                        self.types.methods_named(owner, property).into_iter().next()
                    }
                });
                match method {
                    Some(decl) => Ok(CallTarget::Method { decl, generic_args: explicit.to_vec() }),
                    // a closure stored in a field
                    None if matches!(self.expr_type(callee), Ok(TypeNode::Function(_))) => Ok(CallTarget::Closure),
                    None => Err(Error::UnknownField { owner: object_ty.to_string(), field: property.clone(), span: callee.span }),
                }
            }
            _ if matches!(self.expr_type(callee), Ok(TypeNode::Function(_))) => Ok(CallTarget::Closure),
            _ => Err(Error::MissingAnnotation { what: "call target".to_string(), span: callee.span }),
        }
    }

    /// Emit `call`, returning the result register or an empty handle for `void`
    ///
    /// `signature` replaces the return type spelling for variadic callees.
    fn emit_call(&mut self, ret: &IrType, callee: &str, args: &[(IrType, String)], signature: Option<&str>) -> String {
        let args = args.iter().map(|(t, v)| format!("{} {}", t, v)).collect::<Vec<_>>().join(", ");
        let spelled = signature.map_or_else(|| ret.to_string(), str::to_string);
        if ret.is_void() {
            self.ctx.emit(format!("call {} {}({})", spelled, callee, args));
            return String::new();
        }
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = call {} {}({})", reg, spelled, callee, args));
        reg
    }

    /// Free functions and static methods
    fn direct_call(
        &mut self,
        decl: DeclId,
        callee: &'p Expr,
        args: &[&'p Expr],
        generic_args: &[TypeNode],
        span: Span,
    ) -> Result<String> {
        let program = self.program;
        let f = program
            .function(decl)
            .ok_or_else(|| Error::Internal(format!("declaration {} is not a function", decl.0)))?;

        // `Box<i32>.make()` carries the owner's arguments on the callee object
        let owner_args = match (&callee.kind, f.owner) {
            (ExprKind::Member { object, .. }, Some(_)) => match self.expr_type(object)? {
                TypeNode::Meta { inner } => inner.as_basic().map(|b| b.generic_args.clone()).unwrap_or_default(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        let map = self.function_type_map(decl, generic_args, &owner_args);
        let symbol = self.request_function(decl, generic_args, &owner_args)?;

        let mut values = vec![(IrType::i8_ptr(), "null".to_string())];
        for (arg, param) in args.iter().zip(&f.params) {
            let ty = self.types.normalize(&substitute_type(&param.ty, &map));
            let value = self.coerce(arg, &ty)?;
            values.push((self.lower_resolved(&ty)?, value));
        }
        if args.len() != f.params.len() {
            return Err(Error::TypeMismatch {
                expected: format!("{} arguments", f.params.len()),
                got: args.len().to_string(),
                span,
            });
        }
        let ret_ty = self.types.normalize(&substitute_type(&f.return_type, &map));
        let ret = self.lower_resolved(&ret_ty)?;
        Ok(self.emit_call(&ret, &format!("@{}", symbol), &values, None))
    }

    /// Call `method` with `receiver` as `this`
    ///
    /// `owner_type` overrides the receiver's static type when choosing the
    /// owner's generic arguments (operator overloads on generic structs).
    pub(super) fn invoke_method(
        &mut self,
        method: DeclId,
        receiver: &'p Expr,
        args: &[&'p Expr],
        generic_args: &[TypeNode],
        owner_type: Option<&TypeNode>,
        span: Span,
    ) -> Result<String> {
        let program = self.program;
        let f = program
            .function(method)
            .ok_or_else(|| Error::Internal(format!("declaration {} is not a function", method.0)))?;
        if f.is_static || f.params.is_empty() {
            return Err(Error::Unsupported { what: format!("calling static {} on an instance", f.name), span });
        }

        let receiver_ty = self.expr_type(receiver)?;
        let value_ty = if receiver_ty.pointer_depth() > 0 {
            receiver_ty.dereferenced().unwrap_or_else(|| receiver_ty.clone())
        } else {
            receiver_ty.clone()
        };
        let owner_ty = owner_type.map(|t| self.resolve(t)).unwrap_or_else(|| value_ty.clone());
        // inherited methods of a non-generic ancestor take no owner arguments
        let owner_args = match (f.owner, self.types.declaration_of(&owner_ty)) {
            (Some(owner), Some(found)) if owner == found => {
                owner_ty.as_basic().map(|b| b.generic_args.clone()).unwrap_or_default()
            }
            _ => Vec::new(),
        };
        let map = self.function_type_map(method, generic_args, &owner_args);
        let this_ty = self.types.normalize(&substitute_type(&f.params[0].ty, &map));
        let this_ir = self.lower_resolved(&this_ty)?;

        // `this` by pointer: address of the receiver, cast to the declaring struct
        let (this, receiver_ptr) = if this_ty.is_pointer() {
            let (ptr, ptr_ir) = if receiver_ty.pointer_depth() > 0 {
                (self.expr(receiver)?, self.lower_resolved(&receiver_ty)?)
            } else {
                if let Some(local) = self.local_of(receiver) {
                    self.guard_local(&local, &receiver.describe(), METHOD_ON_NULL, span)?;
                }
                let ptr = self.spill_address(receiver)?;
                (ptr, self.lower_resolved(&receiver_ty)?.ptr())
            };
            let this = self.cast_ir(&ptr, &ptr_ir, &this_ir, false, false, span)?;
            (this, Some((ptr, ptr_ir)))
        } else {
            (self.coerce(receiver, &this_ty)?, None)
        };

        let mut values = vec![(IrType::i8_ptr(), "null".to_string()), (this_ir.clone(), this)];
        for (arg, param) in args.iter().zip(&f.params[1..]) {
            let ty = self.types.normalize(&substitute_type(&param.ty, &map));
            let value = self.coerce(arg, &ty)?;
            values.push((self.lower_resolved(&ty)?, value));
        }
        let ret_ty = self.types.normalize(&substitute_type(&f.return_type, &map));
        let ret = self.lower_resolved(&ret_ty)?;

        if let Some((ptr, ptr_ir)) = receiver_ptr {
            if generic_args.is_empty() && f.has_receiver() {
                if let Some(callee) = self.virtual_target(&value_ty, &f.name, &ptr, &ptr_ir)? {
                    let (fn_reg, fn_ir) = callee;
                    let IrType::Func { params, .. } = &fn_ir else {
                        return Err(Error::Internal(format!("vtable slot of type {}", fn_ir)));
                    };
                    // the slot's `this` may be declared on a subclass
                    let mut cast_values = Vec::with_capacity(values.len());
                    for ((ir, value), expected) in values.into_iter().zip(params.iter()) {
                        let value = self.cast_ir(&value, &ir, expected, false, false, span)?;
                        cast_values.push((expected.clone(), value));
                    }
                    return Ok(self.emit_call(&ret, &fn_reg, &cast_values, None));
                }
            }
        }

        let symbol = self.request_function(method, generic_args, &owner_args)?;
        Ok(self.emit_call(&ret, &format!("@{}", symbol), &values, None))
    }

    /// Load `method` from the receiver's vtable when its static type has one
    fn virtual_target(
        &mut self,
        value_ty: &TypeNode,
        method: &str,
        receiver: &str,
        receiver_ir: &IrType,
    ) -> Result<Option<(String, IrType)>> {
        if !value_ty.is_named_value() || self.types.struct_of(value_ty).is_none() {
            return Ok(None);
        }
        let layout = self.struct_layout_of(value_ty)?;
        let Some(vtable) = self.nearest_vtable(&layout.name).cloned() else {
            return Ok(None);
        };
        let (Some((slot_index, slot)), Some(vtable_field)) = (vtable.slot(method), layout.index_of(VTABLE)) else {
            return Ok(None);
        };
        trace!("virtual call {}.{} through slot {}", layout.name, method, slot_index);
        let ir = layout.ir();
        let object = self.cast_ir(receiver, receiver_ir, &ir.clone().ptr(), false, false, Span::dummy())?;
        let field = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 {}", field, ir, ir, object, vtable_field));
        let table = self.ctx.reg();
        self.ctx.emit(format!("{} = load i8*, i8** {}", table, field));
        let len = vtable.slots.len();
        let typed = self.ctx.reg();
        self.ctx.emit(format!("{} = bitcast i8* {} to [{} x i8*]*", typed, table, len));
        let entry = self.ctx.reg();
        self.ctx.emit(format!(
            "{} = getelementptr [{} x i8*], [{} x i8*]* {}, i64 0, i64 {}",
            entry, len, len, typed, slot_index
        ));
        let raw = self.ctx.reg();
        self.ctx.emit(format!("{} = load i8*, i8** {}", raw, entry));
        let callee = self.ctx.reg();
        self.ctx.emit(format!("{} = bitcast i8* {} to {}*", callee, raw, slot.fn_type));
        Ok(Some((callee, slot.fn_type.clone())))
    }

    fn extern_call(&mut self, decl: DeclId, args: &[&'p Expr], span: Span) -> Result<String> {
        let program = self.program;
        let ext = program
            .extern_decl(decl)
            .ok_or_else(|| Error::Internal(format!("declaration {} is not an extern", decl.0)))?;
        let mut param_irs = Vec::with_capacity(ext.param_types.len());
        let mut param_tys = Vec::with_capacity(ext.param_types.len());
        for ty in &ext.param_types {
            let ty = self.resolve(ty);
            param_irs.push(self.lower_resolved(&ty)?);
            param_tys.push(ty);
        }
        let ret_ty = self.resolve(&ext.return_type);
        let ret = self.lower_resolved(&ret_ty)?;
        self.declare(&ext.name, ret.clone(), param_irs.clone(), ext.variadic, &[]);

        if args.len() < param_tys.len() || (!ext.variadic && args.len() > param_tys.len()) {
            return Err(Error::TypeMismatch {
                expected: format!("{} arguments", param_tys.len()),
                got: args.len().to_string(),
                span,
            });
        }
        let mut values = Vec::with_capacity(args.len());
        for (arg, ty) in args.iter().zip(&param_tys) {
            let value = self.coerce(arg, ty)?;
            values.push((self.lower_resolved(ty)?, value));
        }
        for arg in &args[param_tys.len()..] {
            values.push(self.variadic_argument(arg)?);
        }

        let callee = format!("@{}", ext.name);
        if ext.variadic {
            let mut fixed: Vec<String> = param_irs.iter().map(|p| p.to_string()).collect();
            fixed.push("...".to_string());
            let signature = format!("{} ({})", ret, fixed.join(", "));
            Ok(self.emit_call(&ret, &callee, &values, Some(&signature)))
        } else {
            Ok(self.emit_call(&ret, &callee, &values, None))
        }
    }

    /// C default argument promotion for values passed through `...`
    fn variadic_argument(&mut self, arg: &'p Expr) -> Result<(IrType, String)> {
        let ty = self.expr_type(arg)?;
        if ty.is_array() && is_lvalue(arg) {
            let elem = ty.element_type().unwrap_or_else(|| ty.clone()).pointer(1);
            let value = self.coerce(arg, &elem)?;
            return Ok((self.lower_resolved(&elem)?, value));
        }
        let value = self.expr(arg)?;
        let ir = self.lower_resolved(&ty)?;
        match ir {
            IrType::Int(bits) if bits < 32 => {
                let op = if bits > 1 && ty.is_signed() { "sext" } else { "zext" };
                let reg = self.ctx.reg();
                self.ctx.emit(format!("{} = {} {} {} to i32", reg, op, ir, value));
                Ok((IrType::i32(), reg))
            }
            _ => Ok((ir, value)),
        }
    }

    fn closure_call(&mut self, callee: &'p Expr, args: &[&'p Expr], span: Span) -> Result<String> {
        let fn_ty = self.expr_type(callee)?;
        let Some(signature) = fn_ty.as_function().cloned() else {
            return Err(Error::TypeMismatch { expected: "function".to_string(), got: fn_ty.to_string(), span });
        };
        let closure = self.expr(callee)?;
        let closure_ir = self.lower_resolved(&fn_ty)?;
        let code = self.ctx.reg();
        self.ctx.emit(format!("{} = extractvalue {} {}, 0", code, closure_ir, closure));
        let env = self.ctx.reg();
        self.ctx.emit(format!("{} = extractvalue {} {}, 1", env, closure_ir, closure));

        let mut values = vec![(IrType::i8_ptr(), env)];
        for (arg, ty) in args.iter().zip(&signature.param_types) {
            let ty = self.resolve(ty);
            let value = self.coerce(arg, &ty)?;
            values.push((self.lower_resolved(&ty)?, value));
        }
        let ret_ty = self.resolve(&signature.return_type);
        let ret = self.lower_resolved(&ret_ty)?;
        Ok(self.emit_call(&ret, &code, &values, None))
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::llvm::test_support::*;
    use crate::frontend::ast::{build, Binding, CallTarget, Decl, DeclId, ExprKind, ExternDecl, Program};
    use crate::types::TypeNode;
    use crate::utils::Span;

    fn ident(name: &str, binding: Option<Binding>, ty: TypeNode) -> crate::frontend::ast::Expr {
        build::expr(ExprKind::Identifier { name: name.to_string(), binding }, ty)
    }

    #[test]
    fn direct_call_passes_a_null_context() {
        let mut program = Program::default();
        let x = build::param("x", TypeNode::i32());
        let double_it = push_fn(
            &mut program,
            build::func("twice", vec![x.clone()], TypeNode::i32(), vec![build::ret(Some(build::local("x", x.id, TypeNode::i32())))]),
        );
        let callee = ident("twice", Some(Binding::Function { decl: double_it }), TypeNode::function(TypeNode::i32(), vec![TypeNode::i32()]));
        let call = build::call(callee, vec![build::int(4)], CallTarget::Function { decl: double_it, generic_args: vec![] }, TypeNode::i32());
        push_fn(&mut program, build::func("f", vec![], TypeNode::i32(), vec![build::ret(Some(call))]));
        let ir = compile(&program);
        assert!(function(&ir, "f_").contains("call i32 @twice_i32(i8* null, i32 4)"), "{}", ir);
        assert!(ir.contains("define i32 @twice_i32(i8* %__closure_ctx, i32 %x)"));
    }

    #[test]
    fn unannotated_call_resolves_by_overload() {
        let mut program = Program::default();
        let a = build::param("a", TypeNode::i32());
        push_fn(&mut program, build::func("pick", vec![a], TypeNode::i32(), vec![build::ret(Some(build::int(1)))]));
        let b = build::param("b", TypeNode::double());
        push_fn(&mut program, build::func("pick", vec![b], TypeNode::i32(), vec![build::ret(Some(build::int(2)))]));
        let callee = ident("pick", None, TypeNode::function(TypeNode::i32(), vec![TypeNode::double()]));
        let call = build::expr(
            ExprKind::Call { callee: Box::new(callee), args: vec![build::float(1.5)], generic_args: vec![], target: None },
            TypeNode::i32(),
        );
        push_fn(&mut program, build::func("f", vec![], TypeNode::i32(), vec![build::ret(Some(call))]));
        let ir = compile(&program);
        assert!(function(&ir, "f_").contains("call i32 @pick_double(i8* null, double 1.5)"), "{}", ir);
    }

    #[test]
    fn variadic_extern_promotes_booleans() {
        let mut program = Program::default();
        let printf = program.push(Decl::Extern(ExternDecl {
            name: "printf".into(),
            param_types: vec![TypeNode::basic("string")],
            return_type: TypeNode::i32(),
            variadic: true,
            span: Span::dummy(),
        }));
        let callee = ident("printf", Some(Binding::Extern { decl: printf }), TypeNode::i32());
        let call = build::call(
            callee,
            vec![build::string("%d\n"), build::boolean(true)],
            CallTarget::Extern { decl: printf },
            TypeNode::i32(),
        );
        push_fn(&mut program, build::func("f", vec![], TypeNode::void(), vec![build::stmt(call)]));
        let ir = compile(&program);
        assert!(ir.contains("declare i32 @printf(i8*, ...)"), "{}", ir);
        let f = function(&ir, "f_");
        assert!(f.contains("zext i1 1 to i32"), "{}", f);
        assert!(f.contains("call i32 (i8*, ...) @printf(i8* getelementptr inbounds ([4 x i8], [4 x i8]* @.str."));
        assert!(f.contains("i64 0, i64 0), i32 %r."));
        assert!(ir.contains("c\"%d\\0A\\00\""));
    }

    #[test]
    fn closure_call_passes_the_environment() {
        let fn_ty = TypeNode::function(TypeNode::i32(), vec![TypeNode::i32()]);
        let g = build::param("g", fn_ty.clone());
        let callee = build::local("g", g.id, fn_ty.clone());
        let call = build::call(callee, vec![build::int(9)], CallTarget::Closure, TypeNode::i32());
        let mut program = Program::default();
        push_fn(&mut program, build::func("f", vec![g], TypeNode::i32(), vec![build::ret(Some(call))]));
        let ir = compile(&program);
        let f = function(&ir, "f_fn");
        assert!(f.contains("extractvalue { i32 (i8*, i32)*, i8* } %r."), "{}", f);
        assert!(f.contains(", 1\n"));
        assert!(f.contains("= call i32 %r."));
        assert!(f.contains("(i8* %r."));
        assert!(f.contains(", i32 9)"));
    }

    #[test]
    fn method_on_a_class_with_subclasses_goes_through_the_vtable() {
        let mut program = Program::default();
        let shape_ptr = TypeNode::basic("Shape").pointer(1);
        let mut area = build::func("area", vec![build::param("this", shape_ptr.clone())], TypeNode::i32(), vec![build::ret(Some(build::int(0)))]);
        area.owner = Some(DeclId(2));
        let area = push_fn(&mut program, area);
        let mut sq_area = build::func(
            "area",
            vec![build::param("this", TypeNode::basic("Square").pointer(1))],
            TypeNode::i32(),
            vec![build::ret(Some(build::int(4)))],
        );
        sq_area.owner = Some(DeclId(3));
        let sq_area = push_fn(&mut program, sq_area);
        let mut shape = build::struct_decl("Shape", vec![build::field("id", TypeNode::i32())]);
        shape.methods.push(area);
        program.push(Decl::Struct(shape));
        let mut square = build::struct_decl("Square", vec![build::field("side", TypeNode::double())]);
        square.parent = Some(TypeNode::basic("Shape"));
        square.methods.push(sq_area);
        program.push(Decl::Struct(square));

        let s = build::param("s", shape_ptr.clone());
        let callee = build::member(build::local("s", s.id, shape_ptr.clone()), "area", TypeNode::function(TypeNode::i32(), vec![]));
        let call = build::call(callee, vec![], CallTarget::Method { decl: area, generic_args: vec![] }, TypeNode::i32());
        push_fn(&mut program, build::func("f", vec![s], TypeNode::i32(), vec![build::ret(Some(call))]));

        let ir = compile(&program);
        let f = function(&ir, "f_Shape_ptr");
        assert!(f.contains("getelementptr %struct.Shape, %struct.Shape* %r."), "{}", f);
        assert!(f.contains(", i32 0, i32 0\n"));
        assert!(f.contains("bitcast i8* %r."));
        assert!(f.contains(" to [1 x i8*]*"));
        assert!(f.contains("getelementptr [1 x i8*], [1 x i8*]* %r."));
        assert!(f.contains(", i64 0, i64 0\n"));
        assert!(f.contains(" to i32 (i8*, %struct.Shape*)*"));
        assert!(f.contains("= call i32 %r."));
        assert!(f.contains("(i8* null, %struct.Shape* %r."));
        // the static symbol is only referenced from the vtable
        assert!(!f.contains("@Shape_area_Shape_ptr"));
        assert!(ir.contains("define i32 @Square_area_Square_ptr("));
    }
}
