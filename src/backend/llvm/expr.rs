//! Expression lowering
//!
//! [`expr`] turns an expression into a value handle: a fresh register or a
//! constant token, empty for `void`. Lvalues have a separate [`address`]
//! path; loads and stores are always built on top of it.
//!
//! [`expr`]: ModuleGenerator::expr
//! [`address`]: ModuleGenerator::address

use crate::frontend::ast::{BinaryOp, Binding, Decl, DeclId, Expr, ExprKind, FieldInit, Literal, OperatorOverload, UnaryOp};
use crate::middle::ir::IrType;
use crate::middle::symbols::SymbolKind;
use crate::middle::type_resolver::TypeMap;
use crate::types::TypeNode;
use crate::utils::{Error, Result, Span};

use super::codegen::{float_literal, ModuleGenerator};
use super::context::Local;
use super::layout::{NULL_BIT, VTABLE};

const MEMBER_OF_NULL: &str = "Attempted to access member of null object";
const INDEX_OF_NULL: &str = "Attempted to access index of null object";
const DEREF_OF_NULL: &str = "Attempted to access member/index of null object";

/// Identifiers, member and index accesses and dereferences have an address
pub(super) fn is_lvalue(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Identifier { binding, .. } => {
            !matches!(binding, Some(Binding::Function { .. } | Binding::Extern { .. } | Binding::Type { .. }))
        }
        ExprKind::Member { .. } | ExprKind::Index { .. } => true,
        ExprKind::Unary { op: UnaryOp::Deref, .. } => true,
        _ => false,
    }
}

impl<'p> ModuleGenerator<'p> {
    pub(super) fn expr(&mut self, e: &'p Expr) -> Result<String> {
        match &e.kind {
            ExprKind::Literal { value } => self.literal(e, value),
            ExprKind::Identifier { name, binding } => self.identifier(e, name, *binding),
            ExprKind::Binary { op, left, right, overload } => self.binary(e, *op, left, right, overload.as_ref()),
            ExprKind::Unary { op, operand, overload } => self.unary(e, *op, operand, overload.as_ref()),
            ExprKind::Assign { op, target, value } => self.assign(*op, target, value),
            ExprKind::Call { callee, args, generic_args, target } => {
                self.call(e, callee, args, generic_args, target.as_ref())
            }
            ExprKind::Member { object, property } => self.member(e, object, property),
            ExprKind::Index { object, index } => self.index(e, object, index),
            ExprKind::Cast { expr, target } => {
                let value = self.expr(expr)?;
                let from = self.expr_type(expr)?;
                let to = self.resolve(target);
                self.cast(&value, &from, &to, e.span)
            }
            ExprKind::Ternary { cond, then_expr, else_expr } => self.ternary(e, cond, then_expr, else_expr),
            ExprKind::Lambda { .. } => self.lambda(e),
            ExprKind::Match { scrutinee, arms } => self.match_expr(e, scrutinee, arms),
            ExprKind::StructLiteral { fields } => self.struct_literal(e, fields),
            ExprKind::EnumVariant { enum_type, variant, payload } => self.enum_variant(e, enum_type, variant, payload),
            ExprKind::ArrayLiteral { elements } => self.array_literal(e, elements),
            ExprKind::TupleLiteral { elements } => self.tuple_literal(e, elements),
            ExprKind::SizeOf { target } => {
                let ir = self.lower_type(target)?;
                let size = self.size_expr(&ir);
                let result = self.expr_ir(e)?;
                self.cast_ir(&size, &IrType::i64(), &result, false, false, e.span)
            }
        }
    }

    /// Lower `e` as a value of type `to`; array lvalues decay to element pointers
    pub(super) fn coerce(&mut self, e: &'p Expr, to: &TypeNode) -> Result<String> {
        let from = self.expr_type(e)?;
        if from.is_array() && to.is_pointer() && is_lvalue(e) {
            let array = self.lower_resolved(&from)?;
            let IrType::Array(elem, _) = &array else {
                return Err(Error::Internal(format!("array type {} lowered to {}", from, array)));
            };
            let base = self.address(e)?;
            let first = self.ctx.reg();
            self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i64 0, i64 0", first, array, array, base));
            let to_ir = self.lower_resolved(to)?;
            return self.cast_ir(&first, &elem.as_ref().clone().ptr(), &to_ir, false, false, e.span);
        }
        let value = self.expr(e)?;
        self.cast(&value, &from, to, e.span)
    }

    /// `i1` truth value of a scalar
    pub(super) fn truthy(&mut self, value: &str, ir: &IrType) -> Result<String> {
        let inst = match ir {
            IrType::Int(1) => return Ok(value.to_string()),
            IrType::Int(_) => format!("icmp ne {} {}, 0", ir, value),
            IrType::Ptr(_) => format!("icmp ne {} {}, null", ir, value),
            IrType::Double => format!("fcmp une double {}, 0.0", value),
            IrType::Struct(name) => {
                let index = self.struct_layout(name)?.null_bit_index();
                format!("extractvalue {} {}, {}", ir, value, index)
            }
            other => {
                return Err(Error::InvalidOperands {
                    op: "condition".to_string(),
                    left: other.to_string(),
                    right: String::new(),
                    span: Span::dummy(),
                })
            }
        };
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = {}", reg, inst));
        Ok(reg)
    }

    /// Lower a condition expression to `i1`
    pub(super) fn condition(&mut self, e: &'p Expr) -> Result<String> {
        let value = self.expr(e)?;
        let ir = self.expr_ir(e)?;
        self.truthy(&value, &ir)
    }

    // ==================== Leaves ====================

    fn literal(&mut self, e: &Expr, value: &Literal) -> Result<String> {
        let ir = self.expr_ir(e)?;
        Ok(match value {
            Literal::Int(n) => match &ir {
                IrType::Double => float_literal(*n as f64),
                IrType::Int(1) => if *n != 0 { "1" } else { "0" }.to_string(),
                IrType::Ptr(_) if *n == 0 => "null".to_string(),
                IrType::Ptr(_) => {
                    let reg = self.ctx.reg();
                    self.ctx.emit(format!("{} = inttoptr i64 {} to {}", reg, n, ir));
                    reg
                }
                _ => n.to_string(),
            },
            Literal::Float(x) => match &ir {
                IrType::Double => float_literal(*x),
                _ => (*x as i64).to_string(),
            },
            Literal::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Literal::Char(c) => (*c as u32).to_string(),
            Literal::Str(s) => self.string_constant(s),
            Literal::Null | Literal::NullPtr => self.null_of(&ir),
        })
    }

    /// Local bound by an identifier expression
    pub(super) fn local_of(&self, e: &Expr) -> Option<Local> {
        let ExprKind::Identifier { name, binding } = &e.kind else {
            return None;
        };
        match binding {
            Some(Binding::Local { id }) => self.ctx.lookup(Some(*id), name).cloned(),
            None => self.ctx.lookup(None, name).cloned(),
            _ => None,
        }
    }

    fn identifier(&mut self, e: &'p Expr, name: &str, binding: Option<Binding>) -> Result<String> {
        match binding {
            Some(Binding::Function { decl }) => return self.function_value(decl, e.span),
            Some(Binding::Global { decl }) => return self.load_global(decl),
            Some(Binding::Extern { .. }) | Some(Binding::Type { .. }) => {
                return Err(Error::Unsupported { what: format!("'{}' used as a value", name), span: e.span })
            }
            _ => {}
        }
        if let Some(local) = self.local_of(e) {
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = load {}, {}* {}", reg, local.ir, local.ir, local.ptr));
            return Ok(reg);
        }
        if binding.is_none() {
            // unannotated reference to a global or function
            if let Some(symbol) = self.types.symbols().lookup(name) {
                match (symbol.kind, symbol.declaration) {
                    (SymbolKind::Variable, Some(decl)) if matches!(self.program.decl(decl), Some(Decl::Global(_))) => {
                        return self.load_global(decl)
                    }
                    (SymbolKind::Function, Some(decl)) if self.program.function(decl).is_some() => {
                        return self.function_value(decl, e.span)
                    }
                    _ => {}
                }
            }
        }
        Err(self.types.symbols().undefined(name, e.span))
    }

    fn load_global(&mut self, decl: DeclId) -> Result<String> {
        let program = self.program;
        let Some(Decl::Global(g)) = program.decl(decl) else {
            return Err(Error::Internal(format!("declaration {} is not a global", decl.0)));
        };
        let ir = self.lower_type(&g.ty)?;
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}, {}* @{}", reg, ir, ir, self.global_symbol(decl)));
        Ok(reg)
    }

    /// A named function as a closure with a null context
    fn function_value(&mut self, decl: DeclId, span: Span) -> Result<String> {
        if self.program.function(decl).map_or(false, |f| f.is_generic()) {
            return Err(Error::Unsupported { what: "generic function used as a value".to_string(), span });
        }
        let symbol = self.request_function(decl, &[], &[])?;
        let fn_type = self.method_fn_type(decl, &TypeMap::new())?;
        let closure = IrType::Anon(vec![fn_type.clone().ptr(), IrType::i8_ptr()]);
        let with_fn = self.ctx.reg();
        self.ctx.emit(format!("{} = insertvalue {} undef, {}* @{}, 0", with_fn, closure, fn_type, symbol));
        let value = self.ctx.reg();
        self.ctx.emit(format!("{} = insertvalue {} {}, i8* null, 1", value, closure, with_fn));
        Ok(value)
    }

    // ==================== Addresses ====================

    /// Address of an lvalue, typed as a pointer to the expression's type
    pub(super) fn address(&mut self, e: &'p Expr) -> Result<String> {
        match &e.kind {
            ExprKind::Identifier { name, binding } => {
                if let Some(Binding::Global { decl }) = binding {
                    return Ok(format!("@{}", self.global_symbol(*decl)));
                }
                if let Some(local) = self.local_of(e) {
                    return Ok(local.ptr);
                }
                if let Some(symbol) = self.types.symbols().lookup(name) {
                    if let Some(decl) = symbol.declaration {
                        if matches!(self.program.decl(decl), Some(Decl::Global(_))) {
                            return Ok(format!("@{}", self.global_symbol(decl)));
                        }
                    }
                }
                Err(self.types.symbols().undefined(name, e.span))
            }
            ExprKind::Member { object, property } => self.member_address(e, object, property),
            ExprKind::Index { object, index } => self.index_address(e, object, index),
            ExprKind::Unary { op: UnaryOp::Deref, operand, .. } => {
                let ptr = self.expr(operand)?;
                self.guard_pointee(operand, &e.describe(), DEREF_OF_NULL, e.span)?;
                Ok(ptr)
            }
            // a call returning a pointer is addressed by its result
            ExprKind::Call { .. } if self.expr_type(e)?.is_pointer() => self.expr(e),
            _ => Err(Error::NotAssignable { kind: e.kind_name().to_string(), span: e.span }),
        }
    }

    /// Address of any value: lvalues in place, everything else spilled
    pub(super) fn spill_address(&mut self, e: &'p Expr) -> Result<String> {
        if is_lvalue(e) {
            return self.address(e);
        }
        let value = self.expr(e)?;
        let ir = self.expr_ir(e)?;
        let slot = self.ctx.slot("tmp", &ir);
        self.ctx.emit(format!("store {} {}, {}* {}", ir, value, ir, slot));
        Ok(slot)
    }

    /// Guard a struct local read through member or index access
    fn guard_value(&mut self, object: &Expr, expression: &str, message: &str, span: Span) -> Result<()> {
        match self.local_of(object) {
            Some(local) => self.guard_local(&local, expression, message, span),
            None => Ok(()),
        }
    }

    /// Guard a pointer known to hold the address of a flagged local
    fn guard_pointee(&mut self, pointer: &Expr, expression: &str, message: &str, span: Span) -> Result<()> {
        let Some(name) = pointer.as_identifier() else {
            return Ok(());
        };
        let target = self.ctx.pointer_to_local.get(name).and_then(|t| self.ctx.lookup_name(t)).cloned();
        match target {
            Some(local) => self.guard_local(&local, expression, message, span),
            None => Ok(()),
        }
    }

    fn member_address(&mut self, e: &'p Expr, object: &'p Expr, property: &str) -> Result<String> {
        let object_ty = self.expr_type(object)?;
        let unknown = |owner: String| Error::UnknownField { owner, field: property.to_string(), span: e.span };

        if let TypeNode::Tuple { elements } = &object_ty {
            let index: usize = property.parse().map_err(|_| unknown(object_ty.to_string()))?;
            if index >= elements.len() {
                return Err(unknown(object_ty.to_string()));
            }
            let base = self.spill_address(object)?;
            let ir = self.lower_resolved(&object_ty)?;
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 {}", reg, ir, ir, base, index));
            return Ok(reg);
        }

        let (base, value_ty) = if object_ty.pointer_depth() == 1 {
            let ptr = self.expr(object)?;
            self.guard_pointee(object, &e.describe(), MEMBER_OF_NULL, e.span)?;
            (ptr, object_ty.dereferenced().unwrap_or_else(|| object_ty.clone()))
        } else {
            self.guard_value(object, &e.describe(), MEMBER_OF_NULL, e.span)?;
            (self.spill_address(object)?, object_ty.clone())
        };
        let layout = self.struct_layout_of(&value_ty)?;
        let (index, _) = layout.field(property).ok_or_else(|| unknown(layout.name.clone()))?;
        let ir = layout.ir();
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i32 0, i32 {}", reg, ir, ir, base, index));
        Ok(reg)
    }

    fn index_address(&mut self, e: &'p Expr, object: &'p Expr, index: &'p Expr) -> Result<String> {
        let object_ty = self.expr_type(object)?;
        if object_ty.is_array() {
            let base = self.spill_address(object)?;
            let ir = self.lower_resolved(&object_ty)?;
            let IrType::Array(_, len) = &ir else {
                return Err(Error::Internal(format!("array type {} lowered to {}", object_ty, ir)));
            };
            let len = *len;
            let offset = self.index_value(index)?;
            self.bounds_guard(&offset, len, e.span)?;
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i64 0, i64 {}", reg, ir, ir, base, offset));
            return Ok(reg);
        }
        if object_ty.is_pointer() {
            let ptr = self.expr(object)?;
            self.guard_pointee(object, &e.describe(), INDEX_OF_NULL, e.span)?;
            let elem_ty = object_ty
                .dereferenced()
                .ok_or_else(|| Error::Internal(format!("cannot index {}", object_ty)))?;
            let elem = self.lower_resolved(&elem_ty)?;
            let offset = self.index_value(index)?;
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = getelementptr {}, {}* {}, i64 {}", reg, elem, elem, ptr, offset));
            return Ok(reg);
        }
        Err(Error::InvalidOperands {
            op: "[]".to_string(),
            left: object_ty.to_string(),
            right: self.expr_type(index).map(|t| t.to_string()).unwrap_or_default(),
            span: e.span,
        })
    }

    /// Index operand widened to `i64`
    pub(super) fn index_value(&mut self, index: &'p Expr) -> Result<String> {
        let value = self.expr(index)?;
        let ty = self.expr_type(index)?;
        self.cast(&value, &ty, &TypeNode::i64(), index.span)
    }

    // ==================== Member and index reads ====================

    fn member(&mut self, e: &'p Expr, object: &'p Expr, property: &str) -> Result<String> {
        let object_ty = self.expr_type(object)?;
        if let TypeNode::Meta { inner } = &object_ty {
            return Err(Error::Unsupported { what: format!("static member {}.{}", inner, property), span: e.span });
        }
        if let (TypeNode::Tuple { elements }, false) = (&object_ty, is_lvalue(object)) {
            let index: usize = property
                .parse()
                .ok()
                .filter(|i| *i < elements.len())
                .ok_or_else(|| Error::UnknownField { owner: object_ty.to_string(), field: property.to_string(), span: e.span })?;
            let tuple = self.expr(object)?;
            let ir = self.lower_resolved(&object_ty)?;
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = extractvalue {} {}, {}", reg, ir, tuple, index));
            return Ok(reg);
        }
        let ptr = self.member_address(e, object, property)?;
        let ir = self.expr_ir(e)?;
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}, {}* {}", reg, ir, ir, ptr));
        Ok(reg)
    }

    /// Indexer method (`__get__`/`__set__`) of a struct operand
    pub(super) fn indexer(&self, object_ty: &TypeNode, method: &str) -> Option<DeclId> {
        let value = match object_ty.pointer_depth() {
            0 => object_ty.clone(),
            1 => object_ty.dereferenced()?,
            _ => return None,
        };
        if !value.is_named_value() {
            return None;
        }
        let (_, decl) = self.types.struct_of(&value)?;
        self.types.find_method(&decl.name, method)
    }

    fn index(&mut self, e: &'p Expr, object: &'p Expr, index: &'p Expr) -> Result<String> {
        let object_ty = self.expr_type(object)?;
        if let Some(getter) = self.indexer(&object_ty, "__get__") {
            return self.invoke_method(getter, object, &[index], &[], None, e.span);
        }
        let ptr = self.index_address(e, object, index)?;
        let ir = self.expr_ir(e)?;
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}, {}* {}", reg, ir, ir, ptr));
        Ok(reg)
    }

    // ==================== Assignment ====================

    fn assign(&mut self, op: Option<BinaryOp>, target: &'p Expr, value: &'p Expr) -> Result<String> {
        if let ExprKind::TupleLiteral { elements } = &target.kind {
            return self.assign_tuple(elements, value);
        }
        if let ExprKind::Index { object, index } = &target.kind {
            let object_ty = self.expr_type(object)?;
            if let Some(setter) = self.indexer(&object_ty, "__set__") {
                return self.invoke_method(setter, object, &[index, value], &[], None, target.span);
            }
        }

        let target_ty = self.stored_type(target)?;
        let ir = self.lower_resolved(&target_ty)?;
        let stored = match op {
            None => self.coerce(value, &target_ty)?,
            Some(op) => {
                let ptr = self.address(target)?;
                let current = self.ctx.reg();
                self.ctx.emit(format!("{} = load {}, {}* {}", current, ir, ir, ptr));
                let result = if target_ty.is_pointer() && matches!(op, BinaryOp::Add | BinaryOp::Sub) {
                    let offset = self.index_value(value)?;
                    self.pointer_offset(&current, &ir, &offset, op == BinaryOp::Sub)?
                } else {
                    let rhs = self.coerce(value, &target_ty)?;
                    self.arith_values(op, &current, &rhs, &target_ty, value.span)?
                };
                self.ctx.emit(format!("store {} {}, {}* {}", ir, result, ir, ptr));
                return Ok(result);
            }
        };
        let ptr = self.address(target)?;
        self.ctx.emit(format!("store {} {}, {}* {}", ir, stored, ir, ptr));

        if let Some(local) = self.local_of(target) {
            self.sync_flag(&local, value)?;
            if let Some(name) = target.as_identifier() {
                self.track_pointer(name, value);
            }
        }
        Ok(stored)
    }

    /// Type of the slot an assignment to `target` writes
    ///
    /// Storing through a pointer-returning call writes its pointee.
    fn stored_type(&self, target: &Expr) -> Result<TypeNode> {
        let ty = self.expr_type(target)?;
        match (&target.kind, ty.dereferenced()) {
            (ExprKind::Call { .. }, Some(pointee)) if ty.is_pointer() => Ok(pointee),
            _ => Ok(ty),
        }
    }

    /// `(a, b) = value`: evaluate once, then store each element
    fn assign_tuple(&mut self, targets: &'p [Expr], value: &'p Expr) -> Result<String> {
        let tuple = self.expr(value)?;
        let tuple_ty = self.expr_type(value)?;
        let TypeNode::Tuple { elements } = &tuple_ty else {
            return Err(Error::TypeMismatch { expected: "tuple".to_string(), got: tuple_ty.to_string(), span: value.span });
        };
        let tuple_ir = self.lower_resolved(&tuple_ty)?;
        for (i, (target, elem_ty)) in targets.iter().zip(elements).enumerate() {
            let part = self.ctx.reg();
            self.ctx.emit(format!("{} = extractvalue {} {}, {}", part, tuple_ir, tuple, i));
            let target_ty = self.expr_type(target)?;
            let converted = self.cast(&part, elem_ty, &target_ty, target.span)?;
            let ir = self.lower_resolved(&target_ty)?;
            let ptr = self.address(target)?;
            self.ctx.emit(format!("store {} {}, {}* {}", ir, converted, ir, ptr));
        }
        Ok(tuple)
    }

    /// Update a struct local's shadow flag after a store
    pub(super) fn sync_flag(&mut self, target: &Local, value: &'p Expr) -> Result<()> {
        let Some(flag) = &target.null_flag else {
            return Ok(());
        };
        let bit = if value.is_null_literal() {
            "0".to_string()
        } else if let Some(source) = self.local_of(value).and_then(|l| l.null_flag) {
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = load i1, i1* {}", reg, source));
            reg
        } else {
            "1".to_string()
        };
        self.ctx.emit(format!("store i1 {}, i1* {}", bit, flag));
        Ok(())
    }

    /// Remember `p = &x` so dereferences of `p` can check `x`'s flag
    pub(super) fn track_pointer(&mut self, name: &str, value: &Expr) {
        match &value.kind {
            ExprKind::Unary { op: UnaryOp::AddrOf, operand, .. } => match operand.as_identifier() {
                Some(target) => {
                    self.ctx.pointer_to_local.insert(name.to_string(), target.to_string());
                }
                None => {
                    self.ctx.pointer_to_local.remove(name);
                }
            },
            _ => {
                self.ctx.pointer_to_local.remove(name);
            }
        }
    }

    // ==================== Unary ====================

    fn unary(
        &mut self,
        e: &'p Expr,
        op: UnaryOp,
        operand: &'p Expr,
        overload: Option<&OperatorOverload>,
    ) -> Result<String> {
        let overload = match overload {
            Some(ov) => Some(ov.clone()),
            None => self.unary_fallback(op, operand)?,
        };
        if let Some(ov) = overload {
            return self.overload_call(&ov, operand, None, e.span);
        }

        let ty = self.expr_type(operand)?;
        let ir = self.lower_resolved(&ty)?;
        match op {
            UnaryOp::Plus => self.expr(operand),
            UnaryOp::Neg => {
                let value = self.expr(operand)?;
                let reg = self.ctx.reg();
                match &ir {
                    IrType::Double => self.ctx.emit(format!("{} = fneg double {}", reg, value)),
                    IrType::Int(_) => self.ctx.emit(format!("{} = sub {} 0, {}", reg, ir, value)),
                    _ => return Err(self.invalid_unary(op, &ty, e.span)),
                }
                Ok(reg)
            }
            UnaryOp::Not => {
                let value = self.expr(operand)?;
                let reg = self.ctx.reg();
                match &ir {
                    IrType::Int(1) => self.ctx.emit(format!("{} = xor i1 {}, true", reg, value)),
                    IrType::Int(_) => self.ctx.emit(format!("{} = icmp eq {} {}, 0", reg, ir, value)),
                    IrType::Ptr(_) => self.ctx.emit(format!("{} = icmp eq {} {}, null", reg, ir, value)),
                    _ => return Err(self.invalid_unary(op, &ty, e.span)),
                }
                Ok(reg)
            }
            UnaryOp::BitNot => {
                if !ir.is_int() {
                    return Err(self.invalid_unary(op, &ty, e.span));
                }
                let value = self.expr(operand)?;
                let reg = self.ctx.reg();
                self.ctx.emit(format!("{} = xor {} {}, -1", reg, ir, value));
                Ok(reg)
            }
            UnaryOp::Deref => {
                let ptr = self.address(e)?;
                let result = self.expr_ir(e)?;
                let reg = self.ctx.reg();
                self.ctx.emit(format!("{} = load {}, {}* {}", reg, result, result, ptr));
                Ok(reg)
            }
            UnaryOp::AddrOf => self.address(operand),
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                self.step(op, operand, &ty, &ir, e.span)
            }
        }
    }

    fn invalid_unary(&self, op: UnaryOp, ty: &TypeNode, span: Span) -> Error {
        Error::InvalidOperands { op: op.symbol().to_string(), left: ty.to_string(), right: String::new(), span }
    }

    /// `++`/`--` in prefix or postfix position
    fn step(&mut self, op: UnaryOp, operand: &'p Expr, ty: &TypeNode, ir: &IrType, span: Span) -> Result<String> {
        let increment = matches!(op, UnaryOp::PreInc | UnaryOp::PostInc);
        let ptr = self.address(operand)?;
        let current = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}, {}* {}", current, ir, ir, ptr));
        let next = self.ctx.reg();
        match ir {
            IrType::Int(_) => {
                let inst = if increment { "add" } else { "sub" };
                self.ctx.emit(format!("{} = {} {} {}, 1", next, inst, ir, current));
            }
            IrType::Double => {
                let inst = if increment { "fadd" } else { "fsub" };
                self.ctx.emit(format!("{} = {} double {}, 1.0", next, inst, current));
            }
            IrType::Ptr(elem) => {
                let delta = if increment { 1 } else { -1 };
                self.ctx.emit(format!("{} = getelementptr {}, {} {}, i64 {}", next, elem, ir, current, delta));
            }
            _ => return Err(self.invalid_unary(op, ty, span)),
        }
        self.ctx.emit(format!("store {} {}, {}* {}", ir, next, ir, ptr));
        Ok(if matches!(op, UnaryOp::PreInc | UnaryOp::PreDec) { next } else { current })
    }

    // ==================== Conditional ====================

    fn ternary(&mut self, e: &'p Expr, cond: &'p Expr, then_expr: &'p Expr, else_expr: &'p Expr) -> Result<String> {
        let result_ty = self.expr_type(e)?;
        let result = self.lower_resolved(&result_ty)?;
        let test = self.condition(cond)?;
        let then_label = self.ctx.label("tern.then");
        let else_label = self.ctx.label("tern.else");
        let end = self.ctx.label("tern.end");
        self.ctx.cond_branch(&test, &then_label, &else_label);

        self.ctx.start_block(&then_label);
        let then_value = if result.is_void() { self.expr(then_expr)? } else { self.coerce(then_expr, &result_ty)? };
        let then_from = self.ctx.current_label();
        self.ctx.branch(&end);

        self.ctx.start_block(&else_label);
        let else_value = if result.is_void() { self.expr(else_expr)? } else { self.coerce(else_expr, &result_ty)? };
        let else_from = self.ctx.current_label();
        self.ctx.branch(&end);

        self.ctx.start_block(&end);
        if result.is_void() {
            return Ok(String::new());
        }
        let reg = self.ctx.reg();
        self.ctx.emit(format!(
            "{} = phi {} [ {}, %{} ], [ {}, %{} ]",
            reg, result, then_value, then_from, else_value, else_from
        ));
        Ok(reg)
    }

    // ==================== Aggregate literals ====================

    fn struct_literal(&mut self, e: &'p Expr, fields: &'p [FieldInit]) -> Result<String> {
        let ty = self.expr_type(e)?;
        let layout = self.struct_layout_of(&ty)?;
        let ir = layout.ir();

        // evaluate in source order, insert in layout order
        let mut values = Vec::with_capacity(fields.len());
        for init in fields {
            let Some((index, slot)) = layout.field(&init.name) else {
                return Err(Error::UnknownField { owner: layout.name.clone(), field: init.name.clone(), span: init.value.span });
            };
            let slot_ty = slot.ty.clone();
            let value = self.coerce(&init.value, &slot_ty)?;
            values.push((index, value));
        }

        let mut acc = "undef".to_string();
        for (index, field) in layout.fields.iter().enumerate() {
            let value = match values.iter().find(|(i, _)| *i == index) {
                Some((_, v)) => v.clone(),
                None if field.name == NULL_BIT => "1".to_string(),
                None if field.name == VTABLE => self.vtable_pointer(&layout),
                None => self.default_value(&field.ir)?,
            };
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = insertvalue {} {}, {} {}, {}", reg, ir, acc, field.ir, value, index));
            acc = reg;
        }
        Ok(acc)
    }

    fn array_literal(&mut self, e: &'p Expr, elements: &'p [Expr]) -> Result<String> {
        let ty = self.expr_type(e)?;
        let ir = self.lower_resolved(&ty)?;
        let elem_ty = ty
            .element_type()
            .ok_or_else(|| Error::TypeMismatch { expected: "array".to_string(), got: ty.to_string(), span: e.span })?;
        let elem_ir = self.lower_resolved(&elem_ty)?;
        let full = matches!(&ir, IrType::Array(_, n) if *n == elements.len() as u64);
        let mut acc = if full { "undef" } else { "zeroinitializer" }.to_string();
        for (i, element) in elements.iter().enumerate() {
            let value = self.coerce(element, &elem_ty)?;
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = insertvalue {} {}, {} {}, {}", reg, ir, acc, elem_ir, value, i));
            acc = reg;
        }
        Ok(acc)
    }

    fn tuple_literal(&mut self, e: &'p Expr, elements: &'p [Expr]) -> Result<String> {
        let ty = self.expr_type(e)?;
        let TypeNode::Tuple { elements: types } = &ty else {
            return Err(Error::TypeMismatch { expected: "tuple".to_string(), got: ty.to_string(), span: e.span });
        };
        let ir = self.lower_resolved(&ty)?;
        let mut acc = "undef".to_string();
        for (i, (element, elem_ty)) in elements.iter().zip(types).enumerate() {
            let value = self.coerce(element, elem_ty)?;
            let elem_ir = self.lower_resolved(elem_ty)?;
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = insertvalue {} {}, {} {}, {}", reg, ir, acc, elem_ir, value, i));
            acc = reg;
        }
        Ok(acc)
    }
}
