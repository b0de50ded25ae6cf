//! Binary and unary operators

use log::trace;

use crate::frontend::ast::{BinaryOp, Expr, OperatorOverload, UnaryOp};
use crate::middle::ir::IrType;
use crate::middle::overload::{binary_operator_method, unary_operator_method, OverloadResolver};
use crate::types::TypeNode;
use crate::utils::{Error, Result, Span};

use super::codegen::ModuleGenerator;
use super::layout::{NULL_BIT, VTABLE};

impl<'p> ModuleGenerator<'p> {
    pub(super) fn binary(
        &mut self,
        e: &'p Expr,
        op: BinaryOp,
        left: &'p Expr,
        right: &'p Expr,
        overload: Option<&OperatorOverload>,
    ) -> Result<String> {
        if let Some(ov) = overload {
            return self.overload_call(ov, left, Some(right), e.span);
        }
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            return self.logical(op, left, right);
        }

        let lt = self.expr_type(left)?;
        let rt = self.expr_type(right)?;
        if let Some(ov) = self.binary_fallback(op, &lt, &rt) {
            return self.overload_call(&ov, left, Some(right), e.span);
        }

        // `s == null` on a struct value reads its null bit
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let (value, ty) = match (lt.is_null_literal(), rt.is_null_literal()) {
                (false, true) => (left, &lt),
                (true, false) => (right, &rt),
                _ => (left, &lt),
            };
            if (lt.is_null_literal() || rt.is_null_literal()) && ty.is_named_value() && self.types.struct_of(ty).is_some() {
                return self.null_comparison(op, value);
            }
        }

        if matches!(op, BinaryOp::Add | BinaryOp::Sub) && lt.is_pointer() && rt.is_integer() {
            let ptr = self.coerce(left, &lt)?;
            let ir = self.lower_resolved(&lt)?;
            let offset = self.index_value(right)?;
            return self.pointer_offset(&ptr, &ir, &offset, op == BinaryOp::Sub);
        }
        if op == BinaryOp::Add && lt.is_integer() && rt.is_pointer() {
            let offset = self.index_value(left)?;
            let ptr = self.coerce(right, &rt)?;
            let ir = self.lower_resolved(&rt)?;
            return self.pointer_offset(&ptr, &ir, &offset, false);
        }

        if op.is_comparison() {
            let ty = self.operand_type(&lt, &rt);
            let l = self.coerce(left, &ty)?;
            let r = self.coerce(right, &ty)?;
            return self.compare(op, &l, &r, &ty, e.span);
        }

        let ty = self.expr_type(e)?;
        let l = self.coerce(left, &ty)?;
        let r = self.coerce(right, &ty)?;
        self.arith_values(op, &l, &r, &ty, e.span)
    }

    /// Common type two comparison operands are converted to
    fn operand_type(&self, lt: &TypeNode, rt: &TypeNode) -> TypeNode {
        if lt.is_null_literal() || lt.is_nullptr_literal() {
            return rt.clone();
        }
        if rt.is_null_literal() || rt.is_nullptr_literal() {
            return lt.clone();
        }
        if lt.is_float() || rt.is_float() {
            return TypeNode::double();
        }
        match (lt.primitive(), rt.primitive()) {
            (Some(a), Some(b)) if a.is_integer() && b.is_integer() && b.rank() > a.rank() => rt.clone(),
            _ => lt.clone(),
        }
    }

    /// `getelementptr` by a signed `i64` element offset
    pub(super) fn pointer_offset(&mut self, ptr: &str, ptr_ir: &IrType, offset: &str, negate: bool) -> Result<String> {
        let elem = ptr_ir
            .pointee()
            .cloned()
            .ok_or_else(|| Error::Internal(format!("pointer arithmetic on {}", ptr_ir)))?;
        let offset = if negate {
            let neg = self.ctx.reg();
            self.ctx.emit(format!("{} = sub i64 0, {}", neg, offset));
            neg
        } else {
            offset.to_string()
        };
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = getelementptr {}, {} {}, i64 {}", reg, elem, ptr_ir, ptr, offset));
        Ok(reg)
    }

    /// Arithmetic and bitwise operators on two values of type `ty`
    pub(super) fn arith_values(&mut self, op: BinaryOp, l: &str, r: &str, ty: &TypeNode, span: Span) -> Result<String> {
        let ir = self.lower_resolved(ty)?;
        let signed = ty.is_signed();
        let invalid = || Error::InvalidOperands { op: op.symbol().to_string(), left: ty.to_string(), right: ty.to_string(), span };
        let inst = match &ir {
            IrType::Double => match op {
                BinaryOp::Add => "fadd",
                BinaryOp::Sub => "fsub",
                BinaryOp::Mul => "fmul",
                BinaryOp::Div => "fdiv",
                BinaryOp::Mod => "frem",
                _ => return Err(invalid()),
            },
            IrType::Int(_) => match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::Div | BinaryOp::Mod => {
                    self.division_guard(r, &ir, span)?;
                    match (op, signed) {
                        (BinaryOp::Div, true) => "sdiv",
                        (BinaryOp::Div, false) => "udiv",
                        (_, true) => "srem",
                        (_, false) => "urem",
                    }
                }
                BinaryOp::BitAnd => "and",
                BinaryOp::BitOr => "or",
                BinaryOp::BitXor => "xor",
                BinaryOp::Shl => "shl",
                BinaryOp::Shr if signed => "ashr",
                BinaryOp::Shr => "lshr",
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        };
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = {} {} {}, {}", reg, inst, ir, l, r));
        Ok(reg)
    }

    /// Comparison of two values of type `ty`, yielding `i1`
    fn compare(&mut self, op: BinaryOp, l: &str, r: &str, ty: &TypeNode, span: Span) -> Result<String> {
        let ir = self.lower_resolved(ty)?;
        let equality = matches!(op, BinaryOp::Eq | BinaryOp::Ne);
        let inst = match &ir {
            IrType::Int(_) | IrType::Ptr(_) => {
                let signed = ty.is_signed();
                let pred = match op {
                    BinaryOp::Eq => "eq",
                    BinaryOp::Ne => "ne",
                    BinaryOp::Lt if signed => "slt",
                    BinaryOp::Lt => "ult",
                    BinaryOp::Gt if signed => "sgt",
                    BinaryOp::Gt => "ugt",
                    BinaryOp::Le if signed => "sle",
                    BinaryOp::Le => "ule",
                    BinaryOp::Ge if signed => "sge",
                    _ => "uge",
                };
                format!("icmp {} {} {}, {}", pred, ir, l, r)
            }
            IrType::Double => {
                let pred = match op {
                    BinaryOp::Eq => "oeq",
                    BinaryOp::Ne => "une",
                    BinaryOp::Lt => "olt",
                    BinaryOp::Gt => "ogt",
                    BinaryOp::Le => "ole",
                    _ => "oge",
                };
                format!("fcmp {} double {}, {}", pred, l, r)
            }
            IrType::Struct(_) | IrType::Enum(_) | IrType::Array(..) | IrType::Anon(_) if equality => {
                let equal = self.values_equal(l, r, &ir)?;
                return Ok(if op == BinaryOp::Ne { self.negate(&equal) } else { equal });
            }
            _ => {
                return Err(Error::InvalidOperands {
                    op: op.symbol().to_string(),
                    left: ty.to_string(),
                    right: ty.to_string(),
                    span,
                })
            }
        };
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = {}", reg, inst));
        Ok(reg)
    }

    fn negate(&mut self, bit: &str) -> String {
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = xor i1 {}, true", reg, bit));
        reg
    }

    /// Structural equality; struct fields compare one by one, skipping the null bit and vtable
    fn values_equal(&mut self, l: &str, r: &str, ir: &IrType) -> Result<String> {
        let inst = match ir {
            IrType::Int(_) | IrType::Ptr(_) => format!("icmp eq {} {}, {}", ir, l, r),
            IrType::Double => format!("fcmp oeq double {}, {}", l, r),
            IrType::Struct(name) => {
                let fields = self.struct_layout(name)?.fields.clone();
                let mut acc: Option<String> = None;
                for (index, field) in fields.iter().enumerate() {
                    if field.name == NULL_BIT || field.name == VTABLE {
                        continue;
                    }
                    let a = self.ctx.reg();
                    self.ctx.emit(format!("{} = extractvalue {} {}, {}", a, ir, l, index));
                    let b = self.ctx.reg();
                    self.ctx.emit(format!("{} = extractvalue {} {}, {}", b, ir, r, index));
                    let eq = self.values_equal(&a, &b, &field.ir)?;
                    acc = Some(match acc {
                        None => eq,
                        Some(prev) => {
                            let both = self.ctx.reg();
                            self.ctx.emit(format!("{} = and i1 {}, {}", both, prev, eq));
                            both
                        }
                    });
                }
                return Ok(acc.unwrap_or_else(|| "1".to_string()));
            }
            _ => return Ok(self.bytes_equal(l, r, ir)),
        };
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = {}", reg, inst));
        Ok(reg)
    }

    /// `memcmp` of two spilled values
    fn bytes_equal(&mut self, l: &str, r: &str, ir: &IrType) -> String {
        let mut bytes = Vec::with_capacity(2);
        for value in [l, r] {
            let slot = self.ctx.slot("cmp_tmp", ir);
            self.ctx.emit(format!("store {} {}, {}* {}", ir, value, ir, slot));
            let raw = self.ctx.reg();
            self.ctx.emit(format!("{} = bitcast {}* {} to i8*", raw, ir, slot));
            bytes.push(raw);
        }
        let size = self.size_expr(ir);
        let diff = self.ctx.reg();
        self.ctx.emit(format!("{} = call i32 @memcmp(i8* {}, i8* {}, i64 {})", diff, bytes[0], bytes[1], size));
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = icmp eq i32 {}, 0", reg, diff));
        reg
    }

    /// `s == null` / `s != null` for a struct value
    fn null_comparison(&mut self, op: BinaryOp, value: &'p Expr) -> Result<String> {
        let v = self.expr(value)?;
        let ir = self.expr_ir(value)?;
        let present = self.truthy(&v, &ir)?;
        Ok(if op == BinaryOp::Eq { self.negate(&present) } else { present })
    }

    /// Short-circuit `&&`/`||` through an `i1` slot
    fn logical(&mut self, op: BinaryOp, left: &'p Expr, right: &'p Expr) -> Result<String> {
        let slot = self.ctx.slot("logic", &IrType::i1());
        let l = self.condition(left)?;
        self.ctx.emit(format!("store i1 {}, i1* {}", l, slot));
        let rhs = self.ctx.label("logic.rhs");
        let end = self.ctx.label("logic.end");
        if op == BinaryOp::And {
            self.ctx.cond_branch(&l, &rhs, &end);
        } else {
            self.ctx.cond_branch(&l, &end, &rhs);
        }
        self.ctx.start_block(&rhs);
        let r = self.condition(right)?;
        self.ctx.emit(format!("store i1 {}, i1* {}", r, slot));
        self.ctx.branch(&end);
        self.ctx.start_block(&end);
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = load i1, i1* {}", reg, slot));
        Ok(reg)
    }

    // ==================== Operator overloads ====================

    /// Overload the checker did not annotate, found by method name
    fn binary_fallback(&self, op: BinaryOp, lt: &TypeNode, rt: &TypeNode) -> Option<OperatorOverload> {
        let method = binary_operator_method(op)?;
        let resolver = OverloadResolver::new(&self.types);
        if let Some(found) = resolver.find_operator_overload(method, lt, std::slice::from_ref(rt)) {
            trace!("operator {} on {} resolved to {}", op.symbol(), lt, method);
            return Some(OperatorOverload {
                method: found.method,
                target_type: found.target_type,
                swap_operands: false,
                negate_result: false,
            });
        }
        if op == BinaryOp::Ne {
            let found = resolver.find_operator_overload("__eq__", lt, std::slice::from_ref(rt))?;
            return Some(OperatorOverload {
                method: found.method,
                target_type: found.target_type,
                swap_operands: false,
                negate_result: true,
            });
        }
        None
    }

    pub(super) fn unary_fallback(&self, op: UnaryOp, operand: &Expr) -> Result<Option<OperatorOverload>> {
        let Some(method) = unary_operator_method(op) else {
            return Ok(None);
        };
        let ty = self.expr_type(operand)?;
        let resolver = OverloadResolver::new(&self.types);
        Ok(resolver.find_operator_overload(method, &ty, &[]).map(|found| OperatorOverload {
            method: found.method,
            target_type: found.target_type,
            swap_operands: false,
            negate_result: false,
        }))
    }

    /// Call the method an operator was rewritten into
    pub(super) fn overload_call(
        &mut self,
        ov: &OperatorOverload,
        first: &'p Expr,
        second: Option<&'p Expr>,
        span: Span,
    ) -> Result<String> {
        let (receiver, other) = match (ov.swap_operands, second) {
            (true, Some(second)) => (second, Some(first)),
            _ => (first, second),
        };
        let args: Vec<&'p Expr> = other.into_iter().collect();
        let value = self.invoke_method(ov.method, receiver, &args, &[], Some(&ov.target_type), span)?;
        Ok(if ov.negate_result { self.negate(&value) } else { value })
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::llvm::test_support::*;
    use crate::frontend::ast::{build, BinaryOp, Decl, DeclId, ExprKind, OperatorOverload, Program};
    use crate::types::TypeNode;
    use pretty_assertions::assert_eq;

    /// `struct Money { v: i32 }` with one `(this: *Money, other: Money)` method per entry
    fn money_program(methods: &[(&str, TypeNode)]) -> (Program, Vec<DeclId>) {
        let mut program = Program::default();
        let money = TypeNode::basic("Money");
        let owner = DeclId(0);
        let ids: Vec<DeclId> = (1..=methods.len()).map(DeclId).collect();
        let mut decl = build::struct_decl("Money", vec![build::field("v", TypeNode::i32())]);
        decl.methods = ids.clone();
        assert_eq!(program.push(Decl::Struct(decl)), owner);
        for (name, ret) in methods {
            let this = build::param("this", money.clone().pointer(1));
            let other = build::param("other", money.clone());
            let value = if ret.is_bool() { build::boolean(true) } else { build::local("other", other.id, money.clone()) };
            let mut method = build::func(name, vec![this, other], ret.clone(), vec![build::ret(Some(value))]);
            method.owner = Some(owner);
            program.push(Decl::Function(method));
        }
        (program, ids)
    }

    fn money_fn(program: &mut Program, op: BinaryOp, overload: Option<OperatorOverload>, result: TypeNode) -> String {
        let money = TypeNode::basic("Money");
        let a = build::param("a", money.clone());
        let b = build::param("b", money.clone());
        let mut e = build::binary(op, build::local("a", a.id, money.clone()), build::local("b", b.id, money.clone()), result.clone());
        if let ExprKind::Binary { overload: slot, .. } = &mut e.kind {
            *slot = overload;
        }
        push_fn(program, build::func("f", vec![a, b], result, vec![build::ret(Some(e))]));
        let ir = compile(program);
        function(&ir, "f_Money_Money").to_string()
    }

    fn binary_fn(op: BinaryOp, ty: TypeNode, result: TypeNode) -> String {
        let a = build::param("a", ty.clone());
        let b = build::param("b", ty.clone());
        let e = build::binary(op, build::local("a", a.id, ty.clone()), build::local("b", b.id, ty.clone()), result.clone());
        let symbol = format!("f_{}_{}", crate::middle::monomorph::mangle_type(&ty), crate::middle::monomorph::mangle_type(&ty));
        let mut program = Program::default();
        push_fn(&mut program, build::func("f", vec![a, b], result, vec![build::ret(Some(e))]));
        let ir = compile(&program);
        function(&ir, &symbol).to_string()
    }

    #[test]
    fn integer_division_is_guarded() {
        let f = binary_fn(BinaryOp::Div, TypeNode::i32(), TypeNode::i32());
        assert!(f.contains("div_zero."), "{}", f);
        assert!(f.contains("insertvalue %struct.DivisionByZeroError"));
        assert!(f.contains("sdiv i32"));

        let f = binary_fn(BinaryOp::Mod, TypeNode::basic("u32"), TypeNode::basic("u32"));
        assert!(f.contains("urem i32"), "{}", f);
    }

    #[test]
    fn float_division_is_not_guarded() {
        let f = binary_fn(BinaryOp::Div, TypeNode::double(), TypeNode::double());
        assert!(f.contains("fdiv double"), "{}", f);
        assert!(!f.contains("div_zero."));
    }

    #[test]
    fn comparisons_follow_signedness() {
        let f = binary_fn(BinaryOp::Lt, TypeNode::i32(), TypeNode::bool());
        assert!(f.contains("icmp slt i32"), "{}", f);
        let f = binary_fn(BinaryOp::Lt, TypeNode::basic("u64"), TypeNode::bool());
        assert!(f.contains("icmp ult i64"), "{}", f);
        let f = binary_fn(BinaryOp::Ne, TypeNode::double(), TypeNode::bool());
        assert!(f.contains("fcmp une double"), "{}", f);
    }

    #[test]
    fn logical_and_short_circuits() {
        let f = binary_fn(BinaryOp::And, TypeNode::bool(), TypeNode::bool());
        assert!(f.contains("store i1 %r."), "{}", f);
        assert!(f.contains("logic.rhs."));
        assert!(f.contains("logic.end."));
        assert!(f.contains("load i1, i1* %logic."));
    }

    #[test]
    fn pointer_plus_integer_is_a_gep() {
        let ptr = TypeNode::i32().pointer(1);
        let p = build::param("p", ptr.clone());
        let e = build::binary(BinaryOp::Add, build::local("p", p.id, ptr.clone()), build::int(2), ptr.clone());
        let mut program = Program::default();
        push_fn(&mut program, build::func("f", vec![p], ptr, vec![build::ret(Some(e))]));
        let ir = compile(&program);
        let f = function(&ir, "f_i32_ptr");
        assert!(f.contains("sext i32 2 to i64"), "{}", f);
        assert!(f.contains("getelementptr i32, i32* %r."));
    }

    #[test]
    fn struct_equality_skips_the_null_bit() {
        let mut program = Program::default();
        program.push(Decl::Struct(build::struct_decl(
            "Pair",
            vec![build::field("a", TypeNode::i32()), build::field("b", TypeNode::double())],
        )));
        let pair = TypeNode::basic("Pair");
        let x = build::param("x", pair.clone());
        let y = build::param("y", pair.clone());
        let e = build::binary(BinaryOp::Eq, build::local("x", x.id, pair.clone()), build::local("y", y.id, pair.clone()), TypeNode::bool());
        push_fn(&mut program, build::func("f", vec![x, y], TypeNode::bool(), vec![build::ret(Some(e))]));
        let ir = compile(&program);
        let f = function(&ir, "f_Pair_Pair");
        assert!(f.contains("icmp eq i32"), "{}", f);
        assert!(f.contains("fcmp oeq double"));
        assert!(f.contains("and i1"));
        // only the two parameter flags read index 2
        let null_bit_reads = f
            .lines()
            .filter(|l| l.contains("extractvalue %struct.Pair") && l.ends_with(", 2"))
            .count();
        assert_eq!(null_bit_reads, 2, "{}", f);
    }

    #[test]
    fn struct_compared_with_null_reads_the_null_bit() {
        let mut program = Program::default();
        program.push(Decl::Struct(build::struct_decl("Box", vec![build::field("v", TypeNode::i32())])));
        let boxed = TypeNode::basic("Box");
        let x = build::param("x", boxed.clone());
        let e = build::binary(BinaryOp::Eq, build::local("x", x.id, boxed.clone()), build::null(), TypeNode::bool());
        push_fn(&mut program, build::func("f", vec![x], TypeNode::bool(), vec![build::ret(Some(e))]));
        let ir = compile(&program);
        let f = function(&ir, "f_Box");
        assert!(f.contains("extractvalue %struct.Box %r."), "{}", f);
        assert!(f.contains(", 1\n"));
        assert!(f.contains("xor i1"));
    }

    #[test]
    fn annotated_overload_calls_the_method_on_the_swapped_receiver() {
        let money = TypeNode::basic("Money");
        let (mut program, ids) = money_program(&[("__add__", money.clone())]);
        let overload = OperatorOverload { method: ids[0], target_type: money.clone(), swap_operands: true, negate_result: false };
        let f = money_fn(&mut program, BinaryOp::Add, Some(overload), money);
        assert!(f.contains("= call %struct.Money @Money___add___Money_ptr_Money(i8* null, %struct.Money* %b_ptr."), "{}", f);
        assert!(!f.contains("xor i1"));
    }

    #[test]
    fn unannotated_operator_finds_the_method_by_name() {
        let money = TypeNode::basic("Money");
        let (mut program, _) = money_program(&[("__add__", money.clone())]);
        let f = money_fn(&mut program, BinaryOp::Add, None, money);
        assert!(f.contains("@Money___add___Money_ptr_Money(i8* null, %struct.Money* %a_ptr."), "{}", f);
    }

    #[test]
    fn not_equal_falls_back_to_negated_eq() {
        let (mut program, _) = money_program(&[("__eq__", TypeNode::bool())]);
        let f = money_fn(&mut program, BinaryOp::Ne, None, TypeNode::bool());
        let call = f
            .lines()
            .map(str::trim)
            .find(|l| l.contains("= call i1 @Money___eq___Money_ptr_Money(i8* null, %struct.Money* %a_ptr."))
            .unwrap_or_else(|| panic!("no __eq__ call in\n{}", f));
        let result = call.split(" = ").next().unwrap();
        assert!(f.contains(&format!("= xor i1 {}, true", result)), "{}", f);
        // no structural comparison once an overload is found
        assert!(!f.contains("icmp ne i32"));
    }

    #[test]
    fn declared_ne_wins_over_the_eq_fallback() {
        let (mut program, _) = money_program(&[("__eq__", TypeNode::bool()), ("__ne__", TypeNode::bool())]);
        let f = money_fn(&mut program, BinaryOp::Ne, None, TypeNode::bool());
        assert!(f.contains("= call i1 @Money___ne___Money_ptr_Money("), "{}", f);
        assert!(!f.contains("@Money___eq__"));
        assert!(!f.contains("xor i1"));
    }
}
