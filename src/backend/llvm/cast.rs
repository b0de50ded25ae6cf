//! Representation casts
//!
//! Every conversion between two lowered types goes through [`cast_ir`];
//! the language-level check already happened, so any pair without a rule
//! here is a compiler bug.
//!
//! [`cast_ir`]: ModuleGenerator::cast_ir

use crate::middle::ir::IrType;
use crate::types::TypeNode;
use crate::utils::{Error, Result, Span};

use super::codegen::ModuleGenerator;

impl<'p> ModuleGenerator<'p> {
    /// Convert `value` from one source type to another
    pub(super) fn cast(&mut self, value: &str, from: &TypeNode, to: &TypeNode, span: Span) -> Result<String> {
        let to_ir = self.lower_resolved(to)?;
        if from.is_null_literal() || from.is_nullptr_literal() {
            return Ok(self.null_of(&to_ir));
        }
        let from_ir = self.lower_resolved(from)?;
        self.cast_ir(value, &from_ir, &to_ir, from.is_signed(), to.is_signed(), span)
    }

    /// The `null` constant of a lowered type
    pub(super) fn null_of(&self, ir: &IrType) -> String {
        match ir {
            IrType::Int(_) => "0".to_string(),
            IrType::Double => "0.0".to_string(),
            IrType::Ptr(_) => "null".to_string(),
            // a zeroed struct has its null bit clear
            _ => "zeroinitializer".to_string(),
        }
    }

    pub(super) fn cast_ir(
        &mut self,
        value: &str,
        from: &IrType,
        to: &IrType,
        from_signed: bool,
        to_signed: bool,
        span: Span,
    ) -> Result<String> {
        if from == to {
            return Ok(value.to_string());
        }

        // T -> T*: spill into a temporary
        if to.pointee() == Some(from) {
            let slot = self.ctx.slot("cast_tmp", from);
            self.ctx.emit(format!("store {} {}, {}* {}", from, value, from, slot));
            return Ok(slot);
        }
        // T* -> T: load
        if from.pointee() == Some(to) {
            let reg = self.ctx.reg();
            self.ctx.emit(format!("{} = load {}, {}* {}", reg, to, from, value));
            return Ok(reg);
        }

        let op = match (from, to) {
            (IrType::Ptr(_), IrType::Ptr(_)) => "bitcast",
            (IrType::Int(_), IrType::Ptr(_)) => "inttoptr",
            (IrType::Ptr(_), IrType::Int(_)) => "ptrtoint",
            (IrType::Double, IrType::Int(_)) => {
                if to_signed {
                    "fptosi"
                } else {
                    "fptoui"
                }
            }
            (IrType::Int(_), IrType::Double) => {
                if from_signed {
                    "sitofp"
                } else {
                    "uitofp"
                }
            }
            (IrType::Int(a), IrType::Int(b)) if a > b => "trunc",
            (IrType::Int(_), IrType::Int(_)) => {
                if from_signed {
                    "sext"
                } else {
                    "zext"
                }
            }
            (IrType::Enum(_), IrType::Enum(_)) => return Ok(self.retag(value, from, to)),
            (IrType::Struct(_), IrType::Struct(_)) => return Ok(self.reinterpret(value, from, to)),
            (IrType::Anon(a), IrType::Anon(b)) if a.len() == b.len() => {
                let (a, b) = (a.clone(), b.clone());
                return self.cast_elements(value, from, to, &a, &b, span);
            }
            _ => {
                return Err(Error::UnsupportedCast { from: from.to_string(), to: to.to_string(), span });
            }
        };
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = {} {} {} to {}", reg, op, from, value, to));
        Ok(reg)
    }

    /// Keep only the tag when converting between enum representations
    fn retag(&mut self, value: &str, from: &IrType, to: &IrType) -> String {
        let tag = self.ctx.reg();
        self.ctx.emit(format!("{} = extractvalue {} {}, 0", tag, from, value));
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = insertvalue {} zeroinitializer, i32 {}, 0", reg, to, tag));
        reg
    }

    /// View a struct value through another struct type (child as parent)
    fn reinterpret(&mut self, value: &str, from: &IrType, to: &IrType) -> String {
        let slot = self.ctx.slot("cast_tmp", from);
        self.ctx.emit(format!("store {} {}, {}* {}", from, value, from, slot));
        let view = self.ctx.reg();
        self.ctx.emit(format!("{} = bitcast {}* {} to {}*", view, from, slot, to));
        let reg = self.ctx.reg();
        self.ctx.emit(format!("{} = load {}, {}* {}", reg, to, to, view));
        reg
    }

    /// Element-wise conversion of tuples and closures
    fn cast_elements(
        &mut self,
        value: &str,
        from: &IrType,
        to: &IrType,
        from_parts: &[IrType],
        to_parts: &[IrType],
        span: Span,
    ) -> Result<String> {
        let mut acc = "undef".to_string();
        for (i, (a, b)) in from_parts.iter().zip(to_parts).enumerate() {
            let part = self.ctx.reg();
            self.ctx.emit(format!("{} = extractvalue {} {}, {}", part, from, value, i));
            let converted = self.cast_ir(&part, a, b, true, true, span)?;
            let next = self.ctx.reg();
            self.ctx.emit(format!("{} = insertvalue {} {}, {} {}, {}", next, to, acc, b, converted, i));
            acc = next;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::llvm::test_support::*;
    use crate::frontend::ast::{build, ExprKind, Program};
    use crate::middle::monomorph::mangle_type;
    use crate::types::TypeNode;

    /// Body of `f(x: from) -> to { return (to) x; }`
    fn cast_body(from: TypeNode, to: TypeNode) -> String {
        let p = build::param("x", from.clone());
        let x = build::local("x", p.id, from.clone());
        let cast = build::expr(ExprKind::Cast { expr: Box::new(x), target: to.clone() }, to.clone());
        let mut program = Program::default();
        push_fn(&mut program, build::func("f", vec![p], to, vec![build::ret(Some(cast))]));
        let ir = compile(&program);
        function(&ir, &format!("f_{}", mangle_type(&from))).to_string()
    }

    #[test]
    fn integer_widening_follows_source_signedness() {
        let f = cast_body(TypeNode::basic("i8"), TypeNode::i64());
        assert!(f.contains("sext i8 %r."), "{}", f);
        let f = cast_body(TypeNode::basic("u8"), TypeNode::i64());
        assert!(f.contains("zext i8 %r."), "{}", f);
        let f = cast_body(TypeNode::i64(), TypeNode::basic("i16"));
        assert!(f.contains("trunc i64 %r."), "{}", f);
    }

    #[test]
    fn float_conversions_pick_signedness() {
        let f = cast_body(TypeNode::double(), TypeNode::basic("u32"));
        assert!(f.contains("fptoui double"), "{}", f);
        let f = cast_body(TypeNode::basic("u32"), TypeNode::double());
        assert!(f.contains("uitofp i32"), "{}", f);
        let f = cast_body(TypeNode::i32(), TypeNode::double());
        assert!(f.contains("sitofp i32"), "{}", f);
    }

    #[test]
    fn pointer_reinterpretation() {
        let f = cast_body(TypeNode::i32().pointer(1), TypeNode::basic("i8").pointer(1));
        assert!(f.contains("bitcast i32* %r."), "{}", f);
        let f = cast_body(TypeNode::i32().pointer(1), TypeNode::i64());
        assert!(f.contains("ptrtoint i32* %r."), "{}", f);
    }

    #[test]
    fn same_type_cast_is_free() {
        let f = cast_body(TypeNode::i32(), TypeNode::i32());
        let loaded = f.lines().find(|l| l.contains("= load i32, i32* %x_ptr.")).unwrap();
        let reg = loaded.trim().split(' ').next().unwrap();
        assert!(f.contains(&format!("ret i32 {}", reg)), "{}", f);
    }
}
