//! Debug locations
//!
//! With `debug_info` on, every generated function gets a `DISubprogram` and
//! each statement moves the context's current `DILocation`, which the
//! context then attaches to everything it emits.

use crate::middle::debug_info::DebugInfo;
use crate::types::{PrimitiveType, TypeNode};
use crate::utils::Span;

use super::codegen::ModuleGenerator;

pub(super) const PRODUCER: &str = concat!("bplc ", env!("CARGO_PKG_VERSION"));

impl<'p> ModuleGenerator<'p> {
    /// Describe the function in `self.ctx` and point it at its declaration
    ///
    /// Call after the signature (linkage, symbol) is settled.
    pub(super) fn begin_subprogram(&mut self, name: &str, span: Span, ret: &TypeNode, params: &[TypeNode]) {
        let Some(info) = self.debug.as_mut() else {
            return;
        };
        let ret = di_type(info, ret);
        let params: Vec<Option<u32>> = params.iter().map(|p| di_type(info, p)).collect();
        let ty = info.subroutine_type(ret, &params);
        let local = self.ctx.function.linkage.starts_with("internal");
        let scope = info.subprogram(name, &self.ctx.function.name, span.line, ty, local);
        self.ctx.function.subprogram = Some(scope);
        self.ctx.location = Some(info.location(span.line, span.column, scope));
    }

    /// Attribute what is emitted next to `span`
    pub(super) fn set_location(&mut self, span: Span) {
        let (Some(info), Some(scope)) = (self.debug.as_mut(), self.ctx.function.subprogram) else {
            return;
        };
        // synthesized nodes keep the enclosing location
        if span.line == 0 {
            return;
        }
        self.ctx.location = Some(info.location(span.line, span.column, scope));
    }
}

fn di_type(info: &mut DebugInfo, ty: &TypeNode) -> Option<u32> {
    let basic = match ty {
        TypeNode::Meta { inner } => return di_type(info, inner),
        TypeNode::Basic(b) => b,
        _ => return Some(info.opaque_type(&ty.to_string())),
    };
    if let Some(count) = basic.array_dimensions.first() {
        let element = ty.element_type().and_then(|e| di_type(info, &e));
        return Some(info.array_type(element, *count));
    }
    if basic.pointer_depth > 0 {
        let pointee = ty.dereferenced().and_then(|inner| di_type(info, &inner));
        return Some(info.pointer_type(pointee));
    }
    match PrimitiveType::from_name(&basic.name) {
        Some(PrimitiveType::Void) => None,
        Some(PrimitiveType::Bool) => Some(info.basic_type("bool", 8, "DW_ATE_boolean")),
        Some(PrimitiveType::Int { bits, signed }) => {
            let (name, encoding) = c_integer(bits, signed);
            Some(info.basic_type(name, bits, encoding))
        }
        Some(PrimitiveType::Double) => Some(info.basic_type("double", 64, "DW_ATE_float")),
        Some(PrimitiveType::Str) => {
            let byte = info.basic_type("char", 8, "DW_ATE_signed_char");
            Some(info.pointer_type(Some(byte)))
        }
        Some(PrimitiveType::Null | PrimitiveType::NullPtr) => Some(info.pointer_type(None)),
        None => Some(info.opaque_type(&ty.to_string())),
    }
}

fn c_integer(bits: u32, signed: bool) -> (&'static str, &'static str) {
    match (bits, signed) {
        (8, true) => ("signed char", "DW_ATE_signed_char"),
        (8, false) => ("unsigned char", "DW_ATE_unsigned_char"),
        (16, true) => ("short", "DW_ATE_signed"),
        (16, false) => ("unsigned short", "DW_ATE_unsigned"),
        (64, true) => ("long", "DW_ATE_signed"),
        (64, false) => ("unsigned long", "DW_ATE_unsigned"),
        (_, false) => ("unsigned int", "DW_ATE_unsigned"),
        _ => ("int", "DW_ATE_signed"),
    }
}
