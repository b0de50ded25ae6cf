//! Function and operator overload resolution
//!
//! Candidates are ranked in three tiers: exact, widening, compatible. The
//! best non-empty tier wins; inside a tier non-generic candidates beat
//! generic ones, then declaration order decides.
#![allow(dead_code)]

use crate::frontend::ast::{BinaryOp, DeclId, UnaryOp};
use crate::middle::symbols::Overload;
use crate::middle::type_resolver::{substitute_type, type_map, TypeMap, TypeResolver};
use crate::types::{FunctionType, TypeNode};
use crate::utils::{Error, Result, Span};

/// Outcome of overload resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub decl: DeclId,
    /// Signature after generic substitution
    pub ty: FunctionType,
    pub generic_args: Vec<TypeNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Exact,
    Widening,
    Compatible,
}

/// Method name an operator dispatches to
pub fn binary_operator_method(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Add => "__add__",
        BinaryOp::Sub => "__sub__",
        BinaryOp::Mul => "__mul__",
        BinaryOp::Div => "__div__",
        BinaryOp::Mod => "__mod__",
        BinaryOp::BitAnd => "__and__",
        BinaryOp::BitOr => "__or__",
        BinaryOp::BitXor => "__xor__",
        BinaryOp::Shl => "__lshift__",
        BinaryOp::Shr => "__rshift__",
        BinaryOp::Eq => "__eq__",
        BinaryOp::Ne => "__ne__",
        BinaryOp::Lt => "__lt__",
        BinaryOp::Gt => "__gt__",
        BinaryOp::Le => "__le__",
        BinaryOp::Ge => "__ge__",
        BinaryOp::And | BinaryOp::Or => return None,
    })
}

pub fn unary_operator_method(op: UnaryOp) -> Option<&'static str> {
    match op {
        UnaryOp::Neg => Some("__neg__"),
        UnaryOp::BitNot => Some("__not__"),
        UnaryOp::Plus => Some("__pos__"),
        _ => None,
    }
}

/// An operator rewritten into a method call
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorMatch {
    pub method: DeclId,
    /// Receiver type the method was found on
    pub target_type: TypeNode,
    /// Method return type, substituted for generic receivers
    pub return_type: TypeNode,
}

/// Overload resolver over a [`TypeResolver`]
pub struct OverloadResolver<'r, 'a> {
    types: &'r TypeResolver<'a>,
}

impl<'r, 'a> OverloadResolver<'r, 'a> {
    pub fn new(types: &'r TypeResolver<'a>) -> Self {
        Self { types }
    }

    /// Pick the best candidate for a call with `arg_types`
    pub fn resolve_overload(
        &self,
        name: &str,
        candidates: &[Overload],
        arg_types: &[TypeNode],
        explicit_generic_args: &[TypeNode],
        span: Span,
    ) -> Result<Resolution> {
        let mut needs_inference = false;
        let mut ranked: Vec<(Tier, bool, usize, Resolution)> = Vec::new();

        for (order, candidate) in candidates.iter().enumerate() {
            let fixed = candidate.ty.param_types.len();
            let arity_ok = if candidate.ty.variadic { arg_types.len() >= fixed } else { arg_types.len() == fixed };
            if !arity_ok {
                continue;
            }

            let generic_params = self
                .types
                .program()
                .function(candidate.decl)
                .map(|f| f.generic_params.as_slice())
                .unwrap_or(&[]);
            let is_generic = !generic_params.is_empty();

            let map: TypeMap = if is_generic {
                if explicit_generic_args.is_empty() {
                    needs_inference = true;
                    continue;
                }
                if explicit_generic_args.len() != generic_params.len() {
                    continue;
                }
                type_map(generic_params, explicit_generic_args)
            } else {
                if !explicit_generic_args.is_empty() {
                    continue;
                }
                TypeMap::new()
            };

            let ty = substitute_signature(&candidate.ty, &map);
            if let Some(tier) = self.tier(&ty.param_types, arg_types) {
                ranked.push((
                    tier,
                    is_generic,
                    order,
                    Resolution { decl: candidate.decl, ty, generic_args: explicit_generic_args.to_vec() },
                ));
            }
        }

        if let Some((_, _, _, best)) = ranked.into_iter().min_by_key(|(tier, generic, order, _)| (*tier, *generic, *order)) {
            return Ok(best);
        }

        if needs_inference {
            return Err(Error::GenericInferenceUnsupported { name: name.to_string(), span });
        }

        Err(Error::NoMatchingOverload {
            name: name.to_string(),
            args: arg_types.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "),
            candidates: candidates
                .iter()
                .map(|c| format!("{}{}", name, TypeNode::Function(c.ty.clone())))
                .collect(),
            span,
        })
    }

    fn tier(&self, params: &[TypeNode], args: &[TypeNode]) -> Option<Tier> {
        let mut tier = Tier::Exact;
        for (param, arg) in params.iter().zip(args) {
            let t = if self.types.are_types_exact_match(param, arg) {
                Tier::Exact
            } else if self.types.is_implicit_widening_allowed(arg, param) {
                Tier::Widening
            } else if self.types.are_types_compatible(param, arg, false) {
                Tier::Compatible
            } else {
                return None;
            };
            tier = tier.max(t);
        }
        Some(tier)
    }

    /// Find the method an operator on `left` dispatches to
    ///
    /// `others` are the remaining operand types (empty for unary operators).
    pub fn find_operator_overload(
        &self,
        method_name: &str,
        left: &TypeNode,
        others: &[TypeNode],
    ) -> Option<OperatorMatch> {
        let (receiver, owner) = self.receiver_of(left)?;
        let program = self.types.program();

        for method in self.types.methods_named(owner, method_name) {
            let Some(decl) = program.function(method) else {
                continue;
            };
            if decl.is_static || decl.params.len() != others.len() + 1 {
                continue;
            }

            // receiver substitution for generic structs/enums
            let params = match program.decl(owner) {
                Some(crate::frontend::ast::Decl::Struct(s)) => &s.generic_params,
                Some(crate::frontend::ast::Decl::Enum(e)) => &e.generic_params,
                _ => continue,
            };
            let args = receiver.as_basic().map(|b| b.generic_args.clone()).unwrap_or_default();
            let map = type_map(params, &args);

            let self_ty = substitute_type(&decl.params[0].ty, &map);
            let self_ok = self.types.are_types_compatible(&self_ty, &receiver, false)
                || self.types.are_types_compatible(&self_ty, &receiver.address_of(), false);
            if !self_ok {
                continue;
            }

            let rest_ok = decl.params[1..].iter().zip(others).all(|(p, arg)| {
                let expected = substitute_type(&p.ty, &map);
                self.types.are_types_compatible(&expected, arg, false)
                    || expected.dereferenced().map_or(false, |inner| self.types.are_types_compatible(&inner, arg, false))
            });
            if !rest_ok {
                continue;
            }

            return Some(OperatorMatch {
                method,
                target_type: receiver.clone(),
                return_type: substitute_type(&decl.return_type, &map),
            });
        }
        None
    }

    /// Struct/enum value type the operand denotes; `*T` counts as `T`
    fn receiver_of(&self, ty: &TypeNode) -> Option<(TypeNode, DeclId)> {
        let value = match ty.pointer_depth() {
            0 => ty.clone(),
            1 => ty.dereferenced()?,
            _ => return None,
        };
        if !value.is_named_value() {
            return None;
        }
        let decl = self.types.declaration_of(&value)?;
        Some((value, decl))
    }
}

fn substitute_signature(ty: &FunctionType, map: &TypeMap) -> FunctionType {
    FunctionType {
        return_type: Box::new(substitute_type(&ty.return_type, map)),
        param_types: ty.param_types.iter().map(|p| substitute_type(p, map)).collect(),
        variadic: ty.variadic,
        declaration: ty.declaration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{build, Decl, Program};
    use crate::middle::symbols::SymbolTable;
    use pretty_assertions::assert_eq;

    fn overload(program: &mut Program, name: &str, params: Vec<TypeNode>, generic: bool) -> Overload {
        let mut f = build::func(
            name,
            params.iter().enumerate().map(|(i, t)| build::param(&format!("p{}", i), t.clone())).collect(),
            TypeNode::void(),
            vec![],
        );
        if generic {
            f.generic_params.push(build::generic_param("T"));
        }
        let ty = f.function_type();
        let decl = program.push(Decl::Function(f));
        Overload { decl, ty }
    }

    #[test]
    fn exact_beats_widening_beats_compatible() {
        let mut program = Program::default();
        let wide = overload(&mut program, "f", vec![TypeNode::i64()], false);
        let exact = overload(&mut program, "f", vec![TypeNode::basic("i8")], false);
        let symbols = SymbolTable::new();
        let types = TypeResolver::new(&program, &symbols);
        let resolver = OverloadResolver::new(&types);

        let candidates = vec![wide.clone(), exact.clone()];
        let r = resolver.resolve_overload("f", &candidates, &[TypeNode::basic("i8")], &[], Span::dummy()).unwrap();
        assert_eq!(r.decl, exact.decl);

        let r = resolver.resolve_overload("f", &candidates, &[TypeNode::basic("i16")], &[], Span::dummy()).unwrap();
        assert_eq!(r.decl, wide.decl);

        // u64 -> i64 is neither exact nor widening, both candidates are merely compatible
        let r = resolver.resolve_overload("f", &candidates, &[TypeNode::basic("u64")], &[], Span::dummy()).unwrap();
        assert_eq!(r.decl, wide.decl);
    }

    #[test]
    fn non_generic_preferred_within_tier() {
        let mut program = Program::default();
        let generic = overload(&mut program, "g", vec![TypeNode::basic("T")], true);
        let plain = overload(&mut program, "g", vec![TypeNode::i32()], false);
        let symbols = SymbolTable::new();
        let types = TypeResolver::new(&program, &symbols);
        let resolver = OverloadResolver::new(&types);

        let r = resolver
            .resolve_overload("g", &[generic.clone(), plain.clone()], &[TypeNode::i32()], &[TypeNode::i32()], Span::dummy());
        // explicit generic args rule out the non-generic candidate
        let r = r.unwrap();
        assert_eq!(r.decl, generic.decl);
        assert_eq!(r.ty.param_types, vec![TypeNode::i32()]);

        let r = resolver.resolve_overload("g", &[generic, plain.clone()], &[TypeNode::i32()], &[], Span::dummy()).unwrap();
        assert_eq!(r.decl, plain.decl);
    }

    #[test]
    fn generic_without_arguments_is_rejected() {
        let mut program = Program::default();
        let generic = overload(&mut program, "id", vec![TypeNode::basic("T")], true);
        let symbols = SymbolTable::new();
        let types = TypeResolver::new(&program, &symbols);
        let err = OverloadResolver::new(&types)
            .resolve_overload("id", &[generic], &[TypeNode::i32()], &[], Span::dummy())
            .unwrap_err();
        assert!(matches!(err, Error::GenericInferenceUnsupported { .. }));
    }

    #[test]
    fn no_match_lists_candidates() {
        let mut program = Program::default();
        let a = overload(&mut program, "h", vec![TypeNode::double()], false);
        let b = overload(&mut program, "h", vec![TypeNode::i32(), TypeNode::i32()], false);
        let symbols = SymbolTable::new();
        let types = TypeResolver::new(&program, &symbols);
        let err = OverloadResolver::new(&types)
            .resolve_overload("h", &[a, b], &[TypeNode::bool()], &[], Span::dummy())
            .unwrap_err();
        match err {
            Error::NoMatchingOverload { candidates, args, .. } => {
                assert_eq!(args, "bool");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn variadic_arity() {
        let mut program = Program::default();
        let mut v = overload(&mut program, "printf", vec![TypeNode::basic("string")], false);
        v.ty.variadic = true;
        let symbols = SymbolTable::new();
        let types = TypeResolver::new(&program, &symbols);
        let resolver = OverloadResolver::new(&types);
        let args = [TypeNode::basic("string"), TypeNode::i32(), TypeNode::double()];
        assert!(resolver.resolve_overload("printf", &[v.clone()], &args, &[], Span::dummy()).is_ok());
        assert!(resolver.resolve_overload("printf", &[v], &[], &[], Span::dummy()).is_err());
    }

    #[test]
    fn operator_lookup_accepts_pointer_receivers() {
        let mut program = Program::default();
        let vec_ty = TypeNode::basic("Vec2");
        let mut add = build::func(
            "__add__",
            vec![build::param("this", vec_ty.address_of()), build::param("other", vec_ty.clone())],
            vec_ty.clone(),
            vec![],
        );
        add.owner = Some(DeclId(1));
        let add_id = program.push(Decl::Function(add));
        let mut s = build::struct_decl("Vec2", vec![build::field("x", TypeNode::double())]);
        s.methods.push(add_id);
        program.push(Decl::Struct(s));
        let symbols = SymbolTable::from_program(&program).unwrap();
        let types = TypeResolver::new(&program, &symbols);
        let resolver = OverloadResolver::new(&types);

        let found = resolver
            .find_operator_overload(binary_operator_method(BinaryOp::Add).unwrap(), &vec_ty, &[vec_ty.clone()])
            .unwrap();
        assert_eq!(found.method, add_id);
        assert_eq!(found.return_type, vec_ty);
        assert!(resolver.find_operator_overload("__sub__", &vec_ty, &[vec_ty.clone()]).is_none());
        assert!(resolver.find_operator_overload("__add__", &TypeNode::i32(), &[TypeNode::i32()]).is_none());
    }

    #[test]
    fn generic_receiver_substitutes_return_type() {
        let mut program = Program::default();
        let boxed_t = TypeNode::generic("Box", vec![TypeNode::basic("T")]);
        let mut neg = build::func("__neg__", vec![build::param("this", boxed_t.address_of())], TypeNode::basic("T"), vec![]);
        neg.owner = Some(DeclId(1));
        let neg_id = program.push(Decl::Function(neg));
        let mut s = build::struct_decl("Box", vec![build::field("v", TypeNode::basic("T"))]);
        s.generic_params.push(build::generic_param("T"));
        s.methods.push(neg_id);
        program.push(Decl::Struct(s));
        let symbols = SymbolTable::from_program(&program).unwrap();
        let types = TypeResolver::new(&program, &symbols);
        let found = OverloadResolver::new(&types)
            .find_operator_overload("__neg__", &TypeNode::generic("Box", vec![TypeNode::double()]), &[])
            .unwrap();
        assert_eq!(found.return_type, TypeNode::double());
    }
}
