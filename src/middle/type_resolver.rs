//! Type resolution and type relations
//!
//! Resolves names against the symbol table (attaching declarations, expanding
//! aliases, checking generic constraints), substitutes generic parameters and
//! answers the three relations the rest of the back end relies on:
//! compatibility, exact match and implicit widening.
#![allow(dead_code)]

use std::collections::HashMap;

use crate::frontend::ast::{Decl, DeclId, EnumDecl, GenericParam, Program, StructDecl};
use crate::middle::symbols::{SymbolKind, SymbolTable};
use crate::types::{BasicType, FunctionType, PrimitiveType, TypeNode};
use crate::utils::{Error, Result, Span};

/// Generic substitution map: parameter name -> concrete type
pub type TypeMap = HashMap<String, TypeNode>;

/// Guard against alias cycles
const MAX_ALIAS_DEPTH: usize = 32;

/// Type resolver bound to one program and its global scope
pub struct TypeResolver<'a> {
    program: &'a Program,
    symbols: &'a SymbolTable,
}

impl<'a> TypeResolver<'a> {
    pub fn new(program: &'a Program, symbols: &'a SymbolTable) -> Self {
        Self { program, symbols }
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    pub fn symbols(&self) -> &'a SymbolTable {
        self.symbols
    }

    // ==================== Resolution ====================

    /// Resolve a type written in source against the symbol table
    pub fn resolve(&self, ty: &TypeNode, check_constraints: bool) -> Result<TypeNode> {
        self.resolve_in(ty, &[], check_constraints)
    }

    /// Resolve with `generic_params` treated as opaque in-scope names
    pub fn resolve_in(&self, ty: &TypeNode, generic_params: &[String], check_constraints: bool) -> Result<TypeNode> {
        self.resolve_depth(ty, generic_params, check_constraints, 0)
    }

    fn resolve_depth(
        &self,
        ty: &TypeNode,
        generic_params: &[String],
        check: bool,
        depth: usize,
    ) -> Result<TypeNode> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(Error::Internal(format!("alias expansion too deep while resolving {}", ty)));
        }
        match ty {
            TypeNode::Basic(b) => {
                let args = b
                    .generic_args
                    .iter()
                    .map(|a| self.resolve_depth(a, generic_params, check, depth))
                    .collect::<Result<Vec<_>>>()?;

                if PrimitiveType::from_name(&b.name).is_some() || generic_params.contains(&b.name) {
                    return Ok(TypeNode::Basic(BasicType { generic_args: args, ..b.clone() }));
                }

                let symbol = self
                    .symbols
                    .lookup(&b.name)
                    .ok_or_else(|| Error::UnknownType { name: b.name.clone(), span: Span::dummy() })?;
                let decl_id = symbol
                    .declaration
                    .ok_or_else(|| Error::UnknownType { name: b.name.clone(), span: Span::dummy() })?;

                match symbol.kind {
                    SymbolKind::Struct | SymbolKind::Enum => {
                        let params = self.generic_params_of(decl_id);
                        if !args.is_empty() && args.len() != params.len() {
                            return Err(Error::GenericArgCount {
                                name: b.name.clone(),
                                expected: params.len(),
                                got: args.len(),
                                span: Span::dummy(),
                            });
                        }
                        if check {
                            for (param, arg) in params.iter().zip(&args) {
                                if let Some(constraint) = &param.constraint {
                                    if !self.satisfies_constraint(arg, constraint) {
                                        return Err(Error::ConstraintViolation {
                                            ty: arg.to_string(),
                                            constraint: constraint.to_string(),
                                            param: param.name.clone(),
                                            span: Span::dummy(),
                                        });
                                    }
                                }
                            }
                        }
                        Ok(TypeNode::Basic(BasicType {
                            name: b.name.clone(),
                            generic_args: args,
                            pointer_depth: b.pointer_depth,
                            array_dimensions: b.array_dimensions.clone(),
                            declaration: Some(decl_id),
                        }))
                    }
                    SymbolKind::TypeAlias => {
                        let expanded = self.expand_alias(decl_id, b, &args)?;
                        self.resolve_depth(&expanded, generic_params, check, depth + 1)
                    }
                    SymbolKind::Spec => Ok(TypeNode::Basic(BasicType {
                        generic_args: args,
                        declaration: Some(decl_id),
                        ..b.clone()
                    })),
                    _ => Err(Error::UnknownType { name: b.name.clone(), span: Span::dummy() }),
                }
            }
            TypeNode::Tuple { elements } => Ok(TypeNode::Tuple {
                elements: elements
                    .iter()
                    .map(|e| self.resolve_depth(e, generic_params, check, depth))
                    .collect::<Result<Vec<_>>>()?,
            }),
            TypeNode::Function(f) => Ok(TypeNode::Function(FunctionType {
                return_type: Box::new(self.resolve_depth(&f.return_type, generic_params, check, depth)?),
                param_types: f
                    .param_types
                    .iter()
                    .map(|p| self.resolve_depth(p, generic_params, check, depth))
                    .collect::<Result<Vec<_>>>()?,
                variadic: f.variadic,
                declaration: f.declaration,
            })),
            TypeNode::Meta { inner } => Ok(TypeNode::Meta {
                inner: Box::new(self.resolve_depth(inner, generic_params, check, depth)?),
            }),
        }
    }

    /// Alias target with its generic parameters substituted and the use-site
    /// qualifiers concatenated
    fn expand_alias(&self, decl: DeclId, use_site: &BasicType, args: &[TypeNode]) -> Result<TypeNode> {
        let Some(Decl::TypeAlias(alias)) = self.program.decl(decl) else {
            return Err(Error::Internal(format!("{} is not a type alias", use_site.name)));
        };
        let mut map = TypeMap::new();
        for (param, arg) in alias.generic_params.iter().zip(args) {
            map.insert(param.name.clone(), arg.clone());
        }
        let target = substitute_type(&alias.target, &map);
        Ok(add_qualifiers(target, use_site.pointer_depth, &use_site.array_dimensions))
    }

    /// Expand aliases and spell `string` as `*i8` so relations compare like with like
    pub fn normalize(&self, ty: &TypeNode) -> TypeNode {
        self.normalize_depth(ty, 0)
    }

    fn normalize_depth(&self, ty: &TypeNode, depth: usize) -> TypeNode {
        if depth > MAX_ALIAS_DEPTH {
            return ty.clone();
        }
        match ty {
            TypeNode::Basic(b) => {
                if b.name == "string" {
                    let byte = TypeNode::basic("i8").pointer(1);
                    return add_qualifiers(byte, b.pointer_depth, &b.array_dimensions);
                }
                if PrimitiveType::from_name(&b.name).is_none() {
                    if let Some(symbol) = self.symbols.lookup(&b.name) {
                        if symbol.kind == SymbolKind::TypeAlias {
                            if let Some(decl) = symbol.declaration {
                                if let Ok(expanded) = self.expand_alias(decl, b, &b.generic_args) {
                                    return self.normalize_depth(&expanded, depth + 1);
                                }
                            }
                        }
                    }
                }
                TypeNode::Basic(BasicType {
                    generic_args: b.generic_args.iter().map(|a| self.normalize_depth(a, depth)).collect(),
                    ..b.clone()
                })
            }
            TypeNode::Tuple { elements } => TypeNode::Tuple {
                elements: elements.iter().map(|e| self.normalize_depth(e, depth)).collect(),
            },
            TypeNode::Function(f) => TypeNode::Function(FunctionType {
                return_type: Box::new(self.normalize_depth(&f.return_type, depth)),
                param_types: f.param_types.iter().map(|p| self.normalize_depth(p, depth)).collect(),
                variadic: f.variadic,
                declaration: f.declaration,
            }),
            TypeNode::Meta { inner } => TypeNode::Meta { inner: Box::new(self.normalize_depth(inner, depth)) },
        }
    }

    // ==================== Declarations ====================

    /// Declaration a basic type names (via annotation or symbol lookup)
    pub fn declaration_of(&self, ty: &TypeNode) -> Option<DeclId> {
        let b = ty.as_basic()?;
        if let Some(decl) = b.declaration {
            return Some(decl);
        }
        if PrimitiveType::from_name(&b.name).is_some() {
            return None;
        }
        self.symbols.lookup(&b.name)?.declaration
    }

    pub fn struct_of(&self, ty: &TypeNode) -> Option<(DeclId, &'a StructDecl)> {
        let id = self.declaration_of(ty)?;
        self.program.struct_decl(id).map(|s| (id, s))
    }

    pub fn enum_of(&self, ty: &TypeNode) -> Option<(DeclId, &'a EnumDecl)> {
        let id = self.declaration_of(ty)?;
        self.program.enum_decl(id).map(|e| (id, e))
    }

    pub fn struct_by_name(&self, name: &str) -> Option<(DeclId, &'a StructDecl)> {
        let symbol = self.symbols.lookup(name)?;
        let id = symbol.declaration?;
        self.program.struct_decl(id).map(|s| (id, s))
    }

    fn generic_params_of(&self, decl: DeclId) -> &'a [GenericParam] {
        match self.program.decl(decl) {
            Some(Decl::Struct(s)) => &s.generic_params,
            Some(Decl::Enum(e)) => &e.generic_params,
            Some(Decl::TypeAlias(a)) => &a.generic_params,
            Some(Decl::Function(f)) => &f.generic_params,
            _ => &[],
        }
    }

    /// Is `child` the same struct as `parent` or derived from it
    pub fn is_subtype(&self, child: &str, parent: &str) -> bool {
        let mut current = child.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            if current == parent {
                return true;
            }
            let Some((_, decl)) = self.struct_by_name(&current) else {
                return false;
            };
            match decl.parent.as_ref().and_then(|p| p.name()) {
                Some(next) => current = next.to_string(),
                None => return false,
            }
        }
        false
    }

    /// Does `arg` satisfy a generic parameter's constraint
    pub fn satisfies_constraint(&self, arg: &TypeNode, constraint: &TypeNode) -> bool {
        let Some(constraint_name) = constraint.name() else {
            return self.are_types_compatible(constraint, arg, false);
        };
        let spec = self
            .symbols
            .lookup(constraint_name)
            .filter(|s| s.kind == SymbolKind::Spec)
            .and_then(|s| s.declaration)
            .and_then(|id| match self.program.decl(id) {
                Some(Decl::Spec(spec)) => Some(spec),
                _ => None,
            });

        let Some(spec) = spec else {
            return self.are_types_compatible(constraint, arg, false);
        };

        let Some(arg_name) = arg.name() else {
            return false;
        };
        let mut current = self.struct_by_name(arg_name);
        // declared on the struct or any ancestor
        while let Some((_, decl)) = current {
            if decl.implements.iter().any(|i| i.name() == Some(spec.name.as_str())) {
                return true;
            }
            current = decl
                .parent
                .as_ref()
                .and_then(|p| p.name())
                .and_then(|n| self.struct_by_name(n));
        }
        // structural conformance by method name
        spec.methods.iter().all(|m| self.find_method(arg_name, &m.name).is_some())
    }

    /// First method named `method` on the struct or its ancestors
    pub fn find_method(&self, struct_name: &str, method: &str) -> Option<DeclId> {
        self.find_method_owner(struct_name, method).map(|(_, m)| m)
    }

    /// Owning struct and method id, searching the inheritance chain upward
    pub fn find_method_owner(&self, struct_name: &str, method: &str) -> Option<(DeclId, DeclId)> {
        let mut current = self.struct_by_name(struct_name);
        for _ in 0..MAX_ALIAS_DEPTH {
            let (owner, decl) = current?;
            let found = decl
                .methods
                .iter()
                .copied()
                .find(|m| self.program.function(*m).map_or(false, |f| f.name == method));
            if let Some(m) = found {
                return Some((owner, m));
            }
            current = decl
                .parent
                .as_ref()
                .and_then(|p| p.name())
                .and_then(|n| self.struct_by_name(n));
        }
        None
    }

    /// Methods named `method` declared directly on a struct or enum
    pub fn methods_named(&self, owner: DeclId, method: &str) -> Vec<DeclId> {
        let methods = match self.program.decl(owner) {
            Some(Decl::Struct(s)) => &s.methods,
            Some(Decl::Enum(e)) => &e.methods,
            _ => return Vec::new(),
        };
        methods
            .iter()
            .copied()
            .filter(|m| self.program.function(*m).map_or(false, |f| f.name == method))
            .collect()
    }

    fn is_struct_value(&self, ty: &TypeNode) -> bool {
        ty.is_named_value() && self.struct_of(ty).is_some()
    }

    // ==================== Relations ====================

    /// Structural compatibility
    pub fn are_types_compatible(&self, a: &TypeNode, b: &TypeNode, check_constraints: bool) -> bool {
        let a = self.normalize(a);
        let b = self.normalize(b);
        self.compatible(&a, &b, check_constraints)
    }

    fn compatible(&self, a: &TypeNode, b: &TypeNode, check: bool) -> bool {
        match (a, b) {
            (TypeNode::Basic(x), TypeNode::Basic(y)) => self.basic_compatible(a, x, b, y, check),
            (TypeNode::Tuple { elements: xs }, TypeNode::Tuple { elements: ys }) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| self.compatible(x, y, check))
            }
            (TypeNode::Function(f), TypeNode::Function(g)) => {
                f.variadic == g.variadic
                    && f.param_types.len() == g.param_types.len()
                    && self.compatible(&f.return_type, &g.return_type, check)
                    && f.param_types.iter().zip(&g.param_types).all(|(x, y)| self.compatible(x, y, check))
            }
            (TypeNode::Meta { inner: x }, TypeNode::Meta { inner: y }) => self.compatible(x, y, check),
            _ => false,
        }
    }

    fn basic_compatible(&self, a: &TypeNode, x: &BasicType, b: &TypeNode, y: &BasicType, check: bool) -> bool {
        // literal null/nullptr
        if a.is_nullptr_literal() || b.is_nullptr_literal() {
            let other = if a.is_nullptr_literal() { b } else { a };
            return other.pointer_depth() > 0 || other.is_nullptr_literal() || other.is_null_literal();
        }
        if a.is_null_literal() || b.is_null_literal() {
            let other = if a.is_null_literal() { b } else { a };
            return other.pointer_depth() > 0 || other.is_null_literal() || self.is_struct_value(other);
        }

        // implicit numeric coercion between integers
        if a.is_integer() && b.is_integer() {
            return true;
        }

        // *i8 / *void against any pointer
        if x.pointer_depth > 0 && y.pointer_depth > 0 && (is_byte_pointer(x) || is_byte_pointer(y)) {
            return true;
        }

        let xn = canonical_name(&x.name);
        let yn = canonical_name(&y.name);
        if xn != yn && !self.is_subtype(&x.name, &y.name) && !self.is_subtype(&y.name, &x.name) {
            return false;
        }

        // array on the right decays to a pointer one level shallower
        let decays = x.pointer_depth == y.pointer_depth + 1 && !y.array_dimensions.is_empty();
        if x.pointer_depth != y.pointer_depth && !decays {
            return false;
        }
        if !decays && x.array_dimensions != y.array_dimensions {
            return false;
        }

        // raw generic name is a wildcard for any instantiation of itself
        if x.generic_args.is_empty() || y.generic_args.is_empty() {
            return true;
        }
        x.generic_args.len() == y.generic_args.len()
            && x.generic_args.iter().zip(&y.generic_args).all(|(p, q)| self.compatible(p, q, check))
    }

    /// Same structural walk with identical names only
    pub fn are_types_exact_match(&self, a: &TypeNode, b: &TypeNode) -> bool {
        types_exact_match(&self.normalize(a), &self.normalize(b))
    }

    /// Implicit integer widening used to rank overloads
    pub fn is_implicit_widening_allowed(&self, source: &TypeNode, target: &TypeNode) -> bool {
        let (Some(s), Some(t)) = (self.normalize(source).primitive(), self.normalize(target).primitive()) else {
            return false;
        };
        if !s.is_integer() || !t.is_integer() {
            return false;
        }
        let (sr, tr) = (s.rank(), t.rank());
        match (s.is_signed(), t.is_signed()) {
            (true, true) | (false, false) if sr < tr => true,
            (false, true) => sr < tr,
            (true, true) => sr == 64 && tr == 32,
            (false, false) => sr == 64 && tr == 32 && s != PrimitiveType::Bool,
            (true, false) => false,
        }
    }

    /// Explicit `cast<T>(x)` legality at the language level
    pub fn is_cast_allowed(&self, source: &TypeNode, target: &TypeNode) -> bool {
        if self.are_types_compatible(source, target, false) {
            return true;
        }
        let s = self.normalize(source);
        let t = self.normalize(target);
        let numeric = |ty: &TypeNode| ty.is_integer() || ty.is_float();
        if numeric(&s) && numeric(&t) {
            return true;
        }
        if s.pointer_depth() > 0 && t.pointer_depth() > 0 {
            return true;
        }
        let word = |ty: &TypeNode| {
            matches!(ty.primitive(), Some(PrimitiveType::Int { bits, .. }) if bits >= 32)
        };
        (s.pointer_depth() > 0 && word(&t)) || (t.pointer_depth() > 0 && word(&s))
    }
}

/// Structural exact match without alias expansion
pub fn types_exact_match(a: &TypeNode, b: &TypeNode) -> bool {
    match (a, b) {
        (TypeNode::Basic(x), TypeNode::Basic(y)) => {
            canonical_name(&x.name) == canonical_name(&y.name)
                && x.pointer_depth == y.pointer_depth
                && x.array_dimensions == y.array_dimensions
                && x.generic_args.len() == y.generic_args.len()
                && x.generic_args.iter().zip(&y.generic_args).all(|(p, q)| types_exact_match(p, q))
        }
        (TypeNode::Tuple { elements: xs }, TypeNode::Tuple { elements: ys }) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| types_exact_match(x, y))
        }
        (TypeNode::Function(f), TypeNode::Function(g)) => {
            f.variadic == g.variadic
                && f.param_types.len() == g.param_types.len()
                && types_exact_match(&f.return_type, &g.return_type)
                && f.param_types.iter().zip(&g.param_types).all(|(x, y)| types_exact_match(x, y))
        }
        (TypeNode::Meta { inner: x }, TypeNode::Meta { inner: y }) => types_exact_match(x, y),
        _ => false,
    }
}

/// Replace generic parameter names using `map`, merging qualifiers
pub fn substitute_type(ty: &TypeNode, map: &TypeMap) -> TypeNode {
    if map.is_empty() {
        return ty.clone();
    }
    match ty {
        TypeNode::Basic(b) => {
            if b.generic_args.is_empty() {
                if let Some(replacement) = map.get(&b.name) {
                    return add_qualifiers(replacement.clone(), b.pointer_depth, &b.array_dimensions);
                }
            }
            TypeNode::Basic(BasicType {
                generic_args: b.generic_args.iter().map(|a| substitute_type(a, map)).collect(),
                ..b.clone()
            })
        }
        TypeNode::Tuple { elements } => TypeNode::Tuple {
            elements: elements.iter().map(|e| substitute_type(e, map)).collect(),
        },
        TypeNode::Function(f) => TypeNode::Function(FunctionType {
            return_type: Box::new(substitute_type(&f.return_type, map)),
            param_types: f.param_types.iter().map(|p| substitute_type(p, map)).collect(),
            variadic: f.variadic,
            declaration: f.declaration,
        }),
        TypeNode::Meta { inner } => TypeNode::Meta { inner: Box::new(substitute_type(inner, map)) },
    }
}

/// Build a substitution map from parameters and arguments
pub fn type_map(params: &[GenericParam], args: &[TypeNode]) -> TypeMap {
    params.iter().zip(args).map(|(p, a)| (p.name.clone(), a.clone())).collect()
}

fn add_qualifiers(ty: TypeNode, pointer_depth: u32, dims: &[u64]) -> TypeNode {
    match ty {
        TypeNode::Basic(mut b) => {
            b.pointer_depth += pointer_depth;
            b.array_dimensions.extend_from_slice(dims);
            TypeNode::Basic(b)
        }
        other => other,
    }
}

fn canonical_name(name: &str) -> &str {
    match PrimitiveType::from_name(name) {
        Some(PrimitiveType::Str) => "string",
        Some(p) => p.canonical_name(),
        None => name,
    }
}

fn is_byte_pointer(b: &BasicType) -> bool {
    b.pointer_depth == 1 && b.array_dimensions.is_empty() && matches!(b.name.as_str(), "i8" | "u8" | "char" | "void")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{build, Decl, SpecDecl, SpecMethod, TypeAliasDecl};
    use pretty_assertions::assert_eq;

    const INTS: [&str; 12] = ["i8", "u8", "i16", "u16", "i32", "u32", "i64", "u64", "int", "uint", "char", "bool"];

    fn fixture() -> (Program, SymbolTable) {
        let mut program = Program::default();
        let mut base = build::struct_decl("Base", vec![build::field("id", TypeNode::i32())]);
        let describe = program.push(Decl::Function(build::func("describe", vec![], TypeNode::void(), vec![])));
        base.methods.push(describe);
        program.push(Decl::Struct(base));
        let mut derived = build::struct_decl("Derived", vec![]);
        derived.parent = Some(TypeNode::basic("Base"));
        program.push(Decl::Struct(derived));
        let mut boxed = build::struct_decl("Box", vec![build::field("value", TypeNode::basic("T"))]);
        boxed.generic_params.push(build::generic_param("T"));
        program.push(Decl::Struct(boxed));
        program.push(Decl::TypeAlias(TypeAliasDecl {
            name: "Bytes".to_string(),
            generic_params: vec![],
            target: TypeNode::basic("u8").pointer(1),
            span: Span::dummy(),
        }));
        program.push(Decl::Spec(SpecDecl {
            name: "Describable".to_string(),
            methods: vec![SpecMethod {
                name: "describe".to_string(),
                ty: FunctionType {
                    return_type: Box::new(TypeNode::void()),
                    param_types: vec![],
                    variadic: false,
                    declaration: None,
                },
            }],
            span: Span::dummy(),
        }));
        let mut constrained = build::struct_decl("Holder", vec![]);
        constrained.generic_params.push(crate::frontend::ast::GenericParam {
            name: "T".to_string(),
            constraint: Some(TypeNode::basic("Describable")),
        });
        program.push(Decl::Struct(constrained));
        let symbols = SymbolTable::from_program(&program).unwrap();
        (program, symbols)
    }

    #[test]
    fn integers_are_mutually_compatible() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        for a in INTS {
            for b in INTS {
                let (ta, tb) = (TypeNode::basic(a), TypeNode::basic(b));
                assert!(r.are_types_compatible(&ta, &tb, false), "{} vs {}", a, b);
                assert!(r.are_types_compatible(&tb, &ta, false), "{} vs {}", b, a);
            }
        }
        assert!(!r.are_types_compatible(&TypeNode::i32(), &TypeNode::double(), false));
    }

    #[test]
    fn null_and_pointer_rules() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        let null = TypeNode::basic("null");
        let nullptr = TypeNode::basic("nullptr");
        let base = TypeNode::basic("Base");
        assert!(r.are_types_compatible(&null, &base, false));
        assert!(r.are_types_compatible(&base.address_of(), &null, false));
        assert!(!r.are_types_compatible(&nullptr, &base, false));
        assert!(r.are_types_compatible(&nullptr, &TypeNode::i32().pointer(2), false));
        assert!(r.are_types_compatible(&TypeNode::void_ptr(), &base.address_of(), false));
        assert!(!r.are_types_compatible(&TypeNode::i32().pointer(1), &TypeNode::double().pointer(1), false));
    }

    #[test]
    fn subtypes_and_array_decay() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        assert!(r.are_types_compatible(&TypeNode::basic("Base"), &TypeNode::basic("Derived"), false));
        assert!(r.is_subtype("Derived", "Base"));
        assert!(!r.is_subtype("Base", "Derived"));
        let arr = TypeNode::i32().array(&[4]);
        assert!(r.are_types_compatible(&TypeNode::i32().pointer(1), &arr, false));
        assert!(!r.are_types_compatible(&TypeNode::i32().array(&[3]), &arr, false));
    }

    #[test]
    fn raw_generic_name_is_a_wildcard() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        let raw = TypeNode::basic("Box");
        let inst = TypeNode::generic("Box", vec![TypeNode::double()]);
        let other = TypeNode::generic("Box", vec![TypeNode::basic("Base")]);
        assert!(r.are_types_compatible(&raw, &inst, false));
        assert!(!r.are_types_compatible(&inst, &other, false));
        assert!(!r.are_types_exact_match(&raw, &inst));
    }

    #[test]
    fn exact_match_uses_canonical_names_and_aliases() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        assert!(r.are_types_exact_match(&TypeNode::basic("int"), &TypeNode::i32()));
        assert!(!r.are_types_exact_match(&TypeNode::i32(), &TypeNode::i64()));
        assert!(r.are_types_exact_match(&TypeNode::basic("Bytes"), &TypeNode::basic("u8").pointer(1)));
    }

    #[test]
    fn widening_rules() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        let t = TypeNode::basic;
        assert!(r.is_implicit_widening_allowed(&t("i8"), &t("i32")));
        assert!(r.is_implicit_widening_allowed(&t("u16"), &t("u64")));
        assert!(r.is_implicit_widening_allowed(&t("u8"), &t("i16")));
        assert!(!r.is_implicit_widening_allowed(&t("u32"), &t("i32")));
        assert!(!r.is_implicit_widening_allowed(&t("i8"), &t("u32")));
        assert!(!r.is_implicit_widening_allowed(&t("i32"), &t("i16")));
        assert!(r.is_implicit_widening_allowed(&t("i64"), &t("i32")));
        assert!(r.is_implicit_widening_allowed(&t("u64"), &t("u32")));
        assert!(!r.is_implicit_widening_allowed(&t("double"), &t("i64")));
    }

    #[test]
    fn resolve_attaches_declarations_and_expands_aliases() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        let resolved = r.resolve(&TypeNode::generic("Box", vec![TypeNode::i32()]).pointer(1), true).unwrap();
        let b = resolved.as_basic().unwrap();
        assert!(b.declaration.is_some());
        assert_eq!(b.pointer_depth, 1);

        let alias = r.resolve(&TypeNode::basic("Bytes").array(&[2]), true).unwrap();
        assert_eq!(alias, TypeNode::basic("u8").pointer(1).array(&[2]));

        assert!(matches!(r.resolve(&TypeNode::basic("Nope"), false), Err(Error::UnknownType { .. })));
        assert!(matches!(
            r.resolve(&TypeNode::generic("Box", vec![TypeNode::i32(), TypeNode::i32()]), false),
            Err(Error::GenericArgCount { .. })
        ));
    }

    #[test]
    fn constraints_are_checked() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        // Base provides `describe` structurally, Derived inherits it
        assert!(r.resolve(&TypeNode::generic("Holder", vec![TypeNode::basic("Derived")]), true).is_ok());
        let err = r.resolve(&TypeNode::generic("Holder", vec![TypeNode::i32()]), true).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation { .. }));
        assert!(r.resolve(&TypeNode::generic("Holder", vec![TypeNode::i32()]), false).is_ok());
    }

    #[test]
    fn substitution_merges_qualifiers() {
        let mut map = TypeMap::new();
        map.insert("T".to_string(), TypeNode::i32().pointer(1));
        let ty = TypeNode::basic("T").pointer(1).array(&[3]);
        assert_eq!(substitute_type(&ty, &map), TypeNode::i32().pointer(2).array(&[3]));
        let nested = TypeNode::generic("Box", vec![TypeNode::basic("T")]);
        assert_eq!(
            substitute_type(&nested, &map),
            TypeNode::generic("Box", vec![TypeNode::i32().pointer(1)])
        );
    }

    #[test]
    fn casts() {
        let (program, symbols) = fixture();
        let r = TypeResolver::new(&program, &symbols);
        assert!(r.is_cast_allowed(&TypeNode::double(), &TypeNode::i32()));
        assert!(r.is_cast_allowed(&TypeNode::i64(), &TypeNode::basic("Base").pointer(1)));
        assert!(!r.is_cast_allowed(&TypeNode::basic("i16"), &TypeNode::i32().pointer(1)));
        assert!(!r.is_cast_allowed(&TypeNode::basic("Base"), &TypeNode::i32()));
    }
}
