//! Generic instantiation and name mangling
//!
//! Instantiations are collected into a worklist while code is generated and
//! drained afterwards, so generating one function never has to suspend
//! another. The registry of emitted names makes instantiation idempotent.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};

use log::trace;

use crate::frontend::ast::DeclId;
use crate::middle::type_resolver::TypeMap;
use crate::types::{FunctionType, PrimitiveType, TypeNode};

/// Stable textual encoding of a type for use inside symbol names
pub fn mangle_type(ty: &TypeNode) -> String {
    match ty {
        TypeNode::Basic(b) => {
            let mut name = match PrimitiveType::from_name(&b.name) {
                Some(p) => p.canonical_name().to_string(),
                None => b.name.clone(),
            };
            if !b.generic_args.is_empty() {
                let args: Vec<String> = b.generic_args.iter().map(mangle_type).collect();
                name = format!("{}_{}", name, args.join("_"));
            }
            let mut name = name.replace('.', "_");
            for _ in 0..b.pointer_depth {
                name.push_str("_ptr");
            }
            for dim in &b.array_dimensions {
                name.push_str(&format!("_arr_{}_", dim));
            }
            name
        }
        TypeNode::Function(_) => "fn".to_string(),
        TypeNode::Tuple { elements } => {
            let parts: Vec<String> = elements.iter().map(mangle_type).collect();
            format!("tup{}_{}", elements.len(), parts.join("_"))
        }
        TypeNode::Meta { inner } => mangle_type(inner),
    }
}

/// Symbol name of a function
///
/// `main` and externs keep their source name; everything else is suffixed
/// with its parameter types and then its generic arguments.
pub fn mangled_name(name: &str, ty: &FunctionType, is_extern: bool, generic_args: &[TypeNode]) -> String {
    if name == "main" || is_extern {
        return name.to_string();
    }
    let params: Vec<String> = ty.param_types.iter().map(mangle_type).collect();
    let mut mangled = format!("{}_{}", name.replace('.', "_"), params.join("_"));
    if !generic_args.is_empty() {
        let args: Vec<String> = generic_args.iter().map(mangle_type).collect();
        mangled.push('_');
        mangled.push_str(&args.join("_"));
    }
    mangled
}

/// Name of a struct or enum instance (`Box<i32>` -> `Box_i32`)
pub fn instance_name(base: &str, generic_args: &[TypeNode]) -> String {
    let base = base.replace('.', "_");
    if generic_args.is_empty() {
        return base;
    }
    let args: Vec<String> = generic_args.iter().map(mangle_type).collect();
    format!("{}_{}", base, args.join("_"))
}

/// A parameter mapped to itself has not been instantiated yet
pub fn is_concrete(map: &TypeMap) -> bool {
    map.iter().all(|(param, ty)| !mentions(ty, param))
}

fn mentions(ty: &TypeNode, param: &str) -> bool {
    match ty {
        TypeNode::Basic(b) => b.name == param || b.generic_args.iter().any(|a| mentions(a, param)),
        TypeNode::Tuple { elements } => elements.iter().any(|e| mentions(e, param)),
        TypeNode::Function(f) => mentions(&f.return_type, param) || f.param_types.iter().any(|p| mentions(p, param)),
        TypeNode::Meta { inner } => mentions(inner, param),
    }
}

/// Function body waiting to be generated
#[derive(Debug, Clone)]
pub struct Instantiation {
    pub decl: DeclId,
    pub mangled: String,
    /// Substitution active while lowering the body
    pub type_map: TypeMap,
    /// Concrete struct/enum name for methods of generic receivers
    pub owner: Option<String>,
}

/// Registry of emitted symbols plus the pending worklist
#[derive(Debug, Default)]
pub struct Monomorphizer {
    emitted: HashSet<String>,
    pending: VecDeque<Instantiation>,
}

impl Monomorphizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a function body unless it was already requested
    ///
    /// Returns false for duplicates and for maps that are not concrete.
    pub fn request(&mut self, inst: Instantiation) -> bool {
        if !is_concrete(&inst.type_map) {
            trace!("skipping non-concrete instantiation {}", inst.mangled);
            return false;
        }
        if !self.emitted.insert(inst.mangled.clone()) {
            return false;
        }
        trace!("queued {}", inst.mangled);
        self.pending.push_back(inst);
        true
    }

    #[cfg(test)]
    pub fn is_emitted(&self, name: &str) -> bool {
        self.emitted.contains(name)
    }

    pub fn next(&mut self) -> Option<Instantiation> {
        self.pending.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Linkage keyword for a definition
///
/// Standard-library symbols and generic instances may be produced by several
/// translation units and must coalesce.
pub fn linkage(qualified_name: &str, generic_instance: bool, std_prefixes: &[String]) -> &'static str {
    if generic_instance || std_prefixes.iter().any(|p| qualified_name.starts_with(p.as_str())) {
        "linkonce_odr "
    } else {
        ""
    }
}
