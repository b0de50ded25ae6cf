//! Type model for the BPL back end
//!
//! `TypeNode` is the tagged-union form every annotated expression carries.
//! Types are compared structurally (see `middle::type_resolver`), never by
//! identity; generic arguments and pointer/array qualifiers are part of a
//! type's identity.
#![allow(dead_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frontend::ast::DeclId;

/// Primitive types known to the back end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    Int { bits: u32, signed: bool },
    Double,
    Void,
    /// `string` is a pointer to bytes
    Str,
    /// Literal `null` (nullable struct value or pointer)
    Null,
    /// Literal `nullptr` (pointer only)
    NullPtr,
}

impl PrimitiveType {
    /// Map a source-level primitive name onto its kind
    pub fn from_name(name: &str) -> Option<Self> {
        let int = |bits, signed| Some(Self::Int { bits, signed });
        match name {
            "bool" | "i1" => Some(Self::Bool),
            "i8" | "char" => int(8, true),
            "u8" | "uchar" => int(8, false),
            "i16" | "short" => int(16, true),
            "u16" | "ushort" => int(16, false),
            "i32" | "int" => int(32, true),
            "u32" | "uint" => int(32, false),
            "i64" | "long" => int(64, true),
            "u64" | "ulong" => int(64, false),
            "float" | "double" => Some(Self::Double),
            "void" => Some(Self::Void),
            "string" => Some(Self::Str),
            "null" => Some(Self::Null),
            "nullptr" => Some(Self::NullPtr),
            _ => None,
        }
    }

    /// Canonical spelling used for comparison and mangling
    pub fn canonical_name(&self) -> &'static str {
        match self {
            Self::Bool => "i1",
            Self::Int { bits: 8, signed: true } => "i8",
            Self::Int { bits: 8, signed: false } => "u8",
            Self::Int { bits: 16, signed: true } => "i16",
            Self::Int { bits: 16, signed: false } => "u16",
            Self::Int { bits: 32, signed: true } => "i32",
            Self::Int { bits: 32, signed: false } => "u32",
            Self::Int { bits: 64, signed: true } => "i64",
            Self::Int { bits: 64, signed: false } => "u64",
            Self::Int { .. } => "i32",
            Self::Double => "double",
            Self::Void => "void",
            Self::Str => "i8_ptr",
            Self::Null => "null",
            Self::NullPtr => "nullptr",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int { .. } | Self::Bool)
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Int { signed: true, .. })
    }

    /// Width class used to rank implicit widening (bool < 8 < 16 < 32 < 64)
    pub fn rank(&self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::Int { bits, .. } => *bits,
            _ => 0,
        }
    }
}

/// A named type with optional generic arguments and qualifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicType {
    pub name: String,
    #[serde(default)]
    pub generic_args: Vec<TypeNode>,
    #[serde(default)]
    pub pointer_depth: u32,
    #[serde(default)]
    pub array_dimensions: Vec<u64>,
    /// Struct/enum/alias declaration this name resolved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaration: Option<DeclId>,
}

/// Function signature; as a value this is a closure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionType {
    pub return_type: Box<TypeNode>,
    #[serde(default)]
    pub param_types: Vec<TypeNode>,
    #[serde(default)]
    pub variadic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declaration: Option<DeclId>,
}

/// Resolved type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TypeNode {
    Basic(BasicType),
    Tuple { elements: Vec<TypeNode> },
    Function(FunctionType),
    /// The type of a type expression (`Point` used as a value)
    Meta { inner: Box<TypeNode> },
}

impl TypeNode {
    pub fn basic(name: &str) -> Self {
        Self::Basic(BasicType {
            name: name.to_string(),
            generic_args: Vec::new(),
            pointer_depth: 0,
            array_dimensions: Vec::new(),
            declaration: None,
        })
    }

    pub fn generic(name: &str, args: Vec<TypeNode>) -> Self {
        let mut ty = Self::basic(name);
        if let Self::Basic(b) = &mut ty {
            b.generic_args = args;
        }
        ty
    }

    pub fn function(return_type: TypeNode, param_types: Vec<TypeNode>) -> Self {
        Self::Function(FunctionType {
            return_type: Box::new(return_type),
            param_types,
            variadic: false,
            declaration: None,
        })
    }

    pub fn tuple(elements: Vec<TypeNode>) -> Self {
        Self::Tuple { elements }
    }

    pub fn void() -> Self {
        Self::basic("void")
    }

    pub fn i32() -> Self {
        Self::basic("i32")
    }

    pub fn i64() -> Self {
        Self::basic("i64")
    }

    pub fn bool() -> Self {
        Self::basic("bool")
    }

    pub fn double() -> Self {
        Self::basic("double")
    }

    /// `*i8`, the universal byte pointer
    pub fn void_ptr() -> Self {
        Self::basic("i8").pointer(1)
    }

    /// Add `depth` pointer levels (only meaningful on basic types)
    pub fn pointer(mut self, depth: u32) -> Self {
        if let Self::Basic(b) = &mut self {
            b.pointer_depth += depth;
        }
        self
    }

    /// Append array dimensions
    pub fn array(mut self, dims: &[u64]) -> Self {
        if let Self::Basic(b) = &mut self {
            b.array_dimensions.extend_from_slice(dims);
        }
        self
    }

    pub fn with_declaration(mut self, decl: DeclId) -> Self {
        if let Self::Basic(b) = &mut self {
            b.declaration = Some(decl);
        }
        self
    }

    pub fn as_basic(&self) -> Option<&BasicType> {
        match self {
            Self::Basic(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Name of a basic type
    pub fn name(&self) -> Option<&str> {
        self.as_basic().map(|b| b.name.as_str())
    }

    pub fn pointer_depth(&self) -> u32 {
        self.as_basic().map_or(0, |b| b.pointer_depth)
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_depth() > 0 || self.primitive() == Some(PrimitiveType::Str)
    }

    pub fn is_array(&self) -> bool {
        self.as_basic().map_or(false, |b| !b.array_dimensions.is_empty())
    }

    /// Primitive kind of an unqualified basic type
    pub fn primitive(&self) -> Option<PrimitiveType> {
        let b = self.as_basic()?;
        if b.pointer_depth > 0 || !b.array_dimensions.is_empty() {
            return None;
        }
        PrimitiveType::from_name(&b.name)
    }

    pub fn is_void(&self) -> bool {
        self.primitive() == Some(PrimitiveType::Void)
    }

    pub fn is_integer(&self) -> bool {
        self.primitive().map_or(false, |p| p.is_integer())
    }

    pub fn is_float(&self) -> bool {
        self.primitive() == Some(PrimitiveType::Double)
    }

    pub fn is_bool(&self) -> bool {
        self.primitive() == Some(PrimitiveType::Bool)
    }

    pub fn is_signed(&self) -> bool {
        self.primitive().map_or(false, |p| p.is_signed())
    }

    pub fn is_null_literal(&self) -> bool {
        self.primitive() == Some(PrimitiveType::Null)
    }

    pub fn is_nullptr_literal(&self) -> bool {
        self.primitive() == Some(PrimitiveType::NullPtr)
    }

    /// Basic type that is neither primitive nor qualified (a struct/enum/alias value)
    pub fn is_named_value(&self) -> bool {
        match self.as_basic() {
            Some(b) => {
                b.pointer_depth == 0
                    && b.array_dimensions.is_empty()
                    && PrimitiveType::from_name(&b.name).is_none()
            }
            None => false,
        }
    }

    /// `*T` for `T`
    pub fn address_of(&self) -> TypeNode {
        self.clone().pointer(1)
    }

    /// `T` for `*T`
    pub fn dereferenced(&self) -> Option<TypeNode> {
        match self {
            Self::Basic(b) if b.pointer_depth > 0 => {
                let mut inner = b.clone();
                inner.pointer_depth -= 1;
                Some(Self::Basic(inner))
            }
            Self::Basic(b) if b.name == "string" && b.pointer_depth == 0 && b.array_dimensions.is_empty() => {
                Some(Self::basic("i8"))
            }
            _ => None,
        }
    }

    /// Element type of an array (outermost dimension removed)
    pub fn element_type(&self) -> Option<TypeNode> {
        match self {
            Self::Basic(b) if !b.array_dimensions.is_empty() => {
                let mut inner = b.clone();
                inner.array_dimensions.remove(0);
                Some(Self::Basic(inner))
            }
            _ => None,
        }
    }
}

impl fmt::Display for TypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeNode::Basic(b) => {
                for _ in 0..b.pointer_depth {
                    write!(f, "*")?;
                }
                write!(f, "{}", b.name)?;
                if !b.generic_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in b.generic_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                for dim in &b.array_dimensions {
                    write!(f, "[{}]", dim)?;
                }
                Ok(())
            }
            TypeNode::Tuple { elements } => {
                write!(f, "(")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            TypeNode::Function(func) => {
                write!(f, "Func<{}>(", func.return_type)?;
                for (i, p) in func.param_types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                if func.variadic {
                    write!(f, ", ...")?;
                }
                write!(f, ")")
            }
            TypeNode::Meta { inner } => write!(f, "type {}", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_aliases_share_kind() {
        assert_eq!(PrimitiveType::from_name("int"), PrimitiveType::from_name("i32"));
        assert_eq!(PrimitiveType::from_name("ulong"), Some(PrimitiveType::Int { bits: 64, signed: false }));
        assert_eq!(PrimitiveType::from_name("Point"), None);
        assert!(TypeNode::basic("char").is_signed());
        assert!(!TypeNode::basic("bool").is_signed());
    }

    #[test]
    fn qualifiers_strip_primitive_kind() {
        let p = TypeNode::i32().pointer(1);
        assert!(p.is_pointer());
        assert_eq!(p.primitive(), None);
        assert_eq!(p.dereferenced(), Some(TypeNode::i32()));

        let arr = TypeNode::i32().array(&[4, 2]);
        assert_eq!(arr.element_type(), Some(TypeNode::i32().array(&[2])));
    }

    #[test]
    fn display_matches_source_syntax() {
        let ty = TypeNode::generic("Box", vec![TypeNode::i32()]).pointer(1);
        assert_eq!(ty.to_string(), "*Box<i32>");
        let f = TypeNode::function(TypeNode::bool(), vec![TypeNode::i32(), TypeNode::double()]);
        assert_eq!(f.to_string(), "Func<bool>(i32, double)");
    }

    #[test]
    fn deserializes_tagged_basic_type() {
        let json = r#"{"kind":"Basic","name":"Vec","generic_args":[{"kind":"Basic","name":"u8"}],"pointer_depth":1}"#;
        let ty: TypeNode = serde_json::from_str(json).unwrap();
        assert_eq!(ty, TypeNode::generic("Vec", vec![TypeNode::basic("u8")]).pointer(1));
    }
}
