//! LLVM IR module model
//!
//! A thin structural model of the textual IR the back end emits: named type
//! definitions, globals, external declarations and functions made of labelled
//! basic blocks. Instructions are kept as already formatted text; only the
//! parts the generator needs to reason about (types, block boundaries,
//! terminators, hoisted allocas) are structured.

use std::fmt;

// ==================== Types ====================

/// LLVM type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    /// `iN`
    Int(u32),
    Double,
    /// `T*`; a pointer to void prints as `i8*`
    Ptr(Box<IrType>),
    /// `%struct.Name`
    Struct(String),
    /// `%enum.Name`
    Enum(String),
    /// `[N x T]`
    Array(Box<IrType>, u64),
    /// Anonymous aggregate `{ a, b }`
    Anon(Vec<IrType>),
    /// Function type, only ever used behind a pointer
    Func {
        ret: Box<IrType>,
        params: Vec<IrType>,
        variadic: bool,
    },
}

impl IrType {
    pub fn i1() -> Self {
        IrType::Int(1)
    }

    pub fn i8() -> Self {
        IrType::Int(8)
    }

    pub fn i32() -> Self {
        IrType::Int(32)
    }

    pub fn i64() -> Self {
        IrType::Int(64)
    }

    pub fn i8_ptr() -> Self {
        IrType::Int(8).ptr()
    }

    pub fn ptr(self) -> Self {
        IrType::Ptr(Box::new(self))
    }

    pub fn array(self, len: u64) -> Self {
        IrType::Array(Box::new(self), len)
    }

    /// `{ ret (i8*, params)*, i8* }`
    pub fn closure(ret: IrType, params: Vec<IrType>) -> Self {
        let mut all = vec![IrType::i8_ptr()];
        all.extend(params);
        IrType::Anon(vec![IrType::Func { ret: Box::new(ret), params: all, variadic: false }.ptr(), IrType::i8_ptr()])
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }

    pub fn is_int(&self) -> bool {
        matches!(self, IrType::Int(_))
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, IrType::Ptr(_))
    }

    pub fn is_double(&self) -> bool {
        matches!(self, IrType::Double)
    }

    /// Struct, enum, array or anonymous aggregate
    pub fn is_aggregate(&self) -> bool {
        matches!(self, IrType::Struct(_) | IrType::Enum(_) | IrType::Array(..) | IrType::Anon(_))
    }

    /// A closure value `{ fn*, i8* }`
    pub fn is_closure(&self) -> bool {
        match self {
            IrType::Anon(parts) => {
                parts.len() == 2
                    && matches!(&parts[0], IrType::Ptr(inner) if matches!(**inner, IrType::Func { .. }))
                    && parts[1] == IrType::i8_ptr()
            }
            _ => false,
        }
    }

    pub fn bits(&self) -> Option<u32> {
        match self {
            IrType::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn pointee(&self) -> Option<&IrType> {
        match self {
            IrType::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    /// Zero constant usable in `ret`, `store` and `insertvalue`
    pub fn zero(&self) -> &'static str {
        match self {
            IrType::Int(_) => "0",
            IrType::Double => "0.0",
            IrType::Ptr(_) => "null",
            _ => "zeroinitializer",
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Int(n) => write!(f, "i{}", n),
            IrType::Double => write!(f, "double"),
            IrType::Ptr(inner) => match **inner {
                IrType::Void => write!(f, "i8*"),
                ref other => write!(f, "{}*", other),
            },
            IrType::Struct(name) => write!(f, "%struct.{}", name),
            IrType::Enum(name) => write!(f, "%enum.{}", name),
            IrType::Array(elem, n) => write!(f, "[{} x {}]", n, elem),
            IrType::Anon(parts) => {
                write!(f, "{{ ")?;
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, " }}")
            }
            IrType::Func { ret, params, variadic } => {
                write!(f, "{} (", ret)?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                if *variadic {
                    if !params.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ==================== Module items ====================

/// Named type definition: `%struct.Point = type { i32, i32, i1 }`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Name without the leading `%`, e.g. `struct.Point`
    pub name: String,
    pub fields: Vec<IrType>,
}

/// Global variable or constant
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    /// Linkage and attributes before `global`/`constant` (`private unnamed_addr`, `weak`)
    pub linkage: String,
    pub constant: bool,
    pub ty: IrType,
    pub init: String,
    pub align: Option<u32>,
}

/// External function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub ret: IrType,
    pub params: Vec<IrType>,
    pub variadic: bool,
    /// Trailing function attributes (`returns_twice`, `noreturn`)
    pub attrs: Vec<String>,
}

/// Formatted instruction with an optional `!dbg` location
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub text: String,
    /// Metadata id of a `!DILocation`
    pub dbg: Option<u32>,
}

impl Instruction {
    pub fn at(text: impl Into<String>, dbg: Option<u32>) -> Self {
        Self { text: text.into(), dbg }
    }
}

impl From<String> for Instruction {
    fn from(text: String) -> Self {
        Self { text, dbg: None }
    }
}

impl From<&str> for Instruction {
    fn from(text: &str) -> Self {
        Self { text: text.to_string(), dbg: None }
    }
}

/// Basic block
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Instruction>,
}

impl BasicBlock {
    pub fn new(label: &str) -> Self {
        Self { label: label.to_string(), instructions: Vec::new(), terminator: None }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

/// Function definition
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    /// Linkage keyword with trailing space, or empty
    pub linkage: String,
    pub ret: IrType,
    /// Parameter types and `%names`
    pub params: Vec<(IrType, String)>,
    /// Stack slots, hoisted to the top of the entry block
    pub allocas: Vec<String>,
    /// The first block is the entry block
    pub blocks: Vec<BasicBlock>,
    /// `!DISubprogram` attached to the definition
    pub subprogram: Option<u32>,
}

impl IrFunction {
    pub fn new(name: &str, ret: IrType) -> Self {
        Self {
            name: name.to_string(),
            linkage: String::new(),
            ret,
            params: Vec::new(),
            allocas: Vec::new(),
            blocks: vec![BasicBlock::new("entry")],
            subprogram: None,
        }
    }

    pub fn current(&self) -> Option<&BasicBlock> {
        self.blocks.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut BasicBlock> {
        self.blocks.last_mut()
    }

    pub fn block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }
}

/// A complete IR module
#[derive(Debug, Clone, PartialEq)]
pub struct IrModule {
    pub name: String,
    pub target_triple: Option<String>,
    pub type_defs: Vec<TypeDef>,
    pub globals: Vec<Global>,
    pub declarations: Vec<Declaration>,
    pub functions: Vec<IrFunction>,
    /// Named metadata and numbered nodes, printed last
    pub metadata: Vec<String>,
}

impl IrModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            target_triple: None,
            type_defs: Vec::new(),
            globals: Vec::new(),
            declarations: Vec::new(),
            functions: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.type_defs.iter().any(|t| t.name == name)
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals.iter().any(|g| g.name == name)
    }

    pub fn has_declaration(&self, name: &str) -> bool {
        self.declarations.iter().any(|d| d.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn type_spelling() {
        assert_eq!(IrType::Void.ptr().to_string(), "i8*");
        assert_eq!(IrType::Struct("Point".into()).ptr().to_string(), "%struct.Point*");
        assert_eq!(IrType::i32().array(3).array(2).to_string(), "[2 x [3 x i32]]");
        assert_eq!(IrType::Anon(vec![IrType::i32(), IrType::Double]).to_string(), "{ i32, double }");
        assert_eq!(
            IrType::closure(IrType::i32(), vec![IrType::i32()]).to_string(),
            "{ i32 (i8*, i32)*, i8* }"
        );
        let printf = IrType::Func { ret: Box::new(IrType::i32()), params: vec![IrType::i8_ptr()], variadic: true };
        assert_eq!(printf.to_string(), "i32 (i8*, ...)");
    }

    #[test]
    fn closure_shape_is_recognised() {
        assert!(IrType::closure(IrType::Void, vec![]).is_closure());
        assert!(!IrType::Anon(vec![IrType::i8_ptr(), IrType::i8_ptr()]).is_closure());
    }
}
