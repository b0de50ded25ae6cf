//! Annotated Abstract Syntax Tree consumed by the back end
//!
//! The parser and type checker live outside this crate. They hand over a
//! [`Program`] whose expressions already carry their resolved types and,
//! where relevant, typed annotations (identifier bindings, call targets,
//! operator overloads). Declarations live in a flat arena addressed by
//! [`DeclId`]; expressions and local declarations are identified by
//! [`NodeId`].

use serde::{Deserialize, Serialize};

use crate::types::{FunctionType, TypeNode};
use crate::utils::Span;

/// Identity of an expression, parameter or local variable declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Index of a declaration in [`Program::decls`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeclId(pub usize);

/// A complete program (compilation unit)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub decls: Vec<Decl>,
}

impl Program {
    pub fn decl(&self, id: DeclId) -> Option<&Decl> {
        self.decls.get(id.0)
    }

    pub fn function(&self, id: DeclId) -> Option<&FunctionDecl> {
        match self.decl(id) {
            Some(Decl::Function(f)) => Some(f),
            _ => None,
        }
    }

    pub fn struct_decl(&self, id: DeclId) -> Option<&StructDecl> {
        match self.decl(id) {
            Some(Decl::Struct(s)) => Some(s),
            _ => None,
        }
    }

    pub fn enum_decl(&self, id: DeclId) -> Option<&EnumDecl> {
        match self.decl(id) {
            Some(Decl::Enum(e)) => Some(e),
            _ => None,
        }
    }

    pub fn extern_decl(&self, id: DeclId) -> Option<&ExternDecl> {
        match self.decl(id) {
            Some(Decl::Extern(e)) => Some(e),
            _ => None,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = DeclId> {
        (0..self.decls.len()).map(DeclId)
    }

    /// Declarations not owned by a module or struct
    pub fn top_level(&self) -> Vec<DeclId> {
        let mut nested = std::collections::HashSet::new();
        for decl in &self.decls {
            match decl {
                Decl::Module(m) => nested.extend(m.members.iter().copied()),
                Decl::Struct(s) => nested.extend(s.methods.iter().copied()),
                Decl::Enum(e) => nested.extend(e.methods.iter().copied()),
                _ => {}
            }
        }
        self.ids().filter(|id| !nested.contains(id)).collect()
    }

    /// Add a declaration, returning its id
    pub fn push(&mut self, decl: Decl) -> DeclId {
        self.decls.push(decl);
        DeclId(self.decls.len() - 1)
    }
}

// ==================== Declarations ====================

/// Top-level declarations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Decl {
    Function(FunctionDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Extern(ExternDecl),
    Global(GlobalDecl),
    TypeAlias(TypeAliasDecl),
    Spec(SpecDecl),
    Module(ModuleDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Function(d) => &d.name,
            Decl::Struct(d) => &d.name,
            Decl::Enum(d) => &d.name,
            Decl::Extern(d) => &d.name,
            Decl::Global(d) => &d.name,
            Decl::TypeAlias(d) => &d.name,
            Decl::Spec(d) => &d.name,
            Decl::Module(d) => &d.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Function(d) => d.span,
            Decl::Struct(d) => d.span,
            Decl::Enum(d) => d.span,
            Decl::Extern(d) => d.span,
            Decl::Global(d) => d.span,
            Decl::TypeAlias(d) => d.span,
            Decl::Spec(d) => d.span,
            Decl::Module(d) => d.span,
        }
    }
}

/// Generic parameter with an optional constraint (`T: Printable`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericParam {
    pub name: String,
    #[serde(default)]
    pub constraint: Option<TypeNode>,
}

/// Function or lambda parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub id: NodeId,
    pub name: String,
    pub ty: TypeNode,
    #[serde(default)]
    pub span: Span,
}

/// Function definition (free function or struct/enum method)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub generic_params: Vec<GenericParam>,
    #[serde(default)]
    pub params: Vec<Param>,
    pub return_type: TypeNode,
    pub body: Block,
    /// Struct or enum this method belongs to
    #[serde(default)]
    pub owner: Option<DeclId>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub span: Span,
}

impl FunctionDecl {
    pub fn function_type(&self) -> FunctionType {
        FunctionType {
            return_type: Box::new(self.return_type.clone()),
            param_types: self.params.iter().map(|p| p.ty.clone()).collect(),
            variadic: false,
            declaration: None,
        }
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    /// Instance method taking `this` as first parameter
    pub fn has_receiver(&self) -> bool {
        self.owner.is_some()
            && !self.is_static
            && self.params.first().map_or(false, |p| p.name == "this")
    }
}

/// Struct field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: TypeNode,
    #[serde(default)]
    pub span: Span,
}

/// Struct definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    #[serde(default)]
    pub generic_params: Vec<GenericParam>,
    /// Single-inheritance parent
    #[serde(default)]
    pub parent: Option<TypeNode>,
    /// Specs this struct declares it implements
    #[serde(default)]
    pub implements: Vec<TypeNode>,
    #[serde(default)]
    pub fields: Vec<StructField>,
    #[serde(default)]
    pub methods: Vec<DeclId>,
    #[serde(default)]
    pub span: Span,
}

/// Enum variant payload shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum VariantData {
    #[default]
    Unit,
    Tuple { types: Vec<TypeNode> },
    Struct { fields: Vec<StructField> },
}

/// Enum variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumVariant {
    pub name: String,
    #[serde(default)]
    pub data: VariantData,
    #[serde(default)]
    pub span: Span,
}

/// Enum definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    #[serde(default)]
    pub generic_params: Vec<GenericParam>,
    pub variants: Vec<EnumVariant>,
    #[serde(default)]
    pub methods: Vec<DeclId>,
    #[serde(default)]
    pub span: Span,
}

impl EnumDecl {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name == name)
    }
}

/// Foreign function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternDecl {
    pub name: String,
    #[serde(default)]
    pub param_types: Vec<TypeNode>,
    pub return_type: TypeNode,
    #[serde(default)]
    pub variadic: bool,
    #[serde(default)]
    pub span: Span,
}

impl ExternDecl {
    pub fn function_type(&self) -> FunctionType {
        FunctionType {
            return_type: Box::new(self.return_type.clone()),
            param_types: self.param_types.clone(),
            variadic: self.variadic,
            declaration: None,
        }
    }
}

/// Global variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: TypeNode,
    #[serde(default)]
    pub init: Option<Expr>,
    #[serde(default)]
    pub span: Span,
}

/// `type Name<T> = Target;`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeAliasDecl {
    pub name: String,
    #[serde(default)]
    pub generic_params: Vec<GenericParam>,
    pub target: TypeNode,
    #[serde(default)]
    pub span: Span,
}

/// Method signature required by a spec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecMethod {
    pub name: String,
    pub ty: FunctionType,
}

/// Spec (interface) usable as a generic constraint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecDecl {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<SpecMethod>,
    #[serde(default)]
    pub span: Span,
}

/// Named module owning a nested scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDecl {
    pub name: String,
    #[serde(default)]
    pub members: Vec<DeclId>,
    #[serde(default)]
    pub span: Span,
}

// ==================== Statements ====================

/// Block of statements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub stmts: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

/// Target of a tuple destructuring declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DestructureTarget {
    Name {
        id: NodeId,
        name: String,
        #[serde(default)]
        ty: Option<TypeNode>,
    },
    Nested { targets: Vec<DestructureTarget> },
}

/// `case <literal>: { ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Expr,
    pub body: Block,
}

/// `catch (name: Type) { ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchClause {
    pub id: NodeId,
    pub name: String,
    pub ty: TypeNode,
    pub body: Block,
    #[serde(default)]
    pub span: Span,
}

/// Statements
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Stmt {
    VarDecl {
        id: NodeId,
        name: String,
        ty: TypeNode,
        #[serde(default)]
        init: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    /// `local (a, (b, c)) = expr;`
    Destructure {
        targets: Vec<DestructureTarget>,
        init: Expr,
        #[serde(default)]
        span: Span,
    },
    Expr {
        expr: Expr,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    If {
        cond: Expr,
        then_branch: Block,
        #[serde(default)]
        else_branch: Option<Block>,
        #[serde(default)]
        span: Span,
    },
    /// `loop (cond) { ... }`; no condition loops forever
    Loop {
        #[serde(default)]
        cond: Option<Expr>,
        body: Block,
        #[serde(default)]
        span: Span,
    },
    Break {
        #[serde(default)]
        span: Span,
    },
    Continue {
        #[serde(default)]
        span: Span,
    },
    Switch {
        value: Expr,
        cases: Vec<SwitchCase>,
        #[serde(default)]
        default: Option<Block>,
        #[serde(default)]
        span: Span,
    },
    Try {
        body: Block,
        #[serde(default)]
        catches: Vec<CatchClause>,
        /// `catchOther { ... }`
        #[serde(default)]
        catch_other: Option<Block>,
        #[serde(default)]
        span: Span,
    },
    Throw {
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    Block(Block),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Expr { expr } => expr.span,
            Stmt::Block(block) => block.span,
            Stmt::VarDecl { span, .. }
            | Stmt::Destructure { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Loop { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Switch { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::Throw { span, .. } => *span,
        }
    }
}

// ==================== Expressions ====================

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
    NullPtr,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::Deref => "*",
            UnaryOp::AddrOf => "&",
            UnaryOp::PreInc | UnaryOp::PostInc => "++",
            UnaryOp::PreDec | UnaryOp::PostDec => "--",
        }
    }
}

/// What an identifier refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Binding {
    /// Local variable or parameter
    Local { id: NodeId },
    Global { decl: DeclId },
    Function { decl: DeclId },
    Extern { decl: DeclId },
    /// Struct/enum name used as a value
    Type { decl: DeclId },
}

/// Resolved callee of a call expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CallTarget {
    /// Free function or static method
    Function {
        decl: DeclId,
        #[serde(default)]
        generic_args: Vec<TypeNode>,
    },
    /// Instance method; the callee is `object.method` and `object` becomes `this`
    Method {
        decl: DeclId,
        #[serde(default)]
        generic_args: Vec<TypeNode>,
    },
    Extern { decl: DeclId },
    /// Callee evaluates to a closure value
    Closure,
}

/// Operator rewritten to a method call by the type checker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorOverload {
    pub method: DeclId,
    /// Receiver type the method was found on (may be a generic instance)
    pub target_type: TypeNode,
    #[serde(default)]
    pub swap_operands: bool,
    #[serde(default)]
    pub negate_result: bool,
}

/// `name: value` inside a struct literal or struct variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInit {
    pub name: String,
    pub value: Expr,
}

/// Payload given to an enum variant constructor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum VariantPayload {
    #[default]
    Unit,
    Tuple { values: Vec<Expr> },
    Struct { fields: Vec<FieldInit> },
}

/// Match patterns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Pattern {
    Wildcard,
    /// Binds the whole scrutinee; matches anything
    Identifier { id: NodeId, name: String },
    Enum { variant: String },
    EnumTuple { variant: String, bindings: Vec<String> },
    EnumStruct { variant: String, fields: Vec<FieldPattern> },
}

impl Pattern {
    pub fn variant(&self) -> Option<&str> {
        match self {
            Pattern::Enum { variant } | Pattern::EnumTuple { variant, .. } | Pattern::EnumStruct { variant, .. } => {
                Some(variant)
            }
            Pattern::Wildcard | Pattern::Identifier { .. } => None,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self, Pattern::Wildcard | Pattern::Identifier { .. })
    }
}

/// `field: binding` inside a struct-variant pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPattern {
    pub field: String,
    pub binding: String,
}

/// Body of a match arm
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ArmBody {
    Expr { expr: Box<Expr> },
    Block { block: Block },
}

/// Match arm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    #[serde(default)]
    pub guard: Option<Expr>,
    pub body: ArmBody,
}

/// Expression node with its annotations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub id: NodeId,
    #[serde(flatten)]
    pub kind: ExprKind,
    /// Resolved type from the type checker
    #[serde(default)]
    pub ty: Option<TypeNode>,
    #[serde(default)]
    pub span: Span,
}

/// Expression kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExprKind {
    Literal {
        value: Literal,
    },
    Identifier {
        name: String,
        #[serde(default)]
        binding: Option<Binding>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default)]
        overload: Option<OperatorOverload>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        #[serde(default)]
        overload: Option<OperatorOverload>,
    },
    /// `target = value` or compound `target op= value`
    Assign {
        #[serde(default)]
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
        /// Explicit `f<T>(..)` arguments as written
        #[serde(default)]
        generic_args: Vec<TypeNode>,
        #[serde(default)]
        target: Option<CallTarget>,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        target: TypeNode,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Lambda {
        #[serde(default)]
        params: Vec<Param>,
        return_type: TypeNode,
        body: Block,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    StructLiteral {
        fields: Vec<FieldInit>,
    },
    EnumVariant {
        enum_type: TypeNode,
        variant: String,
        #[serde(default)]
        payload: VariantPayload,
    },
    ArrayLiteral {
        elements: Vec<Expr>,
    },
    TupleLiteral {
        elements: Vec<Expr>,
    },
    SizeOf {
        target: TypeNode,
    },
}

impl Expr {
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Literal { .. } => "Literal",
            ExprKind::Identifier { .. } => "Identifier",
            ExprKind::Binary { .. } => "Binary",
            ExprKind::Unary { .. } => "Unary",
            ExprKind::Assign { .. } => "Assignment",
            ExprKind::Call { .. } => "Call",
            ExprKind::Member { .. } => "Member",
            ExprKind::Index { .. } => "Index",
            ExprKind::Cast { .. } => "Cast",
            ExprKind::Ternary { .. } => "Ternary",
            ExprKind::Lambda { .. } => "Lambda",
            ExprKind::Match { .. } => "Match",
            ExprKind::StructLiteral { .. } => "StructLiteral",
            ExprKind::EnumVariant { .. } => "EnumVariant",
            ExprKind::ArrayLiteral { .. } => "ArrayLiteral",
            ExprKind::TupleLiteral { .. } => "TupleLiteral",
            ExprKind::SizeOf { .. } => "SizeOf",
        }
    }

    /// Identifier name, if this is a bare identifier
    pub fn as_identifier(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Identifier { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(&self.kind, ExprKind::Literal { value: Literal::Null })
    }

    /// Short source-like rendering used in runtime error payloads
    pub fn describe(&self) -> String {
        match &self.kind {
            ExprKind::Identifier { name, .. } => name.clone(),
            ExprKind::Member { object, property } => format!("{}.{}", object.describe(), property),
            ExprKind::Index { object, index } => format!("{}[{}]", object.describe(), index.describe()),
            ExprKind::Literal { value } => match value {
                Literal::Int(n) => n.to_string(),
                Literal::Float(f) => f.to_string(),
                Literal::Bool(b) => b.to_string(),
                Literal::Char(c) => c.to_string(),
                Literal::Str(s) => s.clone(),
                Literal::Null => "null".to_string(),
                Literal::NullPtr => "nullptr".to_string(),
            },
            _ => "<expr>".to_string(),
        }
    }
}
