//! Symbol table for the back end
//!
//! A parent-linked scope chain. Lookups walk outward and never touch an
//! ancestor scope; block scopes are dropped again on exit. Defining a
//! function name twice records an extra overload instead of failing, unless
//! the signature is an exact duplicate.
#![allow(dead_code)]

use std::collections::HashMap;

use log::trace;

use crate::frontend::ast::{Decl, DeclId, NodeId, Program};
use crate::middle::type_resolver::types_exact_match;
use crate::types::{FunctionType, TypeNode};
use crate::utils::{Error, Result, Span};

/// Unique identifier for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// Kind of symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Parameter,
    Function,
    Struct,
    Enum,
    TypeAlias,
    Spec,
    Module,
}

/// One signature of an overloaded function name
#[derive(Debug, Clone, PartialEq)]
pub struct Overload {
    pub decl: DeclId,
    pub ty: FunctionType,
}

/// Symbol information
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Option<TypeNode>,
    pub declaration: Option<DeclId>,
    /// Local declaration node for variables and parameters
    pub local: Option<NodeId>,
    /// Every signature defined under this name (functions only)
    pub overloads: Vec<Overload>,
    /// Nested scope owned by a module symbol
    pub scope: Option<ScopeId>,
    pub span: Span,
}

impl Symbol {
    pub fn new(name: &str, kind: SymbolKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            ty: None,
            declaration: None,
            local: None,
            overloads: Vec::new(),
            scope: None,
            span: Span::dummy(),
        }
    }

    pub fn with_type(mut self, ty: TypeNode) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn with_decl(mut self, decl: DeclId) -> Self {
        self.declaration = Some(decl);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// A scope containing symbols
#[derive(Debug)]
struct Scope {
    parent: Option<ScopeId>,
    symbols: HashMap<String, Symbol>,
    /// Module scopes outlive `exit_scope`
    persistent: bool,
}

/// Symbol table with nested scopes
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    current: ScopeId,
}

impl SymbolTable {
    pub fn new() -> Self {
        // Create global scope
        let global = Scope {
            parent: None,
            symbols: HashMap::new(),
            persistent: true,
        };
        Self {
            scopes: vec![global],
            current: ScopeId(0),
        }
    }

    /// Populate the global scope from a program's top-level declarations
    pub fn from_program(program: &Program) -> Result<Self> {
        let mut table = Self::new();
        for id in program.top_level() {
            table.define_decl(program, id)?;
        }
        Ok(table)
    }

    fn define_decl(&mut self, program: &Program, id: DeclId) -> Result<()> {
        let Some(decl) = program.decl(id) else {
            return Err(Error::Internal(format!("dangling declaration id {}", id.0)));
        };
        let span = decl.span();
        match decl {
            Decl::Function(f) => {
                let ty = f.function_type();
                self.define_function(&f.name, id, ty, span)
            }
            Decl::Extern(e) => {
                let ty = e.function_type();
                self.define_function(&e.name, id, ty, span)
            }
            Decl::Struct(s) => self.define(
                Symbol::new(&s.name, SymbolKind::Struct)
                    .with_decl(id)
                    .with_type(TypeNode::basic(&s.name).with_declaration(id))
                    .with_span(span),
            ),
            Decl::Enum(e) => self.define(
                Symbol::new(&e.name, SymbolKind::Enum)
                    .with_decl(id)
                    .with_type(TypeNode::basic(&e.name).with_declaration(id))
                    .with_span(span),
            ),
            Decl::TypeAlias(a) => self.define(
                Symbol::new(&a.name, SymbolKind::TypeAlias)
                    .with_decl(id)
                    .with_type(a.target.clone())
                    .with_span(span),
            ),
            Decl::Spec(s) => self.define(Symbol::new(&s.name, SymbolKind::Spec).with_decl(id).with_span(span)),
            Decl::Global(g) => self.define(
                Symbol::new(&g.name, SymbolKind::Variable)
                    .with_decl(id)
                    .with_type(g.ty.clone())
                    .with_span(span),
            ),
            Decl::Module(m) => {
                let scope = self.enter_module_scope();
                for member in &m.members {
                    self.define_decl(program, *member)?;
                }
                self.exit_scope();
                let mut symbol = Symbol::new(&m.name, SymbolKind::Module).with_decl(id).with_span(span);
                symbol.scope = Some(scope);
                self.define(symbol)
            }
        }
    }

    /// Enter a new block scope
    pub fn enter_scope(&mut self) -> ScopeId {
        self.push_scope(false)
    }

    fn enter_module_scope(&mut self) -> ScopeId {
        self.push_scope(true)
    }

    fn push_scope(&mut self, persistent: bool) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            parent: Some(self.current),
            symbols: HashMap::new(),
            persistent,
        });
        self.current = id;
        id
    }

    /// Exit the current scope, discarding it unless a module owns it
    pub fn exit_scope(&mut self) {
        let exiting = self.current;
        if let Some(parent) = self.scopes[exiting.0].parent {
            self.current = parent;
            if !self.scopes[exiting.0].persistent && exiting.0 + 1 == self.scopes.len() {
                self.scopes.pop();
            }
        }
    }

    /// Define a symbol in the current scope
    pub fn define(&mut self, symbol: Symbol) -> Result<()> {
        let scope = &mut self.scopes[self.current.0];
        if scope.symbols.contains_key(&symbol.name) {
            return Err(Error::DuplicateDefinition {
                name: symbol.name.clone(),
                span: symbol.span,
            });
        }
        scope.symbols.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    /// Define a function, merging into an existing overload set
    pub fn define_function(&mut self, name: &str, decl: DeclId, ty: FunctionType, span: Span) -> Result<()> {
        let scope = &mut self.scopes[self.current.0];
        if let Some(existing) = scope.symbols.get_mut(name) {
            if existing.kind != SymbolKind::Function {
                return Err(Error::DuplicateDefinition { name: name.to_string(), span });
            }
            let duplicate = existing.overloads.iter().any(|o| {
                o.ty.param_types.len() == ty.param_types.len()
                    && o.ty
                        .param_types
                        .iter()
                        .zip(&ty.param_types)
                        .all(|(a, b)| types_exact_match(a, b))
            });
            if duplicate {
                return Err(Error::DuplicateDefinition { name: name.to_string(), span });
            }
            trace!("overload #{} for {}", existing.overloads.len() + 1, name);
            existing.overloads.push(Overload { decl, ty });
            return Ok(());
        }
        let mut symbol = Symbol::new(name, SymbolKind::Function)
            .with_decl(decl)
            .with_type(TypeNode::Function(ty.clone()))
            .with_span(span);
        symbol.overloads.push(Overload { decl, ty });
        scope.symbols.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Look up a symbol, searching from current scope upward
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        if name.contains('.') {
            let path: Vec<&str> = name.split('.').collect();
            return self.lookup_path(&path);
        }
        let mut scope_id = Some(self.current);
        while let Some(id) = scope_id {
            if let Some(symbol) = self.scopes[id.0].symbols.get(name) {
                return Some(symbol);
            }
            scope_id = self.scopes[id.0].parent;
        }
        None
    }

    /// Look up a symbol only in the current scope
    pub fn lookup_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes[self.current.0].symbols.get(name)
    }

    /// Resolve `a.b.c` through module scopes
    pub fn lookup_path(&self, path: &[&str]) -> Option<&Symbol> {
        let (first, rest) = path.split_first()?;
        let mut symbol = self.lookup(first)?;
        for segment in rest {
            let scope = symbol.scope?;
            symbol = self.scopes[scope.0].symbols.get(*segment)?;
        }
        Some(symbol)
    }

    /// Overloads visible under `name`
    pub fn overloads(&self, name: &str) -> &[Overload] {
        self.lookup(name).map_or(&[], |s| s.overloads.as_slice())
    }

    /// Closest visible name within edit distance 3
    pub fn find_similar(&self, name: &str) -> Option<String> {
        let mut best: Option<(usize, &str)> = None;
        let mut scope_id = Some(self.current);
        while let Some(id) = scope_id {
            for candidate in self.scopes[id.0].symbols.keys() {
                let distance = levenshtein(name, candidate);
                if distance == 0 || distance > 3 {
                    continue;
                }
                let better = match best {
                    Some((d, c)) => distance < d || (distance == d && candidate.as_str() < c),
                    None => true,
                };
                if better {
                    best = Some((distance, candidate));
                }
            }
            scope_id = self.scopes[id.0].parent;
        }
        best.map(|(_, c)| c.to_string())
    }

    /// Error for an unresolved name, with a suggestion when one is close
    pub fn undefined(&self, name: &str, span: Span) -> Error {
        Error::UndefinedSymbol {
            name: name.to_string(),
            suggestion: self.find_similar(name),
            span,
        }
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
        }
        prev = row;
    }
    prev[b.len()]
}
