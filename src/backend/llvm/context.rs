//! Per-function generation state
//!
//! Owns the function being built, the local variable scopes and the stacks
//! of enclosing loops and matches. Every name minted here carries a suffix
//! from one shared counter, so registers (`%r.N`), stack slots
//! (`%hint.N`) and block labels (`prefix.N`) never collide with each other
//! or with parameter names.

use std::collections::HashMap;

use crate::frontend::ast::NodeId;
use crate::middle::ir::{BasicBlock, Instruction, IrFunction, IrType};
use crate::middle::type_resolver::TypeMap;
use crate::types::TypeNode;

/// A local variable or parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    /// Stack slot holding the value
    pub ptr: String,
    pub ty: TypeNode,
    pub ir: IrType,
    /// `i1` slot tracking whether a struct value is non-null
    pub null_flag: Option<String>,
}

/// Branch targets of the innermost loop
#[derive(Debug, Clone)]
pub struct LoopTargets {
    pub continue_label: String,
    pub break_label: String,
    /// Number of open try-regions when the loop was entered
    pub try_depth: usize,
}

/// An open match expression
#[derive(Debug, Clone)]
pub struct MatchFrame {
    pub merge: String,
    pub result: IrType,
    /// `(value, predecessor label)` pairs for the merge phi
    pub incoming: Vec<(String, String)>,
}

/// Name bindings visible at some point, restored when a block ends
#[derive(Debug, Clone)]
pub struct ScopeSnapshot(HashMap<String, usize>);

#[derive(Debug)]
pub struct FunctionContext {
    pub function: IrFunction,
    /// Source-level name, reported in runtime error payloads
    pub source_name: String,
    pub type_map: TypeMap,
    pub return_type: TypeNode,
    pub is_main: bool,
    /// `main` declared `void` returns `i32 0`
    pub is_main_void: bool,
    /// Pointer variable name -> name of the local it was initialized from with `&`
    pub pointer_to_local: HashMap<String, String>,
    pub loops: Vec<LoopTargets>,
    pub matches: Vec<MatchFrame>,
    /// Previous `@exception_top` of every open try-region, outermost first
    pub try_frames: Vec<String>,
    /// `!DILocation` attached to everything emitted from here on
    pub location: Option<u32>,
    locals: Vec<Local>,
    by_id: HashMap<NodeId, usize>,
    by_name: HashMap<String, usize>,
    counter: usize,
}

impl Default for FunctionContext {
    fn default() -> Self {
        Self::new("", "", TypeMap::new())
    }
}

impl FunctionContext {
    pub fn new(symbol: &str, source_name: &str, type_map: TypeMap) -> Self {
        Self {
            function: IrFunction::new(symbol, IrType::Void),
            source_name: source_name.to_string(),
            type_map,
            return_type: TypeNode::void(),
            is_main: false,
            is_main_void: false,
            pointer_to_local: HashMap::new(),
            loops: Vec::new(),
            matches: Vec::new(),
            try_frames: Vec::new(),
            location: None,
            locals: Vec::new(),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            counter: 0,
        }
    }

    fn next(&mut self) -> usize {
        let n = self.counter;
        self.counter += 1;
        n
    }

    // ==================== Names ====================

    /// Fresh SSA register
    pub fn reg(&mut self) -> String {
        format!("%r.{}", self.next())
    }

    /// Fresh block label (without `%`)
    pub fn label(&mut self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.next())
    }

    /// Hoisted stack slot of type `ty`
    pub fn slot(&mut self, hint: &str, ty: &IrType) -> String {
        let name = format!("%{}.{}", hint, self.next());
        self.function.allocas.push(format!("{} = alloca {}", name, ty));
        name
    }

    // ==================== Blocks ====================

    /// Append an instruction to the current block
    ///
    /// Code after a terminator goes into a fresh unreachable block.
    pub fn emit(&mut self, inst: impl Into<String>) {
        if self.is_terminated() {
            let label = self.label("dead");
            self.function.blocks.push(BasicBlock::new(&label));
        }
        let inst = Instruction::at(inst, self.location);
        if let Some(block) = self.function.current_mut() {
            block.instructions.push(inst);
        }
    }

    /// Close the current block; ignored when it is already closed
    pub fn terminate(&mut self, term: impl Into<String>) {
        let location = self.location;
        if let Some(block) = self.function.current_mut() {
            if block.terminator.is_none() {
                block.terminator = Some(Instruction::at(term, location));
            }
        }
    }

    /// `br label %target`
    pub fn branch(&mut self, target: &str) {
        self.terminate(format!("br label %{}", target));
    }

    /// `br i1 cond, label %then, label %else`
    pub fn cond_branch(&mut self, cond: &str, then_label: &str, else_label: &str) {
        self.terminate(format!("br i1 {}, label %{}, label %{}", cond, then_label, else_label));
    }

    /// Open a new block, falling through from the current one if it is open
    pub fn start_block(&mut self, label: &str) {
        if !self.is_terminated() {
            self.branch(label);
        }
        self.function.blocks.push(BasicBlock::new(label));
    }

    pub fn is_terminated(&self) -> bool {
        self.function.current().map_or(true, |b| b.is_terminated())
    }

    pub fn current_label(&self) -> String {
        self.function.current().map(|b| b.label.clone()).unwrap_or_default()
    }

    // ==================== Locals ====================

    /// Register a local under its declaring node (when known) and its name
    pub fn declare(&mut self, id: Option<NodeId>, name: &str, local: Local) {
        let index = self.locals.len();
        self.locals.push(local);
        if let Some(id) = id {
            self.by_id.insert(id, index);
        }
        self.by_name.insert(name.to_string(), index);
    }

    /// Look a local up by declaring node first, then by visible name
    pub fn lookup(&self, id: Option<NodeId>, name: &str) -> Option<&Local> {
        id.and_then(|id| self.by_id.get(&id))
            .or_else(|| self.by_name.get(name))
            .and_then(|i| self.locals.get(*i))
    }

    pub fn lookup_name(&self, name: &str) -> Option<&Local> {
        self.by_name.get(name).and_then(|i| self.locals.get(*i))
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn snapshot(&self) -> ScopeSnapshot {
        ScopeSnapshot(self.by_name.clone())
    }

    pub fn restore(&mut self, snapshot: ScopeSnapshot) {
        self.by_name = snapshot.0;
    }

    pub fn finish(self) -> IrFunction {
        self.function
    }
}
