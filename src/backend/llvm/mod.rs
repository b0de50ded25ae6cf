//! LLVM Backend
//!
//! Emits LLVM textual IR directly; the output is meant to be fed to `llc`
//! or `clang` together with a C runtime providing `malloc`, `setjmp` and
//! friends.

mod call;
mod cast;
mod closure;
mod codegen;
mod context;
mod debug;
mod exceptions;
mod expr;
mod layout;
mod ops;
mod pattern;
mod stmt;

use log::info;

use crate::backend::codegen::{CodeGen, GeneratedModule};
use crate::config::CodegenConfig;
use crate::frontend::ast::Program;
use crate::middle::ir_printer::print_ir;
use crate::middle::symbols::SymbolTable;
use crate::utils::Result;

pub use codegen::ModuleGenerator;

/// LLVM-based code generator
pub struct LlvmCodeGen {
    config: CodegenConfig,
}

impl LlvmCodeGen {
    pub fn new(config: CodegenConfig) -> Self {
        Self { config }
    }
}

impl Default for LlvmCodeGen {
    fn default() -> Self {
        Self::new(CodegenConfig::default())
    }
}

impl CodeGen for LlvmCodeGen {
    fn generate(&mut self, program: &Program) -> Result<GeneratedModule> {
        let symbols = SymbolTable::from_program(program)?;
        let generator = ModuleGenerator::new(program, &symbols, &self.config);
        let (module, diagnostics) = generator.generate()?;
        info!("generated module {} ({} functions)", module.name, module.functions.len());
        Ok(GeneratedModule { ir: print_ir(&module), diagnostics })
    }

    fn target_triple(&self) -> &str {
        self.config.target_triple.as_deref().unwrap_or("")
    }

    fn name(&self) -> &str {
        "llvm"
    }
}
