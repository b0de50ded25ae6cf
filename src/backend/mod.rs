//! Backend module - Code generation

pub mod codegen;

// LLVM textual IR backend
pub mod llvm;

pub use codegen::{CodeGen, GeneratedModule};
pub use llvm::LlvmCodeGen;
