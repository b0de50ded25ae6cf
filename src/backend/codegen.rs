//! Code Generation trait - Backend abstraction
//!
//! A backend turns an annotated program into a textual module plus the
//! diagnostics it collected along the way.

use crate::frontend::ast::Program;
use crate::utils::{Error, Result};

/// Output of a backend run
#[derive(Debug, Clone)]
pub struct GeneratedModule {
    pub ir: String,
    /// Non-fatal errors gathered in collect-all mode; empty in fail-fast mode
    pub diagnostics: Vec<Error>,
}

impl GeneratedModule {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Code generation backend trait
pub trait CodeGen {
    /// Generate a module from an annotated program
    fn generate(&mut self, program: &Program) -> Result<GeneratedModule>;

    /// Get the target triple (e.g., "x86_64-pc-linux-gnu"), empty for host default
    fn target_triple(&self) -> &str;

    /// Get the backend name
    fn name(&self) -> &str;
}
