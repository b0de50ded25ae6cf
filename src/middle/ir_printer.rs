//! IR Printer - renders an [`IrModule`] as LLVM textual IR
//!
//! Section order is fixed: header, named types, globals, declarations and
//! then function definitions, so the output of a given program is stable.

use std::fmt::{self, Write};

use crate::middle::ir::*;

/// Pretty printer for the IR module
pub struct IRPrinter {
    output: String,
}

impl IRPrinter {
    pub fn new() -> Self {
        Self { output: String::new() }
    }

    /// Print an IR module to string
    pub fn print_module(&mut self, module: &IrModule) -> Result<String, fmt::Error> {
        self.output.clear();

        writeln!(self.output, "; ModuleID = '{}'", module.name)?;
        writeln!(self.output, "source_filename = \"{}\"", module.name)?;
        if let Some(triple) = &module.target_triple {
            writeln!(self.output, "target triple = \"{}\"", triple)?;
        }

        if !module.type_defs.is_empty() {
            writeln!(self.output)?;
            for def in &module.type_defs {
                self.print_type_def(def)?;
            }
        }

        if !module.globals.is_empty() {
            writeln!(self.output)?;
            for global in &module.globals {
                self.print_global(global)?;
            }
        }

        if !module.declarations.is_empty() {
            writeln!(self.output)?;
            for decl in &module.declarations {
                self.print_declaration(decl)?;
            }
        }

        for func in &module.functions {
            writeln!(self.output)?;
            self.print_function(func)?;
        }

        if !module.metadata.is_empty() {
            writeln!(self.output)?;
            for line in &module.metadata {
                writeln!(self.output, "{}", line)?;
            }
        }

        Ok(std::mem::take(&mut self.output))
    }

    fn print_type_def(&mut self, def: &TypeDef) -> fmt::Result {
        write!(self.output, "%{} = type {{ ", def.name)?;
        for (i, field) in def.fields.iter().enumerate() {
            if i > 0 {
                write!(self.output, ", ")?;
            }
            write!(self.output, "{}", field)?;
        }
        writeln!(self.output, " }}")
    }

    fn print_global(&mut self, global: &Global) -> fmt::Result {
        write!(self.output, "@{} = ", global.name)?;
        if !global.linkage.is_empty() {
            write!(self.output, "{} ", global.linkage)?;
        }
        let kind = if global.constant { "constant" } else { "global" };
        write!(self.output, "{} {} {}", kind, global.ty, global.init)?;
        if let Some(align) = global.align {
            write!(self.output, ", align {}", align)?;
        }
        writeln!(self.output)
    }

    fn print_declaration(&mut self, decl: &Declaration) -> fmt::Result {
        write!(self.output, "declare {} @{}(", decl.ret, decl.name)?;
        for (i, p) in decl.params.iter().enumerate() {
            if i > 0 {
                write!(self.output, ", ")?;
            }
            write!(self.output, "{}", p)?;
        }
        if decl.variadic {
            if !decl.params.is_empty() {
                write!(self.output, ", ")?;
            }
            write!(self.output, "...")?;
        }
        write!(self.output, ")")?;
        for attr in &decl.attrs {
            write!(self.output, " {}", attr)?;
        }
        writeln!(self.output)
    }

    /// Print a function
    fn print_function(&mut self, func: &IrFunction) -> fmt::Result {
        write!(self.output, "define {}{} @{}(", func.linkage, func.ret, func.name)?;
        for (i, (ty, name)) in func.params.iter().enumerate() {
            if i > 0 {
                write!(self.output, ", ")?;
            }
            write!(self.output, "{} {}", ty, name)?;
        }
        write!(self.output, ")")?;
        if let Some(id) = func.subprogram {
            write!(self.output, " !dbg !{}", id)?;
        }
        writeln!(self.output, " {{")?;

        for (i, block) in func.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(self.output)?;
            }
            writeln!(self.output, "{}:", block.label)?;
            // allocas live at the top of the entry block
            if i == 0 {
                for alloca in &func.allocas {
                    writeln!(self.output, "  {}", alloca)?;
                }
            }
            self.print_block_body(block)?;
        }

        writeln!(self.output, "}}")
    }

    fn print_block_body(&mut self, block: &BasicBlock) -> fmt::Result {
        for inst in &block.instructions {
            self.print_instruction(inst)?;
        }
        match &block.terminator {
            Some(term) => self.print_instruction(term),
            None => writeln!(self.output, "  unreachable"),
        }
    }

    /// Indent every line; the location goes after the last one
    fn print_instruction(&mut self, inst: &Instruction) -> fmt::Result {
        let mut lines = inst.text.lines().peekable();
        while let Some(line) = lines.next() {
            write!(self.output, "  {}", line)?;
            if let (None, Some(id)) = (lines.peek(), inst.dbg) {
                write!(self.output, ", !dbg !{}", id)?;
            }
            writeln!(self.output)?;
        }
        Ok(())
    }
}

impl Default for IRPrinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a module as LLVM textual IR
pub fn print_ir(module: &IrModule) -> String {
    let mut printer = IRPrinter::new();
    printer.print_module(module).unwrap_or_default()
}
