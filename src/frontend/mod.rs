//! Frontend module - annotated AST handed over by the parser and type checker

pub mod ast;
