//! Middle end - name resolution, typing relations and the IR model

pub mod capture;
pub mod debug_info;
pub mod ir;
pub mod ir_printer;
pub mod monomorph;
pub mod overload;
pub mod symbols;
pub mod type_resolver;
