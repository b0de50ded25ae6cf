//! Type model

mod type_system;

pub use type_system::{BasicType, FunctionType, PrimitiveType, TypeNode};
