//! Error handling for the BPL back end

use crate::utils::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Compiler error
#[derive(Error, Debug, Clone, PartialEq)]
#[allow(dead_code)]
pub enum Error {
    // ==================== Resolution Errors ====================
    #[error("Undefined symbol: {name}")]
    UndefinedSymbol {
        name: String,
        suggestion: Option<String>,
        span: Span,
    },

    #[error("Unknown type: {name}")]
    UnknownType { name: String, span: Span },

    #[error("Duplicate definition: {name}")]
    DuplicateDefinition { name: String, span: Span },

    #[error("Type '{ty}' does not satisfy constraint '{constraint}' of generic parameter '{param}'")]
    ConstraintViolation {
        ty: String,
        constraint: String,
        param: String,
        span: Span,
    },

    #[error("Generic argument count mismatch for '{name}': expected {expected}, got {got}")]
    GenericArgCount {
        name: String,
        expected: usize,
        got: usize,
        span: Span,
    },

    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: String,
        got: String,
        span: Span,
    },

    #[error("No matching overload for '{name}' with arguments ({args})")]
    NoMatchingOverload {
        name: String,
        args: String,
        candidates: Vec<String>,
        span: Span,
    },

    #[error("Cannot infer generic arguments for call to '{name}'")]
    GenericInferenceUnsupported { name: String, span: Span },

    // ==================== Codegen Errors ====================
    #[error("Unknown field '{field}' in '{owner}'")]
    UnknownField {
        owner: String,
        field: String,
        span: Span,
    },

    #[error("Expression is not assignable: {kind}")]
    NotAssignable { kind: String, span: Span },

    #[error("Break statement outside of loop")]
    BreakOutsideLoop { span: Span },

    #[error("Continue statement outside of loop")]
    ContinueOutsideLoop { span: Span },

    #[error("Switch case value must be a literal")]
    NonLiteralCase { span: Span },

    #[error("Invalid operands for '{op}': {left} and {right}")]
    InvalidOperands {
        op: String,
        left: String,
        right: String,
        span: Span,
    },

    #[error("Unsupported: {what}")]
    Unsupported { what: String, span: Span },

    // ==================== Internal Errors ====================
    #[error("Layout for {name} not found")]
    LayoutMissing { name: String, span: Span },

    #[error("Unsupported cast from {from} to {to}")]
    UnsupportedCast { from: String, to: String, span: Span },

    #[error("Missing annotation: {what}")]
    MissingAnnotation { what: String, span: Span },

    #[error("Internal compiler error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the span associated with this error
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::UndefinedSymbol { span, .. }
            | Self::UnknownType { span, .. }
            | Self::DuplicateDefinition { span, .. }
            | Self::ConstraintViolation { span, .. }
            | Self::GenericArgCount { span, .. }
            | Self::TypeMismatch { span, .. }
            | Self::NoMatchingOverload { span, .. }
            | Self::GenericInferenceUnsupported { span, .. }
            | Self::UnknownField { span, .. }
            | Self::NotAssignable { span, .. }
            | Self::BreakOutsideLoop { span }
            | Self::ContinueOutsideLoop { span }
            | Self::NonLiteralCase { span }
            | Self::InvalidOperands { span, .. }
            | Self::Unsupported { span, .. }
            | Self::LayoutMissing { span, .. }
            | Self::UnsupportedCast { span, .. }
            | Self::MissingAnnotation { span, .. } => Some(*span),
            Self::Internal(_) => None,
        }
    }

    /// Remediation hint shown under the diagnostic
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::UndefinedSymbol { suggestion: Some(s), .. } => Some(format!("did you mean '{}'?", s)),
            Self::ConstraintViolation { constraint, .. } => {
                Some(format!("implement '{}' or pick a type that does", constraint))
            }
            Self::NoMatchingOverload { candidates, .. } if !candidates.is_empty() => {
                Some(format!("candidates are:\n  {}", candidates.join("\n  ")))
            }
            Self::GenericInferenceUnsupported { .. } => {
                Some("pass the generic arguments explicitly, e.g. f<i32>(x)".to_string())
            }
            Self::NotAssignable { .. } => {
                Some("only identifiers, fields, index expressions and dereferences can be assigned".to_string())
            }
            Self::BreakOutsideLoop { .. } | Self::ContinueOutsideLoop { .. } => {
                Some("move the statement into a loop body".to_string())
            }
            Self::NonLiteralCase { .. } => Some("use an integer, char or bool literal".to_string()),
            Self::LayoutMissing { .. }
            | Self::UnsupportedCast { .. }
            | Self::MissingAnnotation { .. }
            | Self::Internal(_) => Some("this is a compiler bug in an earlier pass".to_string()),
            _ => None,
        }
    }

    /// Internal invariant failures are never downgraded, even when collecting diagnostics
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::LayoutMissing { .. }
                | Self::UnsupportedCast { .. }
                | Self::MissingAnnotation { .. }
                | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn undefined_symbol_hint_uses_suggestion() {
        let err = Error::UndefinedSymbol {
            name: "conut".to_string(),
            suggestion: Some("count".to_string()),
            span: Span::dummy(),
        };
        assert_eq!(err.to_string(), "Undefined symbol: conut");
        assert_eq!(err.hint().as_deref(), Some("did you mean 'count'?"));
        assert!(!err.is_internal());
    }

    #[test]
    fn internal_errors_are_flagged() {
        let err = Error::LayoutMissing { name: "Point".to_string(), span: Span::dummy() };
        assert!(err.is_internal());
        assert_eq!(err.to_string(), "Layout for Point not found");
        assert!(Error::Internal("x".into()).span().is_none());
    }
}
