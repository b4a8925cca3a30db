//! Error types for symbolic construction and evaluation.

use crate::model::Role;
use thiserror::Error;

/// Errors raised while building or evaluating symbolic functions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Arity mismatch in {what}: expected {expected}, found {found}")]
    ArityMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("Variable '{name}' has role {found:?}, expected {expected:?}")]
    RoleMismatch {
        name: String,
        expected: Role,
        found: Role,
    },

    #[error("Expression is not a variable: {expr}")]
    NotAVariable { expr: String },

    #[error("Duplicate input variable '{name}'")]
    DuplicateInput { name: String },

    #[error("Variable '{name}' is used by '{function}' but is not one of its inputs")]
    FreeVariable { name: String, function: String },

    #[error("Variable '{name}' was not declared by this model")]
    UnknownVariable { name: String },

    #[error("Function '{function}' has differentiation order 0")]
    NotDifferentiable { function: String },

    #[error("Function '{function}' has no outputs")]
    EmptyOutputs { function: String },

    #[error("Function '{function}' has no input group {group}")]
    InvalidGroup { function: String, group: usize },
}

pub type ModelResult<T> = Result<T, ModelError>;
