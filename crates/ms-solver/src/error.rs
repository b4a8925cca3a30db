//! Error types for solver operations.

use thiserror::Error;

/// Errors that can occur in linear, nonlinear and NLP solves.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Problem setup error: {what}")]
    ProblemSetup { what: String },

    #[error("Convergence failed: {what}")]
    ConvergenceFailed { what: String },

    #[error("Singular system: {what}")]
    Singular { what: String },

    #[error("Infeasible problem: {what}")]
    Infeasible { what: String },

    #[error("No convergence after {iterations} iterations (KKT residual {kkt:e})")]
    IterationLimit { iterations: usize, kkt: f64 },

    #[error("Evaluation failed: {what}")]
    Evaluation { what: String },

    #[error("Numeric error: {what}")]
    Numeric { what: String },
}

pub type SolverResult<T> = Result<T, SolverError>;
