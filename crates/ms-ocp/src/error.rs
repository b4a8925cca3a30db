//! Error types for transcription, solving and validation.

use ms_sim::IntegrationError;
use ms_solver::SolverError;
use ms_symbolic::ModelError;
use thiserror::Error;

/// Errors returned by the solve driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("No convergence after {iterations} iterations (KKT residual {kkt:e})")]
    NonConvergence { iterations: usize, kkt: f64 },

    #[error("Infeasible problem: {what}")]
    Infeasible { what: String },

    #[error("Problem setup error: {what}")]
    ProblemSetup { what: String },

    #[error("Evaluation failed: {what}")]
    Evaluation { what: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

pub type SolveResult<T> = Result<T, SolveError>;

impl From<SolverError> for SolveError {
    fn from(e: SolverError) -> Self {
        match e {
            SolverError::IterationLimit { iterations, kkt } => {
                SolveError::NonConvergence { iterations, kkt }
            }
            SolverError::Infeasible { what } => SolveError::Infeasible { what },
            SolverError::ProblemSetup { what } => SolveError::ProblemSetup { what },
            SolverError::Evaluation { what } => SolveError::Evaluation { what },
            other => SolveError::Evaluation {
                what: other.to_string(),
            },
        }
    }
}

impl From<IntegrationError> for SolveError {
    fn from(e: IntegrationError) -> Self {
        match e {
            IntegrationError::InvalidInput { what } => SolveError::ProblemSetup { what },
            IntegrationError::Model(e) => SolveError::Model(e),
            other => SolveError::Evaluation {
                what: other.to_string(),
            },
        }
    }
}

/// Re-simulation stopped at interval `failed_at`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Validation failed at interval {failed_at}: {cause}")]
pub struct ValidationError {
    pub failed_at: usize,
    #[source]
    pub cause: IntegrationError,
}
