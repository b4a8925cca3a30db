//! Error types for DAE integration.

use ms_symbolic::ModelError;
use thiserror::Error;

/// Errors encountered while integrating one interval.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntegrationError {
    #[error("Invalid input: {what}")]
    InvalidInput { what: String },

    #[error("Consistent initialization failed at t = {t}: {what}")]
    ConsistencyFailure { t: f64, what: String },

    #[error("Step failure at t = {t}: {what}")]
    StepFailure { t: f64, what: String },

    #[error("Singular iteration matrix at t = {t}: {what}")]
    SingularJacobian { t: f64, what: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

pub type IntegrationResult<T> = Result<T, IntegrationError>;
