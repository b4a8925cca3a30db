//! Implicit integration of semi-explicit DAEs.
//!
//! Provides:
//! - consistent initialization of `(xdot, z)` for given `x0`
//! - variable-step BDF (order 1 then 2) with weighted RMS error control
//! - dense or GMRES linear solves, exact or finite-difference Jacobians
//! - forward sensitivities of the end state with respect to `x0` and `u`

pub mod bdf;
pub mod config;
pub mod error;

pub use bdf::{
    BdfIntegrator, ConsistentState, DaeIntegrator, DaeState, IntegratorStats, Sensitivity,
    StepInput, StepOutput,
};
pub use config::IntegratorConfig;
pub use error::{IntegrationError, IntegrationResult};
pub use ms_solver::LinearSolverKind;
