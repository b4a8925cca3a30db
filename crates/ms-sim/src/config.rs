//! Integrator configuration.

use crate::error::{IntegrationError, IntegrationResult};
use ms_solver::LinearSolverKind;

/// Options for [`BdfIntegrator`](crate::BdfIntegrator).
#[derive(Clone, Debug)]
pub struct IntegratorConfig {
    /// Absolute error tolerance
    pub abstol: f64,
    /// Relative error tolerance
    pub reltol: f64,
    /// Clip the last step to land exactly on the end time instead of interpolating
    pub stop_at_end: bool,
    pub linear_solver: LinearSolverKind,
    /// Symbolic Jacobians when true, forward differences otherwise
    pub exact_jacobian: bool,
    /// Leave algebraic states out of the error test
    pub suppress_algebraic: bool,
    /// Maximum step attempts per call (accepted and rejected)
    pub max_steps: usize,
    /// Corrector iterations per step before the step is retried smaller
    pub max_newton_iterations: usize,
    pub max_consistency_iterations: usize,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            abstol: 1e-6,
            reltol: 1e-6,
            stop_at_end: true,
            linear_solver: LinearSolverKind::Dense,
            exact_jacobian: true,
            suppress_algebraic: false,
            max_steps: 10_000,
            max_newton_iterations: 4,
            max_consistency_iterations: 20,
        }
    }
}

impl IntegratorConfig {
    /// Same options with both tolerances set to `tol`.
    pub fn with_tolerance(tol: f64) -> Self {
        Self {
            abstol: tol,
            reltol: tol,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> IntegrationResult<()> {
        if !(self.abstol > 0.0 && self.abstol.is_finite()) {
            return Err(IntegrationError::InvalidInput {
                what: format!("abstol must be positive, got {}", self.abstol),
            });
        }
        if !(self.reltol >= 0.0 && self.reltol.is_finite()) {
            return Err(IntegrationError::InvalidInput {
                what: format!("reltol must be non-negative, got {}", self.reltol),
            });
        }
        if self.max_steps == 0 {
            return Err(IntegrationError::InvalidInput {
                what: "max_steps must be positive".to_string(),
            });
        }
        if self.max_newton_iterations == 0 || self.max_consistency_iterations == 0 {
            return Err(IntegrationError::InvalidInput {
                what: "Newton iteration limits must be positive".to_string(),
            });
        }
        Ok(())
    }
}
