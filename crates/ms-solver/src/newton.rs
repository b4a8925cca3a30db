//! Damped Newton solver for square nonlinear systems.

use crate::error::{SolverError, SolverResult};
use crate::linear::{LinearSolver, LinearSolverKind};
use ms_core::{Tolerances, wrms_norm};
use nalgebra::{DMatrix, DVector};

/// Newton solver configuration.
#[derive(Clone, Debug)]
pub struct NewtonConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Absolute tolerance on the Newton update
    pub abs_tol: f64,
    /// Relative tolerance on the Newton update
    pub rel_tol: f64,
    /// Residual norm accepted as converged without a further update
    pub residual_tol: f64,
    /// Line search backtracking factor
    pub line_search_beta: f64,
    /// Maximum line search iterations
    pub max_line_search_iters: usize,
    pub linear_solver: LinearSolverKind,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            abs_tol: 1e-10,
            rel_tol: 1e-10,
            residual_tol: 1e-12,
            line_search_beta: 0.5,
            max_line_search_iters: 20,
            linear_solver: LinearSolverKind::Dense,
        }
    }
}

impl NewtonConfig {
    pub fn validate(&self) -> SolverResult<()> {
        if self.max_iterations == 0 {
            return Err(SolverError::ProblemSetup {
                what: "max_iterations must be positive".to_string(),
            });
        }
        if !(self.abs_tol > 0.0 && self.rel_tol >= 0.0 && self.residual_tol >= 0.0) {
            return Err(SolverError::ProblemSetup {
                what: "Newton tolerances must be positive".to_string(),
            });
        }
        if !(self.line_search_beta > 0.0 && self.line_search_beta < 1.0) {
            return Err(SolverError::ProblemSetup {
                what: format!("line_search_beta must be in (0, 1), got {}", self.line_search_beta),
            });
        }
        Ok(())
    }
}

/// Newton iteration result.
#[derive(Clone, Debug)]
pub struct NewtonResult {
    /// Solution vector
    pub x: DVector<f64>,
    /// Final residual norm
    pub residual_norm: f64,
    /// Number of iterations
    pub iterations: usize,
}

/// Newton solver with a backtracking line search.
///
/// Converges when the residual norm is at most `residual_tol`, or when the
/// weighted RMS norm of a full Newton update is at most one (weights
/// `abs_tol + rel_tol * |x_i|`), in which case the update is applied.
///
/// A singular Jacobian, or a line search that cannot reduce a nonzero
/// residual, yields [`SolverError::Singular`]. Running out of iterations
/// yields [`SolverError::ConvergenceFailed`].
pub fn newton_solve<F, J>(
    x0: DVector<f64>,
    mut residual_fn: F,
    mut jacobian_fn: J,
    config: &NewtonConfig,
) -> SolverResult<NewtonResult>
where
    F: FnMut(&DVector<f64>) -> SolverResult<DVector<f64>>,
    J: FnMut(&DVector<f64>, &DVector<f64>) -> SolverResult<DMatrix<f64>>,
{
    let tol = Tolerances::new(config.abs_tol, config.rel_tol);
    let mut x = x0;
    let mut r = residual_fn(&x)?;
    let mut r_norm = r.norm();
    if !r_norm.is_finite() {
        return Err(SolverError::Numeric {
            what: "Non-finite residual at initial guess".to_string(),
        });
    }

    for iter in 0..config.max_iterations {
        if r_norm <= config.residual_tol {
            return Ok(NewtonResult {
                x,
                residual_norm: r_norm,
                iterations: iter,
            });
        }

        let jac = jacobian_fn(&x, &r)?;
        let dx = LinearSolver::new(config.linear_solver, &jac)?.solve(&(-&r))?;

        let weights: Vec<f64> = x.iter().map(|&xi| tol.weight(xi)).collect();
        if wrms_norm(dx.as_slice(), &weights) <= 1.0 {
            x += dx;
            let r_norm = residual_fn(&x)?.norm();
            return Ok(NewtonResult {
                x,
                residual_norm: r_norm,
                iterations: iter + 1,
            });
        }

        let mut alpha = 1.0;
        let mut accepted = None;
        for _ in 0..config.max_line_search_iters {
            let x_new = &x + alpha * &dx;
            let r_new = residual_fn(&x_new)?;
            let r_new_norm = r_new.norm();
            if r_new_norm < (1.0 - 1e-4 * alpha) * r_norm {
                accepted = Some((x_new, r_new, r_new_norm));
                break;
            }
            alpha *= config.line_search_beta;
        }

        match accepted {
            Some((x_new, r_new, r_new_norm)) => {
                x = x_new;
                r = r_new;
                r_norm = r_new_norm;
            }
            None => {
                return Err(SolverError::Singular {
                    what: format!("Newton stagnated at iteration {iter}, residual = {r_norm:e}"),
                });
            }
        }
    }

    Err(SolverError::ConvergenceFailed {
        what: format!(
            "Maximum iterations {} reached, residual = {:e}",
            config.max_iterations, r_norm
        ),
    })
}
