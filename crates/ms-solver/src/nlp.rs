//! Nonlinear program interface.
//!
//! Problems have the form
//!
//! ```text
//! minimize    f(w)
//! subject to  c(w) = 0
//!             lower <= w <= upper
//! ```

use crate::error::SolverResult;
use nalgebra::{DMatrix, DVector};

/// Objective, constraints and their first derivatives at one point.
#[derive(Clone, Debug)]
pub struct NlpEvaluation {
    pub objective: f64,
    pub gradient: DVector<f64>,
    pub constraints: DVector<f64>,
    /// Dense constraint Jacobian, `num_constraints x num_variables`.
    pub jacobian: DMatrix<f64>,
}

/// An equality-constrained NLP with simple bounds.
pub trait NlpProblem: Sync {
    fn num_variables(&self) -> usize;

    fn num_constraints(&self) -> usize;

    /// Evaluate at `w`. Errors mean the point is not evaluable.
    fn evaluate(&self, w: &DVector<f64>) -> SolverResult<NlpEvaluation>;
}

/// Result of a converged NLP solve.
#[derive(Clone, Debug)]
pub struct NlpSolution {
    pub w: DVector<f64>,
    pub objective: f64,
    /// Equality constraint multipliers of the last QP subproblem.
    pub multipliers: DVector<f64>,
    pub kkt_residual: f64,
    pub constraint_violation: f64,
    pub iterations: usize,
}

/// Capability interface of an NLP solver.
pub trait NlpSolver {
    fn solve(
        &self,
        problem: &dyn NlpProblem,
        w0: &DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
    ) -> SolverResult<NlpSolution>;
}
