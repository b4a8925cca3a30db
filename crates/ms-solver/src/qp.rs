//! Equality-constrained QP with simple bounds, solved by a primal-dual
//! active-set iteration.
//!
//! ```text
//! minimize    0.5 d'Bd + g'd
//! subject to  A d + c = 0
//!             lower <= d <= upper
//! ```
//!
//! Each iteration fixes the active bounds, solves the KKT system of the
//! remaining free variables, then updates the active set from the bound
//! multipliers and the primal violation. Components with `lower == upper`
//! are always active.

use crate::error::{SolverError, SolverResult};
use crate::linear::{LinearSolver, LinearSolverKind};
use nalgebra::{DMatrix, DVector};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundState {
    Free,
    Lower,
    Upper,
    Fixed,
}

impl BoundState {
    pub fn is_active(self) -> bool {
        self != BoundState::Free
    }
}

/// QP subproblem data borrowed from the SQP iterate.
pub struct BoundQp<'a> {
    pub hessian: &'a DMatrix<f64>,
    pub gradient: &'a DVector<f64>,
    pub jacobian: &'a DMatrix<f64>,
    pub constraints: &'a DVector<f64>,
    pub lower: &'a DVector<f64>,
    pub upper: &'a DVector<f64>,
}

#[derive(Clone, Debug)]
pub struct QpSolution {
    pub d: DVector<f64>,
    /// Equality multipliers, with stationarity `B d + g + A' lambda + nu = 0`.
    pub lambda: DVector<f64>,
    /// Bound multipliers `nu`, zero for free variables.
    pub bound_multipliers: DVector<f64>,
    pub states: Vec<BoundState>,
    pub iterations: usize,
}

impl BoundQp<'_> {
    fn bound_value(&self, j: usize, state: BoundState) -> f64 {
        match state {
            BoundState::Lower | BoundState::Fixed => self.lower[j],
            BoundState::Upper => self.upper[j],
            BoundState::Free => 0.0,
        }
    }

    /// Solve the KKT system for fixed bound states.
    fn solve_kkt(&self, states: &[BoundState]) -> SolverResult<(DVector<f64>, DVector<f64>)> {
        let n = self.gradient.len();
        let m = self.constraints.len();
        let free: Vec<usize> = (0..n).filter(|&j| !states[j].is_active()).collect();
        let nf = free.len();

        let mut d = DVector::zeros(n);
        for (j, &state) in states.iter().enumerate() {
            if state.is_active() {
                d[j] = self.bound_value(j, state);
            }
        }

        let mut kkt = DMatrix::zeros(nf + m, nf + m);
        let mut rhs = DVector::zeros(nf + m);
        let bd = self.hessian * &d;
        let ad = self.jacobian * &d;
        for (p, &i) in free.iter().enumerate() {
            for (q, &j) in free.iter().enumerate() {
                kkt[(p, q)] = self.hessian[(i, j)];
            }
            for k in 0..m {
                kkt[(p, nf + k)] = self.jacobian[(k, i)];
                kkt[(nf + k, p)] = self.jacobian[(k, i)];
            }
            // d is zero on free components here, so bd/ad hold only active contributions.
            rhs[p] = -self.gradient[i] - bd[i];
        }
        for k in 0..m {
            rhs[nf + k] = -self.constraints[k] - ad[k];
        }

        if nf + m > 0 {
            let sol = LinearSolver::new(LinearSolverKind::Dense, &kkt)
                .and_then(|solver| solver.solve(&rhs))
                .map_err(|e| match e {
                    SolverError::Singular { what } => SolverError::Infeasible {
                        what: format!("Linearized constraints are inconsistent with the bounds ({what})"),
                    },
                    other => other,
                })?;
            for (p, &i) in free.iter().enumerate() {
                d[i] = sol[p];
            }
            let lambda = sol.rows(nf, m).into_owned();
            Ok((d, lambda))
        } else {
            Ok((d, DVector::zeros(0)))
        }
    }

    pub fn solve(&self, max_iterations: usize) -> SolverResult<QpSolution> {
        let n = self.gradient.len();
        let mut states: Vec<BoundState> = (0..n)
            .map(|j| {
                if self.lower[j] == self.upper[j] {
                    BoundState::Fixed
                } else {
                    BoundState::Free
                }
            })
            .collect();

        for iteration in 1..=max_iterations {
            let (d, lambda) = self.solve_kkt(&states)?;
            let stationarity =
                self.hessian * &d + self.gradient + self.jacobian.transpose() * &lambda;
            let bound_multipliers = DVector::from_fn(n, |j, _| {
                if states[j].is_active() {
                    -stationarity[j]
                } else {
                    0.0
                }
            });

            let mut changed = false;
            for j in 0..n {
                if states[j] == BoundState::Fixed {
                    continue;
                }
                let nu = bound_multipliers[j];
                let lower_mult = if states[j] == BoundState::Lower { -nu } else { 0.0 };
                let upper_mult = if states[j] == BoundState::Upper { nu } else { 0.0 };
                let next = if lower_mult + (self.lower[j] - d[j]) > 0.0 {
                    BoundState::Lower
                } else if upper_mult + (d[j] - self.upper[j]) > 0.0 {
                    BoundState::Upper
                } else {
                    BoundState::Free
                };
                if next != states[j] {
                    states[j] = next;
                    changed = true;
                }
            }

            if !changed {
                return Ok(QpSolution {
                    d,
                    lambda,
                    bound_multipliers,
                    states,
                    iterations: iteration,
                });
            }
        }

        Err(SolverError::ConvergenceFailed {
            what: format!("QP active set did not settle in {max_iterations} iterations"),
        })
    }
}
