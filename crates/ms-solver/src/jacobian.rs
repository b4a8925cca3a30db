//! Finite difference Jacobians.

use crate::error::{SolverError, SolverResult};
use nalgebra::{DMatrix, DVector};

/// Perturbation for component `j`, scaled by the magnitude of `x[j]`.
fn step(x: &DVector<f64>, j: usize, epsilon: f64) -> f64 {
    epsilon * x[j].abs().max(1.0)
}

fn check_len(expected: usize, found: usize) -> SolverResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(SolverError::Numeric {
            what: format!("Perturbed evaluation has length {found}, expected {expected}"),
        })
    }
}

/// Forward-difference Jacobian: column j is `(f(x + h e_j) - f(x)) / h`.
///
/// `f_x` is the already evaluated `f(x)`, so the cost is one evaluation per column.
pub fn finite_difference_jacobian<F>(
    x: &DVector<f64>,
    f_x: &DVector<f64>,
    mut f: F,
    epsilon: f64,
) -> SolverResult<DMatrix<f64>>
where
    F: FnMut(&DVector<f64>) -> SolverResult<DVector<f64>>,
{
    let mut jac = DMatrix::zeros(f_x.len(), x.len());
    let mut x_perturbed = x.clone();

    for j in 0..x.len() {
        let h = step(x, j, epsilon);
        x_perturbed[j] = x[j] + h;
        let f_perturbed = f(&x_perturbed)?;
        check_len(f_x.len(), f_perturbed.len())?;
        jac.set_column(j, &((f_perturbed - f_x) / h));
        x_perturbed[j] = x[j];
    }

    Ok(jac)
}

/// Central-difference Jacobian, second order accurate at twice the cost.
pub fn central_difference_jacobian<F>(
    x: &DVector<f64>,
    mut f: F,
    epsilon: f64,
) -> SolverResult<DMatrix<f64>>
where
    F: FnMut(&DVector<f64>) -> SolverResult<DVector<f64>>,
{
    let mut columns: Vec<DVector<f64>> = Vec::with_capacity(x.len());
    let mut x_perturbed = x.clone();

    for j in 0..x.len() {
        let h = step(x, j, epsilon);
        x_perturbed[j] = x[j] + h;
        let f_plus = f(&x_perturbed)?;
        x_perturbed[j] = x[j] - h;
        let f_minus = f(&x_perturbed)?;
        x_perturbed[j] = x[j];
        check_len(f_plus.len(), f_minus.len())?;
        if let Some(first) = columns.first() {
            check_len(first.len(), f_plus.len())?;
        }
        columns.push((f_plus - f_minus) / (2.0 * h));
    }

    if columns.is_empty() {
        let m = f(x)?.len();
        return Ok(DMatrix::zeros(m, 0));
    }
    Ok(DMatrix::from_columns(&columns))
}
