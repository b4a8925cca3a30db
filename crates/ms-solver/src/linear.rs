//! Dense and iterative solves of square linear systems.

use crate::error::{SolverError, SolverResult};
use nalgebra::{DMatrix, DVector, Dyn, LU};

/// Relative pivot threshold below which a matrix is treated as singular.
const PIVOT_TOL: f64 = 1e-14;

/// Linear solver used for Newton and sensitivity systems.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LinearSolverKind {
    /// LU with partial pivoting.
    #[default]
    Dense,
    /// Restarted GMRES without preconditioning.
    Iterative,
}

enum Backend {
    Dense(LU<f64, Dyn, Dyn>),
    Iterative(DMatrix<f64>),
}

/// A square matrix prepared for repeated solves.
pub struct LinearSolver {
    backend: Backend,
    n: usize,
    scale: f64,
}

impl LinearSolver {
    pub fn new(kind: LinearSolverKind, a: &DMatrix<f64>) -> SolverResult<Self> {
        if a.nrows() != a.ncols() {
            return Err(SolverError::ProblemSetup {
                what: format!("Matrix is {}x{}, expected square", a.nrows(), a.ncols()),
            });
        }
        if a.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::Numeric {
                what: "Non-finite matrix entry".to_string(),
            });
        }

        let n = a.nrows();
        let scale = a.amax();
        if n > 0 && scale == 0.0 {
            return Err(SolverError::Singular {
                what: "Zero matrix".to_string(),
            });
        }

        let backend = match kind {
            LinearSolverKind::Dense => {
                let lu = a.clone().lu();
                let u = lu.u();
                let smallest = (0..n)
                    .map(|k| (k, u[(k, k)].abs()))
                    .min_by(|a, b| a.1.total_cmp(&b.1));
                if let Some((k, pivot)) = smallest.filter(|(_, p)| *p <= PIVOT_TOL * scale) {
                    return Err(SolverError::Singular {
                        what: format!("LU pivot {k} is {pivot:e}"),
                    });
                }
                Backend::Dense(lu)
            }
            LinearSolverKind::Iterative => Backend::Iterative(a.clone()),
        };
        Ok(Self { backend, n, scale })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn solve(&self, b: &DVector<f64>) -> SolverResult<DVector<f64>> {
        if b.len() != self.n {
            return Err(SolverError::ProblemSetup {
                what: format!("Right-hand side has length {}, expected {}", b.len(), self.n),
            });
        }
        match &self.backend {
            Backend::Dense(lu) => lu.solve(b).ok_or_else(|| SolverError::Singular {
                what: "LU solve failed".to_string(),
            }),
            Backend::Iterative(a) => gmres(a, b, self.scale),
        }
    }

    /// Solve for every column of `b`.
    pub fn solve_matrix(&self, b: &DMatrix<f64>) -> SolverResult<DMatrix<f64>> {
        if b.nrows() != self.n {
            return Err(SolverError::ProblemSetup {
                what: format!("Right-hand side has {} rows, expected {}", b.nrows(), self.n),
            });
        }
        match &self.backend {
            Backend::Dense(lu) => lu.solve(b).ok_or_else(|| SolverError::Singular {
                what: "LU solve failed".to_string(),
            }),
            Backend::Iterative(a) => {
                let mut x = DMatrix::zeros(b.nrows(), b.ncols());
                for j in 0..b.ncols() {
                    let col = gmres(a, &b.column(j).into_owned(), self.scale)?;
                    x.set_column(j, &col);
                }
                Ok(x)
            }
        }
    }
}

const GMRES_TOL: f64 = 1e-12;
const GMRES_RESTARTS: usize = 4;

fn givens(a: f64, b: f64) -> (f64, f64) {
    let r = a.hypot(b);
    if r == 0.0 { (1.0, 0.0) } else { (a / r, b / r) }
}

/// Restarted GMRES with a Krylov space of dimension `n`.
fn gmres(a: &DMatrix<f64>, b: &DVector<f64>, scale: f64) -> SolverResult<DVector<f64>> {
    let n = b.len();
    let mut x = DVector::zeros(n);
    let b_norm = b.norm();
    if n == 0 || b_norm == 0.0 {
        return Ok(x);
    }
    let target = GMRES_TOL * b_norm;

    for _ in 0..=GMRES_RESTARTS {
        let r = b - a * &x;
        let beta = r.norm();
        if beta <= target {
            return Ok(x);
        }

        let mut basis = vec![r / beta];
        let mut h = DMatrix::<f64>::zeros(n + 1, n);
        let mut cs = vec![0.0; n];
        let mut sn = vec![0.0; n];
        let mut g = DVector::<f64>::zeros(n + 1);
        g[0] = beta;

        let mut k = 0;
        for j in 0..n {
            let mut w = a * &basis[j];
            for (i, v) in basis.iter().enumerate() {
                h[(i, j)] = w.dot(v);
                w.axpy(-h[(i, j)], v, 1.0);
            }
            let w_norm = w.norm();
            h[(j + 1, j)] = w_norm;

            for i in 0..j {
                let hij = cs[i] * h[(i, j)] + sn[i] * h[(i + 1, j)];
                h[(i + 1, j)] = -sn[i] * h[(i, j)] + cs[i] * h[(i + 1, j)];
                h[(i, j)] = hij;
            }
            let (c, s) = givens(h[(j, j)], h[(j + 1, j)]);
            cs[j] = c;
            sn[j] = s;
            h[(j, j)] = c * h[(j, j)] + s * h[(j + 1, j)];
            h[(j + 1, j)] = 0.0;
            g[j + 1] = -s * g[j];
            g[j] *= c;

            k = j + 1;
            if g[j + 1].abs() <= target || w_norm <= PIVOT_TOL * scale * beta {
                break;
            }
            basis.push(w / w_norm);
        }

        let mut y = DVector::<f64>::zeros(k);
        for i in (0..k).rev() {
            let mut sum = g[i];
            for l in (i + 1)..k {
                sum -= h[(i, l)] * y[l];
            }
            if h[(i, i)].abs() <= PIVOT_TOL * scale {
                return Err(SolverError::Singular {
                    what: "GMRES Hessenberg factor is singular".to_string(),
                });
            }
            y[i] = sum / h[(i, i)];
        }
        for (i, v) in basis.iter().take(k).enumerate() {
            x.axpy(y[i], v, 1.0);
        }
    }

    let residual = (b - a * &x).norm();
    if residual <= target.max(1e-10 * b_norm) {
        Ok(x)
    } else {
        Err(SolverError::Singular {
            what: format!("GMRES stalled at residual {residual:e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn system() -> (DMatrix<f64>, DVector<f64>) {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, -3.0, 2.0, 0.5, 0.0, 2.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        (a, b)
    }

    #[test]
    fn dense_and_iterative_agree() {
        let (a, b) = system();
        let dense = LinearSolver::new(LinearSolverKind::Dense, &a).unwrap().solve(&b).unwrap();
        let iterative = LinearSolver::new(LinearSolverKind::Iterative, &a)
            .unwrap()
            .solve(&b)
            .unwrap();
        assert!((&a * &dense - &b).norm() < 1e-12);
        assert!((dense - iterative).norm() < 1e-10);
    }

    #[test]
    fn solve_matrix_solves_each_column() {
        let (a, _) = system();
        let rhs = DMatrix::identity(3, 3);
        for kind in [LinearSolverKind::Dense, LinearSolverKind::Iterative] {
            let inv = LinearSolver::new(kind, &a).unwrap().solve_matrix(&rhs).unwrap();
            assert!((&a * inv - &rhs).norm() < 1e-10);
        }
    }

    #[test]
    fn singular_matrix_is_detected() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let err = LinearSolver::new(LinearSolverKind::Dense, &a).err().unwrap();
        assert!(matches!(err, SolverError::Singular { .. }));

        let b = DVector::from_vec(vec![1.0, 0.0]);
        let err = LinearSolver::new(LinearSolverKind::Iterative, &a)
            .unwrap()
            .solve(&b)
            .unwrap_err();
        assert!(matches!(err, SolverError::Singular { .. }));
    }

    #[test]
    fn non_square_is_rejected() {
        let a = DMatrix::zeros(2, 3);
        assert!(matches!(
            LinearSolver::new(LinearSolverKind::Dense, &a).err().unwrap(),
            SolverError::ProblemSetup { .. }
        ));
    }

    fn dominant_system() -> impl Strategy<Value = (DMatrix<f64>, DVector<f64>)> {
        (1usize..6).prop_flat_map(|n| {
            (
                prop::collection::vec(-1.0_f64..1.0, n * n),
                prop::collection::vec(-10.0_f64..10.0, n),
            )
                .prop_map(move |(entries, rhs)| {
                    let mut a = DMatrix::from_row_slice(n, n, &entries);
                    for i in 0..n {
                        a[(i, i)] += (n + 1) as f64;
                    }
                    (a, DVector::from_vec(rhs))
                })
        })
    }

    proptest! {
        #[test]
        fn dense_and_iterative_agree_on_dominant_systems((a, b) in dominant_system()) {
            let dense = LinearSolver::new(LinearSolverKind::Dense, &a).unwrap().solve(&b).unwrap();
            let iterative =
                LinearSolver::new(LinearSolverKind::Iterative, &a).unwrap().solve(&b).unwrap();
            let tol = 1e-9 * (1.0 + b.norm());
            prop_assert!((&a * &dense - &b).norm() < tol);
            prop_assert!((dense - iterative).norm() < tol);
        }
    }
}
