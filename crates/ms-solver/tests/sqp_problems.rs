use ms_solver::{
    NlpEvaluation, NlpProblem, NlpSolver, SolverError, SolverResult, SqpConfig, SqpSolver,
};
use nalgebra::{DMatrix, DVector};

/// min (w0 - 1)^2 + (w1 - 2)^2  s.t.  w0 + w1 = 1
struct Projection;

impl NlpProblem for Projection {
    fn num_variables(&self) -> usize {
        2
    }

    fn num_constraints(&self) -> usize {
        1
    }

    fn evaluate(&self, w: &DVector<f64>) -> SolverResult<NlpEvaluation> {
        Ok(NlpEvaluation {
            objective: (w[0] - 1.0).powi(2) + (w[1] - 2.0).powi(2),
            gradient: DVector::from_vec(vec![2.0 * (w[0] - 1.0), 2.0 * (w[1] - 2.0)]),
            constraints: DVector::from_vec(vec![w[0] + w[1] - 1.0]),
            jacobian: DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
        })
    }
}

/// min w0 + w1  s.t.  w0^2 + w1^2 = 2
struct Circle;

impl NlpProblem for Circle {
    fn num_variables(&self) -> usize {
        2
    }

    fn num_constraints(&self) -> usize {
        1
    }

    fn evaluate(&self, w: &DVector<f64>) -> SolverResult<NlpEvaluation> {
        Ok(NlpEvaluation {
            objective: w[0] + w[1],
            gradient: DVector::from_vec(vec![1.0, 1.0]),
            constraints: DVector::from_vec(vec![w[0] * w[0] + w[1] * w[1] - 2.0]),
            jacobian: DMatrix::from_row_slice(1, 2, &[2.0 * w[0], 2.0 * w[1]]),
        })
    }
}

fn unbounded(n: usize) -> (DVector<f64>, DVector<f64>) {
    (
        DVector::from_element(n, f64::NEG_INFINITY),
        DVector::from_element(n, f64::INFINITY),
    )
}

fn tight() -> SqpSolver {
    SqpSolver::new(SqpConfig {
        kkt_tolerance: 1e-12,
        ..SqpConfig::default()
    })
    .unwrap()
}

#[test]
fn quadratic_with_linear_constraint() {
    let solver = tight();
    let (lo, up) = unbounded(2);
    let sol = solver
        .solve(&Projection, &DVector::zeros(2), &lo, &up)
        .unwrap();

    assert!(sol.w[0].abs() < 1e-4);
    assert!((sol.w[1] - 1.0).abs() < 1e-4);
    assert!(sol.kkt_residual < 1e-12);
    assert!(sol.constraint_violation < 1e-12);
}

#[test]
fn active_lower_bound() {
    let solver = tight();
    let lo = DVector::from_vec(vec![0.5, f64::NEG_INFINITY]);
    let up = DVector::from_element(2, f64::INFINITY);
    let sol = solver
        .solve(&Projection, &DVector::from_vec(vec![2.0, 0.0]), &lo, &up)
        .unwrap();

    assert!((sol.w[0] - 0.5).abs() < 1e-4);
    assert!((sol.w[1] - 0.5).abs() < 1e-4);
}

#[test]
fn nonlinear_constraint_converges() {
    let solver = tight();
    let (lo, up) = unbounded(2);
    let sol = solver
        .solve(&Circle, &DVector::from_vec(vec![-0.5, -1.5]), &lo, &up)
        .unwrap();

    assert!((sol.w[0] + 1.0).abs() < 1e-4);
    assert!((sol.w[1] + 1.0).abs() < 1e-4);
    assert!((sol.objective + 2.0).abs() < 1e-4);
}

#[test]
fn inconsistent_bounds_are_infeasible() {
    let solver = SqpSolver::new(SqpConfig::default()).unwrap();
    let lo = DVector::from_vec(vec![1.0, 0.0]);
    let up = DVector::from_vec(vec![0.0, 1.0]);
    let err = solver
        .solve(&Projection, &DVector::zeros(2), &lo, &up)
        .unwrap_err();
    assert!(matches!(err, SolverError::Infeasible { .. }));
}

#[test]
fn iteration_limit_is_reported() {
    let solver = SqpSolver::new(SqpConfig {
        max_iterations: 1,
        ..SqpConfig::default()
    })
    .unwrap();
    let (lo, up) = unbounded(2);
    let err = solver
        .solve(&Circle, &DVector::from_vec(vec![-0.5, -1.5]), &lo, &up)
        .unwrap_err();
    assert!(matches!(err, SolverError::IterationLimit { iterations: 1, .. }));
}

#[test]
fn evaluation_failure_at_start_is_reported() {
    struct Broken;
    impl NlpProblem for Broken {
        fn num_variables(&self) -> usize {
            1
        }
        fn num_constraints(&self) -> usize {
            0
        }
        fn evaluate(&self, _: &DVector<f64>) -> SolverResult<NlpEvaluation> {
            Err(SolverError::Numeric {
                what: "not evaluable".to_string(),
            })
        }
    }

    let solver = SqpSolver::new(SqpConfig::default()).unwrap();
    let (lo, up) = unbounded(1);
    let err = solver
        .solve(&Broken, &DVector::zeros(1), &lo, &up)
        .unwrap_err();
    assert!(matches!(err, SolverError::Evaluation { .. }));
}
