use ms_sim::{
    BdfIntegrator, DaeIntegrator, DaeState, IntegrationError, IntegratorConfig, LinearSolverKind,
    StepInput,
};
use ms_solver::{SolverResult, central_difference_jacobian};
use ms_symbolic::{DaeResidual, DaeVariables, ResidualOptions, SymbolicModel};
use nalgebra::DVector;

/// xdot = -x + z + u, 0 = z - x/2; with u = 0, x(t) = x0 exp(-t/2).
fn linear_dae() -> DaeResidual {
    let mut model = SymbolicModel::new();
    let v = DaeVariables::declare(&mut model, &["x"], &["z"], &["u"], &[]);
    let (x, z, u) = (&v.x[0], &v.z[0], &v.u[0]);
    let f = model
        .dae_function("linear", &v, vec![-x + z + u, z - 0.5 * x], 1)
        .unwrap();
    DaeResidual::from_dynamics(&mut model, &f, ResidualOptions::default()).unwrap()
}

/// The reference scenario dynamics with the running cost as a second state.
fn simple_dae() -> DaeResidual {
    let mut model = SymbolicModel::new();
    let v = DaeVariables::declare(&mut model, &["x", "l"], &["z"], &["u"], &[]);
    let (x, z, u) = (&v.x[0], &v.z[0], &v.u[0]);
    let outputs = vec![
        -x + 0.5 * x.powi(2) + u + 0.5 * z,
        x.powi(2) + 3.0 * u.powi(2),
        z + z.exp() - 1.0 + x,
    ];
    let f = model.dae_function("simple_dae", &v, outputs, 1).unwrap();
    DaeResidual::from_dynamics(&mut model, &f, ResidualOptions::default()).unwrap()
}

fn integrator(residual: DaeResidual, config: IntegratorConfig) -> BdfIntegrator {
    BdfIntegrator::new(residual, config).unwrap()
}

fn linear_error(tol: f64) -> f64 {
    let bdf = integrator(linear_dae(), IntegratorConfig::with_tolerance(tol));
    let out = bdf
        .integrate(&StepInput {
            t0: 0.0,
            tf: 2.0,
            x0: &[1.0],
            z0_guess: &[0.0],
            u: &[0.0],
            p: &[],
            sensitivities: false,
        })
        .unwrap();
    (out.xf[0] - (-1.0_f64).exp()).abs()
}

#[test]
fn linear_dae_is_accurate() {
    let bdf = integrator(linear_dae(), IntegratorConfig::with_tolerance(1e-8));
    let out = bdf
        .integrate(&StepInput {
            t0: 0.0,
            tf: 2.0,
            x0: &[1.0],
            z0_guess: &[0.0],
            u: &[0.0],
            p: &[],
            sensitivities: false,
        })
        .unwrap();

    assert!((out.xf[0] - (-1.0_f64).exp()).abs() < 1e-5);
    assert!((out.zf[0] - 0.5 * out.xf[0]).abs() < 1e-7);
    assert!(out.stats.steps > 2);
}

#[test]
fn tightening_tolerance_reduces_error() {
    assert!(linear_error(1e-8) < linear_error(1e-4));
}

#[test]
fn overshoot_and_interpolate() {
    let config = IntegratorConfig {
        stop_at_end: false,
        ..IntegratorConfig::with_tolerance(1e-8)
    };
    let bdf = integrator(linear_dae(), config);
    let out = bdf
        .integrate(&StepInput {
            t0: 0.0,
            tf: 2.0,
            x0: &[1.0],
            z0_guess: &[0.0],
            u: &[0.0],
            p: &[],
            sensitivities: false,
        })
        .unwrap();
    assert!((out.xf[0] - (-1.0_f64).exp()).abs() < 1e-4);
}

fn reference_input(sensitivities: bool) -> StepInput<'static> {
    StepInput {
        t0: 0.0,
        tf: 0.25,
        x0: &[1.0, 0.0],
        z0_guess: &[0.0],
        u: &[0.3],
        p: &[],
        sensitivities,
    }
}

#[test]
fn iterative_and_finite_difference_variants_agree() {
    let reference = integrator(simple_dae(), IntegratorConfig::with_tolerance(1e-10))
        .integrate(&reference_input(false))
        .unwrap();

    let config = IntegratorConfig {
        linear_solver: LinearSolverKind::Iterative,
        exact_jacobian: false,
        ..IntegratorConfig::with_tolerance(1e-10)
    };
    let variant = integrator(simple_dae(), config)
        .integrate(&reference_input(false))
        .unwrap();

    assert!((reference.xf - variant.xf).amax() < 1e-6);
    assert!((reference.zf - variant.zf).amax() < 1e-6);
}

#[test]
fn sensitivities_match_finite_differences() {
    let bdf = integrator(simple_dae(), IntegratorConfig::with_tolerance(1e-10));
    let out = bdf.integrate(&reference_input(true)).unwrap();
    let sens = out.sensitivity.expect("sensitivities requested");

    // p_s = [x0; u] -> [xf; zf]
    let map = |ps: &DVector<f64>| -> SolverResult<DVector<f64>> {
        let out = bdf
            .integrate(&StepInput {
                x0: &[ps[0], ps[1]],
                u: &[ps[2]],
                ..reference_input(false)
            })
            .unwrap();
        Ok(DVector::from_vec(vec![out.xf[0], out.xf[1], out.zf[0]]))
    };
    let fd = central_difference_jacobian(&DVector::from_vec(vec![1.0, 0.0, 0.3]), map, 1e-5)
        .unwrap();

    for i in 0..2 {
        for j in 0..2 {
            assert!((sens.dx_dx0[(i, j)] - fd[(i, j)]).abs() < 1e-4);
        }
        assert!((sens.dx_du[(i, 0)] - fd[(i, 2)]).abs() < 1e-4);
    }
    for j in 0..2 {
        assert!((sens.dz_dx0[(0, j)] - fd[(2, j)]).abs() < 1e-4);
    }
    assert!((sens.dz_du[(0, 0)] - fd[(2, 2)]).abs() < 1e-4);
}

#[test]
fn constraint_without_real_root_is_singular() {
    let mut model = SymbolicModel::new();
    let v = DaeVariables::declare(&mut model, &["x"], &["z"], &[], &[]);
    let (x, z) = (&v.x[0], &v.z[0]);
    let f = model
        .dae_function("no_root", &v, vec![-x, z.powi(2) + x.powi(2) + 1.0], 1)
        .unwrap();
    let residual = DaeResidual::from_dynamics(&mut model, &f, ResidualOptions::default()).unwrap();
    let bdf = integrator(residual, IntegratorConfig::default());

    let err = bdf
        .integrate(&StepInput {
            t0: 0.0,
            tf: 1.0,
            x0: &[1.0],
            z0_guess: &[0.0],
            u: &[],
            p: &[],
            sensitivities: false,
        })
        .unwrap_err();
    assert!(matches!(err, IntegrationError::SingularJacobian { .. }));
}

#[test]
fn poor_algebraic_guess_fails_consistency() {
    let config = IntegratorConfig {
        max_consistency_iterations: 1,
        ..IntegratorConfig::default()
    };
    let bdf = integrator(simple_dae(), config);
    let err = bdf
        .integrate(&StepInput {
            z0_guess: &[10.0],
            ..reference_input(false)
        })
        .unwrap_err();
    assert!(matches!(err, IntegrationError::ConsistencyFailure { t, .. } if t == 0.0));
}

#[test]
fn step_budget_is_enforced() {
    let config = IntegratorConfig {
        max_steps: 3,
        ..IntegratorConfig::with_tolerance(1e-10)
    };
    let bdf = integrator(simple_dae(), config);
    let err = bdf
        .integrate(&StepInput {
            tf: 5.0,
            ..reference_input(false)
        })
        .unwrap_err();
    assert!(matches!(err, IntegrationError::StepFailure { .. }));
}

#[test]
fn invalid_inputs_are_rejected() {
    let bdf = integrator(simple_dae(), IntegratorConfig::default());
    let err = bdf
        .integrate(&StepInput {
            tf: 0.0,
            ..reference_input(false)
        })
        .unwrap_err();
    assert!(matches!(err, IntegrationError::InvalidInput { .. }));

    let err = bdf
        .integrate(&StepInput {
            x0: &[1.0],
            ..reference_input(false)
        })
        .unwrap_err();
    assert!(matches!(err, IntegrationError::InvalidInput { .. }));
}

#[test]
fn consistent_state_solves_algebraic_equation() {
    let bdf = integrator(simple_dae(), IntegratorConfig::default());
    let state = bdf
        .consistent_state(0.0, &[1.0, 0.0], &[0.0], &[0.0], &[])
        .unwrap();
    let z = state.z[0];
    assert!((z + z.exp()).abs() < 1e-9);
    // xdot = -1 + 0.5 + 0.5 z
    assert!((state.xdot[0] - (-0.5 + 0.5 * z)).abs() < 1e-9);
    assert!((state.xdot[1] - 1.0).abs() < 1e-9);
}

#[test]
fn chained_steps_match_single_integration() {
    let bdf = integrator(simple_dae(), IntegratorConfig::with_tolerance(1e-10));
    let start = DaeState {
        x: DVector::from_vec(vec![1.0, 0.0]),
        z: DVector::from_vec(vec![0.0]),
    };
    let mid = bdf.step(&start, &[0.3], &[], 0.0, 0.125).unwrap();
    let end = bdf.step(&mid, &[0.3], &[], 0.125, 0.25).unwrap();
    let whole = bdf.integrate(&reference_input(false)).unwrap();

    assert!((end.x - whole.xf).amax() < 1e-7);
}
