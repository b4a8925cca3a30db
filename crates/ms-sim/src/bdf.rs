//! Variable-step BDF integrator for `F(t, x, xdot, z, u, p) = 0`.
//!
//! Each call runs Initialized -> Stepping -> (Converged | Failed):
//!
//! 1. Consistent initialization solves `F(t0, x0, xdot, z, u, p) = 0` for
//!    `(xdot, z)` by Newton on `[F_xdot, F_z]`.
//! 2. Steps use backward Euler while fewer than three points are known and
//!    variable-coefficient BDF2 afterwards. The corrector is a Newton solve on
//!    `[F_x + a0 F_xdot, F_z]` started from a polynomial predictor, and the
//!    predictor/corrector difference gives the local error estimate.
//! 3. Forward sensitivities with respect to `[x0; u]` are propagated through
//!    each accepted step with the same iteration matrix.

use crate::config::IntegratorConfig;
use crate::error::{IntegrationError, IntegrationResult};
use ms_core::{Tolerances, wrms_norm};
use ms_solver::{
    LinearSolver, NewtonConfig, SolverError, SolverResult, finite_difference_jacobian,
    newton_solve,
};
use ms_symbolic::{DaeDims, DaePoint, DaeResidual, ResidualJacobians};
use nalgebra::{DMatrix, DVector};
use std::cell::Cell;
use std::collections::VecDeque;
use tracing::debug;

/// One integration request.
#[derive(Clone, Copy, Debug)]
pub struct StepInput<'a> {
    pub t0: f64,
    pub tf: f64,
    pub x0: &'a [f64],
    /// Starting guess for the algebraic states at `t0`
    pub z0_guess: &'a [f64],
    /// Controls, held constant over `[t0, tf]`
    pub u: &'a [f64],
    pub p: &'a [f64],
    pub sensitivities: bool,
}

/// Derivatives of the end state with respect to `x0` and `u`.
#[derive(Clone, Debug)]
pub struct Sensitivity {
    pub dx_dx0: DMatrix<f64>,
    pub dx_du: DMatrix<f64>,
    pub dz_dx0: DMatrix<f64>,
    pub dz_du: DMatrix<f64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntegratorStats {
    pub steps: usize,
    pub rejected_steps: usize,
    pub newton_failures: usize,
    pub newton_iterations: usize,
    pub jacobian_evaluations: usize,
}

#[derive(Clone, Debug)]
pub struct StepOutput {
    pub xf: DVector<f64>,
    pub zf: DVector<f64>,
    pub sensitivity: Option<Sensitivity>,
    pub stats: IntegratorStats,
}

/// Consistent `(xdot, z)` for a given `(t, x, u, p)`.
#[derive(Clone, Debug)]
pub struct ConsistentState {
    pub xdot: DVector<f64>,
    pub z: DVector<f64>,
}

/// Differential and algebraic state at one time.
#[derive(Clone, Debug, PartialEq)]
pub struct DaeState {
    pub x: DVector<f64>,
    pub z: DVector<f64>,
}

/// Capability interface of an implicit DAE integrator.
pub trait DaeIntegrator: Send + Sync {
    fn dims(&self) -> DaeDims;

    fn consistent_state(
        &self,
        t0: f64,
        x0: &[f64],
        z_guess: &[f64],
        u: &[f64],
        p: &[f64],
    ) -> IntegrationResult<ConsistentState>;

    fn integrate(&self, input: &StepInput<'_>) -> IntegrationResult<StepOutput>;

    /// Advance `state` from `t0` to `tf` with constant controls `u`.
    fn step(
        &self,
        state: &DaeState,
        u: &[f64],
        p: &[f64],
        t0: f64,
        tf: f64,
    ) -> IntegrationResult<DaeState> {
        let out = self.integrate(&StepInput {
            t0,
            tf,
            x0: state.x.as_slice(),
            z0_guess: state.z.as_slice(),
            u,
            p,
            sensitivities: false,
        })?;
        Ok(DaeState {
            x: out.xf,
            z: out.zf,
        })
    }
}

/// Accepted solution point. `s` holds `d[x; z]/d[x0; u]` when requested.
struct Node {
    t: f64,
    x: DVector<f64>,
    z: DVector<f64>,
    s: Option<DMatrix<f64>>,
}

/// Lagrange basis weights of the nodes `ts` evaluated at `t`.
fn lagrange_weights(ts: &[f64], t: f64) -> Vec<f64> {
    (0..ts.len())
        .map(|i| {
            (0..ts.len())
                .filter(|&j| j != i)
                .map(|j| (t - ts[j]) / (ts[i] - ts[j]))
                .product()
        })
        .collect()
}

fn hcat(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(a.nrows(), a.ncols() + b.ncols());
    out.view_mut((0, 0), a.shape()).copy_from(a);
    out.view_mut((0, a.ncols()), b.shape()).copy_from(b);
    out
}

fn vcat(a: &DVector<f64>, b: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(a.len() + b.len(), a.iter().chain(b.iter()).copied())
}

/// BDF coefficients `[a0, a1, ...]` with `xdot_{n+1} = sum_j a_j x_{n+1-j}`.
fn bdf_coefficients(order: usize, h: f64, h_prev: f64) -> Vec<f64> {
    if order == 1 {
        return vec![1.0 / h, -1.0 / h];
    }
    let w = h / h_prev;
    vec![
        (1.0 + 2.0 * w) / (h * (1.0 + w)),
        -(1.0 + w) / h,
        w * w / (h * (1.0 + w)),
    ]
}

/// Variable-step BDF integrator over a compiled DAE residual.
#[derive(Clone, Debug)]
pub struct BdfIntegrator {
    residual: DaeResidual,
    config: IntegratorConfig,
}

impl BdfIntegrator {
    pub fn new(residual: DaeResidual, config: IntegratorConfig) -> IntegrationResult<Self> {
        config.validate()?;
        Ok(Self { residual, config })
    }

    pub fn config(&self) -> &IntegratorConfig {
        &self.config
    }

    pub fn residual(&self) -> &DaeResidual {
        &self.residual
    }

    fn eval_residual(&self, pt: &DaePoint<'_>) -> SolverResult<DVector<f64>> {
        self.residual
            .eval(pt)
            .map(DVector::from_vec)
            .map_err(|e| SolverError::Evaluation { what: e.to_string() })
    }

    fn eval_jacobians(&self, pt: &DaePoint<'_>) -> SolverResult<ResidualJacobians> {
        if self.config.exact_jacobian {
            return self
                .residual
                .jacobians(pt)
                .map_err(|e| SolverError::Evaluation { what: e.to_string() });
        }

        let eps = f64::EPSILON.sqrt();
        let f0 = self.eval_residual(pt)?;
        let column = |v: &[f64]| DVector::from_column_slice(v);
        Ok(ResidualJacobians {
            dx: finite_difference_jacobian(
                &column(pt.x),
                &f0,
                |v| self.eval_residual(&DaePoint { x: v.as_slice(), ..*pt }),
                eps,
            )?,
            dxdot: finite_difference_jacobian(
                &column(pt.xdot),
                &f0,
                |v| self.eval_residual(&DaePoint { xdot: v.as_slice(), ..*pt }),
                eps,
            )?,
            dz: finite_difference_jacobian(
                &column(pt.z),
                &f0,
                |v| self.eval_residual(&DaePoint { z: v.as_slice(), ..*pt }),
                eps,
            )?,
            du: finite_difference_jacobian(
                &column(pt.u),
                &f0,
                |v| self.eval_residual(&DaePoint { u: v.as_slice(), ..*pt }),
                eps,
            )?,
        })
    }

    fn check_lengths(&self, x0: &[f64], z: &[f64], u: &[f64], p: &[f64]) -> IntegrationResult<()> {
        let dims = self.residual.dims();
        for (what, expected, found) in [
            ("x0", dims.nx, x0.len()),
            ("z0", dims.nz, z.len()),
            ("u", dims.nu, u.len()),
            ("p", dims.np, p.len()),
        ] {
            if expected != found {
                return Err(IntegrationError::InvalidInput {
                    what: format!("{what} has length {found}, expected {expected}"),
                });
            }
        }
        for (what, values) in [("x0", x0), ("z0", z), ("u", u), ("p", p)] {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(IntegrationError::InvalidInput {
                    what: format!("{what} contains a non-finite value"),
                });
            }
        }
        Ok(())
    }

    fn corrector_config(&self, max_iterations: usize, scale: f64) -> NewtonConfig {
        NewtonConfig {
            max_iterations,
            abs_tol: scale * self.config.abstol,
            rel_tol: scale * self.config.reltol,
            residual_tol: 1e-14,
            linear_solver: self.config.linear_solver,
            ..NewtonConfig::default()
        }
    }

    /// Sensitivities of `[xdot; z]` at the initial point, returned as `[S_x; S_z]`.
    fn initial_sensitivity(
        &self,
        t0: f64,
        x0: &[f64],
        init: &ConsistentState,
        u: &[f64],
        p: &[f64],
    ) -> IntegrationResult<DMatrix<f64>> {
        let dims = self.residual.dims();
        let pt = DaePoint {
            t: t0,
            x: x0,
            xdot: init.xdot.as_slice(),
            z: init.z.as_slice(),
            u,
            p,
        };
        let singular = |e: SolverError| IntegrationError::SingularJacobian {
            t: t0,
            what: e.to_string(),
        };
        let jac = self.eval_jacobians(&pt).map_err(singular)?;
        let rhs = -hcat(&jac.dx, &jac.du);
        let sv = LinearSolver::new(self.config.linear_solver, &hcat(&jac.dxdot, &jac.dz))
            .and_then(|solver| solver.solve_matrix(&rhs))
            .map_err(singular)?;

        let ncols = dims.nx + dims.nu;
        let mut s = DMatrix::zeros(dims.ns(), ncols);
        s.view_mut((0, 0), (dims.nx, dims.nx)).fill_with_identity();
        s.view_mut((dims.nx, 0), (dims.nz, ncols))
            .copy_from(&sv.rows(dims.nx, dims.nz));
        Ok(s)
    }

    fn step_failure(&self, t: f64, last: Option<&SolverError>) -> IntegrationError {
        match last {
            Some(SolverError::Singular { what }) => IntegrationError::SingularJacobian {
                t,
                what: what.clone(),
            },
            Some(e) => IntegrationError::StepFailure {
                t,
                what: format!("step size collapsed after corrector failure: {e}"),
            },
            None => IntegrationError::StepFailure {
                t,
                what: "step size collapsed in the error test".to_string(),
            },
        }
    }
}

impl DaeIntegrator for BdfIntegrator {
    fn dims(&self) -> DaeDims {
        self.residual.dims()
    }

    fn consistent_state(
        &self,
        t0: f64,
        x0: &[f64],
        z_guess: &[f64],
        u: &[f64],
        p: &[f64],
    ) -> IntegrationResult<ConsistentState> {
        self.check_lengths(x0, z_guess, u, p)?;
        let nx = x0.len();

        let v0 = vcat(&DVector::zeros(nx), &DVector::from_column_slice(z_guess));
        let config = self.corrector_config(self.config.max_consistency_iterations, 1e-3);
        let result = newton_solve(
            v0,
            |v| {
                let (xdot, z) = v.as_slice().split_at(nx);
                self.eval_residual(&DaePoint {
                    t: t0,
                    x: x0,
                    xdot,
                    z,
                    u,
                    p,
                })
            },
            |v, _| {
                let (xdot, z) = v.as_slice().split_at(nx);
                let jac = self.eval_jacobians(&DaePoint {
                    t: t0,
                    x: x0,
                    xdot,
                    z,
                    u,
                    p,
                })?;
                Ok(hcat(&jac.dxdot, &jac.dz))
            },
            &config,
        )
        .map_err(|e| match e {
            SolverError::Singular { what } => IntegrationError::SingularJacobian { t: t0, what },
            other => IntegrationError::ConsistencyFailure {
                t: t0,
                what: other.to_string(),
            },
        })?;

        Ok(ConsistentState {
            xdot: result.x.rows(0, nx).into_owned(),
            z: result.x.rows(nx, result.x.len() - nx).into_owned(),
        })
    }

    fn integrate(&self, input: &StepInput<'_>) -> IntegrationResult<StepOutput> {
        let (t0, tf) = (input.t0, input.tf);
        if !(t0.is_finite() && tf.is_finite() && tf > t0) {
            return Err(IntegrationError::InvalidInput {
                what: format!("integration interval [{t0}, {tf}] is empty or not finite"),
            });
        }
        let init = self.consistent_state(t0, input.x0, input.z0_guess, input.u, input.p)?;

        let cfg = &self.config;
        let dims = self.residual.dims();
        let (nx, nz, nu) = (dims.nx, dims.nz, dims.nu);
        let (u, p) = (input.u, input.p);
        let mut stats = IntegratorStats::default();
        let jacobian_count = Cell::new(0);

        let s0 = if input.sensitivities {
            Some(self.initial_sensitivity(t0, input.x0, &init, u, p)?)
        } else {
            None
        };
        let mut history: VecDeque<Node> = VecDeque::with_capacity(3);
        history.push_back(Node {
            t: t0,
            x: DVector::from_column_slice(input.x0),
            z: init.z.clone(),
            s: s0,
        });

        let span = tf - t0;
        let h_min = 100.0 * f64::EPSILON * t0.abs().max(tf.abs()).max(1.0);
        let tol = Tolerances::new(cfg.abstol, cfg.reltol);
        let weights = |y: &DVector<f64>| -> Vec<f64> { y.iter().map(|&v| tol.weight(v)).collect() };
        let xdot_norm = wrms_norm(init.xdot.as_slice(), &weights(&history[0].x));
        let mut h = if xdot_norm > 0.0 {
            (2.0 / xdot_norm).sqrt().min(0.1 * span)
        } else {
            0.1 * span
        };
        h = h.max(h_min);

        let mut attempts = 0;
        let mut last_failure: Option<SolverError> = None;

        loop {
            let Some(last) = history.back() else {
                break;
            };
            let t = last.t;
            if t >= tf {
                break;
            }
            attempts += 1;
            if attempts > cfg.max_steps {
                return Err(IntegrationError::StepFailure {
                    t,
                    what: format!("step budget of {} attempts exhausted", cfg.max_steps),
                });
            }

            let remaining = tf - t;
            let mut t_new = t + h;
            if cfg.stop_at_end {
                if h >= remaining {
                    h = remaining;
                    t_new = tf;
                } else if 1.5 * h > remaining {
                    h = 0.5 * remaining;
                    t_new = t + h;
                }
            }

            let n_hist = history.len();
            let order = if n_hist >= 3 { 2 } else { 1 };
            let h_prev = if n_hist >= 2 {
                t - history[n_hist - 2].t
            } else {
                h
            };
            let alpha = bdf_coefficients(order, h, h_prev);

            // Predictor through the most recent points (explicit Euler on the first step).
            let (x_pred, z_pred) = if n_hist == 1 {
                (&last.x + h * &init.xdot, last.z.clone())
            } else {
                let recent: Vec<&Node> = history.iter().skip(n_hist.saturating_sub(3)).collect();
                let ts: Vec<f64> = recent.iter().map(|n| n.t).collect();
                let w = lagrange_weights(&ts, t_new);
                let mut xp = DVector::zeros(nx);
                let mut zp = DVector::zeros(nz);
                for (wi, node) in w.iter().zip(&recent) {
                    xp.axpy(*wi, &node.x, 1.0);
                    zp.axpy(*wi, &node.z, 1.0);
                }
                (xp, zp)
            };
            let y_pred = vcat(&x_pred, &z_pred);

            // History part of the BDF derivative: sum_{j>=1} a_j x_{n+1-j}.
            let mut xdot_hist = DVector::zeros(nx);
            for (j, aj) in alpha.iter().enumerate().skip(1) {
                xdot_hist.axpy(*aj, &history[n_hist - j].x, 1.0);
            }
            let a0 = alpha[0];

            let corrector = newton_solve(
                y_pred.clone(),
                |y| {
                    let (x, z) = y.as_slice().split_at(nx);
                    let xdot = a0 * DVector::from_column_slice(x) + &xdot_hist;
                    self.eval_residual(&DaePoint {
                        t: t_new,
                        x,
                        xdot: xdot.as_slice(),
                        z,
                        u,
                        p,
                    })
                },
                |y, _| {
                    jacobian_count.set(jacobian_count.get() + 1);
                    let (x, z) = y.as_slice().split_at(nx);
                    let xdot = a0 * DVector::from_column_slice(x) + &xdot_hist;
                    let jac = self.eval_jacobians(&DaePoint {
                        t: t_new,
                        x,
                        xdot: xdot.as_slice(),
                        z,
                        u,
                        p,
                    })?;
                    Ok(hcat(&(jac.dx + a0 * jac.dxdot), &jac.dz))
                },
                &self.corrector_config(cfg.max_newton_iterations, 0.1),
            );

            let y_corr = match corrector {
                Ok(result) => {
                    stats.newton_iterations += result.iterations;
                    result.x
                }
                Err(e) => {
                    stats.newton_failures += 1;
                    debug!(t, h, error = %e, "corrector failed, reducing step");
                    last_failure = Some(e);
                    h *= 0.25;
                    if h < h_min {
                        return Err(self.step_failure(t, last_failure.as_ref()));
                    }
                    continue;
                }
            };

            // Local error estimate from the predictor/corrector difference.
            let factor = match n_hist {
                1 => 0.5,
                2 => {
                    let w = h / h_prev;
                    w / (2.0 * w + 1.0)
                }
                _ => 2.0 / 11.0,
            };
            let include_z = n_hist > 1 && !cfg.suppress_algebraic;
            let n_err = if include_z { nx + nz } else { nx };
            let est: Vec<f64> = (0..n_err).map(|i| factor * (y_corr[i] - y_pred[i])).collect();
            let w_err: Vec<f64> = (0..n_err).map(|i| tol.weight(y_corr[i])).collect();
            let err = wrms_norm(&est, &w_err);
            let exponent = -1.0 / (order as f64 + 1.0);

            if err > 1.0 {
                stats.rejected_steps += 1;
                h *= (0.9 * err.powf(exponent)).clamp(0.2, 0.9);
                if h < h_min {
                    return Err(self.step_failure(t, last_failure.as_ref()));
                }
                continue;
            }

            let x_new = y_corr.rows(0, nx).into_owned();
            let z_new = y_corr.rows(nx, nz).into_owned();

            let s_new = match &last.s {
                Some(_) => {
                    let xdot = a0 * &x_new + &xdot_hist;
                    let pt = DaePoint {
                        t: t_new,
                        x: x_new.as_slice(),
                        xdot: xdot.as_slice(),
                        z: z_new.as_slice(),
                        u,
                        p,
                    };
                    let singular = |e: SolverError| IntegrationError::SingularJacobian {
                        t: t_new,
                        what: e.to_string(),
                    };
                    jacobian_count.set(jacobian_count.get() + 1);
                    let jac = self.eval_jacobians(&pt).map_err(singular)?;

                    let ncols = nx + nu;
                    let mut sx_hist = DMatrix::zeros(nx, ncols);
                    for (j, aj) in alpha.iter().enumerate().skip(1) {
                        if let Some(sj) = &history[n_hist - j].s {
                            sx_hist += *aj * sj.rows(0, nx);
                        }
                    }
                    let mut rhs = -(&jac.dxdot * sx_hist);
                    let mut rhs_u = rhs.view_mut((0, nx), (nx + nz, nu));
                    rhs_u -= &jac.du;

                    let m = hcat(&(&jac.dx + a0 * &jac.dxdot), &jac.dz);
                    let s = LinearSolver::new(cfg.linear_solver, &m)
                        .and_then(|solver| solver.solve_matrix(&rhs))
                        .map_err(singular)?;
                    Some(s)
                }
                None => None,
            };

            stats.steps += 1;
            last_failure = None;
            history.push_back(Node {
                t: t_new,
                x: x_new,
                z: z_new,
                s: s_new,
            });
            if history.len() > 3 {
                history.pop_front();
            }

            let grow = if err > 0.0 {
                (0.9 * err.powf(exponent)).clamp(0.2, 2.0)
            } else {
                2.0
            };
            h *= grow;
            if !cfg.stop_at_end {
                h = h.min(span);
            }
        }

        stats.jacobian_evaluations = jacobian_count.get();

        let (xf, zf, sf) = match history.back() {
            Some(last) if last.t == tf || history.len() == 1 => {
                (last.x.clone(), last.z.clone(), last.s.clone())
            }
            _ => {
                // Overshot the end time: interpolate through the latest points.
                let ts: Vec<f64> = history.iter().map(|n| n.t).collect();
                let w = lagrange_weights(&ts, tf);
                let mut xf = DVector::zeros(nx);
                let mut zf = DVector::zeros(nz);
                let mut sf = history.back().and_then(|n| n.s.as_ref()).map(|s| s * 0.0);
                for (wi, node) in w.iter().zip(&history) {
                    xf.axpy(*wi, &node.x, 1.0);
                    zf.axpy(*wi, &node.z, 1.0);
                    if let (Some(acc), Some(s)) = (sf.as_mut(), node.s.as_ref()) {
                        *acc += *wi * s;
                    }
                }
                (xf, zf, sf)
            }
        };

        let sensitivity = sf.map(|s| Sensitivity {
            dx_dx0: s.view((0, 0), (nx, nx)).into_owned(),
            dx_du: s.view((0, nx), (nx, nu)).into_owned(),
            dz_dx0: s.view((nx, 0), (nz, nx)).into_owned(),
            dz_du: s.view((nx, nx), (nz, nu)).into_owned(),
        });

        debug!(
            t0,
            tf,
            steps = stats.steps,
            rejected = stats.rejected_steps,
            "interval integrated"
        );
        Ok(StepOutput {
            xf,
            zf,
            sensitivity,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lagrange_weights_reproduce_quadratics() {
        let ts = [0.0, 0.3, 1.0];
        let w = lagrange_weights(&ts, 1.7);
        let q = |t: f64| 2.0 * t * t - t + 0.5;
        let interp: f64 = w.iter().zip(ts).map(|(wi, t)| wi * q(t)).sum();
        assert!((interp - q(1.7)).abs() < 1e-12);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bdf2_coefficients_are_exact_for_quadratics() {
        let (h, h_prev) = (0.2, 0.5);
        let a = bdf_coefficients(2, h, h_prev);
        let (t0, t1, t2) = (1.0 - h_prev, 1.0, 1.0 + h);
        let q = |t: f64| t * t;
        let approx = a[0] * q(t2) + a[1] * q(t1) + a[2] * q(t0);
        assert!((approx - 2.0 * t2).abs() < 1e-12);
    }

    #[test]
    fn constant_step_bdf2_matches_textbook() {
        let a = bdf_coefficients(2, 1.0, 1.0);
        assert_eq!(a, vec![1.5, -2.0, 0.5]);
    }

    proptest! {
        #[test]
        fn bdf2_differentiates_quadratics_for_any_step_ratio(
            h in 1e-3_f64..1.0,
            ratio in 0.2_f64..5.0,
            t1 in -2.0_f64..2.0,
            c in prop::array::uniform3(-5.0_f64..5.0),
        ) {
            let h_prev = h / ratio;
            let a = bdf_coefficients(2, h, h_prev);
            let q = |t: f64| c[0] + c[1] * t + c[2] * t * t;
            let (t0, t2) = (t1 - h_prev, t1 + h);
            let approx = a[0] * q(t2) + a[1] * q(t1) + a[2] * q(t0);
            let exact = c[1] + 2.0 * c[2] * t2;
            prop_assert!((approx - exact).abs() < 1e-8 * (1.0 + exact.abs()));
            prop_assert!((a.iter().sum::<f64>() * h).abs() < 1e-12);
        }
    }
}
