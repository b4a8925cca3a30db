//! SQP method with damped BFGS updates and an L1 merit line search.

use crate::error::{SolverError, SolverResult};
use crate::nlp::{NlpEvaluation, NlpProblem, NlpSolution, NlpSolver};
use crate::qp::BoundQp;
use ms_core::ensure_all_finite;
use ms_core::timing::Timer;
use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

/// SQP configuration.
#[derive(Clone, Debug)]
pub struct SqpConfig {
    /// Maximum SQP iterations
    pub max_iterations: usize,
    /// Tolerance on the KKT residual and on the constraint violation
    pub kkt_tolerance: f64,
    /// Sufficient decrease factor of the merit line search
    pub armijo: f64,
    /// Line search backtracking factor
    pub line_search_beta: f64,
    pub max_line_search_iters: usize,
    pub max_qp_iterations: usize,
}

impl Default for SqpConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            kkt_tolerance: 1e-6,
            armijo: 1e-4,
            line_search_beta: 0.5,
            max_line_search_iters: 30,
            max_qp_iterations: 100,
        }
    }
}

impl SqpConfig {
    pub fn validate(&self) -> SolverResult<()> {
        if self.max_iterations == 0 {
            return Err(SolverError::ProblemSetup {
                what: "max_iterations must be positive".to_string(),
            });
        }
        if !(self.kkt_tolerance > 0.0) {
            return Err(SolverError::ProblemSetup {
                what: format!("kkt_tolerance must be positive, got {}", self.kkt_tolerance),
            });
        }
        if !(self.armijo > 0.0 && self.armijo < 0.5) {
            return Err(SolverError::ProblemSetup {
                what: format!("armijo must be in (0, 0.5), got {}", self.armijo),
            });
        }
        if !(self.line_search_beta > 0.0 && self.line_search_beta < 1.0) {
            return Err(SolverError::ProblemSetup {
                what: format!("line_search_beta must be in (0, 1), got {}", self.line_search_beta),
            });
        }
        if self.max_line_search_iters == 0 || self.max_qp_iterations == 0 {
            return Err(SolverError::ProblemSetup {
                what: "line search and QP iteration limits must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// SQP solver for equality-constrained problems with simple bounds.
#[derive(Clone, Debug)]
pub struct SqpSolver {
    config: SqpConfig,
}

fn l1(v: &DVector<f64>) -> f64 {
    v.iter().map(|c| c.abs()).sum()
}

fn merit(eval: &NlpEvaluation, mu: f64) -> f64 {
    eval.objective + mu * l1(&eval.constraints)
}

/// Powell-damped BFGS update of `b` for step `s` and gradient change `y`.
fn damped_bfgs(b: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>) {
    let bs = &*b * s;
    let sbs = s.dot(&bs);
    if sbs <= f64::EPSILON * s.norm_squared() {
        return;
    }
    let sy = s.dot(y);
    let r = if sy >= 0.2 * sbs {
        y.clone()
    } else {
        let theta = 0.8 * sbs / (sbs - sy);
        theta * y + (1.0 - theta) * &bs
    };
    let sr = s.dot(&r);
    if sr <= 0.0 {
        return;
    }
    *b += &r * r.transpose() / sr - &bs * bs.transpose() / sbs;
}

impl SqpSolver {
    pub fn new(config: SqpConfig) -> SolverResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SqpConfig {
        &self.config
    }

    fn check_bounds(
        n: usize,
        w0: &DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
    ) -> SolverResult<()> {
        for (what, len) in [("w0", w0.len()), ("lower", lower.len()), ("upper", upper.len())] {
            if len != n {
                return Err(SolverError::ProblemSetup {
                    what: format!("{what} has length {len}, expected {n}"),
                });
            }
        }
        if let Some(j) = (0..n).find(|&j| lower[j].is_nan() || upper[j].is_nan()) {
            return Err(SolverError::ProblemSetup {
                what: format!("Bound {j} is NaN"),
            });
        }
        if let Some(j) = (0..n).find(|&j| lower[j] > upper[j]) {
            return Err(SolverError::Infeasible {
                what: format!("Bound {j}: lower {} > upper {}", lower[j], upper[j]),
            });
        }
        Ok(())
    }
}

impl NlpSolver for SqpSolver {
    fn solve(
        &self,
        problem: &dyn NlpProblem,
        w0: &DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
    ) -> SolverResult<NlpSolution> {
        let timer = Timer::start("sqp_solve");
        let cfg = &self.config;
        let n = problem.num_variables();
        Self::check_bounds(n, w0, lower, upper)?;

        let clip = |w: DVector<f64>| {
            DVector::from_fn(n, |j, _| w[j].clamp(lower[j], upper[j]))
        };
        let mut w = clip(w0.clone());
        let mut eval = problem.evaluate(&w).map_err(|e| SolverError::Evaluation {
            what: format!("initial point: {e}"),
        })?;
        ensure_all_finite(&[eval.objective], "objective")
            .and_then(|_| ensure_all_finite(eval.gradient.as_slice(), "gradient"))
            .and_then(|_| ensure_all_finite(eval.constraints.as_slice(), "constraints"))
            .map_err(|e| SolverError::Evaluation {
                what: format!("initial point: {e}"),
            })?;
        if eval.gradient.len() != n || eval.jacobian.ncols() != n {
            return Err(SolverError::ProblemSetup {
                what: "Evaluation dimensions do not match the variable count".to_string(),
            });
        }

        let mut hessian = DMatrix::identity(n, n);
        let mut mu = 0.0_f64;
        let mut reset_used = false;
        let mut kkt = f64::INFINITY;

        for iter in 0..cfg.max_iterations {
            let step_lower = lower - &w;
            let step_upper = upper - &w;
            let qp = BoundQp {
                hessian: &hessian,
                gradient: &eval.gradient,
                jacobian: &eval.jacobian,
                constraints: &eval.constraints,
                lower: &step_lower,
                upper: &step_upper,
            };
            let sub = match qp.solve(cfg.max_qp_iterations) {
                Ok(sub) => sub,
                Err(SolverError::ConvergenceFailed { what }) => {
                    warn!(iter, %what, "QP subproblem failed");
                    timer.stop_and_report();
                    return Err(SolverError::IterationLimit {
                        iterations: iter,
                        kkt,
                    });
                }
                Err(e) => return Err(e),
            };

            let d = &sub.d;
            let violation = eval.constraints.amax();
            kkt = eval.gradient.dot(d).abs()
                + sub
                    .lambda
                    .iter()
                    .zip(eval.constraints.iter())
                    .map(|(l, c)| (l * c).abs())
                    .sum::<f64>()
                + sub
                    .bound_multipliers
                    .iter()
                    .zip(d.iter())
                    .map(|(nu, dj)| (nu * dj).abs())
                    .sum::<f64>();
            debug!(
                iter,
                objective = eval.objective,
                kkt,
                violation,
                qp_iterations = sub.iterations,
                "SQP iteration"
            );

            if kkt < cfg.kkt_tolerance && violation < cfg.kkt_tolerance {
                info!(iterations = iter, objective = eval.objective, kkt, "SQP converged");
                timer.stop_and_report();
                return Ok(NlpSolution {
                    w,
                    objective: eval.objective,
                    multipliers: sub.lambda,
                    kkt_residual: kkt,
                    constraint_violation: violation,
                    iterations: iter,
                });
            }

            mu = mu.max(1.1 * sub.lambda.amax() + 1e-3);
            let merit0 = merit(&eval, mu);
            let slope = eval.gradient.dot(d) - mu * l1(&eval.constraints);

            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..cfg.max_line_search_iters {
                let trial = clip(&w + alpha * d);
                match problem.evaluate(&trial) {
                    Ok(trial_eval)
                        if merit(&trial_eval, mu) <= merit0 + cfg.armijo * alpha * slope =>
                    {
                        accepted = Some((trial, trial_eval));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => debug!(iter, alpha, error = %e, "trial point not evaluable"),
                }
                alpha *= cfg.line_search_beta;
            }

            let Some((trial, trial_eval)) = accepted else {
                if !reset_used && hessian != DMatrix::identity(n, n) {
                    warn!(iter, "line search failed, resetting Hessian approximation");
                    hessian = DMatrix::identity(n, n);
                    reset_used = true;
                    continue;
                }
                warn!(iter, kkt, "line search failed");
                timer.stop_and_report();
                return Err(SolverError::IterationLimit {
                    iterations: iter + 1,
                    kkt,
                });
            };

            let s = &trial - &w;
            let jt = eval.jacobian.transpose();
            let y = (&trial_eval.gradient - &eval.gradient)
                + (trial_eval.jacobian.transpose() - jt) * &sub.lambda;
            damped_bfgs(&mut hessian, &s, &y);

            w = trial;
            eval = trial_eval;
        }

        warn!(iterations = cfg.max_iterations, kkt, "SQP iteration limit reached");
        timer.stop_and_report();
        Err(SolverError::IterationLimit {
            iterations: cfg.max_iterations,
            kkt,
        })
    }
}
