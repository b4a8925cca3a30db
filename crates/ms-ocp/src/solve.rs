//! NLP solve driver for the shooting transcription.

use crate::config::{Bounds, OcpConfig};
use crate::error::{SolveError, SolveResult};
use crate::transcribe::ShootingNlp;
use ms_core::timing::Timer;
use ms_solver::{NlpProblem, NlpSolver, SqpConfig, SqpSolver};
use nalgebra::DVector;
use tracing::info;

/// Optimal trajectory on the shooting grid.
#[derive(Clone, Debug)]
pub struct ShootingSolution {
    /// Node times `t_0..=t_N`
    pub times: Vec<f64>,
    /// Node states `[x; z]`, one per node
    pub states: Vec<DVector<f64>>,
    /// Piecewise-constant controls, one per interval
    pub controls: Vec<DVector<f64>>,
    pub objective: f64,
    pub kkt_residual: f64,
    pub iterations: usize,
}

impl ShootingSolution {
    /// Number of shooting nodes, one more than the interval count.
    pub fn num_nodes(&self) -> usize {
        self.states.len()
    }

    /// Differential part of the state at `node`.
    pub fn differential(&self, node: usize, nx: usize) -> DVector<f64> {
        self.states[node].rows(0, nx).into_owned()
    }

    /// Algebraic part of the state at `node`.
    pub fn algebraic(&self, node: usize, nx: usize) -> DVector<f64> {
        let state = &self.states[node];
        state.rows(nx, state.len() - nx).into_owned()
    }
}

/// Solve the shooting NLP with SQP.
///
/// `config` must describe the same grid `problem` was transcribed on; its
/// KKT tolerance and iteration limit drive the solver.
pub fn solve(
    problem: &ShootingNlp,
    bounds: &Bounds,
    config: &OcpConfig,
) -> SolveResult<ShootingSolution> {
    let timer = Timer::start("ocp_solve");
    config.validate()?;
    let layout = *problem.layout();
    if config.node_count != layout.intervals {
        return Err(SolveError::ProblemSetup {
            what: format!(
                "Config has {} intervals, problem was transcribed with {}",
                config.node_count, layout.intervals
            ),
        });
    }

    let (lower, upper) = problem.variable_bounds(bounds)?;
    let w0 = problem.initial_guess(bounds)?;
    let solver = SqpSolver::new(SqpConfig {
        max_iterations: config.max_iterations,
        kkt_tolerance: config.kkt_tolerance,
        ..SqpConfig::default()
    })?;
    info!(
        variables = problem.num_variables(),
        constraints = problem.num_constraints(),
        "Solving shooting NLP"
    );
    let nlp = solver.solve(problem, &w0, &lower, &upper)?;

    let states = (0..=layout.intervals)
        .map(|k| DVector::from_column_slice(layout.state(&nlp.w, k)))
        .collect();
    let controls = (0..layout.intervals)
        .map(|i| DVector::from_column_slice(layout.control(&nlp.w, i)))
        .collect();
    info!(
        objective = nlp.objective,
        kkt = nlp.kkt_residual,
        iterations = nlp.iterations,
        "Shooting NLP solved"
    );
    timer.stop_and_report();

    Ok(ShootingSolution {
        times: problem.times().to_vec(),
        states,
        controls,
        objective: nlp.objective,
        kkt_residual: nlp.kkt_residual,
        iterations: nlp.iterations,
    })
}
