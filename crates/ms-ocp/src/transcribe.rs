//! Direct multiple-shooting transcription of an [`OcpModel`].
//!
//! The horizon is split into N equal intervals. Decision variables are laid
//! out as
//!
//! ```text
//! w = [s_0, q_0, s_1, q_1, ..., s_{N-1}, q_{N-1}, s_N],   s_i = [x_i; z_i],   q_i = u_i
//! ```
//!
//! and the constraints are
//!
//! ```text
//! X(t_{i+1}; t_i, x_i, z_i, u_i) - x_{i+1} = 0      i = 0..N-1   (continuity)
//! g(t_k, x_k, z_k, u_{min(k, N-1)}) = 0            k = 0..N     (algebraic)
//! ```
//!
//! Continuity blocks come from the integrator's forward sensitivities. The
//! algebraic rows and the final-node objective use symbolic Jacobians.

use crate::config::{Bounds, OcpConfig};
use crate::error::SolveResult;
use crate::model::OcpModel;
use ms_sim::{BdfIntegrator, DaeIntegrator, DaeState, StepInput, StepOutput};
use ms_solver::{NlpEvaluation, NlpProblem, SolverError, SolverResult};
use ms_symbolic::{DaeDims, DaeVariables, Function, Jacobian, ModelError, ModelResult};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Index arithmetic over the shooting decision vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShootingLayout {
    pub dims: DaeDims,
    pub intervals: usize,
}

impl ShootingLayout {
    pub fn new(dims: DaeDims, intervals: usize) -> Self {
        Self { dims, intervals }
    }

    pub fn ns(&self) -> usize {
        self.dims.ns()
    }

    fn stride(&self) -> usize {
        self.dims.ns() + self.dims.nu
    }

    pub fn state_offset(&self, node: usize) -> usize {
        node * self.stride()
    }

    pub fn control_offset(&self, interval: usize) -> usize {
        interval * self.stride() + self.dims.ns()
    }

    pub fn num_variables(&self) -> usize {
        self.intervals * self.stride() + self.dims.ns()
    }

    pub fn num_constraints(&self) -> usize {
        self.intervals * self.dims.nx + (self.intervals + 1) * self.dims.nz
    }

    /// First row of the algebraic constraints of `node`.
    pub fn algebraic_row(&self, node: usize) -> usize {
        self.intervals * self.dims.nx + node * self.dims.nz
    }

    /// Interval whose control applies at `node`.
    pub fn control_interval(&self, node: usize) -> usize {
        node.min(self.intervals - 1)
    }

    pub fn differential<'w>(&self, w: &'w DVector<f64>, node: usize) -> &'w [f64] {
        let start = self.state_offset(node);
        &w.as_slice()[start..start + self.dims.nx]
    }

    pub fn algebraic<'w>(&self, w: &'w DVector<f64>, node: usize) -> &'w [f64] {
        let start = self.state_offset(node) + self.dims.nx;
        &w.as_slice()[start..start + self.dims.nz]
    }

    pub fn state<'w>(&self, w: &'w DVector<f64>, node: usize) -> &'w [f64] {
        let start = self.state_offset(node);
        &w.as_slice()[start..start + self.dims.ns()]
    }

    pub fn control<'w>(&self, w: &'w DVector<f64>, interval: usize) -> &'w [f64] {
        let start = self.control_offset(interval);
        &w.as_slice()[start..start + self.dims.nu]
    }
}

/// A node function with its Jacobians w.r.t. `x`, `z` and `u`.
#[derive(Clone, Debug)]
struct NodeFunction {
    function: Function,
    dx: Jacobian,
    dz: Jacobian,
    du: Jacobian,
}

impl NodeFunction {
    fn new(function: Function) -> ModelResult<Self> {
        Ok(Self {
            dx: function.jacobian(DaeVariables::X)?,
            dz: function.jacobian(DaeVariables::Z)?,
            du: function.jacobian(DaeVariables::U)?,
            function,
        })
    }

    fn eval(&self, inputs: &[&[f64]]) -> ModelResult<(Vec<f64>, [DMatrix<f64>; 3])> {
        Ok((
            self.function.eval(inputs)?,
            [
                self.dx.eval(inputs)?,
                self.dz.eval(inputs)?,
                self.du.eval(inputs)?,
            ],
        ))
    }
}

fn model_error(e: ModelError) -> SolverError {
    SolverError::Evaluation { what: e.to_string() }
}

/// Shooting NLP over an equal time grid.
#[derive(Clone, Debug)]
pub struct ShootingNlp {
    layout: ShootingLayout,
    times: Vec<f64>,
    integrator: BdfIntegrator,
    algebraic: Option<NodeFunction>,
    cost: NodeFunction,
    parameters: Vec<f64>,
    auto_init: bool,
}

/// Build the shooting NLP of `model` on the grid described by `config`.
pub fn transcribe(model: &OcpModel, config: &OcpConfig) -> SolveResult<ShootingNlp> {
    config.validate()?;
    let dims = model.dims();
    let integrator = BdfIntegrator::new(model.residual().clone(), config.integrator_config())?;
    let algebraic = match model.residual().algebraic() {
        Some(g) => Some(NodeFunction::new(g.clone())?),
        None => None,
    };
    let cost = NodeFunction::new(model.cost().clone())?;

    let layout = ShootingLayout::new(dims, config.node_count);
    debug!(
        intervals = layout.intervals,
        variables = layout.num_variables(),
        constraints = layout.num_constraints(),
        "Transcribed shooting problem"
    );
    Ok(ShootingNlp {
        layout,
        times: config.time_grid(),
        integrator,
        algebraic,
        cost,
        parameters: model.parameters().to_vec(),
        auto_init: config.auto_init,
    })
}

impl ShootingNlp {
    pub fn layout(&self) -> &ShootingLayout {
        &self.layout
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn integrator(&self) -> &BdfIntegrator {
        &self.integrator
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// Variable bounds of the NLP: `bounds` on node 0, free elsewhere.
    pub fn variable_bounds(&self, bounds: &Bounds) -> SolveResult<(DVector<f64>, DVector<f64>)> {
        let ns = self.layout.ns();
        bounds.validate(ns)?;
        let n = self.layout.num_variables();
        let mut lower = DVector::from_element(n, f64::NEG_INFINITY);
        let mut upper = DVector::from_element(n, f64::INFINITY);
        for j in 0..ns {
            lower[j] = bounds.lower[j];
            upper[j] = bounds.upper[j];
        }
        Ok((lower, upper))
    }

    /// Starting point for the NLP.
    ///
    /// Node 0 comes from the bounds. With `auto_init` the algebraic part of
    /// node 0 is made consistent and later nodes follow a forward simulation
    /// with zero controls; otherwise every node copies node 0. Controls start
    /// at zero.
    pub fn initial_guess(&self, bounds: &Bounds) -> SolveResult<DVector<f64>> {
        let layout = &self.layout;
        let (nx, nu) = (layout.dims.nx, layout.dims.nu);
        bounds.validate(layout.ns())?;

        let s0: Vec<f64> = (0..layout.ns()).map(|j| bounds.guess(j)).collect();
        let mut state = DaeState {
            x: DVector::from_column_slice(&s0[..nx]),
            z: DVector::from_column_slice(&s0[nx..]),
        };
        let zero_u = vec![0.0; nu];
        let p = self.parameters.as_slice();
        let mut simulate = self.auto_init;

        if simulate {
            match self.integrator.consistent_state(
                self.times[0],
                state.x.as_slice(),
                state.z.as_slice(),
                &zero_u,
                p,
            ) {
                Ok(consistent) => state.z = consistent.z,
                Err(e) => {
                    warn!(error = %e, "Initial algebraic state not consistent, using bounds guess");
                    simulate = false;
                }
            }
        }

        let mut w = DVector::zeros(layout.num_variables());
        let write = |w: &mut DVector<f64>, node: usize, state: &DaeState| {
            let start = layout.state_offset(node);
            w.rows_mut(start, nx).copy_from(&state.x);
            w.rows_mut(start + nx, layout.dims.nz).copy_from(&state.z);
        };
        write(&mut w, 0, &state);

        for node in 1..=layout.intervals {
            if simulate {
                match self.integrator.step(
                    &state,
                    &zero_u,
                    p,
                    self.times[node - 1],
                    self.times[node],
                ) {
                    Ok(next) => state = next,
                    Err(e) => {
                        warn!(
                            interval = node - 1,
                            error = %e,
                            "Forward simulation failed, copying previous node"
                        );
                        simulate = false;
                    }
                }
            }
            write(&mut w, node, &state);
        }
        Ok(w)
    }

    fn integrate_intervals(&self, w: &DVector<f64>) -> SolverResult<Vec<StepOutput>> {
        let layout = &self.layout;
        let p = self.parameters.as_slice();
        (0..layout.intervals)
            .into_par_iter()
            .map(|i| {
                self.integrator
                    .integrate(&StepInput {
                        t0: self.times[i],
                        tf: self.times[i + 1],
                        x0: layout.differential(w, i),
                        z0_guess: layout.algebraic(w, i),
                        u: layout.control(w, i),
                        p,
                        sensitivities: true,
                    })
                    .map_err(|e| SolverError::Evaluation {
                        what: format!("interval {i}: {e}"),
                    })
            })
            .collect()
    }

    fn node_inputs<'a>(&'a self, w: &'a DVector<f64>, node: usize, t: &'a [f64]) -> [&'a [f64]; 5] {
        let layout = &self.layout;
        [
            t,
            layout.differential(w, node),
            layout.algebraic(w, node),
            layout.control(w, layout.control_interval(node)),
            self.parameters.as_slice(),
        ]
    }
}

impl NlpProblem for ShootingNlp {
    fn num_variables(&self) -> usize {
        self.layout.num_variables()
    }

    fn num_constraints(&self) -> usize {
        self.layout.num_constraints()
    }

    fn evaluate(&self, w: &DVector<f64>) -> SolverResult<NlpEvaluation> {
        let layout = &self.layout;
        let DaeDims { nx, nz, nu, .. } = layout.dims;
        let n = layout.intervals;
        if w.len() != layout.num_variables() {
            return Err(SolverError::ProblemSetup {
                what: format!(
                    "Decision vector has length {}, expected {}",
                    w.len(),
                    layout.num_variables()
                ),
            });
        }

        let outputs = self.integrate_intervals(w)?;

        let mut constraints = DVector::zeros(layout.num_constraints());
        let mut jacobian = DMatrix::zeros(layout.num_constraints(), layout.num_variables());

        for (i, out) in outputs.iter().enumerate() {
            let row = i * nx;
            let x_next = layout.differential(w, i + 1);
            for r in 0..nx {
                constraints[row + r] = out.xf[r] - x_next[r];
            }
            let sens = out.sensitivity.as_ref().ok_or_else(|| SolverError::Evaluation {
                what: format!("interval {i}: sensitivities missing"),
            })?;
            // z_i only seeds consistent initialization, so its block stays zero.
            jacobian
                .view_mut((row, layout.state_offset(i)), (nx, nx))
                .copy_from(&sens.dx_dx0);
            jacobian
                .view_mut((row, layout.control_offset(i)), (nx, nu))
                .copy_from(&sens.dx_du);
            let next = layout.state_offset(i + 1);
            for r in 0..nx {
                jacobian[(row + r, next + r)] = -1.0;
            }
        }

        if let Some(g) = &self.algebraic {
            for node in 0..=n {
                let t = [self.times[node]];
                let inputs = self.node_inputs(w, node, &t);
                let (values, [gx, gz, gu]) = g.eval(&inputs).map_err(model_error)?;
                let row = layout.algebraic_row(node);
                let col = layout.state_offset(node);
                constraints.rows_mut(row, nz).copy_from_slice(&values);
                jacobian.view_mut((row, col), (nz, nx)).copy_from(&gx);
                jacobian.view_mut((row, col + nx), (nz, nz)).copy_from(&gz);
                jacobian
                    .view_mut((row, layout.control_offset(layout.control_interval(node))), (nz, nu))
                    .copy_from(&gu);
            }
        }

        let t = [self.times[n]];
        let inputs = self.node_inputs(w, n, &t);
        let (values, [cx, cz, cu]) = self.cost.eval(&inputs).map_err(model_error)?;
        let mut gradient = DVector::zeros(layout.num_variables());
        let col = layout.state_offset(n);
        gradient.rows_mut(col, nx).copy_from(&cx.transpose());
        gradient.rows_mut(col + nx, nz).copy_from(&cz.transpose());
        gradient
            .rows_mut(layout.control_offset(n - 1), nu)
            .copy_from(&cu.transpose());

        Ok(NlpEvaluation {
            objective: values[0],
            gradient,
            constraints,
            jacobian,
        })
    }
}
