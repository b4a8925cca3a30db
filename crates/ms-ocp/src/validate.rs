//! Re-simulation of optimal controls through an independent integrator.
//!
//! The loop owns one [`IntegratorState`] and overwrites it after every
//! interval, so the end state of one call seeds the next.

use crate::error::ValidationError;
use crate::model::OcpModel;
use crate::solve::ShootingSolution;
use ms_sim::{BdfIntegrator, DaeIntegrator, DaeState, IntegrationError, IntegratorConfig};
use nalgebra::DVector;
use tracing::{debug, info, warn};

/// Mutable record driven through the validation loop.
#[derive(Clone, Debug, PartialEq)]
pub struct IntegratorState {
    pub t0: f64,
    pub tf: f64,
    pub u: DVector<f64>,
    pub x0: DVector<f64>,
    /// Algebraic guess for the next call
    pub z0: DVector<f64>,
}

/// States reached by re-simulating a control sequence.
#[derive(Clone, Debug)]
pub struct SimulatedTrajectory {
    pub times: Vec<f64>,
    /// Differential states; entry 0 is the initial condition as given
    pub states: Vec<DVector<f64>>,
    pub algebraic: Vec<DVector<f64>>,
}

impl SimulatedTrajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Largest absolute difference between the differential states and the
    /// matching entries of `solution`.
    pub fn max_deviation(&self, solution: &ShootingSolution) -> f64 {
        self.states
            .iter()
            .zip(&solution.states)
            .flat_map(|(sim, opt)| sim.iter().zip(opt.iter()).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max)
    }
}

fn invalid(what: String) -> ValidationError {
    ValidationError {
        failed_at: 0,
        cause: IntegrationError::InvalidInput { what },
    }
}

/// Integrate `controls` interval by interval on the grid `times`.
///
/// `z0_guess` seeds the consistent initialization at `times[0]`. Stops at
/// the first integrator failure.
pub fn validate_trajectory(
    integrator: &dyn DaeIntegrator,
    times: &[f64],
    controls: &[DVector<f64>],
    x0: &[f64],
    z0_guess: &[f64],
    p: &[f64],
) -> Result<SimulatedTrajectory, ValidationError> {
    if controls.is_empty() || times.len() != controls.len() + 1 {
        return Err(invalid(format!(
            "{} node times for {} controls",
            times.len(),
            controls.len()
        )));
    }

    let mut state = IntegratorState {
        t0: times[0],
        tf: times[1],
        u: controls[0].clone(),
        x0: DVector::from_column_slice(x0),
        z0: DVector::from_column_slice(z0_guess),
    };
    let initial = integrator
        .consistent_state(
            state.t0,
            state.x0.as_slice(),
            state.z0.as_slice(),
            state.u.as_slice(),
            p,
        )
        .map_err(|cause| ValidationError { failed_at: 0, cause })?;
    state.z0 = initial.z;

    let mut states = Vec::with_capacity(times.len());
    let mut algebraic = Vec::with_capacity(times.len());
    states.push(state.x0.clone());
    algebraic.push(state.z0.clone());

    for (i, u) in controls.iter().enumerate() {
        state.t0 = times[i];
        state.tf = times[i + 1];
        state.u = u.clone();

        let start = DaeState {
            x: state.x0.clone(),
            z: state.z0.clone(),
        };
        let end = integrator
            .step(&start, state.u.as_slice(), p, state.t0, state.tf)
            .map_err(|cause| {
                warn!(interval = i, t0 = state.t0, error = %cause, "Re-simulation failed");
                ValidationError { failed_at: i, cause }
            })?;
        debug!(interval = i, t = state.tf, x = ?end.x.as_slice(), "Re-simulated interval");

        state.x0 = end.x;
        state.z0 = end.z;
        states.push(state.x0.clone());
        algebraic.push(state.z0.clone());
    }

    info!(intervals = controls.len(), "Re-simulation complete");
    Ok(SimulatedTrajectory {
        times: times.to_vec(),
        states,
        algebraic,
    })
}

/// Re-simulate `solution` from `x0` with a fresh integrator over `model`.
pub fn validate_solution(
    model: &OcpModel,
    solution: &ShootingSolution,
    x0: &[f64],
    config: &IntegratorConfig,
) -> Result<SimulatedTrajectory, ValidationError> {
    let integrator = BdfIntegrator::new(model.residual().clone(), config.clone())
        .map_err(|cause| ValidationError { failed_at: 0, cause })?;
    let nx = model.dims().nx;
    let z0_guess = match solution.states.first() {
        Some(first) if first.len() == model.dims().ns() => solution.algebraic(0, nx),
        _ => DVector::zeros(model.dims().nz),
    };
    validate_trajectory(
        &integrator,
        &solution.times,
        &solution.controls,
        x0,
        z0_guess.as_slice(),
        model.parameters(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviation_uses_largest_component() {
        let traj = SimulatedTrajectory {
            times: vec![0.0, 1.0],
            states: vec![
                DVector::from_vec(vec![1.0, 0.0]),
                DVector::from_vec(vec![0.5, 0.2]),
            ],
            algebraic: vec![DVector::zeros(1), DVector::zeros(1)],
        };
        let solution = ShootingSolution {
            times: vec![0.0, 1.0],
            states: vec![
                DVector::from_vec(vec![1.0, 0.0, -0.5]),
                DVector::from_vec(vec![0.45, 0.3, 9.0]),
            ],
            controls: vec![DVector::zeros(1)],
            objective: 0.3,
            kkt_residual: 0.0,
            iterations: 1,
        };
        // the algebraic entry of the solution is not compared
        assert!((traj.max_deviation(&solution) - 0.1).abs() < 1e-12);
    }
}
