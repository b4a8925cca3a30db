//! Optimal control problem over a semi-explicit DAE.

use ms_symbolic::{
    DaeDims, DaeResidual, Function, ModelError, ModelResult, ResidualOptions, SymbolicModel,
};

/// Dynamics, final-node cost and the residual built from the dynamics.
///
/// The dynamics carry the canonical groups `[t, x, z, u, p]` with outputs
/// `[f; g]`. The cost has the same groups and a single output, evaluated at
/// the last node.
#[derive(Clone, Debug)]
pub struct OcpModel {
    dynamics: Function,
    cost: Function,
    residual: DaeResidual,
    dims: DaeDims,
    parameters: Vec<f64>,
}

impl OcpModel {
    pub fn new(
        model: &mut SymbolicModel,
        dynamics: Function,
        cost: Function,
        options: ResidualOptions,
    ) -> ModelResult<Self> {
        let dims = DaeDims::of_dynamics(&dynamics)?;

        if cost.num_outputs() != 1 {
            return Err(ModelError::ArityMismatch {
                what: format!("outputs of cost '{}'", cost.name()),
                expected: 1,
                found: cost.num_outputs(),
            });
        }
        if cost.inputs().len() != dynamics.inputs().len() {
            return Err(ModelError::ArityMismatch {
                what: format!("input groups of cost '{}'", cost.name()),
                expected: dynamics.inputs().len(),
                found: cost.inputs().len(),
            });
        }
        for (group, expected) in cost.inputs().iter().zip(dynamics.inputs()) {
            if group.role() != expected.role() {
                return Err(ModelError::RoleMismatch {
                    name: format!("cost '{}'", cost.name()),
                    expected: expected.role(),
                    found: group.role(),
                });
            }
            if group.len() != expected.len() {
                return Err(ModelError::ArityMismatch {
                    what: format!("{:?} group of cost '{}'", group.role(), cost.name()),
                    expected: expected.len(),
                    found: group.len(),
                });
            }
        }
        if dynamics.diff_order() == 0 {
            return Err(ModelError::NotDifferentiable {
                function: dynamics.name().to_string(),
            });
        }
        if cost.diff_order() == 0 {
            return Err(ModelError::NotDifferentiable {
                function: cost.name().to_string(),
            });
        }

        let residual = DaeResidual::from_dynamics(model, &dynamics, options)?;
        Ok(Self {
            dynamics,
            cost,
            residual,
            dims,
            parameters: vec![0.0; dims.np],
        })
    }

    /// Fix the parameter values used by every evaluation.
    pub fn with_parameters(mut self, parameters: Vec<f64>) -> ModelResult<Self> {
        if parameters.len() != self.dims.np {
            return Err(ModelError::ArityMismatch {
                what: "parameter values".to_string(),
                expected: self.dims.np,
                found: parameters.len(),
            });
        }
        self.parameters = parameters;
        Ok(self)
    }

    pub fn dynamics(&self) -> &Function {
        &self.dynamics
    }

    pub fn cost(&self) -> &Function {
        &self.cost
    }

    pub fn residual(&self) -> &DaeResidual {
        &self.residual
    }

    pub fn dims(&self) -> DaeDims {
        self.dims
    }

    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ms_symbolic::DaeVariables;

    fn parts() -> (SymbolicModel, DaeVariables) {
        let mut model = SymbolicModel::new();
        let vars = DaeVariables::declare(&mut model, &["x"], &["z"], &["u"], &["k"]);
        (model, vars)
    }

    #[test]
    fn builds_residual_and_dims() {
        let (mut model, v) = parts();
        let (x, z, u, k) = (&v.x[0], &v.z[0], &v.u[0], &v.p[0]);
        let dynamics = model
            .dae_function("f", &v, vec![-k * x + u, z - x], 1)
            .unwrap();
        let cost = model.dae_function("cost", &v, vec![x.powi(2)], 1).unwrap();
        let ocp = OcpModel::new(&mut model, dynamics, cost, ResidualOptions::default())
            .unwrap()
            .with_parameters(vec![2.0])
            .unwrap();

        assert_eq!(ocp.dims().ns(), 2);
        assert_eq!(ocp.parameters(), &[2.0]);
        assert_eq!(ocp.residual().dims(), ocp.dims());
    }

    #[test]
    fn cost_must_be_scalar() {
        let (mut model, v) = parts();
        let x = &v.x[0];
        let dynamics = model
            .dae_function("f", &v, vec![-x, v.z[0].clone() - x], 1)
            .unwrap();
        let cost = model
            .dae_function("cost", &v, vec![x.clone(), x.powi(2)], 1)
            .unwrap();
        let err = OcpModel::new(&mut model, dynamics, cost, ResidualOptions::default())
            .unwrap_err();
        assert!(matches!(err, ModelError::ArityMismatch { expected: 1, found: 2, .. }));
    }

    #[test]
    fn dynamics_outputs_must_cover_states() {
        let (mut model, v) = parts();
        let x = &v.x[0];
        let dynamics = model.dae_function("f", &v, vec![-x], 1).unwrap();
        let cost = model.dae_function("cost", &v, vec![x.clone()], 1).unwrap();
        let err = OcpModel::new(&mut model, dynamics, cost, ResidualOptions::default())
            .unwrap_err();
        assert!(matches!(err, ModelError::ArityMismatch { expected: 2, found: 1, .. }));
    }

    #[test]
    fn parameter_count_is_checked() {
        let (mut model, v) = parts();
        let x = &v.x[0];
        let dynamics = model
            .dae_function("f", &v, vec![-x, v.z[0].clone() - x], 1)
            .unwrap();
        let cost = model.dae_function("cost", &v, vec![x.clone()], 1).unwrap();
        let ocp = OcpModel::new(&mut model, dynamics, cost, ResidualOptions::default()).unwrap();
        assert!(ocp.with_parameters(vec![]).is_err());
    }
}
