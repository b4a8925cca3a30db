//! Implicit DAE residual built from an explicit dynamics function.
//!
//! A dynamics function maps `(t, x, z, u, p)` to `[f; g]` where `f` holds the
//! nx state derivatives and `g` the nz algebraic equations. The residual form
//! used by implicit integrators is
//!
//! ```text
//! F(t, x, xdot, z, u, p) = [f(t, x, z, u, p) - xdot; g(t, x, z, u, p)]
//! ```

use crate::error::{ModelError, ModelResult};
use crate::expr::Expr;
use crate::function::{Function, InputGroup, Jacobian};
use crate::model::{Role, SymbolicModel};
use nalgebra::DMatrix;

/// Variables of a semi-explicit DAE, in canonical group order.
#[derive(Clone, Debug)]
pub struct DaeVariables {
    pub t: Expr,
    pub x: Vec<Expr>,
    pub z: Vec<Expr>,
    pub u: Vec<Expr>,
    pub p: Vec<Expr>,
}

impl DaeVariables {
    pub const T: usize = 0;
    pub const X: usize = 1;
    pub const Z: usize = 2;
    pub const U: usize = 3;
    pub const P: usize = 4;

    /// Declare `t` plus named x, z, u and p variables on `model`.
    pub fn declare(
        model: &mut SymbolicModel,
        x: &[&str],
        z: &[&str],
        u: &[&str],
        p: &[&str],
    ) -> Self {
        Self {
            t: model.declare("t", Role::Time),
            x: model.declare_many(x, Role::Differential),
            z: model.declare_many(z, Role::Algebraic),
            u: model.declare_many(u, Role::Control),
            p: model.declare_many(p, Role::Parameter),
        }
    }

    pub fn input_groups(&self) -> ModelResult<Vec<InputGroup>> {
        Ok(vec![
            InputGroup::new(Role::Time, std::slice::from_ref(&self.t))?,
            InputGroup::new(Role::Differential, &self.x)?,
            InputGroup::new(Role::Algebraic, &self.z)?,
            InputGroup::new(Role::Control, &self.u)?,
            InputGroup::new(Role::Parameter, &self.p)?,
        ])
    }

    pub fn dims(&self) -> DaeDims {
        DaeDims {
            nx: self.x.len(),
            nz: self.z.len(),
            nu: self.u.len(),
            np: self.p.len(),
        }
    }
}

/// Sizes of the variable groups of a DAE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DaeDims {
    pub nx: usize,
    pub nz: usize,
    pub nu: usize,
    pub np: usize,
}

impl DaeDims {
    /// Length of a node state `[x; z]`.
    pub fn ns(&self) -> usize {
        self.nx + self.nz
    }

    /// Check that `dynamics` has the canonical DAE signature and return its sizes.
    pub fn of_dynamics(dynamics: &Function) -> ModelResult<Self> {
        const ROLES: [Role; 5] = [
            Role::Time,
            Role::Differential,
            Role::Algebraic,
            Role::Control,
            Role::Parameter,
        ];

        let inputs = dynamics.inputs();
        if inputs.len() != ROLES.len() {
            return Err(ModelError::ArityMismatch {
                what: format!("input groups of dynamics '{}'", dynamics.name()),
                expected: ROLES.len(),
                found: inputs.len(),
            });
        }
        for (k, (group, role)) in inputs.iter().zip(ROLES).enumerate() {
            if group.role() != role {
                return Err(ModelError::RoleMismatch {
                    name: format!("{} group {k}", dynamics.name()),
                    expected: role,
                    found: group.role(),
                });
            }
        }
        if inputs[DaeVariables::T].len() != 1 {
            return Err(ModelError::ArityMismatch {
                what: format!("time group of dynamics '{}'", dynamics.name()),
                expected: 1,
                found: inputs[DaeVariables::T].len(),
            });
        }

        let dims = Self {
            nx: inputs[DaeVariables::X].len(),
            nz: inputs[DaeVariables::Z].len(),
            nu: inputs[DaeVariables::U].len(),
            np: inputs[DaeVariables::P].len(),
        };
        if dynamics.num_outputs() != dims.ns() {
            return Err(ModelError::ArityMismatch {
                what: format!("outputs of dynamics '{}'", dynamics.name()),
                expected: dims.ns(),
                found: dynamics.num_outputs(),
            });
        }
        Ok(dims)
    }
}

/// Options for residual construction.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResidualOptions {
    /// When set to `c`, the j-th algebraic residual becomes `g_j - c * exp(z_j)`.
    pub algebraic_exp_shift: Option<f64>,
}

/// Point at which the residual is evaluated.
#[derive(Clone, Copy, Debug)]
pub struct DaePoint<'a> {
    pub t: f64,
    pub x: &'a [f64],
    pub xdot: &'a [f64],
    pub z: &'a [f64],
    pub u: &'a [f64],
    pub p: &'a [f64],
}

/// Evaluated residual Jacobians at one point.
#[derive(Clone, Debug)]
pub struct ResidualJacobians {
    pub dx: DMatrix<f64>,
    pub dxdot: DMatrix<f64>,
    pub dz: DMatrix<f64>,
    pub du: DMatrix<f64>,
}

#[derive(Clone, Debug)]
struct SymbolicJacobians {
    dx: Jacobian,
    dxdot: Jacobian,
    dz: Jacobian,
    du: Jacobian,
}

/// Implicit residual `F(t, x, xdot, z, u, p)` with precompiled Jacobians.
#[derive(Clone, Debug)]
pub struct DaeResidual {
    function: Function,
    algebraic: Option<Function>,
    dims: DaeDims,
    jacobians: SymbolicJacobians,
}

impl DaeResidual {
    pub const T: usize = 0;
    pub const X: usize = 1;
    pub const XDOT: usize = 2;
    pub const Z: usize = 3;
    pub const U: usize = 4;
    pub const P: usize = 5;

    /// Build the residual of `dynamics`, declaring the `xdot` variables on `model`.
    pub fn from_dynamics(
        model: &mut SymbolicModel,
        dynamics: &Function,
        options: ResidualOptions,
    ) -> ModelResult<Self> {
        let dims = DaeDims::of_dynamics(dynamics)?;
        let inputs = dynamics.inputs();

        let xdot: Vec<Expr> = inputs[DaeVariables::X]
            .variables()
            .map(|info| model.declare(format!("{}_dot", info.name()), Role::StateDerivative))
            .collect();
        let z: Vec<Expr> = inputs[DaeVariables::Z]
            .variables()
            .map(|info| Expr::var(info.clone()))
            .collect();

        let f = dynamics.outputs();
        let mut outputs = Vec::with_capacity(dims.ns());
        for (fi, xdot_i) in f[..dims.nx].iter().zip(&xdot) {
            outputs.push(fi - xdot_i);
        }
        for (gj, zj) in f[dims.nx..].iter().zip(&z) {
            let residual = match options.algebraic_exp_shift {
                Some(c) => gj - c * zj.exp(),
                None => gj.clone(),
            };
            outputs.push(residual);
        }

        let algebraic = if dims.nz > 0 {
            let name = format!("{}_algebraic", dynamics.name());
            let rows = outputs[dims.nx..].to_vec();
            Some(model.function(&name, inputs.to_vec(), rows, dynamics.diff_order().max(1))?)
        } else {
            None
        };

        let groups = vec![
            inputs[DaeVariables::T].clone(),
            inputs[DaeVariables::X].clone(),
            InputGroup::new(Role::StateDerivative, &xdot)?,
            inputs[DaeVariables::Z].clone(),
            inputs[DaeVariables::U].clone(),
            inputs[DaeVariables::P].clone(),
        ];
        let name = format!("{}_residual", dynamics.name());
        let function = model.function(&name, groups, outputs, dynamics.diff_order().max(1))?;
        let jacobians = SymbolicJacobians {
            dx: function.jacobian(Self::X)?,
            dxdot: function.jacobian(Self::XDOT)?,
            dz: function.jacobian(Self::Z)?,
            du: function.jacobian(Self::U)?,
        };

        Ok(Self {
            function,
            algebraic,
            dims,
            jacobians,
        })
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    /// Algebraic rows over the dynamics groups `[t, x, z, u, p]`, including
    /// the exponential shift when one was requested.
    pub fn algebraic(&self) -> Option<&Function> {
        self.algebraic.as_ref()
    }

    pub fn dims(&self) -> DaeDims {
        self.dims
    }

    pub fn eval(&self, pt: &DaePoint<'_>) -> ModelResult<Vec<f64>> {
        let t = [pt.t];
        self.function.eval(&[&t, pt.x, pt.xdot, pt.z, pt.u, pt.p])
    }

    pub fn jacobians(&self, pt: &DaePoint<'_>) -> ModelResult<ResidualJacobians> {
        let t = [pt.t];
        let args: [&[f64]; 6] = [&t, pt.x, pt.xdot, pt.z, pt.u, pt.p];
        Ok(ResidualJacobians {
            dx: self.jacobians.dx.eval(&args)?,
            dxdot: self.jacobians.dxdot.eval(&args)?,
            dz: self.jacobians.dz.eval(&args)?,
            du: self.jacobians.du.eval(&args)?,
        })
    }
}
