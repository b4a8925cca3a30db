//! Symbolic modeling layer.
//!
//! Variables are declared by role on a [`SymbolicModel`], combined into
//! [`Expr`] graphs and frozen into [`Function`]s that evaluate through a
//! compiled tape. Functions with a nonzero differentiation order expose
//! symbolic [`Jacobian`]s per input group. [`DaeResidual`] turns a dynamics
//! function `f(t, x, z, u, p)` into the implicit residual form consumed by
//! implicit DAE integrators.

pub mod error;
pub mod expr;
pub mod function;
pub mod model;
pub mod residual;

mod tape;

pub use error::{ModelError, ModelResult};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use function::{Function, InputGroup, Jacobian, SymbolicEngine};
pub use model::{Role, SymbolicModel, VarInfo};
pub use residual::{
    DaeDims, DaePoint, DaeResidual, DaeVariables, ResidualJacobians, ResidualOptions,
};
pub use ms_core::VarId;
