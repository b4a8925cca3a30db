//! Direct multiple-shooting optimal control over semi-explicit DAEs.
//!
//! The pipeline is:
//! 1. build an [`OcpModel`] from symbolic dynamics and a final-node cost,
//! 2. [`transcribe`] it into a [`ShootingNlp`] on an equal time grid,
//! 3. [`solve`] the NLP into a [`ShootingSolution`],
//! 4. re-simulate the optimal controls with [`validate_solution`] and compare
//!    the [`SimulatedTrajectory`] with the optimizer's states.

pub mod config;
pub mod error;
pub mod model;
pub mod solve;
pub mod transcribe;
pub mod validate;

pub use config::{Bounds, OcpConfig};
pub use error::{SolveError, SolveResult, ValidationError};
pub use model::OcpModel;
pub use solve::{ShootingSolution, solve};
pub use transcribe::{ShootingLayout, ShootingNlp, transcribe};
pub use validate::{IntegratorState, SimulatedTrajectory, validate_solution, validate_trajectory};
