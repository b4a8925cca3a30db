//! Numerical solvers for the multiple-shooting workspace.
//!
//! This crate provides dense and iterative linear solves, a damped Newton
//! method for square nonlinear systems, finite-difference Jacobians and an
//! SQP method for equality-constrained NLPs with simple variable bounds.

pub mod error;
pub mod jacobian;
pub mod linear;
pub mod newton;
pub mod nlp;
pub mod qp;
pub mod sqp;

pub use error::{SolverError, SolverResult};
pub use jacobian::{central_difference_jacobian, finite_difference_jacobian};
pub use linear::{LinearSolver, LinearSolverKind};
pub use newton::{NewtonConfig, NewtonResult, newton_solve};
pub use nlp::{NlpEvaluation, NlpProblem, NlpSolution, NlpSolver};
pub use sqp::{SqpConfig, SqpSolver};
