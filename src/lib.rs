//! Inverse optimization of polynomial link delay functions.
//!
//! Given link flows of a traffic network observed in user equilibrium under several demand
//! scenarios, this crate estimates the coefficients `theta` of delay functions
//! ```text
//! D_i(x) = ffdelay_i * (1 + sum_{k=1..degree} theta_k (slope_i x)^k)
//! ```
//! under which the observations are (as close as possible to) equilibria.
//!
//! - [inverse::constraints] builds the duality gap program for fully observed flows, and
//!   [inverse::InverseSolver] solves it with an optional quadratic or L1 penalty on `theta`.
//! - [estimator::AlternatingEstimator] handles partially observed flows by alternating between
//!   equilibrium computations ([equilibrium::EquilibriumSolver]) and inverse solves.
//!
//! The LP/QP solves are delegated to a [solver::QpSolver] backend, which is an explicit value owned by
//! the caller. The `netinvopt-clarabel` crate provides one based on Clarabel.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use netinvopt::*;
//! use netinvopt_clarabel::ClarabelSolver;
//!
//! let topology = Arc::new(Topology::builder(2)
//!     .link(0,1,DelayFunction::polynomial(1.0,1.0,vec![]))
//!     .link(0,1,DelayFunction::polynomial(2.0,1.0,vec![]))
//!     .build()?);
//! let scenarios = vec![Scenario::new(topology.clone(), vec![Demand::new(0,1,4.0)])?,
//!                      Scenario::new(topology,         vec![Demand::new(0,1,6.0)])?];
//! let flows = vec![vec![10.0/3.0,2.0/3.0], vec![14.0/3.0,4.0/3.0]];
//!
//! let mut inv = InverseSolver::new(ClarabelSolver::new(), InverseOptions::new(1))?;
//! let est = inv.solve(&scenarios, &flows)?;
//! // est.theta ~ [0.5]
//! ```
extern crate itertools;

mod utils;

pub mod error;
pub mod matrix;
pub mod network;
pub mod solver;
pub mod equilibrium;
pub mod inverse;
pub mod estimator;

pub use error::{InvOptError, Result, SolverFailure};
pub use matrix::SparseMatrix;
pub use network::{DelayFunction, Demand, FlowConstraints, LinkId, Scenario, Topology};
pub use solver::{QpProblem, QpSolution, QpSolver, SolverWithLogCallback};
pub use equilibrium::{EquilibriumOptions, EquilibriumSolver, SequentialQp};
pub use inverse::{constraints, InverseEstimate, InverseOptions, InverseProblem, InverseSolver};
pub use estimator::{AlternatingEstimator, Estimate, EstimatorOptions, Traces};
