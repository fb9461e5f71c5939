//! Inverse optimization of the delay coefficients `theta` from equilibrium flows.
//!
//! [constraints] assembles the duality gap program, [InverseSolver] hands it to a [crate::solver::QpSolver]
//! backend with the chosen regularization.
mod constraints;
mod solver;

pub use constraints::{constraints, InverseProblem};
pub use solver::{InverseEstimate, InverseOptions, InverseSolver};

pub(crate) use constraints::validate_topologies;
