//! Error types shared by the estimation pipeline.
use thiserror::Error;

use crate::network::LinkId;

pub type Result<T> = std::result::Result<T, InvOptError>;

/// Failure reported by an LP/QP backend or by the equilibrium iteration.
///
/// Failures are propagated unmodified; nothing in this crate retries or relaxes a problem after a
/// solver failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverFailure {
    #[error("problem is primal infeasible")]
    Infeasible,

    #[error("problem is unbounded")]
    Unbounded,

    #[error("solver stopped with status {0}")]
    Stopped(String),

    #[error("equilibrium iteration did not converge after {0} iterations")]
    NotConverged(usize),

    #[error("invalid problem data: {0}")]
    InvalidProblem(String),
}

#[derive(Debug, Error)]
pub enum InvOptError {
    #[error("Inverse optimization only available for polynomial delay functions, link {link} is {family}")]
    UnsupportedModel { link: LinkId, family: &'static str },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid network: {0}")]
    Network(String),

    #[error("Unknown link {0}")]
    UnknownLink(LinkId),

    #[error(transparent)]
    Solver(#[from] SolverFailure),
}

impl InvOptError {
    pub(crate) fn dimension<S : Into<String>>(msg : S) -> InvOptError { InvOptError::DimensionMismatch(msg.into()) }
    pub(crate) fn config<S : Into<String>>(msg : S) -> InvOptError { InvOptError::Configuration(msg.into()) }
}
