//! Interface to the LP/QP solver backends.
//!
//! The estimation code only ever builds problems of the form
//! ```text
//! min  1/2 x'Px + q'x
//! s.t. G x <= h
//!      A x  = b
//! ```
//! and hands them to a [QpSolver]. Backends live in their own crates (see `netinvopt-clarabel`).
use crate::error::{InvOptError, Result, SolverFailure};
use crate::matrix::SparseMatrix;

/// Linear or quadratic program. `p` must be symmetric; `None` means a linear program.
#[derive(Clone,Debug)]
pub struct QpProblem {
    pub p : Option<SparseMatrix>,
    pub q : Vec<f64>,
    pub g : SparseMatrix,
    pub h : Vec<f64>,
    pub a : Option<SparseMatrix>,
    pub b : Vec<f64>,
}

impl QpProblem {
    /// Linear program `min q'x s.t. G x <= h`.
    pub fn linear(q : Vec<f64>, g : SparseMatrix, h : Vec<f64>) -> QpProblem {
        QpProblem{ p : None, q, g, h, a : None, b : Vec::new() }
    }

    pub fn with_quadratic(self, p : SparseMatrix) -> QpProblem { QpProblem{ p : Some(p), ..self } }

    pub fn with_equality(self, a : SparseMatrix, b : Vec<f64>) -> QpProblem { QpProblem{ a : Some(a), b, ..self } }

    pub fn num_var(&self) -> usize { self.q.len() }

    /// Check that all parts have consistent dimensions.
    pub fn validate(&self) -> std::result::Result<(),SolverFailure> {
        let n = self.q.len();
        if let Some(ref p) = self.p {
            if p.shape() != [n,n] {
                return Err(SolverFailure::InvalidProblem(format!("P has shape {:?}, expected {:?}",p.shape(),[n,n])));
            }
        }
        if self.g.width() != n || self.g.height() != self.h.len() {
            return Err(SolverFailure::InvalidProblem(format!("G has shape {:?}, expected [{},{}]",self.g.shape(),self.h.len(),n)));
        }
        match self.a {
            Some(ref a) if a.width() != n || a.height() != self.b.len() =>
                Err(SolverFailure::InvalidProblem(format!("A has shape {:?}, expected [{},{}]",a.shape(),self.b.len(),n))),
            None if ! self.b.is_empty() =>
                Err(SolverFailure::InvalidProblem("right-hand side b given without A".to_string())),
            _ => Ok(())
        }
    }

    /// Objective value `1/2 x'Px + q'x` at `x`.
    pub fn objective(&self, x : &[f64]) -> Result<f64> {
        let lin = crate::utils::dot(&self.q, x);
        match self.p {
            Some(ref p) => Ok(lin + 0.5 * crate::utils::dot(x, &p.mul_vec(x)?)),
            None => Ok(lin)
        }
    }
}

/// Optimal point of a [QpProblem].
#[derive(Clone,Debug)]
pub struct QpSolution {
    pub x          : Vec<f64>,
    /// Objective value `1/2 x'Px + q'x` at `x`.
    pub objective  : f64,
    pub iterations : usize,
}

/// A solver backend for [QpProblem]s.
///
/// Backends are explicit values owned by the caller; nothing is remembered between calls except the
/// parameters set on the backend.
pub trait QpSolver {
    /// Solve the problem. Infeasible or unbounded problems and solver breakdowns are reported as
    /// [SolverFailure].
    fn solve(&mut self, problem : &QpProblem) -> std::result::Result<QpSolution,SolverFailure>;

    fn try_set_double_parameter(&mut self, parname : &str, parval : f64) -> Result<()> {
        let _ = parval;
        Err(InvOptError::Configuration(format!("Unknown double parameter '{}'",parname)))
    }
    fn try_set_int_parameter(&mut self, parname : &str, parval : i32) -> Result<()> {
        let _ = parval;
        Err(InvOptError::Configuration(format!("Unknown integer parameter '{}'",parname)))
    }
}

/// A backend must implement this to support log callbacks.
pub trait SolverWithLogCallback {
    /// Attach a log printer callback. It receives one line per solve summarizing the result.
    fn set_log_handler<F>(& mut self, func : F) where F : 'static+Fn(&str);
}

impl<S> QpSolver for &mut S where S : QpSolver {
    fn solve(&mut self, problem : &QpProblem) -> std::result::Result<QpSolution,SolverFailure> { (**self).solve(problem) }
    fn try_set_double_parameter(&mut self, parname : &str, parval : f64) -> Result<()> { (**self).try_set_double_parameter(parname,parval) }
    fn try_set_int_parameter(&mut self, parname : &str, parval : i32) -> Result<()> { (**self).try_set_int_parameter(parname,parval) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_dimensions() {
        let lp = QpProblem::linear(vec![1.0,1.0], SparseMatrix::eye(2), vec![0.0,0.0]);
        assert!(lp.validate().is_ok());
        assert!(lp.clone().with_quadratic(SparseMatrix::eye(3)).validate().is_err());
        assert!(lp.clone().with_equality(SparseMatrix::eye(2), vec![1.0]).validate().is_err());
        assert!(lp.clone().with_equality(SparseMatrix::dense([1,2],&[1.0,1.0]).unwrap(), vec![1.0]).validate().is_ok());
        let bad = QpProblem::linear(vec![1.0], SparseMatrix::eye(2), vec![0.0,0.0]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn objective_value() {
        let qp = QpProblem::linear(vec![1.0,2.0], SparseMatrix::zeros([0,2]), vec![]).with_quadratic(SparseMatrix::diag(&[2.0,4.0]));
        // 1/2*(2*1 + 4*4) + 1 + 4
        assert_eq!(qp.objective(&[1.0,2.0]).unwrap(), 9.0 + 5.0);
    }
}
