//! This crate implements a [QpSolver] backend for `netinvopt` based on the Clarabel interior point
//! solver. It supports
//! - Linear and convex quadratic objectives
//! - Linear equality and inequality constraints
//! - Log callbacks
//!
//! # Example
//!
//! ```rust
//! use netinvopt::*;
//! use netinvopt_clarabel::ClarabelSolver;
//!
//! // min x0 + 2 x1  s.t.  x0 + x1 = 1, x >= 0
//! let problem = QpProblem::linear(vec![1.0,2.0], SparseMatrix::eye(2) * -1.0, vec![0.0,0.0])
//!     .with_equality(SparseMatrix::dense([1,2],&[1.0,1.0]).unwrap(), vec![1.0]);
//!
//! let mut solver = ClarabelSolver::new();
//! // Redirect the solve summaries to stdout
//! solver.set_log_handler(|msg| println!("{}",msg));
//! let sol = solver.solve(&problem).unwrap();
//! assert!((sol.x[0] - 1.0).abs() < 1e-6);
//! ```
use clarabel::algebra::CscMatrix;
use clarabel::solver::{DefaultSettings, DefaultSolver, IPSolver, SolverStatus, SupportedConeT};
use log::debug;

use netinvopt::{InvOptError, QpProblem, QpSolution, QpSolver, SolverFailure, SolverWithLogCallback, SparseMatrix};

/// Clarabel backend.
///
/// Problems are passed to Clarabel in the form `min 1/2 x'Px + q'x s.t. [A;G] x + s = [b;h]`, with
/// `s` in the zero cone for the equality rows and in the nonnegative cone for the inequality rows.
pub struct ClarabelSolver {
    settings : DefaultSettings<f64>,
    log_cb   : Option<Box<dyn Fn(&str)>>,
}

impl Default for ClarabelSolver {
    fn default() -> Self { ClarabelSolver::new() }
}

impl ClarabelSolver {
    /// Create a backend with Clarabel's default settings and solver output turned off.
    pub fn new() -> ClarabelSolver {
        let mut settings = DefaultSettings::<f64>::default();
        settings.verbose = false;
        ClarabelSolver{ settings, log_cb : None }
    }

    pub fn settings(&self) -> &DefaultSettings<f64> { &self.settings }

    fn log(&self, msg : &str) {
        if let Some(ref f) = self.log_cb { f(msg) }
    }
}

fn to_clarabel(m : &SparseMatrix) -> CscMatrix<f64> {
    let (colptr,rowval,nzval) = m.to_csc();
    CscMatrix::new(m.height(), m.width(), colptr, rowval, nzval)
}

/// Stack the equality rows on top of the inequality rows.
fn stack_constraints(problem : &QpProblem) -> Result<(SparseMatrix,Vec<f64>,Vec<SupportedConeT<f64>>),SolverFailure> {
    let n = problem.num_var();
    let meq = problem.a.as_ref().map(|a| a.height()).unwrap_or(0);
    let mineq = problem.g.height();

    let eq = problem.a.iter().flat_map(|a| a.triplets());
    let ineq = problem.g.triplets().map(|(i,j,v)| (i+meq,j,v));
    let a = SparseMatrix::from_triplets([meq+mineq,n], eq.chain(ineq))
        .map_err(|e| SolverFailure::InvalidProblem(e.to_string()))?;

    let mut b = Vec::with_capacity(meq+mineq);
    b.extend_from_slice(&problem.b);
    b.extend_from_slice(&problem.h);

    let mut cones = Vec::new();
    if meq > 0 { cones.push(SupportedConeT::ZeroConeT(meq)); }
    if mineq > 0 { cones.push(SupportedConeT::NonnegativeConeT(mineq)); }
    Ok((a,b,cones))
}

impl QpSolver for ClarabelSolver {
    fn solve(&mut self, problem : &QpProblem) -> Result<QpSolution,SolverFailure> {
        problem.validate()?;
        let n = problem.num_var();

        let p = match problem.p {
            Some(ref p) => p.upper_triangle(),
            None => SparseMatrix::zeros([n,n])
        };
        let (a,b,cones) = stack_constraints(problem)?;
        debug!("clarabel: {} variables, {} rows, {} nonzeros in A, {} in P", n, a.height(), a.nnz(), p.nnz());

        let mut solver = DefaultSolver::new(&to_clarabel(&p), &problem.q, &to_clarabel(&a), &b, &cones, self.settings.clone());
        solver.solve();

        let sol = &solver.solution;
        self.log(&format!("clarabel: status {:?}, {} iterations, objective {:.6e}, {:.3e}s",
                          sol.status, sol.iterations, sol.obj_val, sol.solve_time));
        match sol.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                if sol.x.iter().any(|v| ! v.is_finite()) {
                    return Err(SolverFailure::Stopped(format!("{:?} with non-finite solution",sol.status)));
                }
                Ok(QpSolution{ x : sol.x.clone(), objective : sol.obj_val, iterations : sol.iterations as usize })
            },
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => Err(SolverFailure::Infeasible),
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => Err(SolverFailure::Unbounded),
            ref status => Err(SolverFailure::Stopped(format!("{:?}",status))),
        }
    }

    /// Set a floating point setting. Supported names are `tol_gap_abs`, `tol_gap_rel`, `tol_feas` and
    /// `time_limit`.
    fn try_set_double_parameter(&mut self, parname : &str, parval : f64) -> netinvopt::Result<()> {
        if parval.is_nan() || parval <= 0.0 {
            return Err(InvOptError::Configuration(format!("Parameter '{}' must be positive, got {}",parname,parval)));
        }
        match parname {
            "tol_gap_abs" => self.settings.tol_gap_abs = parval,
            "tol_gap_rel" => self.settings.tol_gap_rel = parval,
            "tol_feas"    => self.settings.tol_feas = parval,
            "time_limit"  => self.settings.time_limit = parval,
            _ => return Err(InvOptError::Configuration(format!("Unknown double parameter '{}'",parname)))
        }
        Ok(())
    }

    /// Set an integer setting. Supported names are `max_iter` and `verbose` (0 or 1).
    fn try_set_int_parameter(&mut self, parname : &str, parval : i32) -> netinvopt::Result<()> {
        match parname {
            "max_iter" if parval > 0 => self.settings.max_iter = parval as u32,
            "verbose" if parval == 0 || parval == 1 => self.settings.verbose = parval == 1,
            "max_iter" | "verbose" => return Err(InvOptError::Configuration(format!("Invalid value {} for parameter '{}'",parval,parname))),
            _ => return Err(InvOptError::Configuration(format!("Unknown integer parameter '{}'",parname)))
        }
        Ok(())
    }
}

impl SolverWithLogCallback for ClarabelSolver {
    /// Attach a log printer callback. It is called once per solve with a summary line. Clarabel's own
    /// iteration log goes to stdout when the `verbose` parameter is set.
    fn set_log_handler<F>(& mut self, func : F) where F : 'static+Fn(&str) {
        self.log_cb = Some(Box::new(func));
    }
}
