use log::{debug, info};

use crate::error::{InvOptError, Result};
use crate::matrix::SparseMatrix;
use crate::network::Scenario;
use crate::solver::{QpProblem, QpSolver};
use crate::utils::*;

use super::constraints::{constraints, InverseProblem};

/// Options of the inverse solve.
#[derive(Clone,Debug,PartialEq)]
pub struct InverseOptions {
    /// Degree of the delay polynomial to estimate.
    pub degree : usize,
    /// Regularization weight. Quadratic (`smooth/2*|theta|^2`) unless `lasso`, then `smooth*|theta|_1`.
    pub smooth : f64,
    pub lasso  : bool,
    /// Compute the net objective (scaled duality gap) of the solution.
    pub fvalue : bool,
}

impl Default for InverseOptions {
    fn default() -> Self { InverseOptions{ degree : 1, smooth : 0.0, lasso : false, fvalue : false } }
}

impl InverseOptions {
    pub fn new(degree : usize) -> Self { InverseOptions{ degree, ..Default::default() } }
    pub fn with_smooth(self, smooth : f64) -> Self { InverseOptions{ smooth, ..self } }
    pub fn with_lasso(self, lasso : bool) -> Self { InverseOptions{ lasso, ..self } }
    pub fn with_fvalue(self, fvalue : bool) -> Self { InverseOptions{ fvalue, ..self } }

    pub fn validate(&self) -> Result<()> {
        if self.degree == 0 {
            Err(InvOptError::config("polynomial degree must be positive"))
        }
        else if ! self.smooth.is_finite() || self.smooth < 0.0 {
            Err(InvOptError::config(format!("regularization weight must be finite and non-negative, got {}",self.smooth)))
        }
        else {
            Ok(())
        }
    }
}

/// Result of an inverse solve.
#[derive(Clone,Debug)]
pub struct InverseEstimate {
    /// Estimated coefficients, `degree` entries.
    pub theta : Vec<f64>,
    /// Net objective, present if requested by [InverseOptions::fvalue].
    pub value : Option<f64>,
}

/// Estimates `theta` by minimizing the duality gap of the observed equilibria.
///
/// # Example
/// ```ignore
/// let mut inv = InverseSolver::new(backend, InverseOptions::new(2).with_smooth(1e-3))?;
/// let est = inv.solve(&scenarios, &flows)?;
/// ```
pub struct InverseSolver<S> {
    solver  : S,
    options : InverseOptions,
}

impl<S> InverseSolver<S> where S : QpSolver {
    pub fn new(solver : S, options : InverseOptions) -> Result<InverseSolver<S>> {
        options.validate()?;
        Ok(InverseSolver{ solver, options })
    }

    pub fn options(&self) -> &InverseOptions { &self.options }
    pub fn backend(&mut self) -> &mut S { &mut self.solver }

    /// Build the inverse problem from scenarios with fully observed equilibrium flows and solve it.
    pub fn solve(&mut self, scenarios : &[Scenario], flows : &[Vec<f64>]) -> Result<InverseEstimate> {
        let problem = constraints(scenarios, flows, self.options.degree, self.options.lasso)?;
        self.solve_problem(&problem, flows)
    }

    /// Solve a prebuilt inverse problem. `flows` are the flows the problem was built from; they are
    /// only used for the net objective.
    pub fn solve_problem(&mut self, problem : &InverseProblem, flows : &[Vec<f64>]) -> Result<InverseEstimate> {
        let opts = &self.options;
        if problem.degree != opts.degree {
            return Err(InvOptError::config(format!("problem was built for degree {}, solver expects {}",problem.degree,opts.degree)));
        }
        if problem.lasso != opts.lasso {
            return Err(InvOptError::config("problem and solver disagree on the LASSO layout"));
        }

        let mut q = problem.c.clone();
        let qp =
            if opts.lasso {
                q[problem.aux_range()].iter_mut().for_each(|v| *v = opts.smooth);
                QpProblem::linear(q, problem.a.clone(), problem.b.clone())
            }
            else if opts.smooth > 0.0 {
                let p = SparseMatrix::from_triplets([problem.num_var(),problem.num_var()],
                                                    problem.theta_range().map(|k| (k,k,opts.smooth)))?;
                QpProblem::linear(q, problem.a.clone(), problem.b.clone()).with_quadratic(p)
            }
            else {
                QpProblem::linear(q, problem.a.clone(), problem.b.clone())
            };

        debug!("inverse solve: {} variables, {} rows, smooth {}, lasso {}", qp.num_var(), qp.g.height(), opts.smooth, opts.lasso);
        let sol = self.solver.solve(&qp)?;
        if sol.x.len() != problem.num_var() {
            return Err(InvOptError::dimension(format!("backend returned {} values for {} variables",sol.x.len(),problem.num_var())));
        }
        let theta = sol.x[problem.theta_range()].to_vec();

        let value =
            if opts.fvalue {
                if flows.len() != problem.scenarios || flows.iter().any(|x| x.len() != problem.links) {
                    return Err(InvOptError::dimension("flows do not match the inverse problem"));
                }
                let bx : f64 = flows.iter().enumerate()
                    .map(|(j,x)| dot(&problem.b[problem.scenario_rows(j)], x))
                    .sum();
                let reg =
                    if opts.lasso { opts.smooth * sum_abs(&theta) }
                    else { 0.5 * opts.smooth * dot(&theta,&theta) };
                Some(sol.objective + bx - reg)
            }
            else {
                None
            };

        info!("inverse solve finished after {} iterations: theta = {:?}{}",
              sol.iterations, theta,
              value.map(|v| format!(", net objective {:.6e}",v)).unwrap_or_default());
        Ok(InverseEstimate{ theta, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverFailure;
    use crate::network::Demand;
    use crate::network::tests::two_parallel_links;
    use crate::solver::QpSolution;

    /// Backend recording the problem and returning a fixed point.
    struct Recorder {
        x    : Vec<f64>,
        seen : Option<QpProblem>,
    }

    impl QpSolver for Recorder {
        fn solve(&mut self, problem : &QpProblem) -> std::result::Result<QpSolution,SolverFailure> {
            problem.validate()?;
            let objective = problem.objective(&self.x).map_err(|e| SolverFailure::InvalidProblem(e.to_string()))?;
            self.seen = Some(problem.clone());
            Ok(QpSolution{ x : self.x.clone(), objective, iterations : 1 })
        }
    }

    struct Failing;
    impl QpSolver for Failing {
        fn solve(&mut self, _ : &QpProblem) -> std::result::Result<QpSolution,SolverFailure> { Err(SolverFailure::Unbounded) }
    }

    fn batch() -> (Vec<Scenario>, Vec<Vec<f64>>) {
        let t = two_parallel_links();
        (vec![Scenario::new(t.clone(), vec![Demand::new(0,1,4.0)]).unwrap(),
              Scenario::new(t, vec![Demand::new(0,1,6.0)]).unwrap()],
         vec![vec![10.0/3.0,2.0/3.0], vec![14.0/3.0,4.0/3.0]])
    }

    #[test]
    fn quadratic_path() {
        let (scen,flows) = batch();
        let mut rec = Recorder{ x : vec![0.5, 1.0, 1.0], seen : None };
        let est = {
            let mut inv = InverseSolver::new(&mut rec, InverseOptions::new(1).with_smooth(2.0).with_fvalue(true)).unwrap();
            inv.solve(&scen, &flows).unwrap()
        };
        assert_eq!(est.theta, vec![0.5]);
        let qp = rec.seen.unwrap();
        let p = qp.p.unwrap();
        assert_eq!(p.nnz(), 1);
        assert_eq!(p.get(0,0), 2.0);

        // net objective excludes the regularization and adds b'x
        let x = [0.5,1.0,1.0];
        let bx : f64 = qp.h.iter().zip(flows.iter().flat_map(|f| f.iter())).map(|(b,x)| b*x).sum();
        let expect = dot(&qp.q,&x) + bx;
        assert!((est.value.unwrap() - expect).abs() < 1e-12);
    }

    #[test]
    fn plain_path_is_linear() {
        let (scen,flows) = batch();
        let mut rec = Recorder{ x : vec![0.5, 1.0, 1.0], seen : None };
        let est = InverseSolver::new(&mut rec, InverseOptions::new(1)).unwrap().solve(&scen, &flows).unwrap();
        assert!(est.value.is_none());
        assert!(rec.seen.unwrap().p.is_none());
    }

    #[test]
    fn lasso_path() {
        let (scen,flows) = batch();
        let mut rec = Recorder{ x : vec![-0.5, 1.0, 1.0, 0.5], seen : None };
        let est = InverseSolver::new(&mut rec, InverseOptions::new(1).with_smooth(3.0).with_lasso(true).with_fvalue(true))
            .unwrap().solve(&scen, &flows).unwrap();
        let qp = rec.seen.unwrap();
        assert!(qp.p.is_none());
        assert_eq!(qp.q[3], 3.0);
        assert_eq!(est.theta, vec![-0.5]);
        let bx : f64 = qp.h.iter().zip(flows.iter().flat_map(|f| f.iter())).map(|(b,x)| b*x).sum();
        let expect = dot(&qp.q,&[-0.5,1.0,1.0,0.5]) + bx - 3.0*0.5;
        assert!((est.value.unwrap() - expect).abs() < 1e-12);
    }

    #[test]
    fn layout_mismatch() {
        let (scen,flows) = batch();
        let problem = constraints(&scen, &flows, 2, false).unwrap();
        let mut inv = InverseSolver::new(Failing, InverseOptions::new(1)).unwrap();
        assert!(matches!(inv.solve_problem(&problem, &flows), Err(InvOptError::Configuration(_))));
    }

    #[test]
    fn failure_propagates() {
        let (scen,flows) = batch();
        let mut inv = InverseSolver::new(Failing, InverseOptions::new(1)).unwrap();
        assert!(matches!(inv.solve(&scen, &flows), Err(InvOptError::Solver(SolverFailure::Unbounded))));
    }

    #[test]
    fn options_validate() {
        assert!(InverseOptions::new(0).validate().is_err());
        assert!(InverseOptions::new(1).with_smooth(-1.0).validate().is_err());
        assert!(InverseOptions::new(1).with_smooth(f64::NAN).validate().is_err());
        assert!(InverseOptions::new(3).with_smooth(1.0).with_lasso(true).validate().is_ok());
        assert!(InverseSolver::new(Failing, InverseOptions::new(0)).is_err());
    }
}
