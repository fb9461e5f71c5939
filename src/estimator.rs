//! Estimation of `theta` from partially observed link flows.
//!
//! Unobserved flows are filled in by alternating between a forward step, which computes the
//! equilibrium under the current `theta` pulled toward the observations, and an inverse step, which
//! re-estimates `theta` from the completed flows.
use std::sync::Arc;

use log::{debug, info};

use crate::equilibrium::EquilibriumSolver;
use crate::error::{InvOptError, Result};
use crate::inverse::{validate_topologies, InverseOptions, InverseSolver};
use crate::network::{FlowConstraints, LinkId, Scenario};
use crate::solver::QpSolver;
use crate::utils::*;

#[derive(Clone,Debug,PartialEq)]
pub struct EstimatorOptions {
    /// Options of the inverse step. The LASSO layout is not supported here, and `fvalue` is taken
    /// from [EstimatorOptions::fvalue].
    pub inverse   : InverseOptions,
    /// Weight of the penalty toward observed flows; `None` imposes them exactly.
    pub soft      : Option<f64>,
    /// Number of steps, counting forward and inverse steps separately.
    pub max_iter  : usize,
    /// Record the traces `f1` and `f2`.
    pub fvalue    : bool,
    /// Stop after an inverse step that changed `theta` by at most `tolerance*max(1,|theta|_inf)`.
    pub tolerance : Option<f64>,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        EstimatorOptions{
            inverse   : InverseOptions::default(),
            soft      : None,
            max_iter  : 2,
            fvalue    : false,
            tolerance : None,
        }
    }
}

impl EstimatorOptions {
    pub fn new(degree : usize) -> Self { EstimatorOptions{ inverse : InverseOptions::new(degree), ..Default::default() } }
    pub fn with_smooth(self, smooth : f64) -> Self { EstimatorOptions{ inverse : self.inverse.clone().with_smooth(smooth), ..self } }
    pub fn with_soft(self, soft : f64) -> Self { EstimatorOptions{ soft : Some(soft), ..self } }
    pub fn with_max_iter(self, max_iter : usize) -> Self { EstimatorOptions{ max_iter, ..self } }
    pub fn with_fvalue(self, fvalue : bool) -> Self { EstimatorOptions{ fvalue, ..self } }
    pub fn with_tolerance(self, tolerance : f64) -> Self { EstimatorOptions{ tolerance : Some(tolerance), ..self } }

    pub fn validate(&self) -> Result<()> {
        self.inverse.validate()?;
        if self.inverse.lasso {
            return Err(InvOptError::config("alternating estimation only supports the quadratic regularization"));
        }
        if let Some(w) = self.soft {
            if ! w.is_finite() || w < 0.0 {
                return Err(InvOptError::config(format!("soft constraint weight must be finite and non-negative, got {}",w)));
            }
        }
        if let Some(t) = self.tolerance {
            if ! t.is_finite() || t < 0.0 {
                return Err(InvOptError::config(format!("tolerance must be finite and non-negative, got {}",t)));
            }
        }
        Ok(())
    }
}

/// Diagnostics recorded when [EstimatorOptions::fvalue] is set.
#[derive(Clone,Debug,Default,PartialEq)]
pub struct Traces {
    /// Squared distance between estimated and observed flows, one value per forward step.
    pub f1 : Vec<f64>,
    /// Net objective of each inverse step.
    pub f2 : Vec<f64>,
}

#[derive(Clone,Debug)]
pub struct Estimate {
    pub theta      : Vec<f64>,
    pub traces     : Option<Traces>,
    /// Steps performed.
    pub iterations : usize,
    /// `true` if the run stopped on [EstimatorOptions::tolerance].
    pub converged  : bool,
}

/// Alternating forward/inverse estimator.
///
/// Both solvers are owned by the estimator; pass `&mut` references to keep using them afterwards.
pub struct AlternatingEstimator<S,E> {
    inverse     : InverseSolver<S>,
    equilibrium : E,
    options     : EstimatorOptions,
}

impl<S,E> AlternatingEstimator<S,E> where S : QpSolver, E : EquilibriumSolver {
    pub fn new(solver : S, equilibrium : E, options : EstimatorOptions) -> Result<AlternatingEstimator<S,E>> {
        options.validate()?;
        let inverse = InverseSolver::new(solver, options.inverse.clone().with_fvalue(options.fvalue))?;
        Ok(AlternatingEstimator{ inverse, equilibrium, options })
    }

    pub fn options(&self) -> &EstimatorOptions { &self.options }

    /// Estimate `theta`.
    ///
    /// # Arguments
    /// - `scenarios` Scenarios sharing one network.
    /// - `observed` Observed flows per scenario, aligned with `links`.
    /// - `links` Observed links, the same for all scenarios.
    pub fn estimate(&mut self, scenarios : &[Scenario], observed : &[Vec<f64>], links : &[LinkId]) -> Result<Estimate> {
        if scenarios.len() != observed.len() {
            return Err(InvOptError::dimension(format!("{} scenarios but {} observed flow vectors",scenarios.len(),observed.len())));
        }
        validate_topologies(scenarios)?;
        let topology = scenarios[0].topology();
        let obs = topology.link_indexes(links)?;

        let incidence = Arc::new(topology.incidence().clone());
        let systems = scenarios.iter().zip(observed.iter())
            .map(|(s,o)| s.flow_constraints_with_observations(&incidence, links, o, self.options.soft))
            .collect::<Result<Vec<FlowConstraints>>>()?;

        let degree = self.options.inverse.degree;
        let mut theta = vec![0.0; degree];
        theta[0] = 1.0;
        let mut flows : Vec<Vec<f64>> = Vec::new();
        let mut traces = if self.options.fvalue { Some(Traces::default()) } else { None };
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.options.max_iter && ! converged {
            if iterations % 2 == 0 {
                let delays = topology.delays_with_theta(&theta)?;
                flows = systems.iter()
                    .map(|sys| self.equilibrium.solve(&delays, sys))
                    .collect::<Result<Vec<Vec<f64>>>>()?;
                if let Some(ref mut t) = traces {
                    let f1 : f64 = flows.iter().zip(observed.iter())
                        .map(|(x,o)| obs.iter().zip(o.iter()).map(|(&i,&o)| (x[i]-o).powi(2)).sum::<f64>())
                        .sum();
                    debug!("step {}: forward, f1 = {:.6e}", iterations, f1);
                    t.f1.push(f1);
                }
            }
            else {
                let est = self.inverse.solve(scenarios, &flows)?;
                if let (Some(t), Some(v)) = (traces.as_mut(), est.value) {
                    t.f2.push(v);
                }
                let change = inf_dist(&est.theta, &theta);
                debug!("step {}: inverse, theta = {:?}, change {:.3e}", iterations, est.theta, change);
                if let Some(tol) = self.options.tolerance {
                    converged = change <= tol * inf_norm(&theta).max(1.0);
                }
                theta = est.theta;
            }
            iterations += 1;
        }

        info!("alternating estimation: {} steps{}, theta = {:?}", iterations, if converged { " (converged)" } else { "" }, theta);
        Ok(Estimate{ theta, traces, iterations, converged })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverFailure;
    use crate::network::{DelayFunction, Demand};
    use crate::network::tests::two_parallel_links;
    use crate::solver::{QpProblem, QpSolution};

    /// Returns a fixed point for every inverse problem.
    struct FixedQp(Vec<f64>, usize);
    impl QpSolver for FixedQp {
        fn solve(&mut self, problem : &QpProblem) -> std::result::Result<QpSolution,SolverFailure> {
            problem.validate()?;
            self.1 += 1;
            Ok(QpSolution{ x : self.0.clone(), objective : 0.0, iterations : 1 })
        }
    }

    /// Equilibrium keyed on the supply of the first node.
    struct Lookup(usize);
    impl EquilibriumSolver for Lookup {
        fn solve(&mut self, delays : &[DelayFunction], constraints : &FlowConstraints) -> Result<Vec<f64>> {
            assert_eq!(delays.len(), 2);
            self.0 += 1;
            let d = constraints.supply[0];
            Ok(vec![0.75*d, 0.25*d])
        }
    }

    struct Broken;
    impl EquilibriumSolver for Broken {
        fn solve(&mut self, _ : &[DelayFunction], _ : &FlowConstraints) -> Result<Vec<f64>> {
            Err(SolverFailure::NotConverged(7).into())
        }
    }

    fn scenarios() -> Vec<Scenario> {
        let t = two_parallel_links();
        vec![Scenario::new(t.clone(), vec![Demand::new(0,1,4.0)]).unwrap(),
             Scenario::new(t, vec![Demand::new(0,1,8.0)]).unwrap()]
    }

    fn first_link() -> Vec<LinkId> { vec![LinkId::new(0,1,1)] }

    #[test]
    fn zero_iterations_return_initial_theta() {
        let mut est = AlternatingEstimator::new(FixedQp(vec![],0), Broken, EstimatorOptions::new(3).with_max_iter(0)).unwrap();
        let r = est.estimate(&scenarios(), &[vec![3.0],vec![6.0]], &first_link()).unwrap();
        assert_eq!(r.theta, vec![1.0,0.0,0.0]);
        assert_eq!(r.iterations, 0);
        assert!(! r.converged);
    }

    #[test]
    fn alternates_and_records_traces() {
        let (mut qp, mut eq) = (FixedQp(vec![0.5,1.0,1.0],0), Lookup(0));
        let r = {
            let mut est = AlternatingEstimator::new(&mut qp, &mut eq, EstimatorOptions::new(1).with_max_iter(5).with_fvalue(true)).unwrap();
            est.estimate(&scenarios(), &[vec![2.0],vec![6.0]], &first_link()).unwrap()
        };
        assert_eq!(r.theta, vec![0.5]);
        assert_eq!(r.iterations, 5);
        assert_eq!(qp.1, 2);
        assert_eq!(eq.0, 3*2);
        let t = r.traces.unwrap();
        // (3-2)^2 + (6-6)^2
        assert_eq!(t.f1, vec![1.0; 3]);
        assert_eq!(t.f2.len(), 2);
    }

    #[test]
    fn stops_on_tolerance() {
        let mut est = AlternatingEstimator::new(FixedQp(vec![1.0,1.0,1.0],0), Lookup(0),
                                                EstimatorOptions::new(1).with_max_iter(10).with_tolerance(1e-6)).unwrap();
        let r = est.estimate(&scenarios(), &[vec![3.0],vec![6.0]], &first_link()).unwrap();
        assert!(r.converged);
        assert_eq!(r.iterations, 2);
        assert!(r.traces.is_none());
    }

    #[test]
    fn failures_propagate() {
        let mut est = AlternatingEstimator::new(FixedQp(vec![],0), Broken, EstimatorOptions::new(1)).unwrap();
        assert!(matches!(est.estimate(&scenarios(), &[vec![3.0],vec![6.0]], &first_link()),
                         Err(InvOptError::Solver(SolverFailure::NotConverged(7)))));
    }

    #[test]
    fn rejects_bad_input() {
        let mut est = AlternatingEstimator::new(FixedQp(vec![],0), Broken, EstimatorOptions::new(1).with_max_iter(0)).unwrap();
        let s = scenarios();
        assert!(matches!(est.estimate(&s, &[vec![3.0]], &first_link()), Err(InvOptError::DimensionMismatch(_))));
        assert!(matches!(est.estimate(&s, &[vec![3.0,1.0],vec![6.0]], &first_link()), Err(InvOptError::DimensionMismatch(_))));
        assert!(matches!(est.estimate(&s, &[vec![3.0],vec![6.0]], &[LinkId::new(1,0,1)]), Err(InvOptError::UnknownLink(_))));

        assert!(AlternatingEstimator::new(FixedQp(vec![],0), Broken, EstimatorOptions::new(1).with_soft(-1.0)).is_err());
        let mut lasso = EstimatorOptions::new(1);
        lasso.inverse.lasso = true;
        assert!(matches!(lasso.validate(), Err(InvOptError::Configuration(_))));
    }
}
