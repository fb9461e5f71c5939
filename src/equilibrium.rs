//! User equilibrium flows.
//!
//! Equilibrium link flows minimize the Beckmann potential `sum_i int_0^{x_i} D_i(s) ds` over the
//! flow polytope `{x : C x = b, x >= 0}`. Observed flows are either imposed exactly or pulled toward
//! with a quadratic penalty `soft/2 * sum_obs (x_i - o_i)^2`.
use log::{debug, warn};

use crate::error::{InvOptError, Result, SolverFailure};
use crate::matrix::SparseMatrix;
use crate::network::{DelayFunction, FlowConstraints};
use crate::solver::{QpProblem, QpSolver};
use crate::utils::*;

/// Computes equilibrium link flows for given delays and flow constraints.
pub trait EquilibriumSolver {
    /// Return the full link-flow vector (one entry per link).
    fn solve(&mut self, delays : &[DelayFunction], constraints : &FlowConstraints) -> Result<Vec<f64>>;
}

impl<E> EquilibriumSolver for &mut E where E : EquilibriumSolver {
    fn solve(&mut self, delays : &[DelayFunction], constraints : &FlowConstraints) -> Result<Vec<f64>> { (**self).solve(delays,constraints) }
}

#[derive(Clone,Debug)]
pub struct EquilibriumOptions {
    /// Maximum number of QP subproblems, at least 2. The first subproblem only yields a starting
    /// point; convergence is checked from the second on.
    pub max_iter      : usize,
    /// Stop when the step is at most `tolerance*(1+|x|_inf)` or the squared Newton decrement is at
    /// most `tolerance*(1+|f|)`.
    pub tolerance     : f64,
    /// Lower bound on the diagonal of the quadratic model.
    pub hessian_floor : f64,
    /// Sufficient decrease parameter of the backtracking line search.
    pub armijo        : f64,
}

impl Default for EquilibriumOptions {
    fn default() -> Self {
        EquilibriumOptions{
            max_iter      : 100,
            tolerance     : 1e-9,
            hessian_floor : 1e-8,
            armijo        : 1e-4,
        }
    }
}

impl EquilibriumOptions {
    pub fn with_max_iter(self, max_iter : usize) -> Self { EquilibriumOptions{ max_iter, ..self } }
    pub fn with_tolerance(self, tolerance : f64) -> Self { EquilibriumOptions{ tolerance, ..self } }

    pub fn validate(&self) -> Result<()> {
        if self.max_iter < 2 {
            Err(InvOptError::config(format!("equilibrium max_iter must be at least 2, got {}",self.max_iter)))
        }
        else if !(self.tolerance > 0.0) || !(self.hessian_floor > 0.0) {
            Err(InvOptError::config("equilibrium tolerance and hessian floor must be positive"))
        }
        else if !(self.armijo > 0.0 && self.armijo < 0.5) {
            Err(InvOptError::config(format!("armijo parameter must be in (0,0.5), got {}",self.armijo)))
        }
        else {
            Ok(())
        }
    }
}

/// Equilibrium solver minimizing the Beckmann potential by a sequence of quadratic programs solved
/// by a [QpSolver] backend, each followed by a damped step.
pub struct SequentialQp<S> {
    solver  : S,
    options : EquilibriumOptions,
}

/// The potential restricted to the links that are not fixed by hard observations.
struct Potential<'a> {
    delays : Vec<&'a DelayFunction>,
    /// `(position in free vector, target flow)`
    targets : Vec<(usize,f64)>,
    soft : f64,
}

impl<'a> Potential<'a> {
    fn value(&self, x : &[f64]) -> f64 {
        self.delays.iter().zip(x.iter()).map(|(d,&v)| d.integral(v)).sum::<f64>()
            + 0.5 * self.soft * self.targets.iter().map(|&(i,o)| (x[i]-o).powi(2)).sum::<f64>()
    }

    fn gradient(&self, x : &[f64]) -> Vec<f64> {
        let mut g : Vec<f64> = self.delays.iter().zip(x.iter()).map(|(d,&v)| d.delay(v)).collect();
        self.targets.iter().for_each(|&(i,o)| g[i] += self.soft * (x[i] - o));
        g
    }

    fn hessian(&self, x : &[f64], floor : f64) -> Vec<f64> {
        let mut h : Vec<f64> = self.delays.iter().zip(x.iter()).map(|(d,&v)| d.derivative(v)).collect();
        self.targets.iter().for_each(|&(i,_)| h[i] += self.soft);
        h.iter_mut().for_each(|v| *v = v.max(floor));
        h
    }

    /// Backtracking line search from `x` along `d` with directional derivative `slope`. Returns the
    /// accepted point and step length, or `None` once the step drops below `1e-10`.
    fn backtrack(&self, x : &[f64], d : &[f64], slope : f64, armijo : f64) -> Option<(Vec<f64>,f64)> {
        let f0 = self.value(x);
        let mut t = 1.0;
        while t >= 1e-10 {
            let next : Vec<f64> = x.iter().zip(d.iter()).map(|(&x,&d)| x + t*d).collect();
            if self.value(&next) <= f0 + armijo * t * slope {
                return Some((next,t));
            }
            t *= 0.5;
        }
        None
    }
}

impl<S> SequentialQp<S> where S : QpSolver {
    pub fn new(solver : S) -> SequentialQp<S> { SequentialQp{ solver, options : EquilibriumOptions::default() } }

    pub fn with_options(solver : S, options : EquilibriumOptions) -> Result<SequentialQp<S>> {
        options.validate()?;
        Ok(SequentialQp{ solver, options })
    }

    pub fn options(&self) -> &EquilibriumOptions { &self.options }
    pub fn backend(&mut self) -> &mut S { &mut self.solver }

    /// Minimize the potential over `{ y : C y = b, y >= 0 }`.
    fn minimize(&mut self, potential : &Potential, c : &SparseMatrix, b : &[f64]) -> Result<Vec<f64>> {
        let n = c.width();
        let nonneg = SparseMatrix::eye(n) * -1.0;
        let mut x : Option<Vec<f64>> = None;

        for it in 0..self.options.max_iter {
            let base = x.clone().unwrap_or_else(|| vec![0.0; n]);
            let g = potential.gradient(&base);
            let h = potential.hessian(&base, self.options.hessian_floor);

            // Quadratic model in absolute coordinates: g'(y-x) + 1/2 (y-x)'H(y-x)
            let q = g.iter().zip(h.iter()).zip(base.iter()).map(|((&g,&h),&x)| g - h*x).collect();
            let problem = QpProblem::linear(q, nonneg.clone(), vec![0.0; n])
                .with_quadratic(SparseMatrix::diag(&h))
                .with_equality(c.clone(), b.to_vec());
            let mut y = self.solver.solve(&problem)?.x;
            y.iter_mut().for_each(|v| if *v < 0.0 { *v = 0.0 });

            let xc = match x.take() {
                None => { x = Some(y); continue; },
                Some(xc) => xc
            };

            let d : Vec<f64> = y.iter().zip(xc.iter()).map(|(&y,&x)| y - x).collect();
            let slope = dot(&g, &d);
            let f0 = potential.value(&xc);
            // Squared Newton decrement; non-negative unless the subproblem solution is noise.
            if -slope <= self.options.tolerance * (1.0 + f0.abs()) {
                debug!("equilibrium converged after {} iterations, potential {:.6e}", it, f0);
                return Ok(xc);
            }

            let Some((next,t)) = potential.backtrack(&xc, &d, slope, self.options.armijo) else {
                warn!("equilibrium line search stalled after {} iterations, potential {:.6e}", it, f0);
                return Ok(xc);
            };
            let step = t * inf_norm(&d);
            debug!("equilibrium iteration {}: potential {:.6e}, step {:.3e}, damping {}", it, potential.value(&next), step, t);

            if step <= self.options.tolerance * (1.0 + inf_norm(&next)) {
                return Ok(next);
            }
            x = Some(next);
        }
        warn!("equilibrium iteration stopped after {} iterations", self.options.max_iter);
        Err(SolverFailure::NotConverged(self.options.max_iter).into())
    }
}

impl<S> EquilibriumSolver for SequentialQp<S> where S : QpSolver {
    fn solve(&mut self, delays : &[DelayFunction], constraints : &FlowConstraints) -> Result<Vec<f64>> {
        let n = constraints.num_links();
        if delays.len() != n || constraints.supply.len() != constraints.num_rows() {
            return Err(InvOptError::dimension(format!("{} delays and {} supplies for an incidence of shape {:?}",
                                                      delays.len(),constraints.supply.len(),constraints.incidence.shape())));
        }

        let mut fixed : Vec<Option<f64>> = vec![None; n];
        let mut targets : Vec<(usize,f64)> = Vec::new();
        let mut soft = 0.0;
        if let Some(ref obs) = constraints.observations {
            if obs.links.len() != obs.flows.len() || obs.links.iter().any(|&i| i >= n) {
                return Err(InvOptError::dimension("observations do not match the network"));
            }
            match obs.soft {
                None    => obs.links.iter().zip(obs.flows.iter()).for_each(|(&i,&o)| fixed[i] = Some(o)),
                Some(w) => { soft = w; targets.extend(obs.links.iter().copied().zip(obs.flows.iter().copied())) }
            }
        }

        let free : Vec<usize> = (0..n).filter(|&i| fixed[i].is_none()).collect();
        let fixed_flow : Vec<f64> = fixed.iter().map(|f| f.unwrap_or(0.0)).collect();

        // Move fixed links to the right-hand side, drop conservation rows without free links.
        let residual = constraints.incidence.mul_vec(&fixed_flow)?;
        let rhs : Vec<f64> = constraints.supply.iter().zip(residual.iter()).map(|(&b,&r)| b - r).collect();
        let c_free = constraints.incidence.select_columns(&free)?;
        let row_nnz = c_free.row_nnz();
        let tol = self.options.tolerance.sqrt() * (1.0 + inf_norm(&constraints.supply));
        if let Some(r) = (0..rhs.len()).find(|&r| row_nnz[r] == 0 && rhs[r].abs() > tol) {
            debug!("observed flows violate conservation at row {} by {:.3e}", r, rhs[r]);
            return Err(SolverFailure::Infeasible.into());
        }
        let rows : Vec<usize> = (0..rhs.len()).filter(|&r| row_nnz[r] > 0).collect();

        let mut flows = fixed_flow;
        if ! free.is_empty() {
            let c = c_free.select_rows(&rows)?;
            let b : Vec<f64> = rows.iter().map(|&r| rhs[r]).collect();
            let mut position = vec![usize::MAX; n];
            free.iter().enumerate().for_each(|(k,&i)| position[i] = k);
            let potential = Potential{
                delays  : free.iter().map(|&i| &delays[i]).collect(),
                targets : targets.iter().map(|&(i,o)| (position[i],o)).collect(),
                soft
            };
            let y = self.minimize(&potential, &c, &b)?;
            free.iter().zip(y.iter()).for_each(|(&i,&v)| flows[i] = v);
        }
        Ok(flows)
    }
}
