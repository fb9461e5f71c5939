//! Linear program of the inverse optimization problem.
//!
//! With link flows `x_j` observed in equilibrium for scenarios `j = 1..N` and delays
//! `D_i(x) = ffdelay_i*(1 + sum_k theta_k (slope_i x_i)^k)`, the duality gap of the equilibrium
//! problem is
//! ```text
//! sum_j [ x_j' D(x_j) - beq_j' lambda_j ]     s.t.  C_j' lambda_j <= D(x_j)
//! ```
//! which is linear in `z = [theta; lambda_1; ...; lambda_N]`. Minimizing it gives the `theta` under
//! which the observed flows are closest to an equilibrium.
use log::{debug, warn};

use crate::error::{InvOptError, Result};
use crate::matrix::{BlockBuilder, SparseMatrix};
use crate::network::{Scenario, Topology};
use crate::utils::*;

/// Data of `min c'z s.t. A z <= b`.
///
/// Variables are laid out as `[theta (degree); lambda_1 (duals); ...; lambda_N (duals)]`, followed by
/// `degree` auxiliary variables bounding `|theta|` when `lasso` is set. Rows are `links` rows per
/// scenario, followed by `2*degree` bound rows when `lasso` is set.
#[derive(Clone,Debug)]
pub struct InverseProblem {
    pub c         : Vec<f64>,
    pub a         : SparseMatrix,
    pub b         : Vec<f64>,
    pub degree    : usize,
    pub scenarios : usize,
    pub links     : usize,
    /// Number of dual variables (flow conservation rows) per scenario.
    pub duals     : usize,
    /// Factor balancing the delay block against the conservation block.
    pub scale     : f64,
    pub lasso     : bool,
}

impl InverseProblem {
    pub fn num_var(&self) -> usize { self.c.len() }

    pub fn theta_range(&self) -> std::ops::Range<usize> { 0..self.degree }

    /// Variables `lambda_j`.
    pub fn dual_range(&self, j : usize) -> std::ops::Range<usize> {
        let first = self.degree + j*self.duals;
        first..first+self.duals
    }

    /// Auxiliary variables bounding `|theta|`; empty unless `lasso`.
    pub fn aux_range(&self) -> std::ops::Range<usize> {
        let first = self.degree + self.scenarios*self.duals;
        if self.lasso { first..first+self.degree } else { first..first }
    }

    /// Rows belonging to scenario `j`.
    pub fn scenario_rows(&self, j : usize) -> std::ops::Range<usize> { j*self.links..(j+1)*self.links }

    /// Length of `b` covered by scenario rows, i.e. without the LASSO bound rows.
    pub fn num_scenario_rows(&self) -> usize { self.scenarios*self.links }
}

/// Check that a batch of scenarios with fully observed flows can be used for estimation, and return
/// the shared topology.
pub(crate) fn validate_batch<'a>(scenarios : &'a [Scenario], flows : &[Vec<f64>]) -> Result<&'a Topology> {
    if scenarios.len() != flows.len() {
        return Err(InvOptError::dimension(format!("{} scenarios but {} flow vectors",scenarios.len(),flows.len())));
    }
    let topology = match scenarios.first() {
        Some(s) => s.topology().as_ref(),
        None => return Err(InvOptError::dimension("no scenarios"))
    };
    validate_topologies(scenarios)?;

    let n = topology.num_links();
    for (j,x) in flows.iter().enumerate() {
        if x.len() != n {
            return Err(InvOptError::dimension(format!("flow vector {} has length {}, expected {}",j,x.len(),n)));
        }
        if x.iter().any(|v| ! v.is_finite()) {
            return Err(InvOptError::config(format!("flow vector {} contains non-finite values",j)));
        }
    }
    Ok(topology)
}

/// All scenarios must be polynomial and describe the same physical network.
pub(crate) fn validate_topologies(scenarios : &[Scenario]) -> Result<()> {
    let Some(first) = scenarios.first() else { return Err(InvOptError::dimension("no scenarios")) };
    let t0 = first.topology();
    for s in scenarios.iter() {
        let t = s.topology();
        t.require_polynomial()?;
        if t.num_links() != t0.num_links() || t.incidence().shape() != t0.incidence().shape() {
            return Err(InvOptError::dimension(format!("scenario topology has {} links and {} conservation rows, expected {} and {}",
                                                      t.num_links(),t.incidence().height(),t0.num_links(),t0.incidence().height())));
        }
        if ! std::sync::Arc::ptr_eq(t,t0) {
            if ! t.same_network(t0) {
                return Err(InvOptError::config("scenarios do not share free-flow delays and slopes"));
            }
            let degrees = |t : &Topology| -> Vec<usize> {
                t.delays().iter().map(|d| match d { crate::network::DelayFunction::Polynomial(p) => p.degree(), _ => 0 }).collect()
            };
            if degrees(t) != degrees(t0) {
                return Err(InvOptError::config("scenarios have mismatched polynomial degrees"));
            }
        }
    }
    Ok(())
}

/// Construct the constraints of the inverse optimization problem.
///
/// # Arguments
/// - `scenarios` Scenarios with the same topology and different demands. All delay functions must be
///   polynomial.
/// - `flows` Link flows in equilibrium, one full vector per scenario.
/// - `degree` Degree of the polynomial to estimate.
/// - `lasso` Add auxiliary variables and rows for an L1 penalty on `theta`.
pub fn constraints(scenarios : &[Scenario], flows : &[Vec<f64>], degree : usize, lasso : bool) -> Result<InverseProblem> {
    if degree == 0 {
        return Err(InvOptError::config("polynomial degree must be positive"));
    }
    let topology = validate_batch(scenarios, flows)?;

    let nscen = scenarios.len();
    let n = topology.num_links();
    let m = topology.incidence().height();
    let ffdelays = topology.ffdelays();
    let slopes = topology.slopes();

    // theta block of the objective, and -d D(x_j) / d theta per scenario
    let mut tmp1 = vec![0.0; degree];
    let mut tmp2 : Vec<Vec<(usize,usize,f64)>> = Vec::with_capacity(nscen);
    for x in flows.iter() {
        let mut block = Vec::with_capacity(n*degree);
        for (i,(&x,&s,&f)) in itertools::izip!(x.iter(),slopes.iter(),ffdelays.iter()).enumerate() {
            let u = s * x;
            let mut p = 1.0;
            for (k,t1) in tmp1.iter_mut().enumerate() {
                p *= u;
                let t = f * p;
                *t1 += x * t;
                block.push((i,k,-t));
            }
        }
        tmp2.push(block);
    }

    let supplies : Vec<Vec<f64>> = scenarios.iter().map(|s| s.supply()).collect();
    let sum4 : f64 = supplies.iter().map(|b| sum_abs(b)).sum();
    let sum1 = sum_abs(&tmp1);
    let scale = {
        let s = (sum4 * degree as f64) / (sum1 * (nscen*m) as f64);
        if s.is_finite() && s > 0.0 { s }
        else {
            warn!("cannot balance constraint blocks (|delay block| = {:.3e}, |conservation block| = {:.3e}), using scale 1", sum1, sum4);
            1.0
        }
    };
    debug!("inverse constraints: {} scenarios, {} links, {} duals per scenario, scale {:.6e}", nscen, n, m, scale);

    let mut row_blocks = vec![n; nscen];
    let mut col_blocks = vec![m; nscen+1];
    col_blocks[0] = degree;
    if lasso {
        row_blocks.extend_from_slice(&[degree,degree]);
        col_blocks.push(degree);
    }

    let mut bb = BlockBuilder::new(&row_blocks, &col_blocks);
    for (j,(s,block)) in scenarios.iter().zip(tmp2.iter()).enumerate() {
        for &(i,k,v) in block.iter() {
            bb.put(j,0,i,k,scale*v)?;
        }
        bb.put_block(j,j+1,&s.topology().incidence().transpose(),1.0)?;
    }
    if lasso {
        let eye = SparseMatrix::eye(degree);
        // theta - aux <= 0, -theta - aux <= 0
        bb.put_block(nscen,  0,      &eye, 1.0)?;
        bb.put_block(nscen,  nscen+1,&eye,-1.0)?;
        bb.put_block(nscen+1,0,      &eye,-1.0)?;
        bb.put_block(nscen+1,nscen+1,&eye,-1.0)?;
    }
    let a = bb.build()?;

    let mut c : Vec<f64> = tmp1.iter().map(|v| scale*v).collect();
    supplies.iter().for_each(|b| c.extend(b.iter().map(|v| -v)));
    let mut b : Vec<f64> = Vec::with_capacity(a.height());
    (0..nscen).for_each(|_| b.extend(ffdelays.iter().map(|f| scale*f)));
    if lasso {
        c.extend(std::iter::repeat(0.0).take(degree));
        b.extend(std::iter::repeat(0.0).take(2*degree));
    }

    Ok(InverseProblem{ c, a, b, degree, scenarios : nscen, links : n, duals : m, scale, lasso })
}
