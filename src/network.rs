//! Traffic network model: topology, link delay functions, demand scenarios and the flow
//! conservation constraints of the equilibrium problem.
//!
//! A [Topology] is immutable once built and is shared between scenarios through an [Arc]. The
//! node-link incidence matrix is computed once when the topology is built; each [Scenario] only
//! contributes its supply vector.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use itertools::izip;

use crate::error::{InvOptError, Result};
use crate::matrix::SparseMatrix;

/// Identifier of a link in a directed multigraph. `route` numbers parallel links between the same
/// ordered pair of nodes, starting from 1.
#[derive(Clone,Copy,Debug,PartialEq,Eq,Hash,PartialOrd,Ord)]
pub struct LinkId {
    pub start : usize,
    pub end   : usize,
    pub route : usize,
}

impl LinkId {
    pub fn new(start : usize, end : usize, route : usize) -> LinkId { LinkId{ start, end, route } }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.start, self.end, self.route)
    }
}

/// Polynomial delay `D(x) = ffdelay + sum_k coef[k] * x^(k+1)`.
///
/// For a parameter vector `theta` the coefficients are `coef[k] = ffdelay*theta[k]*slope^(k+1)`, so
/// that `D(x) = ffdelay*(1 + sum_k theta[k]*(slope*x)^(k+1))`.
#[derive(Clone,Debug,PartialEq)]
pub struct PolynomialDelay {
    pub ffdelay : f64,
    pub slope   : f64,
    pub coef    : Vec<f64>,
}

impl PolynomialDelay {
    pub fn new(ffdelay : f64, slope : f64, coef : Vec<f64>) -> PolynomialDelay { PolynomialDelay{ ffdelay, slope, coef } }

    /// Same link with coefficients derived from `theta`.
    pub fn with_theta(&self, theta : &[f64]) -> PolynomialDelay {
        let coef = theta.iter().enumerate().map(|(k,&t)| self.ffdelay * t * self.slope.powi(k as i32 + 1)).collect();
        PolynomialDelay{ ffdelay : self.ffdelay, slope : self.slope, coef }
    }

    pub fn degree(&self) -> usize { self.coef.len() }
}

/// Affine delay `D(x) = ffdelay + slope*x`.
#[derive(Clone,Debug,PartialEq)]
pub struct AffineDelay {
    pub ffdelay : f64,
    pub slope   : f64,
}

/// Delay (travel time) of a link as a function of its flow.
#[derive(Clone,Debug,PartialEq)]
pub enum DelayFunction {
    Polynomial(PolynomialDelay),
    Affine(AffineDelay),
}

impl DelayFunction {
    pub fn polynomial(ffdelay : f64, slope : f64, coef : Vec<f64>) -> DelayFunction {
        DelayFunction::Polynomial(PolynomialDelay::new(ffdelay, slope, coef))
    }

    pub fn affine(ffdelay : f64, slope : f64) -> DelayFunction {
        DelayFunction::Affine(AffineDelay{ ffdelay, slope })
    }

    pub fn family(&self) -> &'static str {
        match self {
            DelayFunction::Polynomial(_) => "polynomial",
            DelayFunction::Affine(_)     => "affine",
        }
    }

    pub fn ffdelay(&self) -> f64 {
        match self {
            DelayFunction::Polynomial(p) => p.ffdelay,
            DelayFunction::Affine(a)     => a.ffdelay,
        }
    }

    pub fn slope(&self) -> f64 {
        match self {
            DelayFunction::Polynomial(p) => p.slope,
            DelayFunction::Affine(a)     => a.slope,
        }
    }

    /// Delay at flow `x`.
    pub fn delay(&self, x : f64) -> f64 {
        match self {
            DelayFunction::Polynomial(p) => p.ffdelay + p.coef.iter().rev().fold(0.0, |acc,&c| (acc + c) * x),
            DelayFunction::Affine(a)     => a.ffdelay + a.slope * x,
        }
    }

    /// Derivative of the delay at flow `x`.
    pub fn derivative(&self, x : f64) -> f64 {
        match self {
            DelayFunction::Polynomial(p) =>
                p.coef.iter().enumerate().rev().fold(0.0, |acc,(k,&c)| acc * x + (k as f64 + 1.0) * c),
            DelayFunction::Affine(a) => a.slope,
        }
    }

    /// Integral of the delay from 0 to `x`, the link's term of the Beckmann potential.
    pub fn integral(&self, x : f64) -> f64 {
        match self {
            DelayFunction::Polynomial(p) =>
                p.ffdelay * x + p.coef.iter().enumerate().map(|(k,&c)| c * x.powi(k as i32 + 2) / (k as f64 + 2.0)).sum::<f64>(),
            DelayFunction::Affine(a) => a.ffdelay * x + 0.5 * a.slope * x * x,
        }
    }

    fn validate(&self) -> std::result::Result<(),String> {
        let (ffdelay,slope) = (self.ffdelay(),self.slope());
        if ! ffdelay.is_finite() || ffdelay < 0.0 {
            Err(format!("free-flow delay must be finite and non-negative, got {}",ffdelay))
        }
        else if ! slope.is_finite() || slope <= 0.0 {
            Err(format!("slope must be finite and positive, got {}",slope))
        }
        else if let DelayFunction::Polynomial(p) = self {
            if p.coef.iter().any(|c| ! c.is_finite()) { Err("polynomial coefficients must be finite".to_string()) } else { Ok(()) }
        }
        else {
            Ok(())
        }
    }
}

#[derive(Clone,Debug)]
pub struct Link {
    pub id    : LinkId,
    pub delay : DelayFunction,
}

/// Immutable directed multigraph with per-link delay functions.
#[derive(Debug)]
pub struct Topology {
    num_nodes : usize,
    links     : Vec<Link>,
    index     : HashMap<LinkId,usize>,
    /// Nodes that have a row in the incidence matrix, in row order.
    rows      : Vec<usize>,
    /// Highest-index node of the weakly connected component of each node.
    component : Vec<usize>,
    incidence : SparseMatrix,
}

/// Builder for [Topology].
pub struct TopologyBuilder {
    num_nodes : usize,
    links     : Vec<(usize,usize,DelayFunction)>,
}

impl TopologyBuilder {
    /// Add a link from `start` to `end`. Parallel links get consecutive route numbers.
    pub fn link(mut self, start : usize, end : usize, delay : DelayFunction) -> TopologyBuilder {
        self.links.push((start,end,delay));
        self
    }

    pub fn build(self) -> Result<Topology> {
        let mut links = Vec::with_capacity(self.links.len());
        let mut index = HashMap::new();
        let mut routes : HashMap<(usize,usize),usize> = HashMap::new();
        for (start,end,delay) in self.links {
            if start >= self.num_nodes || end >= self.num_nodes {
                return Err(InvOptError::Network(format!("link {}->{} references a node outside 0..{}",start,end,self.num_nodes)));
            }
            if start == end {
                return Err(InvOptError::Network(format!("self loop at node {}",start)));
            }
            let route = routes.entry((start,end)).or_insert(0);
            *route += 1;
            let id = LinkId::new(start,end,*route);
            delay.validate().map_err(|msg| InvOptError::Network(format!("link {}: {}",id,msg)))?;
            index.insert(id, links.len());
            links.push(Link{ id, delay });
        }

        let (rows,component) = constrained_nodes(self.num_nodes, &links);
        let mut row_of = vec![usize::MAX; self.num_nodes];
        rows.iter().enumerate().for_each(|(r,&v)| row_of[v] = r);

        let incidence = SparseMatrix::from_triplets(
            [rows.len(),links.len()],
            links.iter().enumerate()
                .flat_map(|(l,link)| [(link.id.start,l,1.0),(link.id.end,l,-1.0)])
                .filter(|&(v,_,_)| row_of[v] < usize::MAX)
                .map(|(v,l,c)| (row_of[v],l,c)))?;

        Ok(Topology{ num_nodes : self.num_nodes, links, index, rows, component, incidence })
    }
}

/// Nodes whose flow conservation rows are kept: all nodes except the highest-index node of each
/// weakly connected component, which makes the incidence matrix full row rank. Also returns the
/// component root of every node.
fn constrained_nodes(num_nodes : usize, links : &[Link]) -> (Vec<usize>,Vec<usize>) {
    let mut parent : Vec<usize> = (0..num_nodes).collect();
    fn find(parent : &mut [usize], mut v : usize) -> usize {
        while parent[v] != v {
            parent[v] = parent[parent[v]];
            v = parent[v];
        }
        v
    }
    for link in links {
        let (a,b) = (find(&mut parent, link.id.start), find(&mut parent, link.id.end));
        if a != b {
            // keep the larger index as root
            if a < b { parent[a] = b } else { parent[b] = a }
        }
    }
    let component : Vec<usize> = (0..num_nodes).map(|v| find(&mut parent, v)).collect();
    let rows = (0..num_nodes).filter(|&v| component[v] != v).collect();
    (rows,component)
}

impl Topology {
    pub fn builder(num_nodes : usize) -> TopologyBuilder { TopologyBuilder{ num_nodes, links : Vec::new() } }

    pub fn num_nodes(&self) -> usize { self.num_nodes }
    pub fn num_links(&self) -> usize { self.links.len() }
    pub fn links(&self) -> &[Link] { self.links.as_slice() }
    pub fn link_ids(&self) -> Vec<LinkId> { self.links.iter().map(|l| l.id).collect() }

    pub fn link_index(&self, id : &LinkId) -> Option<usize> { self.index.get(id).copied() }

    /// Link indexes of the given ids, failing on the first unknown id.
    pub fn link_indexes(&self, ids : &[LinkId]) -> Result<Vec<usize>> {
        ids.iter().map(|id| self.link_index(id).ok_or(InvOptError::UnknownLink(*id))).collect()
    }

    /// Reduced node-link incidence matrix (`constrained_nodes().len()` x `num_links()`). Entry
    /// `(v,l)` is `1` if link `l` leaves node `v` and `-1` if it enters it.
    pub fn incidence(&self) -> &SparseMatrix { &self.incidence }

    /// Nodes corresponding to the rows of [Topology::incidence].
    pub fn constrained_nodes(&self) -> &[usize] { self.rows.as_slice() }

    /// True if `a` and `b` lie in the same weakly connected component.
    pub fn connected(&self, a : usize, b : usize) -> bool {
        a < self.num_nodes && b < self.num_nodes && self.component[a] == self.component[b]
    }

    pub fn delays(&self) -> Vec<DelayFunction> { self.links.iter().map(|l| l.delay.clone()).collect() }

    pub fn ffdelays(&self) -> Vec<f64> { self.links.iter().map(|l| l.delay.ffdelay()).collect() }

    pub fn slopes(&self) -> Vec<f64> { self.links.iter().map(|l| l.delay.slope()).collect() }

    /// Fail with [InvOptError::UnsupportedModel] unless every link has a polynomial delay.
    pub fn require_polynomial(&self) -> Result<()> {
        match self.links.iter().find(|l| ! matches!(l.delay, DelayFunction::Polynomial(_))) {
            Some(l) => Err(InvOptError::UnsupportedModel{ link : l.id, family : l.delay.family() }),
            None => Ok(())
        }
    }

    /// Delay functions of all links with coefficients derived from `theta`.
    pub fn delays_with_theta(&self, theta : &[f64]) -> Result<Vec<DelayFunction>> {
        self.links.iter()
            .map(|l| match &l.delay {
                DelayFunction::Polynomial(p) => Ok(DelayFunction::Polynomial(p.with_theta(theta))),
                d => Err(InvOptError::UnsupportedModel{ link : l.id, family : d.family() })
            })
            .collect()
    }

    /// Two topologies describe the same physical network if they have the same links, in the same
    /// order, with the same free-flow delays, slopes and delay family.
    pub fn same_network(&self, other : &Topology) -> bool {
        self.num_nodes == other.num_nodes
            && self.links.len() == other.links.len()
            && izip!(self.links.iter(),other.links.iter()).all(|(a,b)|
                a.id == b.id
                && a.delay.family() == b.delay.family()
                && a.delay.ffdelay() == b.delay.ffdelay()
                && a.delay.slope() == b.delay.slope())
    }
}

/// Origin-destination demand.
#[derive(Clone,Copy,Debug,PartialEq)]
pub struct Demand {
    pub origin      : usize,
    pub destination : usize,
    pub flow        : f64,
}

impl Demand {
    pub fn new(origin : usize, destination : usize, flow : f64) -> Demand { Demand{ origin, destination, flow } }
}

/// Observations attached to the flow constraints of a scenario.
#[derive(Clone,Debug,PartialEq)]
pub struct Observations {
    /// Link indexes of the observed links.
    pub links : Vec<usize>,
    /// Observed flows, aligned with `links`.
    pub flows : Vec<f64>,
    /// Weight of the quadratic penalty pulling the observed links toward their observed flows. With
    /// `None` the observed flows are imposed as equalities.
    pub soft  : Option<f64>,
}

/// Flow conservation system `C x = b`, `x >= 0` of one scenario, optionally with observed flows.
#[derive(Clone,Debug)]
pub struct FlowConstraints {
    pub incidence    : Arc<SparseMatrix>,
    pub supply       : Vec<f64>,
    pub observations : Option<Observations>,
}

impl FlowConstraints {
    pub fn num_links(&self) -> usize { self.incidence.width() }
    pub fn num_rows(&self) -> usize { self.incidence.height() }
}

/// One demand scenario on a shared topology.
#[derive(Clone,Debug)]
pub struct Scenario {
    topology : Arc<Topology>,
    demands  : Vec<Demand>,
}

impl Scenario {
    pub fn new(topology : Arc<Topology>, demands : Vec<Demand>) -> Result<Scenario> {
        for d in demands.iter() {
            if d.origin >= topology.num_nodes() || d.destination >= topology.num_nodes() {
                return Err(InvOptError::Network(format!("demand {}->{} references a node outside 0..{}",d.origin,d.destination,topology.num_nodes())));
            }
            if d.origin == d.destination {
                return Err(InvOptError::Network(format!("demand with identical origin and destination {}",d.origin)));
            }
            if ! topology.connected(d.origin, d.destination) {
                return Err(InvOptError::Network(format!("demand {}->{} joins nodes in different components",d.origin,d.destination)));
            }
            if ! d.flow.is_finite() || d.flow < 0.0 {
                return Err(InvOptError::Network(format!("demand {}->{} must be finite and non-negative, got {}",d.origin,d.destination,d.flow)));
            }
        }
        Ok(Scenario{ topology, demands })
    }

    pub fn topology(&self) -> &Arc<Topology> { &self.topology }
    pub fn demands(&self) -> &[Demand] { self.demands.as_slice() }

    /// Net supply of each constrained node: demand leaving it minus demand arriving at it.
    pub fn supply(&self) -> Vec<f64> {
        let mut node = vec![0.0; self.topology.num_nodes()];
        for d in self.demands.iter() {
            node[d.origin] += d.flow;
            node[d.destination] -= d.flow;
        }
        self.topology.constrained_nodes().iter().map(|&v| node[v]).collect()
    }

    /// Equality system of the equilibrium problem for this scenario.
    pub fn flow_constraints(&self) -> FlowConstraints {
        FlowConstraints{
            incidence    : Arc::new(self.topology.incidence().clone()),
            supply       : self.supply(),
            observations : None
        }
    }

    /// Equality system with observed flows on `links` attached. `incidence` is shared between
    /// scenarios built on the same topology.
    pub fn flow_constraints_with_observations(&self,
                                              incidence : &Arc<SparseMatrix>,
                                              links : &[LinkId],
                                              flows : &[f64],
                                              soft : Option<f64>) -> Result<FlowConstraints> {
        if incidence.shape() != self.topology.incidence().shape() {
            return Err(InvOptError::dimension(format!("incidence of shape {:?} does not match topology {:?}",incidence.shape(),self.topology.incidence().shape())));
        }
        if links.len() != flows.len() {
            return Err(InvOptError::dimension(format!("{} observed links but {} observed flows",links.len(),flows.len())));
        }
        if flows.iter().any(|v| ! v.is_finite() || *v < 0.0) {
            return Err(InvOptError::config(format!("observed flows must be finite and non-negative, got {:?}",flows)));
        }
        if let Some(w) = soft {
            if ! w.is_finite() || w < 0.0 {
                return Err(InvOptError::config(format!("soft constraint weight must be finite and non-negative, got {}",w)));
            }
        }
        let links = self.topology.link_indexes(links)?;
        Ok(FlowConstraints{
            incidence    : incidence.clone(),
            supply       : self.supply(),
            observations : Some(Observations{ links, flows : flows.to_vec(), soft })
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two nodes, two parallel links with different free-flow delays.
    pub fn two_parallel_links() -> Arc<Topology> {
        Arc::new(Topology::builder(2)
                 .link(0,1,DelayFunction::polynomial(1.0,1.0,vec![]))
                 .link(0,1,DelayFunction::polynomial(2.0,1.0,vec![]))
                 .build().unwrap())
    }

    /// Three nodes, two pairs of parallel links in series.
    pub fn four_links() -> Arc<Topology> {
        let d = || DelayFunction::polynomial(1.0,1.0,vec![]);
        Arc::new(Topology::builder(3)
                 .link(0,1,d()).link(0,1,d())
                 .link(1,2,d()).link(1,2,d())
                 .build().unwrap())
    }

    #[test]
    fn parallel_links_get_routes() {
        let t = four_links();
        assert_eq!(t.link_ids(), vec![LinkId::new(0,1,1),LinkId::new(0,1,2),LinkId::new(1,2,1),LinkId::new(1,2,2)]);
        assert_eq!(t.link_index(&LinkId::new(1,2,2)), Some(3));
        assert_eq!(t.link_index(&LinkId::new(1,2,3)), None);
        assert!(matches!(t.link_indexes(&[LinkId::new(2,1,1)]), Err(InvOptError::UnknownLink(_))));
    }

    #[test]
    fn incidence_drops_one_row_per_component() {
        let t = four_links();
        assert_eq!(t.constrained_nodes(), &[0,1]);
        assert_eq!(t.incidence().to_dense(), vec![1.0, 1.0, 0.0, 0.0,
                                                  -1.0,-1.0, 1.0, 1.0]);

        // two components, and an isolated node
        let d = || DelayFunction::affine(1.0,1.0);
        let t = Topology::builder(5).link(0,1,d()).link(3,2,d()).build().unwrap();
        assert_eq!(t.constrained_nodes(), &[0,2]);
        assert_eq!(t.incidence().shape(), [2,2]);
        assert!(t.connected(0,1) && t.connected(2,3));
        assert!(! t.connected(1,3) && ! t.connected(4,0));
    }

    #[test]
    fn demand_across_components_is_rejected() {
        let d = || DelayFunction::polynomial(1.0,1.0,vec![]);
        let t = Arc::new(Topology::builder(4).link(0,1,d()).link(2,3,d()).build().unwrap());
        assert!(matches!(Scenario::new(t.clone(), vec![Demand::new(1,3,5.0)]), Err(InvOptError::Network(_))));
        assert!(matches!(Scenario::new(t.clone(), vec![Demand::new(0,1,5.0),Demand::new(0,2,1.0)]), Err(InvOptError::Network(_))));
        let s = Scenario::new(t, vec![Demand::new(0,1,5.0),Demand::new(2,3,1.0)]).unwrap();
        assert_eq!(s.supply(), vec![5.0,1.0]);
    }

    #[test]
    fn builder_rejects_bad_links() {
        assert!(Topology::builder(2).link(0,2,DelayFunction::affine(1.0,1.0)).build().is_err());
        assert!(Topology::builder(2).link(1,1,DelayFunction::affine(1.0,1.0)).build().is_err());
        assert!(Topology::builder(2).link(0,1,DelayFunction::affine(-1.0,1.0)).build().is_err());
        assert!(Topology::builder(2).link(0,1,DelayFunction::polynomial(1.0,0.0,vec![])).build().is_err());
    }

    #[test]
    fn supply_follows_constrained_nodes() {
        let t = four_links();
        let s = Scenario::new(t.clone(), vec![Demand::new(0,2,3.0),Demand::new(1,2,1.0)]).unwrap();
        assert_eq!(s.supply(), vec![3.0,1.0]);
        // flows satisfying conservation
        let x = [2.0,1.0,3.0,1.0];
        assert_eq!(t.incidence().mul_vec(&x).unwrap(), s.supply());
        assert!(Scenario::new(t.clone(), vec![Demand::new(0,0,1.0)]).is_err());
        assert!(Scenario::new(t, vec![Demand::new(0,1,-1.0)]).is_err());
    }

    #[test]
    fn polynomial_delay_with_theta() {
        let p = PolynomialDelay::new(2.0, 0.5, vec![]).with_theta(&[1.0, 4.0]);
        assert_eq!(p.coef, vec![1.0, 2.0]);
        let d = DelayFunction::Polynomial(p);
        // D(x) = 2 + x + 2x^2
        assert_eq!(d.delay(2.0), 2.0 + 2.0 + 8.0);
        assert_eq!(d.derivative(2.0), 1.0 + 8.0);
        assert!((d.integral(3.0) - (6.0 + 4.5 + 18.0)).abs() < 1e-12);
        let a = DelayFunction::affine(1.0, 2.0);
        assert_eq!(a.delay(3.0), 7.0);
        assert_eq!(a.integral(2.0), 6.0);
    }

    #[test]
    fn delays_with_theta_rejects_affine() {
        let t = Topology::builder(2)
            .link(0,1,DelayFunction::polynomial(1.0,1.0,vec![]))
            .link(0,1,DelayFunction::affine(1.0,1.0))
            .build().unwrap();
        match t.delays_with_theta(&[1.0]) {
            Err(InvOptError::UnsupportedModel{ link, family }) => { assert_eq!(link, LinkId::new(0,1,2)); assert_eq!(family, "affine") },
            other => panic!("unexpected {:?}", other)
        }
        assert!(t.require_polynomial().is_err());
    }

    #[test]
    fn observations_are_validated() {
        let t = two_parallel_links();
        let s = Scenario::new(t.clone(), vec![Demand::new(0,1,4.0)]).unwrap();
        let inc = Arc::new(t.incidence().clone());
        let fc = s.flow_constraints_with_observations(&inc, &[LinkId::new(0,1,2)], &[1.0], Some(2.0)).unwrap();
        assert_eq!(fc.observations.as_ref().map(|o| o.links.clone()), Some(vec![1]));
        assert!(s.flow_constraints_with_observations(&inc, &[LinkId::new(0,1,2)], &[1.0,2.0], None).is_err());
        assert!(s.flow_constraints_with_observations(&inc, &[LinkId::new(0,1,2)], &[1.0], Some(-1.0)).is_err());
        assert!(s.flow_constraints_with_observations(&inc, &[LinkId::new(1,0,1)], &[1.0], None).is_err());
        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            assert!(matches!(s.flow_constraints_with_observations(&inc, &[LinkId::new(0,1,2)], &[bad], None),
                             Err(InvOptError::Configuration(_))));
        }
    }
}
