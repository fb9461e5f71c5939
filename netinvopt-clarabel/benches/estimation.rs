extern crate criterion;

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use netinvopt::*;
use netinvopt_clarabel::ClarabelSolver;

// Grid of n x n nodes with links right and down, two parallel links per arc.
fn grid(n : usize, rng : &mut StdRng) -> Arc<Topology> {
    let node = |i : usize, j : usize| i*n + j;
    let mut b = Topology::builder(n*n);
    for i in 0..n {
        for j in 0..n {
            let mut arcs = Vec::new();
            if j+1 < n { arcs.push(node(i,j+1)) }
            if i+1 < n { arcs.push(node(i+1,j)) }
            for e in arcs {
                for _ in 0..2 {
                    b = b.link(node(i,j), e, DelayFunction::polynomial(rng.gen_range(1.0..3.0), rng.gen_range(0.5..1.5), vec![]));
                }
            }
        }
    }
    Arc::new(b.build().unwrap())
}

fn instance(n : usize, nscen : usize) -> (Arc<Topology>, Vec<Scenario>, Vec<Vec<f64>>) {
    let mut rng = StdRng::seed_from_u64(17);
    let t = grid(n, &mut rng);
    let scen : Vec<Scenario> = (0..nscen)
        .map(|_| Scenario::new(t.clone(), vec![Demand::new(0, n*n-1, rng.gen_range(5.0..20.0)),
                                               Demand::new(1, n*n-2, rng.gen_range(5.0..20.0))]).unwrap())
        .collect();
    let delays = t.delays_with_theta(&[0.3,0.05]).unwrap();
    let mut ue = SequentialQp::new(ClarabelSolver::new());
    let flows = scen.iter().map(|s| ue.solve(&delays, &s.flow_constraints()).unwrap()).collect();
    (t, scen, flows)
}

fn bench_constraints(c : &mut Criterion, n : usize, nscen : usize) {
    let (_,scen,flows) = instance(n, nscen);
    c.bench_function(format!("constraints-{}x{}-{}",n,n,nscen).as_str(),
                     |b| b.iter(|| constraints(&scen, &flows, 4, true).unwrap()));
}

fn bench_inverse(c : &mut Criterion, n : usize, nscen : usize) {
    let (_,scen,flows) = instance(n, nscen);
    let mut inv = InverseSolver::new(ClarabelSolver::new(), InverseOptions::new(2).with_smooth(1e-3)).unwrap();
    c.bench_function(format!("inverse-{}x{}-{}",n,n,nscen).as_str(),
                     |b| b.iter(|| inv.solve(&scen, &flows).unwrap()));
}

fn bench_alternating(c : &mut Criterion, n : usize, nscen : usize) {
    let (t,scen,flows) = instance(n, nscen);
    let links : Vec<LinkId> = t.link_ids().into_iter().step_by(3).collect();
    let idx = t.link_indexes(&links).unwrap();
    let observed : Vec<Vec<f64>> = flows.iter().map(|x| idx.iter().map(|&i| x[i]).collect()).collect();
    let mut est = AlternatingEstimator::new(ClarabelSolver::new(),
                                            SequentialQp::new(ClarabelSolver::new()),
                                            EstimatorOptions::new(2).with_smooth(1e-3).with_soft(1e3).with_max_iter(4)).unwrap();
    c.bench_function(format!("alternating-{}x{}-{}",n,n,nscen).as_str(),
                     |b| b.iter(|| est.estimate(&scen, &observed, &links).unwrap()));
}

fn criterion_benchmark(c: &mut Criterion) {
    bench_constraints(c, 10, 8);
    bench_inverse(c, 5, 4);
    bench_inverse(c, 10, 4);
    bench_alternating(c, 5, 4);
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
