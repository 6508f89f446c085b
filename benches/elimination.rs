//! Elimination and smoother-update benchmarks on chain graphs.
//!
//! Run with: `cargo bench`

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use nalgebra::{DMatrix, dvector};
use tandem_smoother::linalg::{CliqueTree, JacobianFactor, LinearFactor, constrained_ordering};
use tandem_smoother::{BatchSmoother, BetweenFactor, Factor, Key, KeySet, PriorFactor, Values};

/// Whitened linear chain: a prior row on key 0 and one odometry row per link.
fn chain_linear_factors(n: usize) -> Vec<LinearFactor> {
    let mut factors = Vec::with_capacity(n);
    let prior = JacobianFactor::whitened(
        vec![(0, DMatrix::from_element(1, 1, 1.0))],
        dvector![0.1],
    )
    .unwrap();
    factors.push(LinearFactor::Jacobian(prior));
    for i in 0..n as Key - 1 {
        let link = JacobianFactor::whitened(
            vec![
                (i, DMatrix::from_element(1, 1, -1.0)),
                (i + 1, DMatrix::from_element(1, 1, 1.0)),
            ],
            dvector![0.01 * (i as f64)],
        )
        .unwrap();
        factors.push(LinearFactor::Jacobian(link));
    }
    factors
}

fn chain_smoother(n: usize) -> (BatchSmoother, Vec<Box<dyn Factor>>, Values) {
    let mut factors: Vec<Box<dyn Factor>> = Vec::with_capacity(n);
    factors.push(Box::new(
        PriorFactor::new(0, dvector![0.0], dvector![1.0]).unwrap(),
    ));
    let mut values = Values::new();
    values.insert(0, dvector![0.05]).unwrap();
    for i in 0..n as Key - 1 {
        factors.push(Box::new(
            BetweenFactor::new(i, i + 1, dvector![1.0], dvector![1.0]).unwrap(),
        ));
        if i + 1 < n as Key - 1 {
            values
                .insert(i + 1, dvector![(i + 1) as f64 + 0.05])
                .unwrap();
        }
    }

    let mut smoother = BatchSmoother::new();
    let mut roots = Values::new();
    roots
        .insert(n as Key - 1, dvector![(n - 1) as f64])
        .unwrap();
    smoother
        .synchronize(Vec::new(), Values::new(), Vec::new(), roots)
        .unwrap();
    (smoother, factors, values)
}

fn bench_elimination(c: &mut Criterion) {
    let mut group = c.benchmark_group("elimination");

    let factors = chain_linear_factors(100);
    let keys: Vec<Vec<Key>> = factors.iter().map(|f| f.keys().to_vec()).collect();
    let ordering = constrained_ordering(&keys, &KeySet::new());

    group.bench_function("chain_100/eliminate", |b| {
        b.iter_batched(
            || factors.clone(),
            |factors| CliqueTree::eliminate(factors, black_box(&ordering)).unwrap(),
            BatchSize::SmallInput,
        )
    });

    let tree = CliqueTree::eliminate(factors.clone(), &ordering).unwrap();
    group.bench_function("chain_100/solve", |b| {
        b.iter(|| black_box(&tree).solve().unwrap())
    });

    group.finish();
}

fn bench_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordering");

    let factors = chain_linear_factors(200);
    let keys: Vec<Vec<Key>> = factors.iter().map(|f| f.keys().to_vec()).collect();
    let constrained: KeySet = [199].into_iter().collect();

    group.bench_function("chain_200/constrained", |b| {
        b.iter(|| constrained_ordering(black_box(&keys), black_box(&constrained)))
    });

    group.finish();
}

fn bench_smoother(c: &mut Criterion) {
    let mut group = c.benchmark_group("smoother");
    group.sample_size(20);

    group.bench_function("chain_50/update_with_root", |b| {
        b.iter_batched(
            || chain_smoother(50),
            |(mut smoother, factors, values)| smoother.update(factors, values).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_elimination, bench_ordering, bench_smoother);
criterion_main!(benches);
