use criterion::{Criterion, black_box, criterion_group, criterion_main};
use eqsys::core::budget::WorkBudget;
use eqsys::core::traits::NumericKind;
use eqsys::matrix::SparseMatrix;
use eqsys::solver::{BackendCapabilities, BackendRequest, FaerDenseBackend, SolverBackend, SparseLu};

/// Five-point Laplacian on a k×k grid, shifted to stay nonsingular.
fn grid_laplacian(k: usize) -> SparseMatrix<f64> {
    let n = k * k;
    let mut t = Vec::with_capacity(5 * n);
    for r in 0..k {
        for c in 0..k {
            let i = r * k + c;
            t.push((i, i, -4.5));
            if r > 0 {
                t.push((i, i - k, 1.0));
            }
            if r + 1 < k {
                t.push((i, i + k, 1.0));
            }
            if c > 0 {
                t.push((i, i - 1, 1.0));
            }
            if c + 1 < k {
                t.push((i, i + 1, 1.0));
            }
        }
    }
    SparseMatrix::from_triplets(n, t).expect("valid grid")
}

fn bench_lu_vs_faer(c: &mut Criterion) {
    let a = grid_laplacian(14);
    let n = a.dim();
    let b: Vec<f64> = (0..n).map(|i| (i as f64).cos()).collect();
    let mut x = vec![0.0; n];

    c.bench_function("eqsys sparse LU", |ben| {
        ben.iter(|| {
            let mut budget = WorkBudget::unlimited();
            let mut lu = SparseLu::new(1e-14);
            lu.factor(black_box(&a), &mut budget).unwrap();
            lu.solve_cached(black_box(&b), &mut x, &mut budget).unwrap();
        })
    });

    let (row_ptr, col_idx, values) = a.to_csr();
    c.bench_function("faer dense LU backend", |ben| {
        let mut backend = FaerDenseBackend::new();
        ben.iter(|| {
            let request = BackendRequest {
                n,
                row_ptr: &row_ptr,
                col_idx: &col_idx,
                values: &values,
                rhs: black_box(&b),
                capabilities: BackendCapabilities::for_kind(NumericKind::Real),
            };
            backend.solve(&request).unwrap()
        })
    });
}

criterion_group!(benches, bench_lu_vs_faer);
criterion_main!(benches);
