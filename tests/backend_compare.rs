//! Internal strategies against the faer dense LU backend on random sparse
//! systems.

use approx::assert_abs_diff_eq;
use eqsys::config::{SolverParameters, Strategy};
use eqsys::error::{BackendPhase, EqError};
use eqsys::matrix::SparseMatrix;
use eqsys::solver::{BackendCapabilities, BackendRequest, FaerDenseBackend, SolverBackend};
use eqsys::system::{EquationSystem, MatrixPart, VectorPart};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random diagonally dominant sparse matrix with about `per_row`
/// off-diagonals per row, and a random right-hand side.
fn random_system(n: usize, per_row: usize, seed: u64) -> (Vec<(usize, usize, f64)>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut t = Vec::new();
    for i in 0..n {
        let mut off = 0.0;
        for _ in 0..per_row {
            let j = rng.gen_range(0..n);
            if j != i {
                let v: f64 = rng.gen_range(-1.0..1.0);
                off += v.abs();
                t.push((i, j, v));
            }
        }
        t.push((i, i, -(off + rng.gen_range(1.0..3.0))));
    }
    let b = (0..n).map(|_| rng.gen_range(-5.0..5.0)).collect();
    (t, b)
}

fn solve_with(
    parms: &mut SolverParameters,
    t: &[(usize, usize, f64)],
    b: &[f64],
    backend: bool,
) -> Vec<f64> {
    let mut sys = EquationSystem::new();
    sys.allocate(parms).unwrap();
    for &(i, j, v) in t {
        sys.add(MatrixPart::As, i, j, v).unwrap();
    }
    sys.set_vector_values(VectorPart::Bs(0), b).unwrap();
    if backend {
        sys.set_backend(Box::new(FaerDenseBackend::new()));
    }
    sys.solve(parms).unwrap();
    sys.solution(0).unwrap().to_vec()
}

#[test]
fn direct_and_iterative_agree_with_faer() {
    for seed in 0..4 {
        let n = 40;
        let (t, b) = random_system(n, 4, seed);

        let mut faer = SolverParameters::new(n);
        faer.use_backend = true;
        let reference = solve_with(&mut faer, &t, &b, true);
        assert_eq!(faer.statistics.strategy, Some(Strategy::Backend));

        let mut direct = SolverParameters::new(n);
        let x = solve_with(&mut direct, &t, &b, false);
        for (a, r) in x.iter().zip(&reference) {
            assert_abs_diff_eq!(*a, *r, epsilon = 1e-9);
        }

        let mut iterative = SolverParameters::new(n);
        iterative.set_option("solver", "iterative").unwrap();
        let x = solve_with(&mut iterative, &t, &b, false);
        for (a, r) in x.iter().zip(&reference) {
            assert_abs_diff_eq!(*a, *r, epsilon = 1e-5);
        }
    }
}

#[test]
fn eliminated_equations_agree_with_faer() {
    let n = 30;
    let (t, b) = random_system(n, 3, 42);
    let mut faer = SolverParameters::new(n);
    faer.use_backend = true;
    let reference = solve_with(&mut faer, &t, &b, true);

    let mut parms = SolverParameters::new(n);
    let mut sys = EquationSystem::new();
    sys.allocate(&parms).unwrap();
    for &(i, j, v) in &t {
        sys.add(MatrixPart::As, i, j, v).unwrap();
    }
    sys.set_vector_values(VectorPart::Bs(0), &b).unwrap();
    for row in (0..n).step_by(4) {
        sys.set_elimination(row, true, (row % 3) as i32).unwrap();
    }
    sys.solve(&mut parms).unwrap();
    assert_eq!(parms.statistics.eliminated, 8);
    for (a, r) in sys.solution(0).unwrap().iter().zip(&reference) {
        assert_abs_diff_eq!(*a, *r, epsilon = 1e-9);
    }
}

#[test]
fn backend_errors_keep_their_phase() {
    let a = SparseMatrix::from_triplets(2, vec![(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 4.0)])
        .unwrap();
    let (row_ptr, col_idx, values) = a.to_csr();
    let rhs = [1.0, 1.0];
    let request = BackendRequest {
        n: 2,
        row_ptr: &row_ptr,
        col_idx: &col_idx,
        values: &values,
        rhs: &rhs,
        capabilities: BackendCapabilities::for_kind(eqsys::core::traits::NumericKind::Real),
    };
    let err: EqError = FaerDenseBackend::new().solve(&request).unwrap_err().into();
    assert!(matches!(
        err,
        EqError::Backend {
            phase: BackendPhase::Numeric,
            ..
        }
    ));
}
