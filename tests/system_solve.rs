//! End-to-end solves through `EquationSystem`.
//!
//! The fixtures are strongly diagonally dominant (diagonal -2 or -3) so
//! every strategy converges; right-hand sides are built from a known
//! solution `x0` as `b = A·x0`.

use approx::assert_abs_diff_eq;
use eqsys::config::{IterativeKind, PreconditionerKind, SolverParameters, Strategy};
use eqsys::core::traits::Scalar;
use eqsys::error::EqError;
use eqsys::matrix::SparseMatrix;
use eqsys::system::{EquationSystem, MatrixPart, VectorPart};
use num_complex::Complex64;

fn fixture_4() -> Vec<(usize, usize, f64)> {
    vec![
        (0, 0, -3.0),
        (0, 1, 1.0),
        (0, 3, 0.5),
        (1, 0, 0.5),
        (1, 1, -2.0),
        (1, 2, 0.25),
        (2, 1, 1.0),
        (2, 2, -3.0),
        (2, 3, 1.0),
        (3, 0, 0.25),
        (3, 2, 0.5),
        (3, 3, -2.0),
    ]
}

fn fixture_12() -> Vec<(usize, usize, f64)> {
    let n = 12;
    let mut t = Vec::new();
    for i in 0..n {
        t.push((i, i, if i % 2 == 0 { -3.0 } else { -2.0 }));
        t.push((i, (i + 1) % n, 0.5));
        t.push((i, (i + 5) % n, 0.25));
        t.push((i, (i + 7) % n, -0.3));
    }
    t
}

/// Lifts a real fixture to complex coefficients.
fn complexify(t: &[(usize, usize, f64)]) -> Vec<(usize, usize, Complex64)> {
    t.iter()
        .map(|&(i, j, v)| {
            let c = if i == j {
                Complex64::new(v, 0.5)
            } else {
                Complex64::new(v, -0.5 * v)
            };
            (i, j, c)
        })
        .collect()
}

fn known_solution<T: Scalar>(n: usize) -> Vec<T> {
    (0..n)
        .map(|i| T::from_parts(1.0 + 0.25 * i as f64, if i % 3 == 0 { -0.5 } else { 0.0 }))
        .collect()
}

/// Allocates a system holding `As` from `triplets` and `bs[k] = As·x0[k]`.
fn build<T: Scalar>(
    parms: &SolverParameters,
    triplets: &[(usize, usize, T)],
    x0: &[Vec<T>],
) -> EquationSystem<T> {
    let n = parms.dimension;
    let mut sys = EquationSystem::new();
    sys.allocate(parms).unwrap();
    for &(i, j, v) in triplets {
        sys.add(MatrixPart::As, i, j, v).unwrap();
    }
    let a = SparseMatrix::from_triplets(n, triplets.to_vec()).unwrap();
    for (k, x) in x0.iter().enumerate() {
        let b = a.mul_vec(x).unwrap();
        sys.set_vector_values(VectorPart::Bs(k), &b).unwrap();
    }
    sys
}

fn max_error<T: Scalar>(x: &[T], x0: &[T]) -> f64 {
    x.iter().zip(x0).map(|(&a, &b)| (a - b).abs()).fold(0.0, f64::max)
}

fn direct(n: usize) -> SolverParameters {
    SolverParameters::new(n)
}

fn iterative(n: usize, kind: IterativeKind) -> SolverParameters {
    let mut parms = SolverParameters::new(n);
    parms.direct = false;
    parms.iterative = true;
    parms.iterative_kind = kind;
    parms
}

#[test]
fn real_fixtures_solve_directly() {
    for (n, t) in [(4, fixture_4()), (12, fixture_12())] {
        let mut parms = direct(n);
        let x0 = known_solution::<f64>(n);
        let mut sys = build(&parms, &t, &[x0.clone()]);
        sys.solve(&mut parms).unwrap();
        assert!(max_error(sys.solution(0).unwrap(), &x0) < 1e-7);
        assert_eq!(parms.statistics.strategy, Some(Strategy::Direct));
        assert!(parms.statistics.accuracy_achieved < 1e-12);
    }
}

#[test]
fn complex_fixtures_solve_directly() {
    for (n, t) in [(4, complexify(&fixture_4())), (12, complexify(&fixture_12()))] {
        let mut parms = direct(n);
        let x0 = known_solution::<Complex64>(n);
        let mut sys = build(&parms, &t, &[x0.clone()]);
        sys.solve(&mut parms).unwrap();
        assert!(max_error(sys.solution(0).unwrap(), &x0) < 1e-7);
    }
}

#[test]
fn every_iterative_kind_solves_the_fixture() {
    for kind in [IterativeKind::BiCgStab, IterativeKind::Gmres, IterativeKind::Refinement] {
        let mut parms = iterative(12, kind);
        let x0 = known_solution::<f64>(12);
        let mut sys = build(&parms, &fixture_12(), &[x0.clone()]);
        sys.solve(&mut parms).unwrap();
        assert!(max_error(sys.solution(0).unwrap(), &x0) < 1e-6, "{kind:?}");
        assert_eq!(parms.statistics.strategy, Some(Strategy::Iterative));
        assert!(parms.statistics.attempts >= 1);
    }

    let mut parms = iterative(12, IterativeKind::BiCgStab);
    let x0 = known_solution::<Complex64>(12);
    let mut sys = build(&parms, &complexify(&fixture_12()), &[x0.clone()]);
    sys.solve(&mut parms).unwrap();
    assert!(max_error(sys.solution(0).unwrap(), &x0) < 1e-6);
}

#[test]
fn disabled_pre_elimination_matches_unflagged_system() {
    let x0 = known_solution::<f64>(12);
    let mut with = direct(12);
    let mut sys_with = build(&with, &fixture_12(), &[x0.clone()]);
    sys_with.solve(&mut with).unwrap();

    let mut without = direct(12);
    without.elimination = false;
    let mut sys_without = build(&without, &fixture_12(), &[x0.clone()]);
    sys_without.solve(&mut without).unwrap();

    assert_eq!(with.statistics.eliminated, 0);
    assert_eq!(sys_with.solution(0).unwrap(), sys_without.solution(0).unwrap());
}

#[test]
fn flagged_equations_are_eliminated_before_the_solve() {
    let mut parms = direct(12);
    let x0 = known_solution::<f64>(12);
    let mut sys = build(&parms, &fixture_12(), &[x0.clone()]);
    for (row, priority) in [(0, 2), (5, 1), (11, 1)] {
        sys.set_elimination(row, true, priority).unwrap();
    }
    sys.solve(&mut parms).unwrap();
    assert_eq!(parms.statistics.eliminated, 3);
    assert!(max_error(sys.solution(0).unwrap(), &x0) < 1e-7);
}

#[test]
fn unused_components_leave_the_main_system() {
    let mut parms = direct(4);
    let x0 = known_solution::<f64>(4);
    let mut sys = build(&parms, &fixture_4(), &[x0.clone()]);
    // Values in unused components must not leak into the assembly.
    for i in 0..4 {
        sys.set(MatrixPart::Tb, i, i, 4.0).unwrap();
        sys.set(MatrixPart::Tv, i, (i + 1) % 4, 2.0).unwrap();
        sys.set_vector(VectorPart::Sr, i, 7.0).unwrap();
        sys.set_vector(VectorPart::Sc, i, 0.1).unwrap();
    }
    sys.solve(&mut parms).unwrap();

    let assembled = sys.assembled().unwrap();
    let a = SparseMatrix::from_triplets(4, fixture_4()).unwrap();
    for i in 0..4 {
        for j in 0..4 {
            assert_eq!(assembled.get(i, j).unwrap(), a.get(i, j).unwrap());
        }
    }
    assert!(max_error(sys.solution(0).unwrap(), &x0) < 1e-7);
}

#[test]
fn boundary_system_adds_to_the_main_system() {
    let mut parms = direct(4);
    let x0 = known_solution::<f64>(4);
    let mut sys = build(&parms, &fixture_4(), &[x0.clone()]);
    // Move half of row 2 into the boundary part: As + Ab is unchanged.
    let half = -1.5;
    sys.set(MatrixPart::As, 2, 2, half).unwrap();
    sys.set(MatrixPart::Ab, 2, 2, half).unwrap();
    let b2 = sys.vector_entry(VectorPart::Bs(0), 2).unwrap();
    sys.set_vector(VectorPart::Bs(0), 2, 0.5 * b2).unwrap();
    sys.set_vector(VectorPart::Bb(0), 2, 0.5 * b2).unwrap();
    sys.solve(&mut parms).unwrap();
    assert!(max_error(sys.solution(0).unwrap(), &x0) < 1e-7);
}

#[test]
fn identity_system_returns_each_right_hand_side() {
    let n = 8;
    let mut parms = direct(n);
    parms.rhs_count = 4;
    let columns: Vec<Vec<f64>> = (0..4)
        .map(|k| (0..n).map(|i| (k * n + i) as f64 * 0.5 - 3.0).collect())
        .collect();
    let identity: Vec<(usize, usize, f64)> = (0..n).map(|i| (i, i, 1.0)).collect();
    let mut sys = build(&parms, &identity, &columns);
    sys.solve(&mut parms).unwrap();
    for (k, b) in columns.iter().enumerate() {
        for (x, b) in sys.solution(k).unwrap().iter().zip(b) {
            assert_abs_diff_eq!(*x, *b, epsilon = 1e-3);
        }
    }
}

#[test]
fn multiple_right_hand_sides_match_single_solves() {
    let n = 12;
    let columns: Vec<Vec<f64>> = (0..3)
        .map(|k| (0..n).map(|i| ((i + 3 * k) as f64).sin()).collect())
        .collect();

    for strategy in ["direct", "iterative"] {
        let mut parms = direct(n);
        parms.set_option("solver", strategy).unwrap();
        parms.rhs_count = 3;
        let mut all = build(&parms, &fixture_12(), &columns);
        all.solve(&mut parms).unwrap();

        for (k, x0) in columns.iter().enumerate() {
            let mut single_parms = direct(n);
            single_parms.set_option("solver", strategy).unwrap();
            let mut single = build(&single_parms, &fixture_12(), &[x0.clone()]);
            single.solve(&mut single_parms).unwrap();
            for (a, b) in all.solution(k).unwrap().iter().zip(single.solution(0).unwrap()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
            }
        }
    }
}

#[test]
fn resource_limits_fail_deterministically() {
    let x0 = known_solution::<f64>(12);
    for (work, bytes) in [(Some(10), None), (None, Some(64))] {
        let mut errors = Vec::new();
        for _ in 0..2 {
            let mut parms = direct(12);
            parms.work_limit = work;
            parms.byte_limit = bytes;
            let mut sys = build(&parms, &fixture_12(), &[x0.clone()]);
            let err = sys.solve(&mut parms).unwrap_err();
            assert!(err.is_resource_limit(), "{err}");
            assert_eq!(sys.is_valid(), Err(err.clone()));
            errors.push(err);
        }
        assert_eq!(errors[0], errors[1]);
    }

    // Generous limits succeed.
    let mut parms = direct(12);
    parms.work_limit = Some(1_000_000);
    parms.byte_limit = Some(1 << 20);
    let mut sys = build(&parms, &fixture_12(), &[x0.clone()]);
    sys.solve(&mut parms).unwrap();
    assert!(parms.statistics.work_used <= 1_000_000);
    assert!(parms.statistics.bytes_peak <= 1 << 20);
}

#[test]
fn exhausted_iterations_report_non_convergence() {
    let mut parms = iterative(12, IterativeKind::BiCgStab);
    parms.preconditioner = PreconditionerKind::None;
    parms.max_iterations = 2;
    parms.accuracy = 1e-14;
    let x0 = known_solution::<f64>(12);
    let mut sys = build(&parms, &fixture_12(), &[x0.clone()]);
    let err = sys.solve(&mut parms).unwrap_err();
    assert!(matches!(err, EqError::NotConverged { iterations: 2, .. }), "{err}");
    assert_eq!(parms.statistics.iterations, 2);

    // The last iterate is kept, and it is closer to x0 than the zero start.
    let x = sys.solution(0).unwrap();
    let zero = vec![0.0; 12];
    assert!(max_error(x, &x0) < max_error(&zero, &x0));
}

#[test]
fn newton_steps_reuse_the_ordering() {
    let mut parms = direct(12);
    parms.set_option("newton_reuse", "3").unwrap();
    let x0 = known_solution::<f64>(12);
    let mut sys = build(&parms, &fixture_12(), &[x0.clone()]);
    sys.set_elimination(4, true, 0).unwrap();
    sys.solve(&mut parms).unwrap();

    for step in 1..3 {
        sys.allocate_newton(&parms).unwrap();
        let scale = 1.0 + step as f64;
        let scaled: Vec<(usize, usize, f64)> =
            fixture_12().into_iter().map(|(i, j, v)| (i, j, v * scale)).collect();
        for &(i, j, v) in &scaled {
            sys.add(MatrixPart::As, i, j, v).unwrap();
        }
        let b = SparseMatrix::from_triplets(12, scaled).unwrap().mul_vec(&x0).unwrap();
        sys.set_vector_values(VectorPart::Bs(0), &b).unwrap();
        sys.solve(&mut parms).unwrap();
        assert_eq!(parms.statistics.eliminated, 1);
        assert!(max_error(sys.solution(0).unwrap(), &x0) < 1e-7);
    }
}
