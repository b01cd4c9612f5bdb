use amari_maxent::{
    entropy, AmariSolve, ConstraintMatrix, ParameterSpace, SolveStatus, SolverInput,
    SolverOptions,
};
use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

macro_rules! check_recovery {
    ($($name:ident: $n:expr, $m:expr, $k:expr;)*) => {
        $(
        #[test]
        fn $name() {
            check($n, $m, $k);
        }
        )*
    }
}

check_recovery! {
    recover_n2_m2_k1: 2, 2, 1;
    recover_n2_m3_k1: 2, 3, 1;
    recover_n3_m2_k1: 3, 2, 1;
    recover_n3_m2_k2: 3, 2, 2;
    recover_n3_m3_k2: 3, 3, 2;
    recover_n4_m2_k2: 4, 2, 2;
    recover_n4_m2_k3: 4, 2, 3;
    recover_n4_m3_k2: 4, 3, 2;
}

/// A distribution whose interactions stop at order `k` is its own order-`k` maximum-entropy
/// solution, so solving from its marginals has to recover it.
fn check(n: usize, m: usize, k: usize) {
    let space = ParameterSpace::complete(n, m).unwrap();
    let amari = AmariSolve::new(ConstraintMatrix::build(&space));
    let mut rng = StdRng::seed_from_u64((n * 100 + m * 10 + k) as u64);

    let l = space.rows_for(k);
    let theta: Vec<f64> = (0..l).map(|_| rng.gen_range(-0.8..0.8)).collect();
    let p = amari.p_from_theta(&theta).unwrap();

    let solution = amari
        .solve(SolverInput::Probability(&p), k, &SolverOptions::default())
        .unwrap();
    assert!(solution.converged(), "{:?}", solution.diagnostics);
    assert_eq!(solution.order, k);
    assert_eq!(solution.theta.len(), space.dim());
    for (want, got) in theta.iter().zip(&solution.theta) {
        assert_abs_diff_eq!(want, got, epsilon = 1e-6);
    }
    assert!(solution.theta[l..].iter().all(|&t| t == 0.0));
    for (want, got) in p.iter().zip(&solution.probabilities) {
        assert_abs_diff_eq!(want, got, epsilon = 1e-9);
    }

    // Same thing starting from eta, including entries for orders that must be ignored.
    let eta = amari.eta_from_p(&p).unwrap();
    let from_eta = amari
        .solve(SolverInput::Eta(&eta), k, &SolverOptions::default())
        .unwrap();
    assert!(from_eta.converged());
    for (want, got) in p.iter().zip(&from_eta.probabilities) {
        assert_abs_diff_eq!(want, got, epsilon = 1e-9);
    }
}

#[test]
fn uniform_first_order_marginals() {
    let amari = AmariSolve::new(ConstraintMatrix::build(&ParameterSpace::complete(2, 2).unwrap()));
    let solution = amari
        .solve(SolverInput::Eta(&[0.5, 0.5]), 1, &SolverOptions::default())
        .unwrap();
    assert!(solution.converged());
    for &v in &solution.probabilities {
        assert_abs_diff_eq!(v, 0.25, epsilon = 1e-8);
    }
    assert_abs_diff_eq!(solution.entropy(), 2.0, epsilon = 1e-8);
}

#[test]
fn solutions_are_distributions_with_matching_marginals() {
    let space = ParameterSpace::complete(3, 3).unwrap();
    let amari = AmariSolve::new(ConstraintMatrix::build(&space));
    let mut rng = StdRng::seed_from_u64(42);
    let mut p: Vec<f64> = (0..space.states()).map(|_| rng.gen_range(0.1..1.0)).collect();
    let total: f64 = p.iter().sum();
    p.iter_mut().for_each(|v| *v /= total);

    let want = amari.eta_from_p(&p).unwrap();
    let mut previous = f64::INFINITY;
    for k in 1..=3 {
        let solution = amari
            .solve(SolverInput::Probability(&p), k, &SolverOptions::default())
            .unwrap();
        assert!(solution.converged(), "k = {}: {:?}", k, solution.diagnostics);
        assert!(solution.probabilities.iter().all(|&v| v >= 0.0));
        assert_abs_diff_eq!(solution.probabilities.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        let got = amari.eta_from_p_to_order(&solution.probabilities, k).unwrap();
        for (x, y) in want.iter().zip(&got) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-9);
        }

        // More constraints can only lower the maximum entropy.
        let h = solution.entropy();
        assert!(h <= previous + 1e-9);
        previous = h;
    }
    assert_abs_diff_eq!(previous, entropy(&p), epsilon = 1e-8);
}

#[test]
fn finite_difference_jacobian_converges() {
    let space = ParameterSpace::complete(3, 2).unwrap();
    let amari = AmariSolve::new(ConstraintMatrix::build(&space));
    let p = [0.2, 0.05, 0.1, 0.15, 0.05, 0.1, 0.15, 0.2];
    let exact = amari
        .solve(SolverInput::Probability(&p), 2, &SolverOptions::default())
        .unwrap();
    let approx = amari
        .solve(
            SolverInput::Probability(&p),
            2,
            &SolverOptions::default().with_jacobian(false),
        )
        .unwrap();
    assert!(approx.converged(), "{:?}", approx.diagnostics);
    assert_eq!(approx.diagnostics.jacobian_evaluations, 0);
    assert!(approx.diagnostics.function_evaluations > exact.diagnostics.function_evaluations);
    for (x, y) in exact.probabilities.iter().zip(&approx.probabilities) {
        assert_abs_diff_eq!(x, y, epsilon = 1e-6);
    }
}

#[test]
fn exhausted_budget_is_reported_not_raised() {
    let amari = AmariSolve::new(ConstraintMatrix::build(&ParameterSpace::complete(3, 3).unwrap()));
    let p: Vec<f64> = (1..=27).map(|i| i as f64 / 378.0).collect();
    let solution = amari
        .solve(
            SolverInput::Probability(&p),
            2,
            &SolverOptions::default().with_max_evaluations(1),
        )
        .unwrap();
    assert!(!solution.converged());
    assert_eq!(solution.diagnostics.status, SolveStatus::TooManyEvaluations);
    assert_ne!(solution.diagnostics.status.code(), 1);
    assert!(solution.diagnostics.max_abs_residual > 0.0);
    assert_abs_diff_eq!(solution.probabilities.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
}

#[test]
fn unreachable_marginals_stay_finite() {
    // A deterministic variable pushes theta towards infinity.
    let amari = AmariSolve::new(ConstraintMatrix::build(&ParameterSpace::complete(2, 2).unwrap()));
    let solution = amari
        .solve(
            SolverInput::Eta(&[1.0, 0.5]),
            1,
            &SolverOptions::default().with_residual_tolerance(0.0).with_max_evaluations(50),
        )
        .unwrap();
    assert!(solution.probabilities.iter().all(|v| v.is_finite()));
    assert!(solution.diagnostics.function_evaluations <= 50);
}

#[test]
fn invalid_requests_are_errors() {
    let amari = AmariSolve::new(ConstraintMatrix::build(&ParameterSpace::new(3, 2, 2).unwrap()));
    let options = SolverOptions::default();
    let p = [0.125; 8];
    assert!(amari.solve(SolverInput::Probability(&p), 0, &options).is_err());
    assert!(amari.solve(SolverInput::Probability(&p), 3, &options).is_err());
    assert!(amari.solve(SolverInput::Probability(&p[..4]), 1, &options).is_err());
    assert!(amari.solve(SolverInput::Eta(&[0.5, 0.5]), 1, &options).is_err());
    assert!(amari.solve(SolverInput::Eta(&[0.5, 0.5, 1.5]), 1, &options).is_err());
}
