use crate::error::{MaxEntError, Result};
use crate::linear::{LinearSolver, SparseLu, SparseMatrix};
use crate::matrix::{ConstraintMatrix, MatrixView};
use crate::space::{entropy, ParameterSpace, NORMALIZATION_TOLERANCE};
use crate::store::MatrixStore;
use finitediff::FiniteDiff;
use nalgebra::{DMatrix, DVector};
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::SortedIterator;
use std::fmt;
use tracing::{info, warn};

/// Computes Amari coordinates and maximum-entropy solutions for one `(n, m)` system.
///
/// This holds the [`ConstraintMatrix`] and is immutable after construction, so a single
/// instance can serve any number of solves, from any number of threads.
///
/// ```
/// use amari_maxent::{AmariSolve, ConstraintMatrix, ParameterSpace, SolverInput, SolverOptions};
///
/// let space = ParameterSpace::complete(2, 2).unwrap();
/// let amari = AmariSolve::new(ConstraintMatrix::build(&space));
///
/// // P(00), P(01), P(10), P(11)
/// let p = [0.4, 0.1, 0.1, 0.4];
/// let solution = amari.solve(SolverInput::Probability(&p), 1, &SolverOptions::default()).unwrap();
/// assert!(solution.converged());
///
/// // Keeping only first-order marginals makes the two variables independent.
/// for got in solution.probabilities {
///     assert!((got - 0.25).abs() < 1e-8);
/// }
/// ```
pub struct AmariSolve {
    matrix: ConstraintMatrix,
    transpose: Option<SparseMatrix>,
    linear: Box<dyn LinearSolver>,
}

impl fmt::Debug for AmariSolve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmariSolve")
            .field("space", self.matrix.space())
            .field("nnz", &self.matrix.nnz())
            .field("linear", &self.linear)
            .finish()
    }
}

/// What the solver is given to match.
#[derive(Clone, Copy, Debug)]
pub enum SolverInput<'a> {
    /// A full probability vector, whose marginals are computed first.
    Probability(&'a [f64]),
    /// Marginals in eta coordinates. Only the first `order_idx[k]` entries are used, so eta
    /// for a higher order can be reused at any lower one.
    Eta(&'a [f64]),
}

/// Tuning for [`AmariSolve::solve`].
#[derive(Clone, Debug, PartialEq)]
pub struct SolverOptions {
    /// Every natural parameter starts at this value. Zero is avoided because the symmetric
    /// starting point can leave the first step degenerate; if a solve fails to converge, a
    /// different offset (such as `-1e-5`) is the usual thing to try.
    pub initial_offset: f64,
    /// Use the analytic Jacobian. Otherwise a forward-difference approximation is used.
    pub use_jacobian: bool,
    /// Stop when a step changes theta by at most this much relative to theta's size.
    pub tolerance: f64,
    /// Stop when every residual is at most this large.
    pub residual_tolerance: f64,
    /// Budget of residual evaluations. `None` allows `200 * (l + 1)` for `l` unknowns.
    pub max_evaluations: Option<usize>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            initial_offset: -0.01,
            use_jacobian: true,
            tolerance: 1.49012e-8,
            residual_tolerance: 1e-12,
            max_evaluations: None,
        }
    }
}

impl SolverOptions {
    /// Sets the starting value of every natural parameter.
    pub fn with_initial_offset(mut self, offset: f64) -> Self {
        self.initial_offset = offset;
        self
    }

    /// Chooses between the analytic and finite-difference Jacobian.
    pub fn with_jacobian(mut self, use_jacobian: bool) -> Self {
        self.use_jacobian = use_jacobian;
        self
    }

    /// Sets the relative step tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the residual tolerance.
    pub fn with_residual_tolerance(mut self, tolerance: f64) -> Self {
        self.residual_tolerance = tolerance;
        self
    }

    /// Sets the budget of residual evaluations.
    pub fn with_max_evaluations(mut self, evaluations: usize) -> Self {
        self.max_evaluations = Some(evaluations);
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.initial_offset.is_finite() {
            return Err(MaxEntError::invalid_input(format!(
                "initial offset must be finite, got {}",
                self.initial_offset
            )));
        }
        if !(self.tolerance >= 0.0 && self.residual_tolerance >= 0.0) {
            return Err(MaxEntError::invalid_input(
                "tolerances must be non-negative",
            ));
        }
        if self.max_evaluations == Some(0) {
            return Err(MaxEntError::invalid_input(
                "need a budget of at least one evaluation",
            ));
        }
        Ok(())
    }
}

/// How a solve ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SolveStatus {
    /// The residual or the step size fell within tolerance.
    Converged,
    /// The evaluation budget ran out first.
    TooManyEvaluations,
    /// A Newton step couldn't be computed because the Jacobian was singular.
    SingularJacobian,
    /// No step along the Newton direction reduced the residual.
    NotMakingProgress,
}

impl SolveStatus {
    /// A numeric code in the style of MINPACK's `info`: 1 is success, anything else is not.
    pub fn code(&self) -> u8 {
        match self {
            SolveStatus::Converged => 1,
            SolveStatus::TooManyEvaluations => 2,
            SolveStatus::SingularJacobian => 4,
            SolveStatus::NotMakingProgress => 5,
        }
    }

    /// A short explanation of the status.
    pub fn message(&self) -> &'static str {
        match self {
            SolveStatus::Converged => "the solution converged",
            SolveStatus::TooManyEvaluations => "the number of residual evaluations exceeded the budget",
            SolveStatus::SingularJacobian => "the Jacobian became singular",
            SolveStatus::NotMakingProgress => "the iteration is not making good progress",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// What happened during a solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveDiagnostics {
    /// How the solve ended.
    pub status: SolveStatus,
    /// Number of accepted Newton steps.
    pub iterations: usize,
    /// Number of residual evaluations, including those spent on finite differences.
    pub function_evaluations: usize,
    /// Number of analytic Jacobian evaluations.
    pub jacobian_evaluations: usize,
    /// Mean absolute residual at the returned theta.
    pub mean_abs_residual: f64,
    /// Largest absolute residual at the returned theta.
    pub max_abs_residual: f64,
}

/// The maximum-entropy distribution found by [`AmariSolve::solve`].
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    /// The order whose marginals were matched.
    pub order: usize,
    /// The distribution, indexed like the input probability vector.
    pub probabilities: Vec<f64>,
    /// Natural parameters, one per row of the stored matrix. Entries above `order` are zero.
    pub theta: Vec<f64>,
    /// Convergence information. A solution is returned even if it didn't converge.
    pub diagnostics: SolveDiagnostics,
}

impl Solution {
    /// Returns `true` if the solver reached its tolerance.
    pub fn converged(&self) -> bool {
        self.diagnostics.status == SolveStatus::Converged
    }

    /// The entropy of the solution in bits. See [`entropy`][crate::entropy].
    pub fn entropy(&self) -> f64 {
        entropy(&self.probabilities)
    }
}

/// Converts natural parameters into state probabilities, normalizing so the baseline state's
/// unnormalized weight is 1.
///
/// Exponents are shifted by their maximum before exponentiating so large parameters don't
/// overflow.
fn probabilities(view: &MatrixView<'_>, theta: &[f64]) -> Vec<f64> {
    let exponents = view.tr_mul_vec(theta);
    let shift = exponents.iter().copied().fold(0.0, f64::max);
    let baseline = (-shift).exp();
    let mut p = Vec::with_capacity(exponents.len() + 1);
    p.push(baseline);
    p.extend(exponents.iter().map(|s| (s - shift).exp()));
    let total: f64 = p.iter().sum();
    for v in p.iter_mut() {
        *v /= total;
    }
    p
}

/// The nonlinear system `F(theta) = eta - A_k exp(B_k theta) / Z = 0`.
struct MarginalSystem<'a> {
    view: MatrixView<'a>,
    eta: &'a [f64],
}

impl MarginalSystem<'_> {
    fn residual(&self, theta: &[f64]) -> Vec<f64> {
        let p = probabilities(&self.view, theta);
        self.view
            .mul_vec(&p[1..])
            .into_iter()
            .zip(self.eta)
            .map(|(model, sampled)| sampled - model)
            .collect()
    }

    /// The analytic Jacobian of [`residual`][Self::residual].
    ///
    /// With `x = exp(B theta)`, `p = A x` and `q = sum(x) + 1`, the Jacobian is
    /// `(p p^T - q A diag(x) B) / q^2`. Dividing through by `q` first, this is
    /// `mu mu^T - A diag(pi) B`, where `pi = x / q` are the model's state probabilities and
    /// `mu = A pi` its marginals, which is how it's computed here.
    ///
    /// Entry `(i, j)` of `A diag(pi) B` is the probability mass in the states covered by both
    /// row `i` and row `j`. Rows are sorted column lists, so that's a merge-intersection.
    fn jacobian(&self, theta: &[f64]) -> DMatrix<f64> {
        let p = probabilities(&self.view, theta);
        let pi = &p[1..];
        let mu = self.view.mul_vec(pi);
        let l = self.view.rows();

        let mut jacobian = DMatrix::zeros(l, l);
        for i in 0..l {
            let row_i = self.view.row(i);
            jacobian[(i, i)] = mu[i] * mu[i] - mu[i];
            for j in i + 1..l {
                let shared: f64 = row_i
                    .iter()
                    .copied()
                    .assume_sorted_by_item()
                    .intersection(self.view.row(j).iter().copied().assume_sorted_by_item())
                    .map(|c| pi[c])
                    .sum();
                let entry = mu[i] * mu[j] - shared;
                jacobian[(i, j)] = entry;
                jacobian[(j, i)] = entry;
            }
        }
        jacobian
    }

    /// A forward-difference approximation to the Jacobian.
    fn jacobian_fd(&self, theta: &[f64]) -> DMatrix<f64> {
        let l = theta.len();
        // Entry `j` of the result is the derivative of every residual along `theta[j]`.
        let columns = theta
            .to_vec()
            .forward_jacobian(&|t: &Vec<f64>| self.residual(t));
        DMatrix::from_fn(l, l, |i, j| columns[j][i])
    }
}

fn half_sum_squares(v: &[f64]) -> f64 {
    0.5 * v.iter().map(|x| x * x).sum::<f64>()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

impl AmariSolve {
    /// Wraps a constraint matrix, using [`SparseLu`] for the exact coordinate transform.
    pub fn new(matrix: ConstraintMatrix) -> Self {
        let transpose = if matrix.is_complete() {
            Some(SparseMatrix::transpose_of(&matrix.full()))
        } else {
            None
        };
        AmariSolve {
            matrix,
            transpose,
            linear: Box::new(SparseLu::default()),
        }
    }

    /// Loads or builds the matrix for `space` through `store`.
    ///
    /// The matrix covers `space.order()`; use [`ParameterSpace::complete`] to get one that
    /// supports [`theta_from_p`][Self::theta_from_p] and every order of [`solve`][Self::solve].
    pub fn from_store(store: &MatrixStore, space: &ParameterSpace) -> Result<Self> {
        Ok(AmariSolve::new(store.load_or_build(space)?))
    }

    /// Replaces the sparse linear solver used by [`theta_from_p`][Self::theta_from_p].
    pub fn with_linear_solver(mut self, solver: impl LinearSolver + 'static) -> Self {
        self.linear = Box::new(solver);
        self
    }

    /// The parameter space of the stored matrix; its order is the highest order available.
    pub fn space(&self) -> &ParameterSpace {
        self.matrix.space()
    }

    /// The stored constraint matrix.
    pub fn matrix(&self) -> &ConstraintMatrix {
        &self.matrix
    }

    /// Marginals of `p` for every order in the stored matrix: `A * P[1:]`.
    pub fn eta_from_p(&self, p: &[f64]) -> Result<Vec<f64>> {
        self.eta_from_p_to_order(p, self.matrix.order())
    }

    /// Marginals of `p` for orders `1..=k`.
    pub fn eta_from_p_to_order(&self, p: &[f64], k: usize) -> Result<Vec<f64>> {
        let view = self.matrix.view(k)?;
        self.space().check_probabilities(p)?;
        Ok(view.mul_vec(&p[1..]))
    }

    /// Exact natural coordinates of a strictly positive distribution, found by solving
    /// `B theta = log(P[1:]) - log(P[0])` with `B = A^T`.
    ///
    /// Requires a complete matrix (`k = n`); otherwise fails with
    /// [`MaxEntError::InsufficientOrder`]. Zero probabilities fail with
    /// [`MaxEntError::InvalidInput`], since their log is unbounded.
    pub fn theta_from_p(&self, p: &[f64]) -> Result<Vec<f64>> {
        let b_matrix = self
            .transpose
            .as_ref()
            .ok_or(MaxEntError::InsufficientOrder {
                built: self.matrix.order(),
                requested: self.space().variables(),
            })?;
        self.space().check_probabilities(p)?;
        if let Some(index) = p.iter().position(|&v| v <= 0.0) {
            return Err(MaxEntError::invalid_input(format!(
                "theta coordinates need strictly positive probabilities, but state {} is zero",
                index
            )));
        }

        let log_baseline = p[0].ln();
        let rhs: Vec<f64> = p[1..].iter().map(|v| v.ln() - log_baseline).collect();
        self.linear.solve_linear(b_matrix, &rhs)
    }

    /// The distribution with natural coordinates `theta`.
    ///
    /// `theta` may cover any prefix of orders the stored matrix has, so its length must be
    /// `order_idx[j]` for some order `j`; parameters of higher orders are taken to be zero.
    pub fn p_from_theta(&self, theta: &[f64]) -> Result<Vec<f64>> {
        let view = self.view_for_len(theta.len(), "theta")?;
        if theta.iter().any(|t| !t.is_finite()) {
            return Err(MaxEntError::invalid_input("theta must be finite"));
        }
        Ok(probabilities(&view, theta))
    }

    fn view_for_len(&self, len: usize, what: &'static str) -> Result<MatrixView<'_>> {
        let order = (1..=self.matrix.order())
            .find(|&k| self.space().rows_for(k) == len)
            .ok_or(MaxEntError::LengthMismatch {
                what,
                expected: self.matrix.rows(),
                got: len,
            })?;
        self.matrix.view(order)
    }

    /// Finds the maximum-entropy distribution whose marginals up to order `k` match the input.
    ///
    /// Natural parameters for orders `1..=k` are found by damped Newton-Raphson on
    /// `F(theta) = eta - A_k exp(B_k theta) / Z`, starting from
    /// [`SolverOptions::initial_offset`] everywhere; higher orders stay at zero.
    ///
    /// Errors are only returned for invalid arguments. If the iteration doesn't converge, the
    /// best estimate is still returned, and [`Solution::diagnostics`] says what went wrong.
    #[tracing::instrument(skip(self, input, options), fields(n = self.space().variables(), m = self.space().alphabet()))]
    pub fn solve(
        &self,
        input: SolverInput<'_>,
        k: usize,
        options: &SolverOptions,
    ) -> Result<Solution> {
        options.validate()?;
        let view = self.matrix.view(k)?;
        let l = view.rows();

        let sampled;
        let eta = match input {
            SolverInput::Probability(p) => {
                self.space().check_probabilities(p)?;
                sampled = view.mul_vec(&p[1..]);
                &sampled[..]
            }
            SolverInput::Eta(eta) => {
                if eta.len() < l {
                    return Err(MaxEntError::LengthMismatch {
                        what: "eta vector",
                        expected: l,
                        got: eta.len(),
                    });
                }
                let eta = &eta[..l];
                if let Some(bad) = eta.iter().find(|&&v| {
                    !(-NORMALIZATION_TOLERANCE..=1.0 + NORMALIZATION_TOLERANCE).contains(&v)
                }) {
                    return Err(MaxEntError::invalid_input(format!(
                        "eta entries are marginal probabilities, found {}",
                        bad
                    )));
                }
                eta
            }
        };

        let system = MarginalSystem { view, eta };
        let budget = options.max_evaluations.unwrap_or(200 * (l + 1));
        let mut function_evaluations = 1;
        let mut jacobian_evaluations = 0;
        let mut iterations = 0;

        let mut theta = vec![options.initial_offset; l];
        let mut residual = system.residual(&theta);
        let mut merit = half_sum_squares(&residual);

        let status = loop {
            if max_abs(&residual) <= options.residual_tolerance {
                break SolveStatus::Converged;
            }
            if function_evaluations >= budget {
                break SolveStatus::TooManyEvaluations;
            }

            let jacobian = if options.use_jacobian {
                jacobian_evaluations += 1;
                system.jacobian(&theta)
            } else {
                function_evaluations += l;
                system.jacobian_fd(&theta)
            };
            let rhs = DVector::from_iterator(l, residual.iter().map(|r| -r));
            let step = match jacobian.lu().solve(&rhs) {
                Some(step) if step.iter().all(|s| s.is_finite()) => step,
                _ => break SolveStatus::SingularJacobian,
            };

            // Backtrack along the Newton direction until the sum of squared residuals drops
            // enough. The Newton direction is always a descent direction for it.
            let mut scale = 1.0;
            let accepted = loop {
                let candidate: Vec<f64> = theta
                    .iter()
                    .zip(step.iter())
                    .map(|(t, s)| t + scale * s)
                    .collect();
                let candidate_residual = system.residual(&candidate);
                function_evaluations += 1;
                let candidate_merit = half_sum_squares(&candidate_residual);
                if candidate_merit <= (1.0 - 1e-4 * scale) * merit {
                    break Some((candidate, candidate_residual, candidate_merit));
                }
                scale *= 0.5;
                if scale < 1e-10 || function_evaluations >= budget {
                    break None;
                }
            };

            let (candidate, candidate_residual, candidate_merit) = match accepted {
                Some(found) => found,
                None if function_evaluations >= budget => break SolveStatus::TooManyEvaluations,
                None => break SolveStatus::NotMakingProgress,
            };
            iterations += 1;

            let step_size = scale * step.norm();
            theta = candidate;
            residual = candidate_residual;
            merit = candidate_merit;
            if step_size <= options.tolerance * (norm(&theta) + options.tolerance) {
                break SolveStatus::Converged;
            }
        };

        let diagnostics = SolveDiagnostics {
            status,
            iterations,
            function_evaluations,
            jacobian_evaluations,
            mean_abs_residual: residual.iter().map(|r| r.abs()).sum::<f64>() / l as f64,
            max_abs_residual: max_abs(&residual),
        };
        if status == SolveStatus::Converged {
            info!(
                order = k,
                iterations,
                function_evaluations,
                jacobian_evaluations,
                mean_abs_residual = diagnostics.mean_abs_residual,
                "maxent solve converged"
            );
        } else {
            warn!(
                order = k,
                code = status.code(),
                iterations,
                function_evaluations,
                mean_abs_residual = diagnostics.mean_abs_residual,
                "maxent solve did not converge: {}",
                status
            );
        }

        let probabilities = probabilities(&view, &theta);
        theta.resize(self.matrix.rows(), 0.0);
        Ok(Solution {
            order: k,
            probabilities,
            theta,
            diagnostics,
        })
    }
}
