#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate finds maximum-entropy distributions over `n` discrete variables with `m` symbols
//! each, constrained to match the marginals of some order `k`, using the information-geometric
//! coordinates described here:
//!
//! - Amari, [Information Geometry on Hierarchy of Probability Distributions][amari], 2001
//! - Ince, Petersen, Swan, and Panzeri, [Python for Information Theoretic Analysis of Neural
//!   Data][ince], 2009
//!
//! [amari]: https://doi.org/10.1109/18.930911
//! [ince]: https://doi.org/10.3389/neuro.11.004.2009
//!
//! A distribution is a vector `P` of `m^n` probabilities, indexed by reading each state as a
//! base-`m` number with the first variable most significant. State 0 is the baseline. Its
//! "eta" coordinates are the probabilities of every marginal cell: every choice of up to `k`
//! variables together with a nonzero symbol for each. Its "theta" (natural) coordinates are the
//! parameters of the log-linear model
//!
//! ```text
//! P[i] = exp((A^T theta)[i - 1]) / Z    for i > 0
//! P[0] = 1 / Z
//! ```
//!
//! where `A` is the [`ConstraintMatrix`], with one row per marginal cell and one column per
//! non-baseline state. The maximum-entropy distribution matching the order-`k` marginals of `P`
//! is the one whose theta coordinates above order `k` are all zero, and [`AmariSolve::solve`]
//! finds the rest of them by Newton-Raphson iteration.
//!
//! Building `A` is expensive, so a [`MatrixStore`] caches it on disk for each `(n, m)`.
//!
//! ```
//! use amari_maxent::{AmariSolve, ParameterSpace, SolverInput, SolverOptions};
//!
//! let space = ParameterSpace::complete(3, 2).unwrap();
//! let amari = AmariSolve::new(amari_maxent::ConstraintMatrix::build(&space));
//!
//! // Three binary variables where the third is the parity of the other two. Every pair looks
//! // independent, so the pairwise maximum-entropy model is uniform.
//! let mut p = vec![0.0; 8];
//! for &state in &[0b000, 0b011, 0b101, 0b110] {
//!     p[state] = 0.25;
//! }
//! let solution = amari.solve(SolverInput::Probability(&p), 2, &SolverOptions::default()).unwrap();
//! assert!(solution.converged());
//! assert!((solution.entropy() - 3.0).abs() < 1e-6);
//! ```

mod alphabet;
mod error;
mod linear;
mod matrix;
mod solve;
mod space;
pub mod store;

pub use alphabet::SignConverter;
pub use error::{ErrorKind, MaxEntError, Result};
pub use linear::{LinearSolver, SparseLu, SparseMatrix};
pub use matrix::{ConstraintMatrix, MarginalCell, MarginalCells, MatrixView, Positions, RowGenerator};
pub use solve::{
    AmariSolve, Solution, SolveDiagnostics, SolveStatus, SolverInput, SolverOptions,
};
pub use space::{entropy, ParameterSpace, Word, NORMALIZATION_TOLERANCE};
pub use store::{MatrixStore, StoreConfig};
