use crate::error::{MaxEntError, Result};
use crate::matrix::MatrixView;
use faer::prelude::SpSolver;
use faer::sparse::SparseColMat;
use std::fmt;

/// A real-valued sparse matrix in compressed sparse row form.
///
/// This is what [`LinearSolver`] implementations receive, so custom solvers can also build
/// their own test systems with [`from_triplets`][Self::from_triplets].
#[derive(Clone, Debug, PartialEq)]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl SparseMatrix {
    /// Builds a matrix from `(row, column, value)` triplets. Duplicate entries are summed.
    ///
    /// ```
    /// use amari_maxent::SparseMatrix;
    ///
    /// let b = SparseMatrix::from_triplets(2, 2, &[(0, 0, 2.0), (1, 0, 1.0), (1, 1, 3.0)]);
    /// assert_eq!(b.mul_vec(&[1.0, 1.0]), vec![2.0, 4.0]);
    /// ```
    ///
    /// # Panics
    ///
    /// This method panics if a triplet lies outside the matrix.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut sorted = triplets.to_vec();
        for &(r, c, _) in sorted.iter() {
            assert!(r < nrows && c < ncols, "triplet ({}, {}) out of bounds", r, c);
        }
        sorted.sort_by_key(|&(r, c, _)| (r, c));

        let mut indptr = vec![0; nrows + 1];
        let mut indices = Vec::with_capacity(sorted.len());
        let mut values: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last = None;
        for (r, c, v) in sorted {
            if last == Some((r, c)) {
                if let Some(prev) = values.last_mut() {
                    *prev += v;
                }
                continue;
            }
            last = Some((r, c));
            indices.push(c);
            values.push(v);
            indptr[r + 1] = indices.len();
        }
        for r in 0..nrows {
            indptr[r + 1] = indptr[r + 1].max(indptr[r]);
        }

        SparseMatrix {
            nrows,
            ncols,
            indptr,
            indices,
            values,
        }
    }

    /// Builds the transpose of a constraint matrix view, with unit values.
    ///
    /// For a complete constraint matrix this is the square matrix `B = A^T` relating natural
    /// coordinates to log-probability ratios.
    pub fn transpose_of(view: &MatrixView<'_>) -> Self {
        let triplets: Vec<_> = view
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().map(move |&c| (c, r, 1.0)))
            .collect();
        SparseMatrix::from_triplets(view.cols(), view.rows(), &triplets)
    }

    /// The number of rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// The number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// The number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterates over the `(column, value)` entries of row `r`, in increasing column order.
    pub fn row(&self, r: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let span = self.indptr[r]..self.indptr[r + 1];
        self.indices[span.clone()]
            .iter()
            .copied()
            .zip(self.values[span].iter().copied())
    }

    /// Computes `self * v`.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(v.len(), self.ncols);
        (0..self.nrows)
            .map(|r| self.row(r).map(|(c, value)| value * v[c]).sum())
            .collect()
    }
}

/// A strategy for solving square sparse linear systems `B x = b`.
///
/// [`SparseLu`] is the default. Another factorization backend can be substituted by
/// implementing this trait and passing it to
/// [`AmariSolve::with_linear_solver`][crate::AmariSolve::with_linear_solver].
pub trait LinearSolver: fmt::Debug + Send + Sync {
    /// Solves `b_matrix * x = rhs` for `x`.
    fn solve_linear(&self, b_matrix: &SparseMatrix, rhs: &[f64]) -> Result<Vec<f64>>;
}

/// Sparse LU factorization from [`faer`], with partial pivoting.
///
/// The solution is checked by substituting it back: if any entry isn't finite, or the
/// largest residual exceeds `residual_tolerance` times `1 + max |rhs|`, the system is
/// reported as singular.
///
/// ```
/// use amari_maxent::{LinearSolver, SparseLu, SparseMatrix};
///
/// // [1 1] x = [3]
/// // [1 0]     [1]
/// let b = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0)]);
/// let x = SparseLu::default().solve_linear(&b, &[3.0, 1.0]).unwrap();
/// assert!((x[0] - 1.0).abs() < 1e-12 && (x[1] - 2.0).abs() < 1e-12);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SparseLu {
    /// Largest accepted back-substitution residual, relative to the right-hand side.
    pub residual_tolerance: f64,
}

impl Default for SparseLu {
    fn default() -> Self {
        SparseLu {
            residual_tolerance: 1e-8,
        }
    }
}

impl LinearSolver for SparseLu {
    fn solve_linear(&self, b_matrix: &SparseMatrix, rhs: &[f64]) -> Result<Vec<f64>> {
        let n = b_matrix.nrows();
        if b_matrix.ncols() != n {
            return Err(MaxEntError::DimensionMismatch {
                what: "linear system columns",
                expected: n,
                got: b_matrix.ncols(),
            });
        }
        if rhs.len() != n {
            return Err(MaxEntError::LengthMismatch {
                what: "right-hand side",
                expected: n,
                got: rhs.len(),
            });
        }

        let triplets: Vec<(usize, usize, f64)> = (0..n)
            .flat_map(|r| b_matrix.row(r).map(move |(c, v)| (r, c, v)))
            .collect();
        let singular = |column| MaxEntError::SingularMatrix { column };
        let factors = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|_| singular(0))?
            .sp_lu()
            .map_err(|_| singular(0))?;

        let mut solution = faer::Col::<f64>::from_fn(n, |i| rhs[i]);
        factors.solve_in_place(solution.as_mut());
        let x: Vec<f64> = (0..n).map(|i| solution.read(i)).collect();

        if let Some(column) = x.iter().position(|v| !v.is_finite()) {
            return Err(singular(column));
        }
        let scale = 1.0 + rhs.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()));
        if let Some(column) = b_matrix
            .mul_vec(&x)
            .iter()
            .zip(rhs)
            .position(|(got, want)| (got - want).abs() > self.residual_tolerance * scale)
        {
            return Err(singular(column));
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ConstraintMatrix;
    use crate::space::ParameterSpace;
    use approx::assert_abs_diff_eq;

    #[test]
    fn transpose_matches_products() {
        let a = ConstraintMatrix::build(&ParameterSpace::new(3, 3, 2).unwrap());
        let view = a.full();
        let b = SparseMatrix::transpose_of(&view);
        assert_eq!((b.nrows(), b.ncols()), (26, 18));
        assert_eq!(b.nnz(), a.nnz());

        let w: Vec<f64> = (0..view.rows()).map(|r| r as f64 * 0.5 - 3.0).collect();
        assert_eq!(b.mul_vec(&w), view.tr_mul_vec(&w));
    }

    #[test]
    fn solves_with_pivoting() {
        // Needs a row swap: the first row has a zero leading entry.
        let b = SparseMatrix::from_triplets(
            3,
            3,
            &[
                (0, 1, 2.0),
                (0, 2, 1.0),
                (1, 0, 1.0),
                (1, 2, 1.0),
                (2, 0, 4.0),
                (2, 1, 1.0),
            ],
        );
        let expected = [1.0, -2.0, 3.0];
        let rhs = b.mul_vec(&expected);
        let x = SparseLu::default().solve_linear(&b, &rhs).unwrap();
        for (got, want) in x.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn complete_constraint_system_is_invertible() {
        let a = ConstraintMatrix::build(&ParameterSpace::complete(3, 3).unwrap());
        let b = SparseMatrix::transpose_of(&a.full());
        let expected: Vec<f64> = (0..b.ncols()).map(|i| (i as f64).sin()).collect();
        let x = SparseLu::default()
            .solve_linear(&b, &b.mul_vec(&expected))
            .unwrap();
        for (got, want) in x.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(got, want, epsilon = 1e-9);
        }
    }

    #[test]
    fn reports_singular_systems() {
        let b = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 2.0), (1, 1, 2.0)]);
        assert!(matches!(
            SparseLu::default().solve_linear(&b, &[1.0, 3.0]),
            Err(MaxEntError::SingularMatrix { .. })
        ));
        // An empty row can't be pivoted on at all.
        let b = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 1.0)]);
        assert!(SparseLu::default().solve_linear(&b, &[1.0, 1.0]).is_err());
    }

    #[test]
    fn rejects_non_square() {
        let b = SparseMatrix::from_triplets(2, 3, &[(0, 0, 1.0)]);
        assert!(SparseLu::default().solve_linear(&b, &[1.0, 2.0]).is_err());
        let b = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]);
        assert!(SparseLu::default().solve_linear(&b, &[1.0]).is_err());
    }

    #[test]
    fn duplicate_triplets_are_summed() {
        let b = SparseMatrix::from_triplets(1, 2, &[(0, 1, 1.0), (0, 1, 2.5), (0, 0, 1.0)]);
        assert_eq!(b.row(0).collect::<Vec<_>>(), vec![(0, 1.0), (1, 3.5)]);
    }
}
