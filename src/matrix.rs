use crate::error::{MaxEntError, Result};
use crate::space::{ParameterSpace, Word};
use smallvec::SmallVec;
use std::time::Instant;
use tracing::info;

/// Positions of the variables fixed by one marginal cell, in increasing order.
pub type Positions = SmallVec<[usize; 16]>;

/// One marginal cell: a subset of variable positions together with a nonzero symbol for each.
///
/// Every cell is one row of the [`ConstraintMatrix`]. A state belongs to the cell if the state
/// has these symbols at these positions, whatever its other variables are doing.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MarginalCell {
    /// The constrained variable positions, strictly increasing.
    pub positions: Positions,
    /// The symbol at each constrained position, each in `1..m`.
    pub symbols: Word,
}

impl MarginalCell {
    /// The interaction order of this cell, which is the number of variables it fixes.
    pub fn order(&self) -> usize {
        self.positions.len()
    }

    /// Returns the column index of every non-baseline state in this cell, in increasing order.
    ///
    /// Column `c` stands for the state whose decimal index is `c + 1`.
    ///
    /// ```
    /// use amari_maxent::{MarginalCell, ParameterSpace};
    /// use smallvec::smallvec;
    ///
    /// // Two ternary variables: states with the second variable set to 2 are 02, 12 and 22.
    /// let space = ParameterSpace::complete(2, 3).unwrap();
    /// let cell = MarginalCell { positions: smallvec![1], symbols: smallvec![2] };
    /// assert_eq!(cell.columns(&space), vec![1, 4, 7]);
    /// ```
    pub fn columns(&self, space: &ParameterSpace) -> Vec<usize> {
        let m = space.alphabet();
        let place = space.place_values();

        let mut value: usize = self
            .positions
            .iter()
            .zip(self.symbols.iter())
            .map(|(&pos, &symbol)| place[pos] * symbol)
            .sum();
        debug_assert!(value > 0, "cells never contain the baseline state");

        // The free positions count like an odometer whose wheels have the place values of their
        // positions. Turning the least significant wheel first visits states in increasing order.
        let mut free = Positions::new();
        let mut fixed = self.positions.iter().peekable();
        for (pos, weight) in place.iter().copied().enumerate() {
            if fixed.peek() == Some(&&pos) {
                fixed.next();
            } else {
                free.push(weight);
            }
        }

        let mut digits = Positions::from_elem(0, free.len());
        let mut columns = Vec::with_capacity(m.pow(free.len() as u32));
        loop {
            columns.push(value - 1);
            let mut wheel = free.len();
            loop {
                if wheel == 0 {
                    return columns;
                }
                wheel -= 1;
                if digits[wheel] + 1 < m {
                    digits[wheel] += 1;
                    value += free[wheel];
                    break;
                }
                value -= digits[wheel] * free[wheel];
                digits[wheel] = 0;
            }
        }
    }
}

/// Iterates over every [`MarginalCell`] of orders `1..=k`, in constraint-matrix row order.
///
/// Rows come in ascending order. Within an order, subsets are visited in lexicographic order
/// of their positions, and each subset's symbol assignments in lexicographic order of their
/// symbols. This order is part of the stored artifact format and must never change.
///
/// ```
/// use amari_maxent::{MarginalCells, ParameterSpace};
///
/// let space = ParameterSpace::new(3, 3, 2).unwrap();
/// assert_eq!(MarginalCells::new(&space).count(), space.rows());
///
/// let first: Vec<_> = MarginalCells::new(&space)
///     .take(3)
///     .map(|cell| (cell.positions.to_vec(), cell.symbols.to_vec()))
///     .collect();
/// assert_eq!(first, vec![(vec![0], vec![1]), (vec![0], vec![2]), (vec![1], vec![1])]);
/// ```
#[derive(Clone, Debug)]
pub struct MarginalCells {
    n: usize,
    top_symbol: usize,
    max_order: usize,
    next: Option<MarginalCell>,
}

impl MarginalCells {
    /// Creates an iterator over the cells of `space`, up to its order.
    pub fn new(space: &ParameterSpace) -> Self {
        MarginalCells {
            n: space.variables(),
            top_symbol: space.alphabet() - 1,
            max_order: space.order(),
            next: Some(MarginalCells::first_of_order(1)),
        }
    }

    fn first_of_order(order: usize) -> MarginalCell {
        MarginalCell {
            positions: (0..order).collect(),
            symbols: Word::from_elem(1, order),
        }
    }

    /// Advances `cell` in place, returning `false` once its order is exhausted.
    fn advance(&self, cell: &mut MarginalCell) -> bool {
        // Symbols turn fastest.
        for symbol in cell.symbols.iter_mut().rev() {
            if *symbol < self.top_symbol {
                *symbol += 1;
                return true;
            }
            *symbol = 1;
        }

        // Then move to the next subset: bump the rightmost position that still has room, and
        // pack everything after it immediately behind it.
        let order = cell.positions.len();
        let bump = (0..order)
            .rev()
            .find(|&i| cell.positions[i] < self.n - order + i);
        match bump {
            Some(i) => {
                cell.positions[i] += 1;
                for j in i + 1..order {
                    cell.positions[j] = cell.positions[j - 1] + 1;
                }
                true
            }
            None => false,
        }
    }
}

impl Iterator for MarginalCells {
    type Item = MarginalCell;

    fn next(&mut self) -> Option<MarginalCell> {
        let current = self.next.take()?;
        let mut following = current.clone();
        if self.advance(&mut following) {
            self.next = Some(following);
        } else if current.order() < self.max_order {
            self.next = Some(MarginalCells::first_of_order(current.order() + 1));
        }
        Some(current)
    }
}

impl std::iter::FusedIterator for MarginalCells {}

/// Iterates over `(row_index, column_indices)` for every row of the constraint matrix.
pub struct RowGenerator {
    space: ParameterSpace,
    cells: std::iter::Enumerate<MarginalCells>,
}

impl RowGenerator {
    /// Creates a generator over the rows of `space`, up to its order.
    pub fn new(space: &ParameterSpace) -> Self {
        RowGenerator {
            space: *space,
            cells: MarginalCells::new(space).enumerate(),
        }
    }
}

impl Iterator for RowGenerator {
    type Item = (usize, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        let (row, cell) = self.cells.next()?;
        Some((row, cell.columns(&self.space)))
    }
}

/// The sparse 0/1 design matrix mapping non-baseline state probabilities onto marginal cells.
///
/// It's stored in compressed sparse row form with implicit unit values: each row is the sorted
/// list of columns it covers. Row `r` is the `r`-th [`MarginalCell`] from [`MarginalCells`];
/// column `c` is the state with decimal index `c + 1`.
///
/// The matrix is immutable. Lower orders are served by [`ConstraintMatrix::view`], which is
/// just a prefix of the rows.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConstraintMatrix {
    space: ParameterSpace,
    indptr: Vec<usize>,
    indices: Vec<usize>,
}

impl ConstraintMatrix {
    /// Generates the matrix for every order up to `space.order()`.
    ///
    /// This is the expensive step: it touches `O(dim)` columns for every row. Progress is
    /// logged once per order.
    ///
    /// ```
    /// use amari_maxent::{ConstraintMatrix, ParameterSpace};
    ///
    /// let a = ConstraintMatrix::build(&ParameterSpace::new(2, 2, 1).unwrap());
    /// assert_eq!((a.rows(), a.cols()), (2, 3));
    /// // Row 0 is "first variable is 1": states 10 and 11, which are columns 1 and 2.
    /// assert_eq!(a.row(0), &[1, 2]);
    /// // Row 1 is "second variable is 1": states 01 and 11.
    /// assert_eq!(a.row(1), &[0, 2]);
    /// ```
    #[tracing::instrument(skip_all, fields(n = space.variables(), m = space.alphabet(), k = space.order()))]
    pub fn build(space: &ParameterSpace) -> Self {
        let start = Instant::now();
        let order_idx = space.order_idx();

        let mut indptr = Vec::with_capacity(space.rows() + 1);
        indptr.push(0);
        let mut indices = Vec::new();
        for (row, columns) in RowGenerator::new(space) {
            indices.extend_from_slice(&columns);
            indptr.push(indices.len());

            if let Some(order) = order_idx[1..].iter().position(|&end| end == row + 1) {
                info!(
                    order = order + 1,
                    rows = row + 1,
                    nnz = indices.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "order complete"
                );
            }
        }
        indices.shrink_to_fit();

        ConstraintMatrix {
            space: *space,
            indptr,
            indices,
        }
    }

    /// Reassembles a matrix from its raw compressed form, checking that it has the shape
    /// `space` implies.
    pub(crate) fn from_parts(
        space: ParameterSpace,
        indptr: Vec<usize>,
        indices: Vec<usize>,
    ) -> Result<Self> {
        if indptr.len() != space.rows() + 1 {
            return Err(MaxEntError::DimensionMismatch {
                what: "row count",
                expected: space.rows(),
                got: indptr.len().saturating_sub(1),
            });
        }
        if indptr.first() != Some(&0) || indptr.last() != Some(&indices.len()) {
            return Err(MaxEntError::invalid_parameter(
                "row pointers don't span the column indices",
            ));
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(MaxEntError::invalid_parameter("row pointers decrease"));
        }
        if let Some(&bad) = indices.iter().find(|&&c| c >= space.dim()) {
            return Err(MaxEntError::DimensionMismatch {
                what: "column index bound",
                expected: space.dim(),
                got: bad + 1,
            });
        }
        let matrix = ConstraintMatrix {
            space,
            indptr,
            indices,
        };
        if (0..matrix.rows()).any(|r| matrix.row(r).windows(2).any(|w| w[0] >= w[1])) {
            return Err(MaxEntError::invalid_parameter(
                "column indices within a row must be strictly increasing",
            ));
        }
        Ok(matrix)
    }

    /// The parameter space this matrix was built for. Its order is the highest order present.
    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    /// The highest interaction order this matrix has rows for.
    pub fn order(&self) -> usize {
        self.space.order()
    }

    /// The row boundaries of each order, as in [`ParameterSpace::order_idx`].
    pub fn order_idx(&self) -> Vec<usize> {
        self.space.order_idx()
    }

    /// Returns `true` if this matrix has rows for every order, making it square.
    pub fn is_complete(&self) -> bool {
        self.space.is_complete()
    }

    /// The number of rows.
    pub fn rows(&self) -> usize {
        self.indptr.len() - 1
    }

    /// The number of columns, which is the number of non-baseline states.
    pub fn cols(&self) -> usize {
        self.space.dim()
    }

    /// The number of nonzero entries.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// The sorted column indices of the nonzero entries in row `r`.
    pub fn row(&self, r: usize) -> &[usize] {
        &self.indices[self.indptr[r]..self.indptr[r + 1]]
    }

    pub(crate) fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub(crate) fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Returns the whole matrix as a view.
    pub fn full(&self) -> MatrixView<'_> {
        MatrixView {
            matrix: self,
            rows: self.rows(),
        }
    }

    /// Returns the rows for orders `1..=k`, without copying.
    ///
    /// Fails with [`MaxEntError::InsufficientOrder`] if this matrix was built for a lower order
    /// than `k`.
    pub fn view(&self, k: usize) -> Result<MatrixView<'_>> {
        if k == 0 {
            return Err(MaxEntError::invalid_parameter("order must be at least 1"));
        }
        if k > self.order() {
            return Err(MaxEntError::InsufficientOrder {
                built: self.order(),
                requested: k,
            });
        }
        Ok(MatrixView {
            matrix: self,
            rows: self.space.rows_for(k),
        })
    }
}

/// A row prefix of a [`ConstraintMatrix`], covering orders `1..=k` for some `k`.
#[derive(Clone, Copy, Debug)]
pub struct MatrixView<'a> {
    matrix: &'a ConstraintMatrix,
    rows: usize,
}

impl<'a> MatrixView<'a> {
    /// The number of rows in this view.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// The number of columns, which is the number of non-baseline states.
    pub fn cols(&self) -> usize {
        self.matrix.cols()
    }

    /// The sorted column indices of the nonzero entries in row `r`.
    pub fn row(&self, r: usize) -> &'a [usize] {
        debug_assert!(r < self.rows);
        self.matrix.row(r)
    }

    /// Iterates over the rows of this view.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &'a [usize]> + 'a {
        let matrix = self.matrix;
        (0..self.rows).map(move |r| matrix.row(r))
    }

    /// Computes `A * v`, where `v` has one entry per column.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(v.len(), self.cols());
        self.iter()
            .map(|row| row.iter().map(|&c| v[c]).sum())
            .collect()
    }

    /// Computes `A^T * w`, where `w` has one entry per row of this view.
    pub fn tr_mul_vec(&self, w: &[f64]) -> Vec<f64> {
        debug_assert_eq!(w.len(), self.rows);
        let mut out = vec![0.0; self.cols()];
        for (row, &weight) in self.iter().zip(w) {
            if weight != 0.0 {
                for &c in row {
                    out[c] += weight;
                }
            }
        }
        out
    }
}
