//! Error types shared by every fallible operation in this crate.

use std::path::PathBuf;

/// Shorthand for results whose error is a [`MaxEntError`].
pub type Result<T> = std::result::Result<T, MaxEntError>;

/// The broad category an error falls in.
///
/// Solver non-convergence is deliberately absent: it's reported through
/// [`SolveStatus`][crate::SolveStatus] instead.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The `(n, m, k)` parameters are malformed or don't match a stored matrix.
    InvalidParameter,
    /// A vector or symbol passed in by the caller is malformed.
    InvalidInput,
    /// Reading or writing the matrix store failed.
    StorageFailure,
    /// A linear system could not be solved.
    Numerical,
}

/// Error type for all fallible operations in this crate.
#[derive(Debug, thiserror::Error)]
pub enum MaxEntError {
    /// Returned when `(n, m, k)` is outside the supported range.
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// Description of the problem.
        reason: String,
    },

    /// Returned when a loaded matrix doesn't have the shape its parameters imply.
    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Which dimension disagreed.
        what: &'static str,
        /// Value implied by the parameters.
        expected: usize,
        /// Value actually found.
        got: usize,
    },

    /// Returned when a matrix built for a lower order is asked to serve a higher one.
    #[error("matrix was built up to order {built}, but order {requested} was requested")]
    InsufficientOrder {
        /// Highest order present in the matrix.
        built: usize,
        /// Order the caller asked for.
        requested: usize,
    },

    /// Returned when a vector or symbol value is malformed.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Description of the problem.
        reason: String,
    },

    /// Returned when a vector has the wrong number of entries.
    #[error("length mismatch for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        /// Which vector was the wrong length.
        what: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// Returned when a probability vector doesn't sum to one.
    #[error("probability vector sums to {sum}, not 1")]
    NotNormalized {
        /// The sum that was found.
        sum: f64,
    },

    /// Returned when a symbol lies outside the alphabet's range.
    #[error("symbol {value} is outside the range [{min}, {max}]")]
    SymbolOutOfRange {
        /// The offending value.
        value: i64,
        /// Smallest allowed value.
        min: i64,
        /// Largest allowed value.
        max: i64,
    },

    /// Returned when the matrix store can't be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Returned when a stored artifact can't be decoded.
    #[error("corrupt matrix artifact {}: {reason}", path.display())]
    Corrupt {
        /// The artifact's path.
        path: PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// Returned when no artifact exists and building one was not allowed.
    #[error("no matrix artifact at {} and building is disabled", path.display())]
    MissingArtifact {
        /// Where the artifact was expected.
        path: PathBuf,
    },

    /// Returned when a store configuration can't be parsed.
    #[error("invalid store configuration: {reason}")]
    Config {
        /// Description of the problem.
        reason: String,
    },

    /// Returned when a sparse linear system has no unique solution.
    #[error("matrix is singular: no pivot for column {column}")]
    SingularMatrix {
        /// The column that had no usable pivot.
        column: usize,
    },
}

impl MaxEntError {
    /// Returns which category of the error taxonomy this error belongs to.
    ///
    /// ```
    /// use amari_maxent::{ErrorKind, MaxEntError};
    ///
    /// let e = MaxEntError::NotNormalized { sum: 0.5 };
    /// assert_eq!(e.kind(), ErrorKind::InvalidInput);
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            MaxEntError::InvalidParameter { .. }
            | MaxEntError::DimensionMismatch { .. }
            | MaxEntError::InsufficientOrder { .. } => ErrorKind::InvalidParameter,
            MaxEntError::InvalidInput { .. }
            | MaxEntError::LengthMismatch { .. }
            | MaxEntError::NotNormalized { .. }
            | MaxEntError::SymbolOutOfRange { .. } => ErrorKind::InvalidInput,
            MaxEntError::Io { .. }
            | MaxEntError::Corrupt { .. }
            | MaxEntError::MissingArtifact { .. }
            | MaxEntError::Config { .. } => ErrorKind::StorageFailure,
            MaxEntError::SingularMatrix { .. } => ErrorKind::Numerical,
        }
    }

    pub(crate) fn invalid_parameter(reason: impl Into<String>) -> Self {
        MaxEntError::InvalidParameter {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        MaxEntError::InvalidInput {
            reason: reason.into(),
        }
    }
}
