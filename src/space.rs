use crate::error::{MaxEntError, Result};
use smallvec::SmallVec;
use std::convert::TryFrom;

/// A system state written out as one symbol per variable, most significant variable first.
pub type Word = SmallVec<[usize; 16]>;

/// How far a probability vector's sum may stray from 1.
pub const NORMALIZATION_TOLERANCE: f64 = 1e-8;

/// The shape of a finite-alphabet system: `n` variables over an alphabet of `m` symbols, with
/// marginals preserved up to interaction order `k`.
///
/// States are numbered by reading their [`Word`] as a base-`m` number, so state 0 (every
/// variable at symbol 0) is the baseline and the remaining `dim = m^n - 1` states are the
/// columns of the constraint matrix.
///
/// ```
/// use amari_maxent::ParameterSpace;
///
/// let space = ParameterSpace::new(3, 3, 2).unwrap();
/// assert_eq!(space.dim(), 26);
/// assert_eq!(space.order_length(), vec![6, 12, 8]);
/// assert_eq!(space.order_idx(), vec![0, 6, 18, 26, 27]);
/// assert_eq!(space.rows(), 18);
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ParameterSpace {
    n: usize,
    m: usize,
    k: usize,
    dim: usize,
}

impl ParameterSpace {
    /// Validates and creates a parameter space.
    ///
    /// Fails with [`MaxEntError::InvalidParameter`] unless `n >= 1`, `m >= 2`,
    /// `1 <= k <= n`, and `m^n` fits in a `usize`.
    pub fn new(n: usize, m: usize, k: usize) -> Result<Self> {
        if n == 0 {
            return Err(MaxEntError::invalid_parameter(
                "need at least one variable (n >= 1)",
            ));
        }
        if m < 2 {
            return Err(MaxEntError::invalid_parameter(format!(
                "alphabet size must be at least 2, got {}",
                m
            )));
        }
        if k == 0 || k > n {
            return Err(MaxEntError::invalid_parameter(format!(
                "order must be in [1, {}], got {}",
                n, k
            )));
        }
        let states = u32::try_from(n)
            .ok()
            .and_then(|n| m.checked_pow(n))
            .ok_or_else(|| {
                MaxEntError::invalid_parameter(format!("{}^{} states overflow a usize", m, n))
            })?;
        Ok(ParameterSpace {
            n,
            m,
            k,
            dim: states - 1,
        })
    }

    /// Creates the parameter space which keeps every order, `k = n`.
    pub fn complete(n: usize, m: usize) -> Result<Self> {
        ParameterSpace::new(n, m, n)
    }

    /// Returns the same system with a different order `k`.
    pub fn with_order(&self, k: usize) -> Result<Self> {
        ParameterSpace::new(self.n, self.m, k)
    }

    /// The number of variables.
    pub fn variables(&self) -> usize {
        self.n
    }

    /// The alphabet size.
    pub fn alphabet(&self) -> usize {
        self.m
    }

    /// The highest interaction order kept.
    pub fn order(&self) -> usize {
        self.k
    }

    /// Returns `true` if this space keeps every order, so its coordinates are exact.
    pub fn is_complete(&self) -> bool {
        self.k == self.n
    }

    /// The number of non-baseline states, `m^n - 1`.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The total number of states, including the baseline. This is the length of every
    /// probability vector.
    pub fn states(&self) -> usize {
        self.dim + 1
    }

    /// The number of marginal cells of each order, `C(n, o) * (m-1)^o` for `o` in `1..=n`.
    ///
    /// This ignores `k`; its entries always sum to [`dim`][Self::dim].
    pub fn order_length(&self) -> Vec<usize> {
        (1..=self.n)
            .map(|order| {
                // C(n, o) * (m-1)^o never exceeds m^n, which already fit.
                binomial(self.n, order) * (self.m - 1).pow(order as u32)
            })
            .collect()
    }

    /// Cumulative row boundaries by order.
    ///
    /// Entry `o` is the number of rows belonging to orders below `o + 1`, so the rows of order
    /// `o` are `order_idx[o - 1]..order_idx[o]`. The final entry is `dim + 1`, marking the
    /// baseline state that no row covers.
    pub fn order_idx(&self) -> Vec<usize> {
        let mut idx = Vec::with_capacity(self.n + 2);
        idx.push(0);
        let mut rows = 0;
        for len in self.order_length() {
            rows += len;
            idx.push(rows);
        }
        idx.push(self.dim + 1);
        idx
    }

    /// The number of rows in the constraint matrix for orders `1..=order`.
    pub fn rows_for(&self, order: usize) -> usize {
        self.order_length()[..order.min(self.n)].iter().sum()
    }

    /// The number of rows in the constraint matrix for this space's order `k`.
    pub fn rows(&self) -> usize {
        self.rows_for(self.k)
    }

    /// Spells out the state with the given decimal index.
    ///
    /// ```
    /// use amari_maxent::ParameterSpace;
    ///
    /// let space = ParameterSpace::complete(3, 3).unwrap();
    /// assert_eq!(space.state_word(5).as_slice(), &[0, 1, 2]);
    /// assert_eq!(space.state_index(&[0, 1, 2]).unwrap(), 5);
    /// ```
    pub fn state_word(&self, index: usize) -> Word {
        let mut word = Word::from_elem(0, self.n);
        let mut rest = index;
        for digit in word.iter_mut().rev() {
            *digit = rest % self.m;
            rest /= self.m;
        }
        word
    }

    /// The decimal index of a state's word.
    ///
    /// Fails with [`MaxEntError::LengthMismatch`] or [`MaxEntError::SymbolOutOfRange`] if the
    /// word isn't a state of this system.
    pub fn state_index(&self, word: &[usize]) -> Result<usize> {
        if word.len() != self.n {
            return Err(MaxEntError::LengthMismatch {
                what: "state word",
                expected: self.n,
                got: word.len(),
            });
        }
        word.iter().try_fold(0, |acc, &symbol| {
            if symbol >= self.m {
                Err(MaxEntError::SymbolOutOfRange {
                    value: i64::try_from(symbol).unwrap_or(i64::MAX),
                    min: 0,
                    max: self.m as i64 - 1,
                })
            } else {
                Ok(acc * self.m + symbol)
            }
        })
    }

    /// The weight of each variable position when a word is read as a base-`m` number.
    pub(crate) fn place_values(&self) -> SmallVec<[usize; 16]> {
        let mut weights = SmallVec::from_elem(1, self.n);
        for pos in (0..self.n.saturating_sub(1)).rev() {
            weights[pos] = weights[pos + 1] * self.m;
        }
        weights
    }

    /// Checks that `p` is a probability vector over this system's states.
    pub(crate) fn check_probabilities(&self, p: &[f64]) -> Result<()> {
        if p.len() != self.states() {
            return Err(MaxEntError::LengthMismatch {
                what: "probability vector",
                expected: self.states(),
                got: p.len(),
            });
        }
        if let Some(bad) = p.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(MaxEntError::invalid_input(format!(
                "probabilities must be finite and non-negative, found {}",
                bad
            )));
        }
        let sum: f64 = p.iter().sum();
        if (sum - 1.0).abs() > NORMALIZATION_TOLERANCE {
            return Err(MaxEntError::NotNormalized { sum });
        }
        Ok(())
    }
}

/// `C(n, k)`, computed exactly.
///
/// Every `C(n, i) * (n - i) / (i + 1)` step divides evenly, and with `n <= 64` (the most a
/// `usize` state count allows) no partial product outgrows a `u128`.
fn binomial(n: usize, k: usize) -> usize {
    let k = k.min(n - k);
    let mut c: u128 = 1;
    for i in 0..k {
        c = c * (n - i) as u128 / (i + 1) as u128;
    }
    c as usize
}

/// The [Shannon entropy][] of a probability vector, measured in bits.
///
/// [Shannon entropy]: https://en.wikipedia.org/wiki/Entropy_(information_theory)
///
/// Cells at or below machine epsilon contribute nothing. This is the plain plug-in value with
/// no correction for sampling bias.
///
/// ```
/// use amari_maxent::entropy;
///
/// assert_eq!(entropy(&[1.0, 0.0]), 0.0);
/// assert_eq!(entropy(&[0.25; 4]), 2.0);
/// ```
pub fn entropy(p: &[f64]) -> f64 {
    p.iter()
        .filter(|&&v| v > f64::EPSILON)
        .map(|&v| -v * v.log2())
        .sum()
}
