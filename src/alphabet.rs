use crate::error::{MaxEntError, Result};

/// Converts symbols between the unsigned alphabet `0..m` and the symmetric signed range
/// `-l..=l`, where `l = (m - 1) / 2`.
///
/// Nonnegative symbols are the same in both encodings; signed symbol `-s` is unsigned symbol
/// `m - s`.
///
/// ```
/// use amari_maxent::SignConverter;
///
/// let signs = SignConverter::new(5).unwrap();
/// let mut x = vec![-2, -1, 0, 1, 2];
/// signs.to_unsigned(&mut x).unwrap();
/// assert_eq!(x, vec![3, 4, 0, 1, 2]);
/// signs.to_signed(&mut x).unwrap();
/// assert_eq!(x, vec![-2, -1, 0, 1, 2]);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SignConverter {
    m: i64,
    l: i64,
}

impl SignConverter {
    /// Creates a converter for an alphabet of `m` symbols.
    ///
    /// Only odd alphabets have a symmetric signed range, so even `m` (and `m < 3`) fail with
    /// [`MaxEntError::InvalidParameter`].
    pub fn new(m: usize) -> Result<Self> {
        if m < 3 || m % 2 == 0 || m > i64::MAX as usize {
            return Err(MaxEntError::invalid_parameter(format!(
                "signed conversion needs an odd alphabet of at least 3 symbols, got {}",
                m
            )));
        }
        let m = m as i64;
        Ok(SignConverter { m, l: (m - 1) / 2 })
    }

    /// The largest signed symbol, `l`.
    pub fn half_width(&self) -> i64 {
        self.l
    }

    /// Shifts negative symbols up by `m`, in place.
    ///
    /// Fails with [`MaxEntError::SymbolOutOfRange`], leaving `x` untouched, if any value is
    /// outside `-l..=l`.
    pub fn to_unsigned(&self, x: &mut [i64]) -> Result<()> {
        check_range(x, -self.l, self.l)?;
        for v in x.iter_mut().filter(|v| **v < 0) {
            *v += self.m;
        }
        Ok(())
    }

    /// Shifts symbols greater than `l` down by `m`, in place.
    ///
    /// Fails with [`MaxEntError::SymbolOutOfRange`], leaving `x` untouched, if any value is
    /// outside `0..m`.
    pub fn to_signed(&self, x: &mut [i64]) -> Result<()> {
        check_range(x, 0, self.m - 1)?;
        for v in x.iter_mut().filter(|v| **v > self.l) {
            *v -= self.m;
        }
        Ok(())
    }
}

fn check_range(x: &[i64], min: i64, max: i64) -> Result<()> {
    match x.iter().find(|&&v| v < min || v > max) {
        Some(&value) => Err(MaxEntError::SymbolOutOfRange { value, min, max }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn rejects_even_alphabets() {
        for &m in &[0, 1, 2, 4, 10] {
            let e = SignConverter::new(m).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::InvalidParameter);
        }
        assert_eq!(SignConverter::new(7).unwrap().half_width(), 3);
    }

    #[test]
    fn round_trips() {
        let signs = SignConverter::new(7).unwrap();
        let original: Vec<i64> = (0..7).collect();
        let mut x = original.clone();
        signs.to_signed(&mut x).unwrap();
        assert_eq!(x, vec![0, 1, 2, 3, -3, -2, -1]);
        signs.to_unsigned(&mut x).unwrap();
        assert_eq!(x, original);
    }

    #[test]
    fn out_of_range_leaves_input_alone() {
        let signs = SignConverter::new(3).unwrap();

        let mut x = vec![-1, 0, 2];
        assert!(matches!(
            signs.to_unsigned(&mut x),
            Err(MaxEntError::SymbolOutOfRange {
                value: 2,
                min: -1,
                max: 1
            })
        ));
        assert_eq!(x, vec![-1, 0, 2]);

        let mut x = vec![2, 3];
        let e = signs.to_signed(&mut x).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidInput);
        assert_eq!(x, vec![2, 3]);

        let mut x = vec![-1];
        assert!(signs.to_signed(&mut x).is_err());
    }
}
