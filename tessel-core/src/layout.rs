//! Transpose flags and the column-major addressing rule.
//!
//! Matrices are column-major throughout tessel: element `(r, c)` of a matrix
//! with leading dimension `ld` lives at `r + c * ld`.

use crate::error::{BlasError, Result};

/// Transpose operation for a GEMM operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Transpose {
    /// No transpose.
    #[default]
    NoTrans = 111,
    /// Transpose.
    Trans = 112,
    /// Conjugate transpose. Real element types treat it as `Trans`.
    ConjTrans = 113,
}

impl Transpose {
    /// Parse a BLAS transpose character (`n`, `t`, `c`, case-insensitive).
    ///
    /// `name` identifies the argument in the error.
    pub fn from_char(name: &'static str, value: char) -> Result<Self> {
        match value.to_ascii_lowercase() {
            'n' => Ok(Transpose::NoTrans),
            't' => Ok(Transpose::Trans),
            'c' => Ok(Transpose::ConjTrans),
            _ => Err(BlasError::InvalidArgument { name, value }),
        }
    }

    /// Whether the operand is read transposed.
    #[inline(always)]
    pub fn is_transposed(self) -> bool {
        !matches!(self, Transpose::NoTrans)
    }
}

/// Linear index of element `(r, c)` in a column-major matrix.
#[inline(always)]
pub fn col_major_index(r: usize, c: usize, ld: usize) -> usize {
    r + c * ld
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_char_accepts_any_case() {
        assert_eq!(Transpose::from_char("a", 'n').unwrap(), Transpose::NoTrans);
        assert_eq!(Transpose::from_char("a", 'N').unwrap(), Transpose::NoTrans);
        assert_eq!(Transpose::from_char("a", 'T').unwrap(), Transpose::Trans);
        assert_eq!(Transpose::from_char("a", 'c').unwrap(), Transpose::ConjTrans);
    }

    #[test]
    fn test_from_char_rejects_others() {
        let err = Transpose::from_char("trans_b", 'x').unwrap_err();
        assert_eq!(
            err,
            BlasError::InvalidArgument {
                name: "trans_b",
                value: 'x'
            }
        );
    }

    #[test]
    fn test_conj_trans_is_transposed() {
        assert!(!Transpose::NoTrans.is_transposed());
        assert!(Transpose::Trans.is_transposed());
        assert!(Transpose::ConjTrans.is_transposed());
    }

    #[test]
    fn test_col_major_index() {
        // 3x2 matrix, ld = 4
        assert_eq!(col_major_index(0, 0, 4), 0);
        assert_eq!(col_major_index(2, 0, 4), 2);
        assert_eq!(col_major_index(1, 1, 4), 5);
    }
}
