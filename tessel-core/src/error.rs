//! Error type shared by the core and the BLAS routines.

use thiserror::Error;

/// Failures reported by tessel operations.
///
/// Only the GEMM transpose characters are validated up front. Everything else
/// that can go wrong surfaces as an [`BlasError::Execution`] of the submitted
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlasError {
    /// An argument outside its accepted set, rejected before any submission.
    #[error("invalid argument {name}: {value:?}")]
    InvalidArgument { name: &'static str, value: char },

    /// The backend could not allocate or run the operation.
    #[error("{op} failed: {reason}")]
    Execution { op: &'static str, reason: String },
}

impl BlasError {
    pub fn execution(op: &'static str, reason: impl Into<String>) -> Self {
        BlasError::Execution {
            op,
            reason: reason.into(),
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, BlasError::InvalidArgument { .. })
    }
}

pub type Result<T> = std::result::Result<T, BlasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = BlasError::InvalidArgument {
            name: "trans_a",
            value: 'x',
        };
        assert_eq!(e.to_string(), "invalid argument trans_a: 'x'");

        let e = BlasError::execution("allocate", "limit of 64 bytes exceeded");
        assert_eq!(e.to_string(), "allocate failed: limit of 64 bytes exceeded");
        assert!(!e.is_invalid_argument());
    }
}
