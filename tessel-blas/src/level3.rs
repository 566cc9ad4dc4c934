//! BLAS Level 3: Matrix-matrix operations.
//!
//! GEMM on column-major device matrices. The transpose characters are parsed
//! before anything is submitted; an invalid one is reported as
//! [`BlasError::InvalidArgument`](tessel_core::BlasError::InvalidArgument) and
//! no work reaches the queue. Dimensions and leading dimensions are otherwise
//! trusted: a window that leaves its buffer fails the returned event.

use tessel_core::queue::Backend;
use tessel_core::{DevicePtr, Element, Event, MatrixView, Result, Transpose};

use crate::executor::Executor;
use crate::gemm::GemmArgs;

/// Stored view of an operand: `rows x cols` of `op(X)` read back through the
/// transpose.
fn operand<B: Backend, T: Element>(
    ex: &Executor<B>,
    ptr: &DevicePtr<T>,
    trans: Transpose,
    rows: usize,
    cols: usize,
    ld: usize,
) -> MatrixView<T> {
    let backend = ex.backend();
    let (stored_rows, stored_cols) = if trans.is_transposed() {
        (cols, rows)
    } else {
        (rows, cols)
    };
    MatrixView::new(
        backend.get_buffer(ptr),
        stored_rows,
        stored_cols,
        backend.get_offset(ptr),
        ld,
    )
}

/// General matrix multiply: `C = alpha * op(A) * op(B) + beta * C`.
///
/// `op(A)` is `m x k`, `op(B)` is `k x n` and `C` is `m x n`. `trans_a` and
/// `trans_b` are `'n'`, `'t'` or `'c'` in either case; `'c'` reads the same as
/// `'t'` for real elements. With `beta == 0` the prior contents of C are
/// ignored, NaN included.
pub fn gemm<B: Backend, T: Element>(
    ex: &Executor<B>,
    trans_a: char,
    trans_b: char,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &DevicePtr<T>,
    lda: usize,
    b: &DevicePtr<T>,
    ldb: usize,
    beta: T,
    c: &DevicePtr<T>,
    ldc: usize,
) -> Result<Event> {
    let ta = Transpose::from_char("trans_a", trans_a)?;
    let tb = Transpose::from_char("trans_b", trans_b)?;

    let va = operand(ex, a, ta, m, k, lda);
    let vb = operand(ex, b, tb, k, n, ldb);
    let vc = operand(ex, c, Transpose::NoTrans, m, n, ldc);
    let args = GemmArgs::new(va, vb, vc, alpha, beta, m, n, k);
    Ok(ex.gemm(ta, tb, args))
}
