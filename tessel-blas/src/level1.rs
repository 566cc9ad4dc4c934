//! BLAS Level 1: Vector-vector operations.
//!
//! Every routine wraps its device pointers in strided views, composes an
//! operation tree over them, and hands the tree to the executor. Nothing is
//! computed on the host.
//!
//! Strides are signed: element `i` of a vector lives at `ptr + i * inc`, so a
//! negative stride walks backwards from `ptr`. Lengths, strides and buffer
//! extents are not validated; a window that leaves its buffer fails the
//! submitted operation.
//!
//! Routines that produce a scalar come in two forms:
//! - `*_into` writes the result to a device pointer and returns the event;
//! - the plain form allocates a one-element result, waits, copies it back and
//!   frees it.

use tessel_core::element::DeviceValue;
use tessel_core::queue::Backend;
use tessel_core::tree::{
    AbsOp, AddOp, Assign, BinaryOp, DualAssign, PrdOp, ScalarOp, SqrtOp, SquareOp, Store,
    TupleOp, UnaryOp,
};
use tessel_core::{DevicePtr, Element, Event, IndexValueTuple, Result, VectorView};

use crate::executor::Executor;
use crate::reduction::{make_add_reduction, make_max_index_reduction, make_min_index_reduction};

/// View of `n` elements starting at `ptr`, `inc` apart.
fn vector<B: Backend, T: DeviceValue>(
    ex: &Executor<B>,
    ptr: &DevicePtr<T>,
    inc: isize,
    n: usize,
) -> VectorView<T> {
    let backend = ex.backend();
    VectorView::new(backend.get_buffer(ptr), backend.get_offset(ptr), inc, n)
}

/// Run `launch` against a fresh one-element device result and read it back.
fn blocking<B, V, F>(ex: &Executor<B>, launch: F) -> Result<V>
where
    B: Backend,
    V: DeviceValue,
    F: FnOnce(&DevicePtr<V>) -> Event,
{
    let backend = ex.backend();
    let ptr = backend.allocate::<V>(1)?;
    let result = launch(&ptr).wait().and_then(|()| {
        let mut out = [V::default()];
        backend.copy_to_host(&ptr, &mut out)?;
        Ok(out[0])
    });
    backend.deallocate(ptr);
    result
}

// ============================================================================
// AXPY: y = alpha * x + y
// ============================================================================

pub fn axpy<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    alpha: T,
    x: &DevicePtr<T>,
    incx: isize,
    y: &DevicePtr<T>,
    incy: isize,
) -> Event {
    let vx = vector(ex, x, incx, n);
    let vy = vector(ex, y, incy, n);
    let tree = Assign::new(
        vy.clone(),
        BinaryOp::new(AddOp, ScalarOp::new(PrdOp, alpha, vx), vy),
    );
    ex.execute("axpy", tree)
}

// ============================================================================
// COPY: y = x
// ============================================================================

pub fn copy<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    y: &DevicePtr<T>,
    incy: isize,
) -> Event {
    let tree = Assign::new(vector(ex, y, incy, n), vector(ex, x, incx, n));
    ex.execute("copy", tree)
}

// ============================================================================
// SWAP: x <-> y
// ============================================================================

pub fn swap<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    y: &DevicePtr<T>,
    incy: isize,
) -> Event {
    let vx = vector(ex, x, incx, n);
    let vy = vector(ex, y, incy, n);
    let tree = DualAssign::new(vy.clone(), vx.clone(), vx, vy);
    ex.execute("swap", tree)
}

// ============================================================================
// SCAL: x = alpha * x
// ============================================================================

pub fn scal<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    alpha: T,
    x: &DevicePtr<T>,
    incx: isize,
) -> Event {
    let vx = vector(ex, x, incx, n);
    let tree = Assign::new(vx.clone(), ScalarOp::new(PrdOp, alpha, vx));
    ex.execute("scal", tree)
}

// ============================================================================
// ROT: apply a plane rotation
// ============================================================================

/// `(x, y) = (c*x + s*y, c*y - s*x)` element-wise.
#[allow(clippy::too_many_arguments)]
pub fn rot<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    y: &DevicePtr<T>,
    incy: isize,
    cos: T,
    sin: T,
) -> Event {
    let vx = vector(ex, x, incx, n);
    let vy = vector(ex, y, incy, n);
    let new_x = BinaryOp::new(
        AddOp,
        ScalarOp::new(PrdOp, cos, vx.clone()),
        ScalarOp::new(PrdOp, sin, vy.clone()),
    );
    let new_y = BinaryOp::new(
        AddOp,
        ScalarOp::new(PrdOp, -sin, vx.clone()),
        ScalarOp::new(PrdOp, cos, vy.clone()),
    );
    ex.execute("rot", DualAssign::new(vx, vy, new_x, new_y))
}

/// A Givens rotation: `[c s; -s c] * [a; b] = [r; 0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Givens<T> {
    pub c: T,
    pub s: T,
    pub r: T,
    /// Reconstruction value: `s` if `|a| > |b|`, else `1/c` (or 1 when `c == 0`).
    pub z: T,
}

/// Construct the rotation that zeroes `b`. Computed on the host.
pub fn rotg<T: Element>(a: T, b: T) -> Givens<T> {
    let (abs_a, abs_b) = (a.abs(), b.abs());
    let scale = abs_a + abs_b;
    if scale.is_zero() {
        return Givens {
            c: T::one(),
            s: T::zero(),
            r: T::zero(),
            z: T::zero(),
        };
    }
    let roe = if abs_a > abs_b { a } else { b };
    let (sa, sb) = (a / scale, b / scale);
    let mut r = scale * (sa * sa + sb * sb).sqrt();
    if roe < T::zero() {
        r = -r;
    }
    let (c, s) = (a / r, b / r);
    let z = if abs_a > abs_b {
        s
    } else if !c.is_zero() {
        T::one() / c
    } else {
        T::one()
    };
    Givens { c, s, r, z }
}

// ============================================================================
// DOT: inner product
// ============================================================================

/// `result[0] = sum(x[i] * y[i])`
#[allow(clippy::too_many_arguments)]
pub fn dot_into<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    y: &DevicePtr<T>,
    incy: isize,
    result: &DevicePtr<T>,
) -> Event {
    let operand = BinaryOp::new(PrdOp, vector(ex, x, incx, n), vector(ex, y, incy, n));
    ex.reduce("dot", make_add_reduction(vector(ex, result, 1, 1), operand))
}

pub fn dot<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    y: &DevicePtr<T>,
    incy: isize,
) -> Result<T> {
    blocking(ex, |rs| dot_into(ex, n, x, incx, y, incy, rs))
}

// ============================================================================
// NRM2: Euclidean norm
// ============================================================================

/// `result[0] = sqrt(sum(x[i]^2))`: a sum-of-squares reduction followed by a
/// one-element square root.
pub fn nrm2_into<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    result: &DevicePtr<T>,
) -> Event {
    let rs = vector(ex, result, 1, 1);
    let squares = UnaryOp::new(SquareOp, vector(ex, x, incx, n));
    let sum = ex.reduce("nrm2", make_add_reduction(rs.clone(), squares));
    let root = ex.execute("nrm2", Assign::new(rs.clone(), UnaryOp::new(SqrtOp, rs)));
    sum.then(root)
}

pub fn nrm2<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
) -> Result<T> {
    blocking(ex, |rs| nrm2_into(ex, n, x, incx, rs))
}

// ============================================================================
// ASUM: sum of absolute values
// ============================================================================

pub fn asum_into<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    result: &DevicePtr<T>,
) -> Event {
    let operand = UnaryOp::new(AbsOp, vector(ex, x, incx, n));
    ex.reduce("asum", make_add_reduction(vector(ex, result, 1, 1), operand))
}

pub fn asum<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
) -> Result<T> {
    blocking(ex, |rs| asum_into(ex, n, x, incx, rs))
}

// ============================================================================
// IAMAX / IAMIN: index of the largest / smallest absolute value
// ============================================================================

/// Result of an empty arg-max/arg-min: index 0.
fn write_empty_index<B: Backend, T: Element>(
    ex: &Executor<B>,
    label: &'static str,
    result: &DevicePtr<IndexValueTuple<T>>,
) -> Event {
    let rs = vector(ex, result, 1, 1);
    ex.backend().submit(
        label,
        Box::new(move || rs.store(0, IndexValueTuple::new(0, T::zero()))),
    )
}

/// `result[0] = (i, x[i])` for the first `i` maximising `|x[i]|`.
pub fn iamax_into<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    result: &DevicePtr<IndexValueTuple<T>>,
) -> Event {
    if n == 0 {
        return write_empty_index(ex, "iamax", result);
    }
    let operand = TupleOp::new(vector(ex, x, incx, n));
    ex.reduce(
        "iamax",
        make_max_index_reduction(vector(ex, result, 1, 1), operand),
    )
}

pub fn iamax<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
) -> Result<usize> {
    blocking(ex, |rs| iamax_into(ex, n, x, incx, rs)).map(|t| t.index())
}

/// `result[0] = (i, x[i])` for the first `i` minimising `|x[i]|`.
pub fn iamin_into<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
    result: &DevicePtr<IndexValueTuple<T>>,
) -> Event {
    if n == 0 {
        return write_empty_index(ex, "iamin", result);
    }
    let operand = TupleOp::new(vector(ex, x, incx, n));
    ex.reduce(
        "iamin",
        make_min_index_reduction(vector(ex, result, 1, 1), operand),
    )
}

pub fn iamin<B: Backend, T: Element>(
    ex: &Executor<B>,
    n: usize,
    x: &DevicePtr<T>,
    incx: isize,
) -> Result<usize> {
    blocking(ex, |rs| iamin_into(ex, n, x, incx, rs)).map(|t| t.index())
}
