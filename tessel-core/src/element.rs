//! Value types that can live in device buffers.
//!
//! Two tiers:
//! - [`DeviceValue`]: anything plain enough to be copied in and out of a
//!   device buffer (floats, index/value tuples).
//! - [`Element`]: the arithmetic scalars the BLAS routines are generic over
//!   (`f32`, `f64`).

use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use num_traits::Float;

/// A plain value storable in a [`DeviceBuffer`](crate::buffer::DeviceBuffer).
///
/// Each value type names the shared cell it is stored in. Cells are read and
/// written with relaxed atomics, so work-items touching the same element see
/// some written value rather than racing.
pub trait DeviceValue: Copy + Default + Send + Sync + Debug + 'static {
    type Cell: Send + Sync;

    fn new_cell(value: Self) -> Self::Cell;

    fn load(cell: &Self::Cell) -> Self;

    fn store(cell: &Self::Cell, value: Self);
}

macro_rules! bits_value {
    ($t:ty, $atomic:ty) => {
        impl DeviceValue for $t {
            type Cell = $atomic;

            #[inline(always)]
            fn new_cell(value: Self) -> $atomic {
                <$atomic>::new(value.to_bits())
            }

            #[inline(always)]
            fn load(cell: &$atomic) -> Self {
                <$t>::from_bits(cell.load(Ordering::Relaxed))
            }

            #[inline(always)]
            fn store(cell: &$atomic, value: Self) {
                cell.store(value.to_bits(), Ordering::Relaxed)
            }
        }
    };
}

bits_value!(f32, AtomicU32);
bits_value!(f64, AtomicU64);

impl DeviceValue for usize {
    type Cell = AtomicUsize;

    #[inline(always)]
    fn new_cell(value: Self) -> AtomicUsize {
        AtomicUsize::new(value)
    }

    #[inline(always)]
    fn load(cell: &AtomicUsize) -> Self {
        cell.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn store(cell: &AtomicUsize, value: Self) {
        cell.store(value, Ordering::Relaxed)
    }
}

/// Floating-point scalar accepted by the arithmetic routines.
pub trait Element: DeviceValue + Float {
    /// Short type tag used in log lines (`"f32"`, `"f64"`).
    const NAME: &'static str;
}

impl Element for f32 {
    const NAME: &'static str = "f32";
}

impl Element for f64 {
    const NAME: &'static str = "f64";
}

/// An element value paired with the position it was read from.
///
/// Produced by [`TupleOp`](crate::tree::TupleOp) and consumed by the
/// arg-max / arg-min reductions.
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct IndexValueTuple<T> {
    pub index: usize,
    pub value: T,
}

impl<T: Copy> IndexValueTuple<T> {
    #[inline(always)]
    pub fn new(index: usize, value: T) -> Self {
        Self { index, value }
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline(always)]
    pub fn value(&self) -> T {
        self.value
    }
}

// Index and value are stored separately; a racing reader may pair the index
// of one write with the value of another.
impl<T: DeviceValue> DeviceValue for IndexValueTuple<T> {
    type Cell = (AtomicUsize, T::Cell);

    #[inline(always)]
    fn new_cell(value: Self) -> Self::Cell {
        (AtomicUsize::new(value.index), T::new_cell(value.value))
    }

    #[inline(always)]
    fn load(cell: &Self::Cell) -> Self {
        Self::new(cell.0.load(Ordering::Relaxed), T::load(&cell.1))
    }

    #[inline(always)]
    fn store(cell: &Self::Cell, value: Self) {
        cell.0.store(value.index, Ordering::Relaxed);
        T::store(&cell.1, value.value);
    }
}

impl<T: Default> Default for IndexValueTuple<T> {
    fn default() -> Self {
        Self {
            index: usize::MAX,
            value: T::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_accessors() {
        let t = IndexValueTuple::new(3, 2.5f32);
        assert_eq!(t.index(), 3);
        assert_eq!(t.value(), 2.5);
    }

    #[test]
    fn test_tuple_default_index_is_sentinel() {
        let t = IndexValueTuple::<f64>::default();
        assert_eq!(t.index(), usize::MAX);
        assert_eq!(t.value(), 0.0);
    }

    #[test]
    fn test_cells_round_trip_bits() {
        let cell = f64::new_cell(-0.0);
        assert!(f64::load(&cell).is_sign_negative());
        f64::store(&cell, f64::NAN);
        assert!(f64::load(&cell).is_nan());

        let cell = IndexValueTuple::<f32>::new_cell(IndexValueTuple::new(7, 1.25));
        IndexValueTuple::<f32>::store(&cell, IndexValueTuple::new(2, -3.0));
        assert_eq!(IndexValueTuple::<f32>::load(&cell), IndexValueTuple::new(2, -3.0));
    }

    #[test]
    fn test_element_names() {
        assert_eq!(<f32 as Element>::NAME, "f32");
        assert_eq!(<f64 as Element>::NAME, "f64");
    }
}
