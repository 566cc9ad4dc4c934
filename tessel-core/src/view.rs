//! Strided windows over device buffers: the leaves of every operation tree.
//!
//! Views are built per call and do no validation. A stride of zero, or a
//! window that runs past the end of its buffer, is a caller error; the latter
//! panics on access and the backend reports the operation as failed.

use std::sync::Arc;

use crate::buffer::{Buffer, DevicePtr};
use crate::element::DeviceValue;
use crate::layout::col_major_index;
use crate::tree::{Expr, Store};

/// `size` elements of `buffer` starting at `offset`, `stride` apart.
#[derive(Debug)]
pub struct VectorView<T: DeviceValue> {
    buffer: Buffer<T>,
    offset: usize,
    stride: isize,
    size: usize,
}

impl<T: DeviceValue> Clone for VectorView<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
            stride: self.stride,
            size: self.size,
        }
    }
}

impl<T: DeviceValue> VectorView<T> {
    pub fn new(buffer: Buffer<T>, offset: usize, stride: isize, size: usize) -> Self {
        Self {
            buffer,
            offset,
            stride,
            size,
        }
    }

    /// View starting where `ptr` points.
    pub fn from_ptr(ptr: &DevicePtr<T>, stride: isize, size: usize) -> Self {
        Self::new(Arc::clone(ptr.buffer()), ptr.offset(), stride, size)
    }

    /// Buffer position of logical element `i`: `offset + i * stride`.
    #[inline(always)]
    pub fn position(&self, i: usize) -> usize {
        (self.offset as isize + i as isize * self.stride) as usize
    }

    pub fn stride(&self) -> isize {
        self.stride
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn buffer(&self) -> &Buffer<T> {
        &self.buffer
    }
}

impl<T: DeviceValue> Expr for VectorView<T> {
    type Value = T;

    #[inline(always)]
    fn eval(&self, i: usize) -> T {
        self.buffer.read(self.position(i))
    }

    fn size(&self) -> usize {
        self.size
    }
}

impl<T: DeviceValue> Store for VectorView<T> {
    #[inline(always)]
    fn store(&self, i: usize, value: T) {
        self.buffer.write(self.position(i), value)
    }
}

/// A `rows x cols` column-major matrix at `offset` with leading dimension `ld`.
#[derive(Debug)]
pub struct MatrixView<T: DeviceValue> {
    buffer: Buffer<T>,
    rows: usize,
    cols: usize,
    offset: usize,
    ld: usize,
}

impl<T: DeviceValue> Clone for MatrixView<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            rows: self.rows,
            cols: self.cols,
            offset: self.offset,
            ld: self.ld,
        }
    }
}

impl<T: DeviceValue> MatrixView<T> {
    pub fn new(buffer: Buffer<T>, rows: usize, cols: usize, offset: usize, ld: usize) -> Self {
        Self {
            buffer,
            rows,
            cols,
            offset,
            ld,
        }
    }

    pub fn from_ptr(ptr: &DevicePtr<T>, rows: usize, cols: usize, ld: usize) -> Self {
        Self::new(Arc::clone(ptr.buffer()), rows, cols, ptr.offset(), ld)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn ld(&self) -> usize {
        self.ld
    }

    /// Element `(r, c)`.
    #[inline(always)]
    pub fn get(&self, r: usize, c: usize) -> T {
        self.buffer.read(self.offset + col_major_index(r, c, self.ld))
    }

    #[inline(always)]
    pub fn set(&self, r: usize, c: usize, value: T) {
        self.buffer
            .write(self.offset + col_major_index(r, c, self.ld), value)
    }
}

/// Matrices evaluate element-wise in column-major order: `i -> (i % rows, i / rows)`.
impl<T: DeviceValue> Expr for MatrixView<T> {
    type Value = T;

    #[inline(always)]
    fn eval(&self, i: usize) -> T {
        self.get(i % self.rows, i / self.rows)
    }

    fn size(&self) -> usize {
        self.rows * self.cols
    }
}

impl<T: DeviceValue> Store for MatrixView<T> {
    #[inline(always)]
    fn store(&self, i: usize, value: T) {
        self.set(i % self.rows, i / self.rows, value)
    }
}
