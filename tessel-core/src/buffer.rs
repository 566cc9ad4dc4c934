//! Device memory: buffers, pointers into them, and the allocation registry.
//!
//! # Design
//!
//! - A [`DeviceBuffer`] is one fixed-length, zero-initialised allocation.
//!   It is shared through `Arc`, so views and queued operations keep it alive
//!   even if the caller deallocates early.
//! - A [`DevicePtr`] is `(buffer, element offset)`: what `allocate` returns,
//!   and what pointer arithmetic (`add`) produces. The backend decomposes it
//!   back into buffer and offset when building views.
//! - The [`BufferPool`] is the registry of live allocations. It only does
//!   bookkeeping (ids, sizes, an optional byte limit); memory is released when
//!   the last `Arc` goes away.
//!
//! # Memory model
//!
//! Elements are read and written through `&self`, like device global memory
//! seen from many work-items at once. Each element sits in the atomic cell
//! its [`DeviceValue`] names and is accessed with relaxed loads and stores.
//! Kernels give work-item `i` exclusive use of the positions its index maps
//! to, so results are exact. Overlapping strided windows leave the
//! overlapped elements with unspecified values, never a data race.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::element::DeviceValue;
use crate::error::{BlasError, Result};

/// A fixed-length device allocation.
pub struct DeviceBuffer<T: DeviceValue> {
    id: u64,
    cells: Box<[T::Cell]>,
}

impl<T: DeviceValue> DeviceBuffer<T> {
    fn zeroed(id: u64, len: usize) -> Self {
        Self {
            id,
            cells: (0..len).map(|_| T::new_cell(T::default())).collect(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read element `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    #[inline(always)]
    pub fn read(&self, idx: usize) -> T {
        T::load(&self.cells[idx])
    }

    /// Write element `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    #[inline(always)]
    pub fn write(&self, idx: usize, value: T) {
        T::store(&self.cells[idx], value)
    }
}

impl<T: DeviceValue> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("len", &self.cells.len())
            .finish()
    }
}

/// Shared handle to a device buffer.
pub type Buffer<T> = Arc<DeviceBuffer<T>>;

/// A pointer into device memory: buffer plus element offset.
pub struct DevicePtr<T: DeviceValue> {
    buffer: Buffer<T>,
    offset: usize,
}

impl<T: DeviceValue> Clone for DevicePtr<T> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
        }
    }
}

impl<T: DeviceValue> DevicePtr<T> {
    /// Pointer `count` elements further into the same buffer.
    pub fn add(&self, count: usize) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset + count,
        }
    }

    pub fn buffer(&self) -> &Buffer<T> {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn buffer_id(&self) -> u64 {
        self.buffer.id
    }
}

impl<T: DeviceValue> fmt::Debug for DevicePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr(buffer={}, offset={})", self.buffer.id, self.offset)
    }
}

/// Bookkeeping for one live allocation.
#[derive(Debug, Clone, Copy)]
struct BufferMeta {
    len_elements: usize,
    element_size: usize,
    type_name: &'static str,
}

impl BufferMeta {
    fn bytes(&self) -> usize {
        self.len_elements * self.element_size
    }
}

/// Registry of live device allocations.
#[derive(Debug)]
pub struct BufferPool {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, BufferMeta>>,
    limit_bytes: Option<usize>,
}

impl BufferPool {
    /// New pool; `limit_bytes` caps the total size of live allocations.
    pub fn new(limit_bytes: Option<usize>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
            limit_bytes,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<u64, BufferMeta>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a zero-initialised buffer of `len` elements.
    pub fn allocate<T: DeviceValue>(&self, len: usize) -> Result<DevicePtr<T>> {
        let meta = BufferMeta {
            len_elements: len,
            element_size: std::mem::size_of::<T>(),
            type_name: std::any::type_name::<T>(),
        };
        let mut live = self.registry();
        if let Some(limit) = self.limit_bytes {
            let in_use: usize = live.values().map(BufferMeta::bytes).sum();
            if in_use + meta.bytes() > limit {
                return Err(BlasError::execution(
                    "allocate",
                    format!(
                        "{} bytes requested with {in_use} of {limit} bytes in use",
                        meta.bytes()
                    ),
                ));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        live.insert(id, meta);
        log::trace!("allocate buffer {id}: {len} x {}", meta.type_name);
        Ok(DevicePtr {
            buffer: Arc::new(DeviceBuffer::zeroed(id, len)),
            offset: 0,
        })
    }

    /// Remove an allocation from the registry.
    ///
    /// Returns `false` if it was not live (double free or foreign pointer).
    pub fn deallocate<T: DeviceValue>(&self, ptr: DevicePtr<T>) -> bool {
        let removed = self.registry().remove(&ptr.buffer.id).is_some();
        if !removed {
            log::warn!("deallocate of unknown buffer {}", ptr.buffer.id);
        }
        removed
    }

    pub fn contains(&self, id: u64) -> bool {
        self.registry().contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.registry().len()
    }

    pub fn live_bytes(&self) -> usize {
        self.registry().values().map(BufferMeta::bytes).sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_is_zeroed() {
        let pool = BufferPool::default();
        let ptr = pool.allocate::<f32>(16).unwrap();
        assert_eq!(ptr.buffer().len(), 16);
        assert_eq!(ptr.offset(), 0);
        for i in 0..16 {
            assert_eq!(ptr.buffer().read(i), 0.0);
        }
    }

    #[test]
    fn test_pointer_arithmetic_shares_buffer() {
        let pool = BufferPool::default();
        let base = pool.allocate::<f64>(8).unwrap();
        let p = base.add(3).add(2);
        assert_eq!(p.offset(), 5);
        assert_eq!(p.buffer_id(), base.buffer_id());
        p.buffer().write(p.offset(), 7.0);
        assert_eq!(base.buffer().read(5), 7.0);
    }

    #[test]
    fn test_accounting_and_free() {
        let pool = BufferPool::default();
        let a = pool.allocate::<f32>(10).unwrap();
        let b = pool.allocate::<f64>(10).unwrap();
        assert_eq!(pool.live_count(), 2);
        assert_eq!(pool.live_bytes(), 40 + 80);

        let id = a.buffer_id();
        assert!(pool.deallocate(a.clone()));
        assert!(!pool.contains(id));
        assert!(!pool.deallocate(a));
        assert_eq!(pool.live_bytes(), 80);
        assert!(pool.deallocate(b));
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_limit_rejects_allocation() {
        let pool = BufferPool::new(Some(64));
        let _a = pool.allocate::<f32>(16).unwrap();
        let err = pool.allocate::<f32>(1).unwrap_err();
        assert!(matches!(err, BlasError::Execution { op: "allocate", .. }));
    }

    #[test]
    fn test_deallocated_buffer_stays_alive_for_holders() {
        let pool = BufferPool::default();
        let ptr = pool.allocate::<f32>(4).unwrap();
        let held = ptr.clone();
        pool.deallocate(ptr);
        held.buffer().write(0, 1.5);
        assert_eq!(held.buffer().read(0), 1.5);
    }

    #[test]
    #[should_panic]
    fn test_out_of_range_read_panics() {
        let pool = BufferPool::default();
        let ptr = pool.allocate::<f32>(4).unwrap();
        let _ = ptr.buffer().read(4);
    }
}
