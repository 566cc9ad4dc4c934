//! # Tessel Core
//!
//! Device-side building blocks for the tessel BLAS kernels.
//!
//! This crate provides:
//! - **Device memory**: reference-counted device buffers, pointers into them,
//!   and the allocation registry.
//! - **Views**: strided vector and column-major matrix windows over buffers,
//!   the leaves of every operation tree.
//! - **Operation trees**: lazily composed element-wise expressions, their
//!   functors, and the `Assign` / `DualAssign` roots that turn them into
//!   kernels.
//! - **Backend**: the device backend contract, an in-order host queue that
//!   implements it, and completion events.
//! - **Work-group launch**: parallel scheduling of work-groups on host cores.

pub mod buffer;
pub mod device;
pub mod element;
pub mod error;
pub mod event;
pub mod layout;
pub mod parallel;
pub mod queue;
pub mod tree;
pub mod view;

pub use buffer::{Buffer, BufferPool, DeviceBuffer, DevicePtr};
pub use device::{DeviceCaps, DeviceType};
pub use element::{DeviceValue, Element, IndexValueTuple};
pub use error::{BlasError, Result};
pub use event::{wait_all, Event};
pub use layout::{col_major_index, Transpose};
pub use parallel::{for_each_group, map_groups};
pub use queue::{Backend, HostQueue, Job, QueueConfig};
pub use tree::{Assign, DualAssign, Expr, Kernel, Store};
pub use view::{MatrixView, VectorView};
