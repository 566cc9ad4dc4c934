// BLAS entry points mirror the classic signatures; the argument counts come with them.
// Tile kernels index staged arrays directly where iterators hurt readability.
#![allow(clippy::too_many_arguments, clippy::needless_range_loop)]

//! # Tessel BLAS
//!
//! Level-1 and Level-3 BLAS expressed as operation trees over device memory.
//!
//! Every routine builds a tree of views and functors and submits it to an
//! in-order device queue through an [`Executor`]. Calls return an
//! [`Event`](tessel_core::Event); scalar-producing routines also have
//! blocking forms that wait and copy the result back.
//!
//! ## BLAS Levels
//!
//! - **Level 1** (vector-vector): `axpy`, `copy`, `swap`, `scal`, `rot`,
//!   `rotg`, `dot`, `nrm2`, `asum`, `iamax`, `iamin`
//! - **Level 3** (matrix-matrix): `gemm`
//!
//! ## Example
//!
//! ```
//! use tessel_blas::{level1, Executor};
//! use tessel_core::{Backend, HostQueue};
//!
//! let ex = Executor::new(HostQueue::new().unwrap());
//! let x = ex.backend().allocate::<f32>(3).unwrap();
//! let y = ex.backend().allocate::<f32>(3).unwrap();
//! ex.backend().copy_to_device(&[1.0, 2.0, 3.0], &x).unwrap();
//! ex.backend().copy_to_device(&[4.0, 5.0, 6.0], &y).unwrap();
//!
//! assert_eq!(level1::dot(&ex, 3, &x, 1, &y, 1).unwrap(), 32.0);
//! ```

pub mod executor;
pub mod gemm;
pub mod level1;
pub mod level3;
pub mod reduction;

pub use executor::{Executor, ExecutorConfig, LaunchConfig};
pub use gemm::{GemmArgs, GemmVariant, TileDescriptor};
pub use level1::Givens;
pub use reduction::{
    make_add_reduction, make_max_index_reduction, make_min_index_reduction,
    reduction_scratch_len, AssignReduction,
};
