//! The evaluation engine.
//!
//! An [`Executor`] owns a device backend and turns assignment-rooted
//! operation trees into kernel launches: one work-item per element, grouped
//! into work-groups of `local_size` items. Reductions and GEMM are launched
//! from `reduction.rs` and `gemm/` through the same executor.

use tessel_core::parallel::for_each_group;
use tessel_core::queue::Backend;
use tessel_core::tree::Kernel;
use tessel_core::Event;

/// Work-items per group for element-wise launches.
pub const DEFAULT_LOCAL_SIZE: usize = 128;
/// Work-items per group for reductions.
pub const DEFAULT_REDUCTION_LOCAL_SIZE: usize = 256;
/// Upper bound on the groups of one reduction pass.
pub const DEFAULT_REDUCTION_GROUPS: usize = 512;

/// Geometry of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub local_size: usize,
    /// Always a multiple of `local_size`.
    pub global_size: usize,
}

impl LaunchConfig {
    /// Enough whole groups of `local_size` to cover `n` work-items.
    pub fn for_size(n: usize, local_size: usize) -> Self {
        let local_size = local_size.max(1);
        Self {
            local_size,
            global_size: n.div_ceil(local_size) * local_size,
        }
    }

    pub fn num_groups(&self) -> usize {
        self.global_size / self.local_size
    }
}

/// Launch geometry defaults of an [`Executor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub local_size: usize,
    pub reduction_local_size: usize,
    pub reduction_groups: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            local_size: DEFAULT_LOCAL_SIZE,
            reduction_local_size: DEFAULT_REDUCTION_LOCAL_SIZE,
            reduction_groups: DEFAULT_REDUCTION_GROUPS,
        }
    }
}

impl ExecutorConfig {
    pub fn with_local_size(mut self, local_size: usize) -> Self {
        self.local_size = local_size.max(1);
        self
    }

    pub fn with_reduction_geometry(mut self, local_size: usize, groups: usize) -> Self {
        self.reduction_local_size = local_size.max(1);
        self.reduction_groups = groups.max(1);
        self
    }
}

/// Launches operation trees on a backend.
#[derive(Debug)]
pub struct Executor<B> {
    backend: B,
    config: ExecutorConfig,
}

impl<B: Backend> Executor<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, ExecutorConfig::default())
    }

    pub fn with_config(backend: B, config: ExecutorConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Launch `tree` with the default local size.
    pub fn execute<K>(&self, label: &'static str, tree: K) -> Event
    where
        K: Kernel + 'static,
    {
        self.execute_with(label, tree, self.config.local_size)
    }

    /// Launch `tree` with groups of `local_size` work-items. Work-items past
    /// the end of the tree do nothing.
    pub fn execute_with<K>(&self, label: &'static str, tree: K, local_size: usize) -> Event
    where
        K: Kernel + 'static,
    {
        let n = tree.size();
        if n == 0 {
            return Event::complete();
        }
        let launch = LaunchConfig::for_size(n, local_size);
        log::trace!(
            "{label}: {n} items, local {} global {}",
            launch.local_size,
            launch.global_size
        );
        self.backend.submit(
            label,
            Box::new(move || {
                let local = launch.local_size;
                for_each_group(launch.num_groups(), |group| {
                    let start = group * local;
                    for i in start..(start + local).min(n) {
                        tree.run(i);
                    }
                });
            }),
        )
    }
}
