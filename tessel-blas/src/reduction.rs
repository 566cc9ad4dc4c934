//! The reduction engine.
//!
//! A reduction combines every element of an operand tree into one value with
//! an associative, commutative [`ReduceOp`]. It runs as a sequence of passes:
//!
//! 1. Each of `G` groups of `L` work-items accumulates a grid-stride slice of
//!    the input (work-item `gid` visits `gid, gid + G*L, ...`).
//! 2. Inside a group the `L` accumulators are folded pairwise over
//!    `log2(L)` steps, leaving one partial per group.
//! 3. The `G` partials land in a scratch buffer, and the next pass reduces
//!    that buffer the same way, until a pass runs with a single group. That
//!    pass writes the destination.
//!
//! `G` is `ceil(len / 2L)` capped at the configured group count, so every
//! work-item starts with at least two elements when there are enough.
//! All passes of one reduction are one submitted job with one completion
//! handle.
//!
//! Partials ping-pong between two scratch regions. The executor allocates
//! them per call unless the job carries caller-owned scratch of at least
//! [`reduction_scratch_len`] elements.

use tessel_core::element::DeviceValue;
use tessel_core::parallel::map_groups;
use tessel_core::queue::Backend;
use tessel_core::tree::{AddOp, Expr, MaxIndexOp, MinIndexOp, ReduceOp, Store};
use tessel_core::{BlasError, DevicePtr, Event, VectorView};

use crate::executor::Executor;

/// `dest[0] = fold(op, operand)`, ready to be launched by [`Executor::reduce`].
#[derive(Debug, Clone)]
pub struct AssignReduction<R, D, E: Expr> {
    dest: D,
    operand: E,
    local_size: Option<usize>,
    num_groups: Option<usize>,
    scratch: Option<DevicePtr<E::Value>>,
    _op: R,
}

impl<R, D, E> AssignReduction<R, D, E>
where
    E: Expr,
    D: Store<Value = E::Value>,
    R: ReduceOp<E::Value>,
{
    pub fn new(op: R, dest: D, operand: E) -> Self {
        Self {
            dest,
            operand,
            local_size: None,
            num_groups: None,
            scratch: None,
            _op: op,
        }
    }

    /// Override the executor's reduction geometry for this job.
    pub fn with_geometry(mut self, local_size: usize, num_groups: usize) -> Self {
        self.local_size = Some(local_size.max(1));
        self.num_groups = Some(num_groups.max(1));
        self
    }

    /// Keep partials in caller-owned memory instead of per-call allocations.
    /// `scratch` must hold [`reduction_scratch_len`] elements for this job's
    /// length and geometry; a shorter one fails the launch.
    pub fn with_scratch(mut self, scratch: DevicePtr<E::Value>) -> Self {
        self.scratch = Some(scratch);
        self
    }
}

/// Sum of `operand`.
pub fn make_add_reduction<D, E>(dest: D, operand: E) -> AssignReduction<AddOp, D, E>
where
    E: Expr,
    D: Store<Value = E::Value>,
    AddOp: ReduceOp<E::Value>,
{
    AssignReduction::new(AddOp, dest, operand)
}

/// First index of the largest absolute value of a tuple operand.
pub fn make_max_index_reduction<D, E>(dest: D, operand: E) -> AssignReduction<MaxIndexOp, D, E>
where
    E: Expr,
    D: Store<Value = E::Value>,
    MaxIndexOp: ReduceOp<E::Value>,
{
    AssignReduction::new(MaxIndexOp, dest, operand)
}

/// First index of the smallest absolute value of a tuple operand.
pub fn make_min_index_reduction<D, E>(dest: D, operand: E) -> AssignReduction<MinIndexOp, D, E>
where
    E: Expr,
    D: Store<Value = E::Value>,
    MinIndexOp: ReduceOp<E::Value>,
{
    AssignReduction::new(MinIndexOp, dest, operand)
}

/// Group counts of each pass over `len` elements; the last entry is always 1.
pub fn reduction_passes(len: usize, local_size: usize, max_groups: usize) -> Vec<usize> {
    let local_size = local_size.max(1);
    let max_groups = max_groups.max(1);
    let mut passes = Vec::new();
    let mut len = len;
    loop {
        let groups = len.div_ceil(2 * local_size).clamp(1, max_groups);
        passes.push(groups);
        if groups == 1 {
            return passes;
        }
        len = groups;
    }
}

/// Scratch elements a reduction of `len` elements needs: room for the
/// partials of the first two passes, which later passes reuse.
pub fn reduction_scratch_len(len: usize, local_size: usize, max_groups: usize) -> usize {
    let passes = reduction_passes(len, local_size, max_groups);
    passes.iter().take((passes.len() - 1).min(2)).sum()
}

/// Fold `values` pairwise: step `s` combines slot `i` with slot `i + half`.
fn group_fold<R, V>(values: &mut [V]) -> V
where
    V: DeviceValue,
    R: ReduceOp<V>,
{
    let mut width = values.len();
    while width > 1 {
        let half = width.div_ceil(2);
        for lid in 0..width - half {
            values[lid] = R::combine(values[lid], values[lid + half]);
        }
        width = half;
    }
    values.first().copied().unwrap_or_else(R::identity)
}

/// One pass: `groups` partials of `src` written to `dest[0..groups]`.
fn reduce_pass<R, S, D>(src: &S, dest: &D, local_size: usize, groups: usize)
where
    S: Expr,
    D: Store<Value = S::Value>,
    R: ReduceOp<S::Value>,
{
    let n = src.size();
    let global = local_size * groups;
    let partials = map_groups(groups, |group| {
        // Group-local scratch, one slot per work-item.
        let mut local: Vec<S::Value> = (0..local_size)
            .map(|lid| {
                let mut acc = R::identity();
                let mut i = group * local_size + lid;
                while i < n {
                    acc = R::combine(acc, src.eval(i));
                    i += global;
                }
                acc
            })
            .collect();
        group_fold::<R, _>(&mut local)
    });
    for (group, partial) in partials.into_iter().enumerate() {
        dest.store(group, partial);
    }
}

impl<B: Backend> Executor<B> {
    /// Launch a reduction; `dest[0]` holds the result once the event completes.
    ///
    /// An empty operand writes the identity of the combine operation.
    pub fn reduce<R, D, E>(&self, label: &'static str, job: AssignReduction<R, D, E>) -> Event
    where
        E: Expr + 'static,
        D: Store<Value = E::Value> + 'static,
        R: ReduceOp<E::Value>,
    {
        let AssignReduction {
            dest,
            operand,
            local_size,
            num_groups,
            scratch: caller_scratch,
            ..
        } = job;
        let local_size = local_size.unwrap_or(self.config().reduction_local_size);
        let max_groups = num_groups.unwrap_or(self.config().reduction_groups);
        let passes = reduction_passes(operand.size(), local_size, max_groups);
        log::debug!(
            "{label}: reduce {} items, local {local_size}, passes {passes:?}",
            operand.size()
        );

        // Ping-pong scratch: pass p writes scratch[p % 2].
        let regions = &passes[..(passes.len() - 1).min(2)];
        let mut scratch: Vec<DevicePtr<E::Value>> = Vec::new();
        if let Some(base) = caller_scratch {
            let needed: usize = regions.iter().sum();
            let available = base.buffer().len().saturating_sub(base.offset());
            if available < needed {
                let e = BlasError::execution(
                    label,
                    format!("scratch of {available} elements, {needed} needed"),
                );
                log::warn!("{e}");
                return Event::failed(label, e);
            }
            let mut at = 0;
            for &len in regions {
                scratch.push(base.add(at));
                at += len;
            }
            return self
                .submit_passes::<D, E, R>(label, operand, dest, local_size, passes, scratch);
        }
        for &len in regions {
            match self.backend().allocate::<E::Value>(len) {
                Ok(ptr) => scratch.push(ptr),
                Err(e) => {
                    log::warn!("{label}: {e}");
                    for ptr in scratch {
                        self.backend().deallocate(ptr);
                    }
                    return Event::failed(label, e);
                }
            }
        }
        let event = self.submit_passes::<D, E, R>(
            label,
            operand,
            dest,
            local_size,
            passes,
            scratch.clone(),
        );
        // The job holds its own references; only the registry entries go.
        for ptr in scratch {
            self.backend().deallocate(ptr);
        }
        event
    }

    fn submit_passes<D, E, R>(
        &self,
        label: &'static str,
        operand: E,
        dest: D,
        local_size: usize,
        passes: Vec<usize>,
        buffers: Vec<DevicePtr<E::Value>>,
    ) -> Event
    where
        E: Expr + 'static,
        D: Store<Value = E::Value> + 'static,
        R: ReduceOp<E::Value>,
    {
        self.backend().submit(
            label,
            Box::new(move || {
                let last = passes.len() - 1;
                if last == 0 {
                    reduce_pass::<R, _, _>(&operand, &dest, local_size, passes[0]);
                    return;
                }
                let view = |pass: usize| VectorView::from_ptr(&buffers[pass % 2], 1, passes[pass]);
                reduce_pass::<R, _, _>(&operand, &view(0), local_size, passes[0]);
                for pass in 1..last {
                    reduce_pass::<R, _, _>(&view(pass - 1), &view(pass), local_size, passes[pass]);
                }
                reduce_pass::<R, _, _>(&view(last - 1), &dest, local_size, passes[last]);
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tessel_core::tree::{BinaryOp, PrdOp, TupleOp};
    use tessel_core::{HostQueue, IndexValueTuple, QueueConfig};

    fn executor() -> Executor<HostQueue> {
        Executor::new(HostQueue::with_config(QueueConfig::host()).unwrap())
    }

    fn upload<T: DeviceValue>(ex: &Executor<HostQueue>, data: &[T]) -> DevicePtr<T> {
        let ptr = ex.backend().allocate::<T>(data.len()).unwrap();
        ex.backend().copy_to_device(data, &ptr).unwrap();
        ptr
    }

    fn read_one<T: DeviceValue>(ex: &Executor<HostQueue>, ptr: &DevicePtr<T>) -> T {
        let mut out = [T::default()];
        ex.backend().copy_to_host(ptr, &mut out).unwrap();
        out[0]
    }

    fn sum_with(ex: &Executor<HostQueue>, data: &[f64], local: usize, groups: usize) -> f64 {
        let x = upload(ex, data);
        let rs = upload(ex, &[0.0f64]);
        let job = make_add_reduction(
            VectorView::from_ptr(&rs, 1, 1),
            VectorView::from_ptr(&x, 1, data.len()),
        )
        .with_geometry(local, groups);
        ex.reduce("sum", job).wait().unwrap();
        read_one(ex, &rs)
    }

    #[test]
    fn test_reduction_passes() {
        assert_eq!(reduction_passes(0, 256, 512), vec![1]);
        assert_eq!(reduction_passes(512, 256, 512), vec![1]);
        assert_eq!(reduction_passes(513, 256, 512), vec![2, 1]);
        // 4 items per work-item group of 2: 100 -> 25 -> 7 -> 2 -> 1
        assert_eq!(reduction_passes(100, 2, 512), vec![25, 7, 2, 1]);
        // capped group count
        assert_eq!(reduction_passes(1 << 20, 256, 512), vec![512, 1]);
        assert_eq!(reduction_passes(1000, 1, 3), vec![3, 2, 1]);
    }

    #[test]
    fn test_group_fold_odd_width() {
        let mut v = vec![1.0f32, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(group_fold::<AddOp, _>(&mut v), 15.0);
        let mut empty: Vec<f32> = Vec::new();
        assert_eq!(group_fold::<AddOp, _>(&mut empty), 0.0);
    }

    #[test]
    fn test_dot_product() {
        let ex = executor();
        let x = upload(&ex, &[1.0f32, 2.0, 3.0]);
        let y = upload(&ex, &[4.0f32, 5.0, 6.0]);
        let rs = upload(&ex, &[0.0f32]);
        let job = make_add_reduction(
            VectorView::from_ptr(&rs, 1, 1),
            BinaryOp::new(
                PrdOp,
                VectorView::from_ptr(&x, 1, 3),
                VectorView::from_ptr(&y, 1, 3),
            ),
        );
        ex.reduce("dot", job).wait().unwrap();
        assert_eq!(read_one(&ex, &rs), 32.0);
    }

    #[test]
    fn test_sum_independent_of_geometry() {
        let ex = executor();
        // Small integers sum exactly in any order.
        let mut rng = StdRng::seed_from_u64(42);
        let data: Vec<f64> = (0..10_007).map(|_| rng.gen_range(-50..50) as f64).collect();
        let expected: f64 = data.iter().sum();
        for &(local, groups) in &[(256, 512), (1, 1), (2, 3), (7, 5), (64, 1), (128, 4096)] {
            assert_eq!(sum_with(&ex, &data, local, groups), expected, "L={local} G={groups}");
        }
    }

    #[test]
    fn test_sum_random_floats_within_tolerance() {
        let ex = executor();
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<f64> = (0..50_000).map(|_| rng.gen::<f64>()).collect();
        let expected: f64 = data.iter().sum();
        for &(local, groups) in &[(256, 512), (32, 8), (3, 1000)] {
            let got = sum_with(&ex, &data, local, groups);
            assert!((got - expected).abs() < 1e-9 * expected, "L={local} G={groups}");
        }
    }

    #[test]
    fn test_empty_sum_writes_identity() {
        let ex = executor();
        assert_eq!(sum_with(&ex, &[], 256, 512), 0.0);
    }

    #[test]
    fn test_max_index_first_occurrence_across_groups() {
        let ex = executor();
        let mut data = vec![0.5f32; 5000];
        data[1234] = -9.0;
        data[4321] = 9.0;
        let x = upload(&ex, &data);
        let rs = upload(&ex, &[IndexValueTuple::<f32>::default()]);
        for &(local, groups) in &[(256, 512), (4, 3), (1, 1)] {
            let job = make_max_index_reduction(
                VectorView::from_ptr(&rs, 1, 1),
                TupleOp::new(VectorView::from_ptr(&x, 1, data.len())),
            )
            .with_geometry(local, groups);
            ex.reduce("iamax", job).wait().unwrap();
            let t = read_one(&ex, &rs);
            assert_eq!(t.index(), 1234);
            assert_eq!(t.value(), -9.0);
        }
    }

    #[test]
    fn test_min_index() {
        let ex = executor();
        let x = upload(&ex, &[3.0f64, -1.0, 2.0, 1.0, 7.0]);
        let rs = upload(&ex, &[IndexValueTuple::<f64>::default()]);
        let job = make_min_index_reduction(
            VectorView::from_ptr(&rs, 1, 1),
            TupleOp::new(VectorView::from_ptr(&x, 1, 5)),
        )
        .with_geometry(2, 2);
        ex.reduce("iamin", job).wait().unwrap();
        assert_eq!(read_one(&ex, &rs).index(), 1);
    }

    #[test]
    fn test_scratch_is_released() {
        let ex = executor();
        let data = vec![1.0f64; 4096];
        let before = ex.backend().pool().live_count();
        assert_eq!(sum_with(&ex, &data, 4, 16), 4096.0);
        // sum_with leaves its own two buffers live; scratch is gone.
        assert_eq!(ex.backend().pool().live_count(), before + 2);
    }

    #[test]
    fn test_scratch_len() {
        assert_eq!(reduction_scratch_len(512, 256, 512), 0);
        assert_eq!(reduction_scratch_len(513, 256, 512), 2);
        // 25 -> 7 -> 2 -> 1 reuses the first two regions
        assert_eq!(reduction_scratch_len(100, 2, 512), 32);
    }

    #[test]
    fn test_caller_scratch_is_reused() {
        let ex = executor();
        let data: Vec<f64> = (1..=1000).map(f64::from).collect();
        let x = upload(&ex, &data);
        let rs = upload(&ex, &[0.0f64]);
        let scratch = ex
            .backend()
            .allocate::<f64>(1 + reduction_scratch_len(data.len(), 4, 16))
            .unwrap();
        let live = ex.backend().pool().live_count();
        for _ in 0..3 {
            let job = make_add_reduction(
                VectorView::from_ptr(&rs, 1, 1),
                VectorView::from_ptr(&x, 1, data.len()),
            )
            .with_geometry(4, 16)
            .with_scratch(scratch.add(1));
            ex.reduce("sum", job).wait().unwrap();
            assert_eq!(read_one(&ex, &rs), 500_500.0);
        }
        assert_eq!(ex.backend().pool().live_count(), live);
    }

    #[test]
    fn test_short_caller_scratch_fails() {
        let ex = executor();
        let x = upload(&ex, &vec![1.0f32; 4096]);
        let rs = upload(&ex, &[-1.0f32]);
        let scratch = ex.backend().allocate::<f32>(1).unwrap();
        let job = make_add_reduction(
            VectorView::from_ptr(&rs, 1, 1),
            VectorView::from_ptr(&x, 1, 4096),
        )
        .with_geometry(4, 16)
        .with_scratch(scratch);
        let err = ex.reduce("sum", job).wait().unwrap_err();
        assert!(matches!(err, BlasError::Execution { op: "sum", .. }));
        assert_eq!(read_one(&ex, &rs), -1.0);
    }
}
