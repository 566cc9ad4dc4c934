//! Work-group scheduling for host-emulated kernel launches.
//!
//! A launch of `num_groups` work-groups is split into contiguous runs of
//! groups, one run per CPU core, executed on `std::thread::scope` threads.
//! Groups never share state, so the split needs no synchronization.
//!
//! A panic inside a group is re-raised on the calling thread after every
//! run has finished, which lets the queue report it as a failed operation.

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Run `f(group)` for every group in `[0, num_groups)`.
#[inline]
pub fn for_each_group<F>(num_groups: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    if num_groups == 0 {
        return;
    }
    let num_threads = worker_count();
    let per_thread = num_groups.div_ceil(num_threads);

    if num_groups <= per_thread || num_threads <= 1 {
        // Small launch: run inline
        (0..num_groups).for_each(&f);
        return;
    }

    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..num_groups)
            .step_by(per_thread)
            .map(|start| {
                let end = (start + per_thread).min(num_groups);
                s.spawn(move || (start..end).for_each(f))
            })
            .collect();
        join_all(handles);
    });
}

/// Run `f(group)` for every group and collect the results in group order.
#[inline]
pub fn map_groups<F, R>(num_groups: usize, f: F) -> Vec<R>
where
    F: Fn(usize) -> R + Sync,
    R: Send,
{
    if num_groups == 0 {
        return Vec::new();
    }
    let num_threads = worker_count();
    let per_thread = num_groups.div_ceil(num_threads);

    if num_groups <= per_thread || num_threads <= 1 {
        return (0..num_groups).map(&f).collect();
    }

    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..num_groups)
            .step_by(per_thread)
            .map(|start| {
                let end = (start + per_thread).min(num_groups);
                s.spawn(move || (start..end).map(f).collect::<Vec<R>>())
            })
            .collect();
        join_all(handles).into_iter().flatten().collect()
    })
}

fn join_all<R>(handles: Vec<std::thread::ScopedJoinHandle<'_, R>>) -> Vec<R> {
    let mut out = Vec::with_capacity(handles.len());
    let mut panic = None;
    for h in handles {
        match h.join() {
            Ok(r) => out.push(r),
            Err(payload) => panic = Some(payload),
        }
    }
    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_for_each_group_visits_every_group_once() {
        let counter = AtomicUsize::new(0);
        let sum = AtomicUsize::new(0);
        for_each_group(1000, |g| {
            counter.fetch_add(1, Ordering::Relaxed);
            sum.fetch_add(g, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 1000);
        assert_eq!(sum.load(Ordering::Relaxed), (0..1000).sum::<usize>());
    }

    #[test]
    fn test_map_groups_keeps_group_order() {
        let results = map_groups(257, |g| g * 2);
        assert_eq!(results, (0..257).map(|g| g * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_launch() {
        let counter = AtomicUsize::new(0);
        for_each_group(0, |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert!(map_groups(0, |g| g).is_empty());
    }

    #[test]
    fn test_group_panic_propagates() {
        let result = std::panic::catch_unwind(|| {
            for_each_group(64, |g| {
                if g == 63 {
                    panic!("group {g} failed");
                }
            })
        });
        assert!(result.is_err());
    }
}
