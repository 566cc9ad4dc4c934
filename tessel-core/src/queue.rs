//! Device backends.
//!
//! [`Backend`] is what the executor and the BLAS routines talk to: memory
//! management, host copies, job submission and capability queries.
//! [`HostQueue`] is the in-tree implementation. It emulates an in-order
//! device queue on the host: one worker thread drains submitted jobs in FIFO
//! order, and each job fans its work-groups out over the CPU cores.
//!
//! # Configuration
//!
//! `QueueConfig::default()` starts from the host device and applies
//! environment overrides:
//!
//! | Variable                 | Effect                                                   |
//! |--------------------------|----------------------------------------------------------|
//! | `TESSEL_PLATFORM`        | platform name; anything but `host` is treated as a GPU   |
//! | `TESSEL_LOCAL_MEMORY`    | `1/true/yes/on` or `0/false/no/off`                      |
//! | `TESSEL_MAX_ALLOC_BYTES` | cap on the total bytes of live allocations               |

use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use futures::channel::oneshot;

use crate::buffer::{Buffer, BufferPool, DevicePtr};
use crate::device::{DeviceCaps, DeviceType};
use crate::element::DeviceValue;
use crate::error::{BlasError, Result};
use crate::event::Event;

/// A unit of device work: runs once on the queue's worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Device execution backend.
///
/// Queues are in-order: a job starts only after every job submitted before it
/// on the same backend has finished, so multi-step routines may submit their
/// steps back to back without waiting in between.
pub trait Backend: Send + Sync {
    fn caps(&self) -> &DeviceCaps;

    fn device_type(&self) -> DeviceType {
        self.caps().device_type
    }

    fn has_local_memory(&self) -> bool {
        self.caps().has_local_memory
    }

    /// Allocate `len` zero-initialised elements.
    fn allocate<T: DeviceValue>(&self, len: usize) -> Result<DevicePtr<T>>;

    /// Release an allocation. Work already holding the buffer keeps it alive.
    fn deallocate<T: DeviceValue>(&self, ptr: DevicePtr<T>);

    /// Copy `src` to device memory starting at `dst`, after all earlier work.
    fn copy_to_device<T: DeviceValue>(&self, src: &[T], dst: &DevicePtr<T>) -> Result<()>;

    /// Copy `dst.len()` elements starting at `src` back to the host, after all
    /// earlier work.
    fn copy_to_host<T: DeviceValue>(&self, src: &DevicePtr<T>, dst: &mut [T]) -> Result<()>;

    fn get_buffer<T: DeviceValue>(&self, ptr: &DevicePtr<T>) -> Buffer<T> {
        Arc::clone(ptr.buffer())
    }

    fn get_offset<T: DeviceValue>(&self, ptr: &DevicePtr<T>) -> usize {
        ptr.offset()
    }

    /// Enqueue a job and return its completion handle.
    fn submit(&self, label: &'static str, job: Job) -> Event;

    /// Block until everything submitted so far has finished.
    fn wait(&self) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings for a [`HostQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub platform_name: String,
    pub is_gpu: bool,
    pub has_local_memory: bool,
    pub local_mem_bytes: usize,
    pub max_workgroup_size: usize,
    pub max_alloc_bytes: Option<usize>,
}

impl QueueConfig {
    /// The host device, without environment overrides.
    pub fn host() -> Self {
        let caps = DeviceCaps::host();
        Self {
            platform_name: caps.platform_name.clone(),
            is_gpu: false,
            has_local_memory: caps.has_local_memory,
            local_mem_bytes: caps.local_mem_bytes,
            max_workgroup_size: caps.max_workgroup_size,
            max_alloc_bytes: None,
        }
    }

    /// Apply `TESSEL_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(name) = env::var("TESSEL_PLATFORM") {
            let name = name.trim();
            if !name.is_empty() {
                self = self.with_platform(name, !name.eq_ignore_ascii_case("host"));
            }
        }
        if let Some(on) = env_bool("TESSEL_LOCAL_MEMORY") {
            self.has_local_memory = on;
        }
        if let Some(limit) = env_usize("TESSEL_MAX_ALLOC_BYTES") {
            self.max_alloc_bytes = Some(limit);
        }
        self
    }

    pub fn with_platform(mut self, name: impl Into<String>, is_gpu: bool) -> Self {
        self.platform_name = name.into();
        self.is_gpu = is_gpu;
        self
    }

    pub fn with_local_memory(mut self, on: bool) -> Self {
        self.has_local_memory = on;
        self
    }

    pub fn with_local_mem_bytes(mut self, bytes: usize) -> Self {
        self.local_mem_bytes = bytes;
        self
    }

    pub fn with_max_workgroup_size(mut self, size: usize) -> Self {
        self.max_workgroup_size = size;
        self
    }

    pub fn with_max_alloc_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_alloc_bytes = limit;
        self
    }

    fn caps(&self) -> DeviceCaps {
        DeviceCaps {
            device_type: DeviceType::from_platform(&self.platform_name, self.is_gpu),
            platform_name: self.platform_name.clone(),
            has_local_memory: self.has_local_memory,
            local_mem_bytes: self.local_mem_bytes,
            max_workgroup_size: self.max_workgroup_size,
            compute_units: DeviceCaps::host().compute_units,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::host().with_env_overrides()
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|v| parse_bool(&v))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.trim().parse::<usize>().ok())
}

// ============================================================================
// Host queue
// ============================================================================

struct Task {
    label: &'static str,
    job: Job,
    done: oneshot::Sender<Result<()>>,
}

/// In-order host-emulated device queue.
pub struct HostQueue {
    caps: DeviceCaps,
    pool: BufferPool,
    sender: Option<mpsc::Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl HostQueue {
    /// Queue configured from [`QueueConfig::default`].
    pub fn new() -> Result<Self> {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Result<Self> {
        let caps = config.caps();
        let (sender, receiver) = mpsc::channel::<Task>();
        let worker = std::thread::Builder::new()
            .name("tessel-queue".to_string())
            .spawn(move || run_worker(receiver))
            .map_err(|e| BlasError::execution("queue", e.to_string()))?;
        log::debug!(
            "host queue on {} ({}), local memory: {}",
            caps.platform_name,
            caps.device_type.name(),
            caps.has_local_memory
        );
        Ok(Self {
            caps,
            pool: BufferPool::new(config.max_alloc_bytes),
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Allocation registry of this queue.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}

fn run_worker(receiver: mpsc::Receiver<Task>) {
    for task in receiver {
        let Task { label, job, done } = task;
        log::trace!("run {label}");
        let result = panic::catch_unwind(AssertUnwindSafe(job))
            .map_err(|payload| BlasError::execution(label, panic_message(payload.as_ref())));
        if let Err(e) = &result {
            log::warn!("{e}");
        }
        // The caller may have dropped the event; nothing to report to then.
        let _ = done.send(result);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "kernel panicked".to_string()
    }
}

fn check_range<T: DeviceValue>(op: &'static str, ptr: &DevicePtr<T>, len: usize, buffer_len: usize) -> Result<()> {
    if ptr.offset() + len > buffer_len {
        return Err(BlasError::execution(
            op,
            format!(
                "{len} elements at offset {} exceed buffer {} of {buffer_len}",
                ptr.offset(),
                ptr.buffer_id()
            ),
        ));
    }
    Ok(())
}

impl Backend for HostQueue {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn allocate<T: DeviceValue>(&self, len: usize) -> Result<DevicePtr<T>> {
        self.pool.allocate(len)
    }

    fn deallocate<T: DeviceValue>(&self, ptr: DevicePtr<T>) {
        self.pool.deallocate(ptr);
    }

    fn copy_to_device<T: DeviceValue>(&self, src: &[T], dst: &DevicePtr<T>) -> Result<()> {
        check_range("copy_to_device", dst, src.len(), dst.buffer().len())?;
        self.wait()?;
        let buffer = dst.buffer();
        for (i, &v) in src.iter().enumerate() {
            buffer.write(dst.offset() + i, v);
        }
        Ok(())
    }

    fn copy_to_host<T: DeviceValue>(&self, src: &DevicePtr<T>, dst: &mut [T]) -> Result<()> {
        check_range("copy_to_host", src, dst.len(), src.buffer().len())?;
        self.wait()?;
        let buffer = src.buffer();
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = buffer.read(src.offset() + i);
        }
        Ok(())
    }

    fn submit(&self, label: &'static str, job: Job) -> Event {
        let (event, done) = Event::pending(label);
        let Some(sender) = &self.sender else {
            return Event::failed(label, BlasError::execution(label, "queue is shut down"));
        };
        log::trace!("submit {label}");
        if sender.send(Task { label, job, done }).is_err() {
            return Event::failed(label, BlasError::execution(label, "queue worker exited"));
        }
        event
    }

    fn wait(&self) -> Result<()> {
        self.submit("wait", Box::new(|| {})).wait()
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish what is queued and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostQueue")
            .field("caps", &self.caps)
            .field("live_buffers", &self.pool.live_count())
            .finish()
    }
}
