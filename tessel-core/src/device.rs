//! Device classification and capabilities.
//!
//! The GEMM dispatcher keys its tile catalog on [`DeviceType`] and picks the
//! kernel family from [`DeviceCaps::has_local_memory`]. The classification
//! mirrors how SYCL platforms report themselves: vendor from the platform
//! name, GPU-ness from the device.

use std::sync::OnceLock;

/// Device class reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    /// Anything without a dedicated tuning entry (CPUs, other vendors).
    #[default]
    Unsupported,
    IntelGpu,
    AmdGpu,
}

impl DeviceType {
    /// Classify a device from its platform name and whether it is a GPU.
    pub fn from_platform(platform_name: &str, is_gpu: bool) -> Self {
        let name = platform_name.to_lowercase();
        if is_gpu && name.contains("amd") {
            DeviceType::AmdGpu
        } else if is_gpu && name.contains("intel") {
            DeviceType::IntelGpu
        } else {
            DeviceType::Unsupported
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceType::Unsupported => "unsupported",
            DeviceType::IntelGpu => "intel-gpu",
            DeviceType::AmdGpu => "amd-gpu",
        }
    }
}

/// Capabilities the dispatch heuristics consult.
#[derive(Clone, Debug)]
pub struct DeviceCaps {
    pub device_type: DeviceType,
    pub platform_name: String,
    /// Group-local memory is dedicated fast memory (not emulated in global).
    pub has_local_memory: bool,
    pub local_mem_bytes: usize,
    pub max_workgroup_size: usize,
    pub compute_units: usize,
}

static HOST_CAPS: OnceLock<DeviceCaps> = OnceLock::new();

impl DeviceCaps {
    /// Capabilities of the host-emulated device (cached after first call).
    ///
    /// Work-group scratch is ordinary cache-resident memory, so it is
    /// reported as local memory of a typical GPU size.
    pub fn host() -> &'static DeviceCaps {
        HOST_CAPS.get_or_init(|| DeviceCaps {
            device_type: DeviceType::Unsupported,
            platform_name: "host".to_string(),
            has_local_memory: true,
            local_mem_bytes: 64 * 1024,
            max_workgroup_size: 1024,
            compute_units: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        })
    }

    /// Whether a kernel needing `scratch_bytes` of local memory and
    /// `workgroup_size` work-items can be launched on this device.
    pub fn fits(&self, scratch_bytes: usize, workgroup_size: usize) -> bool {
        self.has_local_memory
            && scratch_bytes <= self.local_mem_bytes
            && workgroup_size <= self.max_workgroup_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_platform() {
        assert_eq!(
            DeviceType::from_platform("Intel(R) OpenCL HD Graphics", true),
            DeviceType::IntelGpu
        );
        assert_eq!(
            DeviceType::from_platform("AMD Accelerated Parallel Processing", true),
            DeviceType::AmdGpu
        );
        // Vendor match alone is not enough: must be a GPU
        assert_eq!(
            DeviceType::from_platform("Intel(R) CPU Runtime", false),
            DeviceType::Unsupported
        );
        assert_eq!(
            DeviceType::from_platform("NVIDIA CUDA", true),
            DeviceType::Unsupported
        );
    }

    #[test]
    fn test_host_caps() {
        let caps = DeviceCaps::host();
        assert!(caps.compute_units > 0);
        assert_eq!(caps.device_type, DeviceType::Unsupported);
        assert!(caps.fits(caps.local_mem_bytes, caps.max_workgroup_size));
        assert!(!caps.fits(caps.local_mem_bytes + 1, 1));
        assert!(!caps.fits(0, caps.max_workgroup_size + 1));
    }
}
