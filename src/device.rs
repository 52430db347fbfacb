//! Compute device detection.

use std::sync::OnceLock;

/// Hardware the process can run numeric kernels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    Cpu,
    Cuda { devices: usize },
}

impl ComputeDevice {
    /// Detects the device once per process.
    ///
    /// Without the `cuda` feature this is always [`ComputeDevice::Cpu`].
    pub fn detect() -> Self {
        static DEVICE: OnceLock<ComputeDevice> = OnceLock::new();
        *DEVICE.get_or_init(|| match cuda_device_count() {
            Some(devices) => ComputeDevice::Cuda { devices },
            None => ComputeDevice::Cpu,
        })
    }

    pub fn is_gpu_capable(&self) -> bool {
        matches!(self, ComputeDevice::Cuda { .. })
    }
}

#[cfg(feature = "cuda")]
fn cuda_device_count() -> Option<usize> {
    use cuda_driver_sys::{cuDeviceGetCount, cuInit, CUresult};

    let mut count: std::os::raw::c_int = 0;
    // SAFETY: cuInit has no preconditions; cuDeviceGetCount writes to a valid local.
    let ok = unsafe {
        cuInit(0) == CUresult::CUDA_SUCCESS
            && cuDeviceGetCount(&mut count as *mut _) == CUresult::CUDA_SUCCESS
    };
    if ok && count > 0 {
        log::debug!("CUDA driver reports {} device(s)", count);
        Some(count as usize)
    } else {
        None
    }
}

#[cfg(not(feature = "cuda"))]
fn cuda_device_count() -> Option<usize> {
    None
}
