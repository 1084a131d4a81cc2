//! Device driver collaborator
//!
//! Everything that actually talks to the GPU goes through [`DeviceDriver`].
//! Implementations may not be reentrant; the session serializes calls.

#[cfg(feature = "rocm-smi")]
mod rocm_smi;

#[cfg(feature = "rocm-smi")]
pub use rocm_smi::RocmSmi;

use rocml_core::{DeviceHandle, DriverError, DriverResult};

pub trait DeviceDriver: Send + Sync {
    fn initialize(&self) -> DriverResult<()>;

    fn shutdown(&self) -> DriverResult<()>;

    fn device_count(&self) -> DriverResult<u32>;

    fn handle_for_index(&self, index: u32) -> DeviceHandle {
        DeviceHandle::from_index(index)
    }

    fn name(&self, handle: DeviceHandle) -> DriverResult<String>;

    /// Total VRAM in bytes
    fn memory_total(&self, handle: DeviceHandle) -> DriverResult<u64>;

    /// Used VRAM in bytes
    fn memory_used(&self, handle: DeviceHandle) -> DriverResult<u64>;

    fn utilization(&self, handle: DeviceHandle) -> DriverResult<u32>;

    /// Device unique id, left-padded with zeroes to 16 bytes when the driver
    /// reports something shorter than a full UUID
    fn unique_id(&self, handle: DeviceHandle) -> DriverResult<[u8; 16]>;

    /// Process ids holding a compute context on this device
    fn compute_process_ids(&self, handle: DeviceHandle) -> DriverResult<Vec<u32>>;
}

/// Turns "not supported" into an absent value instead of an error
pub trait DriverResultExt<T> {
    fn supported(self) -> DriverResult<Option<T>>;
}

impl<T> DriverResultExt<T> for DriverResult<T> {
    fn supported(self) -> DriverResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(DriverError::NotSupported(what)) => {
                tracing::debug!("Query not supported: {}", what);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Driver backend compiled into this build, if any
pub fn default_driver(smi_path: &str) -> Option<std::sync::Arc<dyn DeviceDriver>> {
    #[cfg(feature = "rocm-smi")]
    {
        Some(std::sync::Arc::new(RocmSmi::new(smi_path)))
    }
    #[cfg(not(feature = "rocm-smi"))]
    {
        let _ = smi_path;
        None
    }
}
