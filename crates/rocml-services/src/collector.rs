use std::sync::Arc;

use rocml_core::{
    DeviceHandle, DriverResult, OneTimeMetrics, RealTimeMetrics, Result, RocmlError,
    TelemetrySnapshot,
};
use tracing::instrument;

use crate::directory::DeviceDirectory;
use crate::driver::{DeviceDriver, DriverResultExt};
use crate::session::DeviceSession;

/// Reads telemetry for the visible device. Pure reads, no caching: callers
/// wanting a time series poll at their own cadence.
#[derive(Clone)]
pub struct TelemetryCollector {
    directory: DeviceDirectory,
}

impl TelemetryCollector {
    pub fn new(directory: DeviceDirectory) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        self.directory.session()
    }

    /// Static facts reported once at startup
    #[instrument(skip(self))]
    pub fn one_time(&self) -> Result<OneTimeMetrics> {
        let handle = self.directory.resolve_visible_device()?;
        self.query(|driver| {
            Ok(OneTimeMetrics {
                memory_total: driver.memory_total(handle).supported()?,
                name: driver.name(handle).supported()?,
            })
        })
    }

    /// Metrics for the periodic heartbeat
    #[instrument(skip(self))]
    pub fn real_time(&self) -> Result<RealTimeMetrics> {
        let handle = self.directory.resolve_visible_device()?;
        self.query(|driver| {
            Ok(RealTimeMetrics {
                utilization: driver.utilization(handle).supported()?,
                memory_used: driver.memory_used(handle).supported()?,
            })
        })
    }

    pub fn snapshot(&self) -> Result<TelemetrySnapshot> {
        Ok(TelemetrySnapshot {
            one_time: self.one_time()?,
            real_time: self.real_time()?,
        })
    }

    /// Identity of the device `one_time`/`real_time` report on
    pub fn visible_device(&self) -> Result<DeviceHandle> {
        self.directory.resolve_visible_device()
    }

    fn query<T>(&self, f: impl FnOnce(&dyn DeviceDriver) -> DriverResult<T>) -> Result<T> {
        // A session dropped between resolution and query reads as "no GPUs"
        let result = self
            .session()
            .with_driver(f)
            .ok_or(RocmlError::NoDevicesAvailable)?;
        Ok(result?)
    }
}
