//! In-memory driver for exercising sessions without a GPU

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rocml_core::{DeviceHandle, DriverError, DriverResult};

use crate::driver::DeviceDriver;

/// One simulated GPU. A `None` field answers its query with `NotSupported`.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    pub name: Option<String>,
    pub memory_total: Option<u64>,
    pub memory_used: Option<u64>,
    pub utilization: Option<u32>,
    pub unique_id: Option<[u8; 16]>,
    pub compute_pids: Vec<u32>,
}

impl FakeDevice {
    pub fn named(name: &str) -> Self {
        let mut unique_id = [0u8; 16];
        unique_id[15] = name.len() as u8;
        Self {
            name: Some(name.to_string()),
            memory_total: Some(16 * 1024 * 1024 * 1024),
            memory_used: Some(512 * 1024 * 1024),
            utilization: Some(3),
            unique_id: Some(unique_id),
            compute_pids: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct FakeDriver {
    devices: Mutex<Vec<FakeDevice>>,
    init_error: Mutex<Option<DriverError>>,
    init_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

impl FakeDriver {
    pub fn new(devices: Vec<FakeDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Self::default()
        }
    }

    /// Make every `initialize` call fail with `error`
    pub fn failing_init(error: DriverError) -> Self {
        let driver = Self::default();
        *driver.init_error.lock().unwrap() = Some(error);
        driver
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn update_device(&self, index: usize, f: impl FnOnce(&mut FakeDevice)) {
        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.get_mut(index) {
            f(device);
        }
    }

    fn with_device<T>(
        &self,
        handle: DeviceHandle,
        query: &str,
        f: impl FnOnce(&FakeDevice) -> Option<T>,
    ) -> DriverResult<T> {
        let devices = self.devices.lock().unwrap();
        let device = devices
            .get(handle.index() as usize)
            .ok_or_else(|| DriverError::Unknown(format!("no device {}", handle)))?;
        f(device).ok_or_else(|| DriverError::NotSupported(query.to_string()))
    }
}

impl DeviceDriver for FakeDriver {
    fn initialize(&self) -> DriverResult<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        match self.init_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn shutdown(&self) -> DriverResult<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn device_count(&self) -> DriverResult<u32> {
        Ok(self.devices.lock().unwrap().len() as u32)
    }

    fn name(&self, handle: DeviceHandle) -> DriverResult<String> {
        self.with_device(handle, "name", |d| d.name.clone())
    }

    fn memory_total(&self, handle: DeviceHandle) -> DriverResult<u64> {
        self.with_device(handle, "memory_total", |d| d.memory_total)
    }

    fn memory_used(&self, handle: DeviceHandle) -> DriverResult<u64> {
        self.with_device(handle, "memory_used", |d| d.memory_used)
    }

    fn utilization(&self, handle: DeviceHandle) -> DriverResult<u32> {
        self.with_device(handle, "utilization", |d| d.utilization)
    }

    fn unique_id(&self, handle: DeviceHandle) -> DriverResult<[u8; 16]> {
        self.with_device(handle, "unique_id", |d| d.unique_id)
    }

    fn compute_process_ids(&self, handle: DeviceHandle) -> DriverResult<Vec<u32>> {
        self.with_device(handle, "compute_process_ids", |d| Some(d.compute_pids.clone()))
    }
}
