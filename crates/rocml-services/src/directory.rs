//! Device enumeration and identity for the visible GPU
//!
//! Counting and resolution ensure the session first, so a directory keeps
//! working in a fork of the process that built it.

use std::sync::Arc;

use rocml_core::{
    format_device_uuid, visible_index_from_env, ContextStatus, DeviceHandle, DeviceIdentity,
    Result, RocmlError, SessionState, DEFAULT_VISIBLE_DEVICES_VAR,
};
use tracing::{debug, warn};

use crate::session::DeviceSession;

/// Resolves the visibility list into device handles and identities
#[derive(Clone)]
pub struct DeviceDirectory {
    session: Arc<DeviceSession>,
    visibility_var: String,
}

impl DeviceDirectory {
    pub fn new(session: Arc<DeviceSession>) -> Self {
        Self::with_visibility_var(session, DEFAULT_VISIBLE_DEVICES_VAR)
    }

    pub fn with_visibility_var(session: Arc<DeviceSession>, var: impl Into<String>) -> Self {
        Self {
            session,
            visibility_var: var.into(),
        }
    }

    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    /// Number of devices, or 0 when the session is not initialized.
    /// Never fails.
    pub fn device_count(&self) -> u32 {
        self.session.ensure_initialized();
        match self.session.with_driver(|driver| driver.device_count()) {
            Some(Ok(count)) => count,
            Some(Err(e)) => {
                warn!("Failed to count GPUs: {}", e);
                0
            }
            None => 0,
        }
    }

    pub fn handle_for_index(&self, index: u32) -> DeviceHandle {
        DeviceHandle::from_index(index)
    }

    pub fn index_of(&self, handle: DeviceHandle) -> u32 {
        handle.index()
    }

    /// Handle of the first device in the visibility list (device 0 when the
    /// list is absent or unparseable). The variable is re-read on every call.
    pub fn resolve_visible_device(&self) -> Result<DeviceHandle> {
        let count = self.device_count();

        match self.session.state() {
            SessionState::DisabledUnavailable => return Err(RocmlError::DriverUnavailable),
            SessionState::DisabledLibraryNotFound => return Err(RocmlError::LibraryNotFound),
            SessionState::DisabledByConfig => return Err(RocmlError::DisabledByConfiguration),
            SessionState::Uninitialized | SessionState::Initialized => {}
        }
        if count == 0 {
            return Err(RocmlError::NoDevicesAvailable);
        }

        let index = visible_index_from_env(&self.visibility_var);
        if index >= count {
            warn!(
                "{} selects device {} but only {} are present",
                self.visibility_var, index, count
            );
        }
        Ok(self.handle_for_index(index))
    }

    /// Index plus best-effort UUID; a failed unique-id query leaves `uuid` empty
    pub fn identity_of(&self, handle: DeviceHandle) -> DeviceIdentity {
        let uuid = match self.session.with_driver(|driver| driver.unique_id(handle)) {
            Some(Ok(bytes)) => Some(format_device_uuid(&bytes)),
            Some(Err(e)) => {
                debug!("No unique id for {}: {}", handle, e);
                None
            }
            None => None,
        };

        DeviceIdentity {
            device_index: self.index_of(handle),
            uuid,
        }
    }

    /// Scan every device for a compute context owned by this process
    pub fn has_active_context(&self) -> ContextStatus {
        let count = self.device_count();
        let pid = self.session.current_pid();

        for index in 0..count {
            let handle = self.handle_for_index(index);
            let pids = match self.session.with_driver(|driver| driver.compute_process_ids(handle)) {
                Some(Ok(pids)) => pids,
                Some(Err(e)) => {
                    debug!("Could not list compute processes on {}: {}", handle, e);
                    continue;
                }
                None => return ContextStatus::NoContext,
            };

            if pids.contains(&pid) {
                return ContextStatus::Active(self.identity_of(handle));
            }
        }

        ContextStatus::NoContext
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevice, FakeDriver};
    use rocml_core::DriverError;

    fn directory(devices: Vec<FakeDevice>, var: &str) -> (Arc<FakeDriver>, DeviceDirectory) {
        let driver = Arc::new(FakeDriver::new(devices));
        let session = Arc::new(DeviceSession::new(Some(driver.clone()), Arc::new(true)));
        (driver, DeviceDirectory::with_visibility_var(session, var))
    }

    #[test]
    fn test_zero_devices() {
        let (_, dir) = directory(vec![], "ROCML_DIR_TEST_ZERO");
        assert_eq!(dir.device_count(), 0);
        assert!(matches!(
            dir.resolve_visible_device(),
            Err(RocmlError::NoDevicesAvailable)
        ));
    }

    #[test]
    fn test_visibility_order_switches_without_reinit() {
        let var = "ROCML_DIR_TEST_ORDER";
        let (driver, dir) = directory(
            vec![FakeDevice::named("a"), FakeDevice::named("b")],
            var,
        );

        std::env::set_var(var, "0,1");
        assert_eq!(dir.resolve_visible_device().unwrap().index(), 0);
        std::env::set_var(var, "1,0");
        assert_eq!(dir.resolve_visible_device().unwrap().index(), 1);
        std::env::remove_var(var);

        assert_eq!(driver.init_calls(), 1);
    }

    #[test]
    fn test_unparseable_visibility_defaults_to_first_device() {
        let var = "ROCML_DIR_TEST_GARBAGE";
        let (_, dir) = directory(vec![FakeDevice::named("a"), FakeDevice::named("b")], var);

        std::env::set_var(var, "");
        assert_eq!(dir.resolve_visible_device().unwrap().index(), 0);
        std::env::set_var(var, "gpu-1");
        assert_eq!(dir.resolve_visible_device().unwrap().index(), 0);
        std::env::remove_var(var);
    }

    #[test]
    fn test_disabled_states_map_to_errors() {
        let session = Arc::new(DeviceSession::new(None, Arc::new(true)));
        let dir = DeviceDirectory::new(session);
        assert!(matches!(
            dir.resolve_visible_device(),
            Err(RocmlError::DriverUnavailable)
        ));

        let driver = Arc::new(FakeDriver::failing_init(DriverError::LibraryNotFound(
            "librocm_smi64.so".into(),
        )));
        let dir = DeviceDirectory::new(Arc::new(DeviceSession::new(Some(driver), Arc::new(true))));
        assert!(matches!(
            dir.resolve_visible_device(),
            Err(RocmlError::LibraryNotFound)
        ));

        let driver = Arc::new(FakeDriver::new(vec![FakeDevice::named("a")]));
        let dir = DeviceDirectory::new(Arc::new(DeviceSession::new(Some(driver), Arc::new(false))));
        assert_eq!(dir.device_count(), 0);
        assert!(matches!(
            dir.resolve_visible_device(),
            Err(RocmlError::DisabledByConfiguration)
        ));
    }

    #[test]
    fn test_identity_uuid_best_effort() {
        let mut anonymous = FakeDevice::named("b");
        anonymous.unique_id = None;
        let (_, dir) = directory(vec![FakeDevice::named("a"), anonymous], "ROCML_DIR_TEST_ID");
        dir.session().ensure_initialized();

        let first = dir.identity_of(dir.handle_for_index(0));
        assert_eq!(first.device_index, 0);
        assert_eq!(
            first.uuid.as_deref(),
            Some("GPU-00000000-0000-0000-0000-000000000001")
        );

        let second = dir.identity_of(dir.handle_for_index(1));
        assert_eq!(second.device_index, 1);
        assert_eq!(second.uuid, None);
    }

    #[test]
    fn test_active_context_scans_all_devices() {
        let pid = std::process::id();
        let mut busy = FakeDevice::named("b");
        busy.compute_pids = vec![1, pid];
        let (_, dir) = directory(vec![FakeDevice::named("a"), busy], "ROCML_DIR_TEST_CTX");

        let status = dir.has_active_context();
        assert!(status.has_context());
        assert_eq!(status.device().unwrap().device_index, 1);

        // Repeatable, no side effects
        assert_eq!(dir.has_active_context(), status);
    }

    #[test]
    fn test_no_context() {
        let (_, dir) = directory(vec![FakeDevice::named("a")], "ROCML_DIR_TEST_NOCTX");
        assert_eq!(dir.has_active_context(), ContextStatus::NoContext);

        let dir = DeviceDirectory::new(Arc::new(DeviceSession::new(None, Arc::new(true))));
        assert_eq!(dir.has_active_context(), ContextStatus::NoContext);
    }
}
