//! Composition root for the single per-process session

use std::sync::{Arc, OnceLock};

use rocml_core::RocmlConfig;
use tracing::info;

use crate::driver::default_driver;
use crate::session::DeviceSession;

static PROCESS_SESSION: OnceLock<Arc<DeviceSession>> = OnceLock::new();

/// Build the process session on first call; later calls return the same
/// session and ignore `config`.
pub fn init_process_session(config: &RocmlConfig) -> Arc<DeviceSession> {
    PROCESS_SESSION
        .get_or_init(|| {
            let driver = default_driver(&config.diagnostics.smi_path);
            info!(
                "Creating process GPU session (driver backend: {})",
                if driver.is_some() { "rocm-smi" } else { "none" }
            );
            Arc::new(DeviceSession::new(driver, Arc::new(config.clone())))
        })
        .clone()
}

pub fn process_session() -> Option<Arc<DeviceSession>> {
    PROCESS_SESSION.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_instance() {
        let mut config = RocmlConfig::default();
        config.diagnostics.rocml = false;

        let first = init_process_session(&config);
        let second = init_process_session(&RocmlConfig::default());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &process_session().unwrap()));
    }
}
