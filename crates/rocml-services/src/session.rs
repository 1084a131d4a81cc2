//! Per-process ROCm SMI session
//!
//! Initialization must happen once per process, so the session records the
//! pid that performed it. State inherited across a fork is stale and gets
//! re-derived to `Uninitialized` before the next attempt.

use std::sync::{Arc, Mutex, MutexGuard};

use rocml_core::{ConfigSource, SessionState};
use tracing::{debug, info, warn};

use crate::driver::DeviceDriver;
use crate::metrics::MetricsRegistration;

type PidSource = Arc<dyn Fn() -> u32 + Send + Sync>;

struct Lifecycle {
    state: SessionState,
    owner_pid: Option<u32>,
}

pub struct DeviceSession {
    driver: Option<Arc<dyn DeviceDriver>>,
    config: Arc<dyn ConfigSource>,
    lifecycle: Mutex<Lifecycle>,
    driver_lock: Mutex<()>,
    metrics_hook: Mutex<Option<Arc<dyn MetricsRegistration>>>,
    pid: PidSource,
}

impl DeviceSession {
    /// A session without a driver starts, and stays, `DisabledUnavailable`
    pub fn new(driver: Option<Arc<dyn DeviceDriver>>, config: Arc<dyn ConfigSource>) -> Self {
        let state = if driver.is_some() {
            SessionState::Uninitialized
        } else {
            SessionState::DisabledUnavailable
        };

        Self {
            driver,
            config,
            lifecycle: Mutex::new(Lifecycle {
                state,
                owner_pid: None,
            }),
            driver_lock: Mutex::new(()),
            metrics_hook: Mutex::new(None),
            pid: Arc::new(std::process::id),
        }
    }

    /// Replace the process-id source (fork simulation in tests)
    pub fn with_pid_source(mut self, pid: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        self.pid = Arc::new(pid);
        self
    }

    pub fn with_metrics_hook(self, hook: Arc<dyn MetricsRegistration>) -> Self {
        self.set_metrics_hook(hook);
        self
    }

    /// Hook notified each time initialization succeeds in a process
    pub fn set_metrics_hook(&self, hook: Arc<dyn MetricsRegistration>) {
        *lock(&self.metrics_hook) = Some(hook);
    }

    pub fn current_pid(&self) -> u32 {
        (self.pid)()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.lifecycle).state
    }

    pub fn owner_pid(&self) -> Option<u32> {
        lock(&self.lifecycle).owner_pid
    }

    /// Initialized, and by this process
    pub fn is_initialized(&self) -> bool {
        let lifecycle = lock(&self.lifecycle);
        lifecycle.state == SessionState::Initialized && lifecycle.owner_pid == Some(self.current_pid())
    }

    /// Idempotent per-process initialization.
    ///
    /// Disabled states are terminal; a failed attempt is never retried.
    pub fn ensure_initialized(&self) {
        let pid = self.current_pid();
        let mut lifecycle = lock(&self.lifecycle);

        match (lifecycle.state, lifecycle.owner_pid) {
            (state, _) if state.is_disabled() => return,
            (SessionState::Initialized, Some(owner)) if owner == pid => return,
            (SessionState::Initialized, Some(owner)) => {
                debug!("Session initialized by pid {} is stale in pid {}", owner, pid);
                lifecycle.state = SessionState::Uninitialized;
                lifecycle.owner_pid = None;
            }
            (SessionState::Uninitialized, _) => {}
            (state, owner) => panic!(
                "Unhandled initialisation state (state={}, owner_pid={:?})",
                state, owner
            ),
        }

        if !self.config.telemetry_enabled() {
            info!("GPU diagnostics disabled by configuration");
            lifecycle.state = SessionState::DisabledByConfig;
            return;
        }

        let Some(driver) = self.driver.as_ref() else {
            lifecycle.state = SessionState::DisabledUnavailable;
            return;
        };

        let result = {
            let _guard = lock(&self.driver_lock);
            driver.initialize()
        };

        if let Err(e) = result {
            warn!("ROCm SMI initialization failed, disabling GPU diagnostics: {}", e);
            lifecycle.state = SessionState::DisabledLibraryNotFound;
            return;
        }

        lifecycle.state = SessionState::Initialized;
        lifecycle.owner_pid = Some(pid);
        drop(lifecycle);
        info!("ROCm SMI initialized in pid {}", pid);

        let hook = lock(&self.metrics_hook).clone();
        if let Some(hook) = hook {
            hook.gpu_metrics_available();
        }
    }

    /// Release the driver and return to `Uninitialized`. No-op unless this
    /// process owns an initialized session.
    pub fn shut_down(&self) {
        let pid = self.current_pid();
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.state != SessionState::Initialized || lifecycle.owner_pid != Some(pid) {
            return;
        }

        if let Some(driver) = self.driver.as_ref() {
            let _guard = lock(&self.driver_lock);
            if let Err(e) = driver.shutdown() {
                warn!("ROCm SMI shutdown failed: {}", e);
            }
        }

        lifecycle.state = SessionState::Uninitialized;
        lifecycle.owner_pid = None;
        info!("ROCm SMI shut down in pid {}", pid);
    }

    /// Run `f` against the driver, serialized with every other driver call.
    /// `None` unless this process holds an initialized session.
    pub fn with_driver<R>(&self, f: impl FnOnce(&dyn DeviceDriver) -> R) -> Option<R> {
        if !self.is_initialized() {
            return None;
        }
        let driver = self.driver.as_ref()?;
        let _guard = lock(&self.driver_lock);
        Some(f(driver.as_ref()))
    }
}

/// Session state stays consistent even if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDevice, FakeDriver};
    use rocml_core::DriverError;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    struct CountingHook(AtomicUsize);

    impl MetricsRegistration for CountingHook {
        fn gpu_metrics_available(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session_with(driver: Arc<FakeDriver>, enabled: bool) -> DeviceSession {
        DeviceSession::new(Some(driver), Arc::new(enabled))
    }

    #[test]
    fn test_initializes_once() {
        let driver = Arc::new(FakeDriver::new(vec![FakeDevice::named("gpu")]));
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let session = session_with(driver.clone(), true).with_metrics_hook(hook.clone());

        assert!(!session.is_initialized());
        for _ in 0..3 {
            session.ensure_initialized();
            assert!(session.is_initialized());
        }

        assert_eq!(driver.init_calls(), 1);
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Initialized);
        assert_eq!(session.owner_pid(), Some(std::process::id()));
    }

    #[test]
    fn test_disabled_by_config_is_sticky() {
        let driver = Arc::new(FakeDriver::new(vec![FakeDevice::named("gpu")]));
        let flag = Arc::new(AtomicBool::new(false));
        let session = DeviceSession::new(Some(driver.clone()), flag.clone());

        session.ensure_initialized();
        assert!(!session.is_initialized());
        assert_eq!(session.state(), SessionState::DisabledByConfig);

        flag.store(true, Ordering::SeqCst);
        session.ensure_initialized();
        assert!(!session.is_initialized());
        assert_eq!(session.state(), SessionState::DisabledByConfig);
        assert_eq!(driver.init_calls(), 0);
    }

    #[test]
    fn test_failed_init_is_terminal() {
        let driver = Arc::new(FakeDriver::failing_init(DriverError::DriverNotLoaded(
            "amdgpu".into(),
        )));
        let session = session_with(driver.clone(), true);

        session.ensure_initialized();
        session.ensure_initialized();

        assert_eq!(session.state(), SessionState::DisabledLibraryNotFound);
        assert_eq!(driver.init_calls(), 1);
    }

    #[test]
    fn test_no_driver_is_unavailable() {
        let session = DeviceSession::new(None, Arc::new(true));
        assert_eq!(session.state(), SessionState::DisabledUnavailable);
        session.ensure_initialized();
        assert_eq!(session.state(), SessionState::DisabledUnavailable);
        assert!(session.with_driver(|d| d.device_count()).is_none());
    }

    #[test]
    fn test_owner_change_reinitializes() {
        let driver = Arc::new(FakeDriver::new(vec![FakeDevice::named("gpu")]));
        let hook = Arc::new(CountingHook(AtomicUsize::new(0)));
        let pid = Arc::new(AtomicU32::new(100));
        let pid_source = pid.clone();
        let session = session_with(driver.clone(), true)
            .with_pid_source(move || pid_source.load(Ordering::SeqCst))
            .with_metrics_hook(hook.clone());

        session.ensure_initialized();
        assert_eq!(session.owner_pid(), Some(100));

        // Same in-memory state observed from a forked child
        pid.store(200, Ordering::SeqCst);
        assert!(!session.is_initialized());
        assert_eq!(session.state(), SessionState::Initialized);

        session.ensure_initialized();
        assert!(session.is_initialized());
        assert_eq!(session.owner_pid(), Some(200));
        assert_eq!(driver.init_calls(), 2);
        assert_eq!(hook.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shut_down_then_reinitialize() {
        let driver = Arc::new(FakeDriver::new(vec![FakeDevice::named("gpu")]));
        let session = session_with(driver.clone(), true);

        // Not initialized yet: no-op
        session.shut_down();
        assert_eq!(driver.shutdown_calls(), 0);

        session.ensure_initialized();
        session.shut_down();
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert_eq!(session.owner_pid(), None);
        assert_eq!(driver.shutdown_calls(), 1);

        session.ensure_initialized();
        assert!(session.is_initialized());
        assert_eq!(driver.init_calls(), 2);
    }

    #[test]
    fn test_concurrent_callers_initialize_once() {
        let driver = Arc::new(FakeDriver::new(vec![FakeDevice::named("gpu")]));
        let session = Arc::new(session_with(driver.clone(), true));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                std::thread::spawn(move || session.ensure_initialized())
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(session.is_initialized());
        assert_eq!(driver.init_calls(), 1);
    }
}
