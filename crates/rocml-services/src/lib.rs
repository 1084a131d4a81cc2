mod collector;
mod directory;
pub mod driver;
mod metrics;
mod monitor;
mod provider;
mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use collector::TelemetryCollector;
pub use directory::DeviceDirectory;
pub use driver::{default_driver, DeviceDriver, DriverResultExt};
pub use metrics::{GpuMetricsRegistrar, MetricsRegistration, WorkerMetrics, GPU_METRIC};
pub use monitor::{MonitorInfo, MonitorSample, RangeQuery, SystemMonitor};
pub use provider::{init_process_session, process_session};
pub use session::DeviceSession;

// Re-export core types so callers only need this crate
pub use rocml_core::{
    ContextStatus, DeviceHandle, DeviceIdentity, DriverError, OneTimeMetrics, RealTimeMetrics,
    RocmlConfig, RocmlError, SessionState, TelemetrySnapshot,
};
