pub mod config;
pub mod device;
pub mod error;
pub mod metrics;
pub mod visibility;

pub use config::{ConfigSource, DiagnosticsConfig, MonitorConfig, RocmlConfig};
pub use device::{format_device_uuid, ContextStatus, DeviceHandle, DeviceIdentity, SessionState};
pub use error::{DriverError, DriverResult, Result, RocmlError};
pub use metrics::{OneTimeMetrics, RealTimeMetrics, TelemetrySnapshot};
pub use visibility::{first_visible_index, visible_index_from_env, DEFAULT_VISIBLE_DEVICES_VAR};
