//! Device session and identity types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Per-process initialization state of the ROCm SMI session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// No attempt yet made to initialize the driver
    #[default]
    Uninitialized,
    /// Driver was successfully initialized
    Initialized,
    /// No driver backend compiled in or configured
    DisabledUnavailable,
    /// Diagnostics disabled by the `diagnostics.rocml` config setting
    DisabledByConfig,
    /// Driver backend present, but ROCm SMI library or kernel driver is not
    DisabledLibraryNotFound,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initialized => "initialized",
            SessionState::DisabledUnavailable => "disabled-unavailable",
            SessionState::DisabledByConfig => "disabled-by-config",
            SessionState::DisabledLibraryNotFound => "disabled-library-not-found",
        }
    }

    /// Terminal for the lifetime of the process
    pub fn is_disabled(&self) -> bool {
        matches!(
            self,
            SessionState::DisabledUnavailable
                | SessionState::DisabledByConfig
                | SessionState::DisabledLibraryNotFound
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque device reference. The driver indexes devices contiguously, so a
/// handle is its device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceHandle(u32);

impl DeviceHandle {
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceIdentity {
    pub device_index: u32,
    /// `None` when the unique-id query failed for this device
    pub uuid: Option<String>,
}

/// Whether the current process holds a compute context on some device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "device", rename_all = "kebab-case")]
pub enum ContextStatus {
    NoContext,
    Active(DeviceIdentity),
}

impl ContextStatus {
    pub fn has_context(&self) -> bool {
        matches!(self, ContextStatus::Active(_))
    }

    pub fn device(&self) -> Option<&DeviceIdentity> {
        match self {
            ContextStatus::Active(identity) => Some(identity),
            ContextStatus::NoContext => None,
        }
    }
}

/// Render 16 unique-id bytes as `GPU-xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`
pub fn format_device_uuid(bytes: &[u8; 16]) -> String {
    format!("GPU-{}", Uuid::from_bytes(*bytes).hyphenated())
}
