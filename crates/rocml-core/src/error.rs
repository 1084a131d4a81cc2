use thiserror::Error;

/// Failure reported by the device driver collaborator.
///
/// `NotSupported` is the only variant callers are expected to absorb: it
/// means one query is unavailable on this device/driver combination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("ROCm SMI library not found: {0}")]
    LibraryNotFound(String),

    #[error("AMD GPU driver not loaded: {0}")]
    DriverNotLoaded(String),

    #[error("Unknown driver error: {0}")]
    Unknown(String),

    #[error("Driver not initialized")]
    Uninitialized,
}

impl DriverError {
    pub fn is_not_supported(&self) -> bool {
        matches!(self, DriverError::NotSupported(_))
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Error, Debug)]
pub enum RocmlError {
    #[error("ROCm monitoring requires the rocm-smi driver backend to be available")]
    DriverUnavailable,

    #[error("rocm-smi backend is available, but the ROCm SMI library or driver is not")]
    LibraryNotFound,

    #[error("ROCm monitoring disabled by 'diagnostics.rocml' config setting")]
    DisabledByConfiguration,

    #[error("No GPUs available")]
    NoDevicesAvailable,

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RocmlError>;
