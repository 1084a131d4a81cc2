use crate::visibility::DEFAULT_VISIBLE_DEVICES_VAR;
use crate::{Result, RocmlError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

pub const ENV_DIAGNOSTICS: &str = "ROCML_DIAGNOSTICS";
pub const ENV_SMI_PATH: &str = "ROCML_SMI_PATH";
pub const ENV_MONITOR_INTERVAL_MS: &str = "ROCML_MONITOR_INTERVAL_MS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RocmlConfig {
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Master switch for GPU telemetry
    pub rocml: bool,
    pub visible_devices_var: String,
    pub smi_path: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rocml: true,
            visible_devices_var: DEFAULT_VISIBLE_DEVICES_VAR.to_string(),
            smi_path: "rocm-smi".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    /// Samples retained by the system monitor
    pub history_len: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            history_len: 7200,
        }
    }
}

impl RocmlConfig {
    /// Load a JSON config file; missing sections fall back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: RocmlConfig = serde_json::from_str(&text)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Overlay `ROCML_*` environment variables onto this config
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(ENV_DIAGNOSTICS) {
            self.diagnostics.rocml = parse_bool(&raw).ok_or_else(|| {
                RocmlError::Config(format!("{} must be a boolean, got {:?}", ENV_DIAGNOSTICS, raw))
            })?;
        }
        if let Ok(path) = std::env::var(ENV_SMI_PATH) {
            self.diagnostics.smi_path = path;
        }
        if let Ok(raw) = std::env::var(ENV_MONITOR_INTERVAL_MS) {
            self.monitor.interval_ms = raw.trim().parse().map_err(|_| {
                RocmlError::Config(format!(
                    "{} must be an integer, got {:?}",
                    ENV_MONITOR_INTERVAL_MS, raw
                ))
            })?;
        }
        Ok(self)
    }

    /// Defaults, then the optional file, then the environment
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        base.apply_env()
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Live source of the "telemetry enabled" switch, read when a session
/// leaves `Uninitialized`
pub trait ConfigSource: Send + Sync {
    fn telemetry_enabled(&self) -> bool;
}

impl ConfigSource for RocmlConfig {
    fn telemetry_enabled(&self) -> bool {
        self.diagnostics.rocml
    }
}

impl ConfigSource for bool {
    fn telemetry_enabled(&self) -> bool {
        *self
    }
}

impl ConfigSource for AtomicBool {
    fn telemetry_enabled(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}
