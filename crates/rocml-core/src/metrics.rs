use serde::{Deserialize, Serialize};

/// Static device facts, collected once at worker startup.
///
/// Every field is `None` when the driver does not support that query; `None`
/// is never a stand-in for zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OneTimeMetrics {
    /// Total VRAM in bytes
    pub memory_total: Option<u64>,
    pub name: Option<String>,
}

/// Polled device metrics, attached to each worker heartbeat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RealTimeMetrics {
    /// Driver-reported busy percentage
    pub utilization: Option<u32>,
    /// Used VRAM in bytes
    pub memory_used: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetrySnapshot {
    pub one_time: OneTimeMetrics,
    pub real_time: RealTimeMetrics,
}
