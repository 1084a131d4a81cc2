//! Worker-side GPU metric registration
//!
//! When a session first initializes in a process it notifies its
//! [`MetricsRegistration`] hook. [`GpuMetricsRegistrar`] reacts by attaching
//! `real_time` to the worker heartbeat and `one_time` to the startup report.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

use crate::collector::TelemetryCollector;
use crate::directory::DeviceDirectory;
use crate::session::DeviceSession;

pub const GPU_METRIC: &str = "gpu";

pub trait MetricsRegistration: Send + Sync {
    /// Called once per process, right after initialization succeeds
    fn gpu_metrics_available(&self);
}

type MetricFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Named metric producers a worker reports with each heartbeat and once at
/// startup
#[derive(Default)]
pub struct WorkerMetrics {
    heartbeat: Mutex<BTreeMap<String, MetricFn>>,
    startup: Mutex<BTreeMap<String, MetricFn>>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_metric(&self, name: impl Into<String>, f: impl Fn() -> Value + Send + Sync + 'static) {
        let name = name.into();
        debug!("Registering heartbeat metric {}", name);
        lock(&self.heartbeat).insert(name, Arc::new(f));
    }

    pub fn add_startup_information(
        &self,
        name: impl Into<String>,
        f: impl Fn() -> Value + Send + Sync + 'static,
    ) {
        let name = name.into();
        debug!("Registering startup information {}", name);
        lock(&self.startup).insert(name, Arc::new(f));
    }

    pub fn has_metric(&self, name: &str) -> bool {
        lock(&self.heartbeat).contains_key(name)
    }

    /// Evaluate every heartbeat metric now
    pub fn heartbeat(&self) -> Map<String, Value> {
        evaluate(&self.heartbeat)
    }

    pub fn startup_information(&self) -> Map<String, Value> {
        evaluate(&self.startup)
    }
}

fn evaluate(table: &Mutex<BTreeMap<String, MetricFn>>) -> Map<String, Value> {
    // Producers run outside the lock; they may call back into the session
    let producers: Vec<(String, MetricFn)> = lock(table)
        .iter()
        .map(|(name, f)| (name.clone(), f.clone()))
        .collect();
    producers.into_iter().map(|(name, f)| (name, f())).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Hook that wires GPU telemetry into [`WorkerMetrics`].
///
/// Holds weak references: the session owns this hook, so strong ones would
/// form a cycle.
pub struct GpuMetricsRegistrar {
    metrics: Weak<WorkerMetrics>,
    session: Weak<DeviceSession>,
    visibility_var: String,
}

impl GpuMetricsRegistrar {
    pub fn new(
        metrics: &Arc<WorkerMetrics>,
        session: &Arc<DeviceSession>,
        visibility_var: impl Into<String>,
    ) -> Self {
        Self {
            metrics: Arc::downgrade(metrics),
            session: Arc::downgrade(session),
            visibility_var: visibility_var.into(),
        }
    }

    /// Build the registrar and install it on `session`
    pub fn install(
        metrics: &Arc<WorkerMetrics>,
        session: &Arc<DeviceSession>,
        visibility_var: impl Into<String>,
    ) {
        let registrar = Arc::new(Self::new(metrics, session, visibility_var));
        session.set_metrics_hook(registrar);
    }
}

impl MetricsRegistration for GpuMetricsRegistrar {
    fn gpu_metrics_available(&self) {
        let (Some(metrics), Some(session)) = (self.metrics.upgrade(), self.session.upgrade()) else {
            debug!("Worker metrics or session dropped before GPU metrics registration");
            return;
        };

        let directory = DeviceDirectory::with_visibility_var(session, self.visibility_var.clone());
        let collector = TelemetryCollector::new(directory);

        let heartbeat = collector.clone();
        metrics.add_metric(GPU_METRIC, move || to_value(heartbeat.real_time()));
        metrics.add_startup_information(GPU_METRIC, move || to_value(collector.one_time()));
    }
}

fn to_value<T: serde::Serialize>(result: rocml_core::Result<T>) -> Value {
    match result.map(serde_json::to_value) {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            warn!("Failed to encode GPU metrics: {}", e);
            Value::Null
        }
        Err(e) => {
            warn!("GPU metrics unavailable: {}", e);
            Value::Null
        }
    }
}
