use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument, warn};

use rocml_core::{MonitorConfig, OneTimeMetrics};

use crate::collector::TelemetryCollector;

/// One polled GPU reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSample {
    /// Seconds since the Unix epoch
    pub time: f64,
    pub gpu_utilization: Option<u32>,
    pub gpu_memory_used: Option<u64>,
}

/// Column-oriented slice of the monitor history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    pub time: Vec<f64>,
    pub gpu_utilization: Vec<Option<u32>>,
    pub gpu_memory_used: Vec<Option<u64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub range_query: RangeQuery,
    /// Total samples ever recorded, including ones rotated out
    pub count: u64,
    pub last_time: Option<f64>,
    pub gpu_name: Option<String>,
    pub gpu_memory_total: Option<u64>,
}

struct History {
    samples: VecDeque<MonitorSample>,
    count: u64,
}

impl History {
    fn record(&mut self, sample: MonitorSample, history_len: usize) {
        if self.samples.len() == history_len {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.count += 1;
    }
}

/// Bounded history of GPU readings, in the manner of a worker system monitor
pub struct SystemMonitor {
    collector: TelemetryCollector,
    interval: Duration,
    history_len: usize,
    history: Arc<Mutex<History>>,
}

impl SystemMonitor {
    pub fn new(collector: TelemetryCollector, config: &MonitorConfig) -> Self {
        Self {
            collector,
            interval: Duration::from_millis(config.interval_ms),
            history_len: config.history_len.max(1),
            history: Arc::new(Mutex::new(History {
                samples: VecDeque::new(),
                count: 0,
            })),
        }
    }

    /// Poll the device once and record the reading. `None` when telemetry is
    /// unavailable; nothing is recorded then.
    pub fn update(&self) -> Option<MonitorSample> {
        let metrics = match self.collector.real_time() {
            Ok(metrics) => metrics,
            Err(e) => {
                debug!("Skipping GPU sample: {}", e);
                return None;
            }
        };

        let sample = MonitorSample {
            time: now_secs(),
            gpu_utilization: metrics.utilization,
            gpu_memory_used: metrics.memory_used,
        };

        self.lock_history().record(sample.clone(), self.history_len);
        Some(sample)
    }

    pub fn recent(&self) -> Option<MonitorSample> {
        self.lock_history().samples.back().cloned()
    }

    pub fn count(&self) -> u64 {
        self.lock_history().count
    }

    pub fn len(&self) -> usize {
        self.lock_history().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples with absolute sequence number `>= start`. Samples already
    /// rotated out of the history are silently skipped.
    pub fn range_query(&self, start: u64) -> RangeQuery {
        let history = self.lock_history();
        let first_seq = history.count - history.samples.len() as u64;
        let skip = start.saturating_sub(first_seq) as usize;

        let mut out = RangeQuery::default();
        for sample in history.samples.iter().skip(skip) {
            out.time.push(sample.time);
            out.gpu_utilization.push(sample.gpu_utilization);
            out.gpu_memory_used.push(sample.gpu_memory_used);
        }
        out
    }

    /// History since `start`, plus the static device facts
    pub fn info(&self, start: u64) -> MonitorInfo {
        let one_time = self.collector.one_time().unwrap_or_else(|e| {
            debug!("No static GPU facts: {}", e);
            OneTimeMetrics::default()
        });

        MonitorInfo {
            range_query: self.range_query(start),
            count: self.count(),
            last_time: self.recent().map(|s| s.time),
            gpu_name: one_time.name,
            gpu_memory_total: one_time.memory_total,
        }
    }

    /// Poll on a background thread at the configured interval. Samples are
    /// recorded in the history as well as sent. The thread exits once the
    /// receiver is dropped.
    #[instrument(skip(self), fields(interval_ms = self.interval.as_millis()))]
    pub fn subscribe(&self) -> Receiver<Option<MonitorSample>> {
        info!("Starting GPU monitor subscription");
        let (tx, rx) = channel();
        let collector = self.collector.clone();
        let interval = self.interval;
        let history = self.history.clone();
        let history_len = self.history_len;

        thread::spawn(move || {
            let mut connected_logged = false;

            loop {
                let sample = match collector.real_time() {
                    Ok(metrics) => {
                        if !connected_logged {
                            info!("GPU monitor connected");
                            connected_logged = true;
                        }
                        Some(MonitorSample {
                            time: now_secs(),
                            gpu_utilization: metrics.utilization,
                            gpu_memory_used: metrics.memory_used,
                        })
                    }
                    Err(e) => {
                        if connected_logged {
                            warn!("GPU monitor disconnected: {}", e);
                            connected_logged = false;
                        }
                        None
                    }
                };

                if let Some(sample) = &sample {
                    lock(&history).record(sample.clone(), history_len);
                }

                if tx.send(sample).is_err() {
                    debug!("GPU monitor channel closed, stopping");
                    break;
                }

                thread::sleep(interval);
            }
        });

        rx
    }

    fn lock_history(&self) -> MutexGuard<'_, History> {
        lock(&self.history)
    }
}

fn lock(history: &Mutex<History>) -> MutexGuard<'_, History> {
    history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DeviceDirectory;
    use crate::session::DeviceSession;
    use crate::testing::{FakeDevice, FakeDriver};
    use std::sync::Arc;

    fn monitor(devices: Vec<FakeDevice>, history_len: usize) -> (Arc<FakeDriver>, SystemMonitor) {
        let driver = Arc::new(FakeDriver::new(devices));
        let session = Arc::new(DeviceSession::new(Some(driver.clone()), Arc::new(true)));
        let directory = DeviceDirectory::with_visibility_var(session, "ROCML_MONITOR_TEST_VISIBLE");
        let config = MonitorConfig {
            interval_ms: 5,
            history_len,
        };
        (driver, SystemMonitor::new(TelemetryCollector::new(directory), &config))
    }

    #[test]
    fn test_history_is_bounded() {
        let (driver, monitor) = monitor(vec![FakeDevice::named("a")], 3);
        for util in 0..5 {
            driver.update_device(0, |d| d.utilization = Some(util));
            monitor.update().unwrap();
        }

        assert_eq!(monitor.len(), 3);
        assert_eq!(monitor.count(), 5);
        assert_eq!(monitor.recent().unwrap().gpu_utilization, Some(4));

        let all = monitor.range_query(0);
        assert_eq!(all.gpu_utilization, vec![Some(2), Some(3), Some(4)]);

        let tail = monitor.range_query(4);
        assert_eq!(tail.gpu_utilization, vec![Some(4)]);
        assert!(monitor.range_query(5).time.is_empty());
    }

    #[test]
    fn test_update_without_devices_records_nothing() {
        let (_, monitor) = monitor(vec![], 10);
        assert!(monitor.update().is_none());
        assert!(monitor.is_empty());
        assert_eq!(monitor.count(), 0);
    }

    #[test]
    fn test_info_includes_static_facts() {
        let (_, monitor) = monitor(vec![FakeDevice::named("Radeon VII")], 10);
        monitor.update();
        let info = monitor.info(0);

        assert_eq!(info.count, 1);
        assert_eq!(info.gpu_name.as_deref(), Some("Radeon VII"));
        assert_eq!(info.range_query.gpu_memory_used, vec![Some(512 * 1024 * 1024)]);
        assert!(info.last_time.is_some());
    }

    #[test]
    fn test_subscribe_streams_samples() {
        let (_, monitor) = monitor(vec![FakeDevice::named("a")], 10);
        let rx = monitor.subscribe();
        let first = rx.recv().unwrap().unwrap();
        assert_eq!(first.gpu_utilization, Some(3));
        drop(rx);

        // Recorded before it was sent
        assert!(monitor.count() >= 1);
        assert_eq!(monitor.range_query(0).time.first(), Some(&first.time));
        assert_eq!(monitor.info(0).gpu_name.as_deref(), Some("a"));
    }
}
