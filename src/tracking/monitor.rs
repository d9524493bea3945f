//! Background host metrics
//!
//! Samples CPU and memory usage with sysinfo and logs them to a run at a
//! fixed interval until stopped.

use crate::tracking::{Metrics, RunHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sysinfo::System;
use tracing::{debug, warn};

const BYTES_PER_GB: f64 = (1u64 << 30) as f64;

/// Longest the sampling thread sleeps before checking for shutdown
const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

/// One host measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSample {
    /// Mean CPU utilisation across cores, percent
    pub cpu_percent: f64,
    /// Used memory in GiB
    pub ram_gb: f64,
}

impl SystemSample {
    /// Metric names as logged
    pub fn to_metrics(&self) -> Metrics {
        Metrics::from([
            ("cpu/%".to_string(), self.cpu_percent),
            ("ram/GB".to_string(), self.ram_gb),
        ])
    }
}

/// Periodic host sampler
pub struct SystemMonitor {
    /// Shutdown flag
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SystemMonitor {
    /// Take one sample, refreshing `system` first
    ///
    /// CPU usage is measured since the previous refresh of the same
    /// `System`, so the first sample of a fresh one reads 0.
    pub fn sample(system: &mut System) -> SystemSample {
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpus = system.cpus();
        let cpu_percent = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
        };

        SystemSample {
            cpu_percent,
            ram_gb: system.used_memory() as f64 / BYTES_PER_GB,
        }
    }

    /// Start logging samples to `run` every `interval`
    pub fn start(run: Arc<RunHandle>, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("skytrack-monitor".to_string())
            .spawn(move || {
                let mut system = System::new();
                Self::sample(&mut system);
                while wait_interval(&flag, interval) {
                    let sample = Self::sample(&mut system);
                    if let Err(e) = run.log(&sample.to_metrics(), None) {
                        warn!("Failed to log system metrics: {}", e);
                    }
                }
                debug!("System monitor stopped");
            });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                warn!("Failed to start system monitor: {}", e);
                None
            }
        };

        Self { shutdown, handle }
    }

    /// Check if the sampling thread is alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop sampling and wait for the thread
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SystemMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Sleep for `interval`; false if shutdown was requested meanwhile
fn wait_interval(shutdown: &AtomicBool, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_CHECK));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{MemorySink, RunConfig};

    #[test]
    fn test_sample_ranges() {
        let mut system = System::new();
        let sample = SystemMonitor::sample(&mut system);
        assert!(sample.cpu_percent >= 0.0);
        assert!(sample.ram_gb >= 0.0);

        let metrics = sample.to_metrics();
        assert!(metrics.contains_key("cpu/%"));
        assert!(metrics.contains_key("ram/GB"));
    }

    #[test]
    fn test_monitor_logs_until_stopped() {
        let sink = Arc::new(MemorySink::new());
        let run = Arc::new(RunHandle::new(
            RunConfig {
                run_name: Some("monitor-test".into()),
                ..Default::default()
            },
            sink.clone(),
        ));

        let monitor = SystemMonitor::start(run, Duration::from_millis(20));
        assert!(monitor.is_running());
        std::thread::sleep(Duration::from_millis(150));
        monitor.stop();

        let logged = sink.records().len();
        assert!(logged >= 1, "expected samples, got {}", logged);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(sink.records().len(), logged);
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() {
        let run = Arc::new(RunHandle::new(RunConfig::default(), Arc::new(MemorySink::new())));
        let monitor = SystemMonitor::start(run, Duration::from_secs(30));

        let started = Instant::now();
        monitor.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_interval() {
        let flag = AtomicBool::new(false);
        assert!(wait_interval(&flag, Duration::from_millis(10)));
        flag.store(true, Ordering::Relaxed);
        assert!(!wait_interval(&flag, Duration::from_secs(30)));
    }
}
