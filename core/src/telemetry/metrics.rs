use serde::Serialize;
use std::sync::Mutex;

/// Counters accumulated across a processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub bins_processed: usize,
    pub empty_bins: usize,
    pub rotations: usize,
    pub errors: usize,
}

pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_bins(&self, processed: usize, empty: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.bins_processed += processed;
            metrics.empty_bins += empty;
        }
    }

    pub fn record_rotation(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.rotations += 1;
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.errors += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .map(|metrics| *metrics)
            .unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
