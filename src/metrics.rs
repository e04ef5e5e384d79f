//! Capped in-memory ring of per-batch ingest metrics (§4.7 step 6). The
//! original kept this in a shared store; the pack carries no such client
//! (same gap noted for the weather daily quota), so this tracks it
//! in-process and exposes it for the root summary endpoint.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

const RING_CAPACITY: usize = 2000;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingMetric {
    pub recorded_at: DateTime<Utc>,
    pub batch_size: usize,
    pub duration_seconds: f64,
}

pub struct MetricsRing {
    entries: Mutex<VecDeque<ProcessingMetric>>,
}

impl MetricsRing {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    pub fn record(&self, metric: ProcessingMetric) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= RING_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(metric);
    }

    pub fn recent(&self, limit: usize) -> Vec<ProcessingMetric> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events processed in the trailing window, and the average batch
    /// duration over it — used for the root summary's traffic estimate.
    pub fn throughput_summary(&self, window: usize) -> (usize, f64) {
        let entries = self.entries.lock().unwrap();
        let recent: Vec<&ProcessingMetric> = entries.iter().rev().take(window).collect();
        if recent.is_empty() {
            return (0, 0.0);
        }
        let total_events: usize = recent.iter().map(|m| m.batch_size).sum();
        let avg_duration = recent.iter().map(|m| m.duration_seconds).sum::<f64>() / recent.len() as f64;
        (total_events, avg_duration)
    }
}

impl Default for MetricsRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let ring = MetricsRing::new();
        for i in 0..(RING_CAPACITY + 5) {
            ring.record(ProcessingMetric {
                recorded_at: Utc::now(),
                batch_size: i,
                duration_seconds: 0.01,
            });
        }
        assert_eq!(ring.len(), RING_CAPACITY);
    }

    #[test]
    fn throughput_summary_averages_recent_window() {
        let ring = MetricsRing::new();
        ring.record(ProcessingMetric {
            recorded_at: Utc::now(),
            batch_size: 10,
            duration_seconds: 1.0,
        });
        ring.record(ProcessingMetric {
            recorded_at: Utc::now(),
            batch_size: 20,
            duration_seconds: 3.0,
        });
        let (events, avg) = ring.throughput_summary(10);
        assert_eq!(events, 30);
        assert_eq!(avg, 2.0);
    }
}
