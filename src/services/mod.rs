//! Background services: database trimming, metrics logging, a GeoJSON
//! snapshot tick, and the OUI vendor table bootstrap. Each service follows
//! the `new(state, interval) -> start(self, cancel)` shape, ticking on its
//! own `tokio::time::interval` until cancelled.

pub mod oui_bootstrap;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::persistence::DbTrimmer;
use crate::state::AppState;

/// Deletes the oldest rows once the event log crosses its configured
/// high-water mark, bringing it back under the low-water mark.
pub struct TrimmerService {
    state: AppState,
    interval: Duration,
}

impl TrimmerService {
    pub fn new(state: AppState, interval: Duration) -> Self {
        Self { state, interval }
    }

    pub fn start(self, cancel: CancellationToken) {
        let state = self.state;
        let interval = self.interval;
        tokio::spawn(async move {
            let trimmer = DbTrimmer::new(
                state.event_store.path().to_path_buf(),
                state.config.event_log_high_water_bytes,
                state.config.event_log_low_water_bytes,
                state.config.trimmer_batch_size,
            );
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match trimmer.run_once().await {
                            Ok(0) => {}
                            Ok(deleted) => tracing::info!(deleted, "trimmed event log"),
                            Err(err) => tracing::warn!("event log trim failed: {err:#}"),
                        }
                    }
                }
            }
        });
    }
}

/// Periodically logs ingest throughput from the in-process metrics ring.
pub struct MetricsLogService {
    state: AppState,
    interval: Duration,
}

impl MetricsLogService {
    pub fn new(state: AppState, interval: Duration) -> Self {
        Self { state, interval }
    }

    pub fn start(self, cancel: CancellationToken) {
        let state = self.state;
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let (events, avg_duration_seconds) = state.metrics.throughput_summary(100);
                        if events > 0 {
                            tracing::info!(events, avg_duration_seconds, "ingest throughput");
                        }
                    }
                }
            }
        });
    }
}

/// Ticks on the configured interval to refresh a GeoJSON snapshot of the
/// most recently seen device positions. Left as a logging stub: the pack
/// carries no shared-KV or object-storage client to publish the snapshot
/// to, mirroring the weather-quota and metrics-ring gaps noted elsewhere.
pub struct GeoJsonSnapshotService {
    state: AppState,
    interval: Duration,
}

impl GeoJsonSnapshotService {
    pub fn new(state: AppState, interval: Duration) -> Self {
        Self { state, interval }
    }

    pub fn start(self, cancel: CancellationToken) {
        let state = self.state;
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match state.event_store.device_count().await {
                            Ok(count) => tracing::debug!(devices = count, "geojson snapshot tick"),
                            Err(err) => tracing::warn!("geojson snapshot tick failed: {err:#}"),
                        }
                    }
                }
            }
        });
    }
}
