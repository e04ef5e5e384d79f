//! Stateful ingest worker (C7): per-batch orchestration across devices.
//! Groups a batch by device, reconstructs and orders event timestamps,
//! runs each record through IP intelligence, weather enrichment, the
//! transformer and the freshness merge in sequence, then persists the
//! whole batch in one call so a batch either lands completely or not at
//! all.

use crate::decode::OuiTable;
use crate::freshness::{self, Node};
use crate::ip_intel::IpIntelligence;
use crate::metrics::{MetricsRing, ProcessingMetric};
use crate::persistence::{EventStore, PendingRecord};
use crate::timestamp::{self, BatchBaseCache, RawTiming};
use crate::transform::{self, TransformInput};
use crate::weather::WeatherCoordinator;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One record as it arrives at the intake boundary, before any enrichment.
#[derive(Debug, Clone)]
pub struct IngestRecord {
    pub original_ingest_id: String,
    pub device_id: Option<String>,
    pub payload: Value,
    pub received_at: Option<DateTime<Utc>>,
    pub request_headers: Option<Value>,
    pub warnings: Option<Value>,
}

/// A batch handed to a worker for processing. Persistence happens once per
/// batch: if anything inside fails, nothing in the batch is written, and
/// the batch is dropped — the queue upstream of this process owns retry
/// semantics, which are out of scope here.
#[derive(Debug, Clone, Default)]
pub struct IngestBatch {
    pub records: Vec<IngestRecord>,
}

fn extract_client_ip(headers: Option<&Value>) -> Option<String> {
    let headers = headers?.as_object()?;
    let find = |key: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_str())
    };
    if let Some(forwarded) = find("x-forwarded-for") {
        return forwarded.split(',').next().map(|s| s.trim().to_string());
    }
    find("x-real-ip").map(|s| s.to_string())
}

/// Dependencies a batch needs to be processed. Bundled so `process_batch`
/// takes one argument per call site instead of six.
pub struct IngestDeps {
    pub event_store: EventStore,
    pub oui_table: Arc<OuiTable>,
    pub weather: Arc<WeatherCoordinator>,
    pub ip_intel: Arc<IpIntelligence>,
    pub batch_base_cache: Arc<BatchBaseCache>,
}

/// Runs the full §4.7 algorithm over one batch and persists the result in
/// a single `save_batch` call. Returns the number of historical events
/// buffered for persistence; device-id-less records and records with no
/// resolvable event timestamp are dropped before this count (matching the
/// original's "skip, don't error" contract), but an out-of-order record
/// relative to the device's known state still produces an event row — only
/// the latest-state projection update for it is suppressed, via the
/// timestamp-guarded conditional upsert in `EventStore::save_batch`.
pub async fn process_batch(deps: &IngestDeps, batch: IngestBatch) -> anyhow::Result<usize> {
    let now = Utc::now();

    let mut by_device: BTreeMap<String, Vec<IngestRecord>> = BTreeMap::new();
    for record in batch.records {
        if let Some(device_id) = record.device_id.clone() {
            by_device.entry(device_id).or_default().push(record);
        }
    }

    let mut pending = Vec::new();

    for (device_id, records) in by_device {
        let mut timed: Vec<(DateTime<Utc>, IngestRecord)> = Vec::new();
        for record in records {
            let timing = RawTiming {
                absolute_seconds: record.payload.get("ts").and_then(Value::as_i64),
                offset_seconds: record.payload.get("to").and_then(Value::as_i64),
            };
            if let Some(event_ts) = timestamp::reconstruct_event_timestamp(
                &device_id,
                timing,
                record.received_at,
                &deps.batch_base_cache,
                now,
            ) {
                timed.push((event_ts, record));
            }
        }
        // §4.6: within one device's slice of a batch, records are applied
        // in event-timestamp order regardless of arrival order.
        timed.sort_by_key(|(event_ts, _)| *event_ts);

        if timed.is_empty() {
            continue;
        }

        let stored = deps.event_store.latest(&device_id).await.ok().flatten();
        let (mut prior_freshness, mut last_known_ts) = match stored {
            Some((payload, ts_str)) => (
                Node::from_json(&payload),
                freshness::parse_event_ts(&ts_str).unwrap_or_else(epoch),
            ),
            None => (Node::empty_branch(), epoch()),
        };

        for (event_ts, record) in timed {
            // A record whose event_ts doesn't strictly advance past what's
            // already known for this device still gets a historical event
            // row (insert-or-ignore on ingest id, per §4.8) — only the
            // latest-state projection is timestamp-guarded, and that guard
            // lives in `EventStore::save_batch`'s conditional upsert. So an
            // out-of-order arrival is still enriched and transformed, but
            // must not become the new in-memory baseline other records in
            // this batch merge against.
            let advances_state = event_ts > last_known_ts;

            let request_size_bytes = serde_json::to_vec(&record.payload)
                .map(|bytes| bytes.len() as i64)
                .unwrap_or(0);
            let prior_plain = freshness::reconstruct(&prior_freshness);

            let client_ip = extract_client_ip(record.request_headers.as_ref());
            let ip_intel_value = match &client_ip {
                Some(ip) => deps.ip_intel.lookup(ip).await,
                None => None,
            };

            let (lat, lon, _) = transform::resolve_coordinates(&record.payload, &prior_plain);
            let weather_value = match (lat.as_ref().and_then(Value::as_f64), lon.as_ref().and_then(Value::as_f64)) {
                (Some(lat), Some(lon)) => deps.weather.enrich(&device_id, lat, lon).await,
                _ => None,
            };

            let input = TransformInput {
                raw: &record.payload,
                prior_plain: &prior_plain,
                device_id: &device_id,
                request_id: Some(record.original_ingest_id.as_str()),
                source_ip: client_ip.as_deref(),
                request_headers: record.request_headers.as_ref(),
                warnings: record.warnings.as_ref(),
                event_ts,
                received_at: record.received_at,
                ip_intel: ip_intel_value.as_ref(),
                oui_table: &deps.oui_table,
                weather: weather_value.as_ref(),
            };
            let new_plain = transform::transform(input);
            let next_freshness = freshness::update(&prior_freshness, &new_plain, event_ts);

            pending.push(PendingRecord {
                original_ingest_id: record.original_ingest_id.clone(),
                device_id: device_id.clone(),
                historical_payload: new_plain,
                latest_payload: next_freshness.to_json(),
                calculated_event_timestamp: freshness::format_event_ts(&event_ts),
                request_size_bytes,
            });

            if advances_state {
                prior_freshness = next_freshness;
                last_known_ts = event_ts;
            }
        }
    }

    let count = pending.len();
    deps.event_store.save_batch(pending).await?;
    Ok(count)
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).unwrap()
}

/// Spawns `worker_count` tasks sharing one receiver, and returns the
/// sender the intake route pushes batches onto. Each worker follows the
/// same `start(cancel)` background-task shape used elsewhere in this
/// crate, but drains a channel rather than a ticker.
pub fn spawn_workers(
    deps: Arc<IngestDeps>,
    metrics: Arc<MetricsRing>,
    worker_count: usize,
    cancel: tokio_util::sync::CancellationToken,
) -> mpsc::Sender<IngestBatch> {
    let (tx, rx) = mpsc::channel::<IngestBatch>(256);
    let rx = Arc::new(Mutex::new(rx));

    for worker_id in 0..worker_count.max(1) {
        let rx = rx.clone();
        let deps = deps.clone();
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = async {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    } => batch,
                };
                let Some(batch) = batch else { break };
                let batch_size = batch.records.len();
                let started = std::time::Instant::now();
                match process_batch(&deps, batch).await {
                    Ok(count) => {
                        metrics.record(ProcessingMetric {
                            recorded_at: Utc::now(),
                            batch_size: count,
                            duration_seconds: started.elapsed().as_secs_f64(),
                        });
                    }
                    Err(err) => {
                        tracing::error!(worker_id, batch_size, error = %err, "ingest batch failed");
                    }
                }
            }
        });
    }

    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use serde_json::json;
    use std::time::Duration;

    async fn test_deps() -> (tempfile::TempDir, IngestDeps) {
        let dir = tempfile::tempdir().unwrap();
        let event_store = EventStore::new(dir.path().join("telemetry.sqlite3"));
        event_store.init().await.unwrap();
        let deps = IngestDeps {
            event_store,
            oui_table: Arc::new(OuiTable::with_embedded_fallback()),
            weather: Arc::new(WeatherCoordinator::new(
                reqwest::Client::new(),
                dir.path().join("weather-cache"),
                crate::weather::WeatherCoordinatorConfig::default(),
            )),
            ip_intel: Arc::new(IpIntelligence::new(reqwest::Client::new())),
            batch_base_cache: Arc::new(BatchBaseCache::new(6 * 3600)),
        };
        (dir, deps)
    }

    #[tokio::test]
    async fn records_without_device_id_are_dropped() {
        let (_dir, deps) = test_deps().await;
        let batch = IngestBatch {
            records: vec![IngestRecord {
                original_ingest_id: "req-1".into(),
                device_id: None,
                payload: json!({"ts": 1_700_000_000, "p": 50}),
                received_at: None,
                request_headers: None,
                warnings: None,
            }],
        };
        let count = process_batch(&deps, batch).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(deps.event_store.event_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_is_applied_in_event_timestamp_order_not_arrival_order() {
        let (_dir, deps) = test_deps().await;
        let batch = IngestBatch {
            records: vec![
                IngestRecord {
                    original_ingest_id: "req-later".into(),
                    device_id: Some("dev-1".into()),
                    payload: json!({"ts": 1_700_000_100, "p": 80}),
                    received_at: None,
                    request_headers: None,
                    warnings: None,
                },
                IngestRecord {
                    original_ingest_id: "req-earlier".into(),
                    device_id: Some("dev-1".into()),
                    payload: json!({"ts": 1_700_000_000, "p": 20}),
                    received_at: None,
                    request_headers: None,
                    warnings: None,
                },
            ],
        };
        let count = process_batch(&deps, batch).await.unwrap();
        assert_eq!(count, 2);
        let (latest, _ts) = deps.event_store.latest("dev-1").await.unwrap().unwrap();
        assert_eq!(latest["power"]["battery_percent"], json!(80));
    }

    #[tokio::test]
    async fn record_older_than_stored_state_leaves_latest_projection_unchanged_but_logs_event() {
        // §8 scenario 3: an out-of-order arrival still gets a historical
        // event row; only the latest-state projection is left untouched.
        let (_dir, deps) = test_deps().await;
        let first = IngestBatch {
            records: vec![IngestRecord {
                original_ingest_id: "req-1".into(),
                device_id: Some("dev-1".into()),
                payload: json!({"ts": 1_700_000_100, "p": 80}),
                received_at: None,
                request_headers: None,
                warnings: None,
            }],
        };
        process_batch(&deps, first).await.unwrap();

        let stale = IngestBatch {
            records: vec![IngestRecord {
                original_ingest_id: "req-2".into(),
                device_id: Some("dev-1".into()),
                payload: json!({"ts": 1_700_000_000, "p": 20}),
                received_at: None,
                request_headers: None,
                warnings: None,
            }],
        };
        let count = process_batch(&deps, stale).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(deps.event_store.event_count().await.unwrap(), 2);
        let (latest, _ts) = deps.event_store.latest("dev-1").await.unwrap().unwrap();
        assert_eq!(latest["power"]["battery_percent"], json!(80));
    }

    #[tokio::test]
    async fn ingest_receive_timestamp_is_used_when_record_carries_no_timing() {
        let (_dir, deps) = test_deps().await;
        let batch = IngestBatch {
            records: vec![IngestRecord {
                original_ingest_id: "req-1".into(),
                device_id: Some("dev-1".into()),
                payload: json!({"p": 42}),
                received_at: Some(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()),
                request_headers: None,
                warnings: None,
            }],
        };
        let count = process_batch(&deps, batch).await.unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn circuit_breaker_constants_are_sane_for_ingest_dependencies() {
        let breaker = CircuitBreaker::new("test", 1, Duration::from_secs(1));
        assert!(breaker.allow());
    }
}
