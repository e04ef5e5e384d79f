//! Event log + latest-state persistence (C8). SQLite via `rusqlite`; every
//! operation opens its own connection via `spawn_blocking` (WAL mode lets
//! that stay cheap and lock-free for readers) rather than holding one
//! connection behind a lock for the process lifetime.

mod trimmer;

pub use trimmer::DbTrimmer;

use crate::error::{AppError, AppResult};
use crate::freshness;
use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS enriched_telemetry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_ingest_id TEXT NOT NULL,
    device_id TEXT NOT NULL,
    enriched_payload TEXT NOT NULL,
    calculated_event_timestamp TEXT NOT NULL,
    request_size_bytes INTEGER NOT NULL DEFAULT 0,
    processed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(original_ingest_id)
);
CREATE TABLE IF NOT EXISTS latest_enriched_state (
    device_id TEXT PRIMARY KEY,
    enriched_payload TEXT NOT NULL,
    last_updated_ts TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS oui_vendors (
    oui TEXT PRIMARY KEY,
    vendor TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_enriched_device_event_time ON enriched_telemetry (device_id, calculated_event_timestamp DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_enriched_event_time ON enriched_telemetry (calculated_event_timestamp DESC);
";

#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub next_cursor: Option<(String, i64)>,
}

#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: i64,
    pub original_ingest_id: String,
    pub event_timestamp: String,
    pub payload: Value,
    pub delta: Value,
}

#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub device_id: String,
    pub last_updated_ts: String,
    pub payload: Value,
    pub total_records: i64,
    pub total_bytes: i64,
    pub first_seen_ts: String,
}

/// One ingested record queued for persistence by the ingest worker (C7).
pub struct PendingRecord {
    pub original_ingest_id: String,
    pub device_id: String,
    pub historical_payload: Value,
    pub latest_payload: Value,
    pub calculated_event_timestamp: String,
    pub request_size_bytes: i64,
}

#[derive(Clone)]
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = crate::db::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?
    }

    /// Mirrors `save_stateful_data`: best-effort event-log insert (duplicate
    /// `original_ingest_id` is silently ignored) plus a conditional upsert
    /// into the latest-state projection that only applies when the new
    /// record's timestamp is strictly newer.
    pub async fn save_batch(&self, records: Vec<PendingRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = crate::db::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            let tx = conn.transaction()?;
            {
                let mut insert_event = tx.prepare_cached(
                    "INSERT OR IGNORE INTO enriched_telemetry
                     (original_ingest_id, device_id, enriched_payload, calculated_event_timestamp, request_size_bytes)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                let mut upsert_latest = tx.prepare_cached(
                    "INSERT INTO latest_enriched_state (device_id, enriched_payload, last_updated_ts)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(device_id) DO UPDATE SET
                        enriched_payload = excluded.enriched_payload,
                        last_updated_ts = excluded.last_updated_ts
                     WHERE excluded.last_updated_ts > latest_enriched_state.last_updated_ts",
                )?;
                for record in &records {
                    insert_event.execute(params![
                        record.original_ingest_id,
                        record.device_id,
                        record.historical_payload.to_string(),
                        record.calculated_event_timestamp,
                        record.request_size_bytes,
                    ])?;
                    upsert_latest.execute(params![
                        record.device_id,
                        record.latest_payload.to_string(),
                        record.calculated_event_timestamp,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    pub async fn latest(&self, device_id: &str) -> AppResult<Option<(Value, String)>> {
        let path = self.path.clone();
        let device_id = device_id.to_string();
        let result = tokio::task::spawn_blocking(move || -> Result<Option<(String, String)>> {
            let conn = crate::db::open_read_only(&path)?;
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT enriched_payload, last_updated_ts FROM latest_enriched_state WHERE device_id = ?1",
                    params![device_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(row)
        })
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .map_err(|e| AppError::internal(e.to_string()))?;

        match result {
            Some((payload, ts)) => {
                let value: Value = serde_json::from_str(&payload).map_err(|e| AppError::internal(e.to_string()))?;
                Ok(Some((value, ts)))
            }
            None => Ok(None),
        }
    }

    /// Joins the latest-state projection against per-device aggregates over
    /// the event log (record count, byte total, first-seen timestamp) so
    /// the device list and root summary can render traffic estimates
    /// without a second round trip per device.
    pub async fn recent_devices(&self, limit: i64) -> AppResult<Vec<DeviceSummary>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<DeviceSummary>> {
            let conn = crate::db::open_read_only(&path)?;
            let mut stmt = conn.prepare(
                "SELECT l.device_id, l.last_updated_ts, l.enriched_payload,
                        COUNT(e.id), COALESCE(SUM(e.request_size_bytes), 0), MIN(e.calculated_event_timestamp)
                 FROM latest_enriched_state l
                 LEFT JOIN enriched_telemetry e ON e.device_id = l.device_id
                 GROUP BY l.device_id, l.last_updated_ts, l.enriched_payload
                 ORDER BY l.last_updated_ts DESC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    let payload_str: String = row.get(2)?;
                    Ok((
                        DeviceSummary {
                            device_id: row.get(0)?,
                            last_updated_ts: row.get(1)?,
                            payload: Value::Null,
                            total_records: row.get(3)?,
                            total_bytes: row.get(4)?,
                            first_seen_ts: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                        },
                        payload_str,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let rows = rows
                .into_iter()
                .map(|(mut summary, payload_str)| {
                    summary.payload = serde_json::from_str(&payload_str).unwrap_or(Value::Null);
                    summary
                })
                .collect();
            Ok(rows)
        })
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .map_err(|e| AppError::internal(e.to_string()))
    }

    pub async fn device_count(&self) -> AppResult<i64> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<i64> {
            let conn = crate::db::open_read_only(&path)?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM latest_enriched_state", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .map_err(|e| AppError::internal(e.to_string()))
    }

    pub async fn event_count(&self) -> AppResult<i64> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<i64> {
            let conn = crate::db::open_read_only(&path)?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM enriched_telemetry", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .map_err(|e| AppError::internal(e.to_string()))
    }

    /// Oldest and newest `calculated_event_timestamp` across the whole log,
    /// for the root summary's storage-rate estimation.
    pub async fn event_timestamp_range(&self) -> AppResult<(Option<String>, Option<String>)> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(Option<String>, Option<String>)> {
            let conn = crate::db::open_read_only(&path)?;
            conn.query_row(
                "SELECT MIN(calculated_event_timestamp), MAX(calculated_event_timestamp) FROM enriched_telemetry",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(Into::into)
        })
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .map_err(|e| AppError::internal(e.to_string()))
    }

    /// Cursor-paginated history: `(event_ts, id) < cursor`, newest first.
    /// Fetches `limit + 1` rows to detect whether another page follows.
    /// Each record's `delta` is the structural diff against the record
    /// immediately preceding it within this page (not against the global
    /// latest state), matching the read API's "what changed since the
    /// previous entry in this page" contract.
    pub async fn history(
        &self,
        device_id: Option<&str>,
        limit: i64,
        cursor: Option<(String, i64)>,
    ) -> AppResult<HistoryPage> {
        let path = self.path.clone();
        let device_id = device_id.map(|s| s.to_string());
        let fetch_limit = limit + 1;

        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<(i64, String, String, String)>> {
            let conn = crate::db::open_read_only(&path)?;
            let (sql, use_device, use_cursor): (&str, bool, bool) = match (&device_id, &cursor) {
                (Some(_), Some(_)) => (
                    "SELECT id, original_ingest_id, calculated_event_timestamp, enriched_payload FROM enriched_telemetry
                     WHERE device_id = ?1 AND (calculated_event_timestamp, id) < (?2, ?3)
                     ORDER BY calculated_event_timestamp DESC, id DESC LIMIT ?4",
                    true,
                    true,
                ),
                (Some(_), None) => (
                    "SELECT id, original_ingest_id, calculated_event_timestamp, enriched_payload FROM enriched_telemetry
                     WHERE device_id = ?1
                     ORDER BY calculated_event_timestamp DESC, id DESC LIMIT ?4",
                    true,
                    false,
                ),
                (None, Some(_)) => (
                    "SELECT id, original_ingest_id, calculated_event_timestamp, enriched_payload FROM enriched_telemetry
                     WHERE (calculated_event_timestamp, id) < (?2, ?3)
                     ORDER BY calculated_event_timestamp DESC, id DESC LIMIT ?4",
                    false,
                    true,
                ),
                (None, None) => (
                    "SELECT id, original_ingest_id, calculated_event_timestamp, enriched_payload FROM enriched_telemetry
                     ORDER BY calculated_event_timestamp DESC, id DESC LIMIT ?4",
                    false,
                    false,
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let device_param = device_id.clone().unwrap_or_default();
            let (cursor_ts, cursor_id) = cursor.clone().unwrap_or_default();
            let _ = (use_device, use_cursor);
            let rows = stmt
                .query_map(
                    params![device_param, cursor_ts, cursor_id, fetch_limit],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| AppError::internal(e.to_string()))?
        .map_err(|e| AppError::internal(e.to_string()))?;

        let has_more = rows.len() as i64 > limit;
        let page_rows = if has_more { &rows[..limit as usize] } else { &rows[..] };

        let mut records = Vec::with_capacity(page_rows.len());
        for (i, (id, original_ingest_id, ts, payload_str)) in page_rows.iter().enumerate() {
            let payload: Value = serde_json::from_str(payload_str).map_err(|e| AppError::internal(e.to_string()))?;
            let prior = if i + 1 < page_rows.len() {
                serde_json::from_str(&page_rows[i + 1].3).unwrap_or(Value::Null)
            } else {
                Value::Null
            };
            records.push(HistoryRecord {
                id: *id,
                original_ingest_id: original_ingest_id.clone(),
                event_timestamp: ts.clone(),
                delta: freshness::diff(&payload, &prior),
                payload,
            });
        }

        let next_cursor = if has_more {
            page_rows.last().map(|(id, _, ts, _)| (ts.clone(), *id))
        } else {
            None
        };

        Ok(HistoryPage { records, next_cursor })
    }

    pub async fn all_oui_vendors(&self) -> Result<Vec<(String, String)>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<(String, String)>> {
            let conn = crate::db::open_read_only(&path)?;
            let mut stmt = conn.prepare("SELECT oui, vendor FROM oui_vendors")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .context("oui vendor query task panicked")?
    }

    pub async fn replace_oui_vendors(&self, vendors: Vec<(String, String)>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = crate::db::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached("INSERT OR REPLACE INTO oui_vendors (oui, vendor) VALUES (?1, ?2)")?;
                for (oui, vendor) in &vendors {
                    stmt.execute(params![oui, vendor])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .context("oui vendor replace task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path().join("telemetry.sqlite3"));
        store.init().await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn save_and_read_latest_state() {
        let (_dir, store) = test_store().await;
        store
            .save_batch(vec![PendingRecord {
                original_ingest_id: "req-1".into(),
                device_id: "dev-1".into(),
                historical_payload: json!({"p": 1}),
                latest_payload: json!({"power": {"battery_percent": 50}}),
                calculated_event_timestamp: "2024-01-01 00:00:00".into(),
                request_size_bytes: 128,
            }])
            .await
            .unwrap();

        let (payload, ts) = store.latest("dev-1").await.unwrap().unwrap();
        assert_eq!(payload["power"]["battery_percent"], json!(50));
        assert_eq!(ts, "2024-01-01 00:00:00");
    }

    #[tokio::test]
    async fn older_timestamp_does_not_overwrite_latest_state() {
        let (_dir, store) = test_store().await;
        store
            .save_batch(vec![PendingRecord {
                original_ingest_id: "req-1".into(),
                device_id: "dev-1".into(),
                historical_payload: json!({}),
                latest_payload: json!({"power": {"battery_percent": 90}}),
                calculated_event_timestamp: "2024-01-02 00:00:00".into(),
                request_size_bytes: 0,
            }])
            .await
            .unwrap();
        store
            .save_batch(vec![PendingRecord {
                original_ingest_id: "req-2".into(),
                device_id: "dev-1".into(),
                historical_payload: json!({}),
                latest_payload: json!({"power": {"battery_percent": 10}}),
                calculated_event_timestamp: "2024-01-01 00:00:00".into(),
                request_size_bytes: 0,
            }])
            .await
            .unwrap();

        let (payload, _) = store.latest("dev-1").await.unwrap().unwrap();
        assert_eq!(payload["power"]["battery_percent"], json!(90));
    }

    #[tokio::test]
    async fn duplicate_ingest_id_is_ignored() {
        let (_dir, store) = test_store().await;
        for _ in 0..2 {
            store
                .save_batch(vec![PendingRecord {
                    original_ingest_id: "req-dup".into(),
                    device_id: "dev-1".into(),
                    historical_payload: json!({"p": 1}),
                    latest_payload: json!({"p": 1}),
                    calculated_event_timestamp: "2024-01-01 00:00:00".into(),
                    request_size_bytes: 0,
                }])
                .await
                .unwrap();
        }
        assert_eq!(store.event_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn history_pagination_reports_next_cursor() {
        let (_dir, store) = test_store().await;
        for i in 0..3 {
            store
                .save_batch(vec![PendingRecord {
                    original_ingest_id: format!("req-{i}"),
                    device_id: "dev-1".into(),
                    historical_payload: json!({"p": i}),
                    latest_payload: json!({"p": i}),
                    calculated_event_timestamp: format!("2024-01-01 00:00:0{i}"),
                    request_size_bytes: 0,
                }])
                .await
                .unwrap();
        }
        let page = store.history(Some("dev-1"), 2, None).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.next_cursor.is_some());
    }
}
