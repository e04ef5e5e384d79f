//! Database size trimmer: once the event log file crosses a high-water
//! mark, delete the oldest rows in batches until it's back under the
//! low-water mark, then `VACUUM` to reclaim the freed pages on disk.

use anyhow::Result;
use std::path::PathBuf;

pub struct DbTrimmer {
    path: PathBuf,
    high_water_bytes: u64,
    low_water_bytes: u64,
    delete_batch_rows: i64,
}

impl DbTrimmer {
    pub fn new(path: PathBuf, high_water_bytes: u64, low_water_bytes: u64, delete_batch_rows: i64) -> Self {
        Self {
            path,
            high_water_bytes,
            low_water_bytes,
            delete_batch_rows,
        }
    }

    /// Runs one trim pass if the database file is over the high-water
    /// mark. Returns the number of rows deleted.
    pub async fn run_once(&self) -> Result<u64> {
        let path = self.path.clone();
        let high_water_bytes = self.high_water_bytes;
        let low_water_bytes = self.low_water_bytes;
        let delete_batch_rows = self.delete_batch_rows;
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if size < high_water_bytes {
                return Ok(0);
            }

            let conn = crate::db::open(&path)?;
            let mut deleted = 0_u64;
            loop {
                let current_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if current_size < low_water_bytes {
                    break;
                }
                let affected = conn.execute(
                    "DELETE FROM enriched_telemetry WHERE id IN (
                        SELECT id FROM enriched_telemetry ORDER BY id ASC LIMIT ?1
                    )",
                    [delete_batch_rows],
                )?;
                deleted += affected as u64;
                if affected == 0 {
                    break;
                }
            }
            if deleted > 0 {
                conn.execute_batch("VACUUM;")?;
            }
            Ok(deleted)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_trim_below_high_water_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.sqlite3");
        let conn = crate::db::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE enriched_telemetry (id INTEGER PRIMARY KEY);")
            .unwrap();
        drop(conn);

        let trimmer = DbTrimmer::new(path, 10 * 1024 * 1024 * 1024, 9 * 1024 * 1024 * 1024, 1000);
        assert_eq!(trimmer.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn trims_rows_once_over_high_water_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.sqlite3");
        {
            let conn = crate::db::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE enriched_telemetry (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    original_ingest_id TEXT NOT NULL,
                    device_id TEXT NOT NULL,
                    enriched_payload TEXT NOT NULL,
                    calculated_event_timestamp TEXT NOT NULL,
                    request_size_bytes INTEGER NOT NULL DEFAULT 0,
                    processed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    UNIQUE(original_ingest_id)
                );",
            )
            .unwrap();
            for i in 0..50 {
                conn.execute(
                    "INSERT INTO enriched_telemetry (original_ingest_id, device_id, enriched_payload, calculated_event_timestamp) VALUES (?1, 'dev', '{}', '2024-01-01 00:00:00')",
                    [format!("req-{i}")],
                )
                .unwrap();
            }
        }

        let trimmer = DbTrimmer::new(path, 0, 0, 10);
        let deleted = trimmer.run_once().await.unwrap();
        assert_eq!(deleted, 50);
    }
}
