//! Geo-bucketed file cache for weather lookups. Mirrors the original's
//! filesystem cache: one JSON file per rounded (lat, lon) bucket, an
//! oldest-first eviction pass once the directory grows past either
//! configured file-count or byte-size ceiling.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::sync::Mutex;

const CACHE_DURATION_SECONDS: i64 = 3600;
const DISTANCE_THRESHOLD_KM: f64 = 1.0;

const WEATHER_KEYS: &[&str] = &[
    "temperature",
    "humidity",
    "apparent_temp",
    "precipitation",
    "code",
    "wind_speed",
    "wind_direction",
    "wind_gusts",
    "pressure_msl",
    "cloud_cover",
    "marine_wave_height",
    "marine_wave_direction",
    "marine_wave_period",
    "marine_swell_wave_height",
    "marine_swell_wave_direction",
    "marine_swell_wave_period",
];

pub struct WeatherCache {
    dir: PathBuf,
    cleanup_lock: Mutex<()>,
    max_files: usize,
    max_bytes: u64,
}

impl WeatherCache {
    pub fn new(dir: PathBuf, max_files: usize, max_bytes: u64) -> Self {
        Self {
            dir,
            cleanup_lock: Mutex::new(()),
            max_files,
            max_bytes,
        }
    }

    fn bucket_path(&self, lat: f64, lon: f64) -> PathBuf {
        let key = format!("{:.2}_{:.2}.json", lat, lon);
        self.dir.join(key)
    }

    async fn list_cache_files(&self) -> Vec<PathBuf> {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return Vec::new();
        };
        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files
    }

    /// Scans every cache file for one within `DISTANCE_THRESHOLD_KM` and
    /// `CACHE_DURATION_SECONDS`. Not indexed by bucket key: a device can
    /// match a neighbor's cache entry if it's close enough.
    pub async fn find(&self, lat: f64, lon: f64) -> Option<(Value, DateTime<Utc>)> {
        tokio::fs::create_dir_all(&self.dir).await.ok()?;
        let now = Utc::now();
        for path in self.list_cache_files().await {
            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            let Ok(modified_time) = metadata.modified() else {
                continue;
            };
            let modified: DateTime<Utc> = modified_time.into();
            if (now - modified).num_seconds() > CACHE_DURATION_SECONDS {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            let Ok(cached) = serde_json::from_slice::<Value>(&bytes) else {
                continue;
            };
            let Some(meta) = cached.get("_meta") else {
                continue;
            };
            let Some(cached_lat) = meta.get("lat").and_then(Value::as_f64) else {
                continue;
            };
            let Some(cached_lon) = meta.get("lon").and_then(Value::as_f64) else {
                continue;
            };
            if crate::transform::derived::haversine_km(lat, lon, cached_lat, cached_lon)
                <= DISTANCE_THRESHOLD_KM
            {
                let Some(cached_at) = meta
                    .get("cached_at")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                else {
                    continue;
                };
                let mut weather = json!({});
                if let Some(obj) = cached.as_object() {
                    for key in WEATHER_KEYS {
                        if let Some(v) = obj.get(*key) {
                            weather[*key] = v.clone();
                        }
                    }
                }
                return Some((weather, cached_at));
            }
        }
        None
    }

    pub async fn save(&self, lat: f64, lon: f64, data: &Value) -> Option<DateTime<Utc>> {
        tokio::fs::create_dir_all(&self.dir).await.ok()?;
        let timestamp = Utc::now();
        let mut cache_data = json!({});
        if let Some(obj) = data.as_object() {
            for key in WEATHER_KEYS {
                if let Some(v) = obj.get(*key) {
                    if !v.is_null() {
                        cache_data[*key] = v.clone();
                    }
                }
            }
        }
        cache_data["_meta"] = json!({
            "lat": lat,
            "lon": lon,
            "cached_at": timestamp.to_rfc3339(),
        });
        let path = self.bucket_path(lat, lon);
        let bytes = serde_json::to_vec(&cache_data).ok()?;
        tokio::fs::write(&path, bytes).await.ok()?;
        self.enforce_limits().await;
        Some(timestamp)
    }

    async fn enforce_limits(&self) {
        let _guard = self.cleanup_lock.lock().await;
        let files = self.list_cache_files().await;
        if files.is_empty() {
            return;
        }
        let mut with_meta: Vec<(PathBuf, u64, DateTime<Utc>)> = Vec::new();
        for path in files {
            let Ok(metadata) = tokio::fs::metadata(&path).await else {
                continue;
            };
            let modified: DateTime<Utc> = metadata.modified().unwrap_or(std::time::SystemTime::now()).into();
            with_meta.push((path, metadata.len(), modified));
        }
        let total_bytes: u64 = with_meta.iter().map(|(_, size, _)| *size).sum();
        if with_meta.len() <= self.max_files && total_bytes <= self.max_bytes {
            return;
        }
        with_meta.sort_by_key(|(_, _, modified)| *modified);

        let mut count = with_meta.len();
        let mut size_bytes: u64 = total_bytes;
        while (count > self.max_files || size_bytes > self.max_bytes) && !with_meta.is_empty() {
            let (path, size, _) = with_meta.remove(0);
            if tokio::fs::remove_file(&path).await.is_ok() {
                count -= 1;
                size_bytes = size_bytes.saturating_sub(size);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_find_matches_nearby_point() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeatherCache::new(dir.path().to_path_buf(), 100, 50 * 1024 * 1024);
        let data = json!({"temperature": 21.0, "humidity": 55});
        cache.save(48.13, 11.57, &data).await.unwrap();

        let (found, _ts) = cache.find(48.131, 11.571).await.unwrap();
        assert_eq!(found["temperature"], json!(21.0));
    }

    #[tokio::test]
    async fn find_returns_none_when_far_away() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WeatherCache::new(dir.path().to_path_buf(), 100, 50 * 1024 * 1024);
        let data = json!({"temperature": 21.0});
        cache.save(48.13, 11.57, &data).await.unwrap();

        assert!(cache.find(10.0, 10.0).await.is_none());
    }
}
