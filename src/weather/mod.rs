//! Weather enrichment coordinator (C4): per-device movement/expiry/cooldown
//! gating, a geo-bucketed file cache, a global daily quota, and a
//! dual-provider fallback (Open-Meteo primary, wttr.in secondary), each
//! provider call routed through its own circuit breaker.

mod cache;

pub use cache::WeatherCache;

use crate::circuit_breaker::CircuitBreaker;
use crate::transform::derived::haversine_km;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Tunable thresholds for the movement/staleness gate and provider calls,
/// sourced from `CoreConfig`'s `weather_*` fields rather than hardcoded.
#[derive(Debug, Clone, Copy)]
pub struct WeatherCoordinatorConfig {
    pub movement_threshold_km: f64,
    pub stale_seconds: i64,
    pub cooldown_seconds: i64,
    pub daily_quota: u32,
    pub cache_max_files: usize,
    pub cache_max_bytes: u64,
    pub primary_timeout_seconds: u64,
    pub marine_timeout_seconds: u64,
    pub fallback_timeout_seconds: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_open_timeout_seconds: u64,
    pub wttr_breaker_failure_threshold: u32,
    pub wttr_breaker_open_timeout_seconds: u64,
}

impl Default for WeatherCoordinatorConfig {
    fn default() -> Self {
        Self {
            movement_threshold_km: 1.0,
            stale_seconds: 3600,
            cooldown_seconds: 60,
            daily_quota: 9000,
            cache_max_files: 100,
            cache_max_bytes: 50 * 1024 * 1024,
            primary_timeout_seconds: 5,
            marine_timeout_seconds: 5,
            fallback_timeout_seconds: 4,
            breaker_failure_threshold: 3,
            breaker_open_timeout_seconds: 30,
            wttr_breaker_failure_threshold: 2,
            wttr_breaker_open_timeout_seconds: 20,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DevicePosition {
    lat: f64,
    lon: f64,
    last_weather_update: DateTime<Utc>,
}

/// Global daily request quota. The pack carries no Redis client, so this
/// tracks the UTC calendar day in-process rather than in a shared store
/// (see DESIGN.md for the tradeoff).
struct DailyQuota {
    count: AtomicU32,
    day: Mutex<chrono::NaiveDate>,
    ceiling: u32,
}

impl DailyQuota {
    fn new(ceiling: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            day: Mutex::new(Utc::now().date_naive()),
            ceiling,
        }
    }

    fn is_limited(&self) -> bool {
        self.roll_if_new_day();
        self.count.load(Ordering::SeqCst) >= self.ceiling
    }

    fn increment(&self) {
        self.roll_if_new_day();
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn roll_if_new_day(&self) {
        let today = Utc::now().date_naive();
        let mut day = self.day.lock().unwrap();
        if *day != today {
            *day = today;
            self.count.store(0, Ordering::SeqCst);
        }
    }
}

pub struct WeatherCoordinator {
    http: reqwest::Client,
    cache: WeatherCache,
    quota: DailyQuota,
    positions: Mutex<HashMap<String, DevicePosition>>,
    weather_breaker: CircuitBreaker,
    wttr_breaker: CircuitBreaker,
    config: WeatherCoordinatorConfig,
}

impl WeatherCoordinator {
    pub fn new(http: reqwest::Client, cache_dir: PathBuf, config: WeatherCoordinatorConfig) -> Self {
        Self {
            http,
            cache: WeatherCache::new(cache_dir, config.cache_max_files, config.cache_max_bytes),
            quota: DailyQuota::new(config.daily_quota),
            positions: Mutex::new(HashMap::new()),
            weather_breaker: CircuitBreaker::new(
                "OpenMeteo",
                config.breaker_failure_threshold,
                Duration::from_secs(config.breaker_open_timeout_seconds),
            ),
            wttr_breaker: CircuitBreaker::new(
                "WTTR",
                config.wttr_breaker_failure_threshold,
                Duration::from_secs(config.wttr_breaker_open_timeout_seconds),
            ),
            config,
        }
    }

    pub fn breaker_statuses(&self) -> Vec<crate::circuit_breaker::BreakerStatus> {
        vec![self.weather_breaker.status(), self.wttr_breaker.status()]
    }

    fn should_force_update(&self, device_id: &str, lat: f64, lon: f64) -> bool {
        let positions = self.positions.lock().unwrap();
        let Some(last) = positions.get(device_id) else {
            return true;
        };
        let age = (Utc::now() - last.last_weather_update).num_seconds();
        if age < self.config.cooldown_seconds {
            return false;
        }
        if age > self.config.stale_seconds {
            return true;
        }
        haversine_km(lat, lon, last.lat, last.lon) > self.config.movement_threshold_km
    }

    fn record_position(&self, device_id: &str, lat: f64, lon: f64) {
        let mut positions = self.positions.lock().unwrap();
        positions.insert(
            device_id.to_string(),
            DevicePosition {
                lat,
                lon,
                last_weather_update: Utc::now(),
            },
        );
    }

    /// Returns the weather fields to merge onto the transform input, with
    /// `weather_fetch_lat`/`weather_fetch_lon`/`weather_fetch_ts` attached,
    /// or `None` when gating suppressed the lookup (the transformer then
    /// carries the prior diagnostics.weather state forward unchanged).
    pub async fn enrich(&self, device_id: &str, lat: f64, lon: f64) -> Option<Value> {
        if !self.should_force_update(device_id, lat, lon) {
            return None;
        }

        let (mut data, fetched_at) = if let Some((cached, cached_at)) = self.cache.find(lat, lon).await {
            (cached, cached_at)
        } else {
            if self.quota.is_limited() {
                return None;
            }
            let api_data = self.fetch_from_api(lat, lon).await?;
            self.quota.increment();
            let saved_at = self.cache.save(lat, lon, &api_data).await.unwrap_or_else(Utc::now);
            (api_data, saved_at)
        };

        data["weather_fetch_lat"] = json!(lat);
        data["weather_fetch_lon"] = json!(lon);
        data["weather_fetch_ts"] = json!(fetched_at.to_rfc3339());

        self.record_position(device_id, lat, lon);
        Some(data)
    }

    async fn fetch_from_api(&self, lat: f64, lon: f64) -> Option<Value> {
        if self.weather_breaker.allow() {
            match fetch_openmeteo_data(
                &self.http,
                lat,
                lon,
                Duration::from_secs(self.config.primary_timeout_seconds),
                Duration::from_secs(self.config.marine_timeout_seconds),
            )
            .await
            {
                Ok(Some(data)) => {
                    self.weather_breaker.record_success();
                    return Some(data);
                }
                Ok(None) | Err(_) => self.weather_breaker.record_failure(),
            }
        }
        if self.wttr_breaker.allow() {
            match fetch_wttr_weather(
                &self.http,
                lat,
                lon,
                Duration::from_secs(self.config.fallback_timeout_seconds),
            )
            .await
            {
                Ok(data) => {
                    self.wttr_breaker.record_success();
                    return Some(data);
                }
                Err(_) => self.wttr_breaker.record_failure(),
            }
        }
        None
    }
}

async fn fetch_openmeteo_data(
    client: &reqwest::Client,
    lat: f64,
    lon: f64,
    weather_timeout: Duration,
    marine_timeout: Duration,
) -> Result<Option<Value>, reqwest::Error> {
    let weather_url = "https://api.open-meteo.com/v1/forecast";
    let marine_url = "https://marine-api.open-meteo.com/v1/marine";

    let weather_request = client.get(weather_url).timeout(weather_timeout).query(&[
        ("latitude", lat.to_string()),
        ("longitude", lon.to_string()),
        ("timezone", "UTC".to_string()),
        ("wind_speed_unit", "ms".to_string()),
        (
            "current",
            "temperature_2m,relative_humidity_2m,apparent_temperature,precipitation,weather_code,wind_speed_10m,wind_direction_10m,wind_gusts_10m,pressure_msl,cloud_cover".to_string(),
        ),
    ]).send();

    let marine_request = client.get(marine_url).timeout(marine_timeout).query(&[
        ("latitude", lat.to_string()),
        ("longitude", lon.to_string()),
        ("timezone", "UTC".to_string()),
        (
            "current",
            "wave_height,wave_direction,wave_period,swell_wave_height,swell_wave_direction,swell_wave_period".to_string(),
        ),
    ]).send();

    let (weather_result, marine_result) = futures::join!(weather_request, marine_request);

    let mut merged = serde_json::Map::new();
    if let Ok(response) = weather_result {
        if response.status().is_success() {
            if let Ok(body) = response.json::<Value>().await {
                if let Some(current) = body.get("current") {
                    merged.insert("temperature".into(), current["temperature_2m"].clone());
                    merged.insert("humidity".into(), current["relative_humidity_2m"].clone());
                    merged.insert("apparent_temp".into(), current["apparent_temperature"].clone());
                    merged.insert("precipitation".into(), current["precipitation"].clone());
                    merged.insert("code".into(), current["weather_code"].clone());
                    merged.insert("wind_speed".into(), current["wind_speed_10m"].clone());
                    merged.insert("wind_direction".into(), current["wind_direction_10m"].clone());
                    merged.insert("wind_gusts".into(), current["wind_gusts_10m"].clone());
                    merged.insert("pressure_msl".into(), current["pressure_msl"].clone());
                    merged.insert("cloud_cover".into(), current["cloud_cover"].clone());
                }
            }
        }
    }
    if let Ok(response) = marine_result {
        if response.status().is_success() {
            if let Ok(body) = response.json::<Value>().await {
                if let Some(current) = body.get("current") {
                    merged.insert("marine_wave_height".into(), current["wave_height"].clone());
                    merged.insert("marine_wave_direction".into(), current["wave_direction"].clone());
                    merged.insert("marine_wave_period".into(), current["wave_period"].clone());
                    merged.insert("marine_swell_wave_height".into(), current["swell_wave_height"].clone());
                    merged.insert("marine_swell_wave_direction".into(), current["swell_wave_direction"].clone());
                    merged.insert("marine_swell_wave_period".into(), current["swell_wave_period"].clone());
                }
            }
        }
    }

    if merged.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Value::Object(merged)))
    }
}

async fn fetch_wttr_weather(
    client: &reqwest::Client,
    lat: f64,
    lon: f64,
    timeout: Duration,
) -> Result<Value, reqwest::Error> {
    let url = format!("https://wttr.in/{lat},{lon}?format=j1");
    let response = client.get(url).timeout(timeout).send().await?.error_for_status()?;
    let body: Value = response.json().await?;
    let current = body["current_condition"][0].clone();

    let as_f64 = |key: &str| current.get(key).and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
    let as_i64 = |key: &str| current.get(key).and_then(Value::as_str).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);

    let wind_speed_kmh = as_f64("windspeedKmph");
    Ok(json!({
        "temperature": as_f64("temp_C"),
        "humidity": as_i64("humidity"),
        "apparent_temp": as_f64("FeelsLikeC"),
        "precipitation": as_f64("precipMM"),
        "wind_speed": wind_speed_kmh * (1000.0 / 3600.0),
        "wind_direction": as_i64("winddirDegree"),
        "pressure_msl": as_f64("pressure"),
        "cloud_cover": as_i64("cloudcover"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_coordinator(cache_dir: PathBuf) -> WeatherCoordinator {
        WeatherCoordinator::new(reqwest::Client::new(), cache_dir, WeatherCoordinatorConfig::default())
    }

    #[test]
    fn quota_rolls_over_on_new_day() {
        let quota = DailyQuota::new(9000);
        for _ in 0..9000 {
            quota.increment();
        }
        assert!(quota.is_limited());
        *quota.day.lock().unwrap() = Utc::now().date_naive() - chrono::Duration::days(1);
        assert!(!quota.is_limited());
    }

    #[tokio::test]
    async fn fresh_device_forces_update() {
        let coordinator = test_coordinator(std::env::temp_dir().join("wx_test_fresh"));
        assert!(coordinator.should_force_update("dev-1", 48.0, 11.0));
    }

    #[tokio::test]
    async fn cooldown_suppresses_rapid_repeat_updates() {
        let coordinator = test_coordinator(std::env::temp_dir().join("wx_test_cooldown"));
        coordinator.record_position("dev-1", 48.0, 11.0);
        assert!(!coordinator.should_force_update("dev-1", 48.0, 11.0));
    }

    #[tokio::test]
    async fn movement_past_threshold_forces_update_even_within_expiry() {
        let coordinator = test_coordinator(std::env::temp_dir().join("wx_test_move"));
        {
            let mut positions = coordinator.positions.lock().unwrap();
            positions.insert(
                "dev-1".to_string(),
                DevicePosition {
                    lat: 48.0,
                    lon: 11.0,
                    last_weather_update: Utc::now() - chrono::Duration::seconds(coordinator.config.cooldown_seconds + 1),
                },
            );
        }
        assert!(coordinator.should_force_update("dev-1", 49.0, 11.0));
    }
}
