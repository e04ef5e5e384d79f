use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment-driven configuration for the enrichment service. Every
/// setting has a sensible local default so the binary runs out of the box
/// with `--data-dir` pointed at a scratch directory.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub event_log_high_water_bytes: u64,
    pub event_log_low_water_bytes: u64,
    pub trimmer_batch_size: i64,
    pub trimmer_interval_seconds: u64,
    pub metrics_interval_seconds: u64,
    pub geojson_snapshot_interval_seconds: u64,

    pub weather_cache_dir: PathBuf,
    pub weather_cache_max_files: usize,
    pub weather_cache_max_bytes: u64,
    pub weather_daily_quota: u32,
    pub weather_stale_seconds: i64,
    pub weather_moved_meters: f64,
    pub weather_cooldown_seconds: i64,
    pub weather_primary_timeout_seconds: u64,
    pub weather_marine_timeout_seconds: u64,
    pub weather_fallback_timeout_seconds: u64,
    pub weather_breaker_failure_threshold: u32,
    pub weather_breaker_open_timeout_seconds: u64,
    pub wttr_breaker_failure_threshold: u32,
    pub wttr_breaker_open_timeout_seconds: u64,

    pub ip_intel_timeout_seconds: u64,
    pub ip_intel_cache_ttl_seconds: i64,
    pub ip_intel_breaker_failure_threshold: u32,
    pub ip_intel_breaker_open_timeout_seconds: u64,

    pub batch_base_ttl_seconds: i64,
    pub device_position_ttl_seconds: i64,

    pub ingest_worker_count: usize,
    pub localhost_bypass_enabled: bool,
    pub auth_token: Option<String>,

    pub oui_bootstrap_enabled: bool,
}

impl CoreConfig {
    pub fn from_env(cli_data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = cli_data_dir
            .or_else(|| env_optional_path("TELEMETRY_DATA_DIR"))
            .unwrap_or_else(|| PathBuf::from("./data"));
        if data_dir.as_os_str().is_empty() {
            anyhow::bail!("TELEMETRY_DATA_DIR resolved to an empty path");
        }

        let weather_cache_dir = env_optional_path("TELEMETRY_WEATHER_CACHE_DIR")
            .unwrap_or_else(|| data_dir.join("weather-cache"));

        Ok(Self {
            event_log_high_water_bytes: env_u64(
                "TELEMETRY_EVENT_LOG_HIGH_WATER_BYTES",
                10 * 1024 * 1024 * 1024,
            ),
            event_log_low_water_bytes: env_u64(
                "TELEMETRY_EVENT_LOG_LOW_WATER_BYTES",
                9 * 1024 * 1024 * 1024,
            ),
            trimmer_batch_size: env_u64("TELEMETRY_TRIMMER_BATCH_SIZE", 1000) as i64,
            trimmer_interval_seconds: env_u64("TELEMETRY_TRIMMER_INTERVAL_SECONDS", 6 * 3600),
            metrics_interval_seconds: env_u64("TELEMETRY_METRICS_INTERVAL_SECONDS", 15),
            geojson_snapshot_interval_seconds: env_u64(
                "TELEMETRY_GEOJSON_SNAPSHOT_INTERVAL_SECONDS",
                300,
            ),

            weather_cache_dir,
            weather_cache_max_files: env_u64("TELEMETRY_WEATHER_CACHE_MAX_FILES", 100) as usize,
            weather_cache_max_bytes: env_u64("TELEMETRY_WEATHER_CACHE_MAX_BYTES", 50 * 1024 * 1024),
            weather_daily_quota: env_u64("TELEMETRY_WEATHER_DAILY_QUOTA", 9000) as u32,
            weather_stale_seconds: env_u64("TELEMETRY_WEATHER_STALE_SECONDS", 3600) as i64,
            weather_moved_meters: env_f64("TELEMETRY_WEATHER_MOVED_METERS", 1000.0),
            weather_cooldown_seconds: env_u64("TELEMETRY_WEATHER_COOLDOWN_SECONDS", 60) as i64,
            weather_primary_timeout_seconds: env_u64("TELEMETRY_WEATHER_PRIMARY_TIMEOUT_SECONDS", 5),
            weather_marine_timeout_seconds: env_u64("TELEMETRY_WEATHER_MARINE_TIMEOUT_SECONDS", 5),
            weather_fallback_timeout_seconds: env_u64(
                "TELEMETRY_WEATHER_FALLBACK_TIMEOUT_SECONDS",
                4,
            ),
            weather_breaker_failure_threshold: env_u64(
                "TELEMETRY_WEATHER_BREAKER_FAILURE_THRESHOLD",
                3,
            ) as u32,
            weather_breaker_open_timeout_seconds: env_u64(
                "TELEMETRY_WEATHER_BREAKER_OPEN_TIMEOUT_SECONDS",
                30,
            ),
            wttr_breaker_failure_threshold: env_u64("TELEMETRY_WTTR_BREAKER_FAILURE_THRESHOLD", 2)
                as u32,
            wttr_breaker_open_timeout_seconds: env_u64(
                "TELEMETRY_WTTR_BREAKER_OPEN_TIMEOUT_SECONDS",
                20,
            ),

            ip_intel_timeout_seconds: env_u64("TELEMETRY_IP_INTEL_TIMEOUT_SECONDS", 3),
            ip_intel_cache_ttl_seconds: env_u64("TELEMETRY_IP_INTEL_CACHE_TTL_SECONDS", 24 * 3600)
                as i64,
            ip_intel_breaker_failure_threshold: env_u64(
                "TELEMETRY_IP_INTEL_BREAKER_FAILURE_THRESHOLD",
                5,
            ) as u32,
            ip_intel_breaker_open_timeout_seconds: env_u64(
                "TELEMETRY_IP_INTEL_BREAKER_OPEN_TIMEOUT_SECONDS",
                60,
            ),

            batch_base_ttl_seconds: env_u64("TELEMETRY_BATCH_BASE_TTL_SECONDS", 6 * 3600) as i64,
            device_position_ttl_seconds: env_u64(
                "TELEMETRY_DEVICE_POSITION_TTL_SECONDS",
                30 * 24 * 3600,
            ) as i64,

            ingest_worker_count: env_u64("TELEMETRY_INGEST_WORKER_COUNT", 4) as usize,
            localhost_bypass_enabled: env_bool("TELEMETRY_LOCALHOST_BYPASS", true),
            auth_token: env_optional_string("TELEMETRY_AUTH_TOKEN"),

            oui_bootstrap_enabled: env_bool("TELEMETRY_OUI_BOOTSTRAP_ENABLED", false),

            data_dir,
        })
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join("telemetry.sqlite3")
    }

    pub fn weather_coordinator_config(&self) -> crate::weather::WeatherCoordinatorConfig {
        crate::weather::WeatherCoordinatorConfig {
            movement_threshold_km: self.weather_moved_meters / 1000.0,
            stale_seconds: self.weather_stale_seconds,
            cooldown_seconds: self.weather_cooldown_seconds,
            daily_quota: self.weather_daily_quota,
            cache_max_files: self.weather_cache_max_files,
            cache_max_bytes: self.weather_cache_max_bytes,
            primary_timeout_seconds: self.weather_primary_timeout_seconds,
            marine_timeout_seconds: self.weather_marine_timeout_seconds,
            fallback_timeout_seconds: self.weather_fallback_timeout_seconds,
            breaker_failure_threshold: self.weather_breaker_failure_threshold,
            breaker_open_timeout_seconds: self.weather_breaker_open_timeout_seconds,
            wttr_breaker_failure_threshold: self.wttr_breaker_failure_threshold,
            wttr_breaker_open_timeout_seconds: self.wttr_breaker_open_timeout_seconds,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create data dir {}", self.data_dir.display()))?;
        std::fs::create_dir_all(&self.weather_cache_dir).with_context(|| {
            format!(
                "failed to create weather cache dir {}",
                self.weather_cache_dir.display()
            )
        })?;
        Ok(())
    }
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|value| value.trim().to_lowercase())
    {
        Some(value) if value == "1" || value == "true" || value == "yes" => true,
        Some(value) if value == "0" || value == "false" || value == "no" => false,
        _ => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_env_set() {
        let config = CoreConfig::from_env(Some(PathBuf::from("/tmp/telemetry-test"))).unwrap();
        assert_eq!(config.weather_daily_quota, 9000);
        assert_eq!(config.weather_breaker_failure_threshold, 3);
        assert_eq!(config.wttr_breaker_failure_threshold, 2);
    }
}
