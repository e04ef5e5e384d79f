//! IP intelligence (C5): ip-api.com lookups behind a circuit breaker, with
//! a 24-hour cache. Shaped into `{geolocation, network_provider, security}`
//! for storage under `diagnostics.ip_intelligence`.

use crate::circuit_breaker::CircuitBreaker;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const API_ENDPOINT: &str = "http://ip-api.com/json";

struct CacheEntry {
    value: Value,
    cached_at: DateTime<Utc>,
}

pub struct IpIntelligence {
    http: reqwest::Client,
    breaker: CircuitBreaker,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl_seconds: i64,
    request_timeout: Duration,
}

impl IpIntelligence {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_config(http, 5, Duration::from_secs(60), 24 * 3600, Duration::from_secs(3))
    }

    pub fn with_config(
        http: reqwest::Client,
        breaker_failure_threshold: u32,
        breaker_open_timeout: Duration,
        cache_ttl_seconds: i64,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http,
            breaker: CircuitBreaker::new("IP-API", breaker_failure_threshold, breaker_open_timeout),
            cache: Mutex::new(HashMap::new()),
            cache_ttl_seconds,
            request_timeout,
        }
    }

    pub fn breaker_status(&self) -> crate::circuit_breaker::BreakerStatus {
        self.breaker.status()
    }

    pub async fn lookup(&self, ip_address: &str) -> Option<Value> {
        if ip_address.is_empty() {
            return None;
        }
        if let Some(cached) = self.cached(ip_address) {
            return Some(cached);
        }
        if !self.breaker.allow() {
            return None;
        }
        match fetch_from_api(&self.http, ip_address, self.request_timeout).await {
            Ok(Some(data)) => {
                self.breaker.record_success();
                let shaped = shape(&data);
                self.cache.lock().unwrap().insert(
                    ip_address.to_string(),
                    CacheEntry {
                        value: shaped.clone(),
                        cached_at: Utc::now(),
                    },
                );
                Some(shaped)
            }
            Ok(None) => {
                self.breaker.record_success();
                None
            }
            Err(_) => {
                self.breaker.record_failure();
                None
            }
        }
    }

    fn cached(&self, ip_address: &str) -> Option<Value> {
        let cache = self.cache.lock().unwrap();
        let entry = cache.get(ip_address)?;
        if (Utc::now() - entry.cached_at).num_seconds() > self.cache_ttl_seconds {
            return None;
        }
        Some(entry.value.clone())
    }
}

async fn fetch_from_api(
    client: &reqwest::Client,
    ip_address: &str,
    timeout: Duration,
) -> Result<Option<Value>, reqwest::Error> {
    let url = format!(
        "{API_ENDPOINT}/{ip_address}?fields=status,message,country,regionName,city,zip,lat,lon,timezone,isp,org,as,proxy,hosting,query"
    );
    let response = client.get(url).timeout(timeout).send().await?.error_for_status()?;
    let body: Value = response.json().await?;
    if body.get("status").and_then(Value::as_str) != Some("success") {
        return Ok(None);
    }
    Ok(Some(body))
}

/// Groups the flat ip-api.com response into the three sections the read
/// API renders under `diagnostics.ip_intelligence`.
fn shape(raw: &Value) -> Value {
    json!({
        "geolocation": {
            "country": raw.get("country"),
            "region": raw.get("regionName"),
            "city": raw.get("city"),
            "zip": raw.get("zip"),
            "latitude": raw.get("lat"),
            "longitude": raw.get("lon"),
            "timezone": raw.get("timezone"),
        },
        "network_provider": {
            "isp": raw.get("isp"),
            "organization": raw.get("org"),
            "autonomous_system": raw.get("as"),
        },
        "security": {
            "proxy_detected": raw.get("proxy"),
            "hosting_detected": raw.get("hosting"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_groups_fields_into_three_sections() {
        let raw = json!({
            "status": "success", "country": "Germany", "city": "Munich",
            "lat": 48.1, "lon": 11.6, "isp": "Example ISP", "proxy": false, "hosting": false
        });
        let shaped = shape(&raw);
        assert_eq!(shaped["geolocation"]["city"], json!("Munich"));
        assert_eq!(shaped["network_provider"]["isp"], json!("Example ISP"));
        assert_eq!(shaped["security"]["proxy_detected"], json!(false));
    }

    #[tokio::test]
    async fn empty_ip_returns_none() {
        let intel = IpIntelligence::new(reqwest::Client::new());
        assert!(intel.lookup("").await.is_none());
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_lookup() {
        let intel = IpIntelligence::new(reqwest::Client::new());
        intel.cache.lock().unwrap().insert(
            "1.2.3.4".to_string(),
            CacheEntry {
                value: json!({"geolocation": {"city": "Cached"}}),
                cached_at: Utc::now(),
            },
        );
        let result = intel.lookup("1.2.3.4").await.unwrap();
        assert_eq!(result["geolocation"]["city"], json!("Cached"));
    }
}
