//! `GET /` server summary: status, recently-processed devices with traffic
//! estimates, on-disk database size/retention/ETA-to-full, and a static
//! endpoint discovery listing. Grounded on the original root summary route,
//! rebuilt against this crate's own aggregate queries.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::freshness;
use crate::read;
use crate::state::AppState;

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.eq_ignore_ascii_case("https"))
        .map(|_| "https")
        .unwrap_or("http");
    format!("{scheme}://{host}")
}

fn format_db_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as i32;
    let exponent = exponent.min(UNITS.len() as i32 - 1);
    let scaled = bytes as f64 / 1024f64.powi(exponent);
    format!("{} {}", scaled.round() as u64, UNITS[exponent as usize])
}

fn format_retention_period(days: f64) -> String {
    if days <= 0.0 {
        return "Less than a minute".to_string();
    }
    let seconds = days * 86_400.0;
    let plural = |value: f64| if value.round() as i64 != 1 { "s" } else { "" };
    if seconds < 3600.0 {
        let value = (seconds / 60.0).round();
        format!("{value} minute{}", plural(value))
    } else if seconds < 86_400.0 {
        let value = (seconds / 3600.0).round();
        format!("{value} hour{}", plural(value))
    } else if seconds < 86_400.0 * 7.0 {
        let value = (seconds / 86_400.0).round();
        format!("{value} day{}", plural(value))
    } else if seconds < 86_400.0 * 30.0 {
        let value = (seconds / (86_400.0 * 7.0)).round();
        format!("{value} week{}", plural(value))
    } else if seconds < 86_400.0 * 365.0 {
        let value = (seconds / (86_400.0 * 30.44)).round();
        format!("{value} month{}", plural(value))
    } else {
        let years = (seconds / (86_400.0 * 365.25) * 10.0).round() / 10.0;
        if years.fract() == 0.0 {
            format!("{} year{}", years as i64, plural(years))
        } else {
            format!("{years} years")
        }
    }
}

fn traffic_estimate(total_bytes: i64, first_seen_ts: &str) -> Value {
    if total_bytes == 0 {
        return json!({
            "average_total_traffic_per_day": "0 B",
            "average_total_traffic_per_week": "0 B",
            "average_total_traffic_per_month": "0 B",
        });
    }
    let Some(first_seen) = freshness::parse_event_ts(first_seen_ts) else {
        return json!({
            "average_total_traffic_per_day": "N/A",
            "average_total_traffic_per_week": "N/A",
            "average_total_traffic_per_month": "N/A",
        });
    };
    let days_active = ((Utc::now() - first_seen).num_seconds() as f64 / 86_400.0).max(1.0 / 24.0);
    let avg_per_day = total_bytes as f64 / days_active;
    json!({
        "average_total_traffic_per_day": format_db_size(avg_per_day as u64),
        "average_total_traffic_per_week": format_db_size((avg_per_day * 7.0) as u64),
        "average_total_traffic_per_month": format_db_size((avg_per_day * 30.44) as u64),
    })
}

async fn root(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let base = base_url(&headers);

    let summaries = state.event_store.recent_devices(10).await?;
    let recent_devices: Vec<Value> = summaries
        .iter()
        .map(|summary| {
            let plain = freshness::reconstruct(&freshness::Node::from_json(&summary.payload));
            json!({
                "device_id": summary.device_id,
                "device_name": plain.pointer("/identity/device_name"),
                "client_ip": plain.pointer("/network/source_ip"),
                "last_seen": read::format_display_timestamp(&summary.last_updated_ts),
                "total_records": summary.total_records,
                "traffic": traffic_estimate(summary.total_bytes, &summary.first_seen_ts),
                "links": {
                    "latest": format!("{base}/data/latest/{}", summary.device_id),
                    "history": format!("{base}/data/history?device_id={}&limit=50", summary.device_id),
                },
            })
        })
        .collect();

    let total_records = state.event_store.event_count().await.unwrap_or(0);
    let total_devices = state.event_store.device_count().await.unwrap_or(0);
    let (oldest, newest) = state
        .event_store
        .event_timestamp_range()
        .await
        .unwrap_or((None, None));

    let db_path = state.event_store.path();
    let mut database_files = Vec::new();
    let mut total_db_size: u64 = 0;
    for suffix in ["", "-wal", "-shm"] {
        let path = db_path.with_file_name(format!(
            "{}{suffix}",
            db_path.file_name().and_then(|n| n.to_str()).unwrap_or("")
        ));
        if let Ok(metadata) = std::fs::metadata(&path) {
            total_db_size += metadata.len();
            database_files.push(json!({
                "file": path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
                "size": format_db_size(metadata.len()),
            }));
        }
    }

    let mut storage_estimation = serde_json::Map::new();
    if let (Some(oldest_ts), Some(newest_ts)) = (&oldest, &newest) {
        if total_records > 1000 {
            if let (Some(oldest_dt), Some(newest_dt)) =
                (freshness::parse_event_ts(oldest_ts), freshness::parse_event_ts(newest_ts))
            {
                let days_of_data = (newest_dt - oldest_dt).num_seconds() as f64 / 86_400.0;
                if days_of_data > 0.0001 {
                    let rate_bytes_day = total_db_size as f64 / days_of_data;
                    let limit_bytes = state.config.event_log_high_water_bytes as f64;
                    storage_estimation.insert("database_retention".into(), json!(format_retention_period(days_of_data)));
                    storage_estimation.insert("storage_rate_per_day".into(), json!(format_db_size(rate_bytes_day as u64)));
                    let remaining = limit_bytes - total_db_size as f64;
                    if rate_bytes_day > 0.0 && remaining > 0.0 {
                        let days_left = remaining / rate_bytes_day;
                        let estimate = if days_left > 60.0 {
                            format!("{:.1} months", days_left / 30.0)
                        } else {
                            format!("{days_left:.1} days")
                        };
                        storage_estimation.insert("estimated_time_until_full".into(), json!(estimate));
                    }
                }
            }
        }
    }

    let (recent_events, avg_batch_duration_seconds) = state.metrics.throughput_summary(100);
    let breakers: Vec<Value> = state
        .weather
        .breaker_statuses()
        .into_iter()
        .chain(std::iter::once(state.ip_intel.breaker_status()))
        .map(|status| {
            json!({
                "name": status.name,
                "state": status.state,
                "failures": status.failures,
            })
        })
        .collect();
    let system_health = json!({
        "circuit_breakers": breakers,
        "recent_batches_processed": state.metrics.len(),
        "recent_events_processed": recent_events,
        "average_batch_duration_seconds": avg_batch_duration_seconds,
    });

    let db_stats = json!({
        "total_processed_records": total_records,
        "total_unique_devices": total_devices,
        "oldest_record_timestamp_utc": oldest.as_deref().map(read::format_display_timestamp),
        "newest_record_timestamp_utc": newest.as_deref().map(read::format_display_timestamp),
        "database_files": database_files,
        "total_database_size": format_db_size(total_db_size),
        "database_size_limit": format_db_size(state.config.event_log_high_water_bytes),
        "storage_estimation": storage_estimation,
    });

    Ok(Json(json!({
        "request": {"self_url": format!("{base}/")},
        "server": "Telemetry Enrichment Core",
        "status": "online",
        "diagnostics": {
            "database_stats": db_stats,
            "ingest_status": "Receiving data from upstream intake",
            "system_health": system_health,
        },
        "recently_processed_devices": recent_devices,
        "api_endpoints": {
            "Intake": [
                {"path": format!("{base}/api/internal/notify"), "methods": ["POST"]},
            ],
            "Data Access": [
                {"path": format!("{base}/data/latest/{{device_id}}"), "methods": ["GET"]},
                {"path": format!("{base}/data/history"), "methods": ["GET"]},
                {"path": format!("{base}/data/devices"), "methods": ["GET"]},
            ],
        },
    })))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_db_size_scales_units() {
        assert_eq!(format_db_size(0), "0 B");
        assert_eq!(format_db_size(512), "512 B");
        assert_eq!(format_db_size(2048), "2 KB");
    }

    #[test]
    fn format_retention_period_picks_largest_fitting_unit() {
        assert_eq!(format_retention_period(0.0), "Less than a minute");
        assert_eq!(format_retention_period(1.0), "1 day");
        assert_eq!(format_retention_period(10.0), "1 week");
    }

    #[test]
    fn traffic_estimate_reports_zero_when_no_bytes_seen() {
        let estimate = traffic_estimate(0, "2024-01-01 00:00:00");
        assert_eq!(estimate["average_total_traffic_per_day"], json!("0 B"));
    }
}
