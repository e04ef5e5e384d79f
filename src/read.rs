//! Read-side rendering (the render half of C9). Persistence and the
//! freshness/diff math live in [`crate::persistence`] and
//! [`crate::freshness`]; this module turns their raw output into the
//! shapes the read endpoints hand back to callers.

use crate::freshness::{self, Node};
use crate::persistence::HistoryRecord;
use crate::transform::{app_settings, derived};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Renders a device's stored freshness tree into the `data` object for
/// `GET /data/latest/{device_id}`: ages attached under
/// `diagnostics.data_freshness`, app_settings grouped/renamed, the weather
/// subtree's ages overridden from its own fetch timestamp, and
/// latitude/longitude rounded to the geohash precision that produced them.
pub fn render_latest(stored_payload: &Value, now: DateTime<Utc>) -> Value {
    let node = Node::from_json(stored_payload);
    let (mut plain, mut ages) = freshness::parse_with_ages(&node, now);

    if let Some(app_settings) = plain.get("app_settings").cloned() {
        plain["app_settings"] = app_settings::group_and_rename_app_settings(&app_settings);
    }
    if let Some(app_ages) = ages.get("app_settings").cloned() {
        ages["app_settings"] = app_settings::rename_age_keys(&app_ages);
    }

    override_weather_ages(&plain, &mut ages, now);
    round_coordinates(&mut plain);

    plain["diagnostics"]["data_freshness"] = ages;
    plain
}

/// §4.9: when the weather subtree carries a fresh fetch timestamp, every
/// age under `environment.weather` is replaced with the actual elapsed
/// time since that fetch rather than each leaf's own last-changed time —
/// the weather data can be minutes old even when its individual fields
/// haven't needed to change since the last fetch.
fn override_weather_ages(plain: &Value, ages: &mut Value, now: DateTime<Utc>) {
    let Some(ts_str) = plain
        .pointer("/diagnostics/weather/weather_request_timestamp_utc")
        .and_then(Value::as_str)
    else {
        return;
    };
    let Some(fetch_ts) = freshness::parse_event_ts(ts_str) else {
        return;
    };
    let age = (now - fetch_ts).num_seconds().max(0);
    if let Some(weather_ages) = ages.pointer_mut("/environment/weather") {
        replace_ages_recursively(weather_ages, age);
    }
}

fn replace_ages_recursively(value: &mut Value, age: i64) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                replace_ages_recursively(v, age);
            }
        }
        Value::Number(_) => *value = Value::from(age),
        _ => {}
    }
}

fn round_coordinates(plain: &mut Value) {
    let precision = plain
        .pointer("/location/geohash_precision_in_meters")
        .and_then(Value::as_u64);
    let decimals = derived::coordinate_decimals(precision);
    if let Some(lat) = plain.pointer("/location/latitude").and_then(Value::as_f64) {
        plain["location"]["latitude"] = round_to(lat, decimals);
    }
    if let Some(lon) = plain.pointer("/location/longitude").and_then(Value::as_f64) {
        plain["location"]["longitude"] = round_to(lon, decimals);
    }
}

fn round_to(value: f64, decimals: u32) -> Value {
    let factor = 10f64.powi(decimals as i32);
    Value::from((value * factor).round() / factor)
}

/// Renders a stored `YYYY-MM-DD HH:MM:SS` timestamp into the user-facing
/// `DD.MM.YYYY HH:MM:SS UTC` form used across the read endpoints. Falls
/// back to the raw string for anything that doesn't parse.
pub fn format_display_timestamp(stored: &str) -> String {
    match freshness::parse_event_ts(stored) {
        Some(ts) => ts.format("%d.%m.%Y %H:%M:%S UTC").to_string(),
        None => stored.to_string(),
    }
}

/// One rendered history entry: `changes` with its `diagnostics` subtree
/// lifted out into a sibling `diagnostics` field, per §4.9/§6.
pub fn render_history_entry(record: &HistoryRecord) -> Value {
    let mut changes = record.delta.clone();
    let diagnostics = changes
        .as_object_mut()
        .and_then(|obj| obj.remove("diagnostics"))
        .unwrap_or(json!({}));

    json!({
        "id": record.id,
        "original_ingest_id": record.original_ingest_id,
        "changes": changes,
        "diagnostics": diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_latest_attaches_ages_and_rounds_coordinates() {
        let now = DateTime::<Utc>::from_timestamp(2_000, 0).unwrap();
        let stored = json!({
            "location": {
                "latitude": {"value": 48.123456, "ts": "1970-01-01 00:00:00"},
                "longitude": {"value": 11.654321, "ts": "1970-01-01 00:00:00"},
                "geohash_precision_in_meters": {"value": 5000, "ts": "1970-01-01 00:00:00"},
            },
            "power": {
                "battery_percent": {"value": 50, "ts": "1970-01-01 00:00:00"},
            },
        });
        let rendered = render_latest(&stored, now);
        assert_eq!(rendered["diagnostics"]["data_freshness"]["power"]["battery_percent_age_in_seconds"], json!(2000));
        assert_eq!(rendered["location"]["latitude"], json!(48.12));
    }

    #[test]
    fn render_latest_overrides_weather_ages_from_fetch_timestamp() {
        let now = DateTime::<Utc>::from_timestamp(10_000, 0).unwrap();
        let stored = json!({
            "environment": {
                "weather": {
                    "temperature_in_celsius": {"value": 20.0, "ts": "1970-01-01 00:00:00"},
                },
            },
            "diagnostics": {
                "weather": {
                    "weather_request_timestamp_utc": {"value": "1970-01-01 02:46:30", "ts": "1970-01-01 00:00:00"},
                },
            },
        });
        let rendered = render_latest(&stored, now);
        let age = rendered["diagnostics"]["data_freshness"]["environment"]["weather"]["temperature_in_celsius_age_in_seconds"]
            .as_i64()
            .unwrap();
        assert_eq!(age, 10_000 - 9_990);
    }

    #[test]
    fn format_display_timestamp_renders_day_month_year() {
        assert_eq!(format_display_timestamp("2024-03-07 13:45:00"), "07.03.2024 13:45:00 UTC");
        assert_eq!(format_display_timestamp("not-a-timestamp"), "not-a-timestamp");
    }

    #[test]
    fn render_history_entry_lifts_diagnostics_out_of_changes() {
        let record = HistoryRecord {
            id: 1,
            original_ingest_id: "req-1".into(),
            event_timestamp: "2024-01-01 00:00:00".into(),
            payload: json!({}),
            delta: json!({"power": {"battery_percent": 40}, "diagnostics": {"ingest_request_id": "req-1"}}),
        };
        let rendered = render_history_entry(&record);
        assert_eq!(rendered["changes"]["power"]["battery_percent"], json!(40));
        assert!(rendered["changes"].get("diagnostics").is_none());
        assert_eq!(rendered["diagnostics"]["ingest_request_id"], json!("req-1"));
    }
}
