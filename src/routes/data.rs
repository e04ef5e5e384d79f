//! Read endpoints: `/data/latest/{device_id}`, `/data/history`,
//! `/data/devices`. Each wraps its `data` with `{request, navigation, ...}`
//! envelopes the way the original routes did, rebuilt against this crate's
//! render helpers in [`crate::read`] instead of ad hoc per-route sorting.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::RequireAuth;
use crate::error::{AppError, AppResult};
use crate::freshness;
use crate::read;
use crate::state::AppState;

fn scheme_from_headers(headers: &HeaderMap) -> &'static str {
    let forwarded = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());
    if forwarded.is_some_and(|value| value.eq_ignore_ascii_case("https")) {
        "https"
    } else {
        "http"
    }
}

fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme_from_headers(headers), host)
}

fn cleanup_empty(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: serde_json::Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, cleanup_empty(v)))
                .filter(|(_, v)| !matches!(v, Value::Null) && !is_empty_container(v))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => {
            let cleaned: Vec<Value> = items
                .into_iter()
                .map(cleanup_empty)
                .filter(|v| !matches!(v, Value::Null) && !is_empty_container(v))
                .collect();
            Value::Array(cleaned)
        }
        other => other,
    }
}

fn is_empty_container(value: &Value) -> bool {
    matches!(value, Value::Object(m) if m.is_empty()) || matches!(value, Value::Array(a) if a.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub device_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub cursor: Option<String>,
}

fn default_limit() -> i64 {
    50
}

fn parse_cursor(raw: &str) -> AppResult<(String, i64)> {
    let (ts, id) = raw
        .split_once(',')
        .ok_or_else(|| AppError::bad_request("Invalid cursor format."))?;
    let id: i64 = id
        .parse()
        .map_err(|_| AppError::bad_request("Invalid cursor format."))?;
    Ok((ts.to_string(), id))
}

async fn latest(
    State(state): State<AppState>,
    headers: HeaderMap,
    _auth: RequireAuth,
    Path(device_id): Path<String>,
) -> AppResult<Json<Value>> {
    let base = base_url(&headers);
    let Some((stored, _ts)) = state.event_store.latest(&device_id).await? else {
        return Err(AppError::not_found(format!("No state found for device '{device_id}'.")));
    };

    let data = read::render_latest(&stored, Utc::now());

    Ok(Json(json!({
        "request": {"self_url": format!("{base}/data/latest/{device_id}")},
        "navigation": {
            "root": format!("{base}/"),
            "history": format!("{base}/data/history?device_id={device_id}&limit=50"),
        },
        "data": data,
    })))
}

async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    _auth: RequireAuth,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Value>> {
    let base = base_url(&headers);
    let limit = query.limit.clamp(1, 500);
    let cursor = query.cursor.as_deref().map(parse_cursor).transpose()?;

    let page = state
        .event_store
        .history(query.device_id.as_deref(), limit, cursor)
        .await?;

    let records: Vec<Value> = page.records.iter().map(read::render_history_entry).collect();

    let mut navigation = serde_json::Map::new();
    navigation.insert("root".into(), json!(format!("{base}/")));
    if let Some(device_id) = &query.device_id {
        navigation.insert(
            "latest".into(),
            json!(format!("{base}/data/latest/{device_id}")),
        );
    }

    let next_cursor = page.next_cursor.as_ref().map(|(ts, id)| {
        json!({
            "raw": format!("{ts},{id}"),
            "timestamp": read::format_display_timestamp(ts),
            "id": id,
        })
    });
    if let Some((ts, id)) = &page.next_cursor {
        let mut params = vec![format!("limit={limit}")];
        if let Some(device_id) = &query.device_id {
            params.push(format!("device_id={device_id}"));
        }
        params.push(format!("cursor={ts},{id}"));
        navigation.insert(
            "next_page".into(),
            json!(format!("{base}/data/history?{}", params.join("&"))),
        );
    }

    let time_range = match (page.records.first(), page.records.last()) {
        (Some(first), Some(last)) => json!({
            "start": read::format_display_timestamp(&first.event_timestamp),
            "end": read::format_display_timestamp(&last.event_timestamp),
        }),
        _ => json!({}),
    };

    let pagination = cleanup_empty(json!({
        "limit": limit,
        "records_returned": records.len(),
        "next_cursor": next_cursor,
        "time_range": time_range,
    }));

    Ok(Json(json!({
        "request": {"self_url": format!("{base}/data/history")},
        "navigation": navigation,
        "pagination": pagination,
        "data": records,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DevicesQuery {
    #[serde(default = "default_devices_limit")]
    pub limit: i64,
}

fn default_devices_limit() -> i64 {
    20
}

async fn devices(
    State(state): State<AppState>,
    headers: HeaderMap,
    _auth: RequireAuth,
    Query(query): Query<DevicesQuery>,
) -> AppResult<Json<Value>> {
    let base = base_url(&headers);
    let summaries = state.event_store.recent_devices(query.limit).await?;

    let devices: Vec<Value> = summaries
        .iter()
        .map(|summary| {
            let plain = freshness::reconstruct(&freshness::Node::from_json(&summary.payload));
            json!({
                "device_id": summary.device_id,
                "device_name": plain.pointer("/identity/device_name"),
                "client_ip": plain.pointer("/network/source_ip"),
                "last_seen": read::format_display_timestamp(&summary.last_updated_ts),
                "total_records": summary.total_records,
                "links": {
                    "latest": format!("{base}/data/latest/{}", summary.device_id),
                    "history": format!("{base}/data/history?device_id={}&limit=50", summary.device_id),
                },
            })
        })
        .collect();

    Ok(Json(json!({
        "request": {"self_url": format!("{base}/data/devices?limit={}", query.limit)},
        "navigation": {"root": format!("{base}/")},
        "data": devices,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/latest/{device_id}", get(latest))
        .route("/history", get(history))
        .route("/devices", get(devices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cursor_accepts_ts_comma_id() {
        let (ts, id) = parse_cursor("2024-01-01 00:00:00,42").unwrap();
        assert_eq!(ts, "2024-01-01 00:00:00");
        assert_eq!(id, 42);
    }

    #[test]
    fn parse_cursor_rejects_malformed_input() {
        assert!(parse_cursor("not-a-cursor").is_err());
        assert!(parse_cursor("2024-01-01 00:00:00,not-a-number").is_err());
    }

    #[test]
    fn cleanup_empty_drops_nulls_and_empty_containers() {
        let value = json!({"a": null, "b": {}, "c": [], "d": "keep"});
        assert_eq!(cleanup_empty(value), json!({"d": "keep"}));
    }
}
