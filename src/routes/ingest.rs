//! Webhook intake: `POST /api/internal/notify` hands a batch straight to
//! the ingest worker pool's channel. This route is a thin adapter — all
//! enrichment logic lives in [`crate::ingest`].

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::{IngestBatch, IngestRecord};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub records: Vec<NotifyRecord>,
}

#[derive(Debug, Deserialize)]
pub struct NotifyRecord {
    pub id: String,
    pub device_id: Option<String>,
    pub payload: Value,
    pub received_at: Option<DateTime<Utc>>,
    pub request_headers: Option<Value>,
    pub warnings: Option<Value>,
}

impl From<NotifyRecord> for IngestRecord {
    fn from(record: NotifyRecord) -> Self {
        IngestRecord {
            original_ingest_id: record.id,
            device_id: record.device_id,
            payload: record.payload,
            received_at: record.received_at,
            request_headers: record.request_headers,
            warnings: record.warnings,
        }
    }
}

async fn notify(
    State(state): State<AppState>,
    Json(body): Json<NotifyRequest>,
) -> Result<StatusCode, StatusCode> {
    let batch = IngestBatch {
        records: body.records.into_iter().map(IngestRecord::from).collect(),
    };
    match state.ingest_tx.try_send(batch) {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/internal/notify", post(notify))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_record_maps_onto_ingest_record() {
        let record = NotifyRecord {
            id: "req-1".into(),
            device_id: Some("dev-1".into()),
            payload: serde_json::json!({"p": 50}),
            received_at: None,
            request_headers: None,
            warnings: None,
        };
        let ingest: IngestRecord = record.into();
        assert_eq!(ingest.original_ingest_id, "req-1");
        assert_eq!(ingest.device_id.as_deref(), Some("dev-1"));
    }
}
