use crate::config::CoreConfig;
use crate::decode::OuiTable;
use crate::ingest::IngestBatch;
use crate::ip_intel::IpIntelligence;
use crate::metrics::MetricsRing;
use crate::persistence::EventStore;
use crate::timestamp::BatchBaseCache;
use crate::weather::WeatherCoordinator;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub config: CoreConfig,
    pub event_store: EventStore,
    pub weather: Arc<WeatherCoordinator>,
    pub ip_intel: Arc<IpIntelligence>,
    pub oui_table: Arc<OuiTable>,
    pub batch_base_cache: Arc<BatchBaseCache>,
    pub metrics: Arc<MetricsRing>,
    pub ingest_tx: mpsc::Sender<IngestBatch>,
    pub http: Client,
}
