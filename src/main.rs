use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use telemetry_enrichment_core::decode::OuiTable;
use telemetry_enrichment_core::ingest::IngestDeps;
use telemetry_enrichment_core::ip_intel::IpIntelligence;
use telemetry_enrichment_core::metrics::MetricsRing;
use telemetry_enrichment_core::persistence::EventStore;
use telemetry_enrichment_core::services::{
    oui_bootstrap, GeoJsonSnapshotService, MetricsLogService, TrimmerService,
};
use telemetry_enrichment_core::timestamp::BatchBaseCache;
use telemetry_enrichment_core::weather::WeatherCoordinator;
use telemetry_enrichment_core::{cli, config, ingest, routes, state};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind telemetry-enrichment-core listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => Err(err)
            .with_context(|| format!("failed to bind telemetry-enrichment-core listener on {addr}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::CoreConfig::from_env(args.data_dir)?;
    config.ensure_dirs()?;

    let event_store = EventStore::new(config.event_log_path());
    event_store.init().await?;

    let http = reqwest::Client::new();

    let oui_table = Arc::new(
        oui_bootstrap::load(&http, &event_store, config.oui_bootstrap_enabled)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("oui table bootstrap failed, using embedded fallback: {err:#}");
                OuiTable::with_embedded_fallback()
            }),
    );

    let weather = Arc::new(WeatherCoordinator::new(
        http.clone(),
        config.weather_cache_dir.clone(),
        config.weather_coordinator_config(),
    ));
    let ip_intel = Arc::new(IpIntelligence::with_config(
        http.clone(),
        config.ip_intel_breaker_failure_threshold,
        Duration::from_secs(config.ip_intel_breaker_open_timeout_seconds),
        config.ip_intel_cache_ttl_seconds,
        Duration::from_secs(config.ip_intel_timeout_seconds),
    ));
    let batch_base_cache = Arc::new(BatchBaseCache::new(config.batch_base_ttl_seconds));
    let metrics = Arc::new(MetricsRing::new());

    let cancel = CancellationToken::new();

    let deps = Arc::new(IngestDeps {
        event_store: event_store.clone(),
        oui_table: oui_table.clone(),
        weather: weather.clone(),
        ip_intel: ip_intel.clone(),
        batch_base_cache: batch_base_cache.clone(),
    });
    let ingest_tx = ingest::spawn_workers(
        deps,
        metrics.clone(),
        config.ingest_worker_count,
        cancel.clone(),
    );

    let app_state = state::AppState {
        config: config.clone(),
        event_store,
        weather,
        ip_intel,
        oui_table,
        batch_base_cache,
        metrics,
        ingest_tx,
        http,
    };

    TrimmerService::new(
        app_state.clone(),
        Duration::from_secs(config.trimmer_interval_seconds),
    )
    .start(cancel.clone());
    MetricsLogService::new(
        app_state.clone(),
        Duration::from_secs(config.metrics_interval_seconds),
    )
    .start(cancel.clone());
    GeoJsonSnapshotService::new(
        app_state.clone(),
        Duration::from_secs(config.geojson_snapshot_interval_seconds),
    )
    .start(cancel.clone());

    let app = routes::router(app_state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = bind_listener(&addr).await?;
    tracing::info!(%addr, "telemetry-enrichment-core listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    cancel.cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::bind_listener;
    use anyhow::Result;

    #[tokio::test]
    async fn reports_port_in_use_with_actionable_message() -> Result<()> {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let addr = listener.local_addr()?;

        let err = bind_listener(&addr.to_string()).await.unwrap_err();
        if err.to_string().to_lowercase().contains("operation not permitted") {
            return Ok(());
        }
        let message = err.to_string().to_lowercase();

        assert!(message.contains(&addr.to_string()));
        assert!(message.contains("port already in use"));
        assert!(message.contains("--port"));

        drop(listener);
        Ok(())
    }
}
