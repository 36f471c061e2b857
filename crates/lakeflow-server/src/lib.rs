// lakeflow-server - HTTP surface and background schedulers
//
// One axum server fronts the whole pipeline: ingestion, catalog,
// transform, replication control, query and bulk load. Background tasks
// drain age-expired ingest buffers, refresh the catalog on its cadence
// and run the transform engine over every raw source.

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use lakeflow_core::Zone;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::signal;

mod error;
mod handlers;
mod state;

pub use error::AppError;
pub use state::AppState;

/// How often the background flusher checks for age-expired batches. Kept
/// well under the batch age threshold so latency stays close to it.
const FLUSH_TICK: Duration = Duration::from_secs(1);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/records", post(handlers::ingest_records))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/v1/catalog/:zone", get(handlers::catalog_describe))
        .route("/v1/catalog/:zone/refresh", post(handlers::catalog_refresh))
        .route("/v1/transform/run", post(handlers::transform_run))
        .route("/v1/query", post(handlers::query))
        .route("/v1/warehouse/load", post(handlers::warehouse_load))
        .route(
            "/v1/cdc/tasks",
            get(handlers::cdc_status_all).post(handlers::cdc_start),
        )
        .route("/v1/cdc/tasks/:table", get(handlers::cdc_status))
        .route("/v1/cdc/tasks/:table/stop", post(handlers::cdc_stop))
        .route("/v1/cdc/tasks/:table/resume", post(handlers::cdc_resume))
        .with_state(state)
}

/// Run the server until SIGTERM/Ctrl+C, then drain every buffer before
/// returning. Records accepted before shutdown are never lost to it.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.server.listen_addr.clone();

    let flusher = tokio::spawn(run_flusher(state.clone()));
    let catalog_scheduler = tokio::spawn(lakeflow_catalog::run_refresh_scheduler(
        state.catalog.clone(),
        state.config.catalog.refresh_interval(),
    ));
    let transform_scheduler = tokio::spawn(run_transform_scheduler(state.clone()));

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    flusher.abort();
    catalog_scheduler.abort();
    transform_scheduler.abort();

    drain_on_shutdown(&state).await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Seal and write every buffer regardless of age or size.
async fn drain_on_shutdown(state: &AppState) {
    let batches = state.gateway.drain_all();
    if batches.is_empty() {
        return;
    }
    tracing::info!(batches = batches.len(), "draining buffers before exit");
    for batch in batches {
        if let Err(e) = state.writer.write_batch(&batch).await {
            tracing::error!(error = %e, "failed to drain batch during shutdown");
        }
    }
}

/// Age-trigger loop: without it a slow partition would sit buffered
/// until the next submit happened to land there.
async fn run_flusher(state: AppState) {
    let mut ticker = tokio::time::interval(FLUSH_TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        for batch in state.gateway.drain_expired() {
            if let Err(e) = state.writer.write_batch(&batch).await {
                tracing::error!(error = %e, "background flush failed");
            }
        }
    }
}

/// Periodic transform over every source currently present in the raw
/// zone. Sources are discovered from the listing, not configured.
async fn run_transform_scheduler(state: AppState) {
    let mut ticker = tokio::time::interval(state.config.transform.interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let sources = match discover_sources(&state).await {
            Ok(sources) => sources,
            Err(e) => {
                tracing::error!(error = %e, "raw source discovery failed");
                continue;
            }
        };
        for source in sources {
            match state.transform.run(&source).await {
                Ok(report) if report.objects_transformed > 0 => {
                    tracing::info!(
                        source,
                        objects = report.objects_transformed,
                        partitions = report.partitions_written.len(),
                        "scheduled transform run"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(source, error = %e, "scheduled transform failed"),
            }
        }
    }
}

async fn discover_sources(state: &AppState) -> Result<BTreeSet<String>> {
    let objects = state.store.list(Zone::Raw, "").await?;
    Ok(objects
        .iter()
        .filter_map(|o| o.path.split('/').nth(1))
        .map(str::to_string)
        .collect())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lakeflow_config::RuntimeConfig;
    use lakeflow_storage::ZoneStore;

    #[tokio::test]
    async fn source_discovery_reads_raw_layout() {
        let store = ZoneStore::new_memory();
        store
            .put_object(
                "raw/events/year=2024/month=01/day=01/hour=00/a.ndjson.gz",
                vec![1],
            )
            .await
            .unwrap();
        store
            .put_object(
                "raw/orders/year=2024/month=01/day=01/hour=00/b.ndjson.gz",
                vec![2],
            )
            .await
            .unwrap();

        let state = AppState::with_store(RuntimeConfig::default(), store);
        let sources = discover_sources(&state).await.unwrap();
        assert_eq!(
            sources.into_iter().collect::<Vec<_>>(),
            vec!["events".to_string(), "orders".to_string()]
        );
    }

    #[tokio::test]
    async fn shutdown_drain_writes_partial_buffers() {
        use chrono::Utc;
        use lakeflow_core::Record;
        use serde_json::json;

        let store = ZoneStore::new_memory();
        let state = AppState::with_store(RuntimeConfig::default(), store.clone());

        state
            .gateway
            .submit(Record::event("events", Utc::now(), json!({"a": 1})))
            .unwrap();
        drain_on_shutdown(&state).await;

        let objects = store.list(Zone::Raw, "events").await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(state.gateway.buffered_bytes(), 0);
    }
}
