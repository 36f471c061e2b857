//! HTTP handlers for every pipeline surface

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use lakeflow_cdc::CdcError;
use lakeflow_core::{Record, Zone};
use lakeflow_ingest::SubmitError;
use lakeflow_warehouse::{LoadError, QueryError};
use serde::Deserialize;
use serde_json::json;

/// Wire shape for one ingested record. Without a timestamp the arrival
/// time is used, which keeps the record in the current partition hour.
#[derive(Debug, Deserialize)]
pub struct IncomingRecord {
    pub source: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl IncomingRecord {
    fn into_record(self) -> Record {
        Record::event(
            self.source,
            self.timestamp.unwrap_or_else(Utc::now),
            self.payload,
        )
    }
}

/// POST /v1/records - accepts one record or an array of records.
pub async fn ingest_records(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    let max_payload = state.config.server.max_payload_bytes;
    if body.len() > max_payload {
        metrics::counter!("lakeflow.http.payload_too_large").increment(1);
        return Err(AppError::with_status(
            StatusCode::PAYLOAD_TOO_LARGE,
            anyhow::anyhow!("payload {} exceeds limit {}", body.len(), max_payload),
        ));
    }

    let incoming = parse_records(&body).map_err(AppError::bad_request)?;

    let mut accepted = 0usize;
    let mut malformed = 0usize;
    let mut sealed = state.gateway.drain_expired();

    for record in incoming {
        match state.gateway.submit(record.into_record()) {
            Ok(Some(batch)) => {
                accepted += 1;
                sealed.push(batch);
            }
            Ok(None) => accepted += 1,
            Err(SubmitError::Malformed { reason, record }) => {
                malformed += 1;
                state.writer.divert_malformed(&record, &reason).await?;
            }
            Err(e @ SubmitError::Backpressure { .. }) => {
                // Flush what is already sealed before telling the
                // producer to back off; those records are past the
                // gateway and must not wait on a retry that may not come.
                flush_sealed(&state, sealed).await?;
                return Err(AppError::with_status(
                    StatusCode::TOO_MANY_REQUESTS,
                    e.into(),
                ));
            }
        }
    }

    let flushed = flush_sealed(&state, sealed).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "accepted": accepted,
            "malformed": malformed,
            "flushes": flushed,
        })),
    )
        .into_response())
}

fn parse_records(body: &[u8]) -> anyhow::Result<Vec<IncomingRecord>> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect(),
        other => Ok(vec![serde_json::from_value(other)?]),
    }
}

async fn flush_sealed(
    state: &AppState,
    sealed: Vec<lakeflow_ingest::SealedBatch>,
) -> Result<Vec<String>, AppError> {
    let mut keys = Vec::with_capacity(sealed.len());
    for batch in sealed {
        let report = state.writer.write_batch(&batch).await?;
        keys.push(report.key);
    }
    Ok(keys)
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

/// GET /readyz - includes a storage connectivity probe.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list(Zone::Raw, "").await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"status": "ready", "storage": "connected"})),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "storage readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not ready", "error": e.to_string()})),
            )
        }
    }
}

fn parse_zone(zone: &str) -> Result<Zone, AppError> {
    zone.parse::<Zone>().map_err(AppError::bad_request)
}

/// POST /v1/catalog/:zone/refresh
pub async fn catalog_refresh(
    State(state): State<AppState>,
    Path(zone): Path<String>,
) -> Result<Response, AppError> {
    let zone = parse_zone(&zone)?;
    let snapshot = state.catalog.refresh(zone).await.map_err(anyhow::Error::from)?;
    Ok(Json(json!({
        "zone": zone.as_str(),
        "columns": snapshot.columns,
        "scanned_objects": snapshot.scanned_objects,
        "skipped_objects": snapshot.skipped_objects,
        "taken_at": snapshot.taken_at,
    }))
    .into_response())
}

/// GET /v1/catalog/:zone
pub async fn catalog_describe(
    State(state): State<AppState>,
    Path(zone): Path<String>,
) -> Result<Response, AppError> {
    let zone = parse_zone(&zone)?;
    let columns = state
        .catalog
        .describe(zone)
        .map_err(|e| AppError::not_found(anyhow::Error::from(e)))?;
    Ok(Json(json!({ "zone": zone.as_str(), "columns": columns })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TransformRequest {
    pub source: String,
}

/// POST /v1/transform/run
pub async fn transform_run(
    State(state): State<AppState>,
    Json(request): Json<TransformRequest>,
) -> Result<Response, AppError> {
    let report = state
        .transform
        .run(&request.source)
        .await
        .map_err(anyhow::Error::from)?;
    Ok(Json(json!({
        "source": request.source,
        "objects_seen": report.objects_seen,
        "objects_transformed": report.objects_transformed,
        "partitions_written": report.partitions_written,
        "records_out": report.records_out,
        "records_dropped": report.records_dropped,
        "drop_samples": report.drop_samples,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
}

/// POST /v1/query
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, AppError> {
    let result = state.query.run(&request.sql).await.map_err(|e| match e {
        QueryError::InvalidQuery { .. } => AppError::bad_request(e),
        QueryError::ScanBudgetExceeded { .. } => {
            AppError::with_status(StatusCode::UNPROCESSABLE_ENTITY, e.into())
        }
        other => AppError::from(anyhow::Error::from(other)),
    })?;
    Ok(Json(json!({
        "rows": result.rows,
        "objects_scanned": result.objects_scanned,
        "bytes_scanned": result.bytes_scanned,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    #[serde(default)]
    pub zone: Option<String>,
    pub source: String,
    pub dataset: String,
}

/// POST /v1/warehouse/load
pub async fn warehouse_load(
    State(state): State<AppState>,
    Json(request): Json<LoadRequest>,
) -> Result<Response, AppError> {
    let zone = match &request.zone {
        Some(z) => parse_zone(z)?,
        None => Zone::Processed,
    };
    let report = state
        .loader
        .load(zone, &request.source, &request.dataset)
        .await
        .map_err(|e| match e {
            LoadError::EmptySource { .. } => AppError::not_found(e),
            other => AppError::from(anyhow::Error::from(other)),
        })?;
    Ok(Json(json!({
        "dataset": report.dataset,
        "load_id": report.load_id,
        "objects": report.objects,
        "bytes": report.bytes,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct CdcStartRequest {
    pub table: String,
}

fn cdc_error_response(e: CdcError) -> AppError {
    match e {
        CdcError::UnknownTable { .. } => AppError::not_found(e),
        CdcError::AlreadyReplicating { .. } | CdcError::InvalidTransition { .. } => {
            AppError::with_status(StatusCode::CONFLICT, e.into())
        }
        other => AppError::from(anyhow::Error::from(other)),
    }
}

/// POST /v1/cdc/tasks
pub async fn cdc_start(
    State(state): State<AppState>,
    Json(request): Json<CdcStartRequest>,
) -> Result<Response, AppError> {
    let source = state.cdc_source.clone().ok_or_else(|| {
        AppError::with_status(
            StatusCode::SERVICE_UNAVAILABLE,
            anyhow::anyhow!("no source database configured for replication"),
        )
    })?;
    state
        .cdc
        .start(&request.table, source)
        .map_err(cdc_error_response)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"table": request.table, "status": "starting"})),
    )
        .into_response())
}

/// POST /v1/cdc/tasks/:table/stop
pub async fn cdc_stop(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Response, AppError> {
    state.cdc.stop(&table).map_err(cdc_error_response)?;
    Ok(Json(json!({"table": table, "status": "stopped"})).into_response())
}

/// POST /v1/cdc/tasks/:table/resume
pub async fn cdc_resume(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Response, AppError> {
    state.cdc.resume(&table).map_err(cdc_error_response)?;
    Ok(Json(json!({"table": table, "status": "streaming"})).into_response())
}

/// GET /v1/cdc/tasks/:table
pub async fn cdc_status(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Response, AppError> {
    let status = state.cdc.status(&table).map_err(cdc_error_response)?;
    Ok(Json(json!({
        "table": status.table,
        "state": status.state.to_string(),
        "position": status.position,
    }))
    .into_response())
}

/// GET /v1/cdc/tasks
pub async fn cdc_status_all(State(state): State<AppState>) -> impl IntoResponse {
    let statuses: Vec<_> = state
        .cdc
        .status_all()
        .into_iter()
        .map(|s| {
            json!({
                "table": s.table,
                "state": s.state.to_string(),
                "position": s.position,
            })
        })
        .collect();
    Json(json!({ "tasks": statuses }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record_and_array_both_parse() {
        let single = br#"{"source": "events", "payload": {"a": 1}}"#;
        let parsed = parse_records(single).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].source, "events");
        assert!(parsed[0].timestamp.is_none());

        let array = br#"[
            {"source": "events", "timestamp": "2024-05-01T10:00:00Z", "payload": {"a": 1}},
            {"source": "orders", "payload": {"b": 2}}
        ]"#;
        let parsed = parse_records(array).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].timestamp.is_some());
    }

    #[test]
    fn garbage_bodies_are_rejected() {
        assert!(parse_records(b"not json").is_err());
        assert!(parse_records(br#"{"payload": {}}"#).is_err());
        assert!(parse_records(br#"[{"source": "s"}]"#).is_err());
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            cdc_error_response(CdcError::UnknownTable {
                table: "x".into()
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            cdc_error_response(CdcError::AlreadyReplicating {
                table: "x".into()
            })
            .status(),
            StatusCode::CONFLICT
        );
    }
}
