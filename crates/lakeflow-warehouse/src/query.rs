//! Federated query planning and execution
//!
//! Queries run directly against zone objects, no warehouse copy needed.
//! Planning prunes partitions by the time range in the WHERE clause,
//! then enforces the scanned-bytes cap against the pruned object set
//! before a single byte is read. A query that would exceed the cap fails
//! fast with an error distinct from a malformed query.

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lakeflow_catalog::SchemaRegistrar;
use lakeflow_core::{parse_partition_window, Zone};
use lakeflow_storage::{ObjectMeta, ZoneStore};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use sqlparser::ast::{
    BinaryOperator, Expr, ObjectNamePart, Select, SelectItem, SetExpr, Statement, TableFactor,
    Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    /// The query is malformed or uses an unsupported shape. Nothing was
    /// scanned.
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// The pruned object set is still over the configured cap. Nothing
    /// was scanned; narrow the time range and retry.
    #[error("query would scan {would_scan} bytes, cap is {limit}")]
    ScanBudgetExceeded { would_scan: u64, limit: u64 },

    #[error(transparent)]
    Catalog(#[from] lakeflow_catalog::CatalogError),

    #[error(transparent)]
    Storage(#[from] lakeflow_storage::StorageError),

    #[error("query execution failed: {0}")]
    Execution(#[from] anyhow::Error),
}

impl QueryError {
    fn invalid(reason: impl Into<String>) -> Self {
        QueryError::InvalidQuery {
            reason: reason.into(),
        }
    }
}

/// Inclusive time range extracted from predicates on `timestamp`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Whether an hour-wide partition window starting at `window` can
    /// hold rows inside this range.
    fn overlaps_window(&self, window: DateTime<Utc>) -> bool {
        let window_end = window + Duration::hours(1);
        self.start.map_or(true, |s| window_end > s) && self.end.map_or(true, |e| window <= e)
    }
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub zone: Zone,
    pub source: String,
    /// None means `SELECT *`.
    pub columns: Option<Vec<String>>,
    pub range: TimeRange,
    pub objects: Vec<ObjectMeta>,
    pub scan_bytes: u64,
}

#[derive(Debug)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Value>,
    pub objects_scanned: usize,
    pub bytes_scanned: u64,
}

pub struct QueryEngine {
    store: ZoneStore,
    catalog: SchemaRegistrar,
    max_scanned_bytes: u64,
}

impl QueryEngine {
    pub fn new(store: ZoneStore, catalog: SchemaRegistrar, max_scanned_bytes: u64) -> Self {
        Self {
            store,
            catalog,
            max_scanned_bytes,
        }
    }

    /// Parse and validate a query, prune partitions, and price it against
    /// the scan cap.
    ///
    /// Supported shape: `SELECT <cols | *> FROM [zone.]source
    /// [WHERE <timestamp predicates>]`. The target defaults to the
    /// processed zone; raw is not queryable.
    pub async fn plan(&self, sql: &str) -> Result<QueryPlan, QueryError> {
        let select = parse_select(sql)?;
        let (zone, source) = table_target(&select)?;
        let columns = projection(&select)?;

        // Projection columns must exist in the published schema.
        if let Some(cols) = &columns {
            let known = self.catalog.describe(zone).map_err(|e| match e {
                lakeflow_catalog::CatalogError::NoSnapshot { zone } => {
                    QueryError::invalid(format!("no published schema for zone '{}'", zone))
                }
                other => QueryError::Catalog(other),
            })?;
            for col in cols {
                if !known.iter().any(|c| &c.name == col) {
                    return Err(QueryError::invalid(format!("unknown column '{}'", col)));
                }
            }
        }

        let range = match &select.selection {
            Some(expr) => time_range(expr)?,
            None => TimeRange::default(),
        };

        let objects: Vec<ObjectMeta> = self
            .store
            .list(zone, &source)
            .await?
            .into_iter()
            .filter(|o| match parse_partition_window(&o.path) {
                Some(window) => range.overlaps_window(window),
                // No recognizable partition path: scan it rather than
                // silently drop rows.
                None => true,
            })
            .collect();

        let scan_bytes: u64 = objects.iter().map(|o| o.size).sum();
        if scan_bytes > self.max_scanned_bytes {
            metrics::counter!("lakeflow.query.rejected_over_budget").increment(1);
            return Err(QueryError::ScanBudgetExceeded {
                would_scan: scan_bytes,
                limit: self.max_scanned_bytes,
            });
        }

        Ok(QueryPlan {
            zone,
            source,
            columns,
            range,
            objects,
            scan_bytes,
        })
    }

    /// Read every planned object and return projected rows as JSON.
    pub async fn execute(&self, plan: &QueryPlan) -> Result<QueryResult, QueryError> {
        let mut rows = Vec::new();
        let mut bytes_scanned = 0u64;

        for object in &plan.objects {
            if !object.path.ends_with(".parquet") {
                tracing::debug!(path = object.path, "skipping non-columnar object in query");
                continue;
            }
            let bytes = self.store.read(&object.path).await?;
            bytes_scanned += bytes.len() as u64;
            read_object(Bytes::from(bytes), plan.columns.as_deref(), &mut rows)
                .map_err(|e| QueryError::Execution(e.context(object.path.clone())))?;
        }

        metrics::counter!("lakeflow.query.bytes_scanned").increment(bytes_scanned);
        tracing::info!(
            source = plan.source,
            objects = plan.objects.len(),
            bytes_scanned,
            rows = rows.len(),
            "query executed"
        );

        Ok(QueryResult {
            rows,
            objects_scanned: plan.objects.len(),
            bytes_scanned,
        })
    }

    /// Plan then execute in one call.
    pub async fn run(&self, sql: &str) -> Result<QueryResult, QueryError> {
        let plan = self.plan(sql).await?;
        self.execute(&plan).await
    }
}

fn read_object(
    bytes: Bytes,
    columns: Option<&[String]>,
    rows: &mut Vec<serde_json::Value>,
) -> anyhow::Result<()> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
    for batch in reader {
        let batch = batch?;
        let batch = match columns {
            None => batch,
            Some(cols) => {
                // Schema evolution: project only the columns this file
                // actually has.
                let indices: Vec<usize> = cols
                    .iter()
                    .filter_map(|c| batch.schema().index_of(c).ok())
                    .collect();
                batch.project(&indices)?
            }
        };
        let mut writer = arrow::json::ArrayWriter::new(Vec::new());
        writer.write(&batch)?;
        writer.finish()?;
        let batch_rows: Vec<serde_json::Value> = serde_json::from_slice(&writer.into_inner())?;
        rows.extend(batch_rows);
    }
    Ok(())
}

fn parse_select(sql: &str) -> Result<Select, QueryError> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| QueryError::invalid(e.to_string()))?;
    let statement = match statements.as_slice() {
        [one] => one,
        _ => return Err(QueryError::invalid("expected exactly one statement")),
    };
    let query = match statement {
        Statement::Query(query) => query,
        _ => return Err(QueryError::invalid("only SELECT is supported")),
    };
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(select.as_ref().clone()),
        _ => Err(QueryError::invalid("only plain SELECT is supported")),
    }
}

/// Resolve `FROM [zone.]source`. Defaults to the processed zone. The raw
/// zone holds row-oriented batch files and is not queryable.
fn table_target(select: &Select) -> Result<(Zone, String), QueryError> {
    let table = match select.from.as_slice() {
        [one] if one.joins.is_empty() => &one.relation,
        [] => return Err(QueryError::invalid("missing FROM clause")),
        _ => return Err(QueryError::invalid("joins are not supported")),
    };
    let name = match table {
        TableFactor::Table { name, .. } => name,
        _ => return Err(QueryError::invalid("FROM must name a table")),
    };

    let mut parts = Vec::new();
    for part in &name.0 {
        match part {
            ObjectNamePart::Identifier(ident) => parts.push(ident.value.clone()),
            _ => return Err(QueryError::invalid("unsupported table name")),
        }
    }

    match parts.as_slice() {
        [source] => Ok((Zone::Processed, source.clone())),
        [zone, source] => {
            let zone: Zone = zone
                .parse()
                .map_err(|_| QueryError::invalid(format!("unknown zone '{}'", zone)))?;
            if zone == Zone::Raw {
                return Err(QueryError::invalid("raw zone is not queryable"));
            }
            Ok((zone, source.clone()))
        }
        _ => Err(QueryError::invalid("expected [zone.]source")),
    }
}

fn projection(select: &Select) -> Result<Option<Vec<String>>, QueryError> {
    let mut columns = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => return Ok(None),
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => columns.push(ident.value.clone()),
            SelectItem::ExprWithAlias {
                expr: Expr::Identifier(ident),
                ..
            } => columns.push(ident.value.clone()),
            other => {
                return Err(QueryError::invalid(format!(
                    "unsupported projection '{}'",
                    other
                )))
            }
        }
    }
    if columns.is_empty() {
        return Err(QueryError::invalid("empty projection"));
    }
    Ok(Some(columns))
}

/// Extract an inclusive time range from the WHERE clause. Only
/// conjunctions of `timestamp` comparisons are supported; anything else
/// is rejected rather than silently scanned in full.
fn time_range(expr: &Expr) -> Result<TimeRange, QueryError> {
    let mut range = TimeRange::default();
    collect_bounds(expr, &mut range)?;
    if let (Some(start), Some(end)) = (range.start, range.end) {
        if start > end {
            return Err(QueryError::invalid("time range start is after end"));
        }
    }
    Ok(range)
}

fn collect_bounds(expr: &Expr, range: &mut TimeRange) -> Result<(), QueryError> {
    match expr {
        Expr::Nested(inner) => collect_bounds(inner, range),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_bounds(left, range)?;
            collect_bounds(right, range)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = timestamp_column(left)?;
            if column != "timestamp" {
                return Err(QueryError::invalid(format!(
                    "only predicates on 'timestamp' are supported, got '{}'",
                    column
                )));
            }
            let bound = literal_timestamp(right)?;
            match op {
                BinaryOperator::Gt | BinaryOperator::GtEq => range.start = Some(bound),
                BinaryOperator::Lt | BinaryOperator::LtEq => range.end = Some(bound),
                BinaryOperator::Eq => {
                    range.start = Some(bound);
                    range.end = Some(bound);
                }
                other => {
                    return Err(QueryError::invalid(format!(
                        "unsupported operator '{}'",
                        other
                    )))
                }
            }
            Ok(())
        }
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => {
            let column = timestamp_column(expr)?;
            if column != "timestamp" {
                return Err(QueryError::invalid(format!(
                    "only predicates on 'timestamp' are supported, got '{}'",
                    column
                )));
            }
            range.start = Some(literal_timestamp(low)?);
            range.end = Some(literal_timestamp(high)?);
            Ok(())
        }
        other => Err(QueryError::invalid(format!(
            "unsupported predicate '{}'",
            other
        ))),
    }
}

fn timestamp_column(expr: &Expr) -> Result<String, QueryError> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts
            .last()
            .map(|p| p.value.clone())
            .ok_or_else(|| QueryError::invalid("empty identifier")),
        other => Err(QueryError::invalid(format!(
            "expected a column name, got '{}'",
            other
        ))),
    }
}

fn literal_timestamp(expr: &Expr) -> Result<DateTime<Utc>, QueryError> {
    let text = match expr {
        Expr::Value(value) => match &value.value {
            SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => s.clone(),
            other => {
                return Err(QueryError::invalid(format!(
                    "expected a timestamp literal, got '{}'",
                    other
                )))
            }
        },
        other => {
            return Err(QueryError::invalid(format!(
                "expected a timestamp literal, got '{}'",
                other
            )))
        }
    };
    parse_timestamp(&text)
        .ok_or_else(|| QueryError::invalid(format!("unparseable timestamp '{}'", text)))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lakeflow_catalog::SchemaRegistrar;
    use lakeflow_config::CatalogConfig;
    use lakeflow_core::{records_to_batch, write_parquet, PartitionKey, Record};
    use serde_json::json;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    async fn seed_hour(store: &ZoneStore, source: &str, hour: &str, n: usize) {
        let records: Vec<Record> = (0..n)
            .map(|i| {
                Record::event(
                    source,
                    ts(hour),
                    json!({"event": "view", "count": i as i64}),
                )
            })
            .collect();
        let batch = records_to_batch(&records).unwrap();
        let parquet = write_parquet(&batch).unwrap();
        let key = PartitionKey::from_timestamp(source, ts(hour))
            .object_key(Zone::Processed, "parquet");
        store.put_object(&key, parquet).await.unwrap();
    }

    async fn engine_with_data(cap: u64) -> (QueryEngine, ZoneStore) {
        let store = ZoneStore::new_memory();
        seed_hour(&store, "events", "2024-05-01T10:00:00Z", 4).await;
        seed_hour(&store, "events", "2024-05-01T11:00:00Z", 3).await;

        let catalog = SchemaRegistrar::new(store.clone(), &CatalogConfig::default());
        catalog.refresh(Zone::Processed).await.unwrap();

        (
            QueryEngine::new(store.clone(), catalog, cap),
            store,
        )
    }

    #[tokio::test]
    async fn select_star_reads_all_partitions() {
        let (engine, _store) = engine_with_data(u64::MAX).await;
        let result = engine.run("SELECT * FROM events").await.unwrap();
        assert_eq!(result.rows.len(), 7);
        assert_eq!(result.objects_scanned, 2);
        assert!(result.bytes_scanned > 0);
    }

    #[tokio::test]
    async fn projection_returns_only_named_columns() {
        let (engine, _store) = engine_with_data(u64::MAX).await;
        let result = engine
            .run("SELECT event, count FROM events")
            .await
            .unwrap();
        assert_eq!(result.rows.len(), 7);
        let row = result.rows[0].as_object().unwrap();
        assert!(row.contains_key("event"));
        assert!(!row.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn time_predicate_prunes_partitions() {
        let (engine, _store) = engine_with_data(u64::MAX).await;
        let plan = engine
            .plan(
                "SELECT * FROM events WHERE timestamp >= '2024-05-01T11:00:00Z' \
                 AND timestamp <= '2024-05-01T11:59:59Z'",
            )
            .await
            .unwrap();
        assert_eq!(plan.objects.len(), 1);
        assert!(plan.objects[0].path.contains("hour=11"));

        let result = engine.execute(&plan).await.unwrap();
        assert_eq!(result.rows.len(), 3);
    }

    #[tokio::test]
    async fn scan_cap_rejects_before_reading() {
        let (engine, _store) = engine_with_data(1).await;
        let err = engine.run("SELECT * FROM events").await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::ScanBudgetExceeded { limit: 1, .. }
        ));
    }

    #[tokio::test]
    async fn pruning_can_bring_a_query_under_the_cap() {
        // Cap below the whole table but above a single partition.
        let (engine, store) = engine_with_data(u64::MAX).await;
        let objects = store.list(Zone::Processed, "events").await.unwrap();
        let largest = objects.iter().map(|o| o.size).max().unwrap();
        let total: u64 = objects.iter().map(|o| o.size).sum();
        let catalog = SchemaRegistrar::new(store.clone(), &CatalogConfig::default());
        catalog.refresh(Zone::Processed).await.unwrap();
        let capped = QueryEngine::new(store, catalog, largest.max(total - 1));

        assert!(matches!(
            capped.run("SELECT * FROM events").await,
            Err(QueryError::ScanBudgetExceeded { .. })
        ));
        let narrowed = capped
            .run("SELECT * FROM events WHERE timestamp BETWEEN '2024-05-01T10:00:00Z' AND '2024-05-01T10:59:59Z'")
            .await
            .unwrap();
        assert_eq!(narrowed.rows.len(), 4);
    }

    #[tokio::test]
    async fn malformed_and_unsupported_queries_fail_distinctly() {
        let (engine, _store) = engine_with_data(u64::MAX).await;

        for sql in [
            "SELEC * FROM events",
            "DROP TABLE events",
            "SELECT * FROM a JOIN b ON a.x = b.x",
            "SELECT nonexistent_column FROM events",
            "SELECT * FROM raw.events",
            "SELECT * FROM events WHERE count > 3",
        ] {
            let err = engine.run(sql).await.unwrap_err();
            assert!(
                matches!(err, QueryError::InvalidQuery { .. }),
                "{} should be invalid, got {:?}",
                sql,
                err
            );
        }
    }

    #[tokio::test]
    async fn empty_source_is_a_valid_empty_result() {
        let (engine, _store) = engine_with_data(u64::MAX).await;
        let result = engine.run("SELECT * FROM no_such_source").await.unwrap();
        assert!(result.rows.is_empty());
        assert_eq!(result.bytes_scanned, 0);
    }
}
