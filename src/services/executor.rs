//! Query executor
//!
//! Runs one catalog entry against the business database: validates and
//! canonicalizes parameters, binds them in declaration order, and marshals
//! the rows into the entry's output shape. SQL comes only from the catalog;
//! nothing here composes SQL from request input.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool};
use tokio_util::sync::CancellationToken;

use crate::models::{
    Comparison, DataTable, PayloadFragment, PeriodKpis, RankedItem, SeriesPoint, TimeSeries,
    TopItems,
};
use crate::services::catalog::{CatalogEntry, OutputKind, ParamType, QueryCatalog};

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("unknown query: {0}")]
    UnknownQuery(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("database unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("query timed out after {0}s")]
    UpstreamTimeout(u64),

    #[error("database error: {0}")]
    UpstreamError(String),

    #[error("cancelled")]
    Cancelled,
}

impl ExecError {
    /// Timeouts and transport failures are worth a retry; bad input is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTimeout(_) | Self::UpstreamUnavailable(_) | Self::UpstreamError(_))
    }
}

/// Canonicalized parameter map: defaults applied, keys sorted, dates in
/// ISO-8601. Two logically-equal inputs always canonicalize identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalParams(BTreeMap<String, String>);

impl CanonicalParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Deterministic cache-key serialization: `id?k=v&k=v` with sorted keys.
    pub fn cache_key(&self, query_id: &str) -> String {
        let mut key = String::from(query_id);
        key.push('?');
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                key.push('&');
            }
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }
        key
    }
}

/// Result of one execution, with marshaling metadata.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub fragment: PayloadFragment,
    pub row_count: usize,
    pub elapsed_ms: u128,
}

pub struct QueryExecutor {
    pool: SqlitePool,
    query_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pool: SqlitePool, query_timeout_seconds: u64) -> Self {
        Self { pool, query_timeout: Duration::from_secs(query_timeout_seconds) }
    }

    /// Validate and canonicalize `params` against the entry's schema.
    ///
    /// Unknown parameters are dropped with a warning; missing required
    /// parameters (after defaults) fail with `InvalidParams`.
    pub fn canonicalize(
        entry: &CatalogEntry,
        params: &BTreeMap<String, String>,
    ) -> Result<CanonicalParams, ExecError> {
        let mut canonical = BTreeMap::new();

        for name in params.keys() {
            if !entry.params.iter().any(|p| p.name == name) {
                tracing::warn!("query {}: dropping unknown param {}", entry.id, name);
            }
        }

        for spec in &entry.params {
            let raw = params
                .get(spec.name)
                .map(String::as_str)
                .or(spec.default)
                .map(str::trim)
                .filter(|v| !v.is_empty());

            let Some(raw) = raw else {
                if spec.required {
                    return Err(ExecError::InvalidParams(format!(
                        "{}: missing required param {}",
                        entry.id, spec.name
                    )));
                }
                continue;
            };

            let normalized = match spec.param_type {
                ParamType::Date => normalize_date(raw).ok_or_else(|| {
                    ExecError::InvalidParams(format!(
                        "{}: param {} is not a date: {}",
                        entry.id, spec.name, raw
                    ))
                })?,
                ParamType::Integer => raw
                    .parse::<i64>()
                    .map(|v| v.to_string())
                    .map_err(|_| {
                        ExecError::InvalidParams(format!(
                            "{}: param {} is not an integer: {}",
                            entry.id, spec.name, raw
                        ))
                    })?,
                ParamType::String => raw.to_string(),
            };

            if let Some(allowed) = spec.allowed_values
                && !allowed.contains(&normalized.as_str())
            {
                return Err(ExecError::InvalidParams(format!(
                    "{}: param {} value {} not in allowed set",
                    entry.id, spec.name, normalized
                )));
            }

            canonical.insert(spec.name.to_string(), normalized);
        }

        Ok(CanonicalParams(canonical))
    }

    /// Execute a catalog entry by id. The caller normally canonicalizes
    /// first (for the cache key); this re-validates to stay safe on the
    /// direct path.
    pub async fn execute(
        &self,
        catalog: &QueryCatalog,
        id: &str,
        params: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, ExecError> {
        let entry = catalog
            .lookup(id)
            .ok_or_else(|| ExecError::UnknownQuery(id.to_string()))?;
        let canonical = Self::canonicalize(entry, params)?;
        self.execute_entry(entry, &canonical, cancel).await
    }

    /// Execute an already-canonicalized entry.
    pub async fn execute_entry(
        &self,
        entry: &CatalogEntry,
        canonical: &CanonicalParams,
        cancel: &CancellationToken,
    ) -> Result<ExecOutcome, ExecError> {
        let mut query = sqlx::query(entry.sql);
        for spec in &entry.params {
            match canonical.get(spec.name) {
                Some(value) => match spec.param_type {
                    ParamType::Integer => {
                        // Canonicalization guarantees this parses.
                        query = query.bind(value.parse::<i64>().unwrap_or_default());
                    },
                    ParamType::Date | ParamType::String => {
                        query = query.bind(value.to_string());
                    },
                },
                None => {
                    query = query.bind(Option::<String>::None);
                },
            }
        }

        tracing::debug!(
            query_id = entry.id,
            params = %display_params(entry, canonical),
            "executing catalog query"
        );
        let start = std::time::Instant::now();

        let fetch = tokio::time::timeout(self.query_timeout, query.fetch_all(&self.pool));
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecError::Cancelled),
            result = fetch => match result {
                Err(_) => return Err(ExecError::UpstreamTimeout(self.query_timeout.as_secs())),
                Ok(Err(e)) => return Err(map_sqlx_error(e)),
                Ok(Ok(rows)) => rows,
            },
        };

        let elapsed_ms = start.elapsed().as_millis();
        let row_count = rows.len();
        let fragment = marshal_rows(entry, rows);

        tracing::debug!(
            query_id = entry.id,
            rows = row_count,
            elapsed_ms = elapsed_ms as u64,
            "catalog query finished"
        );

        Ok(ExecOutcome { fragment, row_count, elapsed_ms })
    }
}

/// Loggable parameter rendering. Sensitive parameter values never reach the
/// logs.
fn display_params(entry: &CatalogEntry, canonical: &CanonicalParams) -> String {
    entry
        .params
        .iter()
        .filter_map(|spec| {
            canonical.get(spec.name).map(|value| {
                if spec.sensitive {
                    format!("{}=***", spec.name)
                } else {
                    format!("{}={}", spec.name, value)
                }
            })
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn map_sqlx_error(e: sqlx::Error) -> ExecError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ExecError::UpstreamUnavailable(e.to_string())
        },
        other => ExecError::UpstreamError(other.to_string()),
    }
}

/// Accept the date spellings that reach the engine and normalize to ISO.
fn normalize_date(raw: &str) -> Option<String> {
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Row marshaling
// ---------------------------------------------------------------------------

fn marshal_rows(entry: &CatalogEntry, rows: Vec<SqliteRow>) -> PayloadFragment {
    if rows.is_empty() {
        return PayloadFragment::Empty;
    }
    match entry.output_kind {
        OutputKind::Kpi => marshal_kpis(&rows[0]),
        OutputKind::TimeSeries => marshal_time_series(entry, &rows),
        OutputKind::TopItems => marshal_top_items(entry, &rows),
        OutputKind::Table => marshal_table(entry, &rows),
        OutputKind::Comparison => marshal_comparison(&rows),
    }
}

fn marshal_kpis(row: &SqliteRow) -> PayloadFragment {
    let mut values = BTreeMap::new();
    let mut saw_null = false;
    for (name, value) in row_columns(row) {
        match value_as_f64(&value) {
            Some(v) => {
                values.insert(name, v);
            },
            None => saw_null = true,
        }
    }
    // A KPI aggregate over an empty range comes back as one row of NULL
    // sums and zero counts; that is an empty result, not a metric set.
    if values.is_empty() || (saw_null && values.values().all(|v| *v == 0.0)) {
        return PayloadFragment::Empty;
    }
    PayloadFragment::Kpis { values }
}

fn marshal_time_series(entry: &CatalogEntry, rows: &[SqliteRow]) -> PayloadFragment {
    let mut points = Vec::with_capacity(rows.len());
    for row in rows {
        let columns: BTreeMap<String, serde_json::Value> = row_columns(row).collect();
        let Some(date) = columns
            .get("date")
            .and_then(|v| v.as_str())
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        else {
            tracing::warn!(query_id = entry.id, "time series row without a parsable date");
            continue;
        };
        let Some(value) = columns.get("value").and_then(value_as_f64) else {
            continue;
        };
        let label = columns.get("label").and_then(|v| v.as_str()).map(str::to_string);
        points.push(SeriesPoint { date, value, label });
    }
    if points.is_empty() {
        return PayloadFragment::Empty;
    }
    PayloadFragment::TimeSeries {
        series: TimeSeries { series_name: entry.fragment_name().to_string(), points },
    }
}

fn marshal_top_items(entry: &CatalogEntry, rows: &[SqliteRow]) -> PayloadFragment {
    let mut items = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let mut columns: BTreeMap<String, serde_json::Value> = row_columns(row).collect();
        let id = columns
            .remove("id")
            .map(json_to_display)
            .unwrap_or_else(|| (idx + 1).to_string());
        let title = columns
            .remove("title")
            .map(json_to_display)
            .unwrap_or_else(|| id.clone());
        let Some(value) = columns.remove("value").as_ref().and_then(value_as_f64) else {
            continue;
        };
        items.push(RankedItem { rank: (idx + 1) as u32, id, title, value, extra: columns });
    }
    if items.is_empty() {
        return PayloadFragment::Empty;
    }
    PayloadFragment::TopItems {
        ranking: TopItems {
            ranking_name: entry.fragment_name().to_string(),
            metric: "value".to_string(),
            items,
        },
    }
}

fn marshal_table(entry: &CatalogEntry, rows: &[SqliteRow]) -> PayloadFragment {
    let table_rows: Vec<BTreeMap<String, serde_json::Value>> =
        rows.iter().map(|row| row_columns(row).collect()).collect();
    PayloadFragment::Table {
        table: DataTable { name: entry.fragment_name().to_string(), rows: table_rows },
    }
}

fn marshal_comparison(rows: &[SqliteRow]) -> PayloadFragment {
    let mut current: Option<PeriodKpis> = None;
    let mut previous: Option<PeriodKpis> = None;

    for row in rows {
        let mut columns: BTreeMap<String, serde_json::Value> = row_columns(row).collect();
        let Some(period) = columns.remove("period").map(json_to_display) else {
            continue;
        };
        let kpis: BTreeMap<String, f64> = columns
            .iter()
            .filter_map(|(k, v)| value_as_f64(v).map(|f| (k.clone(), f)))
            .collect();
        let slot = PeriodKpis { label: period.clone(), kpis };
        match period.as_str() {
            "current" => current = Some(slot),
            "previous" => previous = Some(slot),
            other => tracing::warn!("comparison row with unexpected period label: {}", other),
        }
    }

    match (current, previous) {
        (Some(current_period), Some(previous_period)) => PayloadFragment::Comparison {
            comparison: Comparison {
                current_period,
                previous_period,
                deltas: BTreeMap::new(),
                delta_percents: BTreeMap::new(),
            },
        },
        _ => PayloadFragment::Empty,
    }
}

/// Decode every column of a row into JSON, trying integer, float, text.
fn row_columns(row: &SqliteRow) -> impl Iterator<Item = (String, serde_json::Value)> + '_ {
    row.columns().iter().map(move |col| {
        let idx = col.ordinal();
        let value = if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            serde_json::json!(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            serde_json::json!(v)
        } else if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
            serde_json::json!(v)
        } else {
            serde_json::Value::Null
        };
        (col.name().to_string(), value)
    })
}

fn value_as_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64()
}

fn json_to_display(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_by_id(id: &str) -> CatalogEntry {
        QueryCatalog::builtin().unwrap().lookup(id).unwrap().clone()
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn cache_key_is_identical_for_logically_equal_param_maps() {
        let entry = entry_by_id("top_products_by_revenue");

        // Different key insertion order, optional param once defaulted and
        // once explicit at its default value.
        let a = QueryExecutor::canonicalize(
            &entry,
            &params(&[("date_to", "2025-11-30"), ("date_from", "2025-11-01"), ("limit", "5")]),
        )
        .unwrap();
        let b = QueryExecutor::canonicalize(
            &entry,
            &params(&[("date_from", "2025-11-01"), ("date_to", "2025-11-30")]),
        )
        .unwrap();

        assert_eq!(a.cache_key(entry.id), b.cache_key(entry.id));
    }

    #[test]
    fn canonicalize_normalizes_date_spellings() {
        let entry = entry_by_id("ts_sales_by_day");
        let canonical = QueryExecutor::canonicalize(
            &entry,
            &params(&[("date_from", "01/11/2025"), ("date_to", "2025/11/30")]),
        )
        .unwrap();
        assert_eq!(canonical.get("date_from"), Some("2025-11-01"));
        assert_eq!(canonical.get("date_to"), Some("2025-11-30"));
    }

    #[test]
    fn canonicalize_rejects_missing_required_param() {
        let entry = entry_by_id("ts_sales_by_day");
        let err = QueryExecutor::canonicalize(&entry, &params(&[("date_from", "2025-11-01")]))
            .unwrap_err();
        assert!(matches!(err, ExecError::InvalidParams(_)));
    }

    #[test]
    fn canonicalize_drops_unknown_params() {
        let entry = entry_by_id("kpi_inventory_summary");
        let canonical = QueryExecutor::canonicalize(&entry, &params(&[("surprise", "1")])).unwrap();
        assert_eq!(canonical.cache_key(entry.id), "kpi_inventory_summary?");
    }

    async fn seeded_pool() -> SqlitePool {
        // One connection: every pool connection of a :memory: database is
        // its own empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::create_business_schema(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO orders (order_date, channel, total_amount, units) VALUES \
             ('2025-11-01', 'web', 100.0, 2), \
             ('2025-11-02', 'web', 300.0, 3), \
             ('2025-10-03', 'store', 50.0, 1)",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn executes_kpi_query_and_marshals_metrics() {
        let pool = seeded_pool().await;
        let executor = QueryExecutor::new(pool, 30);
        let catalog = QueryCatalog::builtin().unwrap();

        let outcome = executor
            .execute(
                &catalog,
                "kpi_sales_summary",
                &params(&[("date_from", "2025-11-01"), ("date_to", "2025-11-30")]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome.fragment {
            PayloadFragment::Kpis { values } => {
                assert_eq!(values.get("total_sales"), Some(&400.0));
                assert_eq!(values.get("total_orders"), Some(&2.0));
                assert_eq!(values.get("avg_order_value"), Some(&200.0));
            },
            other => panic!("expected KPI fragment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn kpi_query_over_empty_range_reports_empty_not_error() {
        let pool = seeded_pool().await;
        let executor = QueryExecutor::new(pool, 30);
        let catalog = QueryCatalog::builtin().unwrap();

        let outcome = executor
            .execute(
                &catalog,
                "kpi_sales_summary",
                &params(&[("date_from", "2030-01-01"), ("date_to", "2030-01-31")]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.fragment.is_empty());
    }

    #[tokio::test]
    async fn unknown_query_id_is_rejected() {
        let pool = seeded_pool().await;
        let executor = QueryExecutor::new(pool, 30);
        let catalog = QueryCatalog::builtin().unwrap();

        let err = executor
            .execute(&catalog, "drop_all_tables", &BTreeMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::UnknownQuery(_)));
    }

    #[tokio::test]
    async fn comparison_query_marshals_both_periods() {
        let pool = seeded_pool().await;
        let executor = QueryExecutor::new(pool, 30);
        let catalog = QueryCatalog::builtin().unwrap();

        let outcome = executor
            .execute(
                &catalog,
                "comparison_sales_periods",
                &params(&[
                    ("date_from", "2025-11-01"),
                    ("date_to", "2025-11-30"),
                    ("prev_date_from", "2025-10-01"),
                    ("prev_date_to", "2025-10-31"),
                ]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        match outcome.fragment {
            PayloadFragment::Comparison { comparison } => {
                assert_eq!(comparison.current_period.kpis.get("total_sales"), Some(&400.0));
                assert_eq!(comparison.previous_period.kpis.get("total_sales"), Some(&50.0));
            },
            other => panic!("expected comparison fragment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_execution() {
        let pool = seeded_pool().await;
        let executor = QueryExecutor::new(pool, 30);
        let catalog = QueryCatalog::builtin().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor
            .execute(
                &catalog,
                "kpi_sales_summary",
                &params(&[("date_from", "2025-11-01"), ("date_to", "2025-11-30")]),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }
}
