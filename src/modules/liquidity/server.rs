use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use super::collector::{CollectOutcome, Collector};
use super::consts::{DEFAULT_QUERY_LIMIT, DEFAULT_STATS_HOURS};
use super::schemas::{BarChartEntry, PoolConfig};
use super::storage::{QueryRangeParams, SnapshotStorage};
use super::utils::records::{bar_chart, format_timestamp};
use crate::runtime::store::StoreError;

pub const SERVICE_NAME: &str = "DeFi Pool Data API";

#[derive(Clone)]
pub struct ApiState {
    pub collector: Arc<Collector>,
    pub storage: Arc<SnapshotStorage>,
}

impl ApiState {
    pub fn new(collector: Arc<Collector>) -> Self {
        let storage = Arc::clone(collector.storage());
        Self { collector, storage }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn store_failure(pool_address: &str, what: &'static str, e: StoreError) -> ApiError {
    error!(pool = pool_address, "[api] {what}: {e}");
    ApiError::Internal("Failed to fetch pool data")
}

#[derive(Deserialize)]
struct RangeQuery {
    #[serde(rename = "startTime")]
    start_time: Option<String>,
    #[serde(rename = "endTime")]
    end_time: Option<String>,
    limit: Option<String>,
}

#[derive(Deserialize)]
struct StatsQuery {
    hours: Option<String>,
}

/// RFC 3339 or unix seconds.
fn parse_time(name: &str, raw: &str) -> Result<OffsetDateTime, ApiError> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(ts);
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {name}: {raw}")))
}

fn parse_opt_time(name: &str, raw: Option<&str>) -> Result<Option<OffsetDateTime>, ApiError> {
    raw.filter(|s| !s.trim().is_empty()).map(|s| parse_time(name, s)).transpose()
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<&str>, default: T) -> Result<T, ApiError> {
    match raw {
        None => Ok(default),
        Some(s) => s
            .trim()
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Invalid {name}: {s}"))),
    }
}

fn iso(ts: OffsetDateTime) -> Value {
    format_timestamp(ts).map(Value::String).unwrap_or(Value::Null)
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/scheduler/status", get(status_handler))
        .route("/api/scheduler/collect", post(collect_handler))
        .route("/api/scheduler/start", post(start_handler))
        .route("/api/scheduler/stop", post(stop_handler))
        .route("/api/pools", get(list_pools_handler).post(add_pool_handler))
        .route("/api/pools/{pool_address}", delete(remove_pool_handler))
        .route("/api/pools/{pool_address}/latest", get(latest_handler))
        .route("/api/pools/{pool_address}/bar-chart", get(bar_chart_handler))
        .route("/api/pools/{pool_address}/history", get(history_handler))
        .route("/api/pools/{pool_address}/timeseries", get(timeseries_handler))
        .route("/api/pools/{pool_address}/stats", get(stats_handler))
        .fallback(not_found_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(addr: SocketAddr, state: ApiState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "[api] listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": iso(OffsetDateTime::now_utc()),
        "service": SERVICE_NAME,
    }))
}

async fn not_found_handler() -> ApiError {
    ApiError::NotFound("Endpoint not found".to_string())
}

/* ---------- scheduler ---------- */

async fn status_handler(State(state): State<ApiState>) -> Json<Value> {
    Json(json!(state.collector.status().await))
}

async fn collect_handler(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    match state.collector.collect_now().await {
        CollectOutcome::Skipped => Ok(Json(json!({
            "message": "Data collection already in progress",
            "skipped": true,
        }))),
        CollectOutcome::Completed(report) if report.all_failed() => {
            error!(failed = report.failed.len(), "[api] manual collection failed for every pool");
            Err(ApiError::Internal("Failed to trigger data collection"))
        }
        CollectOutcome::Completed(report) => Ok(Json(json!({
            "message": "Data collection triggered successfully",
            "stored": report.stored,
            "failed": report.failed,
        }))),
    }
}

async fn start_handler(State(state): State<ApiState>) -> Json<Value> {
    let started = state.collector.start_scheduler();
    Json(json!({ "started": started, "isScheduled": state.collector.is_scheduled() }))
}

async fn stop_handler(State(state): State<ApiState>) -> Json<Value> {
    let stopped = state.collector.stop_scheduler();
    Json(json!({ "stopped": stopped, "isScheduled": state.collector.is_scheduled() }))
}

/* ---------- pool set ---------- */

async fn list_pools_handler(State(state): State<ApiState>) -> Json<Value> {
    let pools = state.collector.pools().await;
    Json(json!({ "pools": pools, "count": pools.len() }))
}

async fn add_pool_handler(
    State(state): State<ApiState>,
    Json(pool): Json<PoolConfig>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if pool.pool_address.trim().is_empty() {
        return Err(ApiError::BadRequest("poolAddress is required".to_string()));
    }
    let address = pool.pool_address.clone();
    if !state.collector.add_pool(pool).await {
        return Err(ApiError::Conflict(format!("Pool already tracked: {address}")));
    }
    Ok((StatusCode::CREATED, Json(json!({ "poolAddress": address, "added": true }))))
}

async fn remove_pool_handler(
    State(state): State<ApiState>,
    Path(pool_address): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.collector.remove_pool(&pool_address).await {
        return Err(ApiError::NotFound(format!("Pool not tracked: {pool_address}")));
    }
    Ok(Json(json!({ "poolAddress": pool_address, "removed": true })))
}

/* ---------- pool data ---------- */

async fn latest_handler(
    State(state): State<ApiState>,
    Path(pool_address): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let records = state
        .storage
        .latest(&pool_address)
        .await
        .map_err(|e| store_failure(&pool_address, "latest", e))?;
    let timestamp = records.first().map(|r| iso(r.timestamp)).unwrap_or(Value::Null);
    Ok(Json(json!({
        "poolAddress": pool_address,
        "timestamp": timestamp,
        "count": records.len(),
        "liquidityData": records,
    })))
}

async fn bar_chart_handler(
    State(state): State<ApiState>,
    Path(pool_address): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let records = state
        .storage
        .latest(&pool_address)
        .await
        .map_err(|e| store_failure(&pool_address, "bar-chart", e))?;
    let timestamp = records.first().map(|r| iso(r.timestamp)).unwrap_or(Value::Null);
    let bars = bar_chart(&records);
    Ok(Json(json!({
        "poolAddress": pool_address,
        "timestamp": timestamp,
        "count": bars.len(),
        "barChartData": bars,
    })))
}

async fn history_handler(
    State(state): State<ApiState>,
    Path(pool_address): Path<String>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Value>, ApiError> {
    let start = parse_opt_time("startTime", q.start_time.as_deref())?;
    let end = parse_opt_time("endTime", q.end_time.as_deref())?;
    let limit = parse_number("limit", q.limit.as_deref(), DEFAULT_QUERY_LIMIT)?;

    let params = QueryRangeParams::new(&pool_address).with_range(start, end).with_limit(limit);
    let records = state
        .storage
        .query_range(&params)
        .await
        .map_err(|e| store_failure(&pool_address, "history", e))?;
    Ok(Json(json!({
        "poolAddress": pool_address,
        "timeRange": {
            "startTime": start.map(iso).unwrap_or(Value::Null),
            "endTime": end.map(iso).unwrap_or(Value::Null),
        },
        "count": records.len(),
        "liquidityData": records,
    })))
}

async fn timeseries_handler(
    State(state): State<ApiState>,
    Path(pool_address): Path<String>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Value>, ApiError> {
    let (Some(start), Some(end)) = (
        parse_opt_time("startTime", q.start_time.as_deref())?,
        parse_opt_time("endTime", q.end_time.as_deref())?,
    ) else {
        return Err(ApiError::BadRequest("startTime and endTime are required".to_string()));
    };

    let groups = state
        .storage
        .time_range(&pool_address, start, end)
        .await
        .map_err(|e| store_failure(&pool_address, "timeseries", e))?;
    let slots: Vec<Value> = groups
        .into_iter()
        .map(|(ts, records)| {
            let bars: Vec<BarChartEntry> = bar_chart(&records);
            json!({
                "timestamp": iso(ts),
                "tickCount": records.len(),
                "liquidityData": records,
                "barChartData": bars,
            })
        })
        .collect();
    Ok(Json(json!({
        "poolAddress": pool_address,
        "timeRange": { "startTime": iso(start), "endTime": iso(end) },
        "totalSlots": slots.len(),
        "timeSlots": slots,
    })))
}

async fn stats_handler(
    State(state): State<ApiState>,
    Path(pool_address): Path<String>,
    Query(q): Query<StatsQuery>,
) -> Result<Json<Value>, ApiError> {
    let hours: u32 = parse_number("hours", q.hours.as_deref(), DEFAULT_STATS_HOURS)?;
    let stats = state
        .storage
        .stats(&pool_address, hours, OffsetDateTime::now_utc())
        .await
        .map_err(|e| store_failure(&pool_address, "stats", e))?;
    Ok(Json(match stats {
        Some(stats) => json!({
            "poolAddress": pool_address,
            "timeRange": format!("{hours} hours"),
            "stats": stats,
        }),
        None => json!({
            "poolAddress": pool_address,
            "stats": null,
            "message": "No data available for the specified time range",
        }),
    }))
}
