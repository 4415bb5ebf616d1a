//! Read-only HTTP surface: health, probe inventory, metric range reads,
//! and alert history. Configuration CRUD lives elsewhere.

use crate::state::AppState;
use crate::ws;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vigil_common::types::{AlertRecord, AlertStatus, HostSnapshot, Probe};
use vigil_storage::tsdb::{Aggregation, RangeQuery, SeriesPoint};
use vigil_storage::StoreError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/probe/ws", get(ws::probe_ws_handler))
        .route("/api/probes", get(list_probes))
        .route("/api/metrics/range", get(metrics_range))
        .route("/api/alerts/records", get(alert_records))
        .with_state(state)
}

type ApiError = (StatusCode, String);

fn internal(err: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    uptime_secs: i64,
    sessions: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        sessions: state.manager.count(),
    })
}

#[derive(Serialize)]
struct ProbeView {
    #[serde(flatten)]
    probe: Probe,
    online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<HostSnapshot>,
}

async fn list_probes(State(state): State<AppState>) -> Result<Json<Vec<ProbeView>>, ApiError> {
    let probes = state.meta.list_probes().map_err(internal)?;
    let views = probes
        .into_iter()
        .map(|probe| {
            let online = state.manager.contains(&probe.id);
            let host = state.meta.get_host_snapshot(&probe.id).unwrap_or(None);
            ProbeView {
                probe,
                online,
                host,
            }
        })
        .collect();
    Ok(Json(views))
}

#[derive(Deserialize)]
struct RangeParams {
    name: String,
    probe_id: Option<String>,
    start_ms: i64,
    end_ms: i64,
    #[serde(default = "default_step_s")]
    step_s: i64,
    #[serde(default = "default_agg")]
    agg: String,
}

fn default_step_s() -> i64 {
    60
}

fn default_agg() -> String {
    "avg".to_string()
}

async fn metrics_range(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<SeriesPoint>>, ApiError> {
    let agg: Aggregation = params.agg.parse().map_err(bad_request)?;
    let query = RangeQuery {
        name: params.name,
        probe_id: params.probe_id,
        label_filters: HashMap::new(),
        start_ms: params.start_ms,
        end_ms: params.end_ms,
        step_ms: params.step_s.saturating_mul(1000),
        agg,
    };
    let points = state.tsdb.query_range(&query).map_err(|e| match e {
        StoreError::Malformed(msg) => bad_request(msg),
        other => internal(other),
    })?;
    Ok(Json(points))
}

#[derive(Deserialize)]
struct RecordParams {
    probe_id: Option<String>,
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn alert_records(
    State(state): State<AppState>,
    Query(params): Query<RecordParams>,
) -> Result<Json<Vec<AlertRecord>>, ApiError> {
    let status = match params.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<AlertStatus>().map_err(bad_request)?),
    };
    let records = state
        .meta
        .list_alert_records(
            params.probe_id.as_deref(),
            status,
            params.limit.min(1000),
            params.offset,
        )
        .map_err(internal)?;
    Ok(Json(records))
}
