//! The node's two HTTP surfaces, served from one `axum::Router` on the
//! same listener (see `SPEC_FULL.md` §6 "EXTERNAL INTERFACES — expanded"):
//! `/api/v1/...` is the external surface the gateway forwards unchanged;
//! `/internal/...` is the cluster-internal RPC surface peers use to
//! forward writes, reads, metadata, and orchestration updates.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log_cache_proto::rpc::{
    Ack, AddRangeRequest, ApiErrorBody, ErrorKind, ListRangesResponse, MetaRequest, MetaResponse, QueryResult,
    ReadRequest, ReadResponse, RemoveRangeRequest, SendRequest, SetRangesRequest,
};
use log_cache_proto::{Envelope, EnvelopeType};
use log_cache_store::EnvelopeFilter;
use log_cache_router::Orchestrator;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/read/:source_id", get(read_handler))
        .route("/api/v1/meta", get(meta_handler))
        .route("/api/v1/query", get(instant_query_handler))
        .route("/api/v1/query_range", get(range_query_handler))
        .route("/api/v1/info", get(info_handler))
        .route("/internal/send", post(internal_send_handler))
        .route("/internal/read", post(internal_read_handler))
        .route("/internal/meta", post(internal_meta_handler))
        .route("/internal/ranges", post(set_ranges_handler).get(list_ranges_handler))
        .route("/internal/ranges/add", post(add_range_handler))
        .route("/internal/ranges/remove", post(remove_range_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Failure modes an HTTP handler can surface, mapped onto the status
/// codes and error body named in §7.
pub enum ApiFailure {
    BadData(String),
    Timeout,
    Internal(String),
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiFailure::BadData(msg) => (StatusCode::BAD_REQUEST, ErrorKind::BadData, msg),
            ApiFailure::Timeout => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Timeout,
                "query exceeded its deadline".to_string(),
            ),
            ApiFailure::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal, msg),
        };
        (status, Json(ApiErrorBody::new(kind, message))).into_response()
    }
}

impl From<log_cache_promql::PromqlError> for ApiFailure {
    fn from(err: log_cache_promql::PromqlError) -> Self {
        match err {
            log_cache_promql::PromqlError::BadData(msg) => ApiFailure::BadData(msg),
            log_cache_promql::PromqlError::Unsupported(msg) => ApiFailure::BadData(msg),
            log_cache_promql::PromqlError::Timeout(_) => ApiFailure::Timeout,
            log_cache_promql::PromqlError::Upstream(msg) => ApiFailure::Internal(msg),
        }
    }
}

#[derive(Serialize)]
struct SuccessBody {
    status: &'static str,
    data: QueryResult,
}

#[derive(Deserialize, Default)]
struct ReadQuery {
    start_time: Option<i64>,
    end_time: Option<i64>,
    limit: Option<usize>,
    envelope_types: Option<String>,
    descending: Option<bool>,
    name_filter: Option<String>,
}

fn parse_envelope_types(raw: &str) -> Result<HashSet<EnvelopeType>, ApiFailure> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| match s.trim() {
            "log" => Ok(EnvelopeType::Log),
            "counter" => Ok(EnvelopeType::Counter),
            "gauge" => Ok(EnvelopeType::Gauge),
            "timer" => Ok(EnvelopeType::Timer),
            "event" => Ok(EnvelopeType::Event),
            other => Err(ApiFailure::BadData(format!("unknown envelope type {other:?}"))),
        })
        .collect()
}

async fn read_handler(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<String>,
    Query(params): Query<ReadQuery>,
) -> Result<Json<ReadResponse>, ApiFailure> {
    let types = params
        .envelope_types
        .as_deref()
        .map(parse_envelope_types)
        .transpose()?;
    let name = params
        .name_filter
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .map_err(|err| ApiFailure::BadData(format!("invalid name_filter: {err}")))?;
    let filter = EnvelopeFilter::new(types, name);

    let envelopes = state
        .egress
        .get(
            &source_id,
            params.start_time.unwrap_or(0),
            params.end_time.unwrap_or(i64::MAX),
            params.limit.unwrap_or(usize::MAX),
            params.descending.unwrap_or(false),
            &filter,
        )
        .await;

    Ok(Json(ReadResponse {
        envelopes: envelopes.iter().map(|e| (**e).clone()).collect(),
    }))
}

async fn meta_handler(State(state): State<Arc<AppState>>) -> Json<MetaResponse> {
    let peers = state.table.snapshot().nodes().to_vec();
    Json(state.egress.meta(&peers).await)
}

fn now_ms_truncated_to_second() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() as i64) * 1000
}

fn parse_timestamp_ms(raw: &str) -> Result<i64, ApiFailure> {
    if let Ok(seconds) = raw.parse::<f64>() {
        return Ok((seconds * 1000.0) as i64);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|err| ApiFailure::BadData(format!("invalid timestamp {raw:?}: {err}")))
}

#[derive(Deserialize)]
struct InstantQueryParams {
    query: String,
    time: Option<String>,
}

async fn instant_query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InstantQueryParams>,
) -> Result<Json<SuccessBody>, ApiFailure> {
    let at_ms = match params.time {
        Some(raw) => parse_timestamp_ms(&raw)?,
        None => now_ms_truncated_to_second(),
    };
    let data = state.promql.instant_query(&params.query, at_ms).await?;
    Ok(Json(SuccessBody { status: "success", data }))
}

#[derive(Deserialize)]
struct RangeQueryParams {
    query: String,
    start: String,
    end: String,
    step: String,
}

async fn range_query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeQueryParams>,
) -> Result<Json<SuccessBody>, ApiFailure> {
    let start_ms = parse_timestamp_ms(&params.start)?;
    let end_ms = parse_timestamp_ms(&params.end)?;
    let step = log_cache_promql::parse_step(&params.step)
        .map_err(|_| ApiFailure::BadData(format!("invalid step {:?}", params.step)))?;
    let step_ms = step.as_millis() as i64;

    let data = state
        .promql
        .range_query(&params.query, start_ms, end_ms, step_ms)
        .await?;
    Ok(Json(SuccessBody { status: "success", data }))
}

#[derive(Serialize)]
struct InfoResponse {
    version: &'static str,
    vm_uptime: String,
}

async fn info_handler(State(state): State<Arc<AppState>>) -> String {
    let body = InfoResponse {
        version: env!("CARGO_PKG_VERSION"),
        vm_uptime: humantime::format_duration(state.start_time.elapsed()).to_string(),
    };
    format!("{}\n", serde_json::to_string(&body).expect("serializable"))
}

async fn internal_send_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> Json<Ack> {
    for envelope in request.envelopes {
        route_envelope(&state, envelope, request.local_only);
    }
    Json(Ack::default())
}

fn route_envelope(state: &AppState, envelope: Envelope, local_only: bool) {
    if local_only {
        state.store.put(envelope);
    } else {
        state.ingress.route(envelope);
    }
}

async fn internal_read_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, ApiFailure> {
    let types: Option<HashSet<EnvelopeType>> = if request.envelope_types.is_empty() {
        None
    } else {
        Some(request.envelope_types.into_iter().collect())
    };
    let name = request
        .name_filter
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .map_err(|err| ApiFailure::BadData(format!("invalid name_filter: {err}")))?;
    let filter = EnvelopeFilter::new(types, name);

    let envelopes = if request.local_only {
        state.store.get(
            &request.source_id,
            request.start_time,
            request.end_time,
            request.limit,
            request.descending,
            &filter,
        )
    } else {
        state
            .egress
            .get(
                &request.source_id,
                request.start_time,
                request.end_time,
                request.limit,
                request.descending,
                &filter,
            )
            .await
    };

    Ok(Json(ReadResponse {
        envelopes: envelopes.iter().map(|e| (**e).clone()).collect(),
    }))
}

async fn internal_meta_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MetaRequest>,
) -> Json<MetaResponse> {
    if request.local_only {
        let sources = state
            .store
            .meta()
            .into_iter()
            .map(|(id, meta)| {
                (
                    id,
                    log_cache_proto::rpc::SourceMeta {
                        count: meta.count,
                        expired: meta.expired,
                        oldest_ts: meta.oldest_ts,
                        newest_ts: meta.newest_ts,
                    },
                )
            })
            .collect();
        Json(MetaResponse { sources })
    } else {
        let peers = state.table.snapshot().nodes().to_vec();
        Json(state.egress.meta(&peers).await)
    }
}

async fn set_ranges_handler(State(state): State<Arc<AppState>>, Json(request): Json<SetRangesRequest>) {
    Orchestrator::new(&state.table).set_ranges(request.nodes, request.ranges);
}

async fn add_range_handler(State(state): State<Arc<AppState>>, Json(request): Json<AddRangeRequest>) {
    Orchestrator::new(&state.table).add_range(&request.node, request.range);
}

async fn remove_range_handler(State(state): State<Arc<AppState>>, Json(request): Json<RemoveRangeRequest>) {
    Orchestrator::new(&state.table).remove_range(&request.node, request.range);
}

async fn list_ranges_handler(State(state): State<Arc<AppState>>) -> Json<ListRangesResponse> {
    let (nodes, ranges) = Orchestrator::new(&state.table).list_ranges();
    Json(ListRangesResponse { nodes, ranges })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    crate::metrics_text::render(&state)
}
