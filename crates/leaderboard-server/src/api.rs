//! HTTP API route handlers for the leaderboard.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use leaderboard::config::LeaderboardConfig;
use leaderboard::coordinator::SubmissionCoordinator;
use leaderboard::error::LeaderboardError;
use leaderboard::metrics::LeaderboardMetrics;
use leaderboard::ranking::{RankingEngine, StageLeaderboard};
use leaderboard::store::LeaderboardStore;
use leaderboard::submission::{parse_stage, NumericInput, Submission};
use leaderboard::types::{RecordId, StageNumber};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

/// Shared application state.
pub struct AppState {
    pub coordinator: SubmissionCoordinator,
    pub engine: RankingEngine,
    /// Used by the readiness probe only.
    pub store: Arc<dyn LeaderboardStore>,
    /// Registry scraped by `/metrics`.
    pub registry: Registry,
}

impl AppState {
    /// Wire a coordinator and ranking engine to `store`, registering metrics
    /// with `registry`.
    pub fn new(
        store: Arc<dyn LeaderboardStore>,
        config: LeaderboardConfig,
        registry: Registry,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = Arc::new(LeaderboardMetrics::new(&registry)?);
        Ok(Self {
            coordinator: SubmissionCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&config),
                metrics,
            ),
            engine: RankingEngine::new(Arc::clone(&store), config),
            store,
            registry,
        })
    }
}

/// Create the HTTP router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/health/ready", get(readiness))
        .route("/api/leaderboard", post(submit_record))
        .route("/api/leaderboard/global/top", get(global_top))
        .route("/api/leaderboard/:stage_number", get(stage_leaderboard))
        .route("/api/stats/:stage_number", get(stage_stats))
        .route("/api/replay/:record_id", get(replay))
        .route("/metrics", get(metrics))
        .with_state(state)
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub backend: String,
}

/// Body of `POST /api/leaderboard`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub stage_number: Option<NumericInput>,
    pub time: Option<NumericInput>,
    pub player_name: Option<String>,
    /// Any JSON value; stored verbatim and returned by the replay endpoint.
    pub replay_data: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub id: RecordId,
    pub message: String,
}

/// Best record of one stage as shown by `/api/leaderboard/global/top`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopRecord {
    pub player_name: String,
    pub time: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTopResponse {
    /// Keyed by stage number; stages without records are absent.
    pub top_records: BTreeMap<i32, TopRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatsResponse {
    pub stage_number: StageNumber,
    pub total_records: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResponse {
    pub success: bool,
    pub replay_data: serde_json::Value,
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness check. Never touches the store.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Leaderboard API is running".to_string(),
    })
}

/// Readiness check against the backing store.
pub async fn readiness(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, ApiError> {
    state.store.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, "store health check failed");
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, DATABASE_ERROR)
    })?;
    Ok(Json(ReadinessResponse {
        status: "ok".to_string(),
        backend: state.store.backend_name().to_string(),
    }))
}

/// Top records of one stage.
pub async fn stage_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(stage_number): Path<String>,
) -> Result<Json<StageLeaderboard>, ApiError> {
    let stage = parse_stage(&NumericInput::Text(stage_number))
        .map_err(|e| ApiError::from_core(e, DATABASE_ERROR))?;
    let board = state
        .engine
        .leaderboard(stage)
        .await
        .map_err(|e| ApiError::from_core(e, DATABASE_ERROR))?;
    Ok(Json(board))
}

/// Submit a time, with an optional replay.
pub async fn submit_record(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        tracing::debug!(error = %rejection, "rejected request body");
        ApiError::new(StatusCode::BAD_REQUEST, INVALID_BODY)
    })?;

    let replay = match request.replay_data {
        Some(value) => Some(serde_json::to_vec(&value).map_err(|e| {
            tracing::warn!(error = %e, "failed to encode replay data");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, SAVE_FAILED)
        })?),
        None => None,
    };
    let submission = Submission {
        stage_number: request.stage_number,
        time: request.time,
        player_name: request.player_name,
        replay,
    };

    let record = state
        .coordinator
        .submit(submission)
        .await
        .map_err(|e| ApiError::from_core(e, SAVE_FAILED))?;

    Ok(Json(SubmitResponse {
        success: true,
        id: record.id,
        message: "Record saved successfully".to_string(),
    }))
}

/// Best record of every stage.
pub async fn global_top(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GlobalTopResponse>, ApiError> {
    let best = state
        .engine
        .global_best()
        .await
        .map_err(|e| ApiError::from_core(e, DATABASE_ERROR))?;

    let top_records = best
        .into_iter()
        .map(|(stage, record)| {
            (
                stage.value(),
                TopRecord {
                    player_name: record.player_name.into(),
                    time: record.time.seconds(),
                    timestamp: record.created_at,
                },
            )
        })
        .collect();
    Ok(Json(GlobalTopResponse { top_records }))
}

/// Number of records stored for a stage.
pub async fn stage_stats(
    State(state): State<Arc<AppState>>,
    Path(stage_number): Path<String>,
) -> Result<Json<StageStatsResponse>, ApiError> {
    let stage = parse_stage(&NumericInput::Text(stage_number))
        .map_err(|e| ApiError::from_core(e, DATABASE_ERROR))?;
    let total_records = state
        .engine
        .count(stage)
        .await
        .map_err(|e| ApiError::from_core(e, DATABASE_ERROR))?;
    Ok(Json(StageStatsResponse {
        stage_number: stage,
        total_records,
    }))
}

/// Replay data stored for a record.
pub async fn replay(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<String>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let record_id = match record_id.trim().parse::<i64>() {
        Ok(id) if id > 0 => RecordId(id),
        _ => return Err(ApiError::new(StatusCode::BAD_REQUEST, INVALID_RECORD_ID)),
    };

    let replay = state
        .engine
        .replay(record_id)
        .await
        .map_err(|e| ApiError::from_core(e, DATABASE_ERROR))?;

    let replay_data = serde_json::from_slice(&replay.payload).map_err(|e| {
        tracing::warn!(record_id = %record_id, error = %e, "stored replay is not valid JSON");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, REPLAY_PARSE_FAILED)
    })?;

    Ok(Json(ReplayResponse {
        success: true,
        replay_data,
    }))
}

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|e| {
            tracing::warn!(error = %e, "failed to encode metrics");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
        })?;
    Ok((
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    ))
}

// ============================================================================
// Errors
// ============================================================================

const MISSING_FIELDS: &str = "Missing required fields: stageNumber, time, playerName";
const INVALID_STAGE: &str = "Invalid stage number";
const INVALID_TIME: &str = "Invalid time value";
const INVALID_NAME: &str = "Invalid player name";
const INVALID_BODY: &str = "Invalid request body";
const INVALID_RECORD_ID: &str = "Invalid leaderboard ID";
const REPLAY_NOT_FOUND: &str = "Replay not found";
const REPLAY_PARSE_FAILED: &str = "Failed to parse replay data";
const SAVE_FAILED: &str = "Failed to save record";
const DATABASE_ERROR: &str = "Database error";

/// Error response: a status code and a client-facing message, rendered as
/// `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }

    /// Map a core error. Store failures are opaque to clients and answered
    /// with `server_message`.
    fn from_core(err: LeaderboardError, server_message: &'static str) -> Self {
        let (status, message) = match &err {
            LeaderboardError::MissingField { .. } => (StatusCode::BAD_REQUEST, MISSING_FIELDS),
            LeaderboardError::InvalidStage { .. } => (StatusCode::BAD_REQUEST, INVALID_STAGE),
            LeaderboardError::InvalidTime { .. } => (StatusCode::BAD_REQUEST, INVALID_TIME),
            LeaderboardError::InvalidName { .. } => (StatusCode::BAD_REQUEST, INVALID_NAME),
            LeaderboardError::NotFound { .. } => (StatusCode::NOT_FOUND, REPLAY_NOT_FOUND),
            LeaderboardError::ForeignKeyError { .. }
            | LeaderboardError::PersistenceError { .. }
            | LeaderboardError::InvalidConfig { .. } => {
                tracing::error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, server_message)
            }
        };
        Self::new(status, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.message
            })),
        )
            .into_response()
    }
}
