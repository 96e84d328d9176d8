use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use logstore_api::{DomainLog, LogLevel, RawRecord};
use logstore_engine::ConnectionState;

use crate::AppState;
use crate::error::ApiError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Save body: an array of records or one bare record.
#[derive(Deserialize)]
#[serde(untagged)]
enum SaveBody {
    Many(Vec<RawRecord>),
    One(RawRecord),
}

impl SaveBody {
    fn into_records(self) -> Vec<RawRecord> {
        match self {
            SaveBody::Many(records) => records,
            SaveBody::One(record) => vec![record],
        }
    }
}

// --- POST /logs/save ---

pub(crate) async fn handle_save(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let records = serde_json::from_slice::<SaveBody>(&body)
        .map_err(|e| ApiError::BadRequest(format!("unable to decode json: {e}")))?
        .into_records();

    let saved = state.service.save_logs(records).await?;
    tracing::debug!(records = saved, "logs saved over http");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "status": "added" })),
    ))
}

// --- GET /logs/get?level=X ---

#[derive(Deserialize)]
pub(crate) struct LevelParams {
    level: Option<String>,
}

#[derive(Debug, Serialize)]
struct LogView {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Level")]
    level: &'static str,
    #[serde(rename = "Pathname")]
    pathname: String,
    #[serde(rename = "Message")]
    message: String,
}

impl From<DomainLog> for LogView {
    fn from(log: DomainLog) -> Self {
        let timestamp = chrono::DateTime::from_timestamp(i64::from(log.timestamp), 0)
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default();
        Self {
            timestamp,
            level: log.level.as_str(),
            pathname: log.path,
            message: log.message,
        }
    }
}

pub(crate) async fn handle_get(
    State(state): State<AppState>,
    Query(params): Query<LevelParams>,
) -> Result<impl IntoResponse, ApiError> {
    let raw = params
        .level
        .ok_or_else(|| ApiError::BadRequest("level is required".into()))?;
    let level = raw
        .parse::<LogLevel>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let logs = state.service.get_logs(level).await?;
    let views: Vec<LogView> = logs.into_iter().map(LogView::from).collect();
    Ok(Json(views))
}

// --- GET /health ---

pub(crate) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let current = *state.connection.borrow();
    let status = match current {
        ConnectionState::Connected => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(serde_json::json!({ "broker": current.as_str() })),
    )
}
