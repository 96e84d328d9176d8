use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use logstore_engine::IngestError;

/// Failure of a request, rendered as `{"message", "status_code"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("no logs found")]
    NotFound,

    #[error("log already exists")]
    Conflict,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    status_code: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Decode(e) => ApiError::BadRequest(format!("unable to decode json: {e}")),
            IngestError::Validation(e) => ApiError::Unprocessable(e.to_string()),
            IngestError::NotFound => ApiError::NotFound,
            e if e.is_duplicate() => ApiError::Conflict,
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal server error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            message,
            status_code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serve: {0}")]
    Serve(#[source] std::io::Error),
}
