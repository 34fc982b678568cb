// Error type shared by the headhunt tracker and the stat calculator.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeadhuntError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl HeadhuntError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HeadhuntError::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HeadhuntError::Unauthenticated => StatusCode::UNAUTHORIZED,
            HeadhuntError::Validation(_) => StatusCode::BAD_REQUEST,
            HeadhuntError::NotFound(_) => StatusCode::NOT_FOUND,
            HeadhuntError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HeadhuntError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            HeadhuntError::Storage(e) => {
                tracing::error!("Database error: {e}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
