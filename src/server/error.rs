use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::odata::QueryError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid query: {0}")]
    Query(#[from] QueryError),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Query(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("{self}");
        } else {
            debug!("Rejected request: {self}");
        }

        let body = Json(json!({
            "status": "error",
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
