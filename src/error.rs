use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("{0}")]
    InvalidMediaType(String),
    #[error("{0}")]
    Decode(String),
    #[error("{0}")]
    MalformedUpload(String),
    #[error("{0}")]
    Processing(String),
}

impl PredictError {
    pub fn processing_image(cause: impl std::fmt::Display) -> Self {
        PredictError::Processing(format!("Error processing image: {}", cause))
    }

    pub fn processing_video(cause: impl std::fmt::Display) -> Self {
        PredictError::Processing(format!("Error processing video: {}", cause))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PredictError::InvalidMediaType(_)
            | PredictError::Decode(_)
            | PredictError::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            PredictError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
