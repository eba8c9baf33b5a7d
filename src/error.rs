use crate::{
    feedback::{MissingFieldError, StorageError},
    image_codec::InvalidImageError,
    model_service::InferenceError,
    response::EncodeError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

pub const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred.";

/// Problems with the shape of a request. Displayed verbatim to the client.
#[derive(Error, Debug)]
pub enum InvalidInputError {
    #[error("No image file provided.")]
    MissingImage,
    #[error("Invalid image file.")]
    InvalidImage(#[source] InvalidImageError),
    #[error("Missing required feedback data.")]
    MissingFeedbackData(#[source] MissingFieldError),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("feedback storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("response encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Inference(_) | ApiError::Storage(_) | ApiError::Encode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::InvalidInput(e) => {
                match std::error::Error::source(e) {
                    Some(source) => tracing::warn!("Rejected request: {} ({})", e, source),
                    None => tracing::warn!("Rejected request: {}", e),
                }
                e.to_string()
            }
            other => {
                tracing::error!("An error occurred while handling the request: {:?}", other);
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
