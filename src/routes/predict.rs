use crate::{
    error::{ApiError, InvalidInputError},
    image_codec,
    model_service::InferenceError,
    response,
    routes::form::MultipartForm,
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Response,
};
use std::time::Instant;
use tracing::instrument;

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    state.metrics.record_request("/predict");

    let image_data = read_image(multipart)
        .await
        .ok_or(InvalidInputError::MissingImage)?;

    let detection = state.detection.clone();
    let jpeg_quality = state.jpeg_quality;
    let (count, http_response) = tokio::task::spawn_blocking(move || -> Result<_, ApiError> {
        let image =
            image_codec::decode(&image_data).map_err(InvalidInputError::InvalidImage)?;
        let result = detection.detect(&image)?;
        let encoded = response::encode(&result, jpeg_quality)?;
        Ok((result.detections.len(), encoded))
    })
    .await
    .map_err(|e| InferenceError::Aborted(e.to_string()))??;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    state.metrics.record_prediction(elapsed_ms, count);
    tracing::info!(
        "Prediction successful. Found {} objects in {} ms.",
        count,
        elapsed_ms
    );

    Ok(http_response)
}

async fn read_image(multipart: Result<Multipart, MultipartRejection>) -> Option<Vec<u8>> {
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::debug!("Request is not a multipart form: {}", rejection);
            return None;
        }
    };

    match MultipartForm::read(multipart).await {
        Ok(mut form) => form.take("image").map(|data| data.to_vec()),
        Err(e) => {
            tracing::warn!("Failed to read multipart body: {}", e);
            None
        }
    }
}
