use crate::{
    error::{ApiError, InvalidInputError},
    feedback::FeedbackSubmission,
    routes::form::MultipartForm,
    server::SharedState,
};
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    response::Json,
};
use serde_json::{json, Value};
use tracing::instrument;

#[instrument(skip(state, multipart))]
pub async fn feedback(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    state.metrics.record_request("/feedback");

    let submission = read_submission(multipart).await;
    let feedback = submission
        .validate()
        .map_err(InvalidInputError::MissingFeedbackData)?;

    let entry = state.feedback.record(feedback).await?;
    state.metrics.record_feedback();

    tracing::info!(
        "Feedback stored: image={}, incorrect_label={}, correct_label={}",
        entry.image_filename,
        entry.incorrect_label,
        entry.correct_label
    );

    Ok(Json(json!({ "message": "Feedback received successfully." })))
}

async fn read_submission(multipart: Result<Multipart, MultipartRejection>) -> FeedbackSubmission {
    let form = match multipart {
        Ok(multipart) => MultipartForm::read(multipart).await,
        Err(rejection) => {
            tracing::debug!("Request is not a multipart form: {}", rejection);
            return FeedbackSubmission::default();
        }
    };

    match form {
        Ok(mut form) => FeedbackSubmission {
            image: form.take("image").map(|data| data.to_vec()),
            incorrect_label: form.take_text("incorrectLabel"),
            correct_label: form.take_text("correctLabel"),
            comments: form.take_text("comments"),
        },
        Err(e) => {
            tracing::warn!("Failed to read multipart body: {}", e);
            FeedbackSubmission::default()
        }
    }
}
