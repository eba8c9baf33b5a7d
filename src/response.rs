use crate::{
    detection::{DetectionRecord, PredictionResult},
    image_codec::encode_jpeg,
};
use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue},
    response::Response,
};
use serde::Serialize;
use std::fmt::Write;
use thiserror::Error;

/// Side-channel header carrying the detection list next to the image body.
pub static JSON_DATA_HEADER: HeaderName = HeaderName::from_static("x-json-data");

const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to encode jpeg: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("failed to serialize detections: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid header value: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),
    #[error("failed to build response: {0}")]
    HttpBuilder(#[from] axum::http::Error),
}

#[derive(Serialize)]
struct DetectionPayload<'a> {
    detections: &'a [DetectionRecord],
}

/// JSON for the `X-Json-Data` header. Non-ASCII characters are written as
/// `\u` escapes so the value is always a legal header.
pub fn detections_header(detections: &[DetectionRecord]) -> Result<HeaderValue, EncodeError> {
    let json = serde_json::to_string(&DetectionPayload { detections })?;
    let value = HeaderValue::from_str(&escape_non_ascii(&json))?;
    Ok(value)
}

fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                let _ = write!(out, "\\u{:04x}", unit);
            }
        }
    }
    out
}

/// Builds the `/predict` response: annotated JPEG body plus the detection
/// list in the side-channel header.
pub fn encode(result: &PredictionResult, jpeg_quality: u8) -> Result<Response, EncodeError> {
    let image_data = encode_jpeg(&result.annotated_image, jpeg_quality)?;
    let detections = detections_header(&result.detections)?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, IMAGE_CONTENT_TYPE)
        .header(JSON_DATA_HEADER.clone(), detections)
        .body(Body::from(image_data))?;

    Ok(response)
}
