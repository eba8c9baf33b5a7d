use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to build input tensor: {0}")]
    Input(String),
    #[error("inference failed: {0}")]
    Runtime(String),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("inference task aborted: {0}")]
    Aborted(String),
}

/// Raw detection as produced by a model backend, in pixel coordinates of the
/// submitted bitmap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Object detection capability. Implementations are loaded once and shared
/// read-only across requests; `predict` blocks the calling thread.
pub trait ModelService: Send + Sync + 'static {
    fn predict(
        &self,
        image: &RgbImage,
        min_confidence: f32,
    ) -> Result<Vec<Candidate>, InferenceError>;
}
