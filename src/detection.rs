use crate::{
    labels::LabelVocabulary,
    model_service::{Candidate, InferenceError, ModelService},
    render::{Overlay, Renderer},
};
use image::{Rgb, RgbImage};
use serde::Serialize;
use std::sync::Arc;

/// Minimum confidence a detection needs to be reported.
pub const CONFIDENCE_THRESHOLD: f32 = 0.25;

const UNKNOWN_CLASS_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` as fractions of the image width and height.
    pub bbox: [f32; 4],
}

#[derive(Debug)]
pub struct PredictionResult {
    pub detections: Vec<DetectionRecord>,
    pub annotated_image: RgbImage,
}

pub struct DetectionAdapter {
    model_service: Arc<dyn ModelService>,
    labels: LabelVocabulary,
    renderer: Renderer,
}

impl DetectionAdapter {
    pub fn new(
        model_service: Arc<dyn ModelService>,
        labels: LabelVocabulary,
        renderer: Renderer,
    ) -> Self {
        Self {
            model_service,
            labels,
            renderer,
        }
    }

    /// Runs the model on `image` and renders the retained detections. Blocks
    /// for the duration of inference.
    pub fn detect(&self, image: &RgbImage) -> Result<PredictionResult, InferenceError> {
        let candidates = self.model_service.predict(image, CONFIDENCE_THRESHOLD)?;

        let (width, height) = image.dimensions();
        let labeled: Vec<(DetectionRecord, Rgb<u8>)> = candidates
            .iter()
            .filter(|candidate| candidate.confidence >= CONFIDENCE_THRESHOLD)
            .map(|candidate| self.to_record(candidate, width, height))
            .collect();

        for (i, (record, _)) in labeled.iter().enumerate() {
            tracing::debug!(
                "Detection {}: label={}, confidence={:.3}, bbox=({:.3}, {:.3}, {:.3}, {:.3})",
                i,
                record.label,
                record.confidence,
                record.bbox[0],
                record.bbox[1],
                record.bbox[2],
                record.bbox[3]
            );
        }

        let annotated_image = {
            let overlays: Vec<Overlay<'_>> = labeled
                .iter()
                .map(|(record, color)| Overlay {
                    record,
                    color: *color,
                })
                .collect();
            self.renderer.render(image, &overlays)
        };

        let detections = labeled.into_iter().map(|(record, _)| record).collect();

        Ok(PredictionResult {
            detections,
            annotated_image,
        })
    }

    fn to_record(
        &self,
        candidate: &Candidate,
        width: u32,
        height: u32,
    ) -> (DetectionRecord, Rgb<u8>) {
        let (label, color) = match self.labels.get(candidate.class_id) {
            Some(color_label) => (
                color_label.label.clone(),
                Rgb([color_label.red, color_label.green, color_label.blue]),
            ),
            None => (
                format!("Unknown class {}", candidate.class_id),
                UNKNOWN_CLASS_COLOR,
            ),
        };

        let (w, h) = (width.max(1) as f32, height.max(1) as f32);
        let bbox = [
            normalize(candidate.x1, w),
            normalize(candidate.y1, h),
            normalize(candidate.x2, w),
            normalize(candidate.y2, h),
        ];

        let record = DetectionRecord {
            label,
            confidence: candidate.confidence.clamp(0.0, 1.0),
            bbox,
        };

        (record, color)
    }
}

fn normalize(value: f32, extent: f32) -> f32 {
    (value / extent).clamp(0.0, 1.0)
}
