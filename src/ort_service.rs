use crate::{
    config::{ModelConfig, Validatable},
    model_service::{Candidate, InferenceError, ModelService},
};
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array, ArrayD, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

fn intersection(box1: &Candidate, box2: &Candidate) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &Candidate, box2: &Candidate) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn iou(box1: &Candidate, box2: &Candidate) -> f32 {
    let union = union(box1, box2);
    if union <= 0. {
        return 0.;
    }
    intersection(box1, box2) / union
}

/// Greedy non-maximum suppression. Output is sorted by descending confidence.
pub(crate) fn non_max_suppression(mut boxes: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        let best = boxes[0];
        result.push(best);
        boxes = boxes
            .into_iter()
            .skip(1)
            .filter(|candidate| iou(&best, candidate) < iou_threshold)
            .collect();
    }

    result
}

fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let img = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a YOLOv8 style `[1, 4 + classes, anchors]` output into pixel space
/// candidates for an image of `img_width` x `img_height`.
pub(crate) fn decode_output(
    output: &ArrayD<f32>,
    input_size: u32,
    img_width: u32,
    img_height: u32,
    min_confidence: f32,
) -> Result<Vec<Candidate>, InferenceError> {
    if output.ndim() != 3 || output.shape()[1] <= 4 {
        return Err(InferenceError::Output(format!(
            "expected [1, 4 + classes, anchors], got {:?}",
            output.shape()
        )));
    }

    let scale_x = img_width as f32 / input_size as f32;
    let scale_y = img_height as f32 / input_size as f32;

    let output = output.t();
    let output = output.slice(s![.., .., 0]);

    let mut boxes = Vec::new();
    for row in output.axis_iter(Axis(0)) {
        let row: Vec<_> = row.iter().copied().collect();
        let Some((class_id, prob)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        else {
            continue;
        };

        if !prob.is_finite() || prob < min_confidence {
            continue;
        }

        let xc = row[0] * scale_x;
        let yc = row[1] * scale_y;
        let w = row[2] * scale_x;
        let h = row[3] * scale_y;

        boxes.push(Candidate {
            class_id,
            confidence: prob,
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
        });
    }

    Ok(boxes)
}

pub struct OrtModelService {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    input_size: u32,
    iou_threshold: f32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            input_size: model_config.input_size,
            iou_threshold: model_config.iou_threshold,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index].lock();

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::Input(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Output(format!("failed to extract tensor: {}", e)))?;

        let array = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| InferenceError::Output(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}

impl ModelService for OrtModelService {
    fn predict(
        &self,
        image: &RgbImage,
        min_confidence: f32,
    ) -> Result<Vec<Candidate>, InferenceError> {
        let (img_width, img_height) = image.dimensions();
        let input = transform_image(image, self.input_size);

        let output = self.run_inference(&input)?;
        let boxes = decode_output(
            &output,
            self.input_size,
            img_width,
            img_height,
            min_confidence,
        )?;

        Ok(non_max_suppression(boxes, self.iou_threshold))
    }
}
