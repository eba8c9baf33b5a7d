use crate::detection::DetectionRecord;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use std::path::Path;
use thiserror::Error;

const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: i32 = 22;
// rough average glyph advance relative to the font size
const LABEL_CHAR_WIDTH_RATIO: f32 = 0.55;
const LABEL_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to read font file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid font data: {0}")]
    InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// A detection paired with the color it is drawn in.
pub struct Overlay<'a> {
    pub record: &'a DetectionRecord,
    pub color: Rgb<u8>,
}

/// Draws detections onto bitmaps. Label text needs a font; without one only
/// boxes and label tags are drawn.
#[derive(Default)]
pub struct Renderer {
    font: Option<FontVec>,
}

impl Renderer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    pub fn from_font_file(path: &Path) -> Result<Self, RenderError> {
        let data = std::fs::read(path)?;
        let font = FontVec::try_from_vec(data)?;
        Ok(Self::new(Some(font)))
    }

    /// Returns an annotated copy of `image`; the input is left untouched.
    pub fn render(&self, image: &RgbImage, overlays: &[Overlay<'_>]) -> RgbImage {
        let mut canvas = image.clone();
        for overlay in overlays {
            self.draw_overlay(&mut canvas, overlay);
        }
        canvas
    }

    fn draw_overlay(&self, canvas: &mut RgbImage, overlay: &Overlay<'_>) {
        let (w, h) = canvas.dimensions();
        let Some(rect) = pixel_rect(&overlay.record.bbox, w, h) else {
            return;
        };

        for thickness in 0..BOX_THICKNESS {
            let width = rect.width() as i32 - 2 * thickness;
            let height = rect.height() as i32 - 2 * thickness;
            if width <= 0 || height <= 0 {
                break;
            }
            let inner = Rect::at(rect.left() + thickness, rect.top() + thickness)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(canvas, inner, overlay.color);
        }

        let text = format!("{} {:.2}", overlay.record.label, overlay.record.confidence);
        let text_width =
            (text.chars().count() as f32 * LABEL_FONT_SIZE * LABEL_CHAR_WIDTH_RATIO) as i32;
        let label_x = rect.left();
        let label_y = (rect.top() - LABEL_TEXT_HEIGHT).max(0);
        let label_width = text_width.min(w as i32 - label_x).max(0) as u32;
        if label_width == 0 {
            return;
        }

        let tag = Rect::at(label_x, label_y).of_size(label_width, LABEL_TEXT_HEIGHT as u32);
        draw_filled_rect_mut(canvas, tag, overlay.color);

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                label_x + LABEL_TEXT_PADDING,
                label_y + LABEL_TEXT_PADDING,
                PxScale::from(LABEL_FONT_SIZE),
                font,
                &text,
            );
        }
    }
}

/// Maps a normalized `[x1, y1, x2, y2]` box onto pixel space, clamped to the
/// image. Degenerate boxes yield `None`.
fn pixel_rect(bbox: &[f32; 4], width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 {
        return None;
    }
    let (w, h) = (width as f32, height as f32);

    let x_min = ((bbox[0] * w).floor() as i32).clamp(0, width as i32 - 1);
    let y_min = ((bbox[1] * h).floor() as i32).clamp(0, height as i32 - 1);
    let x_max = ((bbox[2] * w).ceil() as i32).clamp(0, width as i32 - 1);
    let y_max = ((bbox[3] * h).ceil() as i32).clamp(0, height as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
        return None;
    }

    Some(Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32))
}
