use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ColorLabel {
    pub label: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Class vocabulary of the detection model. The position of a label is the
/// class index emitted by the model.
#[derive(Debug, Default)]
pub struct LabelVocabulary {
    class_labels: Vec<ColorLabel>,
}

impl LabelVocabulary {
    pub fn new(class_labels: Vec<ColorLabel>) -> Self {
        Self { class_labels }
    }

    pub fn from_config(labels_cfg: &LabelsConfig) -> Result<Self, String> {
        match load_labels(&labels_cfg.get_path()) {
            Ok(labels) => Ok(Self::new(labels)),
            Err(e) => Err(format!("Failed to load labels: {}", e)),
        }
    }

    pub fn get(&self, class_id: usize) -> Option<&ColorLabel> {
        self.class_labels.get(class_id)
    }

    pub fn len(&self) -> usize {
        self.class_labels.len()
    }
}

/// Reads one `label,red,green,blue` entry per line. Blank lines are skipped.
pub fn load_labels(filepath: &Path) -> io::Result<Vec<ColorLabel>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut color_labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();

        if parts.len() == 4 {
            let label = parts[0].trim().to_string();
            let red: u8 = parts[1]
                .trim()
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid red value"))?;
            let green: u8 = parts[2]
                .trim()
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid green value"))?;
            let blue: u8 = parts[3]
                .trim()
                .parse()
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid blue value"))?;

            color_labels.push(ColorLabel {
                label,
                red,
                green,
                blue,
            });
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid line format: {}", line),
            ));
        }
    }

    Ok(color_labels)
}
