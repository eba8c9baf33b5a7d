use crate::{config::FeedbackConfig, image_codec::guess_extension};
use chrono::{DateTime, Local, SecondsFormat};
use std::{
    borrow::Cow,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};

pub const LOG_HEADER: [&str; 5] = [
    "timestamp",
    "image_filename",
    "incorrect_label",
    "correct_label",
    "comments",
];

#[derive(Error, Debug)]
#[error("missing required feedback field `{0}`")]
pub struct MissingFieldError(pub &'static str);

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write image {path:?}: {source}")]
    WriteImage {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to append to feedback log {path:?}: {source}")]
    AppendLog {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Raw feedback form as received; any field may be absent.
#[derive(Debug, Default)]
pub struct FeedbackSubmission {
    pub image: Option<Vec<u8>>,
    pub incorrect_label: Option<String>,
    pub correct_label: Option<String>,
    pub comments: Option<String>,
}

/// A submission that passed validation.
#[derive(Debug)]
pub struct ValidFeedback {
    pub image: Vec<u8>,
    pub incorrect_label: String,
    pub correct_label: String,
    pub comments: String,
}

impl FeedbackSubmission {
    pub fn validate(self) -> Result<ValidFeedback, MissingFieldError> {
        let image = self
            .image
            .filter(|image| !image.is_empty())
            .ok_or(MissingFieldError("image"))?;
        let incorrect_label =
            non_empty(self.incorrect_label).ok_or(MissingFieldError("incorrectLabel"))?;
        let correct_label =
            non_empty(self.correct_label).ok_or(MissingFieldError("correctLabel"))?;

        Ok(ValidFeedback {
            image,
            incorrect_label,
            correct_label,
            comments: self.comments.unwrap_or_default(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackEntry {
    pub timestamp: String,
    pub image_filename: String,
    pub incorrect_label: String,
    pub correct_label: String,
    pub comments: String,
}

impl FeedbackEntry {
    fn to_row(&self) -> String {
        csv_line([
            self.timestamp.as_str(),
            self.image_filename.as_str(),
            self.incorrect_label.as_str(),
            self.correct_label.as_str(),
            self.comments.as_str(),
        ])
    }
}

/// Line breaks become single spaces so a row always occupies one physical
/// line; commas and quotes are quoted with `"` doubled.
fn escape_field(field: &str) -> Cow<'_, str> {
    let field = if field.contains(['\n', '\r']) {
        Cow::Owned(
            field
                .split(['\n', '\r'])
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        )
    } else {
        Cow::Borrowed(field)
    };

    if field.contains([',', '"']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        field
    }
}

fn csv_line<const N: usize>(fields: [&str; N]) -> String {
    let mut line = fields
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// `YYYYMMDD_HHMMSS_<8 hex chars>.<ext>`; sorts by submission time.
pub fn generate_filename(now: &DateTime<Local>, image: &[u8]) -> String {
    format!(
        "{}_{:08x}.{}",
        now.format("%Y%m%d_%H%M%S"),
        rand::random::<u32>(),
        guess_extension(image)
    )
}

/// Persists feedback images and appends entries to the feedback log.
///
/// Appends from this process go through a single writer lock. The log is
/// created with an exclusive create and the header goes out in the same write
/// as the first row, so within one process the header is written exactly once
/// and always first. Several processes sharing one log file get no such
/// guarantee: another process may append between the create and the header
/// write. Each row is written with one `write_all` on an append-mode handle.
pub struct FeedbackRecorder {
    image_dir: PathBuf,
    log_path: PathBuf,
    writer: Mutex<()>,
}

impl FeedbackRecorder {
    pub fn new(image_dir: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            log_path: log_path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn from_config(config: &FeedbackConfig) -> Self {
        Self::new(&config.image_dir, &config.log_file)
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub async fn record(&self, feedback: ValidFeedback) -> Result<FeedbackEntry, StorageError> {
        let now = Local::now();
        let image_filename = generate_filename(&now, &feedback.image);

        create_dir(&self.image_dir).await?;
        let image_path = self.image_dir.join(&image_filename);
        write_new_file(&image_path, &feedback.image)
            .await
            .map_err(|source| StorageError::WriteImage {
                path: image_path.clone(),
                source,
            })?;

        let entry = FeedbackEntry {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, false),
            image_filename,
            incorrect_label: feedback.incorrect_label,
            correct_label: feedback.correct_label,
            comments: feedback.comments,
        };

        self.append(&entry).await?;

        Ok(entry)
    }

    async fn append(&self, entry: &FeedbackEntry) -> Result<(), StorageError> {
        if let Some(parent) = self.log_path.parent() {
            create_dir(parent).await?;
        }

        let map_err = |source| StorageError::AppendLog {
            path: self.log_path.clone(),
            source,
        };

        let _guard = self.writer.lock().await;
        let row = entry.to_row();

        let created = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.log_path)
            .await;

        let (mut file, data) = match created {
            Ok(file) => {
                tracing::info!("Created feedback log {:?}", self.log_path);
                (file, csv_line(LOG_HEADER) + &row)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let file = OpenOptions::new()
                    .append(true)
                    .open(&self.log_path)
                    .await
                    .map_err(map_err)?;
                (file, row)
            }
            Err(e) => return Err(map_err(e)),
        };

        file.write_all(data.as_bytes()).await.map_err(map_err)?;
        file.flush().await.map_err(map_err)?;

        Ok(())
    }
}

async fn create_dir(path: &Path) -> Result<(), StorageError> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(path)
        .await
        .map_err(|source| StorageError::CreateDir {
            path: path.to_path_buf(),
            source,
        })
}

async fn write_new_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc};
    use tempfile::tempdir;

    fn submission(comments: Option<&str>) -> FeedbackSubmission {
        FeedbackSubmission {
            image: Some(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]),
            incorrect_label: Some("cat".to_string()),
            correct_label: Some("dog".to_string()),
            comments: comments.map(str::to_string),
        }
    }

    #[test]
    fn test_validate_requires_fields() {
        assert!(submission(None).validate().is_ok());

        let mut missing_image = submission(None);
        missing_image.image = None;
        assert_eq!(missing_image.validate().unwrap_err().0, "image");

        let mut empty_image = submission(None);
        empty_image.image = Some(Vec::new());
        assert_eq!(empty_image.validate().unwrap_err().0, "image");

        let mut missing_incorrect = submission(None);
        missing_incorrect.incorrect_label = None;
        assert_eq!(missing_incorrect.validate().unwrap_err().0, "incorrectLabel");

        let mut empty_correct = submission(None);
        empty_correct.correct_label = Some(String::new());
        assert_eq!(empty_correct.validate().unwrap_err().0, "correctLabel");

        let mut empty_incorrect = submission(None);
        empty_incorrect.incorrect_label = Some(String::new());
        assert_eq!(empty_incorrect.validate().unwrap_err().0, "incorrectLabel");
    }

    #[test]
    fn test_validate_accepts_whitespace_labels() {
        let mut whitespace = submission(None);
        whitespace.incorrect_label = Some(" ".to_string());
        whitespace.correct_label = Some("  ".to_string());

        let valid = whitespace.validate().unwrap();
        assert_eq!(valid.incorrect_label, " ");
        assert_eq!(valid.correct_label, "  ");
    }

    #[test]
    fn test_validate_defaults_comments() {
        let valid = submission(None).validate().unwrap();
        assert_eq!(valid.comments, "");
    }

    #[test]
    fn test_escape_field() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("a,b"), "\"a,b\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "two lines");
        assert_eq!(escape_field("a\r\nb, c"), "\"a b, c\"");
    }

    #[test]
    fn test_generate_filename() {
        let now = Local::now();
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0];

        let names: HashSet<String> = (0..1000).map(|_| generate_filename(&now, &jpeg)).collect();

        assert_eq!(names.len(), 1000);
        let prefix = now.format("%Y%m%d_%H%M%S").to_string();
        assert!(names
            .iter()
            .all(|name| name.starts_with(&prefix) && name.ends_with(".jpg")));
    }

    #[tokio::test]
    async fn test_record_writes_image_and_log() {
        let tmp = tempdir().unwrap();
        let recorder = FeedbackRecorder::new(
            tmp.path().join("images"),
            tmp.path().join("logs/feedback_log.csv"),
        );

        let entry = recorder
            .record(submission(Some("wrong, clearly")).validate().unwrap())
            .await
            .unwrap();

        let image_path = recorder.image_dir().join(&entry.image_filename);
        assert_eq!(
            std::fs::read(image_path).unwrap(),
            vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3]
        );

        let log = std::fs::read_to_string(recorder.log_path()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(
            lines[0],
            "timestamp,image_filename,incorrect_label,correct_label,comments"
        );
        assert_eq!(
            lines[1],
            format!(
                "{},{},cat,dog,\"wrong, clearly\"",
                entry.timestamp, entry.image_filename
            )
        );
    }

    #[tokio::test]
    async fn test_record_empty_comments_keeps_column() {
        let tmp = tempdir().unwrap();
        let recorder = FeedbackRecorder::new(tmp.path().join("images"), tmp.path().join("log.csv"));

        let entry = recorder
            .record(submission(Some("")).validate().unwrap())
            .await
            .unwrap();

        assert_eq!(entry.comments, "");
        let log = std::fs::read_to_string(recorder.log_path()).unwrap();
        let row = log.lines().nth(1).unwrap();
        assert_eq!(row.split(',').count(), 5);
        assert!(row.ends_with("cat,dog,"));
    }

    #[tokio::test]
    async fn test_record_multiline_comment_stays_on_one_line() {
        let tmp = tempdir().unwrap();
        let recorder = FeedbackRecorder::new(tmp.path().join("images"), tmp.path().join("log.csv"));

        for comments in ["first line\nsecond line", "windows\r\nbreak"] {
            recorder
                .record(submission(Some(comments)).validate().unwrap())
                .await
                .unwrap();
        }

        let log = std::fs::read_to_string(recorder.log_path()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(",cat,dog,first line second line"));
        assert!(lines[2].ends_with(",cat,dog,windows break"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records() {
        let tmp = tempdir().unwrap();
        let recorder = Arc::new(FeedbackRecorder::new(
            tmp.path().join("images"),
            tmp.path().join("log.csv"),
        ));
        let n = 50;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let recorder = recorder.clone();
                tokio::spawn(async move {
                    let mut feedback = submission(Some(&format!("note {}", i)));
                    feedback.correct_label = Some(format!("label_{}", i));
                    recorder.record(feedback.validate().unwrap()).await
                })
            })
            .collect();

        let mut filenames = HashSet::new();
        for handle in handles {
            let entry = handle.await.unwrap().unwrap();
            filenames.insert(entry.image_filename);
        }
        assert_eq!(filenames.len(), n);

        let log = std::fs::read_to_string(recorder.log_path()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), n + 1);
        assert_eq!(lines[0], csv_line(LOG_HEADER).trim_end());
        assert_eq!(lines.iter().filter(|l| l.starts_with("timestamp")).count(), 1);
        for line in &lines[1..] {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 5);
            assert!(fields[4].starts_with("note "));
            assert!(filenames.contains(fields[1]));
        }

        let images = std::fs::read_dir(recorder.image_dir()).unwrap().count();
        assert_eq!(images, n);
    }
}
