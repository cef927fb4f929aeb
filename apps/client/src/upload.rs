//! File payloads, progress reporting and caller-side upload checks.
//!
//! `FetchClient::upload` never validates size or type. `check_upload` exists
//! for callers that want to enforce their own limits before uploading.

use std::path::Path;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

const SUPPORTED_RESUME_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt"];

/// An in-memory file ready to be sent as a multipart part.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl FileBlob {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let name = name.into();
        Self {
            content_type: mime_for(&name).to_string(),
            name,
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

fn mime_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Observer for upload progress, fed fractions in `0.0..=1.0`.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, fraction: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn on_progress(&self, fraction: f64) {
        self(fraction)
    }
}

/// Forwards progress events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<f64>,
}

impl ProgressSink for ChannelProgress {
    fn on_progress(&self, fraction: f64) {
        // Receiver gone means nobody is watching anymore.
        let _ = self.tx.send(fraction);
    }
}

pub fn progress_channel() -> (ChannelProgress, mpsc::UnboundedReceiver<f64>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelProgress { tx }, rx)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadRejection {
    #[error("File is empty")]
    Empty,

    #[error("File is {size}, the limit is {limit}")]
    TooLarge { size: String, limit: String },

    #[error("Unsupported file type '{0}'; expected PDF, DOC, DOCX or TXT")]
    UnsupportedType(String),
}

pub fn is_supported_resume(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| SUPPORTED_RESUME_EXTENSIONS.contains(&ext.as_str()))
}

/// Caller-side gate for resume uploads.
pub fn check_upload(file: &FileBlob, max_bytes: u64) -> Result<(), UploadRejection> {
    if file.is_empty() {
        return Err(UploadRejection::Empty);
    }
    if !is_supported_resume(&file.name) {
        return Err(UploadRejection::UnsupportedType(
            file.extension().unwrap_or_default(),
        ));
    }
    let size = file.len() as u64;
    if size > max_bytes {
        return Err(UploadRejection::TooLarge {
            size: format_file_size(size),
            limit: format_file_size(max_bytes),
        });
    }
    Ok(())
}

/// `0 B`, `512 B`, `1.50 KB`, `2.00 MB`, ...
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(1023), "1023 B");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_supported_resume_types() {
        assert!(is_supported_resume("cv.pdf"));
        assert!(is_supported_resume("CV.DOCX"));
        assert!(is_supported_resume("notes.txt"));
        assert!(!is_supported_resume("photo.png"));
        assert!(!is_supported_resume("no_extension"));
    }

    #[test]
    fn test_blob_infers_content_type() {
        assert_eq!(FileBlob::new("cv.pdf", vec![1u8]).content_type, "application/pdf");
        assert_eq!(
            FileBlob::new("blob.bin", vec![1u8]).content_type,
            "application/octet-stream"
        );
    }

    #[test]
    fn test_check_upload_rejections() {
        let ok = FileBlob::new("cv.pdf", vec![0u8; 10]);
        assert_eq!(check_upload(&ok, 10), Ok(()));

        let big = FileBlob::new("cv.pdf", vec![0u8; 2048]);
        assert_eq!(
            check_upload(&big, 1024),
            Err(UploadRejection::TooLarge {
                size: "2.00 KB".to_string(),
                limit: "1.00 KB".to_string(),
            })
        );

        let empty = FileBlob::new("cv.pdf", Vec::<u8>::new());
        assert_eq!(check_upload(&empty, 1024), Err(UploadRejection::Empty));

        let image = FileBlob::new("me.png", vec![0u8; 4]);
        assert_eq!(
            check_upload(&image, 1024),
            Err(UploadRejection::UnsupportedType("png".to_string()))
        );
    }

    #[tokio::test]
    async fn test_blob_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.txt");
        std::fs::write(&path, "Jane Doe\nRust engineer").unwrap();

        let blob = FileBlob::from_path(&path).await.unwrap();
        assert_eq!(blob.name, "resume.txt");
        assert_eq!(blob.content_type, "text/plain");
        assert_eq!(blob.len(), 22);
    }

    #[test]
    fn test_closure_and_channel_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = {
            let seen = seen.clone();
            move |f: f64| seen.lock().unwrap().push(f)
        };
        recorder.on_progress(0.5);
        assert_eq!(*seen.lock().unwrap(), vec![0.5]);

        let (sink, mut rx) = progress_channel();
        sink.on_progress(0.25);
        sink.on_progress(1.0);
        assert_eq!(rx.try_recv().unwrap(), 0.25);
        assert_eq!(rx.try_recv().unwrap(), 1.0);
    }
}
