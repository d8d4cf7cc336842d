use std::{path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("captured frame is empty")]
    Empty,

    #[error("captured frame could not be decoded: {0}")]
    Decode(#[from] image::ImageError),

    #[error("frame decode worker failed: {0}")]
    Worker(String),

    #[error("{0}")]
    Other(String),
}

/// One still image handed from an [`ImageSource`] to a classifier.
#[derive(Debug, Clone)]
pub struct Frame {
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Encoded image bytes as produced by the source (PNG, JPEG, ...).
    pub bytes: Arc<Vec<u8>>,
}

impl Frame {
    /// Validates `bytes` as an image on a blocking worker and records its size.
    pub async fn decode(bytes: Vec<u8>, captured_at: DateTime<Utc>) -> Result<Self, CaptureError> {
        if bytes.is_empty() {
            return Err(CaptureError::Empty);
        }

        let bytes = Arc::new(bytes);
        let (width, height) = tokio::task::spawn_blocking({
            let bytes = Arc::clone(&bytes);
            move || image::load_from_memory(&bytes).map(|img| (img.width(), img.height()))
        })
        .await
        .map_err(|err| CaptureError::Worker(err.to_string()))??;

        Ok(Self {
            captured_at,
            width,
            height,
            bytes,
        })
    }
}

/// Produces one frame on demand.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn capture(&self) -> Result<Frame, CaptureError>;
}

/// Runs a shell command whose stdout is one encoded image,
/// e.g. `fswebcam --no-banner -`.
pub struct CommandImageSource {
    command: String,
}

impl CommandImageSource {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl ImageSource for CommandImageSource {
    async fn capture(&self) -> Result<Frame, CaptureError> {
        let captured_at = Utc::now();
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CaptureError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Frame::decode(output.stdout, captured_at).await
    }
}

/// Reads a snapshot file kept fresh by an external camera process.
pub struct FileImageSource {
    path: PathBuf,
}

impl FileImageSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ImageSource for FileImageSource {
    async fn capture(&self) -> Result<Frame, CaptureError> {
        let captured_at = Utc::now();
        let bytes = tokio::fs::read(&self.path).await?;
        Frame::decode(bytes, captured_at).await
    }
}
