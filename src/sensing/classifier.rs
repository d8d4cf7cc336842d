use std::{io::ErrorKind, process::Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};

use super::source::Frame;
use crate::models::Judgment;

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("classifier I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("classifier command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("classifier produced unrecognized output {0:?}")]
    UnrecognizedOutput(String),

    #[error("{0}")]
    Model(String),
}

/// Decides whether a frame shows the user engaged (holding a pen).
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, frame: &Frame) -> Result<Judgment, ClassificationError>;
}

/// Pipes the encoded frame to an external model command and reads its verdict
/// from the first non-empty line of stdout.
pub struct CommandClassifier {
    command: String,
}

impl CommandClassifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

pub fn parse_verdict(raw: &str) -> Result<Judgment, ClassificationError> {
    let verdict = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    match verdict.to_ascii_lowercase().as_str() {
        "1" | "true" | "engaged" | "holding_pen" => Ok(Judgment::Engaged),
        "0" | "false" | "not_engaged" | "no_pen" => Ok(Judgment::NotEngaged),
        _ => Err(ClassificationError::UnrecognizedOutput(verdict.to_string())),
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    async fn classify(&self, frame: &Frame) -> Result<Judgment, ClassificationError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // stdin is fed concurrently with draining stdout/stderr; a model may
        // fill its stderr pipe before it reads the frame.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&frame.bytes).await?;
                // Dropping stdin closes the pipe so the model sees EOF.
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if let Err(err) = fed {
            // A model may exit without reading the whole frame; its exit
            // status decides.
            if err.kind() != ErrorKind::BrokenPipe {
                return Err(err.into());
            }
        }
        if !output.status.success() {
            return Err(ClassificationError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_verdict(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn verdicts_are_parsed_leniently() {
        assert_eq!(parse_verdict("1\n").unwrap(), Judgment::Engaged);
        assert_eq!(parse_verdict("\n  Holding_Pen \n").unwrap(), Judgment::Engaged);
        assert_eq!(parse_verdict("false").unwrap(), Judgment::NotEngaged);
        assert_eq!(parse_verdict("no_pen\nextra").unwrap(), Judgment::NotEngaged);
        assert!(matches!(
            parse_verdict("maybe"),
            Err(ClassificationError::UnrecognizedOutput(_))
        ));
        assert!(parse_verdict("").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_classifier_reads_stdout() {
        let frame = Frame {
            captured_at: Utc::now(),
            width: 1,
            height: 1,
            bytes: Arc::new(vec![1, 2, 3]),
        };

        let engaged = CommandClassifier::new("cat > /dev/null; echo engaged");
        assert_eq!(engaged.classify(&frame).await.unwrap(), Judgment::Engaged);

        let broken = CommandClassifier::new("cat > /dev/null; exit 2");
        assert!(matches!(
            broken.classify(&frame).await,
            Err(ClassificationError::CommandFailed { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn chatty_model_does_not_block_on_a_large_frame() {
        let frame = Frame {
            captured_at: Utc::now(),
            width: 1,
            height: 1,
            bytes: Arc::new(vec![7; 512 * 1024]),
        };
        // Fills the stderr pipe before it starts reading the frame.
        let chatty =
            CommandClassifier::new("head -c 262144 /dev/zero >&2; cat > /dev/null; echo no_pen");

        let verdict = tokio::time::timeout(Duration::from_secs(20), chatty.classify(&frame))
            .await
            .expect("classifier deadlocked on its pipes")
            .unwrap();
        assert_eq!(verdict, Judgment::NotEngaged);
    }
}
