use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("media load failed: {0}")]
    MediaLoadFailed(String),
    #[error("storage error: {0}")]
    Persistence(String),
}

impl AppError {
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::FileNotFound(_) => {
                "Check that the file path is correct, or add the file to the library again."
            }
            Self::UnsupportedFormat(_) => "Use one of the supported formats: MKV, MPG.",
            Self::MediaLoadFailed(_) => "The file may be damaged; try loading it again.",
            Self::Persistence(_) => "Try restarting the application.",
        }
    }
}

/// Receives user-facing failures together with a short description of the action.
pub trait ErrorReporter {
    fn report(&self, error: &AppError, context: &str);
}

pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, err: &AppError, context: &str) {
        error!(context, "{err}");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub context: String,
    pub message: String,
    pub suggestion: String,
}

/// Keeps the latest report around so a front-end can show it.
#[derive(Clone, Default)]
pub struct StatusReporter {
    latest: Arc<Mutex<Option<ReportedError>>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<ReportedError> {
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = None;
        }
    }
}

impl ErrorReporter for StatusReporter {
    fn report(&self, err: &AppError, context: &str) {
        LogReporter.report(err, context);
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(ReportedError {
                context: context.to_string(),
                message: err.to_string(),
                suggestion: err.recovery_suggestion().to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reporter_keeps_latest_message_and_suggestion() {
        let reporter = StatusReporter::new();
        reporter.report(&AppError::UnsupportedFormat(String::from("mp4")), "load");
        reporter.report(
            &AppError::FileNotFound(PathBuf::from("/ktv/missing.mkv")),
            "enqueue",
        );

        let latest = reporter.latest().expect("latest report");
        assert_eq!(latest.context, "enqueue");
        assert_eq!(latest.message, "file not found: /ktv/missing.mkv");
        assert!(latest.suggestion.contains("file path"));

        reporter.clear();
        assert_eq!(reporter.latest(), None);
    }
}
