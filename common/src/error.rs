use std::{fmt, time::Duration};

use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

use crate::types::{source_format::SourceFormat, validation::RejectionReason};

/// Stage of a format extractor at which a document-level failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    Decode,
    Parse,
    TextLayer,
    Render,
    Recognize,
    Convert,
}

impl ExtractionStage {
    pub fn label(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Parse => "parse",
            Self::TextLayer => "text_layer",
            Self::Render => "render",
            Self::Recognize => "recognize",
            Self::Convert => "convert",
        }
    }
}

impl fmt::Display for ExtractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] RejectionReason),
    #[error("Extraction failed for {format} during {stage}: {cause}")]
    ExtractionFailed {
        format: SourceFormat,
        stage: ExtractionStage,
        cause: String,
    },
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
    #[error("Ingestion cancelled by caller")]
    Cancelled,
    #[error("Ingestion exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn extraction(
        format: SourceFormat,
        stage: ExtractionStage,
        cause: impl fmt::Display,
    ) -> Self {
        Self::ExtractionFailed {
            format,
            stage,
            cause: cause.to_string(),
        }
    }

    /// Validation and extraction failures depend only on the input bytes, so repeating
    /// them cannot succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ValidationFailed(_) | Self::ExtractionFailed { .. }
        )
    }
}
