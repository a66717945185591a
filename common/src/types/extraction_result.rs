use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::source_format::SourceFormat;

/// Normalized output of one successful extraction. Shared read-only once cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub content_hash: String,
    pub text: String,
    pub source_format: SourceFormat,
    /// Pages whose text layer was empty and went through optical recognition.
    pub pages_requiring_fallback: u32,
    /// Fallback pages whose recognition failed or still produced no text.
    pub pages_degraded: u32,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractionResult {
    pub fn new(
        content_hash: String,
        text: String,
        source_format: SourceFormat,
        pages_requiring_fallback: u32,
        pages_degraded: u32,
    ) -> Self {
        Self {
            content_hash,
            text,
            source_format,
            pages_requiring_fallback,
            pages_degraded,
            extracted_at: Utc::now(),
        }
    }

    pub fn used_fallback(&self) -> bool {
        self.pages_requiring_fallback > 0
    }
}
