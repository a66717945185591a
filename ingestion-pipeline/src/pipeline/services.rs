use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError, types::source_format::SourceFormat, utils::config::AppConfig,
};

use crate::utils::{
    file_text_extraction::{extract_text, RawExtraction},
    optical_fallback::{page_fallback_from_config, PageFallback},
};

/// Expensive collaborators of the pipeline, behind a seam so tests can count and script them.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn extract_text(
        &self,
        format: SourceFormat,
        bytes: Bytes,
    ) -> Result<RawExtraction, AppError>;
}

pub struct DefaultPipelineServices {
    fallback: Arc<dyn PageFallback>,
    legacy_doc_converter: String,
}

impl DefaultPipelineServices {
    pub fn new(fallback: Arc<dyn PageFallback>, legacy_doc_converter: &str) -> Self {
        Self {
            fallback,
            legacy_doc_converter: legacy_doc_converter.to_string(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            page_fallback_from_config(config),
            &config.legacy_doc_converter,
        )
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn extract_text(
        &self,
        format: SourceFormat,
        bytes: Bytes,
    ) -> Result<RawExtraction, AppError> {
        extract_text(
            format,
            bytes,
            self.fallback.as_ref(),
            &self.legacy_doc_converter,
        )
        .await
    }
}
