use std::sync::Arc;

use bytes::Bytes;
use common::{
    error::AppError,
    types::{
        document::{sanitize_file_name, Document},
        extraction_result::ExtractionResult,
        source_format::SourceFormat,
    },
    utils::ingest_limits::SecurityGate,
};
use tracing::{error, warn};
use uuid::Uuid;

use super::{cache::ResultCache, config::IngestionConfig, services::PipelineServices};
use crate::utils::file_text_extraction::RawExtraction;

pub struct PipelineContext<'a> {
    pub attempt_id: Uuid,
    /// Sanitized, safe for logs.
    pub file_name: String,
    pub original_filename: &'a str,
    pub declared_size: u64,
    pub gate: &'a SecurityGate,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub cache: &'a dyn ResultCache,
    pub document: Option<Document>,
    pub bytes: Option<Bytes>,
    pub format: Option<SourceFormat>,
    pub raw: Option<RawExtraction>,
    pub result: Option<ExtractionResult>,
    pub stored: Option<Arc<ExtractionResult>>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        original_filename: &'a str,
        declared_size: u64,
        gate: &'a SecurityGate,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
        cache: &'a dyn ResultCache,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            file_name: sanitize_file_name(original_filename),
            original_filename,
            declared_size,
            gate,
            pipeline_config,
            services,
            cache,
            document: None,
            bytes: None,
            format: None,
            raw: None,
            result: None,
            stored: None,
        }
    }

    pub fn document(&self) -> Result<&Document, AppError> {
        self.document
            .as_ref()
            .ok_or_else(|| AppError::InternalError("document expected to be identified".into()))
    }

    pub fn format(&self) -> Result<SourceFormat, AppError> {
        self.format
            .ok_or_else(|| AppError::InternalError("source format expected to be known".into()))
    }

    pub fn take_bytes(&mut self) -> Result<Bytes, AppError> {
        self.bytes.take().ok_or_else(|| {
            AppError::InternalError("document bytes expected to be available".into())
        })
    }

    pub fn take_raw(&mut self) -> Result<RawExtraction, AppError> {
        self.raw.take().ok_or_else(|| {
            AppError::InternalError("raw extraction expected to be available".into())
        })
    }

    pub fn take_result(&mut self) -> Result<ExtractionResult, AppError> {
        self.result.take().ok_or_else(|| {
            AppError::InternalError("extraction result expected to be available".into())
        })
    }

    /// Byte count actually read, when the body got that far.
    pub fn observed_size(&self) -> Option<u64> {
        self.document.as_ref().map(|doc| doc.byte_size)
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        if matches!(err, AppError::ValidationFailed(_)) {
            warn!(
                attempt_id = %self.attempt_id,
                file_name = %self.file_name,
                error = %err,
                "document rejected"
            );
        } else {
            error!(
                attempt_id = %self.attempt_id,
                file_name = %self.file_name,
                error = %err,
                "ingestion pipeline aborted"
            );
        }
        err
    }
}
