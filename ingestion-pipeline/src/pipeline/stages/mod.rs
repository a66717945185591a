use std::sync::Arc;

use common::{
    error::AppError,
    types::{
        document::Document,
        extraction_result::ExtractionResult,
        source_format::SourceFormat,
        validation::RejectionReason,
    },
    utils::{content_identity::read_and_hash, type_detection::detect_mime_type},
};
use state_machines::core::GuardError;
use tokio::io::AsyncRead;
use tracing::{debug, info, instrument, warn};

use super::{
    context::PipelineContext,
    state::{Extracted, Identified, IngestionMachine, Normalized, Ready, Stored, Validated},
};
use crate::utils::text_normalization::normalize;

const PREVIEW_CHARS: usize = 120;

/// Metadata pre-check, then a size-bounded read that hashes and sniffs the body.
#[instrument(
    level = "trace",
    skip_all,
    fields(attempt_id = %ctx.attempt_id, file_name = %ctx.file_name)
)]
pub async fn identify<R>(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
    reader: R,
) -> Result<IngestionMachine<(), Identified>, AppError>
where
    R: AsyncRead + Unpin + Send,
{
    ctx.gate
        .check_declared(ctx.original_filename, ctx.declared_size)
        .into_result()?;

    let max = ctx.gate.max_file_size_bytes();
    let hashed = read_and_hash(reader, max, ctx.pipeline_config.tuning.hash_chunk_bytes).await?;
    if hashed.exceeded_limit {
        return Err(RejectionReason::TooLarge {
            size: hashed.byte_count(),
            max,
        }
        .into());
    }

    let byte_size = hashed.byte_count();
    if byte_size != ctx.declared_size {
        debug!(
            attempt_id = %ctx.attempt_id,
            declared_size = ctx.declared_size,
            byte_size,
            "declared size differs from bytes read"
        );
    }

    let document = Document::new(
        ctx.original_filename,
        byte_size,
        hashed.content_hash,
        detect_mime_type(&hashed.bytes),
    );
    info!(
        attempt_id = %ctx.attempt_id,
        file_name = %ctx.file_name,
        content_hash = %document.content_hash,
        mime_type = %document.mime_type,
        byte_size,
        "document identified"
    );

    ctx.document = Some(document);
    ctx.bytes = Some(hashed.bytes);

    machine
        .identify()
        .map_err(|(_, guard)| map_guard_error("identify", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(attempt_id = %ctx.attempt_id, file_name = %ctx.file_name)
)]
pub async fn validate(
    machine: IngestionMachine<(), Identified>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Validated>, AppError> {
    let document = ctx.document()?;
    ctx.gate
        .validate(document, ctx.declared_size)
        .into_result()?;

    // Accepted extensions without an extractor (a configured `md`, say) still need a
    // supported payload.
    let format = SourceFormat::from_mime(&document.mime_type).ok_or_else(|| {
        AppError::from(RejectionReason::MimeMismatch {
            extension: document.declared_extension.clone().unwrap_or_default(),
            detected: document.mime_type.clone(),
        })
    })?;

    debug!(attempt_id = %ctx.attempt_id, %format, "document accepted");
    ctx.format = Some(format);

    machine
        .validate()
        .map_err(|(_, guard)| map_guard_error("validate", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(attempt_id = %ctx.attempt_id, file_name = %ctx.file_name)
)]
pub async fn extract(
    machine: IngestionMachine<(), Validated>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Extracted>, AppError> {
    let format = ctx.format()?;
    let bytes = ctx.take_bytes()?;
    let raw = ctx.services.extract_text(format, bytes).await?;

    if raw.pages_requiring_fallback > 0 {
        warn!(
            attempt_id = %ctx.attempt_id,
            pages_requiring_fallback = raw.pages_requiring_fallback,
            pages_degraded = raw.pages_degraded,
            "extraction used optical fallback"
        );
    }
    debug!(
        attempt_id = %ctx.attempt_id,
        %format,
        raw_chars = raw.text.chars().count(),
        "raw text extracted"
    );

    ctx.raw = Some(raw);

    machine
        .extract()
        .map_err(|(_, guard)| map_guard_error("extract", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(attempt_id = %ctx.attempt_id, file_name = %ctx.file_name)
)]
pub async fn normalize_text(
    machine: IngestionMachine<(), Extracted>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Normalized>, AppError> {
    let raw = ctx.take_raw()?;
    let format = ctx.format()?;
    let text = normalize(&raw.text)?;

    let preview: String = text.chars().take(PREVIEW_CHARS).collect();
    debug!(
        attempt_id = %ctx.attempt_id,
        text_chars = text.chars().count(),
        preview = %preview,
        "normalized text preview"
    );

    let content_hash = ctx.document()?.content_hash.clone();
    ctx.result = Some(ExtractionResult::new(
        content_hash,
        text,
        format,
        raw.pages_requiring_fallback,
        raw.pages_degraded,
    ));

    machine
        .normalize()
        .map_err(|(_, guard)| map_guard_error("normalize", &guard))
}

/// Hands the result to the cache. A cache failure is logged and never fails the attempt.
#[instrument(
    level = "trace",
    skip_all,
    fields(attempt_id = %ctx.attempt_id, file_name = %ctx.file_name)
)]
pub async fn store(
    machine: IngestionMachine<(), Normalized>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Stored>, AppError> {
    let result = Arc::new(ctx.take_result()?);

    if let Err(err) = ctx.cache.put(&result.content_hash, Arc::clone(&result)).await {
        warn!(
            attempt_id = %ctx.attempt_id,
            content_hash = %result.content_hash,
            error = %err,
            "result cache unavailable; result not cached"
        );
    }

    ctx.stored = Some(result);

    machine
        .store()
        .map_err(|(_, guard)| map_guard_error("store", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
