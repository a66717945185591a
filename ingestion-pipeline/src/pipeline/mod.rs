mod cache;
mod config;
mod context;
mod metrics;
mod services;
mod stages;
mod state;

pub use cache::{InMemoryResultCache, ResultCache};
pub use config::{IngestionConfig, IngestionTuning};
pub use metrics::{MetricSample, MetricsCollector, MetricsSnapshot};
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    future,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    types::{
        document::{declared_extension, sanitize_file_name},
        extraction_result::ExtractionResult,
    },
    utils::{config::AppConfig, ingest_limits::SecurityGate},
};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{extract, identify, normalize_text, store, validate},
    state::ready,
};

/// Outcome of driving one document through the stages.
enum Completion {
    Extracted(Arc<ExtractionResult>),
    CacheHit(Arc<ExtractionResult>),
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    gate: SecurityGate,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
    cache: Arc<dyn ResultCache>,
    metrics: Arc<MetricsCollector>,
}

impl IngestionPipeline {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_services(
            SecurityGate::from_config(config),
            IngestionConfig::from_app_config(config),
            Arc::new(DefaultPipelineServices::from_config(config)),
            Arc::new(InMemoryResultCache::from_config(config)),
            Arc::new(MetricsCollector::new()),
        )
    }

    pub fn with_services(
        gate: SecurityGate,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
        cache: Arc<dyn ResultCache>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            gate,
            pipeline_config,
            services,
            cache,
            metrics,
        }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Validates, identifies and extracts one document, serving repeats of the same bytes
    /// from the result cache.
    pub async fn ingest<R>(
        &self,
        reader: R,
        original_filename: &str,
        declared_size: u64,
    ) -> Result<Arc<ExtractionResult>, AppError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ingest_with_cancel(
            reader,
            original_filename,
            declared_size,
            CancellationToken::new(),
        )
        .await
    }

    /// Like [`Self::ingest`], abandoning the attempt when `cancel` fires or the configured
    /// deadline passes. An abandoned attempt caches nothing and counts as failed.
    #[tracing::instrument(
        skip_all,
        fields(file_name = %sanitize_file_name(original_filename), declared_size = declared_size)
    )]
    pub async fn ingest_with_cancel<R>(
        &self,
        reader: R,
        original_filename: &str,
        declared_size: u64,
        cancel: CancellationToken,
    ) -> Result<Arc<ExtractionResult>, AppError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let started = Instant::now();
        let mut ctx = PipelineContext::new(
            original_filename,
            declared_size,
            &self.gate,
            &self.pipeline_config,
            self.services.as_ref(),
            self.cache.as_ref(),
        );

        let outcome = {
            let drive = Self::drive_pipeline(&mut ctx, reader);
            tokio::pin!(drive);
            let deadline = deadline(self.pipeline_config.extraction_timeout);
            tokio::pin!(deadline);

            tokio::select! {
                biased;
                outcome = &mut drive => outcome,
                () = cancel.cancelled() => Err(AppError::Cancelled),
                timeout = &mut deadline => Err(AppError::DeadlineExceeded(timeout)),
            }
        };

        let outcome = outcome.map_err(|err| match err {
            AppError::Cancelled | AppError::DeadlineExceeded(_) => ctx.abort(err),
            // Stage errors were already reported by `drive_pipeline`.
            other => other,
        });

        let duration = started.elapsed();
        self.metrics.record(&MetricSample {
            file_type: declared_extension(original_filename).unwrap_or_else(|| "unknown".into()),
            size_bytes: ctx.observed_size().unwrap_or(declared_size),
            duration,
            succeeded: outcome.is_ok(),
            cache_hit: matches!(outcome, Ok(Completion::CacheHit(_))),
        });

        let total_ms = duration_millis(duration);
        match outcome {
            Ok(Completion::CacheHit(result)) => {
                info!(
                    attempt_id = %ctx.attempt_id,
                    content_hash = %result.content_hash,
                    total_ms,
                    "served from result cache"
                );
                Ok(result)
            }
            Ok(Completion::Extracted(result)) => {
                info!(
                    attempt_id = %ctx.attempt_id,
                    content_hash = %result.content_hash,
                    format = %result.source_format,
                    pages_requiring_fallback = result.pages_requiring_fallback,
                    total_ms,
                    "ingestion finished"
                );
                Ok(result)
            }
            Err(err) => Err(err),
        }
    }

    /// Ingests a file from disk, using its metadata length as the declared size.
    pub async fn ingest_path(&self, path: &Path) -> Result<Arc<ExtractionResult>, AppError> {
        let file = tokio::fs::File::open(path).await?;
        let declared_size = file.metadata().await?.len();
        let original_filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.ingest(file, &original_filename, declared_size).await
    }

    async fn drive_pipeline<R>(
        ctx: &mut PipelineContext<'_>,
        reader: R,
    ) -> Result<Completion, AppError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let machine = ready();

        let stage_start = Instant::now();
        let machine = identify(machine, ctx, reader)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = validate(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let identify_ms = duration_millis(stage_start.elapsed());

        let content_hash = ctx.document().map(|doc| doc.content_hash.clone());
        let content_hash = content_hash.map_err(|err| ctx.abort(err))?;
        match ctx.cache.get(&content_hash).await {
            Ok(Some(hit)) => return Ok(Completion::CacheHit(hit)),
            Ok(None) => {}
            Err(err) => warn!(
                attempt_id = %ctx.attempt_id,
                error = %err,
                "result cache unavailable; extracting anyway"
            ),
        }

        let stage_start = Instant::now();
        let machine = extract(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let extract_ms = duration_millis(stage_start.elapsed());

        let stage_start = Instant::now();
        let machine = normalize_text(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let _machine = store(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let finish_ms = duration_millis(stage_start.elapsed());

        debug!(
            attempt_id = %ctx.attempt_id,
            identify_ms,
            extract_ms,
            finish_ms,
            "ingestion stage timings"
        );

        ctx.stored
            .take()
            .map(Completion::Extracted)
            .ok_or_else(|| AppError::InternalError("stored result expected to be available".into()))
    }
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(timeout) => {
            tokio::time::sleep(timeout).await;
            timeout
        }
        None => future::pending().await,
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
