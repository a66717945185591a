#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod pipeline;
pub mod utils;

use std::{path::PathBuf, sync::Arc};

use common::{error::AppError, types::extraction_result::ExtractionResult};
use futures::{stream, StreamExt};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
use tracing::{error, info};

/// Outcome of one path handed to [`ingest_paths`].
pub struct PathOutcome {
    pub path: PathBuf,
    pub result: Result<Arc<ExtractionResult>, AppError>,
}

/// Ingests every path through the shared pipeline, at most `concurrency` at a time.
/// Outcomes are returned in completion order.
pub async fn ingest_paths(
    ingestion_pipeline: Arc<IngestionPipeline>,
    paths: Vec<PathBuf>,
    concurrency: usize,
) -> Vec<PathOutcome> {
    let total = paths.len();
    info!(total, concurrency, "starting batch ingestion");

    let outcomes: Vec<PathOutcome> = stream::iter(paths)
        .map(|path| {
            let ingestion_pipeline = Arc::clone(&ingestion_pipeline);
            async move {
                let result = ingestion_pipeline.ingest_path(&path).await;
                if let Err(err) = &result {
                    error!(
                        path = %path.display(),
                        retryable = err.is_retryable(),
                        error = %err,
                        "document ingestion failed"
                    );
                }
                PathOutcome { path, result }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let failed = outcomes.iter().filter(|outcome| outcome.result.is_err()).count();
    info!(total, failed, "batch ingestion finished");
    outcomes
}
