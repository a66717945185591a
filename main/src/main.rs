#![allow(clippy::missing_docs_in_private_items)]

use std::{path::PathBuf, sync::Arc};

use common::utils::config::get_config;
use ingestion_pipeline::{ingest_paths, IngestionPipeline, PathOutcome};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One line of output per document.
#[derive(Debug, Serialize)]
struct DocumentReport {
    path: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pages_requiring_fallback: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    used_fallback: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&PathOutcome> for DocumentReport {
    fn from(outcome: &PathOutcome) -> Self {
        let path = outcome.path.display().to_string();
        match &outcome.result {
            Ok(result) => Self {
                path,
                ok: true,
                content_hash: Some(result.content_hash.clone()),
                source_format: Some(result.source_format.to_string()),
                pages_requiring_fallback: Some(result.pages_requiring_fallback),
                used_fallback: Some(result.used_fallback()),
                text: Some(result.text.clone()),
                error: None,
            },
            Err(err) => Self {
                path,
                ok: false,
                content_hash: None,
                source_format: None,
                pages_requiring_fallback: None,
                used_fallback: None,
                text: None,
                error: Some(err.to_string()),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the reports.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        warn!("no input files given; usage: ingest <file>...");
        return Ok(());
    }

    info!(
        max_file_size_bytes = config.max_file_size_bytes,
        ocr_backend = ?config.ocr_backend,
        "ingestion pipeline initialized"
    );
    let ingestion_pipeline = Arc::new(IngestionPipeline::new(&config));

    let outcomes = ingest_paths(
        Arc::clone(&ingestion_pipeline),
        paths,
        config.ingest_concurrency,
    )
    .await;

    for outcome in &outcomes {
        println!("{}", serde_json::to_string(&DocumentReport::from(outcome))?);
    }
    println!(
        "{}",
        serde_json::to_string(&ingestion_pipeline.metrics().statistics())?
    );

    Ok(())
}
