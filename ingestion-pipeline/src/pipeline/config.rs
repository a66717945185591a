use std::time::Duration;

use common::utils::{config::AppConfig, content_identity::DEFAULT_CHUNK_SIZE};

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    /// Read and hash granularity for incoming byte streams.
    pub hash_chunk_bytes: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            hash_chunk_bytes: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    /// Upper bound for one attempt, optical fallback included. `None` waits indefinitely.
    pub extraction_timeout: Option<Duration>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            extraction_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning::default(),
            extraction_timeout: config.extraction_timeout(),
        }
    }
}
