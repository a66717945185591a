use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    Tesseract,
    Vision,
    Disabled,
}

fn default_ocr_backend() -> OcrBackend {
    OcrBackend::Tesseract
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_timeout_seconds")]
    pub cache_timeout_seconds: u64,
    #[serde(default = "default_extraction_timeout_seconds")]
    pub extraction_timeout_seconds: u64,
    #[serde(default = "default_ocr_backend")]
    pub ocr_backend: OcrBackend,
    #[serde(default = "default_tesseract_binary")]
    pub tesseract_binary: String,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_legacy_doc_converter")]
    pub legacy_doc_converter: String,
    #[serde(default = "default_max_ocr_pages")]
    pub max_ocr_pages: usize,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
}

fn default_max_file_size_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    ["txt", "pdf", "doc", "docx"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_cache_capacity() -> usize {
    1_000
}

fn default_cache_timeout_seconds() -> u64 {
    3_600
}

fn default_extraction_timeout_seconds() -> u64 {
    120
}

fn default_tesseract_binary() -> String {
    "tesseract".to_string()
}

fn default_ocr_language() -> String {
    "eng".to_string()
}

fn default_legacy_doc_converter() -> String {
    "antiword".to_string()
}

fn default_max_ocr_pages() -> usize {
    50
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vision_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_ingest_concurrency() -> usize {
    4
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            allowed_extensions: default_allowed_extensions(),
            cache_capacity: default_cache_capacity(),
            cache_timeout_seconds: default_cache_timeout_seconds(),
            extraction_timeout_seconds: default_extraction_timeout_seconds(),
            ocr_backend: default_ocr_backend(),
            tesseract_binary: default_tesseract_binary(),
            ocr_language: default_ocr_language(),
            legacy_doc_converter: default_legacy_doc_converter(),
            max_ocr_pages: default_max_ocr_pages(),
            openai_api_key: None,
            openai_base_url: default_base_url(),
            vision_model: default_vision_model(),
            ingest_concurrency: default_ingest_concurrency(),
        }
    }
}

impl AppConfig {
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_seconds)
    }

    /// `None` when the deadline is disabled.
    pub fn extraction_timeout(&self) -> Option<Duration> {
        (self.extraction_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.extraction_timeout_seconds))
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("allowed_extensions"),
        )
        .build()?;

    config.try_deserialize()
}
