pub mod config;
pub mod content_identity;
pub mod ingest_limits;
pub mod type_detection;
