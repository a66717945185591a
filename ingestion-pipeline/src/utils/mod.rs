pub mod file_text_extraction;
pub mod optical_fallback;
pub mod page_rendering;
pub mod pdf_ingestion;
pub mod text_normalization;
pub mod text_recognition;
pub mod word_extraction;
