pub mod document;
pub mod extraction_result;
pub mod source_format;
pub mod validation;
