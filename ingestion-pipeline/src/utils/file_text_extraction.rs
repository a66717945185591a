use bytes::Bytes;
use common::{
    error::{AppError, ExtractionStage},
    types::source_format::SourceFormat,
    utils::type_detection::decode_text,
};
use tracing::{debug, warn};

use super::{
    optical_fallback::PageFallback,
    pdf_ingestion::extract_pdf,
    word_extraction::{extract_docx, extract_legacy_doc},
};

/// Un-normalized text from one format extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtraction {
    pub text: String,
    pub pages_requiring_fallback: u32,
    pub pages_degraded: u32,
}

impl RawExtraction {
    pub fn from_text(text: String) -> Self {
        Self {
            text,
            ..Self::default()
        }
    }
}

/// Runs the extractor for `format` over the full document bytes.
pub async fn extract_text(
    format: SourceFormat,
    bytes: Bytes,
    fallback: &dyn PageFallback,
    legacy_doc_converter: &str,
) -> Result<RawExtraction, AppError> {
    let raw = match format {
        SourceFormat::Text => {
            let decoded = run_blocking(format, ExtractionStage::Decode, move || {
                Ok(decode_text(&bytes))
            })
            .await?;
            debug!(
                encoding = decoded.encoding,
                lossy = decoded.lossy,
                "decoded plain text"
            );
            RawExtraction::from_text(decoded.text)
        }
        SourceFormat::Pdf => extract_pdf(bytes, fallback).await?,
        SourceFormat::ModernDoc => RawExtraction::from_text(extract_docx(bytes, format).await?),
        SourceFormat::LegacyDoc => {
            RawExtraction::from_text(extract_legacy_doc(bytes, legacy_doc_converter).await?)
        }
    };

    if !format.has_pages() && raw.text.trim().is_empty() {
        warn!(%format, "extractor produced no text");
    }

    Ok(raw)
}

/// Runs CPU-bound parsing on the blocking pool. A panic inside `work` becomes an
/// `ExtractionFailed` for the given format and stage instead of tearing down the caller.
pub(crate) async fn run_blocking<T, F>(
    format: SourceFormat,
    stage: ExtractionStage,
    work: F,
) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(AppError::extraction(
            format,
            stage,
            panic_message(err.into_panic()),
        )),
        Err(err) => Err(AppError::Join(err)),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("extractor panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("extractor panicked: {message}")
    } else {
        "extractor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::utils::optical_fallback::{DisabledFallback, PageRecovery};

    struct UnreachableFallback;

    #[async_trait]
    impl PageFallback for UnreachableFallback {
        async fn recover_pages(&self, _pdf: Bytes, _pages: &[u32]) -> Vec<PageRecovery> {
            panic!("text formats never use the optical fallback");
        }
    }

    #[tokio::test]
    async fn invalid_bytes_in_text_file_are_replaced() {
        let bytes =
            Bytes::from_static(b"Caf\xc3\xa9 \xc3\xa9t\xc3\xa9 \xff\xfe\xfd still readable");
        let raw = extract_text(SourceFormat::Text, bytes, &UnreachableFallback, "antiword")
            .await
            .expect("text never fails to decode");
        assert!(!raw.text.is_empty());
        assert!(raw.text.contains("still readable"));
        assert_eq!(raw.pages_requiring_fallback, 0);
    }

    #[tokio::test]
    async fn empty_text_file_is_an_empty_success() {
        let raw = extract_text(SourceFormat::Text, Bytes::new(), &DisabledFallback, "antiword")
            .await
            .expect("empty text is not an error");
        assert_eq!(raw, RawExtraction::default());
    }

    #[tokio::test]
    async fn blocking_panics_become_extraction_failures() {
        let err = run_blocking::<(), _>(SourceFormat::Pdf, ExtractionStage::TextLayer, || {
            panic!("bad xref table")
        })
        .await
        .expect_err("panic is reported");
        match err {
            AppError::ExtractionFailed { format, stage, cause } => {
                assert_eq!(format, SourceFormat::Pdf);
                assert_eq!(stage, ExtractionStage::TextLayer);
                assert!(cause.contains("bad xref table"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
