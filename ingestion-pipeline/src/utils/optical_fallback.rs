use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::{AppError, ExtractionStage},
    types::source_format::SourceFormat,
    utils::config::{AppConfig, OcrBackend},
};
use tracing::{debug, info, warn};

use super::{
    page_rendering::ChromePageRasterizer,
    text_recognition::{TesseractRecognizer, VisionRecognizer},
};

/// Recovered text (or the reason there is none) for one page, keyed by 1-based page number.
pub type PageRecovery = (u32, Result<String, AppError>);

/// Recovers text for pages whose text layer came back empty.
///
/// Implementations never fail the document: every requested page gets an entry, and a page
/// that could not be recovered carries its own error.
#[async_trait]
pub trait PageFallback: Send + Sync {
    async fn recover_pages(&self, pdf: Bytes, pages: &[u32]) -> Vec<PageRecovery>;
}

/// Turns PDF pages into PNG images.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// One image per requested page, in request order. The outer error means nothing could
    /// be rendered at all.
    async fn render_pages(
        &self,
        pdf: Bytes,
        pages: &[u32],
    ) -> Result<Vec<Result<Vec<u8>, AppError>>, AppError>;
}

/// Reads text off a single page image.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn recognize_text(&self, png: &[u8]) -> Result<String, AppError>;
}

pub struct OpticalFallback {
    rasterizer: Arc<dyn PageRasterizer>,
    recognizer: Arc<dyn TextRecognizer>,
    max_pages: usize,
}

impl OpticalFallback {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        recognizer: Arc<dyn TextRecognizer>,
        max_pages: usize,
    ) -> Self {
        Self {
            rasterizer,
            recognizer,
            max_pages,
        }
    }
}

#[async_trait]
impl PageFallback for OpticalFallback {
    async fn recover_pages(&self, pdf: Bytes, pages: &[u32]) -> Vec<PageRecovery> {
        let cutoff = pages.len().min(self.max_pages);
        let (attempted, skipped) = pages.split_at(cutoff);
        if !skipped.is_empty() {
            warn!(
                skipped = skipped.len(),
                max_pages = self.max_pages,
                "too many pages need optical recognition; skipping the remainder"
            );
        }

        let mut recovered = Vec::with_capacity(pages.len());

        if !attempted.is_empty() {
            info!(
                pages = attempted.len(),
                recognizer = self.recognizer.name(),
                "running optical recognition on pages without a text layer"
            );
            match self.rasterizer.render_pages(pdf, attempted).await {
                Ok(images) => {
                    for (&page, image) in attempted.iter().zip(images) {
                        let text = match image {
                            Ok(png) => self.recognizer.recognize_text(&png).await,
                            Err(err) => Err(err),
                        };
                        recovered.push((page, text));
                    }
                }
                Err(err) => {
                    warn!(error = %err, "page rasterization failed for the whole document");
                    let cause = err.to_string();
                    recovered.extend(attempted.iter().map(|&page| {
                        (
                            page,
                            Err(AppError::extraction(
                                SourceFormat::Pdf,
                                ExtractionStage::Render,
                                &cause,
                            )),
                        )
                    }));
                }
            }
        }

        // The rasterizer may have returned fewer images than asked for.
        let answered: Vec<u32> = recovered.iter().map(|(page, _)| *page).collect();
        for &page in attempted.iter().chain(skipped) {
            if !answered.contains(&page) {
                recovered.push((
                    page,
                    Err(AppError::extraction(
                        SourceFormat::Pdf,
                        ExtractionStage::Render,
                        format!("page {page} was not rendered"),
                    )),
                ));
            }
        }

        recovered
    }
}

/// Used when optical recognition is switched off; every page degrades to empty text.
pub struct DisabledFallback;

#[async_trait]
impl PageFallback for DisabledFallback {
    async fn recover_pages(&self, _pdf: Bytes, pages: &[u32]) -> Vec<PageRecovery> {
        debug!(pages = pages.len(), "optical recognition disabled");
        pages
            .iter()
            .map(|&page| (page, Ok(String::new())))
            .collect()
    }
}

/// Builds the page fallback selected by `ocr_backend`.
pub fn page_fallback_from_config(config: &AppConfig) -> Arc<dyn PageFallback> {
    let recognizer: Arc<dyn TextRecognizer> = match config.ocr_backend {
        OcrBackend::Disabled => return Arc::new(DisabledFallback),
        OcrBackend::Tesseract => Arc::new(TesseractRecognizer::new(
            &config.tesseract_binary,
            &config.ocr_language,
        )),
        OcrBackend::Vision => Arc::new(VisionRecognizer::from_config(config)),
    };

    Arc::new(OpticalFallback::new(
        Arc::new(ChromePageRasterizer::new()),
        recognizer,
        config.max_ocr_pages,
    ))
}
