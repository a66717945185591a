use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::Bytes;
use common::{
    error::{AppError, ExtractionStage},
    types::source_format::SourceFormat,
};
use lopdf::Document;
use tracing::{debug, info, warn};

use super::{
    file_text_extraction::{run_blocking, RawExtraction},
    optical_fallback::{PageFallback, PageRecovery},
};

/// Extracts a PDF page by page. Pages whose text layer is empty or whitespace-only are
/// handed to `fallback`, and whatever it recovers (possibly nothing) takes that page's slot.
pub async fn extract_pdf(
    bytes: Bytes,
    fallback: &dyn PageFallback,
) -> Result<RawExtraction, AppError> {
    let layer_bytes = bytes.clone();
    let pages = run_blocking(SourceFormat::Pdf, ExtractionStage::TextLayer, move || {
        read_text_layer(&layer_bytes)
    })
    .await?;

    let blank_pages: Vec<u32> = pages
        .iter()
        .zip(1_u32..)
        .filter(|(text, _)| text.trim().is_empty())
        .map(|(_, number)| number)
        .collect();

    debug!(
        page_count = pages.len(),
        blank_pages = blank_pages.len(),
        "read PDF text layer"
    );

    let recovered = if blank_pages.is_empty() {
        Vec::new()
    } else {
        info!(
            pages = ?blank_pages,
            "PDF pages without a text layer; using optical fallback"
        );
        fallback.recover_pages(bytes, &blank_pages).await
    };

    Ok(assemble_pages(pages, &blank_pages, recovered))
}

/// Text of every page in document order.
fn read_text_layer(bytes: &[u8]) -> Result<Vec<String>, AppError> {
    let document = Document::load_mem(bytes).map_err(|err| {
        AppError::extraction(
            SourceFormat::Pdf,
            ExtractionStage::Parse,
            format!("failed to parse PDF: {err}"),
        )
    })?;

    let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();
    if page_numbers.is_empty() {
        return Err(AppError::extraction(
            SourceFormat::Pdf,
            ExtractionStage::Parse,
            "PDF appears to have no pages",
        ));
    }

    // pdf-extract copes with more font encodings but can panic on odd documents.
    let by_pages = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match by_pages {
        Ok(Ok(pages)) if pages.len() == page_numbers.len() => return Ok(pages),
        Ok(Ok(pages)) => debug!(
            extracted = pages.len(),
            expected = page_numbers.len(),
            "pdf-extract page count mismatch; reading pages individually"
        ),
        Ok(Err(err)) => debug!(error = %err, "pdf-extract failed; reading pages individually"),
        Err(_) => warn!("pdf-extract panicked; reading pages individually"),
    }

    Ok(page_numbers
        .iter()
        .map(|&number| {
            document.extract_text(&[number]).unwrap_or_else(|err| {
                debug!(page = number, error = %err, "no text layer for page");
                String::new()
            })
        })
        .collect())
}

/// Puts recovered text back into the slots of the pages that needed it and joins everything
/// in page order.
fn assemble_pages(
    mut pages: Vec<String>,
    blank_pages: &[u32],
    recovered: Vec<PageRecovery>,
) -> RawExtraction {
    let mut pages_degraded = 0_u32;

    for &number in blank_pages {
        if let Some(slot) = page_slot(&mut pages, number) {
            slot.clear();
        }
    }

    for (number, outcome) in recovered {
        let Some(slot) = page_slot(&mut pages, number) else {
            warn!(page = number, "optical fallback answered for an unknown page");
            continue;
        };
        match outcome {
            Ok(text) if !text.trim().is_empty() => *slot = text,
            Ok(_) => {
                pages_degraded = pages_degraded.saturating_add(1);
                warn!(page = number, "optical recognition produced no text");
            }
            Err(err) => {
                pages_degraded = pages_degraded.saturating_add(1);
                warn!(page = number, error = %err, "optical recognition failed; page left empty");
            }
        }
    }

    RawExtraction {
        text: pages.join("\n"),
        pages_requiring_fallback: u32::try_from(blank_pages.len()).unwrap_or(u32::MAX),
        pages_degraded,
    }
}

/// Slot of a 1-based page number.
fn page_slot(pages: &mut [String], number: u32) -> Option<&mut String> {
    let index = usize::try_from(number.checked_sub(1)?).ok()?;
    pages.get_mut(index)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use lopdf::{
        content::{Content, Operation},
        dictionary, Object, Stream,
    };

    use super::*;

    /// Replays a canned answer for every page and remembers what it was asked for.
    struct ScriptedFallback {
        answer: fn(u32) -> Result<String, AppError>,
        requested: Mutex<Vec<u32>>,
    }

    impl ScriptedFallback {
        fn new(answer: fn(u32) -> Result<String, AppError>) -> Self {
            Self {
                answer,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageFallback for ScriptedFallback {
        async fn recover_pages(&self, _pdf: Bytes, pages: &[u32]) -> Vec<PageRecovery> {
            self.requested
                .lock()
                .expect("lock")
                .extend_from_slice(pages);
            pages
                .iter()
                .map(|&page| (page, (self.answer)(page)))
                .collect()
        }
    }

    fn page_operations(text: Option<&str>) -> Vec<u8> {
        let operations = match text {
            Some(text) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
            None => Vec::new(),
        };
        Content { operations }.encode().expect("encode content")
    }

    /// One PDF page per entry; `None` pages carry no text operators at all.
    fn pdf_fixture(pages: &[Option<&str>]) -> Bytes {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let kids: Vec<Object> = pages
            .iter()
            .map(|text| {
                let content_id =
                    doc.add_object(Stream::new(dictionary! {}, page_operations(*text)));
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                    "Resources" => resources_id,
                })
                .into()
            })
            .collect();

        let count = i64::try_from(kids.len()).expect("page count");
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save pdf");
        Bytes::from(out)
    }

    #[tokio::test]
    async fn blank_page_degrades_instead_of_failing() {
        let pdf = pdf_fixture(&[Some("Hello World"), None]);
        let fallback = ScriptedFallback::new(|_| Ok(String::new()));

        let raw = extract_pdf(pdf, &fallback).await.expect("pdf extraction");

        assert!(raw.text.contains("Hello World"));
        assert_eq!(raw.pages_requiring_fallback, 1);
        assert_eq!(raw.pages_degraded, 1);
        assert_eq!(*fallback.requested.lock().expect("lock"), vec![2]);
    }

    #[tokio::test]
    async fn recognition_errors_do_not_fail_the_document() {
        let pdf = pdf_fixture(&[None, None]);
        let fallback = ScriptedFallback::new(|page| {
            if page == 1 {
                Ok("scanned first page".into())
            } else {
                Err(AppError::InternalError("ocr crashed".into()))
            }
        });

        let raw = extract_pdf(pdf, &fallback).await.expect("pdf extraction");

        assert_eq!(raw.pages_requiring_fallback, 2);
        assert_eq!(raw.pages_degraded, 1);
        assert_eq!(raw.text, "scanned first page\n");
    }

    #[tokio::test]
    async fn malformed_pdf_is_a_parse_failure() {
        let fallback = ScriptedFallback::new(|_| Ok(String::new()));
        let err = extract_pdf(Bytes::from_static(b"%PDF-1.4\nnot really a pdf"), &fallback)
            .await
            .expect_err("garbage is not a PDF");
        assert!(matches!(
            err,
            AppError::ExtractionFailed {
                format: SourceFormat::Pdf,
                stage: ExtractionStage::Parse,
                ..
            }
        ));
        assert!(fallback.requested.lock().expect("lock").is_empty());
    }

    #[test]
    fn recovered_text_keeps_page_order() {
        let pages = vec![
            "first".to_string(),
            "  \n".to_string(),
            "third".to_string(),
            String::new(),
        ];
        let recovered = vec![
            (4, Ok("fourth".to_string())),
            (2, Ok("second".to_string())),
        ];

        let raw = assemble_pages(pages, &[2, 4], recovered);

        assert_eq!(raw.text, "first\nsecond\nthird\nfourth");
        assert_eq!(raw.pages_requiring_fallback, 2);
        assert_eq!(raw.pages_degraded, 0);
    }

    #[test]
    fn whitespace_only_recognition_counts_as_degraded() {
        let raw = assemble_pages(
            vec!["body".into(), String::new()],
            &[2],
            vec![(2, Ok(" \t ".into()))],
        );
        assert_eq!(raw.text, "body\n");
        assert_eq!(raw.pages_degraded, 1);
    }
}
