use std::{path::Path, thread, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use common::{
    error::{AppError, ExtractionStage},
    types::source_format::SourceFormat,
};
use headless_chrome::{
    protocol::cdp::{Emulation, Page, DOM},
    Browser, Tab,
};
use serde_json::Value;
use tracing::{debug, warn};

use super::{file_text_extraction::run_blocking, optical_fallback::PageRasterizer};

const NAVIGATION_RETRY_INTERVAL_MS: u64 = 120;
const NAVIGATION_RETRY_ATTEMPTS: usize = 10;
const PAGE_SETTLE_MS: u64 = 350;
const MIN_PAGE_IMAGE_BYTES: usize = 1_024;
const DEFAULT_VIEWPORT_WIDTH: u32 = 1_248;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 1_800;
const DEFAULT_DEVICE_SCALE_FACTOR: f64 = 1.0;
const CANVAS_VIEWPORT_ATTEMPTS: usize = 12;
const CANVAS_VIEWPORT_WAIT_MS: u64 = 200;

fn render_err(cause: impl std::fmt::Display) -> AppError {
    AppError::extraction(SourceFormat::Pdf, ExtractionStage::Render, cause)
}

/// Rasterizes PDF pages through the PDF viewer of a headless Chrome instance.
pub struct ChromePageRasterizer {
    tab_timeout: Duration,
}

impl Default for ChromePageRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChromePageRasterizer {
    pub fn new() -> Self {
        Self {
            tab_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl PageRasterizer for ChromePageRasterizer {
    async fn render_pages(
        &self,
        pdf: Bytes,
        pages: &[u32],
    ) -> Result<Vec<Result<Vec<u8>, AppError>>, AppError> {
        // Chrome opens the PDF from disk; the file lives until rendering returns.
        let staged = tempfile::Builder::new()
            .prefix("ocr-source-")
            .suffix(".pdf")
            .tempfile()?;
        tokio::fs::write(staged.path(), &pdf).await?;

        let pages = pages.to_vec();
        let tab_timeout = self.tab_timeout;
        run_blocking(SourceFormat::Pdf, ExtractionStage::Render, move || {
            let captures = render_pdf_pages(staged.path(), &pages, tab_timeout);
            drop(staged);
            captures
        })
        .await
    }
}

fn render_pdf_pages(
    file_path: &Path,
    pages: &[u32],
    tab_timeout: Duration,
) -> Result<Vec<Result<Vec<u8>, AppError>>, AppError> {
    let file_url = url::Url::from_file_path(file_path)
        .map_err(|()| render_err("unable to construct PDF file URL"))?;

    let browser = create_browser()?;
    let tab = browser
        .new_tab()
        .map_err(|err| render_err(format!("failed to create Chrome tab: {err}")))?;
    tab.set_default_timeout(tab_timeout);
    configure_tab(&tab)?;
    set_pdf_viewport(&tab)?;

    Ok(pages
        .iter()
        .map(|&page| {
            let capture = capture_page(&tab, &file_url, page);
            match &capture {
                Ok(png) => {
                    debug!(page, bytes = png.len(), "captured PDF page");
                    if is_suspicious_image(png.len()) {
                        warn!(page, bytes = png.len(), "page capture is suspiciously small");
                    }
                }
                Err(err) => warn!(page, error = %err, "failed to capture PDF page"),
            }
            capture
        })
        .collect())
}

fn capture_page(tab: &Tab, file_url: &url::Url, page: u32) -> Result<Vec<u8>, AppError> {
    let target = format!("{file_url}#page={page}&toolbar=0&statusbar=0&zoom=page-fit");
    tab.navigate_to(&target)
        .map_err(|err| render_err(format!("failed to navigate to page {page}: {err}")))?
        .wait_until_navigated()
        .map_err(|err| render_err(format!("navigation to page {page} failed: {err}")))?;

    let loaded = (0..NAVIGATION_RETRY_ATTEMPTS).any(|attempt| {
        if tab.wait_for_element("embed, canvas, body").is_ok() {
            return true;
        }
        if attempt.saturating_add(1) < NAVIGATION_RETRY_ATTEMPTS {
            thread::sleep(Duration::from_millis(NAVIGATION_RETRY_INTERVAL_MS));
        }
        false
    });
    if !loaded {
        return Err(render_err(format!(
            "timed out waiting for Chrome to render page {page}"
        )));
    }

    wait_for_pdf_ready(tab, page)?;
    thread::sleep(Duration::from_millis(PAGE_SETTLE_MS));
    prepare_pdf_viewer(tab, page);

    let mut viewport = None;
    for attempt in 0..CANVAS_VIEWPORT_ATTEMPTS {
        match canvas_viewport_for_page(tab, page) {
            Ok(Some(vp)) => {
                viewport = Some(vp);
                break;
            }
            Ok(None) if attempt.saturating_add(1) < CANVAS_VIEWPORT_ATTEMPTS => {
                thread::sleep(Duration::from_millis(CANVAS_VIEWPORT_WAIT_MS));
            }
            Ok(None) => {}
            Err(err) => {
                debug!(page, error = %err, "failed to derive canvas viewport");
                break;
            }
        }
    }

    let Some(clip) = viewport else {
        debug!(page, "no canvas viewport; capturing the full page");
        return capture_png(tab, None);
    };
    capture_png(tab, Some(clip)).or_else(|err| {
        debug!(page, error = %err, "clipped capture failed; capturing the full page");
        capture_png(tab, None)
    })
}

fn create_browser() -> Result<Browser, AppError> {
    #[cfg(feature = "docker")]
    {
        let options = headless_chrome::LaunchOptionsBuilder::default()
            .sandbox(false)
            .build()
            .map_err(|err| render_err(format!("failed to configure Chrome: {err}")))?;
        Browser::new(options).map_err(|err| render_err(format!("failed to start Chrome: {err}")))
    }
    #[cfg(not(feature = "docker"))]
    {
        Browser::default().map_err(|err| render_err(format!("failed to start Chrome: {err}")))
    }
}

fn configure_tab(tab: &Tab) -> Result<(), AppError> {
    tab.call_method(Emulation::SetDefaultBackgroundColorOverride {
        color: Some(DOM::RGBA {
            r: 255,
            g: 255,
            b: 255,
            a: Some(1.0),
        }),
    })
    .map_err(|err| render_err(format!("failed to set page background: {err}")))?;
    Ok(())
}

fn set_pdf_viewport(tab: &Tab) -> Result<(), AppError> {
    tab.call_method(Emulation::SetDeviceMetricsOverride {
        width: DEFAULT_VIEWPORT_WIDTH,
        height: DEFAULT_VIEWPORT_HEIGHT,
        device_scale_factor: DEFAULT_DEVICE_SCALE_FACTOR,
        mobile: false,
        scale: None,
        screen_width: Some(DEFAULT_VIEWPORT_WIDTH),
        screen_height: Some(DEFAULT_VIEWPORT_HEIGHT),
        position_x: None,
        position_y: None,
        dont_set_visible_size: Some(false),
        screen_orientation: None,
        viewport: None,
        display_feature: None,
        device_posture: None,
    })
    .map_err(|err| render_err(format!("failed to configure viewport: {err}")))?;

    tab.call_method(Emulation::SetVisibleSize {
        width: DEFAULT_VIEWPORT_WIDTH,
        height: DEFAULT_VIEWPORT_HEIGHT,
    })
    .map_err(|err| render_err(format!("failed to apply visible size: {err}")))?;
    Ok(())
}

fn wait_for_pdf_ready(tab: &Tab, page: u32) -> Result<(), AppError> {
    let element = tab
        .wait_for_element_with_custom_timeout(
            "embed[type='application/pdf']",
            Duration::from_secs(8),
        )
        .or_else(|_| tab.wait_for_element_with_custom_timeout("embed", Duration::from_secs(8)))
        .map_err(|err| render_err(format!("timed out waiting for PDF viewer: {err}")))?;

    if let Err(err) = element.scroll_into_view() {
        debug!(page, error = %err, "failed to scroll PDF viewer into view");
    }
    Ok(())
}

fn prepare_pdf_viewer(tab: &Tab, page: u32) {
    let script = format!(
        r#"(function() {{
            const embed = document.querySelector('embed[type="application/pdf"]') || document.querySelector('embed');
            if (!embed || !embed.shadowRoot) return false;
            const viewer = embed.shadowRoot.querySelector('pdf-viewer');
            if (!viewer || !viewer.shadowRoot) return false;
            const app = viewer.shadowRoot.querySelector('viewer-app');
            if (app && app.shadowRoot) {{
                const toolbar = app.shadowRoot.querySelector('#toolbar');
                if (toolbar) {{ toolbar.style.display = 'none'; }}
            }}
            const target = viewer.shadowRoot.querySelector('viewer-page:nth-of-type({page})');
            if (target && target.scrollIntoView) {{
                target.scrollIntoView({{ block: 'start', inline: 'center' }});
            }}
            return !!viewer.shadowRoot.querySelector('canvas[aria-label="Page {page}"]');
        }})()"#
    );

    match tab.evaluate(&script, false) {
        Ok(result) => {
            let ready = result
                .value
                .as_ref()
                .and_then(Value::as_bool)
                .unwrap_or(false);
            debug!(page, ready, "prepared PDF viewer page");
        }
        Err(err) => debug!(page, error = %err, "PDF viewer preparation script failed"),
    }
}

fn canvas_viewport_for_page(tab: &Tab, page: u32) -> Result<Option<Page::Viewport>, AppError> {
    let script = format!(
        r#"(function() {{
            const embed = document.querySelector('embed[type="application/pdf"]') || document.querySelector('embed');
            if (!embed || !embed.shadowRoot) return null;
            const viewer = embed.shadowRoot.querySelector('pdf-viewer');
            if (!viewer || !viewer.shadowRoot) return null;
            const canvas = viewer.shadowRoot.querySelector('canvas[aria-label="Page {page}"]');
            if (!canvas) return null;
            const rect = canvas.getBoundingClientRect();
            return {{ x: rect.x, y: rect.y, width: rect.width, height: rect.height }};
        }})()"#
    );

    let result = tab
        .evaluate(&script, false)
        .map_err(|err| render_err(format!("failed to inspect PDF canvas: {err}")))?;

    Ok(result.value.as_ref().and_then(viewport_from_rect))
}

fn viewport_from_rect(rect: &Value) -> Option<Page::Viewport> {
    let field = |name: &str| rect.get(name).and_then(Value::as_f64).unwrap_or_default();
    let (width, height) = (field("width"), field("height"));
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(Page::Viewport {
        x: field("x").max(0.0),
        y: field("y").max(0.0),
        width,
        height,
        scale: 1.0,
    })
}

fn capture_png(tab: &Tab, clip: Option<Page::Viewport>) -> Result<Vec<u8>, AppError> {
    let screenshot = tab
        .call_method(Page::CaptureScreenshot {
            format: Some(Page::CaptureScreenshotFormatOption::Png),
            quality: None,
            clip,
            from_surface: Some(true),
            capture_beyond_viewport: Some(true),
            optimize_for_speed: Some(false),
        })
        .map_err(|err| render_err(format!("failed to capture page: {err}")))?;

    STANDARD
        .decode(screenshot.data)
        .map_err(|err| render_err(format!("failed to decode page capture: {err}")))
}

fn is_suspicious_image(len: usize) -> bool {
    len < MIN_PAGE_IMAGE_BYTES
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn viewport_requires_positive_area() {
        assert!(viewport_from_rect(&json!({ "x": 0, "y": 0, "width": 0, "height": 10 })).is_none());
        assert!(viewport_from_rect(&json!(null)).is_none());

        let rect = json!({ "x": -4.0, "y": 12.5, "width": 600.0, "height": 800.0 });
        let vp = viewport_from_rect(&rect).expect("valid rect");
        assert!((vp.x - 0.0).abs() < f64::EPSILON);
        assert!((vp.y - 12.5).abs() < f64::EPSILON);
        assert!((vp.width - 600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tiny_captures_are_suspicious() {
        assert!(is_suspicious_image(0));
        assert!(is_suspicious_image(MIN_PAGE_IMAGE_BYTES - 1));
        assert!(!is_suspicious_image(MIN_PAGE_IMAGE_BYTES + 1));
    }
}
