use std::{
    io::{Cursor, Read},
    process::Stdio,
};

use bytes::Bytes;
use common::{
    error::{AppError, ExtractionStage},
    types::source_format::SourceFormat,
};
use quick_xml::{events::Event, Reader as XmlReader};
use tokio::process::Command;
use tracing::debug;
use zip::ZipArchive;

use super::file_text_extraction::run_blocking;

const DOCX_MAIN_PART: &str = "word/document.xml";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Extracts paragraph text from an OOXML word-processing document, one paragraph per line.
pub async fn extract_docx(bytes: Bytes, format: SourceFormat) -> Result<String, AppError> {
    run_blocking(format, ExtractionStage::Parse, move || {
        docx_paragraphs(&bytes, format)
    })
    .await
}

/// Legacy `.doc` uploads that are really OOXML go through the docx reader; binary Word
/// documents are converted by an external tool.
pub async fn extract_legacy_doc(bytes: Bytes, converter: &str) -> Result<String, AppError> {
    if bytes.starts_with(ZIP_MAGIC) {
        debug!("legacy document carries an OOXML payload");
        return extract_docx(bytes, SourceFormat::LegacyDoc).await;
    }
    convert_with_external_tool(&bytes, converter).await
}

fn docx_paragraphs(bytes: &[u8], format: SourceFormat) -> Result<String, AppError> {
    let parse_err = |cause: String| AppError::extraction(format, ExtractionStage::Parse, cause);

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| parse_err(format!("failed to open document archive: {err}")))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_MAIN_PART)
        .map_err(|err| parse_err(format!("missing {DOCX_MAIN_PART}: {err}")))?
        .read_to_string(&mut xml)
        .map_err(|err| parse_err(format!("failed to read {DOCX_MAIN_PART}: {err}")))?;

    let mut reader = XmlReader::from_str(&xml);
    reader.trim_text(false);

    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = true,
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text_run => {
                let text = e
                    .unescape()
                    .map_err(|err| parse_err(format!("invalid text run: {err}")))?;
                current.push_str(&text);
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(parse_err(format!(
                    "malformed XML at position {}: {err}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}

async fn convert_with_external_tool(bytes: &[u8], converter: &str) -> Result<String, AppError> {
    let convert_err = |cause: String| {
        AppError::extraction(SourceFormat::LegacyDoc, ExtractionStage::Convert, cause)
    };

    let staged = tempfile::Builder::new()
        .prefix("legacy-doc-")
        .suffix(".doc")
        .tempfile()?;
    tokio::fs::write(staged.path(), bytes).await?;

    let output = Command::new(converter)
        .arg("-w")
        .arg("0")
        .arg(staged.path())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| convert_err(format!("failed to run `{converter}`: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(convert_err(format!(
            "`{converter}` exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}
