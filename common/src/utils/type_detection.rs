//! Content sniffing and character-encoding detection. Neither looks at file names.

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use tracing::warn;

use crate::types::source_format::{APPLICATION_DOCX, APPLICATION_MSWORD, APPLICATION_PDF};

pub const APPLICATION_X_EMPTY: &str = "application/x-empty";
pub const APPLICATION_ZIP: &str = "application/zip";
pub const APPLICATION_OLE_STORAGE: &str = "application/x-ole-storage";

const PDF_MAGIC: &[u8] = b"%PDF-";
const PDF_HEADER_WINDOW: usize = 1_024;
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const DOCX_MAIN_PART: &[u8] = b"word/document.xml";
const TEXT_SAMPLE_LEN: usize = 8 * 1024;

/// Signatures that are never acceptable documents but are worth naming precisely.
const OTHER_SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n".as_slice(), "image/png"),
    (b"\xFF\xD8\xFF".as_slice(), "image/jpeg"),
    (b"GIF87a".as_slice(), "image/gif"),
    (b"GIF89a".as_slice(), "image/gif"),
    (b"\x1F\x8B".as_slice(), "application/gzip"),
    (b"\x7fELF".as_slice(), "application/x-executable"),
];

const DOS_MAGIC: &[u8] = b"MZ";
const PE_MAGIC: &[u8] = b"PE\0\0";
/// Offset of `e_lfanew`, the little-endian pointer to the PE header.
const PE_POINTER_OFFSET: usize = 0x3C;
const APPLICATION_X_DOSEXEC: &str = "application/x-dosexec";

/// Sniffs the MIME type of `bytes` from their content alone.
pub fn detect_mime_type(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return APPLICATION_X_EMPTY.to_string();
    }

    if has_pdf_header(prefix(bytes, PDF_HEADER_WINDOW)) {
        return APPLICATION_PDF.to_string();
    }

    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        // Local file headers store entry names uncompressed.
        let mime = if contains(bytes, DOCX_MAIN_PART) {
            APPLICATION_DOCX
        } else {
            APPLICATION_ZIP
        };
        return mime.to_string();
    }

    if bytes.starts_with(OLE_MAGIC) {
        let mime = if contains(bytes, &utf16le("WordDocument")) {
            APPLICATION_MSWORD
        } else {
            APPLICATION_OLE_STORAGE
        };
        return mime.to_string();
    }

    if let Some((_, mime)) = OTHER_SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
    {
        return (*mime).to_string();
    }

    if is_portable_executable(bytes) {
        return APPLICATION_X_DOSEXEC.to_string();
    }

    if Encoding::for_bom(bytes).is_some() || looks_like_text(bytes) {
        return mime::TEXT_PLAIN.essence_str().to_string();
    }

    mime::APPLICATION_OCTET_STREAM.essence_str().to_string()
}

/// Best guess at the character encoding of a plain-text payload.
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    if let Some(encoding) = utf16_without_bom(bytes) {
        return encoding;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    if mostly_utf8(bytes) {
        return UTF_8;
    }
    WINDOWS_1252
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    /// True when strict decoding failed and undecodable sequences were replaced.
    pub lossy: bool,
}

/// Decodes with the detected encoding, falling back to UTF-8 with replacement
/// characters when the strict decode fails.
pub fn decode_text(bytes: &[u8]) -> DecodedText {
    let encoding = detect_encoding(bytes);
    let body = match Encoding::for_bom(bytes) {
        Some((bom_encoding, bom_len)) if bom_encoding == encoding => {
            bytes.get(bom_len..).unwrap_or_default()
        }
        _ => bytes,
    };

    if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(body) {
        return DecodedText {
            text: text.into_owned(),
            encoding: encoding.name(),
            lossy: false,
        };
    }

    warn!(
        encoding = encoding.name(),
        "strict decode failed; re-decoding as UTF-8 with replacement"
    );
    let (text, _) = UTF_8.decode_with_bom_removal(bytes);
    DecodedText {
        text: text.into_owned(),
        encoding: UTF_8.name(),
        lossy: true,
    }
}

/// `%PDF-` at offset 0, or after a prefix of whitespace or binary junk. A header quoted
/// inside printable text does not count.
fn has_pdf_header(head: &[u8]) -> bool {
    let Some(position) = find(head, PDF_MAGIC) else {
        return false;
    };
    let before = prefix(head, position);
    before.iter().all(u8::is_ascii_whitespace) || before.iter().copied().any(is_binary_byte)
}

fn is_portable_executable(bytes: &[u8]) -> bool {
    if !bytes.starts_with(DOS_MAGIC) {
        return false;
    }
    let pointer = bytes
        .get(PE_POINTER_OFFSET..PE_POINTER_OFFSET.saturating_add(4))
        .and_then(|raw| <[u8; 4]>::try_from(raw).ok())
        .map(u32::from_le_bytes)
        .and_then(|offset| usize::try_from(offset).ok());
    pointer
        .and_then(|offset| bytes.get(offset..offset.saturating_add(PE_MAGIC.len())))
        .is_some_and(|signature| signature == PE_MAGIC)
}

fn is_binary_byte(byte: u8) -> bool {
    (byte < 0x20 && !matches!(byte, b'\t' | b'\n' | b'\r' | 0x0C | 0x1B)) || byte == 0x7F
}

fn looks_like_text(bytes: &[u8]) -> bool {
    let sample = prefix(bytes, TEXT_SAMPLE_LEN);
    if utf16_without_bom(sample).is_some() {
        return true;
    }
    if sample.contains(&0) {
        return false;
    }
    let control = sample.iter().copied().filter(|&b| is_binary_byte(b)).count();
    control.saturating_mul(50) <= sample.len()
}

/// Recognizes BOM-less UTF-16 by the zero high bytes of mostly-Latin text.
fn utf16_without_bom(bytes: &[u8]) -> Option<&'static Encoding> {
    let sample = prefix(bytes, TEXT_SAMPLE_LEN);
    let pairs = sample.len() / 2;
    if pairs < 2 {
        return None;
    }
    let even_zeros = sample.iter().step_by(2).filter(|&&b| b == 0).count();
    let odd_zeros = sample.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
    let dominant = |zeros: usize| zeros.saturating_mul(10) >= pairs.saturating_mul(4);
    let rare = |zeros: usize| zeros.saturating_mul(20) < pairs;

    if dominant(odd_zeros) && rare(even_zeros) {
        Some(UTF_16LE)
    } else if dominant(even_zeros) && rare(odd_zeros) {
        Some(UTF_16BE)
    } else {
        None
    }
}

/// True when valid multi-byte UTF-8 sequences outnumber the invalid bytes.
fn mostly_utf8(bytes: &[u8]) -> bool {
    let mut multibyte = 0usize;
    let mut invalid = 0usize;
    for chunk in bytes.utf8_chunks() {
        let non_ascii = chunk.valid().chars().filter(|c| !c.is_ascii()).count();
        multibyte = multibyte.saturating_add(non_ascii);
        invalid = invalid.saturating_add(chunk.invalid().len());
    }
    multibyte > 0 && multibyte >= invalid
}

fn utf16le(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn prefix(bytes: &[u8], len: usize) -> &[u8] {
    bytes.get(..len).unwrap_or(bytes)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}
