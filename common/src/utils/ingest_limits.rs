use std::collections::HashSet;

use crate::types::{
    document::{declared_extension, Document},
    source_format::{APPLICATION_DOCX, APPLICATION_MSWORD},
    validation::{RejectionReason, ValidationVerdict},
};

use super::config::AppConfig;

/// Extension, size and content-type checks applied before any extraction work.
#[derive(Debug, Clone)]
pub struct SecurityGate {
    max_file_size_bytes: u64,
    allowed_extensions: HashSet<String>,
}

impl SecurityGate {
    pub fn new<I, S>(max_file_size_bytes: u64, allowed_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            max_file_size_bytes,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.max_file_size_bytes, &config.allowed_extensions)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_bytes
    }

    /// Cheap rejection from upload metadata alone, before the body is read.
    pub fn check_declared(&self, original_filename: &str, declared_size: u64) -> ValidationVerdict {
        if let Err(reason) = self.check_extension(declared_extension(original_filename).as_deref())
        {
            return ValidationVerdict::reject(reason);
        }
        if let Err(reason) = self.check_size(declared_size) {
            return ValidationVerdict::reject(reason);
        }
        ValidationVerdict::accept()
    }

    /// Full verdict once the body has been read, hashed and sniffed. The actual byte
    /// count is checked independently of whatever size the caller declared.
    pub fn validate(&self, document: &Document, declared_size: u64) -> ValidationVerdict {
        let extension = match self.check_extension(document.declared_extension.as_deref()) {
            Ok(extension) => extension,
            Err(reason) => return ValidationVerdict::reject(reason),
        };

        if let Err(reason) = self
            .check_size(document.byte_size)
            .and_then(|()| self.check_size(declared_size))
        {
            return ValidationVerdict::reject(reason);
        }

        if !mime_matches_extension(&extension, &document.mime_type) {
            return ValidationVerdict::reject(RejectionReason::MimeMismatch {
                extension,
                detected: document.mime_type.clone(),
            });
        }

        ValidationVerdict::accept()
    }

    fn check_extension(&self, extension: Option<&str>) -> Result<String, RejectionReason> {
        let extension = extension.ok_or(RejectionReason::MissingExtension)?;
        if self.allowed_extensions.contains(extension) {
            Ok(extension.to_string())
        } else {
            Err(RejectionReason::ExtensionNotAllowed(extension.to_string()))
        }
    }

    fn check_size(&self, size: u64) -> Result<(), RejectionReason> {
        if size > self.max_file_size_bytes {
            return Err(RejectionReason::TooLarge {
                size,
                max: self.max_file_size_bytes,
            });
        }
        Ok(())
    }
}

/// MIME types a sniffed payload may have for a given extension.
pub fn allowed_mime_types(extension: &str) -> Vec<String> {
    let mut allowed: Vec<String> = mime_guess::from_ext(extension)
        .iter()
        .map(|mime| mime.essence_str().to_string())
        .collect();

    // Legacy .doc uploads are frequently OOXML documents with the old extension.
    if allowed.iter().any(|mime| mime == APPLICATION_MSWORD) {
        allowed.push(APPLICATION_DOCX.to_string());
    }
    // Any text/* flavour sniffs as plain text.
    if allowed.iter().any(|mime| mime.starts_with("text/")) {
        allowed.push(mime::TEXT_PLAIN.essence_str().to_string());
    }
    allowed
}

fn mime_matches_extension(extension: &str, detected: &str) -> bool {
    allowed_mime_types(extension)
        .iter()
        .any(|mime| mime == detected)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn gate() -> SecurityGate {
        SecurityGate::from_config(&AppConfig::default())
    }

    fn document(name: &str, bytes: &[u8]) -> Document {
        Document::from_bytes(name, bytes)
    }

    #[test]
    fn check_declared_rejects_missing_extension() {
        let verdict = gate().check_declared("resume", 10);
        assert_eq!(verdict.reason, Some(RejectionReason::MissingExtension));
    }

    #[test]
    fn check_declared_rejects_disallowed_extension() {
        let verdict = gate().check_declared("payload.exe", 10);
        assert_eq!(
            verdict.reason,
            Some(RejectionReason::ExtensionNotAllowed("exe".into()))
        );
    }

    #[test]
    fn check_declared_rejects_oversized_upload() {
        let verdict = gate().check_declared("resume.pdf", 11 * MIB);
        assert!(matches!(
            verdict.reason,
            Some(RejectionReason::TooLarge { size, max }) if size == 11 * MIB && max == 10 * MIB
        ));
    }

    #[test]
    fn validate_rejects_pdf_that_sniffs_as_text() {
        let doc = document("resume.pdf", b"just some plain text pretending to be a pdf");
        let verdict = gate().validate(&doc, doc.byte_size);
        assert!(!verdict.accepted);
        assert_eq!(
            verdict.reason,
            Some(RejectionReason::MimeMismatch {
                extension: "pdf".into(),
                detected: "text/plain".into(),
            })
        );
    }

    #[test]
    fn validate_checks_actual_size_not_declared() {
        let gate = SecurityGate::new(16, ["txt"]);
        let doc = document("notes.txt", b"this body is longer than sixteen bytes");
        let verdict = gate.validate(&doc, 4);
        assert!(matches!(
            verdict.reason,
            Some(RejectionReason::TooLarge { size: 38, max: 16 })
        ));
    }

    #[test]
    fn validate_rejects_eleven_mib_text_file() {
        let body = vec![b'a'; (11 * MIB) as usize];
        let doc = document("big.txt", &body);
        let verdict = gate().validate(&doc, doc.byte_size);
        assert!(matches!(
            verdict.reason,
            Some(RejectionReason::TooLarge { .. })
        ));
    }

    #[test]
    fn validate_accepts_matching_content() {
        let gate = gate();
        let txt = document("Notes.TXT", b"hello world");
        assert!(gate.validate(&txt, txt.byte_size).accepted);

        let pdf = document("cv.pdf", b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n");
        assert!(gate.validate(&pdf, pdf.byte_size).accepted);
    }

    #[test]
    fn text_that_looks_like_binary_signatures_is_accepted() {
        let gate = gate();
        let resume = document(
            "resume.txt",
            b"MZ Consulting - Senior Engineer\nBuilt ingestion services in Rust.\n",
        );
        let verdict = gate.validate(&resume, resume.byte_size);
        assert!(verdict.accepted, "{:?}", verdict.reason);

        let notes = document(
            "notes.txt",
            b"Notes on file formats: every PDF begins with %PDF-1.7 and a binary comment.\n",
        );
        let verdict = gate.validate(&notes, notes.byte_size);
        assert!(verdict.accepted, "{:?}", verdict.reason);
    }

    #[test]
    fn doc_extension_accepts_ooxml_payload() {
        assert!(allowed_mime_types("doc").contains(&APPLICATION_DOCX.to_string()));
        assert!(allowed_mime_types("doc").contains(&APPLICATION_MSWORD.to_string()));
        assert!(!allowed_mime_types("docx").contains(&APPLICATION_MSWORD.to_string()));
    }

    #[test]
    fn empty_file_is_rejected() {
        let doc = document("empty.txt", b"");
        let verdict = gate().validate(&doc, 0);
        assert!(matches!(
            verdict.reason,
            Some(RejectionReason::MimeMismatch { .. })
        ));
    }
}
