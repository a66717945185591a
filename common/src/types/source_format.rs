use std::fmt;

use serde::{Deserialize, Serialize};

pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_PDF: &str = "application/pdf";
pub const APPLICATION_MSWORD: &str = "application/msword";
pub const APPLICATION_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Closed set of formats the ingestion core knows how to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Text,
    Pdf,
    LegacyDoc,
    ModernDoc,
}

impl SourceFormat {
    pub const ALL: [SourceFormat; 4] = [
        SourceFormat::Text,
        SourceFormat::Pdf,
        SourceFormat::LegacyDoc,
        SourceFormat::ModernDoc,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Pdf => "pdf",
            Self::LegacyDoc => "legacy-doc",
            Self::ModernDoc => "modern-doc",
        }
    }

    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Text => TEXT_PLAIN,
            Self::Pdf => APPLICATION_PDF,
            Self::LegacyDoc => APPLICATION_MSWORD,
            Self::ModernDoc => APPLICATION_DOCX,
        }
    }

    /// Maps a sniffed MIME type onto the extractor that handles it.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.mime_type() == mime)
    }

    /// Formats whose extractor works page by page and can use the optical fallback.
    #[must_use]
    pub fn has_pages(self) -> bool {
        matches!(self, Self::Pdf)
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_mime_covers_every_format() {
        for format in SourceFormat::ALL {
            assert_eq!(SourceFormat::from_mime(format.mime_type()), Some(format));
        }
        assert_eq!(SourceFormat::from_mime("application/zip"), None);
    }

    #[test]
    fn only_pdf_has_pages() {
        assert!(SourceFormat::Pdf.has_pages());
        assert!(!SourceFormat::Text.has_pages());
        assert!(!SourceFormat::ModernDoc.has_pages());
    }
}
