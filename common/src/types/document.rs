use serde::Serialize;

use crate::utils::{content_identity::content_hash, type_detection::detect_mime_type};

/// An uploaded artifact as seen by the ingestion core. Built once at the upload
/// boundary and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub original_filename: String,
    pub declared_extension: Option<String>,
    pub byte_size: u64,
    pub content_hash: String,
    pub mime_type: String,
}

impl Document {
    pub fn new(
        original_filename: &str,
        byte_size: u64,
        content_hash: String,
        mime_type: String,
    ) -> Self {
        Self {
            original_filename: original_filename.to_string(),
            declared_extension: declared_extension(original_filename),
            byte_size,
            content_hash,
            mime_type,
        }
    }

    /// Hashes and sniffs an in-memory payload.
    pub fn from_bytes(original_filename: &str, bytes: &[u8]) -> Self {
        Self::new(
            original_filename,
            u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            content_hash(bytes),
            detect_mime_type(bytes),
        )
    }
}

/// Lower-cased extension of the final path component, if any.
pub fn declared_extension(file_name: &str) -> Option<String> {
    let base = base_name(file_name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Drops any directory components and replaces characters outside
/// `[A-Za-z0-9_]` in the stem with underscores.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = base_name(file_name);
    let scrub = |name: &str| -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };

    match base.rsplit_once('.') {
        Some((name, ext)) if !name.is_empty() => format!("{}.{}", scrub(name), scrub(ext)),
        _ => scrub(base),
    }
}

fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_extension_is_lowercased() {
        assert_eq!(declared_extension("Resume.PDF").as_deref(), Some("pdf"));
        assert_eq!(declared_extension("notes.tar.TXT").as_deref(), Some("txt"));
        assert_eq!(declared_extension("dir.d/README"), None);
        assert_eq!(declared_extension(".bashrc"), None);
        assert_eq!(declared_extension("trailing."), None);
    }

    #[test]
    fn sanitize_file_name_strips_directories() {
        assert_eq!(sanitize_file_name("normal_file.txt"), "normal_file.txt");
        assert_eq!(sanitize_file_name("file123.doc"), "file123.doc");
        assert_eq!(
            sanitize_file_name("file with spaces.txt"),
            "file_with_spaces.txt"
        );
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\cv.docx"), "cv.docx");
        assert_eq!(sanitize_file_name("file:with:colons.txt"), "file_with_colons.txt");
    }

    #[test]
    fn identical_bytes_share_identity_regardless_of_name() {
        let first = Document::from_bytes("resume.txt", b"same content");
        let second = Document::from_bytes("other-name.txt", b"same content");
        assert_eq!(first.content_hash, second.content_hash);
        assert_ne!(first.original_filename, second.original_filename);
        assert_eq!(first.mime_type, "text/plain");
        assert_eq!(first.byte_size, 12);
    }
}
