//! File type detection and name validation
//!
//! MIME is detected from the first 8 bytes of the stream; the declared
//! Content-Type header is never trusted. Extensions are allowlisted
//! separately, so a `%PDF` payload named `.doc` is still refused.

use crate::error::IngestError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_TEXT: &str = "text/plain";

/// Magic signature table, checked against the first 8 bytes only.
/// `PK\x03\x04` matches any ZIP container; combined with the `.docx`
/// extension allowlist that is accepted as DOCX.
const MAGIC_MAP: &[(&[u8], &str)] = &[
    (b"%PDF", MIME_PDF),
    (b"PK\x03\x04", MIME_DOCX),
    (b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1", MIME_DOC),
];

const ALLOWED_MIMES: &[&str] = &[MIME_PDF, MIME_DOCX, MIME_DOC, MIME_TEXT];
const ALLOWED_EXTENSIONS: &[&str] = &[".pdf", ".docx", ".doc", ".txt", ".md"];

/// Characters never allowed in a display name.
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

/// Validate and trim a display name.
///
/// # Errors
/// [`IngestError::InvalidName`] for empty, overlong, or unsafe names.
pub fn validate_document_name(raw: &str) -> Result<String, IngestError> {
    let name = raw.trim();
    if name.is_empty()
        || name.chars().count() > 255
        || name
            .chars()
            .any(|c| c.is_control() || FORBIDDEN_NAME_CHARS.contains(&c))
    {
        return Err(IngestError::InvalidName {
            name: raw.to_string(),
        });
    }
    Ok(name.to_string())
}

/// Lowercased extension with dot, e.g. `.pdf`; empty when absent.
#[must_use]
pub fn file_extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Strip directory components and storage-unsafe characters from the
/// client filename. Keeps at most 200 characters; falls back to
/// `upload` when nothing safe remains.
#[must_use]
pub fn sanitize_filename(raw: &str) -> String {
    let basename = raw
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    let safe: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(200)
        .collect();
    if safe.is_empty() {
        "upload".to_string()
    } else {
        safe
    }
}

/// Detect MIME from magic bytes, falling back to the extension for
/// plain-text formats.
#[must_use]
pub fn detect_mime(filename: &str, head: &[u8]) -> String {
    for (magic, mime) in MAGIC_MAP {
        if head.starts_with(magic) {
            return (*mime).to_string();
        }
    }
    match file_extension(filename).as_str() {
        ".txt" | ".md" => MIME_TEXT.to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

/// Extensions acceptable for a detected MIME type.
fn extensions_for(mime: &str) -> &'static [&'static str] {
    match mime {
        MIME_PDF => &[".pdf"],
        MIME_DOCX => &[".docx"],
        MIME_DOC => &[".doc"],
        MIME_TEXT => &[".txt", ".md"],
        _ => &[],
    }
}

/// Enforce the MIME allowlist, the extension allowlist, and their
/// pairing: a `%PDF` payload named `.doc` is refused even though both
/// values are individually allowlisted.
///
/// # Errors
/// [`IngestError::UnsupportedType`] naming the offending side.
pub fn check_allowlist(filename: &str, detected_mime: &str) -> Result<(), IngestError> {
    if !ALLOWED_MIMES.contains(&detected_mime) {
        return Err(IngestError::UnsupportedType {
            detail: format!("{filename}: {detected_mime}"),
        });
    }
    let ext = file_extension(filename);
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(IngestError::UnsupportedType {
            detail: format!("{filename}: extension {ext:?}"),
        });
    }
    if !extensions_for(detected_mime).contains(&ext.as_str()) {
        return Err(IngestError::UnsupportedType {
            detail: format!("{filename}: extension {ext:?} does not match {detected_mime}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_beat_extension() {
        assert_eq!(detect_mime("report.txt", b"%PDF-1.4"), MIME_PDF);
        assert_eq!(detect_mime("archive.docx", b"PK\x03\x04zzzz"), MIME_DOCX);
        assert_eq!(
            detect_mime("legacy.doc", b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1"),
            MIME_DOC
        );
    }

    #[test]
    fn plain_text_falls_back_to_extension() {
        assert_eq!(detect_mime("notes.md", b"# title\n"), MIME_TEXT);
        assert_eq!(detect_mime("notes.txt", b"hello wo"), MIME_TEXT);
        assert_eq!(
            detect_mime("binary.exe", b"MZ\x90\x00abcd"),
            "application/octet-stream"
        );
    }

    #[test]
    fn allowlist_enforces_mime_extension_pairing() {
        assert!(check_allowlist("report.pdf", MIME_PDF).is_ok());
        assert!(check_allowlist("notes.md", MIME_TEXT).is_ok());
        // Both values allowlisted individually, pairing refused.
        assert!(check_allowlist("report.doc", MIME_PDF).is_err());
        // Unknown MIME and disallowed extension refused outright.
        assert!(check_allowlist("binary.exe", "application/octet-stream").is_err());
        assert!(check_allowlist("weird.zip", MIME_DOCX).is_err());
    }

    #[test]
    fn name_validation_rejects_unsafe_characters() {
        assert!(validate_document_name("Q4 Report").is_ok());
        assert_eq!(validate_document_name("  padded  ").unwrap(), "padded");
        assert!(validate_document_name("").is_err());
        assert!(validate_document_name("a/b").is_err());
        assert!(validate_document_name("a\\b").is_err());
        assert!(validate_document_name("a<b>").is_err());
        assert!(validate_document_name("tab\tname").is_err());
        assert!(validate_document_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn filenames_are_sanitized_to_basenames() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        assert_eq!(sanitize_filename("my report (1).pdf"), "my_report__1_.pdf");
        assert_eq!(sanitize_filename("///"), "upload");
    }

    #[test]
    fn extensions_are_lowercased() {
        assert_eq!(file_extension("A.PDF"), ".pdf");
        assert_eq!(file_extension("noext"), "");
    }
}
