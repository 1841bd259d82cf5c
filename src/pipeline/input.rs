//! Upload validation: decide whether an uploaded file is a PDF or an image,
//! pick a safe on-disk name for it, and check its content matches the claim.
//!
//! The extension decides the kind. When the client sends no extension the
//! multipart content type is used instead. Only after the kind is known are
//! the magic bytes checked, so a `.pdf` full of HTML is reported as
//! unreadable rather than unsupported.

use crate::error::GatewayError;
use image::ImageFormat;
use std::path::Path;

const FALLBACK_STEM: &str = "upload";

/// A file as received from the client. Never mutated after receipt.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// What kind of document an upload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Artifact-tree partition folder for this kind.
    pub fn folder(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Image => "image",
        }
    }
}

/// An upload that passed the format gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub kind: DocumentKind,
    /// Sanitised file name, always with an extension.
    pub filename: String,
    /// `filename` without its extension.
    pub stem: String,
}

impl UploadedDocument {
    pub fn new(filename: Option<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename,
            content_type,
            bytes,
        }
    }

    /// The name to show in error messages.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or(FALLBACK_STEM)
    }

    /// Classify the upload by extension (or content type) and sanitise its name.
    pub fn validate(&self) -> Result<ValidatedUpload, GatewayError> {
        let sanitized = self
            .filename
            .as_deref()
            .map(sanitize_filename)
            .unwrap_or_default();
        let extension = Path::new(&sanitized)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        let unsupported = || GatewayError::UnsupportedFormat {
            filename: self.display_name().to_string(),
        };

        let (kind, filename) = match extension {
            Some(ext) => (kind_for_extension(&ext).ok_or_else(unsupported)?, sanitized),
            None => {
                let (kind, ext) = self
                    .content_type
                    .as_deref()
                    .and_then(kind_for_content_type)
                    .ok_or_else(unsupported)?;
                let stem = if sanitized.is_empty() {
                    FALLBACK_STEM
                } else {
                    sanitized.as_str()
                };
                (kind, format!("{stem}.{ext}"))
            }
        };

        let stem = Path::new(&filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(FALLBACK_STEM)
            .to_string();

        Ok(ValidatedUpload {
            kind,
            filename,
            stem,
        })
    }

    /// Check the file content against its claimed kind.
    pub fn check_content(&self, kind: DocumentKind) -> Result<(), GatewayError> {
        let unreadable = |detail: &str| GatewayError::UnreadableDocument {
            filename: self.display_name().to_string(),
            detail: detail.to_string(),
        };

        if self.bytes.is_empty() {
            return Err(unreadable("file is empty"));
        }
        match kind {
            DocumentKind::Pdf if !self.bytes.starts_with(b"%PDF") => {
                Err(unreadable("missing %PDF header"))
            }
            DocumentKind::Pdf => Ok(()),
            DocumentKind::Image => match image::guess_format(&self.bytes) {
                Ok(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Bmp) => Ok(()),
                Ok(other) => Err(unreadable(&format!("content is {other:?}, not PNG/JPEG/BMP"))),
                Err(_) => Err(unreadable("content is not a recognised image")),
            },
        }
    }
}

fn kind_for_extension(ext: &str) -> Option<DocumentKind> {
    match ext {
        "pdf" => Some(DocumentKind::Pdf),
        "jpg" | "jpeg" | "png" | "bmp" => Some(DocumentKind::Image),
        _ => None,
    }
}

fn kind_for_content_type(content_type: &str) -> Option<(DocumentKind, &'static str)> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "application/pdf" => Some((DocumentKind::Pdf, "pdf")),
        "image/jpeg" | "image/jpg" => Some((DocumentKind::Image, "jpg")),
        "image/png" => Some((DocumentKind::Image, "png")),
        "image/bmp" | "image/x-ms-bmp" => Some((DocumentKind::Image, "bmp")),
        _ => None,
    }
}

/// Reduce a client-supplied name to a single safe path component.
///
/// Keeps only the final component (either separator style), replaces
/// control and reserved characters with `_`, and strips leading dots.
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| match c {
            c if c.is_control() => '_',
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_start_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: Option<&str>, content_type: Option<&str>, bytes: &[u8]) -> UploadedDocument {
        UploadedDocument::new(
            name.map(String::from),
            content_type.map(String::from),
            bytes.to_vec(),
        )
    }

    #[test]
    fn extension_decides_kind() {
        let v = upload(Some("Report.PDF"), Some("image/png"), b"%PDF").validate().unwrap();
        assert_eq!(v.kind, DocumentKind::Pdf);
        assert_eq!(v.filename, "Report.PDF");
        assert_eq!(v.stem, "Report");

        for name in ["a.jpg", "a.jpeg", "a.png", "a.bmp"] {
            assert_eq!(upload(Some(name), None, b"").validate().unwrap().kind, DocumentKind::Image);
        }
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        for name in ["notes.docx", "archive.tar.gz", "scan.tiff"] {
            let err = upload(Some(name), Some("application/pdf"), b"%PDF").validate().unwrap_err();
            assert!(matches!(err, GatewayError::UnsupportedFormat { .. }), "{name}");
        }
    }

    #[test]
    fn content_type_used_without_extension() {
        let v = upload(Some("scan"), Some("application/pdf; charset=binary"), b"").validate().unwrap();
        assert_eq!(v.kind, DocumentKind::Pdf);
        assert_eq!(v.filename, "scan.pdf");

        let v = upload(None, Some("image/jpeg"), b"").validate().unwrap();
        assert_eq!(v.filename, "upload.jpg");
        assert_eq!(v.stem, "upload");

        assert!(upload(None, Some("text/plain"), b"").validate().is_err());
        assert!(upload(None, None, b"").validate().is_err());
    }

    #[test]
    fn filenames_cannot_escape() {
        assert_eq!(sanitize_filename("../../etc/passwd.pdf"), "passwd.pdf");
        assert_eq!(sanitize_filename("C:\\Users\\me\\scan.png"), "scan.png");
        assert_eq!(sanitize_filename("..hidden.pdf"), "hidden.pdf");
        assert_eq!(sanitize_filename("a\u{0}b?.pdf"), "a_b_.pdf");
    }

    #[test]
    fn magic_bytes_are_checked() {
        let pdf = upload(Some("a.pdf"), None, b"%PDF-1.7\n");
        assert!(pdf.check_content(DocumentKind::Pdf).is_ok());

        let fake = upload(Some("a.pdf"), None, b"<html>");
        assert!(matches!(
            fake.check_content(DocumentKind::Pdf).unwrap_err(),
            GatewayError::UnreadableDocument { .. }
        ));

        let empty = upload(Some("a.png"), None, b"");
        assert!(empty.check_content(DocumentKind::Image).is_err());

        let png = upload(Some("a.png"), None, b"\x89PNG\r\n\x1a\n0000");
        assert!(png.check_content(DocumentKind::Image).is_ok());
    }
}
