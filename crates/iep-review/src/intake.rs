//! Upload validation.
//!
//! A rejected upload never reaches the agent service.
use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use sha2::{Digest, Sha256};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const PDF_MIME: &str = "application/pdf";
const FILE_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("no file provided")]
    MissingFile,

    #[error("uploaded file is empty")]
    Empty,

    #[error("only PDF files are accepted (got {0})")]
    NotPdf(String),

    #[error("file size {size} bytes exceeds the 10MB limit ({limit} bytes)")]
    TooLarge { size: usize, limit: usize },

    /// The request body hit the server's body limit before the file was fully read.
    #[error("upload exceeds the 10MB limit ({limit} bytes)")]
    BodyTooLarge { limit: usize },

    #[error("invalid multipart body: {0}")]
    Multipart(String),
}

impl IntakeError {
    pub fn status(&self) -> StatusCode {
        match self {
            IntakeError::MissingFile | IntakeError::Empty | IntakeError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            IntakeError::NotPdf(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            IntakeError::TooLarge { .. } | IntakeError::BodyTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            IntakeError::MissingFile => "missing_file",
            IntakeError::Empty => "empty_file",
            IntakeError::NotPdf(_) => "unsupported_media_type",
            IntakeError::TooLarge { .. } | IntakeError::BodyTooLarge { .. } => "file_too_large",
            IntakeError::Multipart(_) => "invalid_multipart",
        }
    }
}

/// A validated PDF upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercase hex SHA-256 of the bytes.
    pub fn sha256(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Check type and size. `mime_type` is the part header; when absent the bytes are sniffed.
pub fn validate(
    file_name: &str,
    mime_type: Option<&str>,
    bytes: Vec<u8>,
) -> Result<Upload, IntakeError> {
    if bytes.is_empty() {
        return Err(IntakeError::Empty);
    }
    let mime_type = match mime_type.map(str::trim).filter(|m| !m.is_empty()) {
        Some(declared) => declared.to_string(),
        None => infer::get(&bytes)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    };
    if !mime_type.eq_ignore_ascii_case(PDF_MIME) {
        return Err(IntakeError::NotPdf(mime_type));
    }
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(IntakeError::TooLarge {
            size: bytes.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }
    let file_name = if file_name.trim().is_empty() {
        "document.pdf".to_string()
    } else {
        file_name.to_string()
    };
    Ok(Upload {
        file_name,
        mime_type,
        bytes,
    })
}

fn multipart_error(e: MultipartError) -> IntakeError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IntakeError::BodyTooLarge {
            limit: MAX_UPLOAD_BYTES,
        }
    } else {
        IntakeError::Multipart(e.body_text())
    }
}

/// Pull the `file` field out of a multipart body and validate it. Other fields are ignored.
pub async fn read_upload(mut multipart: Multipart) -> Result<Upload, IntakeError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(multipart_error)?;
        return validate(&file_name, mime_type.as_deref(), bytes.to_vec());
    }
    Err(IntakeError::MissingFile)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF_HEADER: &[u8] = b"%PDF-1.7\n%\xe2\xe3\xcf\xd3\n";

    #[test]
    fn accepts_declared_pdf() {
        let upload = validate("plan.pdf", Some("application/pdf"), PDF_HEADER.to_vec()).unwrap();
        assert_eq!(upload.file_name, "plan.pdf");
        assert_eq!(upload.size(), PDF_HEADER.len() as u64);
        assert_eq!(upload.sha256().len(), 64);
    }

    #[test]
    fn rejects_other_types() {
        let err = validate("notes.txt", Some("text/plain"), b"hello".to_vec()).unwrap_err();
        assert!(matches!(err, IntakeError::NotPdf(ref m) if m == "text/plain"));
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn sniffs_when_part_has_no_content_type() {
        assert!(validate("plan.pdf", None, PDF_HEADER.to_vec()).is_ok());
        let err = validate("plan.pdf", None, b"plain text".to_vec()).unwrap_err();
        assert!(matches!(err, IntakeError::NotPdf(_)));
    }

    #[test]
    fn rejects_oversized_with_size_message() {
        let mut bytes = PDF_HEADER.to_vec();
        bytes.resize(MAX_UPLOAD_BYTES + 1, b' ');
        let err = validate("big.pdf", Some(PDF_MIME), bytes).unwrap_err();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(err.to_string().contains("10MB"));
    }

    #[test]
    fn body_limit_reports_as_too_large() {
        let err = IntakeError::BodyTooLarge {
            limit: MAX_UPLOAD_BYTES,
        };
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(err.code(), "file_too_large");
        assert!(err.to_string().contains("10MB"));
    }

    #[test]
    fn exactly_at_limit_is_accepted() {
        let mut bytes = PDF_HEADER.to_vec();
        bytes.resize(MAX_UPLOAD_BYTES, b' ');
        assert!(validate("edge.pdf", Some(PDF_MIME), bytes).is_ok());
    }

    #[test]
    fn rejects_empty() {
        let err = validate("empty.pdf", Some(PDF_MIME), Vec::new()).unwrap_err();
        assert!(matches!(err, IntakeError::Empty));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
