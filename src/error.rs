//! Error types for the PDF form bridge

use thiserror::Error;

/// Result type alias for the PDF form bridge
pub type Result<T> = std::result::Result<T, Error>;

/// The input bytes could not be turned into a document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to load PDF: {reason}")]
pub struct LoadError {
    pub reason: String,
}

impl LoadError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure of a whole fill pass. Per-field problems never end up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FillError {
    /// No document is loaded
    #[error("No PDF form loaded")]
    NoForm,

    /// The document changed shape underneath the fill pass
    #[error("Failed to fill form fields: {reason}")]
    Internal { reason: String },
}

/// Failure to flatten or serialize the loaded document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// No document is loaded
    #[error("No PDF document loaded")]
    NoDocument,

    /// Flattening or writing the document failed
    #[error("Failed to generate filled PDF: {reason}")]
    SerializeFailed { reason: String },
}

/// Error types for the PDF form bridge server
#[derive(Error, Debug)]
pub enum Error {
    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Invalid PDF file
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// Incorrect password provided
    #[error("Incorrect password")]
    IncorrectPassword,

    /// Document could not be loaded into the bridge
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Field values could not be written back
    #[error(transparent)]
    Fill(#[from] FillError),

    /// Flattened output could not be produced
    #[error(transparent)]
    Generate(#[from] GenerateError),

    /// Cache key not found
    #[error("Cache key not found: {key}")]
    CacheKeyNotFound { key: String },

    /// Source resolution error
    #[error("Failed to resolve source: {reason}")]
    SourceResolution { reason: String },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// qpdf error
    #[error("qpdf error: {reason}")]
    QpdfError { reason: String },

    /// Blocking task could not be joined
    #[error("Task join error: {reason}")]
    TaskJoin { reason: String },

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// SSRF blocked (URL resolves to private/reserved IP)
    #[error("SSRF blocked: {url}")]
    SsrfBlocked { url: String },

    /// Download too large
    #[error("Download too large: {size} bytes (max: {max_size} bytes)")]
    DownloadTooLarge { size: u64, max_size: u64 },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors, file sizes) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::IncorrectPassword => "Incorrect password".to_string(),
            Error::Load(_) => {
                "Failed to load PDF. Please ensure it's a valid PDF file.".to_string()
            }
            Error::Fill(FillError::NoForm) => "No PDF form loaded".to_string(),
            Error::Fill(_) => "Failed to fill form fields".to_string(),
            Error::Generate(GenerateError::NoDocument) => "No PDF document loaded".to_string(),
            Error::Generate(_) => "Failed to generate filled PDF".to_string(),
            Error::CacheKeyNotFound { .. } => "Cache key not found".to_string(),
            Error::SourceResolution { .. } => "Failed to resolve PDF source".to_string(),
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::HttpRequest(_) => "HTTP request failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::QpdfError { .. } => "PDF processing error".to_string(),
            Error::TaskJoin { .. } => "PDF processing error".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::SsrfBlocked { .. } => "URL not allowed".to_string(),
            Error::DownloadTooLarge { max_size, .. } => {
                format!("Download exceeds maximum size of {} bytes", max_size)
            }
        }
    }
}
