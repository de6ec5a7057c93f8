//! qpdf FFI wrapper used to strip encryption before parsing
//!
//! lopdf reads the object graph but leaves encrypted strings and streams
//! undecoded, so encrypted input is rewritten through qpdf first.

use crate::error::{Error, Result};
use qpdf::QPdf;

/// Wrapper for qpdf operations via FFI
pub struct QpdfWrapper;

/// Helper: open a QPdf from memory, optionally with password
fn open_qpdf(data: &[u8], password: Option<&str>) -> Result<QPdf> {
    match password {
        Some(pwd) => QPdf::read_from_memory_encrypted(data, pwd).map_err(map_qpdf_error),
        None => QPdf::read_from_memory(data).map_err(map_qpdf_error),
    }
}

/// Map qpdf crate errors to our error types
fn map_qpdf_error(e: qpdf::QPdfError) -> Error {
    match e.error_code() {
        qpdf::QPdfErrorCode::InvalidPassword => Error::IncorrectPassword,
        _ => Error::QpdfError {
            reason: e.to_string(),
        },
    }
}

impl QpdfWrapper {
    /// Decrypt a PDF (remove password protection)
    ///
    /// Without a password the empty user password is tried, which opens
    /// documents that are only owner-protected.
    pub fn decrypt(input_data: &[u8], password: Option<&str>) -> Result<Vec<u8>> {
        let qpdf = open_qpdf(input_data, Some(password.unwrap_or("")))?;

        let mut writer = qpdf.writer();
        writer
            .preserve_encryption(false)
            .preserve_unreferenced_objects(false);
        writer.write_to_memory().map_err(map_qpdf_error)
    }

    /// Whether qpdf sees an encryption dictionary in the input
    pub fn is_encrypted(input_data: &[u8]) -> Result<bool> {
        let qpdf = open_qpdf(input_data, None)?;
        Ok(qpdf.is_encrypted())
    }
}
