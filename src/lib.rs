//! PDF Form Bridge Library
//!
//! Maps a PDF's AcroForm to a flat list of [`FormField`]s, writes edited
//! values back and produces a flattened copy. The same bridge is exposed as
//! MCP tools:
//! - `extract_form_fields`: list the fields of one or more PDFs
//! - `fill_form`: fill, flatten and save or cache the result

pub mod error;
pub mod pdf;
pub mod server;
pub mod source;

pub use error::{Error, FillError, GenerateError, LoadError, Result};
pub use pdf::{
    DiagnosticAction, FieldDiagnostic, FieldKind, FieldValue, FormField, FormFieldBridge,
};
pub use server::{
    filled_file_name, run_server, run_server_with_config, run_server_with_dirs,
    ExtractFormFieldsParams, ExtractFormFieldsResult, FillFormParams, FillFormResult, FormServer,
    PdfSource, ServerConfig,
};
