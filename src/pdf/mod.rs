//! PDF form layer
//!
//! AcroForm access and flattening on top of lopdf, with qpdf used to
//! decrypt protected input.

pub mod acroform;
mod appearance;
mod bridge;
mod field;
mod flatten;
mod qpdf;

pub use bridge::FormFieldBridge;
pub use field::{
    format_label, placeholder_options, DiagnosticAction, FieldDiagnostic, FieldKind, FieldValue,
    FormField,
};
pub use flatten::{flatten, FlattenSummary};
pub use qpdf::QpdfWrapper;
