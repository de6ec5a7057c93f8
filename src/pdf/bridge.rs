//! FormFieldBridge: the owned handle between a PDF's AcroForm and a flat field list

use super::acroform::{self, FieldNode};
use super::field::{
    format_label, placeholder_options, FieldDiagnostic, FieldKind, FieldValue, FormField,
};
use super::flatten;
use super::qpdf::QpdfWrapper;
use crate::error::{Error, FillError, GenerateError, LoadError};
use lopdf::Document;

/// A parsed document and whether it carries an interactive form
#[derive(Debug)]
struct LoadedDocument {
    doc: Document,
    has_form: bool,
}

/// Owns at most one loaded document and translates its form to and from
/// [`FormField`] snapshots.
///
/// Every method takes `&mut self` or `&self`; one bridge serves one document
/// at a time and callers that need concurrency create one bridge per task.
#[derive(Debug, Default)]
pub struct FormFieldBridge {
    loaded: Option<LoadedDocument>,
}

impl FormFieldBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a document is currently loaded
    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Whether the loaded document has an AcroForm
    pub fn has_form(&self) -> bool {
        self.loaded.as_ref().is_some_and(|l| l.has_form)
    }

    /// Parse `bytes` and make it the current document.
    ///
    /// On failure the previously loaded document, if any, stays in place.
    pub fn load(&mut self, bytes: &[u8]) -> Result<(), LoadError> {
        self.load_with_password(bytes, None)
    }

    /// Like [`load`](Self::load), decrypting with `password` when the input is encrypted
    pub fn load_with_password(
        &mut self,
        bytes: &[u8],
        password: Option<&str>,
    ) -> Result<(), LoadError> {
        let doc = parse_document(bytes, password)?;
        let has_form = acroform::acroform(&doc).is_some();
        tracing::debug!(
            pages = doc.get_pages().len(),
            has_form,
            "PDF loaded into form bridge"
        );
        self.loaded = Some(LoadedDocument { doc, has_form });
        Ok(())
    }

    /// Snapshot every supported field of the loaded form.
    pub fn extract_fields(&self) -> Vec<FormField> {
        self.extract_fields_with_diagnostics().0
    }

    /// Snapshot the form and report fields that were skipped or defaulted.
    pub fn extract_fields_with_diagnostics(&self) -> (Vec<FormField>, Vec<FieldDiagnostic>) {
        let mut fields = Vec::new();
        let mut diagnostics = Vec::new();
        let Some(loaded) = self.loaded.as_ref().filter(|l| l.has_form) else {
            return (fields, diagnostics);
        };

        for (index, node) in acroform::terminal_fields(&loaded.doc).into_iter().enumerate() {
            let Some(kind) = node.kind else {
                diagnostics.push(FieldDiagnostic::skipped(
                    &node.name,
                    unsupported_reason(&node),
                ));
                continue;
            };

            let value = match acroform::read_value(&loaded.doc, &node, kind) {
                Ok(value) => value,
                Err(reason) => {
                    diagnostics.push(FieldDiagnostic::defaulted(&node.name, reason));
                    default_value(kind)
                }
            };
            let options = (kind == FieldKind::RadioButton)
                .then(|| placeholder_options(node.kid_count));

            fields.push(FormField {
                id: format!("field_{}", index),
                label: format_label(&node.name),
                name: node.name,
                kind,
                value,
                required: false,
                options,
            });
        }

        log_diagnostics("extract", &diagnostics);
        (fields, diagnostics)
    }

    /// Write values back into the loaded form.
    ///
    /// Per-field problems are absorbed; see
    /// [`fill_fields_with_diagnostics`](Self::fill_fields_with_diagnostics).
    pub fn fill_fields(&mut self, fields: &[FormField]) -> Result<(), FillError> {
        self.fill_fields_with_diagnostics(fields).map(|_| ())
    }

    /// Write values back and report every input that was not applied.
    pub fn fill_fields_with_diagnostics(
        &mut self,
        fields: &[FormField],
    ) -> Result<Vec<FieldDiagnostic>, FillError> {
        let loaded = self.loaded.as_mut().ok_or(FillError::NoForm)?;
        let doc = &mut loaded.doc;
        let mut diagnostics = Vec::new();

        let nodes = if loaded.has_form {
            acroform::terminal_fields(doc)
        } else {
            Vec::new()
        };

        let mut applied = 0usize;
        for input in fields {
            let Some(node) = nodes.iter().find(|n| n.name == input.name) else {
                diagnostics.push(FieldDiagnostic::skipped(&input.name, "no field with this name"));
                continue;
            };
            match apply(doc, node, input) {
                Ok(()) => applied += 1,
                Err(Outcome::Skipped(reason)) => {
                    diagnostics.push(FieldDiagnostic::skipped(&input.name, reason))
                }
                Err(Outcome::Broken(reason)) => {
                    tracing::warn!(field = %input.name, %reason, "fill aborted");
                    return Err(FillError::Internal { reason });
                }
            }
        }

        if loaded.has_form {
            acroform::with_acroform_mut(doc, |form| form.set("NeedAppearances", true));
        }

        tracing::debug!(
            requested = fields.len(),
            applied,
            skipped = diagnostics.len(),
            "form fields filled"
        );
        log_diagnostics("fill", &diagnostics);
        Ok(diagnostics)
    }

    /// Flatten the loaded form in place and serialize the document.
    ///
    /// Flattening is permanent for the loaded document: a later extraction
    /// finds no fields, and a second call serializes without flattening again.
    pub fn generate_output(&mut self) -> Result<Vec<u8>, GenerateError> {
        let loaded = self.loaded.as_mut().ok_or(GenerateError::NoDocument)?;

        if loaded.has_form {
            flatten::flatten(&mut loaded.doc)
                .map_err(|reason| GenerateError::SerializeFailed { reason })?;
        }

        // save_to allocates a cross-reference stream object in the document it writes
        let mut out = Vec::new();
        loaded
            .doc
            .clone()
            .save_to(&mut out)
            .map_err(|e| GenerateError::SerializeFailed {
                reason: e.to_string(),
            })?;
        Ok(out)
    }

    /// Number of pages in the loaded document, 0 when nothing is loaded
    pub fn page_count(&self) -> u32 {
        self.loaded
            .as_ref()
            .map(|l| l.doc.get_pages().len() as u32)
            .unwrap_or(0)
    }

    /// Drop the loaded document. Calling it with nothing loaded is fine.
    pub fn cleanup(&mut self) {
        if self.loaded.take().is_some() {
            tracing::debug!("form bridge document released");
        }
    }
}

/// Why one input was not applied
enum Outcome {
    /// Absorbed: recorded as a diagnostic
    Skipped(String),
    /// The document could not be written; aborts the fill pass
    Broken(String),
}

fn apply(doc: &mut Document, node: &FieldNode, input: &FormField) -> Result<(), Outcome> {
    let Some(kind) = node.kind else {
        return Err(Outcome::Skipped(unsupported_reason(node)));
    };

    match kind {
        FieldKind::Text => {
            let text = input.value.to_text();
            if let Some(max_len) = node.max_len {
                let len = text.chars().count();
                if max_len >= 0 && len > max_len as usize {
                    return Err(Outcome::Skipped(format!(
                        "value has {} characters, field allows {}",
                        len, max_len
                    )));
                }
            }
            acroform::write_text(doc, node, &text).map_err(Outcome::Broken)
        }
        FieldKind::Checkbox => {
            acroform::write_checked(doc, node, input.value.is_truthy()).map_err(Outcome::Broken)
        }
        FieldKind::Signature => Err(Outcome::Skipped(
            "signature fields cannot be filled".to_string(),
        )),
        FieldKind::RadioButton | FieldKind::PlainButton if input.kind != FieldKind::RadioButton => {
            Err(Outcome::Skipped(format!(
                "{} fields are only filled by radio inputs, got {}",
                kind.as_str(),
                input.kind.as_str()
            )))
        }
        _ if !input.value.is_truthy() => Err(Outcome::Skipped(
            "empty radio value leaves the selection unchanged".to_string(),
        )),
        FieldKind::RadioButton => {
            acroform::write_radio_selection(doc, node, &input.value).map_err(Outcome::Broken)
        }
        FieldKind::PlainButton => Err(Outcome::Skipped(
            "push buttons hold no selection".to_string(),
        )),
    }
}

fn unsupported_reason(node: &FieldNode) -> String {
    match node.field_type.as_deref() {
        Some(ft) => format!(
            "unsupported field type /{}",
            acroform::decode_name(ft)
        ),
        None => "field has no /FT".to_string(),
    }
}

fn default_value(kind: FieldKind) -> FieldValue {
    match kind {
        FieldKind::Checkbox => FieldValue::Bool(false),
        _ => FieldValue::Text(String::new()),
    }
}

fn log_diagnostics(pass: &str, diagnostics: &[FieldDiagnostic]) {
    for d in diagnostics {
        tracing::debug!(pass, field = %d.name, action = ?d.action, reason = %d.reason, "field diagnostic");
    }
}

/// Parse with lopdf, routing encrypted input through qpdf first
fn parse_document(bytes: &[u8], password: Option<&str>) -> Result<Document, LoadError> {
    match Document::load_mem(bytes) {
        Ok(doc) if !doc.trailer.has(b"Encrypt") => Ok(doc),
        Ok(_) => decrypt_and_parse(bytes, password),
        Err(e) => match QpdfWrapper::is_encrypted(bytes) {
            Ok(true) | Err(Error::IncorrectPassword) => decrypt_and_parse(bytes, password),
            _ => Err(LoadError::new(e.to_string())),
        },
    }
}

fn decrypt_and_parse(bytes: &[u8], password: Option<&str>) -> Result<Document, LoadError> {
    let decrypted = QpdfWrapper::decrypt(bytes, password).map_err(|e| match e {
        Error::IncorrectPassword if password.is_none() => {
            LoadError::new("document is password protected")
        }
        Error::IncorrectPassword => LoadError::new("incorrect password"),
        other => LoadError::new(format!("decryption failed: {}", other)),
    })?;
    Document::load_mem(&decrypted).map_err(|e| LoadError::new(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object, Stream};
    use pretty_assertions::assert_eq;

    /// One-page form: text `name` = "Hello", a choice field `pick`, checked
    /// checkbox `agree` and three-widget radio `color`
    fn form_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let content = doc.add_object(Stream::new(dictionary! {}, b"q Q\n".to_vec()));
        let page_id = doc.new_object_id();

        let text = doc.add_object(dictionary! {
            "Type" => "Annot", "Subtype" => "Widget", "FT" => "Tx",
            "T" => Object::string_literal("name"),
            "V" => Object::string_literal("Hello"),
            "DA" => Object::string_literal("/Helv 0 Tf 0 g"),
            "Rect" => vec![10.into(), 700.into(), 210.into(), 720.into()],
            "P" => Object::Reference(page_id),
        });
        let yes = doc.add_object(Stream::new(
            dictionary! { "Type" => "XObject", "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 12.into(), 12.into()] },
            b"0 0 m 12 12 l S\n".to_vec(),
        ));
        let checkbox = doc.add_object(dictionary! {
            "Type" => "Annot", "Subtype" => "Widget", "FT" => "Btn",
            "T" => Object::string_literal("agree"),
            "V" => "Yes", "AS" => "Yes",
            "Rect" => vec![10.into(), 650.into(), 22.into(), 662.into()],
            "AP" => dictionary! { "N" => dictionary! { "Yes" => Object::Reference(yes) } },
        });
        let radio_id = doc.new_object_id();
        let mut kids = Vec::new();
        for (i, state) in ["Red", "Green", "Blue"].iter().enumerate() {
            let x = 10 + 20 * i as i64;
            kids.push(Object::Reference(doc.add_object(dictionary! {
                "Type" => "Annot", "Subtype" => "Widget",
                "Parent" => Object::Reference(radio_id),
                "AS" => "Off",
                "Rect" => vec![x.into(), 600.into(), (x + 12).into(), 612.into()],
                "AP" => dictionary! { "N" => dictionary! {
                    *state => Object::Reference(yes),
                    "Off" => Object::Null,
                } },
            })));
        }
        doc.objects.insert(
            radio_id,
            Object::Dictionary(dictionary! {
                "FT" => "Btn", "Ff" => 1 << 15,
                "T" => Object::string_literal("color"),
                "Kids" => kids.clone(),
            }),
        );
        let choice = doc.add_object(dictionary! {
            "Type" => "Annot", "Subtype" => "Widget", "FT" => "Ch",
            "T" => Object::string_literal("pick"),
            "Rect" => vec![10.into(), 550.into(), 110.into(), 570.into()],
        });

        let mut annots = vec![
            Object::Reference(text),
            Object::Reference(checkbox),
            Object::Reference(choice),
        ];
        annots.extend(kids);
        doc.objects.insert(
            page_id,
            Object::Dictionary(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => Object::Reference(content),
                "Annots" => annots,
            }),
        );
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let form = doc.add_object(dictionary! {
            "Fields" => vec![
                Object::Reference(text),
                Object::Reference(choice),
                Object::Reference(checkbox),
                Object::Reference(radio_id),
            ],
        });
        let catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
            "AcroForm" => Object::Reference(form),
        });
        doc.trailer.set("Root", Object::Reference(catalog));

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn loaded() -> FormFieldBridge {
        let mut bridge = FormFieldBridge::new();
        bridge.load(&form_pdf()).unwrap();
        bridge
    }

    fn field<'a>(fields: &'a [FormField], name: &str) -> &'a FormField {
        fields.iter().find(|f| f.name == name).unwrap()
    }

    #[test]
    fn test_extract_fields() {
        let bridge = loaded();
        let (fields, diagnostics) = bridge.extract_fields_with_diagnostics();

        let ids: Vec<&str> = fields.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["field_0", "field_2", "field_3"]);

        let name = field(&fields, "name");
        assert_eq!(name.kind, FieldKind::Text);
        assert_eq!(name.value, FieldValue::from("Hello"));
        assert_eq!(name.label, "Name");

        assert_eq!(field(&fields, "agree").value, FieldValue::Bool(true));

        let color = field(&fields, "color");
        assert_eq!(color.kind, FieldKind::RadioButton);
        assert_eq!(color.value, FieldValue::from(""));
        assert_eq!(
            color.options.as_deref(),
            Some(&["Option 1".to_string(), "Option 2".to_string(), "Option 3".to_string()][..])
        );

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].name, "pick");
    }

    #[test]
    fn test_fill_unchecks_checkbox() {
        let mut bridge = loaded();
        bridge
            .fill_fields(&[FormField::new("agree", FieldKind::Checkbox, false)])
            .unwrap();
        let fields = bridge.extract_fields();
        assert_eq!(field(&fields, "agree").id, "field_2");
        assert_eq!(field(&fields, "agree").value, FieldValue::Bool(false));
    }

    #[test]
    fn test_fill_radio_by_placeholder() {
        let mut bridge = loaded();
        let diagnostics = bridge
            .fill_fields_with_diagnostics(&[FormField::new(
                "color",
                FieldKind::RadioButton,
                "Option 2",
            )])
            .unwrap();
        assert!(diagnostics.is_empty());
        let fields = bridge.extract_fields();
        assert_eq!(field(&fields, "color").value, FieldValue::from("selected"));
    }

    #[test]
    fn test_fill_reports_unknown_and_unsupported_fields() {
        let mut bridge = loaded();
        let diagnostics = bridge
            .fill_fields_with_diagnostics(&[
                FormField::new("missing", FieldKind::Text, "x"),
                FormField::new("pick", FieldKind::Text, "x"),
                FormField::new("color", FieldKind::Checkbox, "Option 1"),
            ])
            .unwrap();
        let names: Vec<&str> = diagnostics.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["missing", "pick", "color"]);

        let fields = bridge.extract_fields();
        assert_eq!(field(&fields, "color").value, FieldValue::from(""));
        assert_eq!(field(&fields, "agree").value, FieldValue::Bool(true));
        assert_eq!(field(&fields, "name").value, FieldValue::from("Hello"));
    }

    #[test]
    fn test_fill_follows_document_field_kind() {
        let mut bridge = loaded();
        let diagnostics = bridge
            .fill_fields_with_diagnostics(&[
                FormField::new("name", FieldKind::Checkbox, "Grace"),
                FormField::new("agree", FieldKind::Text, ""),
            ])
            .unwrap();
        assert!(diagnostics.is_empty());

        let fields = bridge.extract_fields();
        assert_eq!(field(&fields, "name").value, FieldValue::from("Grace"));
        assert_eq!(field(&fields, "agree").value, FieldValue::Bool(false));

        bridge
            .fill_fields(&[FormField::new("name", FieldKind::Text, true)])
            .unwrap();
        assert_eq!(field(&bridge.extract_fields(), "name").value, FieldValue::from("true"));
    }

    #[test]
    fn test_fill_sets_need_appearances() {
        let mut bridge = loaded();
        bridge
            .fill_fields(&[FormField::new("name", FieldKind::Text, "World")])
            .unwrap();
        let doc = &bridge.loaded.as_ref().unwrap().doc;
        assert!(acroform::acroform(doc).unwrap().has(b"NeedAppearances"));
    }

    #[test]
    fn test_load_failure_keeps_previous_document() {
        let mut bridge = loaded();
        assert!(bridge.load(b"%PDF-1.7 garbage").is_err());
        assert_eq!(bridge.page_count(), 1);
        assert_eq!(bridge.extract_fields().len(), 3);
    }

    #[test]
    fn test_generate_flattens_once() {
        let mut bridge = loaded();
        let first = bridge.generate_output().unwrap();
        assert!(first.starts_with(b"%PDF-"));
        assert!(bridge.extract_fields().is_empty());

        let second = bridge.generate_output().unwrap();
        assert_eq!(first, second);
        assert_eq!(bridge.generate_output().unwrap(), first);

        // the form dictionary survives with no fields, so filling stays a no-op
        let diagnostics = bridge
            .fill_fields_with_diagnostics(&[FormField::new("name", FieldKind::Text, "x")])
            .unwrap();
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_cleanup() {
        let mut bridge = loaded();
        bridge.cleanup();
        bridge.cleanup();
        assert!(!bridge.is_loaded());
        assert_eq!(bridge.page_count(), 0);
        assert!(bridge.extract_fields().is_empty());
        assert_eq!(bridge.fill_fields(&[]), Err(FillError::NoForm));
        assert_eq!(bridge.generate_output(), Err(GenerateError::NoDocument));
    }
}
