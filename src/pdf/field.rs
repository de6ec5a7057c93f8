//! Flat, UI-facing form field model

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Field flag bit 16: mutually exclusive radio behaviour on button fields
pub const FF_RADIO: i64 = 1 << 15;
/// Field flag bit 17: push button without a persistent value
pub const FF_PUSHBUTTON: i64 = 1 << 16;

/// Widget kind, decided once when a field is first inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Checkbox,
    #[serde(rename = "radio")]
    RadioButton,
    #[serde(rename = "button")]
    PlainButton,
    Signature,
}

impl FieldKind {
    /// Classify a terminal field from its (inherited) `/FT` name and `/Ff` flags.
    ///
    /// Returns `None` for kinds without a renderer (choice fields, unknown or
    /// missing field types).
    pub fn classify(field_type: Option<&[u8]>, flags: i64) -> Option<Self> {
        match field_type? {
            b"Tx" => Some(FieldKind::Text),
            b"Btn" => {
                if flags & (FF_RADIO | FF_PUSHBUTTON) == 0 {
                    Some(FieldKind::Checkbox)
                } else if flags & FF_RADIO != 0 {
                    Some(FieldKind::RadioButton)
                } else {
                    Some(FieldKind::PlainButton)
                }
            }
            b"Sig" => Some(FieldKind::Signature),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Checkbox => "checkbox",
            FieldKind::RadioButton => "radio",
            FieldKind::PlainButton => "button",
            FieldKind::Signature => "signature",
        }
    }
}

/// Current value of a field: string for text-like kinds, boolean for checkboxes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
}

impl FieldValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Bool(b) => *b,
            FieldValue::Text(s) => !s.is_empty(),
        }
    }

    /// String form used when writing into a text field
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Bool(_) => None,
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::Text(String::new())
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// Snapshot of one document field, detached from the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FormField {
    /// Positional key (`field_<index>`), unique within one extraction
    #[serde(default)]
    pub id: String,
    /// Fully qualified field name
    pub name: String,
    /// Classified widget kind
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Human-readable label derived from the name
    #[serde(default)]
    pub label: String,
    /// Current value
    #[serde(default)]
    pub value: FieldValue,
    /// Always false
    #[serde(default)]
    pub required: bool,
    /// Placeholder option labels, radio fields only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl FormField {
    /// Build a field input for filling, deriving id and label the way extraction does.
    pub fn new(name: impl Into<String>, kind: FieldKind, value: impl Into<FieldValue>) -> Self {
        let name = name.into();
        Self {
            id: String::new(),
            label: format_label(&name),
            name,
            kind,
            value: value.into(),
            required: false,
            options: None,
        }
    }
}

/// Derive a display label from a field name.
///
/// Every ASCII uppercase letter gets a preceding space, then the first
/// character is uppercased, underscores become spaces and the result is
/// trimmed. Runs of capitals are split letter by letter.
pub fn format_label(name: &str) -> String {
    let mut spaced = String::with_capacity(name.len() + 8);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            spaced.push(' ');
        }
        spaced.push(c);
    }

    let mut chars = spaced.chars();
    let capitalized: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };

    capitalized.replace('_', " ").trim().to_string()
}

/// Placeholder labels `Option 1..=count` for radio groups
pub fn placeholder_options(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("Option {}", i)).collect()
}

/// What happened to a field the bridge could not handle normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticAction {
    /// The field was left out of the result or left untouched
    Skipped,
    /// A value could not be read and the kind's default was used
    Defaulted,
}

/// A per-field anomaly absorbed during extraction or filling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct FieldDiagnostic {
    /// Field name
    pub name: String,
    pub action: DiagnosticAction,
    /// Why the field was skipped or defaulted
    pub reason: String,
}

impl FieldDiagnostic {
    pub(crate) fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: DiagnosticAction::Skipped,
            reason: reason.into(),
        }
    }

    pub(crate) fn defaulted(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: DiagnosticAction::Defaulted,
            reason: reason.into(),
        }
    }
}
