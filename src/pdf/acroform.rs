//! AcroForm field tree access on top of lopdf
//!
//! Fields are reached from the catalog's `/AcroForm /Fields` array. A node
//! whose `/Kids` carry their own `/T` is a non-terminal field; anything else
//! is terminal and its kids (or the node itself) are its widgets.

use super::field::{FieldKind, FieldValue};
use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::HashSet;

/// Field trees deeper than this are treated as malformed
const MAX_FIELD_DEPTH: usize = 32;
/// Reference chains longer than this are treated as cycles
const MAX_REFERENCE_HOPS: usize = 16;

/// Name of the "unchecked" appearance state
pub const OFF_STATE: &[u8] = b"Off";
/// On-state used for buttons that carry no appearance dictionary
const DEFAULT_ON_STATE: &[u8] = b"Yes";

/// Attributes a field inherits from its ancestors
#[derive(Debug, Clone, Default)]
struct Inherited {
    field_type: Option<Vec<u8>>,
    flags: Option<i64>,
    value: Option<Object>,
    default_appearance: Option<Vec<u8>>,
    quadding: Option<i64>,
    max_len: Option<i64>,
}

impl Inherited {
    fn overlay(&self, doc: &Document, dict: &Dictionary) -> Self {
        let own = |key: &[u8]| dict.get(key).ok().and_then(|o| resolve(doc, o));
        Self {
            field_type: own(b"FT")
                .and_then(|o| o.as_name().ok())
                .map(<[u8]>::to_vec)
                .or_else(|| self.field_type.clone()),
            flags: own(b"Ff").and_then(|o| o.as_i64().ok()).or(self.flags),
            value: own(b"V").cloned().or_else(|| self.value.clone()),
            default_appearance: own(b"DA")
                .and_then(string_bytes)
                .map(<[u8]>::to_vec)
                .or_else(|| self.default_appearance.clone()),
            quadding: own(b"Q").and_then(|o| o.as_i64().ok()).or(self.quadding),
            max_len: own(b"MaxLen")
                .and_then(|o| o.as_i64().ok())
                .or(self.max_len),
        }
    }
}

/// A terminal field of the form, with everything needed to read or write it
#[derive(Debug, Clone)]
pub struct FieldNode {
    /// Object carrying the field's `/V`
    pub id: ObjectId,
    /// Fully qualified name
    pub name: String,
    /// Classified kind; `None` for kinds the bridge does not surface
    pub kind: Option<FieldKind>,
    /// Raw (inherited) `/FT`
    pub field_type: Option<Vec<u8>>,
    pub flags: i64,
    /// Widget annotations; the field itself when it has no kids
    pub widgets: Vec<ObjectId>,
    /// Number of entries in the field's own `/Kids`
    pub kid_count: usize,
    pub value: Option<Object>,
    pub default_appearance: Option<Vec<u8>>,
    pub quadding: i64,
    pub max_len: Option<i64>,
}

/// Follow indirect references until a direct object is reached
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    let mut current = obj;
    for _ in 0..MAX_REFERENCE_HOPS {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

/// Look up `key` in `dict`, following references
pub fn dict_get<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|o| resolve(doc, o))
}

fn object_kind(obj: &Object) -> &'static str {
    match obj {
        Object::Null => "null",
        Object::Boolean(_) => "boolean",
        Object::Integer(_) => "integer",
        Object::Real(_) => "real",
        Object::Name(_) => "name",
        Object::String(..) => "string",
        Object::Array(_) => "array",
        Object::Dictionary(_) => "dictionary",
        Object::Stream(_) => "stream",
        Object::Reference(_) => "reference",
    }
}

pub fn string_bytes(obj: &Object) -> Option<&[u8]> {
    match obj {
        Object::String(bytes, _) => Some(bytes),
        _ => None,
    }
}

fn catalog(doc: &Document) -> Option<&Dictionary> {
    let root = doc.trailer.get(b"Root").ok()?;
    resolve(doc, root)?.as_dict().ok()
}

/// The document's interactive form dictionary, if any
pub fn acroform(doc: &Document) -> Option<&Dictionary> {
    let catalog = catalog(doc)?;
    dict_get(doc, catalog, b"AcroForm")?.as_dict().ok()
}

/// Run `f` against the AcroForm dictionary, wherever it lives
pub fn with_acroform_mut<R>(
    doc: &mut Document,
    f: impl FnOnce(&mut Dictionary) -> R,
) -> Option<R> {
    let root_id = doc.trailer.get(b"Root").ok()?.as_reference().ok()?;
    let form_ref = doc
        .get_object(root_id)
        .ok()?
        .as_dict()
        .ok()?
        .get(b"AcroForm")
        .ok()?
        .as_reference()
        .ok();

    let form = match form_ref {
        Some(id) => doc.get_object_mut(id).ok()?.as_dict_mut().ok()?,
        None => doc
            .get_object_mut(root_id)
            .ok()?
            .as_dict_mut()
            .ok()?
            .get_mut(b"AcroForm")
            .ok()?
            .as_dict_mut()
            .ok()?,
    };
    Some(f(form))
}

fn field_dict(doc: &Document, id: ObjectId) -> Option<&Dictionary> {
    doc.get_object(id).ok()?.as_dict().ok()
}

fn kid_ids(doc: &Document, dict: &Dictionary) -> Vec<ObjectId> {
    dict_get(doc, dict, b"Kids")
        .and_then(|o| o.as_array().ok())
        .map(|kids| {
            kids.iter()
                .filter_map(|k| k.as_reference().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Enumerate terminal fields in document order (depth-first over `/Fields`)
pub fn terminal_fields(doc: &Document) -> Vec<FieldNode> {
    let mut out = Vec::new();
    let Some(form) = acroform(doc) else {
        return out;
    };
    let Some(roots) = dict_get(doc, form, b"Fields").and_then(|o| o.as_array().ok()) else {
        return out;
    };

    let mut visited = HashSet::new();
    for root in roots {
        match root.as_reference() {
            Ok(id) => collect(doc, id, None, &Inherited::default(), 0, &mut visited, &mut out),
            Err(_) => tracing::debug!("ignoring direct (non-indirect) entry in /Fields"),
        }
    }
    out
}

fn collect(
    doc: &Document,
    id: ObjectId,
    parent_name: Option<&str>,
    inherited: &Inherited,
    depth: usize,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<FieldNode>,
) {
    if depth > MAX_FIELD_DEPTH || !visited.insert(id) {
        tracing::debug!(?id, depth, "field tree cycle or excessive depth");
        return;
    }
    let Some(dict) = field_dict(doc, id) else {
        return;
    };

    let partial = dict_get(doc, dict, b"T")
        .and_then(string_bytes)
        .map(decode_text_string);
    let name = match (parent_name, partial) {
        (Some(parent), Some(partial)) => format!("{}.{}", parent, partial),
        (None, Some(partial)) => partial,
        (Some(parent), None) => parent.to_string(),
        (None, None) => String::new(),
    };
    let attrs = inherited.overlay(doc, dict);

    let kids = kid_ids(doc, dict);
    let field_kids: Vec<ObjectId> = kids
        .iter()
        .copied()
        .filter(|kid| field_dict(doc, *kid).is_some_and(|d| d.has(b"T")))
        .collect();

    if !field_kids.is_empty() {
        let prefix = (!name.is_empty()).then_some(name.as_str());
        for kid in field_kids {
            collect(doc, kid, prefix, &attrs, depth + 1, visited, out);
        }
        return;
    }

    let flags = attrs.flags.unwrap_or(0);
    let widgets = if kids.is_empty() { vec![id] } else { kids.clone() };
    out.push(FieldNode {
        id,
        kind: FieldKind::classify(attrs.field_type.as_deref(), flags),
        field_type: attrs.field_type,
        name,
        flags,
        widgets,
        kid_count: kids.len(),
        value: attrs.value,
        default_appearance: attrs.default_appearance,
        quadding: attrs.quadding.unwrap_or(0),
        max_len: attrs.max_len,
    });
}

/// Find the first terminal field with exactly this fully qualified name
#[cfg(test)]
pub(crate) fn find_field(doc: &Document, name: &str) -> Option<FieldNode> {
    terminal_fields(doc).into_iter().find(|f| f.name == name)
}

// ============================================================================
// Reading values
// ============================================================================

/// Read a field's current value in the shape its kind expects.
///
/// `Err` carries the reason a value could not be read; the caller falls back
/// to the kind's default.
pub fn read_value(doc: &Document, node: &FieldNode, kind: FieldKind) -> Result<FieldValue, String> {
    match kind {
        FieldKind::Text => read_text(doc, node).map(FieldValue::Text),
        FieldKind::Checkbox => Ok(FieldValue::Bool(is_on(doc, node))),
        FieldKind::RadioButton => Ok(FieldValue::Text(if is_on(doc, node) {
            "selected".to_string()
        } else {
            String::new()
        })),
        FieldKind::PlainButton | FieldKind::Signature => Ok(FieldValue::Text(String::new())),
    }
}

fn read_text(doc: &Document, node: &FieldNode) -> Result<String, String> {
    let Some(value) = node.value.as_ref() else {
        return Ok(String::new());
    };
    match resolve(doc, value) {
        Some(Object::String(bytes, _)) => Ok(decode_text_string(bytes)),
        Some(Object::Stream(stream)) => stream
            .decompressed_content()
            .or_else(|_| Ok::<_, lopdf::Error>(stream.content.clone()))
            .map(|bytes| decode_text_string(&bytes))
            .map_err(|e| e.to_string()),
        Some(Object::Null) | None => Ok(String::new()),
        Some(other) => Err(format!(
            "unexpected /V type {} for text field",
            object_kind(other)
        )),
    }
}

/// Selected state name of a button field: `/V`, else the first widget `/AS`
fn selected_state(doc: &Document, node: &FieldNode) -> Option<Vec<u8>> {
    if let Some(Object::Name(name)) = node.value.as_ref().and_then(|v| resolve(doc, v)) {
        return Some(name.clone());
    }
    node.widgets.iter().find_map(|w| {
        let dict = field_dict(doc, *w)?;
        match dict_get(doc, dict, b"AS")? {
            Object::Name(name) if name.as_slice() != OFF_STATE => Some(name.clone()),
            _ => None,
        }
    })
}

fn is_on(doc: &Document, node: &FieldNode) -> bool {
    selected_state(doc, node).is_some_and(|state| state.as_slice() != OFF_STATE)
}

/// The non-`Off` appearance state of a button widget
pub fn on_state(doc: &Document, widget: ObjectId) -> Option<Vec<u8>> {
    let dict = field_dict(doc, widget)?;
    let ap = dict_get(doc, dict, b"AP")?.as_dict().ok()?;
    for key in [b"N".as_slice(), b"D".as_slice()] {
        if let Some(states) = dict_get(doc, ap, key).and_then(|o| o.as_dict().ok()) {
            if let Some((name, _)) = states.iter().find(|(k, _)| k.as_slice() != OFF_STATE) {
                return Some(name.clone());
            }
        }
    }
    None
}

// ============================================================================
// Writing values
// ============================================================================

fn set_on_object(doc: &mut Document, id: ObjectId, key: &str, value: Object) -> Result<(), String> {
    let dict = doc
        .get_object_mut(id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| format!("object {:?} is not writable: {}", id, e))?;
    dict.set(key, value);
    Ok(())
}

/// Store `text` as the field's `/V`
pub fn write_text(doc: &mut Document, node: &FieldNode, text: &str) -> Result<(), String> {
    set_on_object(doc, node.id, "V", encode_text_string(text))
}

/// Check or uncheck every widget of a checkbox
pub fn write_checked(doc: &mut Document, node: &FieldNode, checked: bool) -> Result<(), String> {
    let states: Vec<(ObjectId, Vec<u8>)> = node
        .widgets
        .iter()
        .map(|w| {
            let on = on_state(doc, *w).unwrap_or_else(|| DEFAULT_ON_STATE.to_vec());
            (*w, on)
        })
        .collect();

    let value = match (checked, states.first()) {
        (true, Some((_, on))) => on.clone(),
        (true, None) => DEFAULT_ON_STATE.to_vec(),
        (false, _) => OFF_STATE.to_vec(),
    };
    set_on_object(doc, node.id, "V", Object::Name(value))?;

    for (widget, on) in states {
        let appearance = if checked { on } else { OFF_STATE.to_vec() };
        set_on_object(doc, widget, "AS", Object::Name(appearance))?;
    }
    Ok(())
}

/// Select one widget of a radio group.
///
/// The target is, in order: the widget whose export value equals `value`,
/// the widget named by a placeholder label `Option k`, the current selection,
/// or the first widget.
pub fn write_radio_selection(
    doc: &mut Document,
    node: &FieldNode,
    value: &FieldValue,
) -> Result<(), String> {
    if node.widgets.is_empty() {
        return Err("radio group has no widgets".to_string());
    }
    let states: Vec<Vec<u8>> = node
        .widgets
        .iter()
        .enumerate()
        .map(|(i, w)| on_state(doc, *w).unwrap_or_else(|| (i + 1).to_string().into_bytes()))
        .collect();

    let requested = value.as_str().unwrap_or_default();
    let by_export = states
        .iter()
        .position(|s| decode_name(s) == requested && !requested.is_empty());
    let by_placeholder = requested
        .strip_prefix("Option ")
        .and_then(|n| n.trim().parse::<usize>().ok())
        .filter(|n| (1..=states.len()).contains(n))
        .map(|n| n - 1);

    let target = match by_export.or(by_placeholder) {
        Some(index) => states[index].clone(),
        None => match selected_state(doc, node) {
            Some(current) if current.as_slice() != OFF_STATE => current,
            _ => states[0].clone(),
        },
    };

    set_on_object(doc, node.id, "V", Object::Name(target.clone()))?;
    for (widget, on) in node.widgets.iter().zip(states) {
        let appearance = if on == target { on } else { OFF_STATE.to_vec() };
        set_on_object(doc, *widget, "AS", Object::Name(appearance))?;
    }
    Ok(())
}

// ============================================================================
// Text strings
// ============================================================================

/// PDFDocEncoding code points 0x80..=0xA0 that differ from Latin-1
const PDF_DOC_HIGH: [u32; 33] = [
    0x2022, 0x2020, 0x2021, 0x2026, 0x2014, 0x2013, 0x0192, 0x2044, 0x2039, 0x203A, 0x2212,
    0x2030, 0x201E, 0x201C, 0x201D, 0x2018, 0x2019, 0x201A, 0x2122, 0xFB01, 0xFB02, 0x0141,
    0x0152, 0x0160, 0x0178, 0x017D, 0x0131, 0x0142, 0x0153, 0x0161, 0x017E, 0xFFFD, 0x20AC,
];

/// Decode a PDF text string (UTF-16BE with BOM, UTF-8 with BOM, or PDFDocEncoding)
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(body) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(body).into_owned();
    }
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0xA0 => char::from_u32(PDF_DOC_HIGH[(b - 0x80) as usize]).unwrap_or('\u{FFFD}'),
            _ => b as char,
        })
        .collect()
}

/// Encode a text string, as PDFDocEncoding when possible, else UTF-16BE
pub fn encode_text_string(text: &str) -> Object {
    let single_byte = text
        .chars()
        .all(|c| matches!(c as u32, 0x09 | 0x0A | 0x0D | 0x20..=0x7E | 0xA1..=0xFF));
    if single_byte {
        return Object::String(text.chars().map(|c| c as u8).collect(), StringFormat::Literal);
    }

    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Names may carry `#xx` escapes already decoded by the parser; treat them as UTF-8
pub fn decode_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}
