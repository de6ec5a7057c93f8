//! Flattening: paint widget appearances into page content, then drop the form
//!
//! Text fields get a fresh appearance generated from their current value so
//! that what is painted always matches what was filled. Buttons paint the
//! appearance selected by `/AS`. Everything else paints whatever normal
//! appearance it already carries.

use super::acroform::{self, dict_get, resolve, FieldNode, OFF_STATE};
use super::appearance::{self, num, DefaultAppearance, TextLayout};
use super::field::FieldKind;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Annotation flag bit 2
const ANNOT_HIDDEN: i64 = 1 << 1;
/// Annotation flag bit 6
const ANNOT_NO_VIEW: i64 = 1 << 5;
const MAX_PARENT_DEPTH: usize = 32;
const XOBJECT_PREFIX: &str = "FlatW";
const IDENTITY: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Outcome of a flatten pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlattenSummary {
    /// Widgets whose appearance was painted onto a page
    pub painted: usize,
    /// Widget annotations removed from the document
    pub removed: usize,
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    llx: f32,
    lly: f32,
    urx: f32,
    ury: f32,
}

impl Rect {
    fn from_numbers(v: &[f32]) -> Option<Self> {
        let [x1, y1, x2, y2] = <[f32; 4]>::try_from(v).ok()?;
        Some(Self {
            llx: x1.min(x2),
            lly: y1.min(y2),
            urx: x1.max(x2),
            ury: y1.max(y2),
        })
    }

    fn width(&self) -> f32 {
        self.urx - self.llx
    }

    fn height(&self) -> f32 {
        self.ury - self.lly
    }
}

/// A form XObject and the matrix that maps it onto its widget rectangle
#[derive(Debug, Clone, Copy)]
struct Placement {
    stream: ObjectId,
    matrix: [f32; 6],
}

/// Font resources handed to generated text appearances
#[derive(Default)]
struct FontResolver {
    helvetica: Option<ObjectId>,
}

impl FontResolver {
    /// The `/DR` font registered under `name`, else a shared Helvetica
    fn resolve(&mut self, doc: &mut Document, name: &str) -> Object {
        let from_dr = acroform::acroform(doc)
            .and_then(|form| dict_get(doc, form, b"DR"))
            .and_then(|dr| dr.as_dict().ok())
            .and_then(|dr| dict_get(doc, dr, b"Font"))
            .and_then(|fonts| fonts.as_dict().ok())
            .and_then(|fonts| fonts.get(name.as_bytes()).ok())
            .cloned();
        if let Some(font) = from_dr {
            return font;
        }

        let id = *self.helvetica.get_or_insert_with(|| {
            doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
                "Encoding" => "WinAnsiEncoding",
            })
        });
        Object::Reference(id)
    }
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn numbers(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<Vec<f32>> {
    dict_get(doc, dict, key)?
        .as_array()
        .ok()?
        .iter()
        .map(|o| resolve(doc, o).and_then(number))
        .collect()
}

fn widget_dict(doc: &Document, widget: ObjectId) -> Result<&Dictionary, String> {
    doc.get_object(widget)
        .and_then(Object::as_dict)
        .map_err(|e| format!("widget {:?} unreadable: {}", widget, e))
}

/// Flatten every field of the form in place.
///
/// Afterwards the document has no widget annotations for its fields, an empty
/// `/Fields` array and no `/NeedAppearances`; unreferenced field objects are
/// pruned. A document without an AcroForm is left untouched.
pub fn flatten(doc: &mut Document) -> Result<FlattenSummary, String> {
    if acroform::acroform(doc).is_none() {
        return Ok(FlattenSummary::default());
    }

    let nodes = acroform::terminal_fields(doc);
    let pages = widget_pages(doc);
    let mut fonts = FontResolver::default();
    let mut per_page: BTreeMap<ObjectId, Vec<Placement>> = BTreeMap::new();
    let mut removed: HashSet<ObjectId> = HashSet::new();

    for node in &nodes {
        for &widget in &node.widgets {
            removed.insert(widget);
            let Some(&page) = pages.get(&widget) else {
                continue;
            };
            if is_hidden(doc, widget) {
                continue;
            }
            match widget_appearance(doc, node, widget, &mut fonts) {
                Ok(Some(placement)) => per_page.entry(page).or_default().push(placement),
                Ok(None) => {}
                Err(reason) => {
                    tracing::debug!(field = %node.name, %reason, "widget left unpainted")
                }
            }
        }
    }

    let mut summary = FlattenSummary {
        painted: 0,
        removed: removed.len(),
    };
    let mut counter = 0;
    for (page, placements) in per_page {
        paint_page(doc, page, &placements, &mut counter)?;
        summary.painted += placements.len();
    }

    strip_widgets(doc, &removed)?;
    acroform::with_acroform_mut(doc, |form| {
        form.set("Fields", Vec::<Object>::new());
        form.remove(b"NeedAppearances");
    });
    doc.prune_objects();

    tracing::debug!(
        painted = summary.painted,
        removed = summary.removed,
        "form flattened"
    );
    Ok(summary)
}

fn is_hidden(doc: &Document, widget: ObjectId) -> bool {
    widget_dict(doc, widget)
        .ok()
        .and_then(|dict| dict_get(doc, dict, b"F"))
        .and_then(|f| f.as_i64().ok())
        .is_some_and(|flags| flags & (ANNOT_HIDDEN | ANNOT_NO_VIEW) != 0)
}

fn widget_appearance(
    doc: &mut Document,
    node: &FieldNode,
    widget: ObjectId,
    fonts: &mut FontResolver,
) -> Result<Option<Placement>, String> {
    let rect = {
        let dict = widget_dict(doc, widget)?;
        numbers(doc, dict, b"Rect")
            .and_then(|v| Rect::from_numbers(&v))
            .ok_or_else(|| "widget has no usable /Rect".to_string())?
    };

    let stream = match node.kind {
        Some(FieldKind::Text) => text_appearance(doc, node, widget, rect, fonts)?,
        Some(kind @ (FieldKind::Checkbox | FieldKind::RadioButton)) => {
            button_appearance(doc, widget, kind, rect)?
        }
        _ => existing_appearance(doc, widget)?,
    };
    Ok(stream.and_then(|id| placement(doc, id, rect)))
}

fn text_appearance(
    doc: &mut Document,
    node: &FieldNode,
    widget: ObjectId,
    rect: Rect,
    fonts: &mut FontResolver,
) -> Result<Option<ObjectId>, String> {
    let text = acroform::read_value(doc, node, FieldKind::Text)
        .map(|v| v.to_text())
        .unwrap_or_default();
    let da = node
        .default_appearance
        .clone()
        .or_else(|| {
            acroform::acroform(doc)
                .and_then(|form| dict_get(doc, form, b"DA"))
                .and_then(acroform::string_bytes)
                .map(<[u8]>::to_vec)
        })
        .map(|bytes| DefaultAppearance::parse(&bytes))
        .unwrap_or_default();

    let (width, height) = (rect.width(), rect.height());
    let mut content = frame_ops(doc, widget, width, height);
    if text.is_empty() && content.is_empty() {
        return Ok(None);
    }
    if !text.is_empty() {
        let layout = TextLayout {
            text: &text,
            appearance: da.clone(),
            width,
            height,
            quadding: node.quadding,
            flags: node.flags,
            max_len: node.max_len,
        };
        content.extend(layout.content());
    }

    let font = fonts.resolve(doc, &da.font);
    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => form_bbox(width, height),
            "Resources" => dictionary! {
                "Font" => dictionary! { da.font.as_str() => font },
            },
        },
        content,
    );
    Ok(Some(doc.add_object(stream)))
}

fn form_bbox(width: f32, height: f32) -> Vec<Object> {
    vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(width),
        Object::Real(height),
    ]
}

/// `/MK` background and border, painted under generated text
fn frame_ops(doc: &Document, widget: ObjectId, width: f32, height: f32) -> Vec<u8> {
    let Ok(dict) = widget_dict(doc, widget) else {
        return Vec::new();
    };
    let Some(mk) = dict_get(doc, dict, b"MK").and_then(|o| o.as_dict().ok()) else {
        return Vec::new();
    };
    let background = numbers(doc, mk, b"BG");
    let border = numbers(doc, mk, b"BC");
    let border_width = dict_get(doc, dict, b"BS")
        .and_then(|bs| bs.as_dict().ok())
        .and_then(|bs| dict_get(doc, bs, b"W"))
        .and_then(number)
        .unwrap_or(1.0);
    appearance::frame(
        width,
        height,
        background.as_deref(),
        border.as_deref(),
        border_width,
    )
}

fn button_appearance(
    doc: &mut Document,
    widget: ObjectId,
    kind: FieldKind,
    rect: Rect,
) -> Result<Option<ObjectId>, String> {
    if let Some(id) = existing_appearance(doc, widget)? {
        return Ok(Some(id));
    }
    let is_on = {
        let dict = widget_dict(doc, widget)?;
        dict_get(doc, dict, b"AS")
            .and_then(|o| o.as_name().ok())
            .is_some_and(|state| state != OFF_STATE)
    };
    if !is_on {
        return Ok(None);
    }

    let (width, height) = (rect.width(), rect.height());
    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => form_bbox(width, height),
        },
        appearance::button_mark(kind, width, height),
    );
    Ok(Some(doc.add_object(stream)))
}

enum Found {
    Indirect(ObjectId),
    Direct(Stream),
}

/// The widget's normal appearance stream for its current `/AS`
fn existing_appearance(doc: &mut Document, widget: ObjectId) -> Result<Option<ObjectId>, String> {
    let found = {
        let dict = widget_dict(doc, widget)?;
        let normal = dict_get(doc, dict, b"AP")
            .and_then(|ap| ap.as_dict().ok())
            .and_then(|ap| ap.get(b"N").ok());
        let state = dict_get(doc, dict, b"AS").and_then(|o| o.as_name().ok());

        let chosen = normal.and_then(|normal| match resolve(doc, normal) {
            Some(Object::Stream(_)) => Some(normal),
            Some(Object::Dictionary(states)) => state.and_then(|s| states.get(s).ok()),
            _ => None,
        });
        match chosen {
            Some(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Stream(_)) => Some(Found::Indirect(*id)),
                _ => None,
            },
            Some(Object::Stream(stream)) => Some(Found::Direct(stream.clone())),
            _ => None,
        }
    };

    Ok(match found {
        Some(Found::Indirect(id)) => Some(id),
        Some(Found::Direct(stream)) => Some(doc.add_object(stream)),
        None => None,
    })
}

/// Map the appearance's transformed `/BBox` onto the widget rectangle
fn placement(doc: &Document, stream: ObjectId, rect: Rect) -> Option<Placement> {
    let dict = &doc.get_object(stream).ok()?.as_stream().ok()?.dict;
    let bbox = numbers(doc, dict, b"BBox").and_then(|v| Rect::from_numbers(&v))?;
    let m = numbers(doc, dict, b"Matrix")
        .and_then(|v| <[f32; 6]>::try_from(v.as_slice()).ok())
        .unwrap_or(IDENTITY);

    let corners = [
        (bbox.llx, bbox.lly),
        (bbox.llx, bbox.ury),
        (bbox.urx, bbox.lly),
        (bbox.urx, bbox.ury),
    ]
    .map(|(x, y)| (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5]));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

    let (tw, th) = (max_x - min_x, max_y - min_y);
    if tw <= 0.0 || th <= 0.0 || rect.width() <= 0.0 || rect.height() <= 0.0 {
        return None;
    }
    let sx = rect.width() / tw;
    let sy = rect.height() / th;
    Some(Placement {
        stream,
        matrix: [sx, 0.0, 0.0, sy, rect.llx - min_x * sx, rect.lly - min_y * sy],
    })
}

// ============================================================================
// Page plumbing
// ============================================================================

fn annot_refs(doc: &Document, page: ObjectId) -> Vec<Object> {
    doc.get_object(page)
        .and_then(Object::as_dict)
        .ok()
        .and_then(|dict| dict_get(doc, dict, b"Annots"))
        .and_then(|annots| annots.as_array().ok())
        .cloned()
        .unwrap_or_default()
}

/// Widget annotation id to the page listing it in `/Annots`
fn widget_pages(doc: &Document) -> HashMap<ObjectId, ObjectId> {
    let mut map = HashMap::new();
    for (_, page) in doc.get_pages() {
        for annot in annot_refs(doc, page) {
            if let Ok(id) = annot.as_reference() {
                map.entry(id).or_insert(page);
            }
        }
    }
    map
}

/// Resources in effect for a page, including ones inherited from the page tree
fn effective_resources(doc: &Document, page: ObjectId) -> Dictionary {
    let mut current = Some(page);
    for _ in 0..MAX_PARENT_DEPTH {
        let Some(dict) = current
            .and_then(|id| doc.get_object(id).ok())
            .and_then(|o| o.as_dict().ok())
        else {
            break;
        };
        if let Some(resources) = dict_get(doc, dict, b"Resources").and_then(|o| o.as_dict().ok()) {
            return resources.clone();
        }
        current = dict.get(b"Parent").ok().and_then(|p| p.as_reference().ok());
    }
    Dictionary::new()
}

fn content_refs(doc: &Document, page: &Dictionary) -> Vec<Object> {
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => vec![Object::Reference(*id)],
            Err(_) => Vec::new(),
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Wrap the page's content in `q ... Q` and append the widget paints
fn paint_page(
    doc: &mut Document,
    page: ObjectId,
    placements: &[Placement],
    counter: &mut usize,
) -> Result<(), String> {
    let mut resources = effective_resources(doc, page);
    let mut xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_default();

    let mut ops = String::from("Q\n");
    for placement in placements {
        let name = loop {
            *counter += 1;
            let candidate = format!("{}{}", XOBJECT_PREFIX, counter);
            if !xobjects.has(candidate.as_bytes()) {
                break candidate;
            }
        };
        xobjects.set(name.as_str(), Object::Reference(placement.stream));
        let m = placement.matrix.map(num);
        ops.push_str(&format!(
            "q {} {} {} {} {} {} cm /{} Do Q\n",
            m[0], m[1], m[2], m[3], m[4], m[5], name
        ));
    }
    resources.set("XObject", xobjects);

    let mut contents = {
        let dict = doc
            .get_object(page)
            .and_then(Object::as_dict)
            .map_err(|e| format!("page {:?} unreadable: {}", page, e))?;
        content_refs(doc, dict)
    };
    let pre = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let post = doc.add_object(Stream::new(Dictionary::new(), ops.into_bytes()));
    contents.insert(0, Object::Reference(pre));
    contents.push(Object::Reference(post));

    let dict = doc
        .get_object_mut(page)
        .and_then(Object::as_dict_mut)
        .map_err(|e| format!("page {:?} not writable: {}", page, e))?;
    dict.set("Resources", resources);
    dict.set("Contents", contents);
    Ok(())
}

fn strip_widgets(doc: &mut Document, removed: &HashSet<ObjectId>) -> Result<(), String> {
    for (_, page) in doc.get_pages() {
        let annots = annot_refs(doc, page);
        let kept: Vec<Object> = annots
            .iter()
            .filter(|a| !a.as_reference().is_ok_and(|id| removed.contains(&id)))
            .cloned()
            .collect();
        if kept.len() == annots.len() {
            continue;
        }

        let dict = doc
            .get_object_mut(page)
            .and_then(Object::as_dict_mut)
            .map_err(|e| format!("page {:?} not writable: {}", page, e))?;
        if kept.is_empty() {
            dict.remove(b"Annots");
        } else {
            dict.set("Annots", kept);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One page with one text field and one checkbox, both merged with their widgets
    fn single_page_form() -> (Document, ObjectId) {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let content = doc.add_object(Stream::new(Dictionary::new(), b"BT ET\n".to_vec()));

        let on = doc.add_object(Stream::new(
            dictionary! { "BBox" => vec![0.into(), 0.into(), 10.into(), 10.into()] },
            b"0 0 m 10 10 l S\n".to_vec(),
        ));
        let checkbox = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Btn",
            "T" => Object::string_literal("agree"),
            "Rect" => vec![50.into(), 50.into(), 60.into(), 60.into()],
            "AS" => "Yes",
            "V" => "Yes",
            "AP" => dictionary! { "N" => dictionary! { "Yes" => Object::Reference(on) } },
        });
        let text = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Tx",
            "T" => Object::string_literal("name"),
            "V" => Object::string_literal("Ada"),
            "DA" => Object::string_literal("/Helv 12 Tf 0 g"),
            "Rect" => vec![100.into(), 700.into(), 300.into(), 720.into()],
        });
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content),
            "Annots" => vec![Object::Reference(text), Object::Reference(checkbox)],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page)],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => dictionary! {},
            }),
        );
        let form = doc.add_object(dictionary! {
            "Fields" => vec![Object::Reference(text), Object::Reference(checkbox)],
            "NeedAppearances" => true,
        });
        let catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
            "AcroForm" => Object::Reference(form),
        });
        doc.trailer.set("Root", Object::Reference(catalog));
        (doc, page)
    }

    fn page_text(doc: &Document, page: ObjectId) -> String {
        let dict = doc.get_object(page).unwrap().as_dict().unwrap();
        let mut text = String::new();
        for item in dict.get(b"Contents").unwrap().as_array().unwrap() {
            let stream = doc
                .get_object(item.as_reference().unwrap())
                .unwrap()
                .as_stream()
                .unwrap();
            text.push_str(&String::from_utf8_lossy(&stream.content));
        }
        text
    }

    #[test]
    fn test_flatten_paints_and_removes_widgets() {
        let (mut doc, page) = single_page_form();
        let summary = flatten(&mut doc).unwrap();

        assert_eq!(summary, FlattenSummary { painted: 2, removed: 2 });
        assert!(acroform::terminal_fields(&doc).is_empty());

        let form = acroform::acroform(&doc).unwrap();
        assert!(!form.has(b"NeedAppearances"));

        let page_dict = doc.get_object(page).unwrap().as_dict().unwrap();
        assert!(!page_dict.has(b"Annots"));

        let content = page_text(&doc, page);
        assert!(content.starts_with("q\n"));
        assert!(content.contains("BT ET"));
        assert!(content.contains("/FlatW1 Do"));
        assert!(content.contains("/FlatW2 Do"));
    }

    #[test]
    fn test_flatten_places_text_at_widget_origin() {
        let (mut doc, page) = single_page_form();
        flatten(&mut doc).unwrap();
        let content = page_text(&doc, page);
        assert!(content.contains("q 1 0 0 1 100 700 cm /FlatW1 Do Q"));
    }

    #[test]
    fn test_flatten_inherits_resources_onto_page() {
        let (mut doc, page) = single_page_form();
        flatten(&mut doc).unwrap();
        let page_dict = doc.get_object(page).unwrap().as_dict().unwrap();
        let xobjects = page_dict
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"XObject")
            .unwrap()
            .as_dict()
            .unwrap();
        assert!(xobjects.has(b"FlatW1"));
        assert!(xobjects.has(b"FlatW2"));
    }

    #[test]
    fn test_generated_text_appearance_uses_value() {
        let (mut doc, page) = single_page_form();
        flatten(&mut doc).unwrap();
        let page_dict = doc.get_object(page).unwrap().as_dict().unwrap();
        let xobjects = page_dict
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"XObject")
            .unwrap()
            .as_dict()
            .unwrap();
        let id = xobjects.get(b"FlatW1").unwrap().as_reference().unwrap();
        let stream = doc.get_object(id).unwrap().as_stream().unwrap();
        let content = String::from_utf8_lossy(&stream.content);
        assert!(content.contains("(Ada) Tj"));
        let fonts = stream
            .dict
            .get(b"Resources")
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Font")
            .unwrap()
            .as_dict()
            .unwrap();
        assert!(fonts.has(b"Helv"));
    }

    #[test]
    fn test_hidden_widget_is_removed_but_not_painted() {
        let (mut doc, page) = single_page_form();
        let checkbox = acroform::find_field(&doc, "agree").unwrap().id;
        doc.get_object_mut(checkbox)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("F", 2);

        let summary = flatten(&mut doc).unwrap();
        assert_eq!(summary, FlattenSummary { painted: 1, removed: 2 });
        assert!(!page_text(&doc, page).contains("FlatW2"));
    }

    #[test]
    fn test_flatten_without_form_is_noop() {
        let mut doc = Document::with_version("1.7");
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog" });
        doc.trailer.set("Root", Object::Reference(catalog));
        let before = doc.objects.len();
        assert_eq!(flatten(&mut doc).unwrap(), FlattenSummary::default());
        assert_eq!(doc.objects.len(), before);
    }

    #[test]
    fn test_placement_scales_bbox_to_rect() {
        let mut doc = Document::with_version("1.7");
        let stream = doc.add_object(Stream::new(
            dictionary! { "BBox" => vec![0.into(), 0.into(), 20.into(), 20.into()] },
            Vec::new(),
        ));
        let rect = Rect::from_numbers(&[10.0, 10.0, 20.0, 20.0]).unwrap();
        let p = placement(&doc, stream, rect).unwrap();
        assert_eq!(p.matrix, [0.5, 0.0, 0.0, 0.5, 10.0, 10.0]);
    }
}
