//! In-memory PDF fixtures for form tests
#![allow(dead_code)]

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use qpdf::{EncryptionParams, EncryptionParamsR6, PrintPermission, QPdf};

const WIDGET_HEIGHT: i64 = 20;
const ROW_GAP: i64 = 30;

/// Builds a PDF with an AcroForm, laying widgets out top to bottom on page 1
pub struct FormBuilder {
    doc: Document,
    pages_id: ObjectId,
    pages: Vec<ObjectId>,
    annots: Vec<Vec<Object>>,
    fields: Vec<Object>,
    check_ap: ObjectId,
    next_y: i64,
    with_form: bool,
}

impl FormBuilder {
    pub fn new(page_count: usize) -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut pages = Vec::new();
        for i in 0..page_count.max(1) {
            let content = doc.add_object(Stream::new(
                Dictionary::new(),
                format!("BT /F1 12 Tf 72 750 Td (Page {}) Tj ET\n", i + 1).into_bytes(),
            ));
            pages.push(doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "Contents" => Object::Reference(content),
            }));
        }
        let check_ap = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 12.into(), 12.into()],
            },
            b"0 g 2 2 8 8 re f\n".to_vec(),
        ));
        Self {
            doc,
            pages_id,
            annots: vec![Vec::new(); pages.len()],
            pages,
            fields: Vec::new(),
            check_ap,
            next_y: 700,
            with_form: true,
        }
    }

    /// Leave out the AcroForm dictionary entirely
    pub fn without_form(mut self) -> Self {
        self.with_form = false;
        self
    }

    fn next_rect(&mut self, width: i64) -> Vec<Object> {
        let y = self.next_y;
        self.next_y -= ROW_GAP;
        vec![
            72.into(),
            y.into(),
            (72 + width).into(),
            (y + WIDGET_HEIGHT).into(),
        ]
    }

    fn add_root_field(&mut self, dict: Dictionary, page: usize) -> ObjectId {
        let id = self.doc.add_object(dict);
        self.fields.push(Object::Reference(id));
        self.annots[page].push(Object::Reference(id));
        id
    }

    fn widget(&mut self, width: i64) -> Dictionary {
        dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "Rect" => self.next_rect(width),
        }
    }

    /// Text field merged with its widget
    pub fn text(self, name: &str, value: Option<&str>) -> Self {
        self.text_with(name, value, Dictionary::new())
    }

    /// Text field with extra entries such as `/MaxLen`, `/Ff` or `/Q`
    pub fn text_with(mut self, name: &str, value: Option<&str>, extra: Dictionary) -> Self {
        let mut dict = self.widget(200);
        dict.set("FT", "Tx");
        dict.set("T", Object::string_literal(name));
        dict.set("DA", Object::string_literal("/Helv 0 Tf 0 g"));
        if let Some(value) = value {
            dict.set("V", Object::string_literal(value));
        }
        for (key, value) in extra.iter() {
            dict.set(key.clone(), value.clone());
        }
        self.add_root_field(dict, 0);
        self
    }

    /// Text field on a specific page
    pub fn text_on_page(mut self, page: usize, name: &str, value: &str) -> Self {
        let mut dict = self.widget(200);
        dict.set("FT", "Tx");
        dict.set("T", Object::string_literal(name));
        dict.set("V", Object::string_literal(value));
        self.add_root_field(dict, page);
        self
    }

    /// Checkbox with a `Yes` appearance
    pub fn checkbox(mut self, name: &str, checked: bool) -> Self {
        let state = if checked { "Yes" } else { "Off" };
        let mut dict = self.widget(12);
        dict.set("FT", "Btn");
        dict.set("T", Object::string_literal(name));
        dict.set("V", state);
        dict.set("AS", state);
        dict.set(
            "AP",
            dictionary! {
                "N" => dictionary! { "Yes" => Object::Reference(self.check_ap) },
            },
        );
        self.add_root_field(dict, 0);
        self
    }

    /// Radio group with one kid widget per export state
    pub fn radio(mut self, name: &str, states: &[&str], selected: Option<&str>) -> Self {
        let parent_id = self.doc.new_object_id();
        let mut kids = Vec::new();
        for state in states {
            let current = if Some(*state) == selected { *state } else { "Off" };
            let mut dict = self.widget(12);
            dict.set("Parent", Object::Reference(parent_id));
            dict.set("AS", current);
            dict.set(
                "AP",
                dictionary! {
                    "N" => dictionary! { *state => Object::Reference(self.check_ap) },
                },
            );
            let kid = self.doc.add_object(dict);
            self.annots[0].push(Object::Reference(kid));
            kids.push(Object::Reference(kid));
        }

        let mut parent = dictionary! {
            "FT" => "Btn",
            "Ff" => 1 << 15,
            "T" => Object::string_literal(name),
            "Kids" => kids,
        };
        if let Some(selected) = selected {
            parent.set("V", Object::Name(selected.as_bytes().to_vec()));
        }
        self.doc.objects.insert(parent_id, Object::Dictionary(parent));
        self.fields.push(Object::Reference(parent_id));
        self
    }

    pub fn push_button(mut self, name: &str) -> Self {
        let mut dict = self.widget(60);
        dict.set("FT", "Btn");
        dict.set("Ff", 1 << 16);
        dict.set("T", Object::string_literal(name));
        self.add_root_field(dict, 0);
        self
    }

    pub fn signature(mut self, name: &str) -> Self {
        let mut dict = self.widget(150);
        dict.set("FT", "Sig");
        dict.set("T", Object::string_literal(name));
        self.add_root_field(dict, 0);
        self
    }

    /// Combo box; not surfaced by the bridge
    pub fn choice(mut self, name: &str) -> Self {
        let mut dict = self.widget(100);
        dict.set("FT", "Ch");
        dict.set("T", Object::string_literal(name));
        dict.set(
            "Opt",
            vec![Object::string_literal("A"), Object::string_literal("B")],
        );
        self.add_root_field(dict, 0);
        self
    }

    /// Non-terminal `parent` holding text children that inherit `/FT`
    pub fn text_group(mut self, parent: &str, children: &[(&str, &str)]) -> Self {
        let parent_id = self.doc.new_object_id();
        let mut kids = Vec::new();
        for (child, value) in children {
            let mut dict = self.widget(200);
            dict.set("Parent", Object::Reference(parent_id));
            dict.set("T", Object::string_literal(*child));
            dict.set("V", Object::string_literal(*value));
            let kid = self.doc.add_object(dict);
            self.annots[0].push(Object::Reference(kid));
            kids.push(Object::Reference(kid));
        }
        self.doc.objects.insert(
            parent_id,
            Object::Dictionary(dictionary! {
                "FT" => "Tx",
                "T" => Object::string_literal(parent),
                "Kids" => kids,
            }),
        );
        self.fields.push(Object::Reference(parent_id));
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        for (page, annots) in self.pages.iter().zip(self.annots) {
            if annots.is_empty() {
                continue;
            }
            if let Ok(Object::Dictionary(dict)) = self.doc.get_object_mut(*page) {
                dict.set("Annots", annots);
            }
        }
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.pages.iter().map(|p| Object::Reference(*p)).collect::<Vec<_>>(),
                "Count" => self.pages.len() as i64,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );

        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(self.pages_id),
        };
        if self.with_form {
            let form = self.doc.add_object(dictionary! {
                "Fields" => self.fields,
                "DA" => Object::string_literal("/Helv 0 Tf 0 g"),
            });
            catalog.set("AcroForm", Object::Reference(form));
        }
        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut out = Vec::new();
        self.doc
            .save_to(&mut out)
            .expect("Failed to serialize fixture");
        out
    }
}

/// A PDF with `pages` pages and no interactive form
pub fn plain_pdf(pages: usize) -> Vec<u8> {
    FormBuilder::new(pages).without_form().build()
}

/// The usual mixed form: text, checkboxes, radio group, button, signature, choice
pub fn mixed_form() -> Vec<u8> {
    FormBuilder::new(1)
        .text("firstName", Some("Ada"))
        .text("full_name", None)
        .checkbox("subscribe", true)
        .checkbox("terms", false)
        .radio("color", &["Red", "Green", "Blue"], None)
        .push_button("submit")
        .signature("signature")
        .choice("country")
        .build()
}

/// Encrypt `data` with AES-256 and the given user password
pub fn encrypt(data: &[u8], user_password: &str) -> Vec<u8> {
    let qpdf = QPdf::read_from_memory(data).expect("Failed to open fixture with qpdf");
    let mut writer = qpdf.writer();
    writer
        .preserve_encryption(false)
        .encryption_params(EncryptionParams::R6(EncryptionParamsR6 {
            user_password: user_password.to_string(),
            owner_password: format!("{}-owner", user_password),
            allow_accessibility: true,
            allow_extract: true,
            allow_assemble: true,
            allow_annotate_and_form: true,
            allow_form_filling: true,
            allow_modify_other: true,
            allow_print: PrintPermission::Full,
            encrypt_metadata: true,
        }));
    writer.write_to_memory().expect("Failed to encrypt fixture")
}

/// Concatenated content of every stream reachable as a page `/Contents` or
/// as a form XObject painted on a page
pub fn painted_text(bytes: &[u8]) -> String {
    let doc = Document::load_mem(bytes).expect("Failed to reparse output");
    let mut text = String::new();
    for (_, page) in doc.get_pages() {
        let dict = doc.get_dictionary(page).expect("page dictionary");
        if let Ok(contents) = dict.get(b"Contents") {
            let refs = match contents {
                Object::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            for r in refs {
                if let Ok(Object::Stream(s)) = doc.get_object(r.as_reference().expect("ref")) {
                    text.push_str(&String::from_utf8_lossy(
                        &s.decompressed_content().unwrap_or_else(|_| s.content.clone()),
                    ));
                }
            }
        }
        let xobjects = dict
            .get(b"Resources")
            .and_then(Object::as_dict)
            .and_then(|r| r.get(b"XObject"))
            .and_then(Object::as_dict);
        if let Ok(xobjects) = xobjects {
            for (_, xobject) in xobjects.iter() {
                if let Ok(Object::Stream(s)) =
                    doc.get_object(xobject.as_reference().expect("xobject ref"))
                {
                    text.push_str(&String::from_utf8_lossy(
                        &s.decompressed_content().unwrap_or_else(|_| s.content.clone()),
                    ));
                }
            }
        }
    }
    text
}
