//! In-memory PDFs with AcroForm fields, shared by the unit tests here and
//! the server's endpoint tests (behind the `fixtures` feature).

use std::path::PathBuf;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};

/// Bundled font used by tests, relative to [`font_dir`]
pub const TEST_FONT: &str = "dejavu/DejaVuSans.ttf";

const FIELD_DA: &str = "/Helv 0 Tf 0 g";

/// Directory holding the bundled fonts
pub fn font_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../resources/fonts")
}

/// Bytes of the bundled test font
pub fn test_font() -> Vec<u8> {
    std::fs::read(font_dir().join(TEST_FONT)).expect("bundled test font is readable")
}

#[derive(Debug, Clone)]
enum FixtureKind {
    Text { flags: i64 },
    Choice { flags: i64, options: Vec<String> },
    Checkbox,
    Radio(Vec<String>),
}

/// Description of one field placed on the fixture page
#[derive(Debug, Clone)]
pub struct FixtureField {
    name: String,
    kind: FixtureKind,
    rect: [f32; 4],
    appearance: bool,
    hidden: bool,
    checked: bool,
    value: Option<String>,
}

impl FixtureField {
    fn new(name: &str, kind: FixtureKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            rect: [72.0, 700.0, 272.0, 720.0],
            appearance: false,
            hidden: false,
            checked: false,
            value: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FixtureKind::Text { flags: 0 })
    }

    pub fn multiline(name: &str) -> Self {
        Self::new(name, FixtureKind::Text { flags: 1 << 12 }).at([72.0, 600.0, 272.0, 680.0])
    }

    pub fn password(name: &str) -> Self {
        Self::new(name, FixtureKind::Text { flags: 1 << 13 })
    }

    pub fn combo(name: &str, options: &[&str]) -> Self {
        Self::new(
            name,
            FixtureKind::Choice {
                flags: 1 << 17,
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        )
    }

    pub fn list_box(name: &str, options: &[&str]) -> Self {
        Self::new(
            name,
            FixtureKind::Choice {
                flags: 0,
                options: options.iter().map(|o| o.to_string()).collect(),
            },
        )
    }

    pub fn checkbox(name: &str) -> Self {
        Self::new(name, FixtureKind::Checkbox).at([72.0, 650.0, 86.0, 664.0])
    }

    pub fn radio(name: &str, states: &[&str]) -> Self {
        Self::new(
            name,
            FixtureKind::Radio(states.iter().map(|s| s.to_string()).collect()),
        )
        .at([72.0, 620.0, 86.0, 634.0])
    }

    /// Place the (first) widget at `[llx lly urx ury]`
    pub fn at(mut self, rect: [f32; 4]) -> Self {
        self.rect = rect;
        self
    }

    /// Give a text or choice widget an empty normal appearance
    pub fn with_appearance(mut self) -> Self {
        self.appearance = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Store `/V` on a text or choice field without drawing it
    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    /// Start a checkbox in its on state
    pub fn checked(mut self) -> Self {
        self.checked = true;
        self
    }
}

/// Single page PDF without an AcroForm
pub fn plain_pdf() -> Vec<u8> {
    FixtureBuilder::new().finish(None)
}

/// Single page PDF with one widget per field
pub fn form_pdf(fields: &[FixtureField]) -> Vec<u8> {
    let mut builder = FixtureBuilder::new();
    let roots = fields.iter().map(|f| builder.add_field(f)).collect();
    builder.finish(Some(roots))
}

/// Like [`form_pdf`] with a link annotation next to the widgets
pub fn form_pdf_with_link(fields: &[FixtureField]) -> Vec<u8> {
    let mut builder = FixtureBuilder::new();
    let roots = fields.iter().map(|f| builder.add_field(f)).collect();

    let mut link = annotation("Link", [300.0, 700.0, 400.0, 720.0], builder.page_id);
    link.remove(b"F");
    let link_id = builder.doc.add_object(link);
    builder.annots.push(Object::Reference(link_id));

    builder.finish(Some(roots))
}

/// A text field `email` and a combo box `country` offering US and CA
pub fn email_and_country_pdf() -> Vec<u8> {
    form_pdf(&[
        FixtureField::text("email"),
        FixtureField::combo("country", &["US", "CA"]).at([72.0, 660.0, 272.0, 680.0]),
    ])
}

/// Untyped parent `address` with text kids `street` and `city`
pub fn hierarchical_pdf() -> Vec<u8> {
    let mut builder = FixtureBuilder::new();
    let parent_id = builder.doc.new_object_id();

    let mut kids = Vec::new();
    for (index, partial) in ["street", "city"].iter().enumerate() {
        let y = 700.0 - index as f32 * 30.0;
        let mut kid = annotation("Widget", [72.0, y, 272.0, y + 20.0], builder.page_id);
        kid.set("FT", Object::Name(b"Tx".to_vec()));
        kid.set("T", literal(partial));
        kid.set("DA", literal(FIELD_DA));
        kid.set("Parent", Object::Reference(parent_id));
        let kid_id = builder.doc.add_object(kid);
        builder.annots.push(Object::Reference(kid_id));
        kids.push(Object::Reference(kid_id));
    }

    let mut parent = Dictionary::new();
    parent.set("T", literal("address"));
    parent.set("Kids", Object::Array(kids));
    builder.doc.objects.insert(parent_id, Object::Dictionary(parent));

    builder.finish(Some(vec![parent_id]))
}

/// Combo box parent `shirt` whose child fields carry their own options:
/// `shirt.front` offers S and M, `shirt.back` offers M and L
pub fn choice_group_pdf() -> Vec<u8> {
    let mut builder = FixtureBuilder::new();
    let parent_id = builder.doc.new_object_id();

    let mut kids = Vec::new();
    for (index, (partial, options)) in [("front", ["S", "M"]), ("back", ["M", "L"])]
        .iter()
        .enumerate()
    {
        let y = 700.0 - index as f32 * 30.0;
        let mut kid = annotation("Widget", [72.0, y, 272.0, y + 20.0], builder.page_id);
        kid.set("T", literal(partial));
        kid.set("Opt", Object::Array(options.iter().map(|o| literal(o)).collect()));
        kid.set("Parent", Object::Reference(parent_id));
        let kid_id = builder.push_widget(kid);
        kids.push(Object::Reference(kid_id));
    }

    let mut parent = Dictionary::new();
    parent.set("FT", Object::Name(b"Ch".to_vec()));
    parent.set("Ff", Object::Integer(1 << 17));
    parent.set("T", literal("shirt"));
    parent.set("DA", literal(FIELD_DA));
    parent.set("Kids", Object::Array(kids));
    builder.doc.objects.insert(parent_id, Object::Dictionary(parent));

    builder.finish(Some(vec![parent_id]))
}

/// Two fields listing each other as kids
pub fn cyclic_pdf() -> Vec<u8> {
    let mut builder = FixtureBuilder::new();
    let a_id = builder.doc.new_object_id();
    let b_id = builder.doc.new_object_id();

    let mut a = Dictionary::new();
    a.set("T", literal("a"));
    a.set("FT", Object::Name(b"Tx".to_vec()));
    a.set("Kids", Object::Array(vec![Object::Reference(b_id)]));

    let mut b = Dictionary::new();
    b.set("T", literal("b"));
    b.set("Parent", Object::Reference(a_id));
    b.set("Kids", Object::Array(vec![Object::Reference(a_id)]));

    builder.doc.objects.insert(a_id, Object::Dictionary(a));
    builder.doc.objects.insert(b_id, Object::Dictionary(b));

    builder.finish(Some(vec![a_id]))
}

struct FixtureBuilder {
    doc: Document,
    pages_id: ObjectId,
    page_id: ObjectId,
    font_id: ObjectId,
    annots: Vec<Object>,
}

impl FixtureBuilder {
    fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let page_id = doc.new_object_id();

        let mut font = Dictionary::new();
        font.set("Type", Object::Name(b"Font".to_vec()));
        font.set("Subtype", Object::Name(b"Type1".to_vec()));
        font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
        let font_id = doc.add_object(font);

        Self {
            doc,
            pages_id,
            page_id,
            font_id,
            annots: Vec::new(),
        }
    }

    /// Add a field and its widgets; returns the field's object id
    fn add_field(&mut self, field: &FixtureField) -> ObjectId {
        match &field.kind {
            FixtureKind::Text { flags } => {
                let mut dict = self.widget(field);
                dict.set("FT", Object::Name(b"Tx".to_vec()));
                if *flags != 0 {
                    dict.set("Ff", Object::Integer(*flags));
                }
                self.push_widget(dict)
            }
            FixtureKind::Choice { flags, options } => {
                let mut dict = self.widget(field);
                dict.set("FT", Object::Name(b"Ch".to_vec()));
                dict.set("Ff", Object::Integer(*flags));
                dict.set(
                    "Opt",
                    Object::Array(options.iter().map(|o| literal(o)).collect()),
                );
                self.push_widget(dict)
            }
            FixtureKind::Checkbox => {
                let mut dict = self.widget(field);
                let state: &[u8] = if field.checked { b"Yes" } else { b"Off" };
                dict.set("FT", Object::Name(b"Btn".to_vec()));
                dict.set("V", Object::Name(state.to_vec()));
                dict.set("AS", Object::Name(state.to_vec()));
                let states = self.state_appearances(field.rect, b"Yes");
                dict.set("AP", ap_dict(Object::Dictionary(states)));
                self.push_widget(dict)
            }
            FixtureKind::Radio(states) => {
                let parent_id = self.doc.new_object_id();
                let mut kids = Vec::new();
                for (index, state) in states.iter().enumerate() {
                    let dx = index as f32 * 20.0;
                    let rect = [
                        field.rect[0] + dx,
                        field.rect[1],
                        field.rect[2] + dx,
                        field.rect[3],
                    ];
                    let mut kid = annotation("Widget", rect, self.page_id);
                    kid.set("Parent", Object::Reference(parent_id));
                    kid.set("AS", Object::Name(b"Off".to_vec()));
                    let appearances = self.state_appearances(rect, state.as_bytes());
                    kid.set("AP", ap_dict(Object::Dictionary(appearances)));
                    let kid_id = self.push_widget(kid);
                    kids.push(Object::Reference(kid_id));
                }

                let mut parent = Dictionary::new();
                parent.set("FT", Object::Name(b"Btn".to_vec()));
                parent.set("Ff", Object::Integer((1 << 15) | (1 << 14)));
                parent.set("T", literal(&field.name));
                parent.set("V", Object::Name(b"Off".to_vec()));
                parent.set("Kids", Object::Array(kids));
                self.doc.objects.insert(parent_id, Object::Dictionary(parent));
                parent_id
            }
        }
    }

    /// Merged field/widget dictionary shared by the single-widget kinds
    fn widget(&mut self, field: &FixtureField) -> Dictionary {
        let mut dict = annotation("Widget", field.rect, self.page_id);
        dict.set("T", literal(&field.name));
        dict.set("DA", literal(FIELD_DA));
        if field.hidden {
            dict.set("F", Object::Integer(2));
        }
        if let Some(value) = &field.value {
            dict.set("V", literal(value));
        }
        if field.appearance {
            let stream = appearance_stream(field.rect, b"/Tx BMC EMC".to_vec());
            let stream_id = self.doc.add_object(stream);
            dict.set("AP", ap_dict(Object::Reference(stream_id)));
        }
        dict
    }

    fn push_widget(&mut self, dict: Dictionary) -> ObjectId {
        let id = self.doc.add_object(dict);
        self.annots.push(Object::Reference(id));
        id
    }

    /// `/N` state dictionary with the on state first, then `/Off`
    fn state_appearances(&mut self, rect: [f32; 4], on: &[u8]) -> Dictionary {
        let on_id = self
            .doc
            .add_object(appearance_stream(rect, b"q 0 g 2 2 10 10 re f Q".to_vec()));
        let off_id = self.doc.add_object(appearance_stream(rect, Vec::new()));
        let mut states = Dictionary::new();
        states.set(on.to_vec(), Object::Reference(on_id));
        states.set("Off", Object::Reference(off_id));
        states
    }

    fn finish(mut self, fields: Option<Vec<ObjectId>>) -> Vec<u8> {
        let content_id = self.doc.add_object(Stream::new(
            Dictionary::new(),
            b"BT /Helv 12 Tf 72 740 Td (Fixture form) Tj ET".to_vec(),
        ));

        let mut fonts = Dictionary::new();
        fonts.set("Helv", Object::Reference(self.font_id));
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(fonts.clone()));

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(self.pages_id));
        page.set("Contents", Object::Reference(content_id));
        page.set("Resources", Object::Dictionary(resources));
        page.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ]),
        );
        if !self.annots.is_empty() {
            page.set("Annots", Object::Array(std::mem::take(&mut self.annots)));
        }
        self.doc.objects.insert(self.page_id, Object::Dictionary(page));

        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(1));
        pages.set("Kids", Object::Array(vec![Object::Reference(self.page_id)]));
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(self.pages_id));

        if let Some(fields) = fields {
            let mut dr = Dictionary::new();
            dr.set("Font", Object::Dictionary(fonts));
            let mut acroform = Dictionary::new();
            acroform.set(
                "Fields",
                Object::Array(fields.into_iter().map(Object::Reference).collect()),
            );
            acroform.set("DA", literal(FIELD_DA));
            acroform.set("DR", Object::Dictionary(dr));
            let acroform_id = self.doc.add_object(acroform);
            catalog.set("AcroForm", Object::Reference(acroform_id));
        }

        let catalog_id = self.doc.add_object(catalog);
        self.doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .expect("fixture document serializes");
        buffer
    }
}

fn annotation(subtype: &str, rect: [f32; 4], page_id: ObjectId) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"Annot".to_vec()));
    dict.set("Subtype", Object::Name(subtype.as_bytes().to_vec()));
    dict.set(
        "Rect",
        Object::Array(rect.iter().map(|v| Object::Real(*v)).collect()),
    );
    dict.set("P", Object::Reference(page_id));
    dict.set("F", Object::Integer(4));
    dict
}

fn appearance_stream(rect: [f32; 4], content: Vec<u8>) -> Stream {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Form".to_vec()));
    dict.set(
        "BBox",
        Object::Array(vec![
            Object::Real(0.0),
            Object::Real(0.0),
            Object::Real(rect[2] - rect[0]),
            Object::Real(rect[3] - rect[1]),
        ]),
    );
    Stream::new(dict, content)
}

fn ap_dict(normal: Object) -> Object {
    let mut ap = Dictionary::new();
    ap.set("N", normal);
    Object::Dictionary(ap)
}

fn literal(text: &str) -> Object {
    Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
}
