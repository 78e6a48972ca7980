//! [`FormEngine`] backed by lopdf

use std::collections::{HashMap, HashSet};

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, info};

use crate::acroform::{
    collect_fields, da_font_size, dict, dict_mut, field_properties, get_or_create_acroform,
    indirect_child, normal_appearance, resolve, FieldNode, FLAG_MULTILINE, FLAG_PASSWORD,
    FLAG_PUSHBUTTON, FLAG_RADIO,
};
use crate::appearance::{build_text_appearance, Alignment, TextLayout};
use crate::engine::{FieldKind, FieldProperties, FormDocument, FormEngine, AUTO_FONT_SIZE};
use crate::error::FormError;
use crate::flatten::flatten_widgets;
use crate::font::EmbeddedFont;
use crate::text::{decode_text_string, encode_text_string};

/// Engine working on lopdf documents with embedded TrueType fonts
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfEngine;

impl FormEngine for LopdfEngine {
    type Document = LopdfDocument;

    fn open(&self, pdf: &[u8]) -> Result<LopdfDocument, FormError> {
        LopdfDocument::load(pdf)
    }
}

/// Handle to a font loaded into one [`LopdfDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontHandle(usize);

pub struct LopdfDocument {
    doc: Document,
    acroform_id: ObjectId,
    fields: Vec<FieldNode>,
    index: HashMap<String, usize>,
    fonts: Vec<EmbeddedFont>,
    generate_appearance: bool,
    /// Widgets given a fresh appearance during this session
    refreshed: HashSet<ObjectId>,
}

impl LopdfDocument {
    pub fn load(pdf: &[u8]) -> Result<Self, FormError> {
        let mut doc = Document::load_mem(pdf).map_err(|e| FormError::ParseError(e.to_string()))?;

        if doc.trailer.get(b"Encrypt").is_ok() {
            return Err(FormError::ParseError(
                "Encrypted documents are not supported".into(),
            ));
        }

        let acroform_id = get_or_create_acroform(&mut doc)?;
        let fields = collect_fields(&doc, acroform_id);

        let mut index = HashMap::new();
        for (position, field) in fields.iter().enumerate() {
            index.entry(field.name.clone()).or_insert(position);
        }

        debug!(fields = fields.len(), "Opened form document");

        Ok(Self {
            doc,
            acroform_id,
            fields,
            index,
            fonts: Vec::new(),
            generate_appearance: false,
            refreshed: HashSet::new(),
        })
    }

    fn font(&self, handle: FontHandle) -> Result<&EmbeddedFont, FormError> {
        self.fonts
            .get(handle.0)
            .ok_or_else(|| FormError::FontError(format!("Unknown font handle {}", handle.0)))
    }

    fn set_text_value(
        &mut self,
        field: &FieldNode,
        value: &str,
        handle: FontHandle,
        font_size: f32,
    ) -> Result<(), FormError> {
        let font = self.font(handle)?;
        let da = format!("/{} {} Tf 0 g", font.resource_name(), font_size);
        let da = Object::String(da.into_bytes(), lopdf::StringFormat::Literal);
        self.register_font(handle)?;

        let field_dict = dict_mut(&mut self.doc, field.id)?;
        field_dict.set("V", encode_text_string(value));
        field_dict.set("DA", da.clone());
        if field.kind() == Some(FieldKind::Choice) {
            // Selected indices would contradict the new value
            field_dict.remove(b"I");
        }

        for widget in &field.widgets {
            if *widget != field.id && dict(&self.doc, *widget).is_some_and(|w| w.has(b"DA")) {
                dict_mut(&mut self.doc, *widget)?.set("DA", da.clone());
            }
        }

        if self.generate_appearance {
            self.draw_text_widgets(field, value, handle, font_size)?;
        }
        Ok(())
    }

    fn draw_text_widgets(
        &mut self,
        field: &FieldNode,
        value: &str,
        handle: FontHandle,
        font_size: f32,
    ) -> Result<(), FormError> {
        let display = if field.has_flag(FLAG_PASSWORD) {
            "*".repeat(value.chars().count())
        } else {
            value.to_string()
        };
        let multiline =
            field.kind() == Some(FieldKind::Text) && field.has_flag(FLAG_MULTILINE);

        for widget in &field.widgets {
            let Some((width, height)) = widget_size(&self.doc, *widget) else {
                continue;
            };
            let layout = TextLayout {
                width,
                height,
                font_size,
                alignment: Alignment::from_quadding(field.quadding),
                multiline,
            };

            let font = self
                .fonts
                .get_mut(handle.0)
                .ok_or_else(|| FormError::FontError(format!("Unknown font handle {}", handle.0)))?;
            let stream = build_text_appearance(font, &layout, &display)?;
            let stream_id = self.doc.add_object(stream);

            let mut ap = Dictionary::new();
            ap.set("N", Object::Reference(stream_id));
            dict_mut(&mut self.doc, *widget)?.set("AP", Object::Dictionary(ap));
            self.refreshed.insert(*widget);
        }
        Ok(())
    }

    fn set_button_value(&mut self, field: &FieldNode, value: &str) -> Result<(), FormError> {
        if field.has_flag(FLAG_PUSHBUTTON) {
            debug!(field = %field.name, "Pushbuttons carry no value, skipping");
            return Ok(());
        }

        let state = value.as_bytes().to_vec();
        let selected: Vec<bool> = field
            .widgets
            .iter()
            .map(|widget| {
                dict(&self.doc, *widget)
                    .and_then(|w| normal_appearance(&self.doc, w))
                    .and_then(|n| n.as_dict().ok())
                    .is_some_and(|states| states.has(&state))
            })
            .collect();

        // A radio group only takes a value one of its kids can show
        let value_state = if field.has_flag(FLAG_RADIO) && !selected.contains(&true) {
            debug!(field = %field.name, value, "No radio button has this state, clearing group");
            b"Off".to_vec()
        } else {
            state.clone()
        };
        dict_mut(&mut self.doc, field.id)?.set("V", Object::Name(value_state));

        for (widget, on) in field.widgets.iter().zip(selected) {
            let appearance_state = if on { state.clone() } else { b"Off".to_vec() };
            dict_mut(&mut self.doc, *widget)?.set("AS", Object::Name(appearance_state));
        }
        Ok(())
    }

    /// Make the font reachable from the form's default resources
    fn register_font(&mut self, handle: FontHandle) -> Result<(), FormError> {
        let font = self.font(handle)?;
        let name = font.resource_name().as_bytes().to_vec();
        let font_id = font.object_id();

        let dr_id = indirect_child(&mut self.doc, self.acroform_id, b"DR")?;
        let fonts_id = indirect_child(&mut self.doc, dr_id, b"Font")?;
        dict_mut(&mut self.doc, fonts_id)?.set(name, Object::Reference(font_id));

        if let Some(font) = self.fonts.get_mut(handle.0) {
            font.mark_referenced();
        }
        Ok(())
    }

    /// Draw text fields that hold a value but never got an appearance
    fn draw_missing_appearances(&mut self) -> Result<(), FormError> {
        if self.fonts.is_empty() {
            return Ok(());
        }
        let handle = FontHandle(0);
        let fields: Vec<FieldNode> = self.fields.clone();

        for field in fields.iter().filter(|f| f.terminal) {
            if !matches!(field.kind(), Some(FieldKind::Text) | Some(FieldKind::Choice)) {
                continue;
            }
            let pending = field.widgets.iter().any(|w| {
                !self.refreshed.contains(w)
                    && dict(&self.doc, *w).is_some_and(|d| normal_appearance(&self.doc, d).is_none())
            });
            if !pending {
                continue;
            }
            let Some(value) = field_value(&self.doc, field) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }

            let size = field
                .default_appearance
                .as_deref()
                .and_then(da_font_size)
                .unwrap_or(AUTO_FONT_SIZE);
            debug!(field = %field.name, "Drawing missing appearance");
            self.draw_text_widgets(field, &value, handle, size)?;
            self.register_font(handle)?;
        }
        Ok(())
    }
}

impl FormDocument for LopdfDocument {
    type Font = FontHandle;

    fn set_generate_appearance(&mut self, generate: bool) {
        self.generate_appearance = generate;
        if generate {
            if let Ok(acroform) = dict_mut(&mut self.doc, self.acroform_id) {
                acroform.remove(b"NeedAppearances");
            }
        }
    }

    fn load_font(&mut self, font_bytes: Vec<u8>) -> Result<FontHandle, FormError> {
        let object_id = self.doc.new_object_id();
        let resource_name = format!("FFill{}", self.fonts.len());
        let font = EmbeddedFont::parse(font_bytes, object_id, resource_name)?;
        debug!(font = font.base_font(), "Loaded font");
        self.fonts.push(font);
        Ok(FontHandle(self.fonts.len() - 1))
    }

    fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn set_field_value(
        &mut self,
        name: &str,
        value: &str,
        font: &FontHandle,
        font_size: f32,
    ) -> Result<(), FormError> {
        let position = *self
            .index
            .get(name)
            .ok_or_else(|| FormError::StructureError(format!("Unknown field: {}", name)))?;
        let field = self.fields[position].clone();

        match field.kind() {
            Some(FieldKind::Text) | Some(FieldKind::Choice) => {
                self.set_text_value(&field, value, *font, font_size)
            }
            Some(FieldKind::Button) => self.set_button_value(&field, value),
            Some(FieldKind::Signature) | None => {
                dict_mut(&mut self.doc, field.id)?.set("V", encode_text_string(value));
                Ok(())
            }
        }
    }

    fn form_fields(&self) -> Vec<FieldProperties> {
        field_properties(&self.doc, &self.fields)
    }

    fn close(mut self, flatten: bool) -> Result<Vec<u8>, FormError> {
        if self.generate_appearance {
            self.draw_missing_appearances()?;
        }

        for font in self.fonts.iter().filter(|f| f.is_referenced()) {
            font.write_to(&mut self.doc);
        }

        if flatten {
            let painted = flatten_widgets(&mut self.doc)?;
            self.doc
                .catalog_mut()
                .map_err(|e| FormError::StructureError(format!("Missing catalog: {}", e)))?
                .remove(b"AcroForm");
            self.doc.prune_objects();
            info!(painted, "Flattened form");
        }

        self.doc.compress();

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| FormError::WriteError(e.to_string()))?;
        Ok(buffer)
    }
}

/// Width and height of a widget's `/Rect`
fn widget_size(doc: &Document, widget: ObjectId) -> Option<(f32, f32)> {
    let rect = dict(doc, widget)?.get(b"Rect").ok()?;
    let values: Vec<f32> = resolve(doc, rect)?
        .as_array()
        .ok()?
        .iter()
        .map(|v| v.as_float().ok())
        .collect::<Option<_>>()?;
    match values.as_slice() {
        [x0, y0, x1, y1] => Some(((x1 - x0).abs(), (y1 - y0).abs())),
        _ => None,
    }
}

/// Current `/V` of a field as text; choice lists report their first entry
fn field_value(doc: &Document, field: &FieldNode) -> Option<String> {
    let value = dict(doc, field.id)?.get(b"V").ok()?;
    match resolve(doc, value)? {
        Object::Array(items) => items.first().and_then(decode_text_string),
        other => decode_text_string(other),
    }
}
