//! AcroForm field tree
//!
//! Fields live under the catalog's `/AcroForm /Fields` array and nest
//! through `/Kids`. A kid carrying a partial name `/T` is a child field;
//! a kid without one is a widget annotation of its parent. Field type,
//! flags, quadding and default appearance are inheritable.

use std::collections::HashSet;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::warn;

use crate::engine::{FieldKind, FieldProperties};
use crate::error::FormError;
use crate::text::{decode_name, decode_text_string};

/// Field flag: text field may span several lines
pub const FLAG_MULTILINE: i64 = 1 << 12;
/// Field flag: text field hides its value
pub const FLAG_PASSWORD: i64 = 1 << 13;
/// Field flag: button field is a radio group
pub const FLAG_RADIO: i64 = 1 << 15;
/// Field flag: button field is a pushbutton
pub const FLAG_PUSHBUTTON: i64 = 1 << 16;

/// One node of the field tree with its inherited attributes resolved
#[derive(Debug, Clone)]
pub struct FieldNode {
    pub id: ObjectId,
    pub name: String,
    pub field_type: Option<Vec<u8>>,
    pub flags: i64,
    pub quadding: i64,
    pub default_appearance: Option<Vec<u8>>,
    /// Widget annotations drawing this field; may include the field itself
    pub widgets: Vec<ObjectId>,
    /// False when the field has child fields of its own
    pub terminal: bool,
}

impl FieldNode {
    pub fn kind(&self) -> Option<FieldKind> {
        self.field_type.as_deref().and_then(FieldKind::from_name)
    }

    pub fn has_flag(&self, flag: i64) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Clone, Default)]
struct Inherited {
    field_type: Option<Vec<u8>>,
    flags: i64,
    quadding: i64,
    default_appearance: Option<Vec<u8>>,
}

impl Inherited {
    fn merge(&self, dict: &Dictionary) -> Inherited {
        let mut next = self.clone();
        if let Ok(ft) = dict.get(b"FT").and_then(Object::as_name) {
            next.field_type = Some(ft.to_vec());
        }
        if let Ok(flags) = dict.get(b"Ff").and_then(Object::as_i64) {
            next.flags = flags;
        }
        if let Ok(q) = dict.get(b"Q").and_then(Object::as_i64) {
            next.quadding = q;
        }
        if let Ok(da) = dict.get(b"DA").and_then(Object::as_str) {
            next.default_appearance = Some(da.to_vec());
        }
        next
    }
}

/// Dictionary behind an object id, if it is one
pub fn dict(doc: &Document, id: ObjectId) -> Option<&Dictionary> {
    doc.get_object(id).ok().and_then(|obj| obj.as_dict().ok())
}

/// Mutable dictionary behind an object id
pub fn dict_mut(doc: &mut Document, id: ObjectId) -> Result<&mut Dictionary, FormError> {
    doc.get_object_mut(id)
        .map_err(|e| FormError::StructureError(format!("Missing object {:?}: {}", id, e)))?
        .as_dict_mut()
        .map_err(|_| FormError::StructureError(format!("Object {:?} is not a dictionary", id)))
}

/// Follow one level of indirection
pub fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// References held by an array entry, which may itself be indirect
pub fn reference_list(doc: &Document, obj: Option<&Object>) -> Vec<ObjectId> {
    obj.and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_reference().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Object id of the dictionary stored under `key` in `owner`. Inline or
/// missing dictionaries are replaced by a new indirect one.
pub fn indirect_child(
    doc: &mut Document,
    owner: ObjectId,
    key: &[u8],
) -> Result<ObjectId, FormError> {
    let current = dict(doc, owner).and_then(|d| d.get(key).ok()).cloned();

    let child = match current {
        Some(Object::Reference(id)) if dict(doc, id).is_some() => return Ok(id),
        Some(Object::Dictionary(inline)) => inline,
        _ => Dictionary::new(),
    };

    let child_id = doc.add_object(child);
    dict_mut(doc, owner)?.set(key.to_vec(), Object::Reference(child_id));
    Ok(child_id)
}

/// Return the AcroForm object id, creating an empty form when the
/// document has none. An inline AcroForm is moved to its own object.
pub fn get_or_create_acroform(doc: &mut Document) -> Result<ObjectId, FormError> {
    let existing = doc
        .catalog()
        .map_err(|e| FormError::StructureError(format!("Missing catalog: {}", e)))?
        .get(b"AcroForm")
        .ok()
        .cloned();

    let acroform_id = match existing {
        Some(Object::Reference(id)) if dict(doc, id).is_some() => return Ok(id),
        Some(Object::Dictionary(inline)) => doc.add_object(inline),
        _ => {
            let mut acroform = Dictionary::new();
            acroform.set("Fields", Object::Array(vec![]));
            doc.add_object(acroform)
        }
    };

    doc.catalog_mut()
        .map_err(|e| FormError::StructureError(format!("Missing catalog: {}", e)))?
        .set("AcroForm", Object::Reference(acroform_id));

    Ok(acroform_id)
}

/// Walk the field tree depth-first in `/Fields` order
pub fn collect_fields(doc: &Document, acroform_id: ObjectId) -> Vec<FieldNode> {
    let Some(acroform) = dict(doc, acroform_id) else {
        return Vec::new();
    };

    // The form-level /DA and /Q act as defaults for every field
    let inherited = Inherited::default().merge(&form_defaults(acroform));
    let roots = reference_list(doc, acroform.get(b"Fields").ok());

    let mut fields = Vec::new();
    let mut visited = HashSet::new();
    for root in roots {
        walk(doc, root, None, &inherited, &mut visited, &mut fields);
    }
    fields
}

fn form_defaults(acroform: &Dictionary) -> Dictionary {
    let mut defaults = Dictionary::new();
    for key in [b"DA".as_slice(), b"Q".as_slice()] {
        if let Ok(value) = acroform.get(key) {
            defaults.set(key.to_vec(), value.clone());
        }
    }
    defaults
}

fn walk(
    doc: &Document,
    id: ObjectId,
    parent_name: Option<&str>,
    inherited: &Inherited,
    visited: &mut HashSet<ObjectId>,
    fields: &mut Vec<FieldNode>,
) {
    if !visited.insert(id) {
        warn!("Field tree revisits object {:?}, skipping", id);
        return;
    }
    let Some(field) = dict(doc, id) else {
        return;
    };

    let inherited = inherited.merge(field);
    let kids = reference_list(doc, field.get(b"Kids").ok());

    let Some(partial) = partial_name(field) else {
        // Nameless node in the field hierarchy: pass its kids through
        for kid in kids {
            if dict(doc, kid).is_some_and(|k| k.has(b"T")) {
                walk(doc, kid, parent_name, &inherited, visited, fields);
            }
        }
        return;
    };

    let name = match parent_name {
        Some(parent) => format!("{}.{}", parent, partial),
        None => partial,
    };

    let (child_fields, widget_kids): (Vec<ObjectId>, Vec<ObjectId>) = kids
        .iter()
        .copied()
        .partition(|kid| dict(doc, *kid).is_some_and(|k| k.has(b"T")));

    let mut widgets = Vec::new();
    if is_widget(field) {
        widgets.push(id);
    }
    widgets.extend(widget_kids);

    fields.push(FieldNode {
        id,
        name: name.clone(),
        field_type: inherited.field_type.clone(),
        flags: inherited.flags,
        quadding: inherited.quadding,
        default_appearance: inherited.default_appearance.clone(),
        widgets,
        terminal: child_fields.is_empty(),
    });

    for child in child_fields {
        walk(doc, child, Some(&name), &inherited, visited, fields);
    }
}

fn partial_name(field: &Dictionary) -> Option<String> {
    field.get(b"T").ok().and_then(decode_text_string)
}

/// True for widget annotations, including fields merged with their widget
pub fn is_widget(dict: &Dictionary) -> bool {
    match dict.get(b"Subtype").and_then(Object::as_name) {
        Ok(subtype) => subtype == b"Widget",
        Err(_) => dict.has(b"Rect") && !dict.has(b"Kids"),
    }
}

/// Option values and appearance states of a field.
///
/// Walks the field and, recursively, its kids. Each node contributes its
/// `/Opt` entries (the display string of `[export display]` pairs) and
/// then the keys of its `/AP /N` state dictionary. Duplicates keep their
/// first position.
pub fn field_options(doc: &Document, field: &FieldNode) -> Vec<String> {
    let mut options = Vec::new();
    let mut visited = HashSet::new();
    collect_options(doc, field.id, &mut visited, &mut options);
    options
}

fn push_unique(options: &mut Vec<String>, value: String) {
    if !options.contains(&value) {
        options.push(value);
    }
}

fn collect_options(
    doc: &Document,
    id: ObjectId,
    visited: &mut HashSet<ObjectId>,
    options: &mut Vec<String>,
) {
    if !visited.insert(id) {
        return;
    }
    let Some(node) = dict(doc, id) else {
        return;
    };

    for label in choice_labels(doc, node) {
        push_unique(options, label);
    }

    if let Some(Object::Dictionary(normal)) = normal_appearance(doc, node) {
        for (key, _) in normal.iter() {
            push_unique(options, decode_name(key));
        }
    }

    for kid in reference_list(doc, node.get(b"Kids").ok()) {
        collect_options(doc, kid, visited, options);
    }
}

fn choice_labels(doc: &Document, node: &Dictionary) -> Vec<String> {
    let Some(opt) = node.get(b"Opt").ok().and_then(|o| resolve(doc, o)) else {
        return Vec::new();
    };
    match opt {
        Object::String(..) => decode_text_string(opt).into_iter().collect(),
        Object::Array(items) => items
            .iter()
            .filter_map(|item| match resolve(doc, item)? {
                label @ Object::String(..) => decode_text_string(label),
                Object::Array(pair) => pair.get(1).and_then(decode_text_string),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// The `/AP /N` entry of an annotation, resolved one level
pub fn normal_appearance<'a>(doc: &'a Document, annot: &'a Dictionary) -> Option<&'a Object> {
    let ap = annot.get(b"AP").ok().and_then(|ap| resolve(doc, ap))?;
    let normal = ap.as_dict().ok()?.get(b"N").ok()?;
    resolve(doc, normal)
}

/// Project the field tree into the reported metadata
pub fn field_properties(doc: &Document, fields: &[FieldNode]) -> Vec<FieldProperties> {
    fields
        .iter()
        .map(|field| FieldProperties {
            name: field.name.clone(),
            field_type: field.field_type.as_deref().map(decode_name),
            options: field_options(doc, field),
        })
        .collect()
}

/// Font size from a default appearance string such as `/Helv 12 Tf 0 g`
pub fn da_font_size(da: &[u8]) -> Option<f32> {
    let da = String::from_utf8_lossy(da);
    let tokens: Vec<&str> = da.split_whitespace().collect();
    let tf = tokens.iter().rposition(|t| *t == "Tf")?;
    tokens.get(tf.checked_sub(1)?)?.parse().ok()
}
