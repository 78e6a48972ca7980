//! Flattening
//!
//! Each visible widget's normal appearance is painted into its page with a
//! `cm` + `Do` pair, the widget annotation is dropped from `/Annots`, and
//! the existing page content is wrapped in `q`/`Q` so its graphics state
//! cannot leak into the painted fields.

use std::collections::HashSet;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::acroform::{dict, dict_mut, indirect_child, is_widget, resolve};
use crate::error::FormError;

/// Annotation flag: do not display
const FLAG_HIDDEN: i64 = 1 << 1;

/// Prefix for XObject names added to page resources
const XOBJECT_PREFIX: &str = "FlatFld";

enum AppearanceSource {
    Indirect(ObjectId),
    Inline(Stream),
}

struct Placement {
    source: AppearanceSource,
    matrix: [f32; 6],
}

/// Flatten every widget annotation in the document; returns how many
/// appearances were painted.
pub fn flatten_widgets(doc: &mut Document) -> Result<usize, FormError> {
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let mut painted = 0;

    for page_id in pages {
        painted += flatten_page(doc, page_id, painted)?;
    }

    debug!(painted, "Flattened widget appearances");
    Ok(painted)
}

fn flatten_page(doc: &mut Document, page_id: ObjectId, offset: usize) -> Result<usize, FormError> {
    let annots: Vec<Object> = match dict(doc, page_id).and_then(|p| p.get(b"Annots").ok()) {
        Some(annots) => resolve(doc, annots)
            .and_then(|a| a.as_array().ok())
            .cloned()
            .unwrap_or_default(),
        None => return Ok(0),
    };

    let mut kept = Vec::new();
    let mut placements = Vec::new();
    let mut removed = 0;

    for annot in annots {
        let widget = annot
            .as_reference()
            .ok()
            .and_then(|id| dict(doc, id))
            .filter(|d| is_widget(d));

        let Some(widget) = widget else {
            kept.push(annot);
            continue;
        };

        removed += 1;
        let flags = widget.get(b"F").and_then(Object::as_i64).unwrap_or(0);
        if flags & FLAG_HIDDEN != 0 {
            continue;
        }
        if let Some(placement) = placement(doc, widget) {
            placements.push(placement);
        }
    }

    if removed == 0 {
        return Ok(0);
    }

    let page = dict_mut(doc, page_id)?;
    if kept.is_empty() {
        page.remove(b"Annots");
    } else {
        page.set("Annots", Object::Array(kept));
    }

    if placements.is_empty() {
        return Ok(0);
    }

    let resources_id = page_resources(doc, page_id)?;
    let mut operations = Vec::new();

    for (index, placement) in placements.into_iter().enumerate() {
        let xobject_id = match placement.source {
            AppearanceSource::Indirect(id) => id,
            AppearanceSource::Inline(stream) => doc.add_object(stream),
        };
        if let Ok(Object::Stream(stream)) = doc.get_object_mut(xobject_id) {
            stream.dict.set("Type", Object::Name(b"XObject".to_vec()));
            stream.dict.set("Subtype", Object::Name(b"Form".to_vec()));
        }

        let name = format!("{}{}", XOBJECT_PREFIX, offset + index);
        register_xobject(doc, resources_id, &name, xobject_id)?;

        operations.push(Operation::new("q", vec![]));
        operations.push(Operation::new(
            "cm",
            placement.matrix.iter().map(|v| Object::Real(*v)).collect(),
        ));
        operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
        operations.push(Operation::new("Q", vec![]));
    }

    let painted = operations.len() / 4;
    let drawing = Content { operations }
        .encode()
        .map_err(|e| FormError::WriteError(format!("Failed to encode page content: {}", e)))?;
    append_content(doc, page_id, drawing)?;

    Ok(painted)
}

/// Locate the widget's normal appearance and the matrix mapping its
/// bounding box onto the widget rectangle.
fn placement(doc: &Document, widget: &Dictionary) -> Option<Placement> {
    let ap = resolve(doc, widget.get(b"AP").ok()?)?.as_dict().ok()?;
    let (mut id, mut normal) = indirect(doc, ap.get(b"N").ok()?)?;

    if let Object::Dictionary(states) = normal {
        let state = widget.get(b"AS").and_then(Object::as_name).ok()?;
        (id, normal) = indirect(doc, states.get(state).ok()?)?;
    }

    let Object::Stream(stream) = normal else {
        return None;
    };

    let rect = numbers(doc, widget.get(b"Rect").ok()?)?;
    let bbox = numbers(doc, stream.dict.get(b"BBox").ok()?)?;
    if rect.len() != 4 || bbox.len() != 4 {
        return None;
    }
    let form_matrix = stream
        .dict
        .get(b"Matrix")
        .ok()
        .and_then(|m| numbers(doc, m))
        .filter(|m| m.len() == 6)
        .unwrap_or_else(|| vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    let (rx0, rx1) = (rect[0].min(rect[2]), rect[0].max(rect[2]));
    let (ry0, ry1) = (rect[1].min(rect[3]), rect[1].max(rect[3]));
    let (bx0, by0, bx1, by1) = transformed_bounds(&bbox, &form_matrix);

    let (bw, bh) = (bx1 - bx0, by1 - by0);
    if bw.abs() < f32::EPSILON || bh.abs() < f32::EPSILON {
        return None;
    }

    let sx = (rx1 - rx0) / bw;
    let sy = (ry1 - ry0) / bh;
    let matrix = [sx, 0.0, 0.0, sy, rx0 - bx0 * sx, ry0 - by0 * sy];

    let source = match id {
        Some(id) => AppearanceSource::Indirect(id),
        None => AppearanceSource::Inline(stream.clone()),
    };
    Some(Placement { source, matrix })
}

fn indirect<'a>(doc: &'a Document, obj: &'a Object) -> Option<(Option<ObjectId>, &'a Object)> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok().map(|o| (Some(*id), o)),
        other => Some((None, other)),
    }
}

fn numbers(doc: &Document, obj: &Object) -> Option<Vec<f32>> {
    resolve(doc, obj)?
        .as_array()
        .ok()?
        .iter()
        .map(|v| v.as_float().ok())
        .collect()
}

/// Bounding box of `bbox` after applying `matrix`
fn transformed_bounds(bbox: &[f32], matrix: &[f32]) -> (f32, f32, f32, f32) {
    let corners = [
        (bbox[0], bbox[1]),
        (bbox[2], bbox[1]),
        (bbox[0], bbox[3]),
        (bbox[2], bbox[3]),
    ];
    let mut bounds = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for (x, y) in corners {
        let tx = matrix[0] * x + matrix[2] * y + matrix[4];
        let ty = matrix[1] * x + matrix[3] * y + matrix[5];
        bounds.0 = bounds.0.min(tx);
        bounds.1 = bounds.1.min(ty);
        bounds.2 = bounds.2.max(tx);
        bounds.3 = bounds.3.max(ty);
    }
    bounds
}

/// Resources dictionary of a page as an indirect object, copying an
/// inherited or inline dictionary onto the page first
fn page_resources(doc: &mut Document, page_id: ObjectId) -> Result<ObjectId, FormError> {
    let current = dict(doc, page_id)
        .and_then(|p| p.get(b"Resources").ok())
        .cloned();

    let resources = match current {
        Some(Object::Reference(id)) if dict(doc, id).is_some() => return Ok(id),
        Some(Object::Dictionary(inline)) => inline,
        _ => inherited_resources(doc, page_id).unwrap_or_else(Dictionary::new),
    };

    let resources_id = doc.add_object(resources);
    dict_mut(doc, page_id)?.set("Resources", Object::Reference(resources_id));
    Ok(resources_id)
}

fn inherited_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut visited = HashSet::new();
    let mut current = dict(doc, page_id)?
        .get(b"Parent")
        .and_then(Object::as_reference)
        .ok();

    while let Some(id) = current {
        if !visited.insert(id) {
            break;
        }
        let node = dict(doc, id)?;
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?.as_dict().ok().cloned();
        }
        current = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

fn register_xobject(
    doc: &mut Document,
    resources_id: ObjectId,
    name: &str,
    xobject_id: ObjectId,
) -> Result<(), FormError> {
    let xobjects_id = indirect_child(doc, resources_id, b"XObject")?;
    dict_mut(doc, xobjects_id)?.set(name, Object::Reference(xobject_id));
    Ok(())
}

fn append_content(doc: &mut Document, page_id: ObjectId, drawing: Vec<u8>) -> Result<(), FormError> {
    let existing: Vec<Object> = match dict(doc, page_id).and_then(|p| p.get(b"Contents").ok()) {
        Some(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Some(Object::Array(items)) => items.clone(),
        _ => vec![],
    };

    let prefix_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let mut suffix = b"Q\n".to_vec();
    suffix.extend(drawing);
    let suffix_id = doc.add_object(Stream::new(Dictionary::new(), suffix));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(prefix_id));
    contents.extend(existing);
    contents.push(Object::Reference(suffix_id));

    dict_mut(doc, page_id)?.set("Contents", Object::Array(contents));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, FixtureField};

    fn first_page(doc: &Document) -> ObjectId {
        *doc.get_pages().values().next().unwrap()
    }

    fn page_xobjects(doc: &Document) -> &Dictionary {
        let page = dict(doc, first_page(doc)).unwrap();
        let resources_id = page.get(b"Resources").unwrap().as_reference().unwrap();
        let xobjects_id = dict(doc, resources_id)
            .unwrap()
            .get(b"XObject")
            .unwrap()
            .as_reference()
            .unwrap();
        dict(doc, xobjects_id).unwrap()
    }

    #[test]
    fn test_flatten_paints_and_removes_widgets() {
        let bytes = fixtures::form_pdf(&[
            FixtureField::text("name").with_appearance(),
            FixtureField::checkbox("agree").checked(),
        ]);
        let mut doc = Document::load_mem(&bytes).unwrap();

        let painted = flatten_widgets(&mut doc).unwrap();
        assert_eq!(painted, 2);

        let page = dict(&doc, first_page(&doc)).unwrap();
        assert!(page.get(b"Annots").is_err());
        assert_eq!(page.get(b"Contents").unwrap().as_array().unwrap().len(), 3);

        let xobjects = page_xobjects(&doc);
        assert!(xobjects.has(b"FlatFld0"));
        assert!(xobjects.has(b"FlatFld1"));
    }

    #[test]
    fn test_checkbox_paints_current_state() {
        let bytes = fixtures::form_pdf(&[FixtureField::checkbox("agree").checked()]);
        let mut doc = Document::load_mem(&bytes).unwrap();

        let widget_id = doc
            .objects
            .iter()
            .find(|(_, obj)| {
                obj.as_dict().is_ok_and(|d| {
                    d.get(b"AS").and_then(Object::as_name).ok() == Some(b"Yes".as_slice())
                })
            })
            .map(|(id, _)| *id)
            .unwrap();
        let yes_id = dict(&doc, widget_id)
            .and_then(|w| w.get(b"AP").ok())
            .and_then(|ap| ap.as_dict().ok())
            .and_then(|ap| ap.get(b"N").ok())
            .and_then(|n| n.as_dict().ok())
            .and_then(|n| n.get(b"Yes").ok())
            .and_then(|y| y.as_reference().ok())
            .unwrap();

        flatten_widgets(&mut doc).unwrap();

        let xobjects = page_xobjects(&doc);
        assert_eq!(
            xobjects.get(b"FlatFld0").unwrap().as_reference().unwrap(),
            yes_id
        );
    }

    #[test]
    fn test_hidden_widgets_are_dropped_without_painting() {
        let bytes = fixtures::form_pdf(&[FixtureField::text("secret").with_appearance().hidden()]);
        let mut doc = Document::load_mem(&bytes).unwrap();

        assert_eq!(flatten_widgets(&mut doc).unwrap(), 0);
        let page = dict(&doc, first_page(&doc)).unwrap();
        assert!(page.get(b"Annots").is_err());
    }

    #[test]
    fn test_other_annotations_survive() {
        let bytes = fixtures::form_pdf_with_link(&[FixtureField::text("name").with_appearance()]);
        let mut doc = Document::load_mem(&bytes).unwrap();

        flatten_widgets(&mut doc).unwrap();
        let page = dict(&doc, first_page(&doc)).unwrap();
        let annots = page.get(b"Annots").unwrap().as_array().unwrap();
        assert_eq!(annots.len(), 1);
        let link = dict(&doc, annots[0].as_reference().unwrap()).unwrap();
        assert_eq!(link.get(b"Subtype").unwrap().as_name().unwrap(), b"Link");
    }

    #[test]
    fn test_matrix_maps_bbox_onto_rect() {
        let bbox = [0.0, 0.0, 100.0, 20.0];
        let identity = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        assert_eq!(transformed_bounds(&bbox, &identity), (0.0, 0.0, 100.0, 20.0));

        // 90 degree rotation swaps the extents
        let rotated = [0.0, 1.0, -1.0, 0.0, 0.0, 0.0];
        assert_eq!(transformed_bounds(&bbox, &rotated), (-20.0, 0.0, 0.0, 100.0));
    }
}
