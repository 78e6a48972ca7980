//! Form engine abstraction
//!
//! The fill and analyze pipelines only talk to a [`FormEngine`] and the
//! [`FormDocument`] it opens. [`crate::LopdfEngine`] is the production
//! implementation; tests substitute their own to observe the calls made.

use serde::{Deserialize, Serialize};

use crate::error::FormError;

/// Font size for fields that are not auto-sized
pub const FIXED_FONT_SIZE: f32 = 11.0;

/// Font size that asks the engine for a best-fit size
pub const AUTO_FONT_SIZE: f32 = 0.0;

/// Metadata reported for a single form field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProperties {
    /// Fully qualified field name (partial names joined with `.`)
    pub name: String,
    /// Bare `/FT` name such as `Tx` or `Ch`, if the field declares one
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    /// Option values and appearance states, in document order
    pub options: Vec<String>,
}

/// The four AcroForm field types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Button,
    Choice,
    Signature,
}

impl FieldKind {
    /// Map a `/FT` name to a field kind
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"Tx" => Some(FieldKind::Text),
            b"Btn" => Some(FieldKind::Button),
            b"Ch" => Some(FieldKind::Choice),
            b"Sig" => Some(FieldKind::Signature),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "Tx",
            FieldKind::Button => "Btn",
            FieldKind::Choice => "Ch",
            FieldKind::Signature => "Sig",
        }
    }
}

/// Opens PDF bytes into an editable form document
pub trait FormEngine: Send + Sync {
    type Document: FormDocument;

    fn open(&self, pdf: &[u8]) -> Result<Self::Document, FormError>;
}

/// An opened document with its (possibly newly created) AcroForm
pub trait FormDocument {
    /// Handle to a font loaded into this document
    type Font;

    /// When enabled, fields without a normal appearance get one on close
    fn set_generate_appearance(&mut self, generate: bool);

    /// Load a TrueType program with Identity-H encoding
    fn load_font(&mut self, font_bytes: Vec<u8>) -> Result<Self::Font, FormError>;

    /// True if a field with this fully qualified name exists
    fn has_field(&self, name: &str) -> bool;

    /// Set a field value, rendering it with `font` at `font_size`.
    ///
    /// A size of [`AUTO_FONT_SIZE`] lets the engine pick a best-fit size.
    fn set_field_value(
        &mut self,
        name: &str,
        value: &str,
        font: &Self::Font,
        font_size: f32,
    ) -> Result<(), FormError>;

    /// Every form field in enumeration order
    fn form_fields(&self) -> Vec<FieldProperties>;

    /// Finalize the document and serialize it
    fn close(self, flatten: bool) -> Result<Vec<u8>, FormError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_round_trips_names() {
        for kind in [
            FieldKind::Text,
            FieldKind::Button,
            FieldKind::Choice,
            FieldKind::Signature,
        ] {
            assert_eq!(FieldKind::from_name(kind.as_str().as_bytes()), Some(kind));
        }
        assert_eq!(FieldKind::from_name(b"Widget"), None);
    }

    #[test]
    fn test_field_properties_serializes_type_key() {
        let props = FieldProperties {
            name: "email".to_string(),
            field_type: Some("Tx".to_string()),
            options: vec![],
        };
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "email", "type": "Tx", "options": []})
        );
    }

    #[test]
    fn test_field_properties_serializes_null_type() {
        let props = FieldProperties {
            name: "group".to_string(),
            field_type: None,
            options: vec![],
        };
        let json = serde_json::to_string(&props).unwrap();
        assert!(json.contains("\"type\":null"));
    }
}
