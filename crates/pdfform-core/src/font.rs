//! TrueType font embedding with Identity-H encoding
//!
//! Field text is written as two-byte glyph ids, so any character the font
//! covers renders regardless of script. Only the glyphs actually shown are
//! listed in the `/W` widths and the ToUnicode CMap; the font program
//! itself is embedded whole.

use std::collections::BTreeMap;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use owned_ttf_parser::{name_id, AsFaceRef, GlyphId, OwnedFace};

use crate::error::FormError;

/// Maximum entries per `beginbfchar` block
const BFCHAR_BLOCK: usize = 100;

/// A TrueType font loaded into a document
pub struct EmbeddedFont {
    face: OwnedFace,
    program: Vec<u8>,
    base_font: String,
    object_id: ObjectId,
    resource_name: String,
    /// Glyph id -> (character, advance in 1000-unit glyph space)
    used: BTreeMap<u16, (char, i64)>,
    referenced: bool,
}

impl EmbeddedFont {
    /// Parse a font program. `object_id` is reserved for the Type0 font
    /// dictionary, which is written by [`EmbeddedFont::write_to`].
    pub fn parse(
        program: Vec<u8>,
        object_id: ObjectId,
        resource_name: impl Into<String>,
    ) -> Result<Self, FormError> {
        let face = OwnedFace::from_vec(program.clone(), 0)
            .map_err(|e| FormError::FontError(e.to_string()))?;

        if face.as_face_ref().units_per_em() == 0 {
            return Err(FormError::FontError("Font reports zero units per em".into()));
        }

        let base_font = postscript_name(&face).unwrap_or_else(|| "EmbeddedFont".to_string());

        Ok(Self {
            face,
            program,
            base_font,
            object_id,
            resource_name: resource_name.into(),
            used: BTreeMap::new(),
            referenced: false,
        })
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Name used for this font in `/DR` and appearance resources
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn base_font(&self) -> &str {
        &self.base_font
    }

    /// Record that some dictionary points at this font
    pub fn mark_referenced(&mut self) {
        self.referenced = true;
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    fn units_per_em(&self) -> f32 {
        f32::from(self.face.as_face_ref().units_per_em())
    }

    fn scale(&self, units: f32) -> f32 {
        units * 1000.0 / self.units_per_em()
    }

    /// Ascender in 1000-unit glyph space
    pub fn ascent(&self) -> f32 {
        self.scale(f32::from(self.face.as_face_ref().ascender()))
    }

    /// Descender in 1000-unit glyph space (negative below the baseline)
    pub fn descent(&self) -> f32 {
        self.scale(f32::from(self.face.as_face_ref().descender()))
    }

    /// Glyph id for a character, 0 (notdef) when the font lacks it
    pub fn glyph_id(&self, ch: char) -> u16 {
        self.face
            .as_face_ref()
            .glyph_index(ch)
            .map(|g| g.0)
            .unwrap_or(0)
    }

    fn advance(&self, glyph: u16) -> f32 {
        let units = self
            .face
            .as_face_ref()
            .glyph_hor_advance(GlyphId(glyph))
            .unwrap_or(0);
        self.scale(f32::from(units))
    }

    /// Width of `text` in points at `font_size`
    pub fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let units: f32 = text
            .chars()
            .filter(|c| !c.is_control())
            .map(|c| self.advance(self.glyph_id(c)))
            .sum();
        units * font_size / 1000.0
    }

    /// Encode text as big-endian glyph ids, recording the glyphs used
    pub fn encode(&mut self, text: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(text.len() * 2);
        for ch in text.chars().filter(|c| !c.is_control()) {
            let glyph = self.glyph_id(ch);
            let width = self.advance(glyph).round() as i64;
            self.used.entry(glyph).or_insert((ch, width));
            bytes.extend_from_slice(&glyph.to_be_bytes());
        }
        bytes
    }

    /// Write the Type0 font, its descendant, descriptor, program and
    /// ToUnicode CMap into `doc` at the reserved object id.
    pub fn write_to(&self, doc: &mut Document) {
        let face = self.face.as_face_ref();
        let bbox = face.global_bounding_box();
        let cap_height = face.capital_height().unwrap_or_else(|| face.ascender());

        let mut program_dict = Dictionary::new();
        program_dict.set("Length1", Object::Integer(self.program.len() as i64));
        let program_id = doc.add_object(Stream::new(program_dict, self.program.clone()));

        let mut descriptor = Dictionary::new();
        descriptor.set("Type", Object::Name(b"FontDescriptor".to_vec()));
        descriptor.set("FontName", Object::Name(self.base_font.clone().into_bytes()));
        // Nonsymbolic
        descriptor.set("Flags", Object::Integer(32));
        descriptor.set(
            "FontBBox",
            Object::Array(vec![
                Object::Integer(self.scale(f32::from(bbox.x_min)) as i64),
                Object::Integer(self.scale(f32::from(bbox.y_min)) as i64),
                Object::Integer(self.scale(f32::from(bbox.x_max)) as i64),
                Object::Integer(self.scale(f32::from(bbox.y_max)) as i64),
            ]),
        );
        descriptor.set("ItalicAngle", Object::Integer(0));
        descriptor.set("Ascent", Object::Integer(self.ascent() as i64));
        descriptor.set("Descent", Object::Integer(self.descent() as i64));
        descriptor.set(
            "CapHeight",
            Object::Integer(self.scale(f32::from(cap_height)) as i64),
        );
        descriptor.set("StemV", Object::Integer(80));
        descriptor.set("FontFile2", Object::Reference(program_id));
        let descriptor_id = doc.add_object(descriptor);

        let mut system_info = Dictionary::new();
        system_info.set(
            "Registry",
            Object::String(b"Adobe".to_vec(), StringFormat::Literal),
        );
        system_info.set(
            "Ordering",
            Object::String(b"Identity".to_vec(), StringFormat::Literal),
        );
        system_info.set("Supplement", Object::Integer(0));

        let mut cid_font = Dictionary::new();
        cid_font.set("Type", Object::Name(b"Font".to_vec()));
        cid_font.set("Subtype", Object::Name(b"CIDFontType2".to_vec()));
        cid_font.set("BaseFont", Object::Name(self.base_font.clone().into_bytes()));
        cid_font.set("CIDSystemInfo", Object::Dictionary(system_info));
        cid_font.set("FontDescriptor", Object::Reference(descriptor_id));
        cid_font.set("CIDToGIDMap", Object::Name(b"Identity".to_vec()));
        cid_font.set("DW", Object::Integer(1000));
        cid_font.set("W", Object::Array(self.width_array()));
        let cid_font_id = doc.add_object(cid_font);

        let cmap_id = doc.add_object(Stream::new(
            Dictionary::new(),
            self.to_unicode_cmap().into_bytes(),
        ));

        let mut type0 = Dictionary::new();
        type0.set("Type", Object::Name(b"Font".to_vec()));
        type0.set("Subtype", Object::Name(b"Type0".to_vec()));
        type0.set("BaseFont", Object::Name(self.base_font.clone().into_bytes()));
        type0.set("Encoding", Object::Name(b"Identity-H".to_vec()));
        type0.set(
            "DescendantFonts",
            Object::Array(vec![Object::Reference(cid_font_id)]),
        );
        type0.set("ToUnicode", Object::Reference(cmap_id));

        doc.objects.insert(self.object_id, Object::Dictionary(type0));
    }

    /// `/W` entries: runs of consecutive glyph ids share one width array
    fn width_array(&self) -> Vec<Object> {
        let mut entries = Vec::new();
        let mut run_start: Option<u16> = None;
        let mut previous = 0u16;
        let mut widths = Vec::new();

        for (&glyph, &(_, width)) in &self.used {
            match run_start {
                Some(_) if glyph == previous.wrapping_add(1) => {}
                Some(start) => {
                    entries.push(Object::Integer(i64::from(start)));
                    entries.push(Object::Array(std::mem::take(&mut widths)));
                    run_start = Some(glyph);
                }
                None => run_start = Some(glyph),
            }
            widths.push(Object::Integer(width));
            previous = glyph;
        }

        if let Some(start) = run_start {
            entries.push(Object::Integer(i64::from(start)));
            entries.push(Object::Array(widths));
        }

        entries
    }

    fn to_unicode_cmap(&self) -> String {
        let mut cmap = String::from(
            "/CIDInit /ProcSet findresource begin\n\
             12 dict begin\n\
             begincmap\n\
             /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
             /CMapName /Adobe-Identity-UCS def\n\
             /CMapType 2 def\n\
             1 begincodespacerange\n\
             <0000> <FFFF>\n\
             endcodespacerange\n",
        );

        let mapped: Vec<(u16, char)> = self
            .used
            .iter()
            .filter(|(&glyph, _)| glyph != 0)
            .map(|(&glyph, &(ch, _))| (glyph, ch))
            .collect();

        for block in mapped.chunks(BFCHAR_BLOCK) {
            cmap.push_str(&format!("{} beginbfchar\n", block.len()));
            for (glyph, ch) in block {
                let mut units = [0u16; 2];
                let hex: String = ch
                    .encode_utf16(&mut units)
                    .iter()
                    .map(|u| format!("{:04X}", u))
                    .collect();
                cmap.push_str(&format!("<{:04X}> <{}>\n", glyph, hex));
            }
            cmap.push_str("endbfchar\n");
        }

        cmap.push_str(
            "endcmap\n\
             CMapName currentdict /CMap defineresource pop\n\
             end\n\
             end\n",
        );
        cmap
    }
}

fn postscript_name(face: &OwnedFace) -> Option<String> {
    face.as_face_ref()
        .names()
        .into_iter()
        .filter(|name| name.name_id == name_id::POST_SCRIPT_NAME)
        .find_map(|name| name.to_string())
        .map(|name| {
            name.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect::<String>()
        })
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn load() -> EmbeddedFont {
        EmbeddedFont::parse(fixtures::test_font(), (100, 0), "FFill0").unwrap()
    }

    #[test]
    fn test_rejects_non_font_bytes() {
        let result = EmbeddedFont::parse(b"not a font".to_vec(), (1, 0), "F");
        assert!(matches!(result, Err(FormError::FontError(_))));
    }

    #[test]
    fn test_reads_postscript_name() {
        assert_eq!(load().base_font(), "DejaVuSans");
    }

    #[test]
    fn test_encode_uses_two_bytes_per_char() {
        let mut font = load();
        let bytes = font.encode("Aé");
        assert_eq!(bytes.len(), 4);
        let first = u16::from_be_bytes([bytes[0], bytes[1]]);
        assert_eq!(first, font.glyph_id('A'));
        assert_ne!(first, 0);
    }

    #[test]
    fn test_encode_skips_control_characters() {
        let mut font = load();
        assert_eq!(font.encode("a\nb").len(), 4);
    }

    #[test]
    fn test_text_width_scales_with_size() {
        let font = load();
        let small = font.text_width("Hello", 10.0);
        let large = font.text_width("Hello", 20.0);
        assert!(small > 0.0);
        assert!((large - small * 2.0).abs() < 0.01);
    }

    #[test]
    fn test_width_array_groups_consecutive_glyphs() {
        let mut font = load();
        font.encode("ab");
        let a = font.glyph_id('a');
        let b = font.glyph_id('b');
        assert_eq!(b, a + 1);

        let widths = font.width_array();
        assert_eq!(widths.len(), 2);
        assert_eq!(widths[0], Object::Integer(i64::from(a)));
        assert_eq!(widths[1].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_cmap_maps_used_glyphs() {
        let mut font = load();
        font.encode("Zß");
        let cmap = font.to_unicode_cmap();
        let z = format!("<{:04X}> <005A>", font.glyph_id('Z'));
        let sharp_s = format!("<{:04X}> <00DF>", font.glyph_id('ß'));
        assert!(cmap.contains(&z));
        assert!(cmap.contains(&sharp_s));
        assert!(cmap.contains("2 beginbfchar"));
    }

    #[test]
    fn test_write_to_inserts_type0_at_reserved_id() {
        let mut doc = Document::with_version("1.7");
        let id = doc.new_object_id();
        let mut font = EmbeddedFont::parse(fixtures::test_font(), id, "FFill0").unwrap();
        font.encode("Hi");
        font.write_to(&mut doc);

        let dict = doc.get_object(id).unwrap().as_dict().unwrap();
        assert_eq!(dict.get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
        assert_eq!(dict.get(b"Encoding").unwrap().as_name().unwrap(), b"Identity-H");
        assert!(dict.get(b"ToUnicode").is_ok());
    }
}
