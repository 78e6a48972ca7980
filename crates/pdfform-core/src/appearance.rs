//! Appearance streams for variable-text fields
//!
//! Text and choice widgets are drawn as a form XObject sized to the widget
//! rectangle. Text is clipped to the rectangle inset by one point and laid
//! out with a two point padding.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object, Stream, StringFormat};

use crate::error::FormError;
use crate::font::EmbeddedFont;

const PADDING: f32 = 2.0;

/// Smallest size auto-fit will pick
pub const MIN_AUTO_FONT_SIZE: f32 = 4.0;

/// Multiline auto-fit starts here and shrinks until the text fits
const MAX_MULTILINE_AUTO_FONT_SIZE: f32 = 12.0;

const AUTO_SIZE_STEP: f32 = 0.5;

/// Horizontal text alignment from the field's `/Q` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    pub fn from_quadding(quadding: i64) -> Self {
        match quadding {
            1 => Alignment::Center,
            2 => Alignment::Right,
            _ => Alignment::Left,
        }
    }
}

/// Geometry and text settings of one widget
#[derive(Debug, Clone)]
pub struct TextLayout {
    pub width: f32,
    pub height: f32,
    /// 0 requests auto-fit
    pub font_size: f32,
    pub alignment: Alignment,
    pub multiline: bool,
}

impl TextLayout {
    fn inner_width(&self) -> f32 {
        (self.width - 2.0 * PADDING).max(0.0)
    }

    fn inner_height(&self) -> f32 {
        (self.height - 2.0 * PADDING).max(0.0)
    }
}

/// Build the normal appearance stream for `text`
pub fn build_text_appearance(
    font: &mut EmbeddedFont,
    layout: &TextLayout,
    text: &str,
) -> Result<Stream, FormError> {
    let font_size = resolve_font_size(font, layout, text);
    let lines = if layout.multiline {
        wrap_lines(font, text, font_size, layout.inner_width())
    } else {
        vec![single_line(text)]
    };

    let ascent = font.ascent() * font_size / 1000.0;
    let descent = font.descent() * font_size / 1000.0;
    let line_height = ascent - descent;
    let first_baseline = if layout.multiline {
        layout.height - PADDING - ascent
    } else {
        (layout.height - line_height) / 2.0 - descent
    };

    let mut operations = vec![
        Operation::new("BMC", vec![Object::Name(b"Tx".to_vec())]),
        Operation::new("q", vec![]),
        Operation::new(
            "re",
            vec![
                real(1.0),
                real(1.0),
                real((layout.width - 2.0).max(0.0)),
                real((layout.height - 2.0).max(0.0)),
            ],
        ),
        Operation::new("W", vec![]),
        Operation::new("n", vec![]),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![
                Object::Name(font.resource_name().as_bytes().to_vec()),
                real(font_size),
            ],
        ),
        Operation::new("g", vec![real(0.0)]),
    ];

    for (index, line) in lines.iter().enumerate() {
        if line.is_empty() {
            continue;
        }
        let line_width = font.text_width(line, font_size);
        let x = match layout.alignment {
            Alignment::Left => PADDING,
            Alignment::Center => (layout.width - line_width) / 2.0,
            Alignment::Right => layout.width - PADDING - line_width,
        };
        let y = first_baseline - index as f32 * line_height;

        operations.push(Operation::new(
            "Tm",
            vec![real(1.0), real(0.0), real(0.0), real(1.0), real(x), real(y)],
        ));
        operations.push(Operation::new(
            "Tj",
            vec![Object::String(font.encode(line), StringFormat::Hexadecimal)],
        ));
    }

    operations.push(Operation::new("ET", vec![]));
    operations.push(Operation::new("Q", vec![]));
    operations.push(Operation::new("EMC", vec![]));

    let content = Content { operations }
        .encode()
        .map_err(|e| FormError::WriteError(format!("Failed to encode appearance: {}", e)))?;

    let mut fonts = Dictionary::new();
    fonts.set(
        font.resource_name().as_bytes().to_vec(),
        Object::Reference(font.object_id()),
    );
    let mut resources = Dictionary::new();
    resources.set("Font", Object::Dictionary(fonts));

    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Form".to_vec()));
    dict.set(
        "BBox",
        Object::Array(vec![
            real(0.0),
            real(0.0),
            real(layout.width),
            real(layout.height),
        ]),
    );
    dict.set("Resources", Object::Dictionary(resources));

    font.mark_referenced();
    Ok(Stream::new(dict, content))
}

/// The size text is drawn at: the requested size, or a best fit for 0
pub fn resolve_font_size(font: &EmbeddedFont, layout: &TextLayout, text: &str) -> f32 {
    if layout.font_size > 0.0 {
        return layout.font_size;
    }

    // Height of one line per point of font size
    let line_factor = (font.ascent() - font.descent()) / 1000.0;
    if line_factor <= 0.0 {
        return MIN_AUTO_FONT_SIZE;
    }

    if layout.multiline {
        let mut size = MAX_MULTILINE_AUTO_FONT_SIZE;
        while size > MIN_AUTO_FONT_SIZE {
            let lines = wrap_lines(font, text, size, layout.inner_width()).len();
            if lines as f32 * size * line_factor <= layout.inner_height() {
                break;
            }
            size -= AUTO_SIZE_STEP;
        }
        return size.max(MIN_AUTO_FONT_SIZE);
    }

    let by_height = layout.inner_height() / line_factor;
    let unit_width = font.text_width(&single_line(text), 1.0);
    let by_width = if unit_width > 0.0 {
        layout.inner_width() / unit_width
    } else {
        by_height
    };

    by_height.min(by_width).max(MIN_AUTO_FONT_SIZE)
}

/// Greedy word wrap; words wider than a line are broken between characters
pub fn wrap_lines(font: &EmbeddedFont, text: &str, font_size: f32, max_width: f32) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = Vec::new();

    for paragraph in normalized.split('\n') {
        let mut current = String::new();
        for word in paragraph.split(' ') {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };

            if current.is_empty() || font.text_width(&candidate, font_size) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current = word.to_string();
            }

            while current.chars().count() > 1 && font.text_width(&current, font_size) > max_width
            {
                let split = split_at_width(font, &current, font_size, max_width);
                if split >= current.len() {
                    break;
                }
                lines.push(current[..split].to_string());
                current = current[split..].to_string();
            }
        }
        lines.push(current);
    }

    lines
}

/// Byte index where `text` overflows `max_width`, always past the first char
fn split_at_width(font: &EmbeddedFont, text: &str, font_size: f32, max_width: f32) -> usize {
    let mut width = 0.0;
    let mut buffer = [0u8; 4];
    for (index, ch) in text.char_indices() {
        width += font.text_width(ch.encode_utf8(&mut buffer), font_size);
        if width > max_width {
            return if index == 0 { ch.len_utf8() } else { index };
        }
    }
    text.len()
}

fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn real(value: f32) -> Object {
    Object::Real(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn font() -> EmbeddedFont {
        EmbeddedFont::parse(fixtures::test_font(), (50, 0), "FFill0").unwrap()
    }

    fn layout(width: f32, height: f32, font_size: f32, multiline: bool) -> TextLayout {
        TextLayout {
            width,
            height,
            font_size,
            alignment: Alignment::Left,
            multiline,
        }
    }

    #[test]
    fn test_fixed_size_is_kept() {
        let font = font();
        let size = resolve_font_size(&font, &layout(200.0, 20.0, 11.0, false), "Alice");
        assert_eq!(size, 11.0);
    }

    #[test]
    fn test_auto_size_fits_width() {
        let font = font();
        let field = layout(60.0, 40.0, 0.0, false);
        let text = "Long value here";
        let size = resolve_font_size(&font, &field, text);
        assert!(size < 11.0);
        assert!(font.text_width(text, size) <= field.width - 2.0 * PADDING + 0.01);
    }

    #[test]
    fn test_auto_size_fits_height() {
        let font = font();
        let size = resolve_font_size(&font, &layout(500.0, 14.0, 0.0, false), "Hi");
        let line_factor = (font.ascent() - font.descent()) / 1000.0;
        assert!(size * line_factor <= 10.0 + 0.01);
    }

    #[test]
    fn test_auto_size_never_below_minimum() {
        let font = font();
        let size = resolve_font_size(&font, &layout(10.0, 5.0, 0.0, false), "Overflowing text");
        assert_eq!(size, MIN_AUTO_FONT_SIZE);
    }

    #[test]
    fn test_multiline_auto_size_shrinks_for_long_text() {
        let font = font();
        let short = resolve_font_size(&font, &layout(200.0, 60.0, 0.0, true), "Short");
        let long = resolve_font_size(
            &font,
            &layout(200.0, 60.0, 0.0, true),
            &"many words in a paragraph ".repeat(20),
        );
        assert_eq!(short, MAX_MULTILINE_AUTO_FONT_SIZE);
        assert!(long < short);
    }

    #[test]
    fn test_wrap_respects_explicit_newlines() {
        let font = font();
        let lines = wrap_lines(&font, "first\nsecond", 10.0, 500.0);
        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_wrap_breaks_long_words() {
        let font = font();
        let lines = wrap_lines(&font, "Supercalifragilistic", 12.0, 30.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat(), "Supercalifragilistic");
        for line in &lines {
            assert!(line.chars().count() == 1 || font.text_width(line, 12.0) <= 30.0);
        }
    }

    #[test]
    fn test_appearance_stream_shape() {
        let mut font = font();
        let stream =
            build_text_appearance(&mut font, &layout(120.0, 18.0, 11.0, false), "Alice").unwrap();

        assert_eq!(
            stream.dict.get(b"Subtype").unwrap().as_name().unwrap(),
            b"Form"
        );
        let bbox = stream.dict.get(b"BBox").unwrap().as_array().unwrap();
        assert_eq!(bbox[2].as_float().unwrap(), 120.0);

        let content = Content::decode(&stream.content).unwrap();
        let shown: Vec<&Operation> = content
            .operations
            .iter()
            .filter(|op| op.operator == "Tj")
            .collect();
        assert_eq!(shown.len(), 1);

        let expected: Vec<u8> = "Alice"
            .chars()
            .flat_map(|c| font.glyph_id(c).to_be_bytes())
            .collect();
        assert_eq!(shown[0].operands[0].as_str().unwrap(), expected.as_slice());
        assert!(font.is_referenced());
    }

    #[test]
    fn test_right_alignment_moves_text() {
        let mut font = font();
        let mut right = layout(200.0, 20.0, 10.0, false);
        right.alignment = Alignment::Right;
        let stream = build_text_appearance(&mut font, &right, "x").unwrap();
        let content = Content::decode(&stream.content).unwrap();
        let tm = content
            .operations
            .iter()
            .find(|op| op.operator == "Tm")
            .unwrap();
        assert!(tm.operands[4].as_float().unwrap() > 150.0);
    }
}
