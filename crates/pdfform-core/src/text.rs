//! PDF text string encoding
//!
//! Field values and option labels are "text strings": PDFDocEncoding, or
//! UTF-16BE behind a byte order mark. lopdf carries the encoding tables.

use lopdf::{Object, StringFormat};

/// Encode a value as a PDF text string object.
///
/// lopdf's PDFDocEncoding table has no entries for tab and line breaks, so
/// text carrying control characters goes out as UTF-16BE.
pub fn encode_text_string(text: &str) -> Object {
    if text.chars().any(|c| c.is_control()) {
        Object::String(lopdf::encode_utf16_be(text), StringFormat::Hexadecimal)
    } else {
        lopdf::text_string(text)
    }
}

/// Decode a PDF text string object.
///
/// Non-strings decode to nothing. A string whose UTF-16 payload is broken
/// is kept lossily rather than dropped.
pub fn decode_text_string(obj: &Object) -> Option<String> {
    match lopdf::decode_text_string(obj) {
        Ok(text) => Some(text.trim_start_matches('\u{FEFF}').to_string()),
        Err(_) => obj
            .as_str()
            .ok()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Decode a PDF name into a string
pub fn decode_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}
