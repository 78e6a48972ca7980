//! Fill and analyze pipelines, generic over the form engine

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::engine::{FieldProperties, FormDocument, FormEngine, AUTO_FONT_SIZE, FIXED_FONT_SIZE};
use crate::error::FormError;

/// Everything a fill needs besides the PDF and the font program
#[derive(Debug, Clone)]
pub struct FillJob {
    /// Field name to value
    pub values: BTreeMap<String, String>,
    /// Fields whose font size is fitted to the widget
    pub auto_size_fields: HashSet<String>,
    /// Paint appearances into page content and drop the form
    pub flatten: bool,
}

impl FillJob {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            auto_size_fields: HashSet::new(),
            flatten: true,
        }
    }

    pub fn font_size_for(&self, field: &str) -> f32 {
        if self.auto_size_fields.contains(field) {
            AUTO_FONT_SIZE
        } else {
            FIXED_FONT_SIZE
        }
    }
}

/// Fill the form in `pdf` and return the finished document.
///
/// Names in `job.values` that match no field are skipped.
pub fn fill_form<E: FormEngine>(
    engine: &E,
    pdf: &[u8],
    font_bytes: Vec<u8>,
    job: &FillJob,
) -> Result<Vec<u8>, FormError> {
    let mut document = engine.open(pdf)?;
    document.set_generate_appearance(true);
    let font = document.load_font(font_bytes)?;

    let mut filled = 0;
    for (name, value) in &job.values {
        if !document.has_field(name) {
            debug!(field = %name, "No such field, skipping");
            continue;
        }
        document.set_field_value(name, value, &font, job.font_size_for(name))?;
        filled += 1;
    }

    info!(
        filled,
        requested = job.values.len(),
        flatten = job.flatten,
        "Filled form fields"
    );
    document.close(job.flatten)
}

/// Report every form field in `pdf`
pub fn analyze_form<E: FormEngine>(
    engine: &E,
    pdf: &[u8],
) -> Result<Vec<FieldProperties>, FormError> {
    let document = engine.open(pdf)?;
    let fields = document.form_fields();
    debug!(fields = fields.len(), "Analyzed form");
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, FixtureField};
    use crate::LopdfEngine;
    use lopdf::Document;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Records calls instead of touching a PDF
    #[derive(Default)]
    struct FakeEngine {
        calls: Arc<Mutex<Vec<(String, String, f32)>>>,
        closed_with: Arc<Mutex<Option<bool>>>,
    }

    struct FakeDocument {
        calls: Arc<Mutex<Vec<(String, String, f32)>>>,
        closed_with: Arc<Mutex<Option<bool>>>,
        generate_appearance: bool,
    }

    impl FormEngine for FakeEngine {
        type Document = FakeDocument;

        fn open(&self, pdf: &[u8]) -> Result<FakeDocument, FormError> {
            if pdf.is_empty() {
                return Err(FormError::ParseError("empty".into()));
            }
            Ok(FakeDocument {
                calls: Arc::clone(&self.calls),
                closed_with: Arc::clone(&self.closed_with),
                generate_appearance: false,
            })
        }
    }

    impl FormDocument for FakeDocument {
        type Font = ();

        fn set_generate_appearance(&mut self, generate: bool) {
            self.generate_appearance = generate;
        }

        fn load_font(&mut self, _font_bytes: Vec<u8>) -> Result<(), FormError> {
            Ok(())
        }

        fn has_field(&self, name: &str) -> bool {
            name != "ghost"
        }

        fn set_field_value(
            &mut self,
            name: &str,
            value: &str,
            _font: &(),
            font_size: f32,
        ) -> Result<(), FormError> {
            assert!(self.generate_appearance);
            self.calls
                .lock()
                .unwrap()
                .push((name.to_string(), value.to_string(), font_size));
            Ok(())
        }

        fn form_fields(&self) -> Vec<FieldProperties> {
            vec![]
        }

        fn close(self, flatten: bool) -> Result<Vec<u8>, FormError> {
            *self.closed_with.lock().unwrap() = Some(flatten);
            Ok(b"%PDF-fake".to_vec())
        }
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_auto_size_fields_get_zero_size() {
        let engine = FakeEngine::default();
        let mut job = FillJob::new(values(&[("a", "1"), ("b", "2")]));
        job.auto_size_fields.insert("b".into());

        let out = fill_form(&engine, b"%PDF", vec![], &job).unwrap();
        assert_eq!(out, b"%PDF-fake".to_vec());

        let calls = engine.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("a".to_string(), "1".to_string(), FIXED_FONT_SIZE),
                ("b".to_string(), "2".to_string(), AUTO_FONT_SIZE),
            ]
        );
        assert_eq!(*engine.closed_with.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let engine = FakeEngine::default();
        let job = FillJob::new(values(&[("ghost", "x"), ("name", "Alice")]));

        fill_form(&engine, b"%PDF", vec![], &job).unwrap();
        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "name");
    }

    #[test]
    fn test_flatten_flag_reaches_close() {
        let engine = FakeEngine::default();
        let mut job = FillJob::new(BTreeMap::new());
        job.flatten = false;

        fill_form(&engine, b"%PDF", vec![], &job).unwrap();
        assert_eq!(*engine.closed_with.lock().unwrap(), Some(false));
    }

    #[test]
    fn test_open_failure_propagates() {
        let engine = FakeEngine::default();
        let job = FillJob::new(values(&[("name", "Alice")]));
        assert!(matches!(
            fill_form(&engine, b"", vec![], &job),
            Err(FormError::ParseError(_))
        ));
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fill_with_lopdf_draws_value() {
        let pdf = fixtures::form_pdf(&[FixtureField::text("name")]);
        let job = FillJob::new(values(&[("name", "Alice"), ("ghost", "x")]));

        let out = fill_form(&LopdfEngine, &pdf, fixtures::test_font(), &job).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        assert!(doc.catalog().unwrap().get(b"AcroForm").is_err());

        // The painted XObject shows the glyphs of "Alice"
        let font = crate::font::EmbeddedFont::parse(fixtures::test_font(), (1, 0), "F").unwrap();
        let alice: Vec<u8> = "Alice"
            .chars()
            .flat_map(|c| font.glyph_id(c).to_be_bytes())
            .collect();
        let found = doc.objects.values().filter_map(|o| o.as_stream().ok()).any(|s| {
            let content = s
                .decompressed_content()
                .unwrap_or_else(|_| s.content.clone());
            lopdf::content::Content::decode(&content).is_ok_and(|c| {
                c.operations.iter().any(|op| {
                    op.operator == "Tj"
                        && op.operands.first().and_then(|o| o.as_str().ok()) == Some(alice.as_slice())
                })
            })
        });
        assert!(found);
    }

    #[test]
    fn test_analyze_is_idempotent() {
        let pdf = fixtures::email_and_country_pdf();
        let first = analyze_form(&LopdfEngine, &pdf).unwrap();
        let second = analyze_form(&LopdfEngine, &pdf).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }
}
