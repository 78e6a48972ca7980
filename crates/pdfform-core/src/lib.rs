//! AcroForm filling and analysis
//!
//! This crate opens PDF forms with lopdf, sets field values with an
//! embedded TrueType font, generates appearance streams and optionally
//! flattens the result into page content.
//!
//! - `fill_form` / `analyze_form`: pipelines generic over [`FormEngine`]
//! - [`LopdfEngine`]: the engine used in production

pub mod acroform;
pub mod appearance;
pub mod engine;
pub mod error;
pub mod flatten;
pub mod font;
pub mod lopdf_engine;
pub mod pipeline;
pub mod text;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use engine::{
    FieldKind, FieldProperties, FormDocument, FormEngine, AUTO_FONT_SIZE, FIXED_FONT_SIZE,
};
pub use error::FormError;
pub use lopdf_engine::{FontHandle, LopdfDocument, LopdfEngine};
pub use pipeline::{analyze_form, fill_form, FillJob};
