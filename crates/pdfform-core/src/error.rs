use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormError {
    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("Failed to load font: {0}")]
    FontError(String),

    #[error("Malformed form structure: {0}")]
    StructureError(String),

    #[error("Failed to write PDF: {0}")]
    WriteError(String),
}
