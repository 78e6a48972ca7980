//! API handlers for the form server
//!
//! Provides endpoints for:
//! - Filling a form (`POST /fill`)
//! - Listing form fields (`POST /analyze`)
//! - Health checks

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pdfform_core::{analyze_form, fill_form, FieldProperties, FillJob, FormError, LopdfEngine};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::AppState;

/// The only accepted upload type
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

const BYTES_PER_MB: usize = 1024 * 1024;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "pdfform-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// One multipart part as received
#[derive(Debug, Clone)]
pub struct FormPart {
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Handler: POST /fill
pub async fn handle_fill(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let mut parts = collect_parts(multipart, state.max_upload_bytes).await?;

    let pdf = parts
        .remove("pdf")
        .ok_or_else(|| ServerError::invalid("Pdf file is required"))?;
    let values = text_part(&mut parts, "values")?
        .ok_or_else(|| ServerError::invalid("Values is required"))?;

    let pdf = validate_upload(pdf, state.max_upload_bytes)?;
    let values = parse_values(&values)?;
    let auto_size_fields =
        parse_auto_size_fields(text_part(&mut parts, "autosizefields")?.as_deref())?;
    let flatten = parse_flatten(text_part(&mut parts, "flatten")?.as_deref())?;
    let font = text_part(&mut parts, "font")?;

    let font_bytes = load_font(&state, font.as_deref()).await?;

    info!(
        pdf_bytes = pdf.len(),
        values = values.len(),
        auto_size = auto_size_fields.len(),
        "Filling form"
    );

    let job = FillJob {
        values,
        auto_size_fields,
        flatten,
    };
    let output = run_blocking(state.timeout_ms, move || {
        fill_form(&LopdfEngine, &pdf, font_bytes, &job)
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, PDF_CONTENT_TYPE)], output).into_response())
}

/// Handler: POST /analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Vec<FieldProperties>>, ServerError> {
    let mut parts = collect_parts(multipart, state.max_upload_bytes).await?;

    let pdf = parts
        .remove("pdf")
        .ok_or_else(|| ServerError::invalid("Pdf file is required"))?;
    let pdf = validate_upload(pdf, state.max_upload_bytes)?;

    info!(pdf_bytes = pdf.len(), "Analyzing form");

    let fields = run_blocking(state.timeout_ms, move || analyze_form(&LopdfEngine, &pdf)).await?;
    Ok(Json(fields))
}

/// Read every part into memory, keyed by lowercased name. The first part
/// with a given name wins. A non-PDF upload is refused before its body is
/// read, so an oversized one still reports its type.
async fn collect_parts(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> Result<HashMap<String, FormPart>, ServerError> {
    let mut parts: HashMap<String, FormPart> = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_upload_bytes))?
    {
        let Some(name) = field.name().map(str::to_ascii_lowercase) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        if name == "pdf" && !parts.contains_key("pdf") {
            check_content_type(content_type.as_deref())?;
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, max_upload_bytes))?;

        debug!(part = %name, bytes = data.len(), "Received part");
        parts.entry(name).or_insert(FormPart { content_type, data });
    }

    Ok(parts)
}

fn multipart_error(err: MultipartError, max_upload_bytes: usize) -> ServerError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::invalid(size_limit_message(max_upload_bytes))
    } else {
        ServerError::invalid(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Take a part as UTF-8 text
fn text_part(
    parts: &mut HashMap<String, FormPart>,
    name: &str,
) -> Result<Option<String>, ServerError> {
    parts
        .remove(name)
        .map(|part| {
            String::from_utf8(part.data.to_vec())
                .map_err(|_| ServerError::invalid(format!("Part {} must be UTF-8 text", name)))
        })
        .transpose()
}

fn size_limit_message(max_upload_bytes: usize) -> String {
    format!(
        "File size exceeds the {}MB limit.",
        max_upload_bytes / BYTES_PER_MB
    )
}

/// Check the declared type and size of an uploaded PDF
pub fn validate_upload(part: FormPart, max_upload_bytes: usize) -> Result<Bytes, ServerError> {
    check_content_type(part.content_type.as_deref())?;

    if part.data.len() > max_upload_bytes {
        return Err(ServerError::invalid(size_limit_message(max_upload_bytes)));
    }

    Ok(part.data)
}

fn check_content_type(content_type: Option<&str>) -> Result<(), ServerError> {
    let content_type = content_type.unwrap_or_default();
    if content_type != PDF_CONTENT_TYPE {
        return Err(ServerError::invalid(format!(
            "Invalid file type: {}. Only PDF files are accepted.",
            content_type
        )));
    }
    Ok(())
}

/// Parse the `Values` part: a JSON object whose values are strings,
/// numbers or booleans. Numbers and booleans are filled as their JSON text.
pub fn parse_values(text: &str) -> Result<BTreeMap<String, String>, ServerError> {
    let invalid = |detail: &dyn std::fmt::Display| {
        ServerError::invalid(format!("Could not parse values: {}", detail))
    };

    let values = match serde_json::from_str::<Value>(text).map_err(|e| invalid(&e))? {
        Value::Null => return Err(ServerError::invalid("Values cannot be null")),
        Value::Object(values) => values,
        other => return Err(invalid(&format!("expected an object, got {}", json_kind(&other)))),
    };

    values
        .into_iter()
        .map(|(key, value)| match scalar_text(value) {
            Ok(text) => Ok((key, text)),
            Err(kind) => Err(invalid(&format!("value of {} is {}", key, kind))),
        })
        .collect()
}

/// Parse the optional `AutoSizeFields` part: a JSON array of names
pub fn parse_auto_size_fields(text: Option<&str>) -> Result<HashSet<String>, ServerError> {
    let invalid = |detail: &dyn std::fmt::Display| {
        ServerError::invalid(format!("Could not parse autoSizeFields: {}", detail))
    };

    let Some(text) = text else {
        return Ok(HashSet::new());
    };
    let names = match serde_json::from_str::<Value>(text).map_err(|e| invalid(&e))? {
        Value::Null => return Ok(HashSet::new()),
        Value::Array(names) => names,
        other => return Err(invalid(&format!("expected an array, got {}", json_kind(&other)))),
    };

    names
        .into_iter()
        .map(|name| scalar_text(name).map_err(|kind| invalid(&format!("entry is {}", kind))))
        .collect()
}

/// Text of a JSON string, number or boolean; anything else yields its kind
fn scalar_text(value: Value) -> Result<String, &'static str> {
    match value {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(json_kind(&other)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse the optional `Flatten` part; flattening is on by default
pub fn parse_flatten(text: Option<&str>) -> Result<bool, ServerError> {
    match text.map(str::trim) {
        None => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => Err(ServerError::invalid(format!(
            "Could not parse flatten: expected true or false, got {}",
            value
        ))),
    }
}

/// The font a request asks for: the trimmed `Font` part, or the default
/// when the part is missing or blank
pub fn font_identifier<'a>(default_font: &'a str, requested: Option<&'a str>) -> &'a str {
    requested
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_font)
}

/// Map a font identifier to a file under `font_dir`. Identifiers that
/// could leave the directory are rejected.
pub fn resolve_font_path(font_dir: &Path, identifier: &str) -> Result<PathBuf, ServerError> {
    let relative = Path::new(identifier);
    let contained = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    let names_file = relative
        .components()
        .any(|c| matches!(c, Component::Normal(_)));

    if !contained || !names_file || identifier.contains('\\') {
        return Err(ServerError::invalid("Invalid font identifier"));
    }

    Ok(font_dir.join(relative))
}

async fn load_font(state: &AppState, requested: Option<&str>) -> Result<Vec<u8>, ServerError> {
    let identifier = font_identifier(&state.default_font, requested);
    let path = resolve_font_path(&state.font_dir, identifier)?;

    tokio::fs::read(&path).await.map_err(|e| {
        ServerError::Unprocessable(FormError::FontError(format!("{}: {}", identifier, e)))
    })
}

/// Run engine work off the async runtime under the request timeout
async fn run_blocking<T, F>(timeout_ms: u64, work: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FormError> + Send + 'static,
{
    let result = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        tokio::task::spawn_blocking(work),
    )
    .await;

    match result {
        Ok(Ok(outcome)) => outcome.map_err(ServerError::from),
        Ok(Err(join_error)) => Err(ServerError::Internal(format!(
            "Form task panicked: {}",
            join_error
        ))),
        Err(_timeout) => Err(ServerError::Timeout(timeout_ms)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pdf_part(content_type: Option<&str>, len: usize) -> FormPart {
        FormPart {
            content_type: content_type.map(str::to_string),
            data: Bytes::from(vec![b'%'; len]),
        }
    }

    #[test]
    fn test_upload_exactly_at_limit_passes() {
        assert!(validate_upload(pdf_part(Some(PDF_CONTENT_TYPE), 1024), 1024).is_ok());
    }

    #[test]
    fn test_upload_over_limit_fails() {
        let err = validate_upload(pdf_part(Some(PDF_CONTENT_TYPE), 1025), 1024).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));

        let err = validate_upload(pdf_part(Some(PDF_CONTENT_TYPE), 1), 0).unwrap_err();
        assert_eq!(err.to_string(), "File size exceeds the 0MB limit.");
    }

    #[test]
    fn test_content_type_checked_before_size() {
        let err = validate_upload(pdf_part(Some("text/plain"), 4096), 1024).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid file type: text/plain. Only PDF files are accepted."
        );
    }

    #[test]
    fn test_size_message_reports_megabytes() {
        assert_eq!(
            size_limit_message(100 * BYTES_PER_MB),
            "File size exceeds the 100MB limit."
        );
    }

    #[test]
    fn test_values_null_and_malformed() {
        assert_eq!(
            parse_values("null").unwrap_err().to_string(),
            "Values cannot be null"
        );
        assert!(parse_values("{not json")
            .unwrap_err()
            .to_string()
            .starts_with("Could not parse values:"));
        assert!(parse_values(r#"["a"]"#).is_err());
        assert!(parse_values(r#"{"name": null}"#).is_err());
    }

    #[test]
    fn test_values_accept_scalars_as_text() {
        let values = parse_values(r#"{"age": 30, "ratio": 1.5, "agree": true, "name": "Ann"}"#)
            .unwrap();
        assert_eq!(
            values,
            BTreeMap::from([
                ("age".to_string(), "30".to_string()),
                ("agree".to_string(), "true".to_string()),
                ("name".to_string(), "Ann".to_string()),
                ("ratio".to_string(), "1.5".to_string()),
            ])
        );
    }

    #[test]
    fn test_values_reject_nested_json() {
        for text in [r#"{"tags": ["a", "b"]}"#, r#"{"address": {"city": "Oslo"}}"#] {
            assert!(parse_values(text)
                .unwrap_err()
                .to_string()
                .starts_with("Could not parse values:"));
        }
    }

    #[test]
    fn test_auto_size_fields_defaults() {
        assert!(parse_auto_size_fields(None).unwrap().is_empty());
        assert!(parse_auto_size_fields(Some("null")).unwrap().is_empty());
        assert_eq!(
            parse_auto_size_fields(Some(r#"["a","b","a"]"#)).unwrap().len(),
            2
        );
        assert_eq!(
            parse_auto_size_fields(Some("[1,2]")).unwrap(),
            HashSet::from(["1".to_string(), "2".to_string()])
        );
        for text in [r#"[["a"]]"#, r#"{"a": 1}"#, "[null]", "[1"] {
            assert!(parse_auto_size_fields(Some(text))
                .unwrap_err()
                .to_string()
                .starts_with("Could not parse autoSizeFields:"));
        }
    }

    #[test]
    fn test_flatten_values() {
        assert!(parse_flatten(None).unwrap());
        assert!(!parse_flatten(Some("False")).unwrap());
        assert!(parse_flatten(Some(" true ")).unwrap());
        assert!(parse_flatten(Some("yes")).is_err());
    }

    #[test]
    fn test_font_paths() {
        let dir = Path::new("/fonts");
        assert_eq!(
            resolve_font_path(dir, "dejavu/DejaVuSans.ttf").unwrap(),
            PathBuf::from("/fonts/dejavu/DejaVuSans.ttf")
        );
        assert!(resolve_font_path(dir, "../etc/passwd").is_err());
        assert!(resolve_font_path(dir, "/etc/passwd").is_err());
        assert!(resolve_font_path(dir, "a/../../b.ttf").is_err());
        assert!(resolve_font_path(dir, ".").is_err());
        assert!(resolve_font_path(dir, "a\\b.ttf").is_err());
    }

    #[test]
    fn test_font_identifier_is_trimmed_or_defaulted() {
        assert_eq!(font_identifier("default.ttf", None), "default.ttf");
        assert_eq!(font_identifier("default.ttf", Some("   ")), "default.ttf");
        assert_eq!(
            font_identifier("default.ttf", Some("  other/Font.ttf\n")),
            "other/Font.ttf"
        );
    }

    #[tokio::test]
    async fn test_missing_font_error_names_trimmed_identifier() {
        let state = AppState {
            font_dir: PathBuf::from("/nonexistent-font-dir"),
            default_font: "default.ttf".into(),
            max_upload_bytes: BYTES_PER_MB,
            timeout_ms: 1000,
        };

        let err = load_font(&state, Some("  missing/Font.ttf ")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let message = err.to_string();
        assert!(
            message.starts_with("Unprocessable document: Failed to load font: missing/Font.ttf: "),
            "{}",
            message
        );
    }
}
