//! PDF Form Server
//!
//! Fills and inspects AcroForm PDFs over HTTP:
//!
//! - `POST /fill`: set field values, draw appearances, flatten
//! - `POST /analyze`: list field names, types and options
//! - `GET /health`
//!
//! Engine work runs on the blocking pool under a per-request timeout.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;

use api::{handle_analyze, handle_fill, handle_health};

/// Room for the non-file parts on top of the upload limit
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Command-line arguments for the form server
#[derive(Parser, Debug)]
#[command(name = "pdfform-server")]
#[command(about = "HTTP service for filling and analyzing PDF forms")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory that font identifiers are resolved against
    #[arg(long, default_value = "resources/fonts")]
    font_dir: PathBuf,

    /// Font used when a fill request names none, relative to the font directory
    #[arg(long, default_value = "dejavu/DejaVuSans.ttf")]
    default_font: String,

    /// Largest accepted PDF upload in megabytes
    #[arg(long, default_value = "100")]
    max_upload_mb: usize,

    /// Per-request processing timeout in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Shared application state
#[derive(Clone, Debug)]
pub struct AppState {
    pub font_dir: PathBuf,
    pub default_font: String,
    pub max_upload_bytes: usize,
    /// Processing timeout in milliseconds
    pub timeout_ms: u64,
}

/// Routes and middleware for the given state
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(handle_health))
        .route("/fill", post(handle_fill))
        .route("/analyze", post(handle_analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let default_font_path = args.font_dir.join(&args.default_font);
    if !default_font_path.is_file() {
        anyhow::bail!("Default font not found at {}", default_font_path.display());
    }

    let state = AppState {
        font_dir: args.font_dir.clone(),
        default_font: args.default_font.clone(),
        max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
        timeout_ms: args.timeout_ms,
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Font directory: {}", args.font_dir.display());
    info!("Upload limit: {}MB", args.max_upload_mb);
    info!("Processing timeout: {}ms", args.timeout_ms);

    axum::serve(listener, app).await?;

    Ok(())
}
