//! Error types for the form server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pdfform_core::FormError;
use thiserror::Error;
use tracing::{error, warn};

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Client input failed validation; the message is sent as is
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Unprocessable document: {0}")]
    Unprocessable(#[from] FormError),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ServerError::InvalidRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Unprocessable(e) => {
                warn!("Engine rejected document: {}", e);
                self.to_string()
            }
            ServerError::Timeout(ms) => {
                warn!("Form processing exceeded {}ms", ms);
                self.to_string()
            }
            ServerError::Internal(e) => {
                error!("Internal error: {}", e);
                "Internal error".to_string()
            }
            ServerError::InvalidRequest(_) => self.to_string(),
        };

        (status, message).into_response()
    }
}
