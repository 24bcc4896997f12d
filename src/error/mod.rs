use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

pub mod categories;

pub use categories::ErrorCategory;


/// Errors raised by the monitors, the observer and their collaborators
#[derive(Debug, Error)]
pub enum RelayError {
    /// The persisted cursor no longer matches the canonical chain
    #[error("state inconsistency at block {block_hash}: {detail}")]
    StateInconsistency { block_hash: String, detail: String },

    #[error("failed to fetch {what}: {source:#}")]
    Fetch {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("dispatch of {action} failed: {source:#}")]
    Dispatch {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist cursor: {0:#}")]
    Store(#[source] anyhow::Error),

    /// The cursor could not be written several times in a row
    #[error("stopped after {failures} consecutive failed cursor writes")]
    PersistenceHalted { failures: u32 },

    #[error("failed to decode webhook payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RelayError {
    pub fn fetch(what: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Fetch {
            what,
            source: source.into(),
        }
    }

    pub fn dispatch(action: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Dispatch {
            action,
            source: source.into(),
        }
    }

    pub fn inconsistency(block_hash: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StateInconsistency {
            block_hash: block_hash.into(),
            detail: detail.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StateInconsistency { .. } => ErrorCategory::StateInconsistency,
            Self::Fetch { .. } => ErrorCategory::TransientFetch,
            Self::Dispatch { .. } => ErrorCategory::DispatchFailure,
            Self::Store(_) => ErrorCategory::StorageError,
            Self::PersistenceHalted { .. } => ErrorCategory::PersistenceHalted,
            Self::Decode(_) => ErrorCategory::ValidationError,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }
}

/// Error returned from the HTTP surface
#[derive(Debug)]
pub struct AppError {
    pub category: ErrorCategory,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn authentication_error(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::AuthenticationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::NotFound, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_category(ErrorCategory::InternalError, message)
    }

    pub fn with_category(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            source: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.category.status_code()
    }
}

// Tell axum how to convert `AppError` into a response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.category.status_code();

        if status.is_server_error() {
            error!(
                category = ?self.category,
                code = self.category.error_code(),
                message = %self.message,
                source = ?self.source,
                "Internal server error"
            );
        } else if status.is_client_error() {
            warn!(
                category = ?self.category,
                code = self.category.error_code(),
                message = %self.message,
                "Client error"
            );
        }

        let body = json!({
            "error": {
                "code": self.category.error_code(),
                "message": self.message,
            }
        });

        (status, Json(body)).into_response()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // anyhow keeps the whole chain in its alternate display
        Self::internal_error(format!("{err:#}"))
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        let category = err.category();
        let message = err.to_string();
        Self::with_category(category, message).with_source(err)
    }
}
