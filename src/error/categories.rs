use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // Client errors
    ValidationError,
    AuthenticationError,
    NotFound,

    // Relay errors
    TransientFetch,
    DispatchFailure,
    StorageError,
    StateInconsistency,
    PersistenceHalted,

    // System errors
    InternalError,
}

impl ErrorCategory {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::AuthenticationError => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::TransientFetch | Self::DispatchFailure => StatusCode::BAD_GATEWAY,
            Self::StorageError
            | Self::StateInconsistency
            | Self::PersistenceHalted
            | Self::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AuthenticationError => "AUTH_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::TransientFetch => "FETCH_FAILED",
            Self::DispatchFailure => "DISPATCH_FAILED",
            Self::StorageError => "STORAGE_ERROR",
            Self::StateInconsistency => "STATE_INCONSISTENCY",
            Self::PersistenceHalted => "PERSISTENCE_HALTED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether an error of this category must stop the relay.
    ///
    /// Everything else is logged and retried or reported per event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StateInconsistency | Self::PersistenceHalted)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.error_code())
    }
}
