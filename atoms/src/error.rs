use lambda_http::http::StatusCode;
use thiserror::Error;

use crate::drawing::SessionState;

/// Every failure an action can surface to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppError {
    /// Bad input, caught before any backend call.
    #[error("{0}")]
    Validation(String),

    #[error("Not authenticated")]
    Unauthenticated,

    /// Anything the table, bucket or session provider returned.
    #[error("{0}")]
    Backend(String),

    /// The source image could not be fetched or decoded.
    #[error("{0}")]
    ResourceLoad(String),

    /// Flattening the surface into a PNG failed.
    #[error("{0}")]
    Export(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Annotation session is not ready (state: {0})")]
    SessionNotReady(SessionState),
}

impl AppError {
    pub fn backend(message: impl std::fmt::Display) -> Self {
        AppError::Backend(message.to_string())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SessionNotReady(_) => StatusCode::CONFLICT,
            AppError::ResourceLoad(_) => StatusCode::BAD_GATEWAY,
            AppError::Backend(_) | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The collaborator's message, if it gave one worth showing.
    pub fn user_message(&self) -> Option<String> {
        let message = self.to_string();
        if message.trim().is_empty() {
            None
        } else {
            Some(message)
        }
    }
}
