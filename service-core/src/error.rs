use std::{collections::BTreeMap, fmt};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Wire name of an error category, as exposed in the `kind` field of error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    BadRequest,
    ValidationError,
    NotFound,
    NotAuthorized,
    Forbidden,
    Conflict,
    TooManyRequests,
    InternalError,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::NotAuthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Validation error codes shared by every command validator.
pub mod codes {
    pub const MISSING_FIELD: &str = "MISSING_FIELD";
    pub const INVALID_FORMAT: &str = "INVALID_FORMAT";
    pub const INVALID_LENGTH: &str = "INVALID_LENGTH";
    pub const UNEXPECTED_VALUE: &str = "UNEXPECTED_VALUE";
    pub const TOO_SHORT: &str = "TOO_SHORT";
    pub const TOO_LONG: &str = "TOO_LONG";
    pub const ALREADY_USED: &str = "ALREADY_USED";
}

/// Field name to error code map, plus an optional caller-supplied message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationFailure {
    pub message: Option<String>,
    pub errors: BTreeMap<String, String>,
}

impl ValidationFailure {
    pub fn field(field: impl Into<String>, code: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.into(), code.into());
        Self {
            message: None,
            errors,
        }
    }

    pub fn code_for(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: ", message)?,
            None => write!(f, "validation failed: ")?,
        }
        let fields: Vec<String> = self
            .errors
            .iter()
            .map(|(field, code)| format!("{}={}", field, code))
            .collect();
        write!(f, "{}", fields.join(", "))
    }
}

impl From<validator::ValidationErrors> for ValidationFailure {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut failure = ValidationFailure::default();
        for (field, field_errors) in errors.field_errors() {
            if let Some(first) = field_errors.first() {
                failure
                    .errors
                    .insert(field.to_string(), first.code.to_string());
            }
        }
        failure
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    ValidationError(ValidationFailure),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Single-field validation error.
    pub fn validation(field: impl Into<String>, code: impl Into<String>) -> Self {
        AppError::ValidationError(ValidationFailure::field(field, code))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ValidationError(_) => ErrorKind::ValidationError,
            AppError::BadRequest(_) => ErrorKind::BadRequest,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Unauthorized(_) => ErrorKind::NotAuthorized,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::TooManyRequests(..) => ErrorKind::TooManyRequests,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                ErrorKind::InternalError
            }
        }
    }

    /// Wraps the error with a contextual message without changing its kind.
    ///
    /// Validation errors keep their field map and only gain a message when none
    /// was set yet.
    pub fn context(self, message: impl Into<String>) -> Self {
        let message = message.into();
        match self {
            AppError::ValidationError(mut failure) => {
                failure.message.get_or_insert(message);
                AppError::ValidationError(failure)
            }
            AppError::BadRequest(err) => AppError::BadRequest(err.context(message)),
            AppError::NotFound(err) => AppError::NotFound(err.context(message)),
            AppError::Unauthorized(err) => AppError::Unauthorized(err.context(message)),
            AppError::Forbidden(err) => AppError::Forbidden(err.context(message)),
            AppError::Conflict(err) => AppError::Conflict(err.context(message)),
            AppError::TooManyRequests(msg, retry) => AppError::TooManyRequests(msg, retry),
            AppError::InternalError(err) => AppError::InternalError(err.context(message)),
            AppError::DatabaseError(err) => AppError::DatabaseError(err.context(message)),
            AppError::ConfigError(err) => AppError::ConfigError(err.context(message)),
        }
    }

    /// Outermost message followed by each underlying cause.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            AppError::BadRequest(err)
            | AppError::NotFound(err)
            | AppError::Unauthorized(err)
            | AppError::Forbidden(err)
            | AppError::Conflict(err)
            | AppError::InternalError(err)
            | AppError::DatabaseError(err)
            | AppError::ConfigError(err) => err.chain().map(|cause| cause.to_string()).collect(),
            AppError::ValidationError(failure) => failure.message.iter().cloned().collect(),
            AppError::TooManyRequests(msg, _) => vec![msg.clone()],
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::ValidationError(errors.into())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reason: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let mut retry_after = None;

        let body = match self {
            AppError::ValidationError(failure) => ErrorResponse {
                kind,
                message: failure
                    .message
                    .unwrap_or_else(|| "Validation error".to_string()),
                errors: Some(failure.errors),
                reason: Vec::new(),
            },
            AppError::TooManyRequests(msg, retry) => {
                retry_after = retry;
                ErrorResponse {
                    kind,
                    message: msg,
                    errors: None,
                    reason: Vec::new(),
                }
            }
            other => {
                let reason = other.reasons();
                let message = match kind {
                    ErrorKind::InternalError => "Internal server error".to_string(),
                    _ => reason.first().cloned().unwrap_or_default(),
                };
                ErrorResponse {
                    kind,
                    message,
                    errors: None,
                    reason: if kind == ErrorKind::InternalError {
                        reason
                    } else {
                        reason.into_iter().skip(1).collect()
                    },
                }
            }
        };

        if kind == ErrorKind::InternalError {
            tracing::error!(reason = ?body.reason, "Request failed with an internal error");
        }

        let mut res = (kind.status(), Json(body)).into_response();
        res.extensions_mut().insert(kind);

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_preserves_kind() {
        let err = AppError::NotFound(anyhow::anyhow!("no such client"))
            .context("failed to load the client");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.reasons(),
            vec![
                "failed to load the client".to_string(),
                "no such client".to_string()
            ]
        );
    }

    #[test]
    fn context_on_validation_keeps_field_map() {
        let err = AppError::validation("name", codes::ALREADY_USED).context("client rejected");
        match err {
            AppError::ValidationError(failure) => {
                assert_eq!(failure.message.as_deref(), Some("client rejected"));
                assert_eq!(failure.code_for("name"), Some(codes::ALREADY_USED));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn wrapped_store_errors_are_internal() {
        let err = AppError::DatabaseError(anyhow::anyhow!("connection reset")).context("save");
        assert_eq!(err.kind(), ErrorKind::InternalError);
        assert_eq!(err.kind().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn kinds_serialize_in_camel_case() {
        let json = serde_json::to_string(&ErrorKind::NotAuthorized).unwrap();
        assert_eq!(json, "\"notAuthorized\"");
        let json = serde_json::to_string(&ErrorKind::ValidationError).unwrap();
        assert_eq!(json, "\"validationError\"");
    }
}
