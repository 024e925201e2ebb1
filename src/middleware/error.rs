use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::middleware::ctx::Ctx;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CtxError {
    pub error: AppError,
    pub req_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppError {
    Generic { description: String },
    AuthFailNoJwtCookie,
    AuthFailJwtInvalid { source: String },
    AuthorizationFail { required: String },
    EntityFailIdNotFound { ident: String },
    InvalidState { description: String },
    AlreadyReviewed { ident: String },
    InsufficientFunds { required: i64, available: i64 },
    ValidationError { description: String },
    Conflict { description: String },
    UnsupportedMediaType { description: String },
    RequestTimeout,
    Serde { source: String },
    SurrealDb { source: String },
}

/// Error carrying the request id, returned from handlers.
pub type CtxResult<T> = core::result::Result<T, CtxError>;
/// Error raised before a request id is attached.
pub type AppResult<T> = core::result::Result<T, AppError>;

impl std::error::Error for AppError {}

impl AppError {
    /// Machine readable code sent to clients next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Generic { .. } => "INTERNAL",
            AppError::AuthFailNoJwtCookie | AppError::AuthFailJwtInvalid { .. } => "UNAUTHORIZED",
            AppError::AuthorizationFail { .. } => "FORBIDDEN",
            AppError::EntityFailIdNotFound { .. } => "NOT_FOUND",
            AppError::InvalidState { .. } => "INVALID_STATE",
            AppError::AlreadyReviewed { .. } => "ALREADY_REVIEWED",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::UnsupportedMediaType { .. } => "UNSUPPORTED_MEDIA_TYPE",
            AppError::RequestTimeout => "TIMEOUT",
            AppError::Serde { .. } => "SERDE",
            AppError::SurrealDb { .. } => "DATABASE",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthFailNoJwtCookie | AppError::AuthFailJwtInvalid { .. } => {
                StatusCode::UNAUTHORIZED
            }
            AppError::AuthorizationFail { .. } => StatusCode::FORBIDDEN,
            AppError::EntityFailIdNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InvalidState { .. }
            | AppError::ValidationError { .. }
            | AppError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            AppError::AlreadyReviewed { .. } | AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            AppError::Generic { .. } | AppError::Serde { .. } | AppError::SurrealDb { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict { .. })
    }
}

impl CtxError {
    pub fn from<T: Into<AppError>>(ctx: &Ctx) -> impl FnOnce(T) -> CtxError + '_ {
        |err| CtxError {
            req_id: ctx.req_id(),
            error: err.into(),
        }
    }
}

impl From<surrealdb::Error> for CtxError {
    fn from(value: surrealdb::Error) -> Self {
        CtxError {
            req_id: Uuid::new_v4(),
            error: value.into(),
        }
    }
}

impl From<AppError> for CtxError {
    fn from(value: AppError) -> Self {
        CtxError {
            req_id: Uuid::new_v4(),
            error: value,
        }
    }
}

impl From<validator::ValidationErrors> for CtxError {
    fn from(value: validator::ValidationErrors) -> Self {
        CtxError {
            req_id: Uuid::new_v4(),
            error: value.into(),
        }
    }
}

const INTERNAL: &str = "Internal error";

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic { description } => write!(f, "{description}"),
            Self::AuthFailNoJwtCookie => write!(f, "You are not logged in"),
            Self::AuthFailJwtInvalid { .. } => write!(f, "The provided JWT token is not valid"),
            Self::AuthorizationFail { required } => write!(f, "Not authorized, requires {required}"),
            Self::EntityFailIdNotFound { ident } => write!(f, "Record id= {ident} not found"),
            Self::InvalidState { description } => write!(f, "{description}"),
            Self::AlreadyReviewed { ident } => write!(f, "Submission {ident} is already reviewed"),
            Self::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "Insufficient balance, required {required}, available {available}"
            ),
            Self::ValidationError { description } => write!(f, "{description}"),
            Self::Conflict { description } => write!(f, "{description}"),
            Self::UnsupportedMediaType { description } => write!(f, "{description}"),
            Self::RequestTimeout => write!(f, "Request timed out"),
            Self::Serde { source } => write!(f, "Serde error - {source}"),
            Self::SurrealDb { .. } => write!(f, "{INTERNAL}"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponseBody {
    pub error: String,
    pub code: String,
    pub req_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<i64>,
}

impl ErrorResponseBody {
    pub fn new(error: &AppError, req_id: Option<String>) -> Self {
        let (required, available, shortfall) = match error {
            AppError::InsufficientFunds {
                required,
                available,
            } => (
                Some(*required),
                Some(*available),
                Some(required - available),
            ),
            _ => (None, None, None),
        };
        ErrorResponseBody {
            error: error.to_string(),
            code: error.code().to_string(),
            req_id: req_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            required,
            available,
            shortfall,
        }
    }
}

impl IntoResponse for CtxError {
    fn into_response(self) -> Response {
        let status_code = self.error.status_code();
        if status_code.is_server_error() {
            error!(req_id = %self.req_id, error = ?self.error, "request failed");
        } else {
            warn!(req_id = %self.req_id, error = ?self.error, "request rejected");
        }
        let body = ErrorResponseBody::new(&self.error, Some(self.req_id.to_string()));
        let mut response = (status_code, Json(body)).into_response();
        // the logger reads the original error from the extensions
        response.extensions_mut().insert(self.error);
        response
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde {
            source: value.to_string(),
        }
    }
}

impl From<surrealdb::Error> for AppError {
    fn from(value: surrealdb::Error) -> Self {
        let source = value.to_string();
        if is_conflict_message(&source) {
            return Self::Conflict {
                description: "Concurrent update, try again".to_string(),
            };
        }
        Self::SurrealDb { source }
    }
}

impl From<CtxError> for AppError {
    fn from(value: CtxError) -> Self {
        value.error
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        Self::AuthFailJwtInvalid {
            source: value.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(value: validator::ValidationErrors) -> Self {
        Self::ValidationError {
            description: value.to_string(),
        }
    }
}

pub(crate) fn is_conflict_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("conflict") || message.contains("can be retried")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_body_carries_shortfall() {
        let body = ErrorResponseBody::new(
            &AppError::InsufficientFunds {
                required: 1200,
                available: 1000,
            },
            None,
        );
        assert_eq!(body.code, "INSUFFICIENT_FUNDS");
        assert_eq!(body.required, Some(1200));
        assert_eq!(body.available, Some(1000));
        assert_eq!(body.shortfall, Some(200));
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            AppError::AlreadyReviewed {
                ident: "task_submission:a".to_string()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::InvalidState {
                description: "paused".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::AuthFailNoJwtCookie.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::AuthorizationFail {
                required: "admin".to_string()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn conflict_messages_are_detected() {
        assert!(is_conflict_message(
            "Failed to commit transaction due to a read or write conflict. This transaction can be retried"
        ));
        assert!(!is_conflict_message("Record not found"));
    }
}
