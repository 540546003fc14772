//! Unified API error handling
//!
//! Provides consistent error responses across all endpoints. Field-level
//! validation failures carry a `fields` map of messages keyed by field name.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::middleware::request_id::current_request_id;

/// Validation messages keyed by field name
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Postgres SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";
/// Postgres SQLSTATE for foreign_key_violation
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed: {0:?}")]
    Validation(FieldErrors),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error")]
    Database(sqlx::Error),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(anyhow::anyhow!(msg.into()))
    }

    /// Single-field validation failure
    pub fn field(field: &str, msg: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![msg.into()]);
        Self::Validation(fields)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Validation(_) => "Validation failed".to_string(),
            Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::NotFound(msg)
            | Self::BadRequest(msg)
            | Self::Conflict(msg) => msg.clone(),
            // Don't leak internal error details
            Self::Internal(_) | Self::Database(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => Self::Conflict(match db_err.constraint() {
                    Some(constraint) => format!("Record already exists ({constraint})"),
                    None => "Record already exists".to_string(),
                }),
                Some(FOREIGN_KEY_VIOLATION) => {
                    Self::BadRequest("Referenced record is missing or still in use".to_string())
                }
                _ => Self::Database(err),
            },
            _ => Self::Database(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Log internal errors
        match &self {
            Self::Internal(e) => {
                tracing::error!(error = ?e, "Internal server error");
            }
            Self::Database(e) => {
                tracing::error!(error = ?e, "Database error");
            }
            _ => {
                tracing::warn!(error = %self, "API error");
            }
        }

        let status = self.status_code();
        let code = self.error_code().to_string();
        let message = self.public_message();
        let fields = match self {
            Self::Validation(fields) => Some(fields),
            _ => None,
        };

        let body = ErrorResponse {
            code,
            message,
            fields,
            request_id: current_request_id(),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Collects field errors so a request reports every problem at once
#[derive(Debug, Default)]
pub struct Violations(FieldErrors);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, msg: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(msg.into());
    }

    pub fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, "This field is required");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn finish(self) -> ApiResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_group_messages_by_field() {
        let mut v = Violations::new();
        v.require("name", "  ");
        v.add("name", "too short");
        v.add("edrpou", "taken");

        match v.finish() {
            Err(ApiError::Validation(fields)) => {
                assert_eq!(fields["name"].len(), 2);
                assert_eq!(fields["edrpou"], vec!["taken".to_string()]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn empty_violations_pass() {
        assert!(Violations::new().finish().is_ok());
    }

    #[test]
    fn status_codes_follow_variant() {
        assert_eq!(ApiError::field("x", "bad").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::conflict("dup").status_code(), StatusCode::CONFLICT);
        assert_eq!(ApiError::forbidden("no").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::internal("boom").error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
